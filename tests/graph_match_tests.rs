//! Integration tests for virtual graph construction and pattern matching:
//! CREATE VIRTUAL, MATCH, variable-length relationships, direction,
//! zero-hop semantics, cycle handling, OPTIONAL MATCH, pattern
//! expressions, schema introspection and DELETE.

use std::rc::Rc;

use flowquery::{Database, Record, Runner, Value};

fn session() -> Rc<Database> {
    Rc::new(Database::new())
}

fn run_with(db: &Rc<Database>, query: &str) -> Vec<Record> {
    let mut runner = Runner::with_database(query, Rc::clone(db)).expect("statement should parse");
    runner.run().expect("statement should run");
    runner.results().to_vec()
}

fn run_err_with(db: &Rc<Database>, query: &str) -> String {
    match Runner::with_database(query, Rc::clone(db)) {
        Err(e) => e.to_string(),
        Ok(mut runner) => match runner.run() {
            Err(e) => e.to_string(),
            Ok(()) => panic!("expected failure for: {query}"),
        },
    }
}

fn rec(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Seed a `(:P)` label with sequential ids plus names.
fn seed_people(db: &Rc<Database>, label: &str, count: usize) {
    let entries: Vec<String> = (1..=count)
        .map(|i| format!("{{id: {i}, name: 'Person {i}'}}"))
        .collect();
    run_with(
        db,
        &format!(
            "CREATE VIRTUAL (:{label}) AS {{ unwind [{}] as record \
             RETURN record.id as id, record.name as name }}",
            entries.join(", ")
        ),
    );
}

/// Seed a relationship type between two labels from (left, right) pairs.
fn seed_edges(db: &Rc<Database>, from: &str, rel: &str, to: &str, pairs: &[(i64, i64)]) {
    let entries: Vec<String> = pairs
        .iter()
        .map(|(l, r)| format!("{{left_id: {l}, right_id: {r}}}"))
        .collect();
    run_with(
        db,
        &format!(
            "CREATE VIRTUAL (:{from})-[:{rel}]-(:{to}) AS {{ unwind [{}] as record \
             RETURN record.left_id as left_id, record.right_id as right_id }}",
            entries.join(", ")
        ),
    );
}

#[test]
fn test_create_virtual_node_returns_no_rows() {
    let db = session();
    let results = run_with(&db, "CREATE VIRTUAL (:TestPerson) AS { with 1 as x RETURN x }");
    assert!(results.is_empty());
}

#[test]
fn test_create_and_match_nodes() {
    let db = session();
    seed_people(&db, "MatchPerson", 2);
    let results = run_with(&db, "MATCH (n:MatchPerson) RETURN n");
    assert_eq!(results.len(), 2);
    match &results[0]["n"] {
        Value::Map(m) => {
            assert_eq!(m["id"], Value::Int(1));
            assert_eq!(m["name"], Value::from("Person 1"));
        }
        other => panic!("expected node record, got {other:?}"),
    }
}

#[test]
fn test_match_with_where_on_property() {
    let db = session();
    run_with(
        &db,
        "CREATE VIRTUAL (:AgePerson) AS { unwind [ \
            {id: 1, name: 'Person 1', age: 30}, \
            {id: 2, name: 'Person 2', age: 25}, \
            {id: 3, name: 'Person 3', age: 35}] as record \
         RETURN record.id as id, record.name as name, record.age as age }",
    );
    let results = run_with(
        &db,
        "MATCH (n:AgePerson) WHERE n.age > 29 RETURN n.name AS name, n.age AS age",
    );
    assert_eq!(
        results,
        vec![
            rec(&[("name", Value::from("Person 1")), ("age", Value::Int(30))]),
            rec(&[("name", Value::from("Person 3")), ("age", Value::Int(35))]),
        ]
    );
}

#[test]
fn test_match_cross_join_patterns() {
    let db = session();
    seed_people(&db, "JoinPerson", 2);
    let results = run_with(
        &db,
        "MATCH (a:JoinPerson), (b:JoinPerson) WHERE a.id <> b.id \
         RETURN a.name AS name1, b.name AS name2",
    );
    assert_eq!(
        results,
        vec![
            rec(&[
                ("name1", Value::from("Person 1")),
                ("name2", Value::from("Person 2")),
            ]),
            rec(&[
                ("name1", Value::from("Person 2")),
                ("name2", Value::from("Person 1")),
            ]),
        ]
    );
}

#[test]
fn test_match_with_node_property_constraint() {
    let db = session();
    seed_people(&db, "ConstraintEmployee", 4);
    let results = run_with(
        &db,
        "match (e:ConstraintEmployee{name:'Person 1'}) return e.name as name",
    );
    assert_eq!(results, vec![rec(&[("name", Value::from("Person 1"))])]);
}

#[test]
fn test_node_property_constraint_missing_property_fails() {
    let db = session();
    seed_people(&db, "PropLess", 1);
    let err = run_err_with(&db, "MATCH (e:PropLess{salary: 10}) RETURN e");
    assert!(err.contains("Node does not have property"));
}

#[test]
fn test_directed_single_hop() {
    let db = session();
    seed_people(&db, "DirPerson", 3);
    seed_edges(&db, "DirPerson", "REPORTS_TO", "DirPerson", &[(2, 1), (3, 1)]);

    let results = run_with(
        &db,
        "MATCH (a:DirPerson)-[:REPORTS_TO]->(b:DirPerson) \
         RETURN a.name AS employee, b.name AS manager",
    );
    assert_eq!(
        results,
        vec![
            rec(&[
                ("employee", Value::from("Person 2")),
                ("manager", Value::from("Person 1")),
            ]),
            rec(&[
                ("employee", Value::from("Person 3")),
                ("manager", Value::from("Person 1")),
            ]),
        ]
    );

    // Leftward: index on right_id, follow left_id.
    let results = run_with(
        &db,
        "MATCH (m:DirPerson)<-[:REPORTS_TO]-(e:DirPerson) \
         RETURN m.name AS manager, e.name AS employee",
    );
    assert_eq!(
        results,
        vec![
            rec(&[
                ("manager", Value::from("Person 1")),
                ("employee", Value::from("Person 2")),
            ]),
            rec(&[
                ("manager", Value::from("Person 1")),
                ("employee", Value::from("Person 3")),
            ]),
        ]
    );
}

#[test]
fn test_undirected_tries_right_then_left() {
    let db = session();
    seed_people(&db, "UndirCity", 2);
    seed_edges(&db, "UndirCity", "CONNECTED_TO", "UndirCity", &[(1, 2)]);

    let results = run_with(
        &db,
        "MATCH (a:UndirCity)-[:CONNECTED_TO]-(b:UndirCity) RETURN a.id AS a, b.id AS b",
    );
    // One edge, visible from both endpoints.
    assert_eq!(
        results,
        vec![
            rec(&[("a", Value::Int(1)), ("b", Value::Int(2))]),
            rec(&[("a", Value::Int(2)), ("b", Value::Int(1))]),
        ]
    );
}

#[test]
fn test_two_hop_chain() {
    let db = session();
    seed_people(&db, "DoublePerson", 4);
    seed_edges(
        &db,
        "DoublePerson",
        "KNOWS",
        "DoublePerson",
        &[(1, 2), (2, 3), (3, 4)],
    );
    let results = run_with(
        &db,
        "MATCH (a:DoublePerson)-[:KNOWS]->(b:DoublePerson)-[:KNOWS]->(c:DoublePerson) \
         RETURN a.id AS a, b.id AS b, c.id AS c",
    );
    assert_eq!(
        results,
        vec![
            rec(&[("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))]),
            rec(&[("a", Value::Int(2)), ("b", Value::Int(3)), ("c", Value::Int(4))]),
        ]
    );
}

#[test]
fn test_variable_length_min_one() {
    let db = session();
    seed_people(&db, "MinHop1", 4);
    seed_edges(&db, "MinHop1", "KNOWS", "MinHop1", &[(1, 2), (2, 3), (3, 4)]);
    let results = run_with(
        &db,
        "MATCH (a:MinHop1)-[:KNOWS*1..]->(b:MinHop1) RETURN a.id AS a, b.id AS b",
    );
    let pairs: Vec<(i64, i64)> = results
        .iter()
        .map(|r| match (&r["a"], &r["b"]) {
            (Value::Int(a), Value::Int(b)) => (*a, *b),
            other => panic!("unexpected row {other:?}"),
        })
        .collect();
    assert_eq!(pairs, vec![(1, 2), (1, 3), (1, 4), (2, 3), (2, 4), (3, 4)]);
}

#[test]
fn test_variable_length_min_two() {
    let db = session();
    seed_people(&db, "MinHop2", 4);
    seed_edges(&db, "MinHop2", "KNOWS", "MinHop2", &[(1, 2), (2, 3), (3, 4)]);
    let results = run_with(
        &db,
        "MATCH (a:MinHop2)-[:KNOWS*2..]->(b:MinHop2) RETURN a.id AS a, b.id AS b",
    );
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], rec(&[("a", Value::Int(1)), ("b", Value::Int(3))]));
    assert_eq!(results[1], rec(&[("a", Value::Int(1)), ("b", Value::Int(4))]));
    assert_eq!(results[2], rec(&[("a", Value::Int(2)), ("b", Value::Int(4))]));
}

#[test]
fn test_zero_hop_bounds() {
    let db = session();
    seed_people(&db, "MultiHop", 4);
    seed_edges(&db, "MultiHop", "KNOWS", "MultiHop", &[(1, 2), (2, 3), (3, 4)]);

    // *0..3 gives every node a zero-hop match to itself plus the chains.
    let results = run_with(
        &db,
        "MATCH (a:MultiHop)-[r:KNOWS*0..3]->(b:MultiHop) RETURN a.id AS a, b.id AS b",
    );
    assert_eq!(results.len(), 10);
    let zero_hops = results
        .iter()
        .filter(|r| r["a"] == r["b"])
        .count();
    assert_eq!(zero_hops, 4);

    // Bare * is 0-or-more as well.
    let results = run_with(
        &db,
        "MATCH (a:MultiHop)-[:KNOWS*]->(b:MultiHop) RETURN a.id AS a, b.id AS b",
    );
    assert_eq!(results.len(), 10);
}

#[test]
fn test_zero_hop_binds_relationship_to_null() {
    let db = session();
    seed_people(&db, "ZeroHop", 1);
    seed_edges(&db, "ZeroHop", "KNOWS", "ZeroHop", &[]);
    let results = run_with(
        &db,
        "MATCH (a:ZeroHop)-[r:KNOWS*]->(b:ZeroHop) RETURN a.id AS a, b.id AS b, r",
    );
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["a"], Value::Int(1));
    assert_eq!(results[0]["b"], Value::Int(1));
    assert_eq!(results[0]["r"], Value::Null);
}

#[test]
fn test_variable_length_never_revisits() {
    let db = session();
    seed_people(&db, "CycleVar", 2);
    seed_edges(&db, "CycleVar", "KNOWS", "CycleVar", &[(1, 2), (2, 1)]);
    let results = run_with(
        &db,
        "MATCH (a:CycleVar)-[:KNOWS*]->(b:CycleVar) RETURN a.id AS a, b.id AS b",
    );
    // Per start node: the zero-hop match and the single forward hop; the
    // two-hop path would revisit the origin and is skipped.
    assert_eq!(
        results,
        vec![
            rec(&[("a", Value::Int(1)), ("b", Value::Int(1))]),
            rec(&[("a", Value::Int(1)), ("b", Value::Int(2))]),
            rec(&[("a", Value::Int(2)), ("b", Value::Int(2))]),
            rec(&[("a", Value::Int(2)), ("b", Value::Int(1))]),
        ]
    );
}

#[test]
fn test_fixed_length_chain_may_return_to_start() {
    let db = session();
    seed_people(&db, "CycleFixed", 2);
    seed_edges(&db, "CycleFixed", "KNOWS", "CycleFixed", &[(1, 2), (2, 1)]);
    // Two independent single-hop steps: 1→2→1 and 2→1→2 are legal.
    let results = run_with(
        &db,
        "MATCH (a:CycleFixed)-[:KNOWS]->(b:CycleFixed)-[:KNOWS]->(c:CycleFixed) \
         RETURN a.id AS a, c.id AS c",
    );
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["a"], results[0]["c"]);
}

#[test]
fn test_fixed_length_self_loop_raises() {
    let db = session();
    seed_people(&db, "SelfLoop", 1);
    seed_edges(&db, "SelfLoop", "KNOWS", "SelfLoop", &[(1, 1)]);
    let err = run_err_with(&db, "MATCH (a:SelfLoop)-[:KNOWS]->(b:SelfLoop) RETURN a, b");
    assert!(err.contains("Circular relationship detected"));
}

#[test]
fn test_node_reference_across_match_operations() {
    let db = session();
    seed_people(&db, "RefPerson", 4);
    seed_edges(&db, "RefPerson", "KNOWS", "RefPerson", &[(1, 2), (2, 3), (3, 4)]);
    let results = run_with(
        &db,
        "MATCH (a:RefPerson)-[:KNOWS]->(b:RefPerson) \
         MATCH (b)-[:KNOWS]->(c:RefPerson) \
         RETURN a.id AS a, b.id AS b, c.id AS c",
    );
    assert_eq!(
        results,
        vec![
            rec(&[("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))]),
            rec(&[("a", Value::Int(2)), ("b", Value::Int(3)), ("c", Value::Int(4))]),
        ]
    );
}

#[test]
fn test_node_reference_reuse_within_pattern() {
    let db = session();
    seed_people(&db, "SelfRef", 3);
    seed_edges(&db, "SelfRef", "KNOWS", "SelfRef", &[(1, 2), (2, 1), (2, 3)]);
    // Re-using the variable pins the last node to the first one, so only
    // the round trips survive.
    let results = run_with(
        &db,
        "MATCH (n:SelfRef)-[:KNOWS]->(m:SelfRef)-[:KNOWS]->(n:SelfRef) \
         RETURN n.id AS n, m.id AS m",
    );
    assert_eq!(
        results,
        vec![
            rec(&[("n", Value::Int(1)), ("m", Value::Int(2))]),
            rec(&[("n", Value::Int(2)), ("m", Value::Int(1))]),
        ]
    );
}

#[test]
fn test_relationship_property_constraint() {
    let db = session();
    seed_people(&db, "RelProp", 3);
    run_with(
        &db,
        "CREATE VIRTUAL (:RelProp)-[:LIKES]-(:RelProp) AS { unwind [ \
            {left_id: 1, right_id: 2, since: 2022}, \
            {left_id: 1, right_id: 3, since: 2023}] as record \
         RETURN record.left_id as left_id, record.right_id as right_id, record.since as since }",
    );
    let results = run_with(
        &db,
        "MATCH (a:RelProp)-[r:LIKES{since: 2022}]->(b:RelProp) RETURN b.id AS b",
    );
    assert_eq!(results, vec![rec(&[("b", Value::Int(2))])]);

    let err = run_err_with(
        &db,
        "MATCH (a:RelProp)-[r:LIKES{weight: 1}]->(b:RelProp) RETURN b.id AS b",
    );
    assert!(err.contains("Relationship does not have property"));
}

#[test]
fn test_relationship_variable_carries_type_and_properties() {
    let db = session();
    seed_people(&db, "RelVar", 2);
    run_with(
        &db,
        "CREATE VIRTUAL (:RelVar)-[:CONNECTED]-(:RelVar) AS { unwind [ \
            {left_id: 1, right_id: 2, distance: 190}] as record \
         RETURN record.left_id as left_id, record.right_id as right_id, record.distance as distance }",
    );
    let results = run_with(
        &db,
        "MATCH (a:RelVar)-[r:CONNECTED]->(b:RelVar) RETURN r",
    );
    assert_eq!(results.len(), 1);
    match &results[0]["r"] {
        Value::Map(m) => {
            assert_eq!(m["type"], Value::from("CONNECTED"));
            match &m["properties"] {
                Value::Map(props) => assert_eq!(props["distance"], Value::Int(190)),
                other => panic!("expected properties map, got {other:?}"),
            }
            assert!(matches!(m["startNode"], Value::Map(_)));
            assert!(matches!(m["endNode"], Value::Map(_)));
        }
        other => panic!("expected relationship record, got {other:?}"),
    }
}

#[test]
fn test_path_variable_and_path_functions() {
    let db = session();
    seed_people(&db, "PathCity", 2);
    seed_edges(&db, "PathCity", "ROUTE", "PathCity", &[(1, 2)]);
    let results = run_with(
        &db,
        "MATCH p=(:PathCity)-[:ROUTE]->(:PathCity) \
         RETURN p AS pattern, nodes(p) AS ns, relationships(p) AS rs",
    );
    assert_eq!(results.len(), 1);
    match &results[0]["pattern"] {
        Value::List(path) => assert_eq!(path.len(), 3),
        other => panic!("expected path list, got {other:?}"),
    }
    match &results[0]["ns"] {
        Value::List(ns) => {
            assert_eq!(ns.len(), 2);
            match &ns[0] {
                Value::Map(m) => assert_eq!(m["id"], Value::Int(1)),
                other => panic!("expected node record, got {other:?}"),
            }
        }
        other => panic!("expected node list, got {other:?}"),
    }
    match &results[0]["rs"] {
        Value::List(rs) => {
            assert_eq!(rs.len(), 1);
            match &rs[0] {
                Value::Map(m) => assert_eq!(m["type"], Value::from("ROUTE")),
                other => panic!("expected relationship record, got {other:?}"),
            }
        }
        other => panic!("expected relationship list, got {other:?}"),
    }
}

#[test]
fn test_pattern_expression_in_where() {
    let db = session();
    seed_people(&db, "WherePerson", 4);
    seed_edges(&db, "WherePerson", "KNOWS", "WherePerson", &[(1, 2), (2, 3), (3, 4)]);
    let results = run_with(
        &db,
        "MATCH (a:WherePerson), (b:WherePerson) WHERE (a)-[:KNOWS]->(b) \
         RETURN a.id AS a, b.id AS b",
    );
    assert_eq!(
        results,
        vec![
            rec(&[("a", Value::Int(1)), ("b", Value::Int(2))]),
            rec(&[("a", Value::Int(2)), ("b", Value::Int(3))]),
            rec(&[("a", Value::Int(3)), ("b", Value::Int(4))]),
        ]
    );

    // The expression is a boolean operand: comparisons against it work.
    let results = run_with(
        &db,
        "MATCH (a:WherePerson), (b:WherePerson) WHERE (a)-[:KNOWS]->(b) <> true \
         RETURN a.id AS a, b.id AS b",
    );
    assert_eq!(results.len(), 13);
}

#[test]
fn test_negated_pattern_expression() {
    let db = session();
    seed_people(&db, "LonePerson", 3);
    seed_edges(&db, "LonePerson", "KNOWS", "LonePerson", &[(1, 2), (2, 1)]);
    let results = run_with(
        &db,
        "MATCH (a:LonePerson) WHERE NOT (a)-[:KNOWS]->(:LonePerson) RETURN a.id AS id",
    );
    assert_eq!(results, vec![rec(&[("id", Value::Int(3))])]);
}

#[test]
fn test_optional_match_emits_null_rows() {
    let db = session();
    seed_people(&db, "OptPerson", 3);
    seed_edges(&db, "OptPerson", "KNOWS", "OptPerson", &[(1, 2)]);
    let results = run_with(
        &db,
        "MATCH (a:OptPerson) OPTIONAL MATCH (a)-[:KNOWS]->(b:OptPerson) \
         RETURN a.name AS name, b AS friend",
    );
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["name"], Value::from("Person 1"));
    assert!(matches!(results[0]["friend"], Value::Map(_)));
    assert_eq!(results[1]["friend"], Value::Null);
    assert_eq!(results[2]["friend"], Value::Null);
}

#[test]
fn test_optional_match_property_access_on_null_is_null() {
    let db = session();
    seed_people(&db, "OptProp", 3);
    seed_edges(&db, "OptProp", "KNOWS", "OptProp", &[(1, 2)]);
    let results = run_with(
        &db,
        "MATCH (a:OptProp) OPTIONAL MATCH (a)-[:KNOWS]->(b:OptProp) \
         RETURN a.name AS name, b.name AS friend_name",
    );
    assert_eq!(
        results,
        vec![
            rec(&[
                ("name", Value::from("Person 1")),
                ("friend_name", Value::from("Person 2")),
            ]),
            rec(&[("name", Value::from("Person 2")), ("friend_name", Value::Null)]),
            rec(&[("name", Value::from("Person 3")), ("friend_name", Value::Null)]),
        ]
    );
}

#[test]
fn test_optional_match_totality() {
    let db = session();
    seed_people(&db, "OptTotal", 3);
    seed_edges(&db, "OptTotal", "FOLLOWS", "OptTotal", &[(1, 2)]);
    let plain = run_with(&db, "MATCH (a:OptTotal) RETURN a.id AS id");
    let optional = run_with(
        &db,
        "MATCH (a:OptTotal) OPTIONAL MATCH (a)-[:FOLLOWS]->(b:OptTotal) RETURN a.id AS id, b AS b",
    );
    // One row per source node, whether or not an edge exists.
    assert_eq!(optional.len(), plain.len());
    assert!(matches!(optional[0]["b"], Value::Map(_)));
    assert_eq!(optional[1]["b"], Value::Null);
    assert_eq!(optional[2]["b"], Value::Null);
}

#[test]
fn test_optional_match_with_empty_relationship_data() {
    let db = session();
    seed_people(&db, "OptNull", 2);
    run_with(
        &db,
        "CREATE VIRTUAL (:OptNull)-[:KNOWS]-(:OptNull) AS { unwind [] as record \
         RETURN record.left_id as left_id, record.right_id as right_id }",
    );
    let results = run_with(
        &db,
        "MATCH (a:OptNull) OPTIONAL MATCH (a)-[:KNOWS]->(b:OptNull) RETURN a.name AS name, b AS friend",
    );
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["friend"], Value::Null);
    assert_eq!(results[1]["friend"], Value::Null);
}

#[test]
fn test_optional_match_with_collect_keeps_null() {
    let db = session();
    seed_people(&db, "OptAgg", 3);
    seed_edges(&db, "OptAgg", "KNOWS", "OptAgg", &[(1, 2), (1, 3)]);
    let results = run_with(
        &db,
        "MATCH (a:OptAgg) OPTIONAL MATCH (a)-[:KNOWS]->(b:OptAgg) \
         RETURN a.name AS name, collect(b) AS friends",
    );
    assert_eq!(results.len(), 3);
    match &results[0]["friends"] {
        Value::List(friends) => assert_eq!(friends.len(), 2),
        other => panic!("expected list, got {other:?}"),
    }
    // Unmatched rows collect the null placeholder.
    match &results[1]["friends"] {
        Value::List(friends) => {
            assert_eq!(friends.len(), 1);
            assert_eq!(friends[0], Value::Null);
        }
        other => panic!("expected list, got {other:?}"),
    }
}

#[test]
fn test_standalone_optional_match() {
    let db = session();
    seed_people(&db, "OptAlone", 2);
    seed_edges(&db, "OptAlone", "KNOWS", "OptAlone", &[(1, 2)]);
    let results = run_with(
        &db,
        "OPTIONAL MATCH (a:OptAlone)-[:KNOWS]->(b:OptAlone) RETURN a.name AS name, b.name AS friend",
    );
    assert_eq!(
        results,
        vec![rec(&[
            ("name", Value::from("Person 1")),
            ("friend", Value::from("Person 2")),
        ])]
    );
}

#[test]
fn test_match_through_aggregated_with() {
    let db = session();
    run_with(
        &db,
        "CREATE VIRTUAL (:AggUser) AS { unwind [ \
            {id: 1, name: 'Alice'}, {id: 2, name: 'Bob'}, {id: 3, name: 'Carol'}] as record \
         RETURN record.id as id, record.name as name }",
    );
    seed_edges(&db, "AggUser", "KNOWS", "AggUser", &[(1, 2), (1, 3)]);
    run_with(
        &db,
        "CREATE VIRTUAL (:AggProject) AS { unwind [ \
            {id: 1, name: 'Project A'}, {id: 2, name: 'Project B'}] as record \
         RETURN record.id as id, record.name as name }",
    );
    seed_edges(&db, "AggUser", "WORKS_ON", "AggProject", &[(1, 1), (1, 2)]);

    let results = run_with(
        &db,
        "MATCH (u:AggUser)-[:KNOWS]->(s:AggUser) \
         WITH u, count(s) as acquaintances \
         MATCH (u)-[:WORKS_ON]->(p:AggProject) \
         RETURN u.name as name, acquaintances, collect(p.name) as projects",
    );
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["name"], Value::from("Alice"));
    assert_eq!(results[0]["acquaintances"], Value::Int(2));
    assert_eq!(
        results[0]["projects"],
        Value::List(vec![Value::from("Project A"), Value::from("Project B")])
    );
}

#[test]
fn test_unknown_label_and_type_fail() {
    let db = session();
    let err = run_err_with(&db, "MATCH (n:Nope) RETURN n");
    assert!(err.contains("Physical node not found for label Nope"));

    seed_people(&db, "EdgeLess", 1);
    let err = run_err_with(&db, "MATCH (a:EdgeLess)-[:NOPE]->(b:EdgeLess) RETURN a");
    assert!(err.contains("Physical relationship not found for type NOPE"));
}

#[test]
fn test_redefining_label_replaces_data() {
    let db = session();
    seed_people(&db, "Replaced", 1);
    assert_eq!(run_with(&db, "MATCH (n:Replaced) RETURN n.id AS id").len(), 1);
    seed_people(&db, "Replaced", 3);
    assert_eq!(run_with(&db, "MATCH (n:Replaced) RETURN n.id AS id").len(), 3);
}

#[test]
fn test_delete_removes_handles() {
    let db = session();
    seed_people(&db, "Doomed", 1);
    seed_edges(&db, "Doomed", "DOOMED_REL", "Doomed", &[(1, 1)]);

    run_with(&db, "DELETE (:Doomed)");
    let err = run_err_with(&db, "MATCH (n:Doomed) RETURN n");
    assert!(err.contains("Physical node not found"));

    run_with(&db, "DELETE [:DOOMED_REL]");
    seed_people(&db, "Doomed", 1);
    let err = run_err_with(&db, "MATCH (a:Doomed)-[:DOOMED_REL]->(b:Doomed) RETURN a");
    assert!(err.contains("Physical relationship not found"));
}

#[test]
fn test_delete_bare_name_prefers_labels() {
    let db = session();
    seed_people(&db, "BareName", 1);
    run_with(&db, "DELETE BareName");
    let err = run_err_with(&db, "MATCH (n:BareName) RETURN n");
    assert!(err.contains("Physical node not found"));
}

#[test]
fn test_reserved_keywords_as_labels_and_types() {
    let db = session();
    run_with(
        &db,
        "CREATE VIRTUAL (:Return) AS { unwind [{id: 1, name: 'Node 1'}, {id: 2, name: 'Node 2'}] as r \
         RETURN r.id as id, r.name as name }",
    );
    seed_edges(&db, "Return", "With", "Return", &[(1, 2)]);
    let results = run_with(
        &db,
        "MATCH (a:Return)-[:With]->(b:Return) RETURN a.name AS name1, b.name AS name2",
    );
    assert_eq!(
        results,
        vec![rec(&[
            ("name1", Value::from("Node 1")),
            ("name2", Value::from("Node 2")),
        ])]
    );
}

#[test]
fn test_schema_lists_nodes_and_relationships() {
    let db = session();
    run_with(
        &db,
        "CREATE VIRTUAL (:Animal) AS { unwind [ \
            {id: 1, species: 'Cat', legs: 4}, {id: 2, species: 'Dog', legs: 4}] as record \
         RETURN record.id as id, record.species as species, record.legs as legs }",
    );
    run_with(
        &db,
        "CREATE VIRTUAL (:Animal)-[:CHASES]-(:Animal) AS { unwind [ \
            {left_id: 2, right_id: 1, speed: 'fast'}] as record \
         RETURN record.left_id as left_id, record.right_id as right_id, record.speed as speed }",
    );

    let results = run_with(
        &db,
        "CALL schema() YIELD kind, label, type, from_label, to_label, properties, sample \
         RETURN kind, label, type, from_label, to_label, properties, sample",
    );
    assert_eq!(results.len(), 2);

    let animal = results
        .iter()
        .find(|r| r["kind"] == Value::from("Node"))
        .expect("node entry");
    assert_eq!(animal["label"], Value::from("Animal"));
    assert_eq!(
        animal["properties"],
        Value::List(vec![Value::from("species"), Value::from("legs")])
    );
    match &animal["sample"] {
        Value::Map(sample) => {
            assert!(!sample.contains_key("id"));
            assert!(sample.contains_key("species"));
        }
        other => panic!("expected sample map, got {other:?}"),
    }

    let chases = results
        .iter()
        .find(|r| r["kind"] == Value::from("Relationship"))
        .expect("relationship entry");
    assert_eq!(chases["type"], Value::from("CHASES"));
    assert_eq!(chases["from_label"], Value::from("Animal"));
    assert_eq!(chases["to_label"], Value::from("Animal"));
    assert_eq!(chases["properties"], Value::List(vec![Value::from("speed")]));
    match &chases["sample"] {
        Value::Map(sample) => {
            assert!(!sample.contains_key("left_id"));
            assert!(!sample.contains_key("right_id"));
        }
        other => panic!("expected sample map, got {other:?}"),
    }
}

#[test]
fn test_properties_function_on_matched_node() {
    let db = session();
    run_with(
        &db,
        "CREATE VIRTUAL (:PropAnimal) AS { unwind [ \
            {id: 1, name: 'Dog', legs: 4}, {id: 2, name: 'Cat', legs: 4}] as record \
         RETURN record.id as id, record.name as name, record.legs as legs }",
    );
    let results = run_with(&db, "MATCH (a:PropAnimal) RETURN properties(a) AS props");
    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0]["props"],
        Value::Map(rec(&[("name", Value::from("Dog")), ("legs", Value::Int(4))]))
    );
}

#[test]
fn test_id_function_on_matched_elements() {
    let db = session();
    seed_people(&db, "IdPerson", 2);
    seed_edges(&db, "IdPerson", "KNOWS", "IdPerson", &[(1, 2)]);
    let results = run_with(
        &db,
        "MATCH (a:IdPerson)-[r:KNOWS]->(b:IdPerson) \
         RETURN id(a) AS node_id, id(r) AS rel_id, elementId(b) AS elem_id",
    );
    assert_eq!(
        results,
        vec![rec(&[
            ("node_id", Value::Int(1)),
            ("rel_id", Value::from("KNOWS")),
            ("elem_id", Value::Int(2)),
        ])]
    );
}

#[test]
fn test_virtual_graph_from_union_subquery() {
    let db = session();
    run_with(
        &db,
        "CREATE VIRTUAL (:UnionNode) AS { \
            with 1 as id return id \
            UNION \
            with 2 as id return id \
         }",
    );
    let results = run_with(&db, "MATCH (n:UnionNode) RETURN n.id AS id");
    assert_eq!(results.len(), 2);
}

#[test]
fn test_multiple_relationship_types() {
    let db = session();
    seed_people(&db, "MultiRel", 3);
    seed_edges(&db, "MultiRel", "LIKES", "MultiRel", &[(1, 2)]);
    seed_edges(&db, "MultiRel", "LOVES", "MultiRel", &[(1, 3)]);
    let results = run_with(
        &db,
        "MATCH (a:MultiRel)-[:LIKES|LOVES]->(b:MultiRel) RETURN b.id AS b",
    );
    assert_eq!(
        results,
        vec![
            rec(&[("b", Value::Int(2))]),
            rec(&[("b", Value::Int(3))]),
        ]
    );
}
