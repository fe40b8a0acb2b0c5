//! ORDER BY sorting (stability, multi-key, expression keys) and LIMIT
//! gating.

use flowquery::{Record, Runner, Value};

fn run(query: &str) -> Vec<Record> {
    let mut runner = Runner::new(query).expect("statement should parse");
    runner.run().expect("statement should run");
    runner.results().to_vec()
}

fn rec(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn column(results: &[Record], name: &str) -> Vec<Value> {
    results.iter().map(|r| r[name].clone()).collect()
}

#[test]
fn test_order_by_ascending_default() {
    let results = run("unwind [3, 1, 2] as x return x order by x");
    assert_eq!(
        column(&results, "x"),
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    );
}

#[test]
fn test_order_by_descending() {
    let results = run("unwind [3, 1, 2] as x return x order by x desc");
    assert_eq!(
        column(&results, "x"),
        vec![Value::Int(3), Value::Int(2), Value::Int(1)]
    );
}

#[test]
fn test_order_by_explicit_ascending() {
    let results = run("unwind [3, 1, 2] as x return x order by x asc");
    assert_eq!(
        column(&results, "x"),
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    );
}

#[test]
fn test_order_by_multiple_fields() {
    let results = run(
        "unwind [{name: 'Alice', age: 30}, {name: 'Bob', age: 25}, {name: 'Alice', age: 25}] as p \
         return p.name as name, p.age as age order by name asc, age asc",
    );
    assert_eq!(
        results,
        vec![
            rec(&[("name", Value::from("Alice")), ("age", Value::Int(25))]),
            rec(&[("name", Value::from("Alice")), ("age", Value::Int(30))]),
            rec(&[("name", Value::from("Bob")), ("age", Value::Int(25))]),
        ]
    );
}

#[test]
fn test_order_by_strings() {
    let results = run("unwind ['banana', 'apple', 'cherry'] as fruit return fruit order by fruit");
    assert_eq!(
        column(&results, "fruit"),
        vec![
            Value::from("apple"),
            Value::from("banana"),
            Value::from("cherry")
        ]
    );
}

#[test]
fn test_order_by_is_stable() {
    // Records with equal sort keys keep their input order.
    let results = run(
        "unwind [{k: 1, tag: 'first'}, {k: 1, tag: 'second'}, {k: 0, tag: 'third'}] as r \
         return r.k as k, r.tag as tag order by k",
    );
    assert_eq!(
        column(&results, "tag"),
        vec![
            Value::from("third"),
            Value::from("first"),
            Value::from("second")
        ]
    );
}

#[test]
fn test_order_by_expression_key() {
    let results = run(
        "unwind ['Banana', 'apple', 'Cherry'] as fruit return fruit order by toLower(fruit)",
    );
    assert_eq!(
        column(&results, "fruit"),
        vec![
            Value::from("apple"),
            Value::from("Banana"),
            Value::from("Cherry")
        ]
    );
}

#[test]
fn test_order_by_nulls_first() {
    let results = run(
        "unwind [{v: 2}, {}, {v: 1}] as r return r.v as v order by v",
    );
    assert_eq!(
        column(&results, "v"),
        vec![Value::Null, Value::Int(1), Value::Int(2)]
    );
}

#[test]
fn test_order_by_with_aggregated_return() {
    let results = run("unwind [1, 1, 2, 2, 3, 3] as x return x, count(x) as cnt order by x desc");
    assert_eq!(
        results,
        vec![
            rec(&[("x", Value::Int(3)), ("cnt", Value::Int(2))]),
            rec(&[("x", Value::Int(2)), ("cnt", Value::Int(2))]),
            rec(&[("x", Value::Int(1)), ("cnt", Value::Int(2))]),
        ]
    );
}

#[test]
fn test_order_by_with_limit() {
    let results = run("unwind [3, 1, 4, 1, 5, 9, 2, 6] as x return x order by x limit 3");
    assert_eq!(
        column(&results, "x"),
        vec![Value::Int(1), Value::Int(1), Value::Int(2)]
    );
}

#[test]
fn test_order_by_with_where() {
    let results = run("unwind [3, 1, 4, 1, 5, 9, 2, 6] as x return x where x > 2 order by x desc");
    assert_eq!(
        column(&results, "x"),
        vec![
            Value::Int(9),
            Value::Int(6),
            Value::Int(5),
            Value::Int(4),
            Value::Int(3)
        ]
    );
}

#[test]
fn test_return_limit() {
    let results = run("unwind range(1, 10) as i return i limit 5");
    assert_eq!(results.len(), 5);
    assert_eq!(results[4], rec(&[("i", Value::Int(5))]));
}

#[test]
fn test_standalone_limit_gates_downstream_emissions() {
    // LIMIT is a gate on everything downstream of itself.
    let results = run("unwind range(1, 10) as i unwind range(1, 10) as j limit 5 return j");
    assert_eq!(results.len(), 5);
}

#[test]
fn test_limit_zero() {
    let results = run("unwind range(1, 10) as i return i limit 0");
    assert!(results.is_empty());
}

#[test]
fn test_limit_larger_than_input() {
    let results = run("unwind range(1, 3) as i return i limit 100");
    assert_eq!(results.len(), 3);
}

#[test]
fn test_limit_with_aggregated_groups() {
    let results = run("unwind [1, 1, 2, 2, 3] as i return i, count(i) as cnt limit 2");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["i"], Value::Int(1));
    assert_eq!(results[1]["i"], Value::Int(2));
}
