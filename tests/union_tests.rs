//! UNION / UNION ALL combination semantics.

use flowquery::{Record, Runner, Value};

fn run(query: &str) -> Vec<Record> {
    let mut runner = Runner::new(query).expect("statement should parse");
    runner.run().expect("statement should run");
    runner.results().to_vec()
}

fn run_err(query: &str) -> String {
    match Runner::new(query) {
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

#[test]
fn test_union_deduplicates() {
    let results = run("WITH 1 AS x RETURN x UNION WITH 1 AS x RETURN x");
    assert_eq!(results, vec![rec(&[("x", Value::Int(1))])]);
}

#[test]
fn test_union_all_keeps_duplicates() {
    let results = run("WITH 1 AS x RETURN x UNION ALL WITH 1 AS x RETURN x");
    assert_eq!(
        results,
        vec![rec(&[("x", Value::Int(1))]), rec(&[("x", Value::Int(1))])]
    );
}

#[test]
fn test_union_combines_distinct_rows() {
    let results = run("WITH 1 AS x RETURN x UNION WITH 2 AS x RETURN x");
    assert_eq!(
        results,
        vec![rec(&[("x", Value::Int(1))]), rec(&[("x", Value::Int(2))])]
    );
}

#[test]
fn test_union_with_multiple_columns() {
    let results = run(
        "WITH 1 AS a, 2 AS b RETURN a, b UNION WITH 1 AS a, 2 AS b RETURN a, b \
         UNION WITH 3 AS a, 4 AS b RETURN a, b",
    );
    assert_eq!(results.len(), 2);
    assert_eq!(
        results[1],
        rec(&[("a", Value::Int(3)), ("b", Value::Int(4))])
    );
}

#[test]
fn test_union_cardinality() {
    // UNION yields |unique(L ∪ R)| rows, UNION ALL yields |L| + |R|.
    let unique = run("unwind [1, 2] as x return x UNION unwind [2, 3] as x return x");
    assert_eq!(unique.len(), 3);
    let all = run("unwind [1, 2] as x return x UNION ALL unwind [2, 3] as x return x");
    assert_eq!(all.len(), 4);
}

#[test]
fn test_union_preserves_left_then_right_order() {
    let results = run("unwind [2, 1] as x return x UNION ALL unwind [4, 3] as x return x");
    let order: Vec<&Value> = results.iter().map(|r| &r["x"]).collect();
    assert_eq!(
        order,
        vec![&Value::Int(2), &Value::Int(1), &Value::Int(4), &Value::Int(3)]
    );
}

#[test]
fn test_union_mismatched_columns_fails() {
    let err = run_err("WITH 1 AS x RETURN x UNION WITH 1 AS y RETURN y");
    assert!(err.contains("All sub queries in a UNION must have the same return column names"));
}

#[test]
fn test_union_with_empty_sides() {
    let results = run("unwind [] as x return x UNION unwind [1] as x return x");
    assert_eq!(results, vec![rec(&[("x", Value::Int(1))])]);
    let results = run("unwind [1] as x return x UNION unwind [] as x return x");
    assert_eq!(results, vec![rec(&[("x", Value::Int(1))])]);
}

#[test]
fn test_union_sides_have_independent_scopes() {
    // `x` on the right is a fresh binding; names do not leak across UNION.
    let results = run("WITH 1 AS x RETURN x UNION WITH 5 AS x RETURN x");
    assert_eq!(results.len(), 2);
}
