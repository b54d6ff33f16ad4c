//! Parameter expansion and freeze determinism, exercised through the
//! public discover → freeze pipeline.

use canary::discover::discover;
use canary::graph::{freeze, FreezeOptions};
use canary::testfile::TomlParser;
use canary::{CaseGraph, ParamValue};

fn freeze_suite(files: &[(&str, &str)]) -> CaseGraph {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in files {
        std::fs::write(dir.path().join(name), body).unwrap();
    }
    let generators = discover(&[dir.path().to_path_buf()], &TomlParser).unwrap();
    freeze(&generators, &FreezeOptions::default()).unwrap()
}

#[test]
fn product_axes_expand_in_declared_order() {
    let graph = freeze_suite(&[(
        "prod.canary",
        r#"
        command = ["./run.sh"]

        [[parameterize]]
        names = "a"
        values = [1, 4]

        [[parameterize]]
        names = "b"
        values = [1e5, 1e6, 1e7]
        "#,
    )]);

    let names: Vec<&str> = graph.cases.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "prod.a=1.b=100000",
            "prod.a=1.b=1000000",
            "prod.a=1.b=10000000",
            "prod.a=4.b=100000",
            "prod.a=4.b=1000000",
            "prod.a=4.b=10000000",
        ]
    );
}

#[test]
fn centered_axis_produces_the_reference_nine_tuples() {
    let graph = freeze_suite(&[(
        "centered.canary",
        r#"
        command = ["./run.sh"]

        [[parameterize]]
        names = ["a", "b"]
        type = "centered"
        centers = [[0.0, 5.0, 2], [0.0, 1.0, 2]]
        "#,
    )]);

    let tuples: Vec<(i64, i64)> = graph
        .cases
        .iter()
        .map(|c| {
            (
                c.params.get("a").unwrap().as_i64().unwrap(),
                c.params.get("b").unwrap().as_i64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        tuples,
        vec![
            (0, 0),
            (-10, 0),
            (-5, 0),
            (5, 0),
            (10, 0),
            (0, -2),
            (0, -1),
            (0, 1),
            (0, 2),
        ]
    );
}

#[test]
fn two_freezes_of_the_same_input_are_identical() {
    let body = r#"
        command = ["./run.sh"]

        [[parameterize]]
        names = ["x", "y"]
        type = "random"
        ranges = [[0.0, 1.0], [5.0, 9.0]]
        samples = 7
        seed = 1234
        "#;
    let a = freeze_suite(&[("rand.canary", body)]);
    let b = freeze_suite(&[("rand.canary", body)]);

    assert_eq!(a.cases.len(), 7);
    let names_a: Vec<&str> = a.cases.iter().map(|c| c.name.as_str()).collect();
    let names_b: Vec<&str> = b.cases.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names_a, names_b);
    for (ca, cb) in a.cases.iter().zip(&b.cases) {
        assert_eq!(ca.params, cb.params);
        assert_eq!(ca.id, cb.id);
    }
}

#[test]
fn zipped_names_do_not_cross_product() {
    let graph = freeze_suite(&[(
        "zip.canary",
        r#"
        command = ["./run.sh"]

        [[parameterize]]
        names = ["np", "mesh"]
        values = [[1, "coarse"], [8, "fine"]]
        "#,
    )]);
    assert_eq!(graph.cases.len(), 2);
    assert_eq!(
        graph.cases[1].params.get("mesh"),
        Some(&ParamValue::from("fine"))
    );
}

#[test]
fn analyze_case_aggregates_in_expansion_order() {
    let graph = freeze_suite(&[(
        "agg.canary",
        r#"
        command = ["./run.sh"]
        analyze = true

        [[parameterize]]
        names = "np"
        values = [1, 4, 16]
        "#,
    )]);
    assert_eq!(graph.cases.len(), 4);
    let multi = graph.by_name("agg").unwrap();
    assert_eq!(
        multi.params.get_tuple("np"),
        Some(
            &[
                ParamValue::Int(1),
                ParamValue::Int(4),
                ParamValue::Int(16)
            ][..]
        )
    );
    assert_eq!(multi.dependencies.len(), 3);
}
