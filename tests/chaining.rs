use lineage::{
    Compiler, Dataset, EngineConfig, Executor, LineageError, LineageGraph, LocalBackend, MemoryStorage, Outcome,
    Pipeline, RunContext, StorageNode, Task,
};
use std::sync::Arc;

fn task(name: &str, params: &[&str]) -> Task {
    Task::new(name, params.iter().copied(), |_| Ok(Dataset::default()))
}

#[test]
fn join_keys_must_match_declared_parameters() {
    let a = StorageNode::new("a", "/a");
    let b = StorageNode::new("b", "/b");
    let join = StorageNode::join([("a", a.clone()), ("b", b.clone())]).unwrap();

    let out = join
        .transform(&task("merge", &["a", "b"]))
        .unwrap()
        .to(&StorageNode::new("ab", "/ab"))
        .unwrap();
    let step = out.lineage().unwrap();
    assert_eq!(step.input("a").unwrap().id(), a.id());
    assert_eq!(step.input("b").unwrap().id(), b.id());

    match join.transform(&task("merge", &["a", "c"])).unwrap_err() {
        LineageError::ParameterMismatch { task, missing, unexpected } => {
            assert_eq!(task, "merge");
            assert_eq!(missing, vec!["b"]);
            assert_eq!(unexpected, vec!["c"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn overwrite_replaces_the_producer() {
    let raw = StorageNode::new("raw", "/raw");
    let target = StorageNode::new("clean", "/clean");
    let produced = raw.transform(&task("v1", &["src"])).unwrap().to(&target).unwrap();

    let err = raw.transform(&task("v2", &["src"])).unwrap().to(&produced).unwrap_err();
    match err {
        LineageError::Overwrite { node, existing_task } => {
            assert_eq!(node, "clean@/clean");
            assert_eq!(existing_task, "v1");
        }
        other => panic!("unexpected error: {other}"),
    }

    let replaced = raw.transform(&task("v2", &["src"])).unwrap().overwrite(&produced).unwrap();
    let graph = LineageGraph::build(&replaced).unwrap();
    assert_eq!(graph.len(), 1);
    assert_eq!(graph.producer_of(replaced.id()).unwrap().task().name(), "v2");

    // chaining never mutates the original handle
    assert_eq!(produced.lineage().unwrap().task().name(), "v1");
    assert!(target.is_source());
}

#[test]
fn one_producer_per_location_across_handles() {
    let raw = StorageNode::new("raw", "/raw");
    let clean_node = StorageNode::new("clean", "/clean");
    let clean = raw.transform(&task("f", &["src"])).unwrap().to(&clean_node).unwrap();

    let err = raw.transform(&task("g", &["src"])).unwrap().to(&clean_node).unwrap_err();
    assert!(matches!(err, LineageError::Overwrite { .. }));

    // consumers declared before the override follow the new producer
    let agg = clean.transform(&task("h", &["src"])).unwrap().to(&StorageNode::new("agg", "/agg")).unwrap();
    let replaced = raw.transform(&task("g", &["src"])).unwrap().overwrite(&clean).unwrap();

    let order = |graph: &LineageGraph| -> Vec<String> {
        graph.steps().iter().map(|s| s.task().name().to_string()).collect()
    };
    assert_eq!(order(&LineageGraph::build(&agg).unwrap()), vec!["g", "h"]);
    assert_eq!(order(&LineageGraph::build_all(&[agg, replaced]).unwrap()), vec!["g", "h"]);
}

#[tokio::test]
async fn unknown_mode_is_rejected() {
    let out = StorageNode::new("raw", "/raw")
        .transform(&task("f", &["src"]))
        .unwrap()
        .to(&StorageNode::new("out", "/out"))
        .unwrap();
    let config = EngineConfig::default();
    let ctx = RunContext::new(
        Executor::from_config(&config, Arc::new(MemoryStorage::new())),
        Compiler::new(LocalBackend::new(&config.storage_root)),
    );
    let pipeline = Pipeline::new(out);

    let err = pipeline.dispatch("batch", &ctx).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "unsupported mode 'batch' (expected one of: local, cloud, analyze, generate)"
    );
    assert!(matches!(pipeline.dispatch("Analyze", &ctx).await.unwrap(), Outcome::Analyzed(_)));
}
