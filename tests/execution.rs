use lineage::{
    ComputeEngine, Dataset, ExecutionMode, ExecutionResource, Executor, FsStorage, LineageError, LineageGraph,
    MemoryStorage, ResourceKind, SqliteStorage, Storage, StorageId, StorageNode, Task, TaskError, TaskInputs, TraceKind,
    TransformStep,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn scale(name: &str, factor: i64) -> Task {
    Task::new(name, ["src"], move |inputs| {
        let src = inputs.require("src")?;
        let mut out = Dataset::new(["v"]);
        for v in src.column("v") {
            let v = v.as_i64().ok_or("v must be an integer")?;
            out.push_row(vec![json!(v * factor)]);
        }
        Ok(out)
    })
}

fn seed_values(storage: &dyn Storage, node: &StorageNode) {
    storage
        .write(node, &Dataset::with_rows(["v"], vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]))
        .unwrap();
}

/// Stands in for a cluster submitter; counts invocations.
struct CountingEngine {
    calls: AtomicUsize,
}

impl ComputeEngine for CountingEngine {
    fn name(&self) -> &str {
        "cluster"
    }

    fn run(&self, step: &TransformStep, inputs: &TaskInputs) -> Result<Dataset, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        step.task().call(inputs)
    }
}

#[tokio::test]
async fn cross_engine_output_is_written_before_consumer_starts() {
    let storage = Arc::new(MemoryStorage::new());
    let raw = StorageNode::new("raw", "mem://raw");
    seed_values(storage.as_ref(), &raw);

    let step1_out = raw
        .transform(&scale("step1", 2).on(ExecutionResource::local("laptop")))
        .unwrap()
        .to(&StorageNode::new("doubled", "mem://doubled"))
        .unwrap();
    let step2_out = step1_out
        .transform(&scale("step2", 10).on(ExecutionResource::distributed("spark", 2)))
        .unwrap()
        .to(&StorageNode::new("scaled", "mem://scaled"))
        .unwrap();
    let graph = LineageGraph::build(&step2_out).unwrap();
    let step1 = graph.producer_of(step1_out.id()).unwrap().id();
    let step2 = graph.producer_of(step2_out.id()).unwrap().id();

    for mode in [ExecutionMode::Local, ExecutionMode::Cloud] {
        let report = Executor::new(storage.clone()).run(&graph, mode).await.unwrap();

        let written = report.materialized_position(step1_out.id()).unwrap();
        let started = report.event_position(TraceKind::StepStarted, step2).unwrap();
        assert!(written < started, "{mode}: doubled must be written before step2 starts");
        assert!(report.event_position(TraceKind::StepFinished, step1).unwrap() < started);

        let out = report.output(step2_out.id()).unwrap();
        assert_eq!(out.column("v").cloned().collect::<Vec<_>>(), vec![json!(20), json!(40), json!(60)]);
    }
}

#[tokio::test]
async fn cloud_mode_dispatches_by_resource_kind() {
    let storage = Arc::new(MemoryStorage::new());
    let raw = StorageNode::new("raw", "mem://raw");
    seed_values(storage.as_ref(), &raw);

    let out = raw
        .transform(&scale("local_step", 1))
        .unwrap()
        .to(&StorageNode::new("a", "mem://a"))
        .unwrap()
        .transform(&scale("cluster_step", 3).on(ExecutionResource::distributed("spark", 2)))
        .unwrap()
        .to(&StorageNode::new("b", "mem://b"))
        .unwrap();
    let graph = LineageGraph::build(&out).unwrap();

    let engine = Arc::new(CountingEngine {
        calls: AtomicUsize::new(0),
    });
    let executor = Executor::new(storage).with_engine(ResourceKind::Distributed, engine.clone());

    let report = executor.run(&graph, ExecutionMode::Local).await.unwrap();
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    assert!(report.completed.iter().all(|c| c.engine == "in-process"));

    let report = executor.run(&graph, ExecutionMode::Cloud).await.unwrap();
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    let engines: Vec<&str> = report.completed.iter().map(|c| c.engine.as_str()).collect();
    assert_eq!(engines, vec!["in-process", "cluster"]);
}

#[tokio::test]
async fn filesystem_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FsStorage::new(dir.path()));
    let raw = StorageNode::new("raw", "lake/raw");
    seed_values(storage.as_ref(), &raw);

    let out = raw
        .transform(&scale("triple", 3).on(ExecutionResource::serverless("fn")))
        .unwrap()
        .to(&StorageNode::new("tripled", "lake/tripled"))
        .unwrap();
    let graph = LineageGraph::build(&out).unwrap();

    let report = Executor::new(storage.clone())
        .run(&graph, ExecutionMode::Local)
        .await
        .unwrap();
    assert!(report.was_materialized(out.id()));
    assert!(dir.path().join("lake/tripled.csv").is_file());

    let persisted = storage.read(&out).unwrap();
    assert_eq!(persisted.column("v").cloned().collect::<Vec<_>>(), vec![json!(3), json!(6), json!(9)]);
}

#[tokio::test]
async fn sqlite_storage_records_write_time() {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let raw = StorageNode::new("raw", "db://raw");
    seed_values(storage.as_ref(), &raw);

    let out = raw
        .transform(&scale("negate", -1))
        .unwrap()
        .to(&StorageNode::new("negated", "db://negated"))
        .unwrap();
    let graph = LineageGraph::build(&out).unwrap();
    Executor::new(storage.clone())
        .run(&graph, ExecutionMode::Local)
        .await
        .unwrap();

    assert!(storage.written_at(&out).unwrap().is_some());
    assert_eq!(storage.read(&out).unwrap().len(), 3);
}

#[tokio::test]
async fn earliest_failure_is_reported_and_independent_outputs_survive() {
    let storage = Arc::new(MemoryStorage::new());
    let raw = StorageNode::new("raw", "mem://raw");
    seed_values(storage.as_ref(), &raw);

    let ok = raw
        .transform(&scale("fine", 1))
        .unwrap()
        .to(&StorageNode::new("fine", "mem://fine"))
        .unwrap();
    let broken = raw
        .transform(&Task::new("broken", ["src"], |_| -> Result<Dataset, TaskError> {
            Err("upstream schema changed".into())
        }))
        .unwrap()
        .to(&StorageNode::new("broken", "mem://broken"))
        .unwrap();
    let graph = LineageGraph::build_all(&[ok.clone(), broken]).unwrap();

    let err = Executor::new(storage.clone())
        .with_max_workers(1)
        .run(&graph, ExecutionMode::Local)
        .await
        .unwrap_err();
    match err {
        LineageError::Execution { task, .. } => assert_eq!(task, "broken"),
        other => panic!("unexpected error: {other}"),
    }
    // "fine" was declared first and ran to completion as a sink
    assert_eq!(storage.write_count(ok.id()), 1);
}

fn identity(name: &str) -> Task {
    Task::new(name, ["src"], |inputs| Ok(inputs.require("src")?.clone()))
}

#[tokio::test]
async fn boundary_materialization_does_not_change_values() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FsStorage::new(dir.path()));
    let raw = StorageNode::new("codes", "lake/codes");
    let original = Dataset::with_rows(
        ["code", "qty"],
        vec![
            vec![json!("01234"), json!(1)],
            vec![json!("true"), serde_json::Value::Null],
            vec![json!(""), json!(2.5)],
        ],
    );
    storage.write(&raw, &original).unwrap();

    let pipeline = |suffix: &str, downstream: ExecutionResource| {
        raw.transform(&identity("copy"))
            .unwrap()
            .to(&StorageNode::new(format!("mid_{suffix}"), format!("lake/mid_{suffix}")))
            .unwrap()
            .transform(&identity("pass").on(downstream))
            .unwrap()
            .to(&StorageNode::new(format!("out_{suffix}"), format!("lake/out_{suffix}")))
            .unwrap()
    };
    let same = pipeline("same", ExecutionResource::local("laptop"));
    let crossed = pipeline("crossed", ExecutionResource::serverless("fn"));

    let executor = Executor::new(storage.clone());
    let same_report = executor
        .run(&LineageGraph::build(&same).unwrap(), ExecutionMode::Local)
        .await
        .unwrap();
    let crossed_report = executor
        .run(&LineageGraph::build(&crossed).unwrap(), ExecutionMode::Local)
        .await
        .unwrap();

    // only the second pipeline hands off through storage
    assert!(!same_report.was_materialized(&StorageId::new("mid_same", "lake/mid_same")));
    assert!(crossed_report.was_materialized(&StorageId::new("mid_crossed", "lake/mid_crossed")));

    assert_eq!(same_report.output(same.id()), Some(&original));
    assert_eq!(crossed_report.output(crossed.id()), Some(&original));
    assert_eq!(storage.read(&crossed).unwrap(), original);
}

/// Tracks how many task bodies are running at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

fn gauged(name: &str, gauge: Arc<Gauge>, barrier: Option<Arc<Barrier>>) -> Task {
    Task::new(name, ["src"], move |inputs| {
        gauge.enter();
        match &barrier {
            Some(barrier) => {
                barrier.wait();
            }
            None => std::thread::sleep(Duration::from_millis(20)),
        }
        gauge.exit();
        Ok(inputs.require("src")?.clone())
    })
}

#[tokio::test]
async fn independent_steps_run_together_within_the_worker_bound() {
    let storage = Arc::new(MemoryStorage::new());
    let raw = StorageNode::new("raw", "mem://raw");
    seed_values(storage.as_ref(), &raw);

    let gauge = Arc::new(Gauge::default());
    // both halves of the barrier must be in flight at once or the run hangs
    let barrier = Arc::new(Barrier::new(2));
    let tasks = [
        gauged("left", gauge.clone(), Some(barrier.clone())),
        gauged("right", gauge.clone(), Some(barrier)),
        gauged("third", gauge.clone(), None),
        gauged("fourth", gauge.clone(), None),
    ];
    let sinks: Vec<StorageNode> = tasks
        .iter()
        .map(|task| {
            let name = task.name().to_string();
            raw.transform(task)
                .unwrap()
                .to(&StorageNode::new(name.clone(), format!("mem://{name}")))
                .unwrap()
        })
        .collect();
    let graph = LineageGraph::build_all(&sinks).unwrap();

    let report = Executor::new(storage.clone())
        .with_max_workers(2)
        .run(&graph, ExecutionMode::Local)
        .await
        .unwrap();

    assert_eq!(report.completed.len(), 4);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    for sink in &sinks {
        assert_eq!(storage.write_count(sink.id()), 1);
    }
}

#[tokio::test]
async fn cancelling_mid_run_lets_in_flight_steps_finish() {
    let storage = Arc::new(MemoryStorage::new());
    let raw = StorageNode::new("raw", "mem://raw");
    seed_values(storage.as_ref(), &raw);

    let token = CancellationToken::new();
    let barrier = Arc::new(Barrier::new(2));
    let downstream_ran = Arc::new(AtomicBool::new(false));

    let trigger = {
        let token = token.clone();
        let barrier = barrier.clone();
        Task::new("trigger", ["src"], move |inputs| {
            barrier.wait();
            token.cancel();
            Ok(inputs.require("src")?.clone())
        })
    };
    let slow = {
        let barrier = barrier.clone();
        Task::new("slow", ["src"], move |inputs| {
            barrier.wait();
            std::thread::sleep(Duration::from_millis(50));
            Ok(inputs.require("src")?.clone())
        })
    };
    let after = {
        let ran = downstream_ran.clone();
        Task::new("after", ["src"], move |inputs| {
            ran.store(true, Ordering::SeqCst);
            Ok(inputs.require("src")?.clone())
        })
    };

    let triggered = raw
        .transform(&trigger)
        .unwrap()
        .to(&StorageNode::new("triggered", "mem://triggered"))
        .unwrap();
    let slow_out = raw
        .transform(&slow)
        .unwrap()
        .to(&StorageNode::new("slow_out", "mem://slow_out"))
        .unwrap();
    let last = triggered
        .transform(&after)
        .unwrap()
        .to(&StorageNode::new("last", "mem://last"))
        .unwrap();
    let graph = LineageGraph::build_all(&[last.clone(), slow_out.clone()]).unwrap();

    let err = Executor::new(storage.clone())
        .with_max_workers(2)
        .with_cancellation(token)
        .run(&graph, ExecutionMode::Local)
        .await
        .unwrap_err();

    match err {
        LineageError::Cancelled { completed } => {
            assert_eq!(completed.len(), 2);
            assert!(completed.contains(&"trigger -> triggered".to_string()));
            assert!(completed.contains(&"slow -> slow_out".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    // the slow step was already running and still wrote its sink
    assert_eq!(storage.write_count(slow_out.id()), 1);
    assert!(!downstream_ran.load(Ordering::SeqCst));
    assert_eq!(storage.write_count(last.id()), 0);
}
