//! Lineage demo runner
//!
//! Run with: `cargo run --bin lineage -- <local|cloud|analyze|generate>`
//!
//! The compile target for `generate` is picked with `LINEAGE_BACKEND`
//! (local, aws, dataproc, kubernetes).

use lineage::{
    init_tracing, AwsBackend, Compiler, DataprocBackend, Dataset, EngineConfig, ExecutionResource, Executor,
    KubernetesBackend, LineageError, LocalBackend, MemoryStorage, Monitoring, Outcome, Pipeline, RunContext,
    Schedule, StorageConfig, StorageNode, Task, TaskError,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct Demo {
    orders: StorageNode,
    customers: StorageNode,
    pipeline: Pipeline,
}

fn enrich(inputs: &lineage::TaskInputs) -> Result<Dataset, TaskError> {
    let orders = inputs.require("orders")?;
    let customers = inputs.require("customers")?;

    let mut region_of: HashMap<String, Value> = HashMap::new();
    for row in 0..customers.len() {
        if let (Some(id), Some(region)) = (customers.value(row, "customer_id"), customers.value(row, "region")) {
            region_of.insert(id.to_string(), region.clone());
        }
    }

    let mut out = Dataset::new(["order_id", "day", "amount", "region"]);
    for row in 0..orders.len() {
        let customer = orders
            .value(row, "customer_id")
            .ok_or("orders row without customer_id")?;
        out.push_row(vec![
            orders.value(row, "order_id").cloned().unwrap_or(Value::Null),
            orders.value(row, "day").cloned().unwrap_or(Value::Null),
            orders.value(row, "amount").cloned().unwrap_or(Value::Null),
            region_of.get(&customer.to_string()).cloned().unwrap_or(Value::Null),
        ]);
    }
    Ok(out)
}

fn daily_revenue(inputs: &lineage::TaskInputs) -> Result<Dataset, TaskError> {
    let enriched = inputs.require("enriched")?;
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for row in 0..enriched.len() {
        let day = enriched
            .value(row, "day")
            .and_then(Value::as_str)
            .ok_or("enriched row without day")?;
        let amount = enriched.value(row, "amount").and_then(Value::as_f64).unwrap_or(0.0);
        *totals.entry(day.to_string()).or_default() += amount;
    }

    let mut out = Dataset::new(["day", "revenue"]);
    for (day, revenue) in totals {
        out.push_row(vec![json!(day), json!(revenue)]);
    }
    Ok(out)
}

fn demo() -> Result<Demo, LineageError> {
    let orders = StorageNode::new("orders", "s3://lake/raw/orders")
        .with_name("Orders", "Raw order events")
        .with_storage(StorageConfig::object_store().with_retention_days(90));
    let customers = StorageNode::new("customers", "s3://lake/raw/customers")
        .with_storage(StorageConfig::object_store());

    let enrich_task = Task::new("enrich_orders", ["orders", "customers"], enrich).on(
        ExecutionResource::serverless("enrich-fn")
            .with_memory_mb(2048)
            .with_expected_duration_secs(45),
    );
    let enriched = StorageNode::join([("orders", orders.clone()), ("customers", customers.clone())])?
        .transform(&enrich_task)?
        .to(&StorageNode::new("enriched_orders", "s3://lake/curated/enriched_orders")
            .with_storage(StorageConfig::object_store().versioned()))?;

    let revenue_task = Task::new("daily_revenue", ["enriched"], daily_revenue)
        .on(ExecutionResource::distributed("spark", 4).with_expected_duration_secs(300))
        .with_schedule(Schedule::cron("0 3 * * *"))
        .with_monitoring(Monitoring::on_failure().with_max_duration_secs(1800).notify("data-oncall"));
    let revenue = enriched
        .transform(&revenue_task)?
        .to(&StorageNode::new("daily_revenue", "s3://lake/marts/daily_revenue")
            .with_storage(StorageConfig::table()))?;

    Ok(Demo {
        orders,
        customers,
        pipeline: Pipeline::new(revenue),
    })
}

fn seed(storage: &MemoryStorage, demo: &Demo) {
    storage.insert(
        &demo.orders,
        Dataset::with_rows(
            ["order_id", "customer_id", "day", "amount"],
            vec![
                vec![json!(1), json!(10), json!("2024-03-01"), json!(25.0)],
                vec![json!(2), json!(11), json!("2024-03-01"), json!(12.5)],
                vec![json!(3), json!(10), json!("2024-03-02"), json!(40.0)],
            ],
        ),
    );
    storage.insert(
        &demo.customers,
        Dataset::with_rows(
            ["customer_id", "region"],
            vec![vec![json!(10), json!("emea")], vec![json!(11), json!("apac")]],
        ),
    );
}

fn compiler(backend: &str, config: &EngineConfig) -> Result<Compiler, LineageError> {
    let compiler = match backend {
        "local" => Compiler::new(LocalBackend::new(&config.storage_root)),
        "aws" => Compiler::new(AwsBackend::new(config.region.clone())),
        "dataproc" => Compiler::new(DataprocBackend::new("lineage-demo", config.region.clone())),
        "kubernetes" => Compiler::new(KubernetesBackend::default()),
        other => {
            return Err(LineageError::Config(format!(
                "LINEAGE_BACKEND must be one of local, aws, dataproc, kubernetes; got '{}'",
                other
            )))
        }
    };
    Ok(compiler)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;
    init_tracing(&config.log_filter);

    let mode = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LINEAGE_MODE").ok())
        .unwrap_or_else(|| "analyze".to_string());
    let backend = std::env::var("LINEAGE_BACKEND").unwrap_or_else(|_| "dataproc".to_string());

    let demo = demo()?;
    let storage = Arc::new(MemoryStorage::new());
    seed(&storage, &demo);

    let mut compiler = compiler(&backend, &config)?;
    compiler.customize_storage(&demo.orders, |r| r.set("owner", "ingest-team"));
    let ctx = RunContext::new(Executor::from_config(&config, storage), compiler);

    println!("🚀 Lineage demo");
    println!("   Mode: {}", mode);
    println!("   Backend: {}", backend);
    println!("   Workers: {}", config.max_workers);
    println!();

    match demo.pipeline.dispatch(&mode, &ctx).await? {
        Outcome::Analyzed(report) => {
            println!("{}", report);
            println!();
            println!("{}", report.visualization);
        }
        Outcome::Generated(resources) => println!("{}", resources.to_json()?),
        Outcome::Executed(report) => {
            println!(
                "Run {} finished {} steps in {} ms",
                report.run_id,
                report.completed.len(),
                report.elapsed().num_milliseconds()
            );
            for id in &report.materialized {
                println!("   wrote {}", id);
            }
            for terminal in demo.pipeline.terminals() {
                if let Some(data) = report.output(terminal.id()) {
                    println!("{}", serde_json::to_string_pretty(data)?);
                }
            }
        }
    }

    Ok(())
}
