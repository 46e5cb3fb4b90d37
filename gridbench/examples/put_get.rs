use std::sync::Arc;

use gridbench::{
    Scenario,
    ack::{StatisticsAck, WorkerAck, merge_acks},
    config::StressTestConfig,
    conversation::BasicOperationConversation,
    operation::OperationRegistry,
    representation::RepresentationKind,
    service::InMemoryCache,
};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"{
    "num_threads": 4,
    "ramp_up_ms": 1000,
    "duration_ms": 5000,
    "num_keys": 10000,
    "operations": {
        "GET": { "invocations": 40, "interval": 1 },
        "PUT": { "invocations": 10, "interval": 1 },
        "REMOVE": { "invocations": 1, "interval": 10 }
    },
    "statistics": {
        "type": "periodic",
        "period": 1000,
        "operation_stats": { "type": "histogram" }
    }
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = StressTestConfig::from_json(CONFIG)?;
    let registry = OperationRegistry::new();
    // Pretend to be worker 0 of a single-node cluster
    let keys = config.key_range(0, 1)?;
    let cache = Arc::new(InMemoryCache::new());
    let selector = config.build_selector(&registry, BasicOperationConversation::factory(cache.clone(), keys))?;

    let mut prototype = config.prototype()?;
    prototype.register_operations_group("writes", &[registry.register("PUT"), registry.register("REMOVE")])?;

    let statistics = Scenario::builder()
        .name("put/get")
        .selector(selector)
        .statistics(prototype)
        .executor(config.executor())
        .build()
        .run()
        .await?;

    let acks: Vec<WorkerAck> = vec![StatisticsAck::new(0, statistics).into()];
    let merged = merge_acks(&acks)?;
    let Some(statistics) = merged.statistics else {
        return Err("no statistics".into());
    };

    println!("{} requests, {} keys in cache", statistics.request_count(), cache.len());
    for name in statistics.operations().iter().chain(merged.groups.keys()) {
        for kind in [
            RepresentationKind::DefaultOutcome,
            RepresentationKind::Percentile(99.0),
        ] {
            if let Some(representation) = statistics.representation(name, kind) {
                println!("{name} {kind:?}: {representation:?}");
            }
        }
    }
    Ok(())
}
