use hailmary_fuzzer::error::Result;
use hailmary_fuzzer::{
    diagnostics, provision_all, run_engines, stats, ActionStats, EngineContext, EngineSettings,
    FuzzConfig, WorkQueues,
};
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "multi_thread", worker_threads = 10)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("Fatal ({:?}): {}", e.kind(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = FuzzConfig::from_env()?;
    let cancel = CancellationToken::new();
    let stats = Arc::new(ActionStats::new());

    if let Some(address) = &config.diagnostic_address {
        let listener = diagnostics::bind(address).await?;
        tokio::spawn(diagnostics::serve(listener, stats.clone(), cancel.clone()));
    }

    let nodes = Arc::new(provision_all(&config).await?);
    info!("Provisioned {} nodes", nodes.len());

    let ctx = EngineContext::new(
        WorkQueues::new(config.queue_capacity),
        stats.clone(),
        EngineSettings {
            call_timeout: config.call_timeout,
            queue_wait: config.queue_wait,
        },
        cancel.clone(),
    );

    tokio::spawn(stats::report(
        stats.clone(),
        config.stats_interval,
        cancel.clone(),
    ));

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping engines");
            interrupt.cancel();
        }
    });

    let outcome = run_engines(nodes.clone(), config.connections, ctx).await;

    cancel.cancel();
    for node in nodes.iter() {
        node.dht.shutdown();
    }
    stats::log_summary(&stats.snapshot());
    outcome
}
