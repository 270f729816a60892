use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use trading_agents::agents::default_pipeline;
use trading_agents::core::{Config, Error, MarketFeed};
use trading_agents::execution::{BrokerHandoff, PaperBroker};
use trading_agents::feeds::SampleFeed;
use trading_agents::pipeline::events::next_event;
use trading_agents::pipeline::{archive, Orchestrator, RunEvent, RunRequest, RunStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_default()?;

    // 1. Logger: RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},trading_agents={}", config.app.log_level, config.app.log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!("🦀 Trading Agents starting...");

    if !config.is_simulation() {
        return Err(Error::NotImplemented("live market data and order routing".into()).into());
    }

    let symbol = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.trading.symbol.clone());

    // 2. Collaborators
    let feed: Arc<dyn MarketFeed> = Arc::new(SampleFeed::new(config.app.sample_seed));
    let broker = Arc::new(PaperBroker::new());
    let pipeline = default_pipeline(&config, feed)?;
    tracing::info!(
        "📡 Feed ready, pipeline has {} stages, paper broker on {}",
        pipeline.len(),
        config.trading.exchange
    );

    let orchestrator = Orchestrator::new(pipeline, &config.orchestrator)
        .with_execution(Arc::new(BrokerHandoff::new(broker, config.trading.exchange.clone())));

    // 3. Status consumer
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut events).await {
            match &event {
                RunEvent::StageStarted { stage_name, workers, .. } => {
                    tracing::info!("▶ {} ({} workers)", stage_name, workers)
                }
                RunEvent::WorkerFailed { worker, message, .. } => {
                    tracing::warn!("⚠ {} failed: {}", worker, message)
                }
                RunEvent::StageCompleted { stage_name, elapsed_ms, degraded, .. } => {
                    tracing::info!("✔ {} in {}ms (degraded: {})", stage_name, elapsed_ms, degraded)
                }
                other => tracing::debug!("{:?}", other),
            }
            if event.is_terminal() {
                break;
            }
        }
    });

    // 4. Run one cycle, cancelling on Ctrl-C
    let handle = orchestrator.trigger(RunRequest::new(symbol))?;
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Cancelling run...");
            cancel.cancel();
        }
    });
    let report = handle.wait().await?;

    // 5. Summary
    let record = &report.record;
    println!("Run {} for {}: {}", report.run_id, record.symbol(), report.status);
    if let Some(decision) = record.full_view().portfolio_decision() {
        println!(
            "Decision: {} {} shares @ {:.2} (SL {:.2}, TP {:.2}, confidence {:.0}%)",
            decision.action,
            decision.quantity,
            decision.entry_price,
            decision.stop_loss,
            decision.take_profit,
            decision.confidence
        );
    }
    if let Some(execution) = record.full_view().execution_result() {
        println!("Execution: {:?} - {}", execution.status, execution.detail);
    }
    for error in record.errors() {
        println!("Error: {}", error);
    }

    if let Some(dir) = &config.app.data_dir {
        let path = archive::write_record(dir, record)?;
        tracing::info!("💾 Record archived to {}", path.display());
    }

    if let RunStatus::Halted { error, .. } = &report.status {
        tracing::error!("Run halted: {}", error);
        std::process::exit(1);
    }

    Ok(())
}
