use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use target_monitor::config::Config;
use target_monitor::core::network_health::HttpProbe;
use target_monitor::core::retry::RetryPolicy;
use target_monitor::core::scheduler::SuspendFlag;
use target_monitor::core::trading_hours::TradingHours;
use target_monitor::feeds::{self, FeedHandle};
use target_monitor::models::NewAnalysis;
use target_monitor::monitor::{EngineParts, Evaluation, MonitorEngine};
use target_monitor::remote::{HttpAnalysisApi, MarketStatusSource};
use target_monitor::store::{JsonFileStore, ResultSink};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let store: Arc<dyn ResultSink> = Arc::new(JsonFileStore::open(&cfg.records_file)?);
    let probe = Arc::new(HttpProbe::new(
        &cfg.probe_url,
        Duration::from_secs(cfg.probe_timeout_secs),
    )?);
    let (prices, feed) = feeds::from_config(&cfg);
    info!("Price source: {}", prices.name());
    let suspend = SuspendFlag::new();

    let (market_source, evaluation): (Arc<dyn MarketStatusSource>, Evaluation) =
        if cfg.uses_remote_api() {
            let api = Arc::new(HttpAnalysisApi::new(&cfg)?);
            (api.clone() as Arc<dyn MarketStatusSource>, Evaluation::Remote(api))
        } else {
            (Arc::new(TradingHours::default()) as Arc<dyn MarketStatusSource>, Evaluation::Local)
        };

    let parts = EngineParts {
        store,
        market_source,
        probe,
        prices,
        evaluation,
        gate: Arc::new(suspend.clone()),
        retry_policy: RetryPolicy::NextTick,
    };

    let mut engine = MonitorEngine::new(cfg.shared(), parts).await;
    engine.start().await;
    info!("Reading commands from stdin: <price> | check | add <json> | pause | resume | online | offline | status");
    info!("Press Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_command(&engine, feed.as_ref(), &suspend, line.trim()).await,
                Ok(None) => {
                    debug!("stdin closed, running until Ctrl+C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    info!("Shutting down...");
    engine.stop();
    Ok(())
}

async fn handle_command(
    engine: &MonitorEngine,
    feed: Option<&FeedHandle>,
    suspend: &SuspendFlag,
    line: &str,
) {
    if line.is_empty() {
        return;
    }

    if let Ok(price) = line.parse::<f64>() {
        match feed {
            Some(feed) if !feed.push(price) => warn!("Ignoring invalid price {}", line),
            Some(_) => {}
            None => warn!("Prices come from chart frames, ignoring {}", line),
        }
        return;
    }

    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    match cmd.to_lowercase().as_str() {
        "check" => engine.request_manual_check(),
        "add" => match serde_json::from_str::<NewAnalysis>(rest) {
            Ok(draft) => {
                if let Err(e) = engine.submit_analysis(draft).await {
                    warn!("Analysis rejected: {:#}", e);
                }
            }
            Err(e) => warn!("Could not parse analysis: {}", e),
        },
        "pause" => {
            suspend.suspend();
            info!("Scheduled polling paused");
        }
        "resume" => {
            suspend.resume();
            info!("Scheduled polling resumed");
        }
        "online" | "offline" => {
            let status = engine.on_connectivity_event(cmd == "online").await;
            info!("Network: {}", status);
        }
        "status" => {
            info!("Network: {}", engine.network_status());
            let retry = engine.retry_state().await;
            if let Some(err) = &retry.last_error {
                info!(
                    "Last check failed ({} in a row): {}",
                    retry.consecutive_failures, err.error_message
                );
            }
            for (name, state) in engine.poll_states() {
                info!(
                    "  {:<15} every {:?}, failures {}, last tick {}",
                    name,
                    state.interval,
                    state.consecutive_failures,
                    state
                        .last_tick
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        _ => warn!("Unknown command: {}", line),
    }
}
