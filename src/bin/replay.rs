use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use target_monitor::config::Config;
use target_monitor::core::market_calendar::MarketCalendar;
use target_monitor::core::trading_hours::TradingHours;
use target_monitor::events::{DomainEvent, EventBus};
use target_monitor::feeds::ReplaySource;
use target_monitor::remote::LocalAnalysisService;
use target_monitor::store::JsonFileStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: replay <records.json> <prices.csv> [symbol]");
    }
    let records_path = PathBuf::from(&args[1]);
    let prices_path = PathBuf::from(&args[2]);
    let symbol = args
        .get(3)
        .cloned()
        .unwrap_or_else(|| cfg.symbol.clone())
        .to_uppercase();

    let records = JsonFileStore::load_records(&records_path)?;
    let series = ReplaySource::load_csv(&prices_path)?;

    let store = Arc::new(JsonFileStore::in_memory());
    for record in records {
        store.insert(record).await?;
    }

    // Replayed prices are traded prices, so every pass is forced past the
    // market gate and the calendar is never consulted.
    let bus = EventBus::default();
    let calendar = Arc::new(MarketCalendar::new(
        Arc::new(TradingHours::default()),
        cfg.market_cache_ttl(),
    ));
    let service = LocalAnalysisService::new(store.clone(), calendar, &bus);

    let mut resolved = 0;
    for point in series.points() {
        bus.publish(DomainEvent::PriceUpdate {
            symbol: symbol.clone(),
            price: point.price,
            is_market_open: None,
        });
        let summary = service.check_at(true, point.timestamp).await?;
        resolved += summary.updated;
    }
    info!("Replayed {} price point(s), {} analyses resolved", series.points().len(), resolved);

    println!();
    let end = series.points().last().map(|p| p.timestamp);

    println!("{}", "=".repeat(108));
    println!(
        "{:<16} {:<8} {:<8} {:>10} {:<16} {:<22} {:>10} {:>10}",
        "ID", "SYMBOL", "SIDE", "ENTRY", "OUTCOME", "RESOLVED AT", "LAST", "MOVE"
    );
    println!("{}", "-".repeat(108));
    for r in store.all_records().await {
        let outcome = if r.expired {
            "expired".to_string()
        } else if r.is_terminal() {
            r.outcome().to_string()
        } else {
            "open".to_string()
        };
        // Favourable move at resolution, or at the end of the series if open
        let mark = r.result_timestamp.or(end).and_then(|t| series.price_at(t));
        println!(
            "{:<16} {:<8} {:<8} {:>10.2} {:<16} {:<22} {:>10} {:>10}",
            r.id,
            r.symbol,
            r.direction,
            r.entry_price,
            outcome,
            r.result_timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            r.last_checked_price
                .map(|p| format!("{:.2}", p))
                .unwrap_or_else(|| "-".to_string()),
            mark.map(|p| format!("{:+.2}", r.direction.favourable_distance(r.entry_price, p)))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    println!("{}", "=".repeat(108));

    Ok(())
}
