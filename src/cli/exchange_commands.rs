// Live matching session: feed, desk and runtime wired together
use std::time::Duration;

use tracing::{info, warn};
use paper_exchange::core::spawn_feed;
use paper_exchange::{Config, ExchangeRuntime, OrderDesk, SqliteLedger, TradingResult};

pub async fn run_exchange(
    config: &Config,
    ledger: SqliteLedger,
    user_id: i64,
    minutes: Option<f64>,
) -> TradingResult<()> {
    let mut desk = OrderDesk::new(ledger, config.matching.on_persist_failure);
    desk.open(user_id)?;

    match desk.portfolio() {
        Ok(portfolio) => info!(
            "💰 User {}: {} available, {} coins",
            user_id,
            portfolio.funds(),
            portfolio.coins()
        ),
        Err(e) => warn!("⚠️  {}", e),
    }

    let duration = minutes.map(|m| Duration::from_secs_f64(m.max(0.0) * 60.0));
    if let Some(d) = duration {
        info!("⏱️  Session limited to {:?}", d);
    }

    let mut feed = spawn_feed(config)?;
    let mut runtime = ExchangeRuntime::new(config.clone(), desk);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let summary = runtime.run(&mut feed, duration, shutdown).await?;
    let last_bid = feed.current_book().and_then(|book| book.best_bid().map(|level| level.price));
    feed.shutdown();

    let mut desk = runtime.into_desk();

    info!("");
    info!("📊 Session summary");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("Cycles:          {}", summary.stats.cycles);
    info!("Skipped:         {}", summary.skipped_cycles);
    info!("Aborted:         {}", summary.aborted_cycles);
    info!("Full fills:      {}", summary.stats.full_matches);
    info!("Partial fills:   {}", summary.stats.partial_matches);
    info!("Volume:          {}", summary.stats.total_volume);
    info!("Resting orders:  {}", desk.orders().len());
    if let Ok(portfolio) = desk.portfolio() {
        info!("Available funds: {}", portfolio.funds());
        info!("Coins:           {}", portfolio.coins());
        if let Some(value) = last_bid.and_then(|price| portfolio.valued_at(price)) {
            info!("Value at bid:    {}", value);
        }
    }

    desk.close();
    Ok(())
}
