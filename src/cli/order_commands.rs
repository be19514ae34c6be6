// Order command implementations
use tracing::{info, warn};
use paper_exchange::simulation::{LevelSource, MergedLevel, SnapshotOutcome};
use paper_exchange::{
    Config, HttpSnapshotSource, OrderBookReplica, OrderDesk, Side, SqliteLedger, TradingError,
    TradingResult,
};

fn open_desk(ledger: SqliteLedger, config: &Config, user_id: i64) -> TradingResult<OrderDesk<SqliteLedger>> {
    let mut desk = OrderDesk::new(ledger, config.matching.on_persist_failure);
    desk.open(user_id)?;
    Ok(desk)
}

pub fn place_order(
    ledger: SqliteLedger,
    config: &Config,
    user_id: i64,
    side: &str,
    price: &str,
    amount: &str,
) -> TradingResult<()> {
    let mut desk = open_desk(ledger, config, user_id)?;
    let trade = desk.place_order(side, price, amount)?;

    info!("✅ Order placed");
    info!("   Trade:  {}", trade.id);
    info!("   Side:   {}", trade.trade_type);
    info!("   Price:  {}", trade.price);
    info!("   Amount: {}", trade.amount);
    info!("   Status: {}", trade.status.to_string());
    Ok(())
}

pub fn cancel_order(ledger: SqliteLedger, config: &Config, user_id: i64, trade_id: i64) -> TradingResult<()> {
    let mut desk = open_desk(ledger, config, user_id)?;
    let trade = desk.cancel_order(trade_id)?;
    info!(
        "✅ Cancelled trade {} ({} {} @ {}, {} filled)",
        trade.id, trade.trade_type, trade.amount, trade.price, trade.filled_amount
    );
    Ok(())
}

pub fn list_orders(ledger: SqliteLedger, config: &Config, user_id: i64) -> TradingResult<()> {
    let desk = open_desk(ledger, config, user_id)?;
    let history = desk.history();

    if history.is_empty() {
        info!("No orders for user {}", user_id);
        return Ok(());
    }

    info!("📋 Orders for user {} ({})", user_id, config.market.symbol);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("{:>6}  {:<4} {:>14} {:>12} {:>12}  {:<16}", "ID", "SIDE", "PRICE", "AMOUNT", "FILLED", "STATUS");
    for trade in history {
        info!(
            "{:>6}  {:<4} {:>14} {:>12} {:>12}  {:<16}",
            trade.id,
            trade.trade_type.as_str(),
            trade.price.to_string(),
            trade.amount.to_string(),
            trade.filled_amount.to_string(),
            trade.status.to_string()
        );
    }
    Ok(())
}

/// One-shot merged view: a fresh REST snapshot plus the user's resting orders
pub async fn show_book(
    ledger: SqliteLedger,
    config: &Config,
    user_id: i64,
    depth: Option<usize>,
) -> TradingResult<()> {
    let depth = depth.unwrap_or(config.market.depth);
    let desk = open_desk(ledger, config, user_id)?;

    let source = HttpSnapshotSource::from_config(config)?;
    let snapshot = source.fetch().await?;

    let mut replica = OrderBookReplica::new(&config.market.symbol, depth, config.feed.buffer_capacity);
    if let SnapshotOutcome::Stale { snapshot_id, .. } = replica.apply_snapshot(snapshot) {
        return Err(TradingError::FeedProtocol(format!("snapshot {} could not be applied", snapshot_id)));
    }

    let view = replica.top_levels(depth);
    let merged = desk.merged_book(&view, depth);

    info!("📖 {} book at update {} (★ = your order)", config.market.symbol, view.last_update_id);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for level in merged.side(Side::Ask).iter().rev() {
        print_level("ASK", level);
    }
    info!("────────────────────────────────────────────────");
    for level in merged.side(Side::Bid) {
        print_level("BID", level);
    }

    if desk.orders().is_empty() {
        warn!("⚠️  User {} has no resting orders", user_id);
    }
    Ok(())
}

fn print_level(label: &str, level: &MergedLevel) {
    let marker = match level.source {
        LevelSource::Virtual => "★",
        LevelSource::Real => " ",
    };
    info!(
        "{} {} {:>14} {:>14} {:>14}",
        marker,
        label,
        level.price.to_string(),
        level.quantity.to_string(),
        level.total.to_string()
    );
}
