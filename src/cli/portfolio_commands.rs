// Portfolio command implementations
use tracing::info;
use paper_exchange::core::fund_account;
use paper_exchange::types::parse_positive_decimal;
use paper_exchange::{PortfolioStore, SqliteLedger, TradingError, TradingResult};

pub fn fund(ledger: &SqliteLedger, user_id: i64, amount: &str) -> TradingResult<()> {
    let amount = parse_positive_decimal("amount", amount)?;
    let portfolio = fund_account(ledger, user_id, amount)?;
    info!("✅ User {} now has {} available", user_id, portfolio.funds());
    Ok(())
}

pub fn show(ledger: &SqliteLedger, user_id: i64) -> TradingResult<()> {
    let portfolio = ledger
        .get_by_user_id(user_id)?
        .ok_or(TradingError::PortfolioNotFound(user_id))?;

    info!("💼 Portfolio for user {}", user_id);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("Available funds: {}", portfolio.funds());
    info!("Coins:           {}", portfolio.coins());
    info!("Total invested:  {}", portfolio.invested());
    if let Some(balance) = portfolio.total_balance {
        info!("Total balance:   {}", balance);
    }
    if let Some(updated) = &portfolio.last_updated {
        info!("Last updated:    {}", updated);
    }
    Ok(())
}
