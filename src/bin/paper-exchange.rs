// Paper Exchange - CLI
// Single entry point: workspace setup, the live matching loop, orders and balances

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use paper_exchange::{Config, Database, SqliteLedger, TradingError};

// Load command modules from cli directory
#[path = "../cli/exchange_commands.rs"]
mod exchange_commands;
#[path = "../cli/order_commands.rs"]
mod order_commands;
#[path = "../cli/portfolio_commands.rs"]
mod portfolio_commands;

#[derive(Parser)]
#[command(name = "paper-exchange")]
#[command(version = "0.1.0")]
#[command(about = "Paper trading against a live exchange order book", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and workspace
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Follow the live book and match the user's virtual orders
    Run {
        /// User whose orders are matched
        #[arg(short, long)]
        user: i64,

        /// Stop after this many minutes
        #[arg(short, long)]
        minutes: Option<f64>,
    },

    /// Place, cancel and inspect orders
    #[command(subcommand)]
    Order(OrderCommands),

    /// Paper balances
    #[command(subcommand)]
    Portfolio(PortfolioCommands),

    /// System status and health checks
    Status {
        /// Also show this user's balances and open orders
        #[arg(short, long)]
        user: Option<i64>,
    },
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Place a limit order
    Place {
        #[arg(short, long)]
        user: i64,

        /// bid/buy or ask/sell
        #[arg(short, long)]
        side: String,

        #[arg(short, long)]
        price: String,

        #[arg(short, long)]
        amount: String,
    },

    /// Cancel an open order
    Cancel {
        #[arg(short, long)]
        user: i64,

        /// Trade id to cancel
        trade_id: i64,
    },

    /// List the user's orders, newest first
    List {
        #[arg(short, long)]
        user: i64,
    },

    /// Show the current book merged with the user's orders
    Book {
        #[arg(short, long)]
        user: i64,

        /// Levels per side (defaults to [market] depth)
        #[arg(short, long)]
        depth: Option<usize>,
    },
}

#[derive(Subcommand)]
enum PortfolioCommands {
    /// Add paper funds, opening the account if needed
    Fund {
        #[arg(short, long)]
        user: i64,

        #[arg(short, long)]
        amount: String,
    },

    /// Show balances
    Show {
        #[arg(short, long)]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Init runs before any config exists
    if let Commands::Init { force } = cli.command {
        init_logging(if cli.verbose { "debug" } else { "info" });
        return init_workspace(&cli.config, force);
    }

    let config = load_config_or_exit(&cli.config);
    init_logging(if cli.verbose { "debug" } else { config.logging.level.as_str() });

    let result = match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run { user, minutes } => {
            match open_ledger(&config) {
                Ok(ledger) => exchange_commands::run_exchange(&config, ledger, user, minutes).await,
                Err(e) => Err(e),
            }
        }
        Commands::Order(cmd) => match open_ledger(&config) {
            Ok(ledger) => match cmd {
                OrderCommands::Place { user, side, price, amount } => {
                    order_commands::place_order(ledger, &config, user, &side, &price, &amount)
                }
                OrderCommands::Cancel { user, trade_id } => {
                    order_commands::cancel_order(ledger, &config, user, trade_id)
                }
                OrderCommands::List { user } => order_commands::list_orders(ledger, &config, user),
                OrderCommands::Book { user, depth } => {
                    order_commands::show_book(ledger, &config, user, depth).await
                }
            },
            Err(e) => Err(e),
        },
        Commands::Portfolio(cmd) => match open_ledger(&config) {
            Ok(ledger) => match cmd {
                PortfolioCommands::Fund { user, amount } => {
                    portfolio_commands::fund(&ledger, user, &amount)
                }
                PortfolioCommands::Show { user } => portfolio_commands::show(&ledger, user),
            },
            Err(e) => Err(e),
        },
        Commands::Status { user } => show_status(&config, user),
    };

    if let Err(e) = result {
        error!("❌ {}", e.user_message());
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(level: &str) {
    let level = level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .init();
}

fn load_config_or_exit(path: &str) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            let e = TradingError::from(e);
            eprintln!("❌ {}", e.user_message());
            if !matches!(e, TradingError::ConfigNotFound(_)) {
                eprintln!();
                eprintln!("💡 Quick fix:");
                eprintln!("   1. Compare {} with config.toml.example", path);
                eprintln!("   2. Or regenerate it: paper-exchange init --force");
            }
            std::process::exit(1);
        }
    }
}

fn open_ledger(config: &Config) -> paper_exchange::TradingResult<SqliteLedger> {
    let db = Database::new(&config.database.db_path)?;
    db.run_migrations()?;
    Ok(SqliteLedger::new(db))
}

fn init_workspace(config_path: &str, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    use std::fs;
    use std::path::Path;

    info!("🚀 Initializing paper exchange workspace...");

    fs::create_dir_all("data")?;
    info!("✅ Created data/ directory");

    if Path::new(config_path).exists() && !force {
        warn!("⚠️  {} already exists (use --force to overwrite)", config_path);
    } else {
        fs::write(config_path, include_str!("../../config.toml.example"))?;
        info!("✅ Wrote {}", config_path);
    }

    let config = Config::from_file(config_path)?;
    let db = Database::new(&config.database.db_path)?;
    db.run_migrations()?;
    info!("✅ Database ready at {}", config.database.db_path);

    info!("");
    info!("🎉 Workspace initialized!");
    info!("");
    info!("Next steps:");
    info!("  1. Fund an account:  paper-exchange portfolio fund --user 1 --amount 10000");
    info!("  2. Place an order:   paper-exchange order place --user 1 --side bid --price 60000 --amount 0.01");
    info!("  3. Start matching:   paper-exchange run --user 1");

    Ok(())
}

fn show_status(config: &Config, user: Option<i64>) -> paper_exchange::TradingResult<()> {
    use paper_exchange::{PortfolioStore, TradeStore};

    info!("📊 Paper Exchange Status");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("Market:      {}", config.market.symbol);
    info!("Depth feed:  {}", config.depth_stream_url());
    info!("Snapshots:   {}/api/v3/depth (limit {})", config.market.rest_url, config.market.snapshot_limit);
    info!(
        "Matching:    every {}ms, {:?} settlement, {:?} on persist failure",
        config.matching.cycle_interval_ms,
        config.matching.settlement_mode,
        config.matching.on_persist_failure
    );
    info!("Database:    {}", config.database.db_path);

    let ledger = open_ledger(config)?;
    if ledger.database().health_check()? {
        info!("✅ Database healthy");
    } else {
        warn!("⚠️  Database health check failed");
    }

    if let Some(user_id) = user {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        match ledger.get_by_user_id(user_id)? {
            Some(portfolio) => info!(
                "User {}: {} available, {} coins",
                user_id,
                portfolio.funds(),
                portfolio.coins()
            ),
            None => warn!("⚠️  User {} has no portfolio", user_id),
        }
        let open = ledger
            .list_by_user(user_id)?
            .into_iter()
            .filter(|t| t.is_active())
            .count();
        info!("Open orders: {}", open);
    }

    Ok(())
}
