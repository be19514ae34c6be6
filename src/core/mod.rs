// Session, order desk and runtime loop

pub mod error_handling;
pub mod order_desk;
pub mod runtime;
pub mod session;

pub use error_handling::RetryPolicy;
pub use order_desk::{fund_account, OrderDesk};
pub use runtime::{spawn_feed, ExchangeRuntime, FeedHandle, RunSummary};
pub use session::Session;
