// Session context: who is trading right now

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{TradingError, TradingResult};

/// Explicit session handed to the components that act on behalf of a user
#[derive(Debug, Clone, Default)]
pub struct Session {
    user_id: Option<i64>,
    opened_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A closed session with no user
    pub fn new() -> Self {
        Self::default()
    }

    /// Session already opened for `user_id`
    pub fn for_user(user_id: i64) -> Self {
        let mut session = Self::new();
        session.open(user_id);
        session
    }

    pub fn open(&mut self, user_id: i64) {
        if let Some(previous) = self.user_id {
            if previous != user_id {
                info!("🔁 Switching session from user {} to user {}", previous, user_id);
            }
        }
        self.user_id = Some(user_id);
        self.opened_at = Some(Utc::now());
        info!("🔓 Session opened for user {}", user_id);
    }

    pub fn close(&mut self) {
        if let Some(user_id) = self.user_id.take() {
            info!("🔒 Session closed for user {}", user_id);
        }
        self.opened_at = None;
    }

    pub fn is_open(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn current_user(&self) -> Option<i64> {
        self.user_id
    }

    pub fn require_user(&self) -> TradingResult<i64> {
        self.user_id.ok_or(TradingError::NoActiveSession)
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }
}
