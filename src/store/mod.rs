//! Durable user, ban and report records.
//!
//! The session engine only ever talks to the [`UserStore`] trait. The
//! production implementation is [`SqliteStore`]; tests may wrap it to inject
//! failures.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    Ban, CompletedSession, Report, SessionState, Stats, UnknownVariant, User, UserId, UserPatch,
};

pub use self::sqlite::SqliteStore;

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored enum column held an unknown value.
    #[error(transparent)]
    InvalidEnum(#[from] UnknownVariant),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp in {field}: {value:?}")]
    InvalidTimestamp {
        /// Column name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// The store refused the operation (used by test doubles and wrappers).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of removing a ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnbanSummary {
    /// Whether a ban row existed.
    pub ban_removed: bool,
    /// Reports against the user that were deleted.
    pub reports_purged: u64,
}

/// Result of a full maintenance reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSummary {
    /// Ban rows deleted.
    pub bans: u64,
    /// Report rows deleted.
    pub reports: u64,
    /// Users returned to the menu.
    pub users: u64,
}

/// Persistent per-user records plus bans, reports and session history.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user record.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Whether a record exists for `id`.
    async fn user_exists(&self, id: UserId) -> Result<bool, StoreError> {
        Ok(self.get_user(id).await?.is_some())
    }

    /// Create the record if missing, then apply `patch`. Returns the new row.
    async fn upsert_user(&self, id: UserId, patch: &UserPatch) -> Result<User, StoreError>;

    /// Apply several patches in one transaction: either all land or none do.
    ///
    /// Used for every transition that touches both sides of a partner link.
    async fn update_users(&self, patches: &[(UserId, UserPatch)]) -> Result<(), StoreError>;

    /// Ban in force at `now`, if any.
    async fn active_ban(&self, id: UserId, now: DateTime<Utc>) -> Result<Option<Ban>, StoreError>;

    /// Whether `id` is banned right now.
    async fn is_banned(&self, id: UserId) -> Result<bool, StoreError> {
        Ok(self.active_ban(id, Utc::now()).await?.is_some())
    }

    /// Create or refresh a ban. `until = None` is permanent.
    async fn ban(&self, id: UserId, until: Option<DateTime<Utc>>) -> Result<Ban, StoreError>;

    /// Remove the ban and purge every report filed against `id`.
    async fn unban(&self, id: UserId) -> Result<UnbanSummary, StoreError>;

    /// Append a report.
    async fn add_report(
        &self,
        reporter: UserId,
        reported: UserId,
        reason: &str,
    ) -> Result<Report, StoreError> {
        self.add_report_with(reporter, reported, reason, &[]).await
    }

    /// Append a report and apply `patches` in the same transaction.
    ///
    /// If any patch fails the report is not stored.
    async fn add_report_with(
        &self,
        reporter: UserId,
        reported: UserId,
        reason: &str,
        patches: &[(UserId, UserPatch)],
    ) -> Result<Report, StoreError>;

    /// Total reports ever filed against `id` (since the last unban).
    async fn count_reports(&self, id: UserId) -> Result<u64, StoreError>;

    /// Most recent reports, newest first.
    async fn recent_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError>;

    /// Figures for the moderator panel.
    async fn aggregate_stats(&self, now: DateTime<Utc>) -> Result<Stats, StoreError>;

    /// Every user currently persisted in `state`.
    async fn users_in_state(&self, state: SessionState) -> Result<Vec<User>, StoreError>;

    /// Append a finished session for duration statistics.
    async fn record_session(&self, session: &CompletedSession) -> Result<(), StoreError>;

    /// Delete all bans and reports and return every user to the menu.
    async fn reset_all(&self) -> Result<ResetSummary, StoreError>;
}
