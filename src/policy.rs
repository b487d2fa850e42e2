//! Report accumulation, automatic bans and the moderator gate.
//!
//! Auto-ban tiers: reaching `temp_ban_threshold` reports bans for
//! `temp_ban_hours`; reaching `permanent_ban_threshold` (0 disables the
//! tier) bans for good. An automatic ban never downgrades an existing
//! permanent one. The moderator can never be banned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::PolicyConfig;
use crate::store::{StoreError, UnbanSummary, UserStore};
use crate::types::{Ban, BanDuration, Report, UserId, UserPatch};

/// Errors from the report/ban policy.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Reason is empty or longer than allowed.
    #[error("report reason must be 1..={max} characters, got {chars}")]
    ReasonLength {
        /// Characters after trimming.
        chars: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A user tried to report themselves.
    #[error("cannot report yourself")]
    SelfReport,

    /// The moderator identity cannot be banned.
    #[error("the moderator cannot be banned")]
    ModeratorExempt,

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies the report and ban rules against the record store.
pub struct ReportPolicy {
    store: Arc<dyn UserStore>,
    config: PolicyConfig,
    moderator: UserId,
}

impl std::fmt::Debug for ReportPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportPolicy")
            .field("config", &self.config)
            .field("moderator", &self.moderator)
            .finish_non_exhaustive()
    }
}

impl ReportPolicy {
    /// Create a policy over `store`, exempting `moderator` from bans.
    pub fn new(store: Arc<dyn UserStore>, config: PolicyConfig, moderator: UserId) -> Self {
        Self {
            store,
            config,
            moderator,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Trim and length-check a report reason.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ReasonLength`] if the trimmed reason is empty or
    /// longer than `max_reason_chars` characters.
    pub fn validate_reason(&self, reason: &str) -> Result<String, PolicyError> {
        let trimmed = reason.trim();
        let chars = trimmed.chars().count();
        if chars == 0 || chars > self.config.max_reason_chars {
            return Err(PolicyError::ReasonLength {
                chars,
                max: self.config.max_reason_chars,
            });
        }
        Ok(trimmed.to_owned())
    }

    /// Validate and append a report.
    ///
    /// `teardown` is written in the same transaction as the report, so a
    /// failed write leaves neither behind.
    ///
    /// # Errors
    ///
    /// Returns a policy error for invalid reasons or self-reports, or a store
    /// error if the insert fails.
    pub async fn file_report(
        &self,
        reporter: UserId,
        reported: UserId,
        reason: &str,
        teardown: &[(UserId, UserPatch)],
    ) -> Result<Report, PolicyError> {
        if reporter == reported {
            return Err(PolicyError::SelfReport);
        }
        let reason = self.validate_reason(reason)?;
        let report = self
            .store
            .add_report_with(reporter, reported, &reason, teardown)
            .await?;
        info!(reporter = %reporter, reported = %reported, report_id = report.id, "report filed");
        Ok(report)
    }

    /// Reports on file against `id`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the count query fails.
    pub async fn count_reports(&self, id: UserId) -> Result<u64, PolicyError> {
        Ok(self.store.count_reports(id).await?)
    }

    /// Ban tier reached by `count` reports, if any.
    pub fn ban_for_count(&self, count: u64) -> Option<BanDuration> {
        let permanent = self.config.permanent_ban_threshold;
        if permanent > 0 && count >= permanent {
            return Some(BanDuration::Permanent);
        }
        if count >= self.config.temp_ban_threshold {
            return Some(BanDuration::hours(self.config.temp_ban_hours));
        }
        None
    }

    /// Ban `id` if its report count has crossed a threshold.
    ///
    /// Returns the ban that was applied, or `None` if no tier was reached,
    /// the target is the moderator, or a permanent ban already exists.
    ///
    /// # Errors
    ///
    /// Returns a store error if any query fails.
    pub async fn maybe_auto_ban(&self, id: UserId) -> Result<Option<Ban>, PolicyError> {
        if id == self.moderator {
            return Ok(None);
        }
        let count = self.store.count_reports(id).await?;
        let Some(duration) = self.ban_for_count(count) else {
            return Ok(None);
        };

        let now = Utc::now();
        if let Some(existing) = self.store.active_ban(id, now).await? {
            if existing.is_permanent() {
                return Ok(None);
            }
        }

        let ban = self.store.ban(id, duration.expiry_from(now)).await?;
        warn!(user = %id, reports = count, permanent = ban.is_permanent(), "auto-ban applied");
        Ok(Some(ban))
    }

    /// Ban `id` for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ModeratorExempt`] for the moderator identity,
    /// or a store error if the write fails.
    pub async fn ban(&self, id: UserId, duration: BanDuration) -> Result<Ban, PolicyError> {
        if id == self.moderator {
            return Err(PolicyError::ModeratorExempt);
        }
        let ban = self.store.ban(id, duration.expiry_from(Utc::now())).await?;
        info!(user = %id, until = ?ban.until, "ban applied");
        Ok(ban)
    }

    /// Lift the ban on `id` and wipe the reports against it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    pub async fn unban(&self, id: UserId) -> Result<UnbanSummary, PolicyError> {
        let summary = self.store.unban(id).await?;
        info!(
            user = %id,
            ban_removed = summary.ban_removed,
            reports_purged = summary.reports_purged,
            "unban applied"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Moderator gate
// ---------------------------------------------------------------------------

/// Authorisation for the single moderator identity.
///
/// When a shared secret is configured the moderator must present it once
/// (`/mod <secret>`) before privileged commands are accepted.
pub struct ModeratorGate {
    moderator: UserId,
    secret: Option<String>,
    unlocked: AtomicBool,
}

impl std::fmt::Debug for ModeratorGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeratorGate")
            .field("moderator", &self.moderator)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("unlocked", &self.unlocked.load(Ordering::Relaxed))
            .finish()
    }
}

impl ModeratorGate {
    /// Create a gate for `moderator`, optionally requiring `secret`.
    pub fn new(moderator: UserId, secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        Self {
            moderator,
            unlocked: AtomicBool::new(secret.is_none()),
            secret,
        }
    }

    /// The moderator identity.
    pub fn moderator(&self) -> UserId {
        self.moderator
    }

    /// Whether `id` presenting `provided` is the moderator.
    pub fn is_moderator(&self, id: UserId, provided: Option<&str>) -> bool {
        if id != self.moderator {
            return false;
        }
        match (&self.secret, provided) {
            (None, _) => true,
            (Some(secret), Some(given)) => constant_time_eq(secret.as_bytes(), given.as_bytes()),
            (Some(_), None) => false,
        }
    }

    /// Present the secret; on success privileged commands are accepted from
    /// now on. Returns whether the caller is authorised afterwards.
    pub fn unlock(&self, id: UserId, provided: Option<&str>) -> bool {
        if self.is_moderator(id, provided) {
            self.unlocked.store(true, Ordering::Relaxed);
            return true;
        }
        self.authorize(id)
    }

    /// Whether `id` may run privileged commands now.
    pub fn authorize(&self, id: UserId) -> bool {
        id == self.moderator && self.unlocked.load(Ordering::Relaxed)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
