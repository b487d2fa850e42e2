//! Moderator operations.
//!
//! Every entry point checks the [`ModeratorGate`](crate::policy::ModeratorGate)
//! first and fails with [`SessionError::Unauthorized`] for anyone else.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{SessionEngine, SessionError};
use crate::notify::Notice;
use crate::store::UnbanSummary;
use crate::types::{
    Ban, BanDuration, PendingAdminInput, Report, SessionEndReason, SessionState, Stats, UserId,
    UserPatch, UserProfile,
};

/// Most reports `/reports` will list.
pub const MAX_REPORTS_LISTED: usize = 50;

impl SessionEngine {
    fn authorize(&self, actor: UserId) -> Result<(), SessionError> {
        if self.gate.authorize(actor) {
            Ok(())
        } else {
            warn!(user = %actor, "unauthorised moderator command");
            Err(SessionError::Unauthorized)
        }
    }

    /// Whether `actor` may run moderator commands right now.
    pub fn is_moderator(&self, actor: UserId) -> bool {
        self.gate.authorize(actor)
    }

    /// Present the moderator secret (`/mod <secret>`).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthorized`] if the id or secret is wrong.
    pub fn unlock_moderator(&self, actor: UserId, secret: Option<&str>) -> Result<(), SessionError> {
        if self.gate.unlock(actor, secret) {
            info!(user = %actor, "moderator unlocked");
            Ok(())
        } else {
            warn!(user = %actor, "moderator unlock rejected");
            Err(SessionError::Unauthorized)
        }
    }

    /// Aggregate statistics.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthorized`] or a store error.
    pub async fn stats(&self, actor: UserId) -> Result<Stats, SessionError> {
        self.authorize(actor)?;
        Ok(self.store.aggregate_stats(Utc::now()).await?)
    }

    /// The newest reports, at most `limit` (capped at [`MAX_REPORTS_LISTED`]).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthorized`] or a store error.
    pub async fn recent_reports(
        &self,
        actor: UserId,
        limit: usize,
    ) -> Result<Vec<Report>, SessionError> {
        self.authorize(actor)?;
        let limit = limit.clamp(1, MAX_REPORTS_LISTED);
        Ok(self.store.recent_reports(limit).await?)
    }

    /// Everything known about `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthorized`] or a store error.
    pub async fn lookup(&self, actor: UserId, target: UserId) -> Result<UserProfile, SessionError> {
        self.authorize(actor)?;
        let user = self.store.get_user(target).await?;
        let reports = self.store.count_reports(target).await?;
        let ban = self.store.active_ban(target, Utc::now()).await?;
        Ok(UserProfile {
            id: target,
            user,
            reports,
            ban,
        })
    }

    /// Ban `target` and tear down whatever it was doing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthorized`], a policy error for the
    /// moderator identity, or a store error (no ban was written).
    pub async fn ban(
        &self,
        actor: UserId,
        target: UserId,
        duration: BanDuration,
    ) -> Result<Ban, SessionError> {
        self.authorize(actor)?;
        let ban = self.policy.ban(target, duration).await?;
        if let Err(e) = self.enforce_ban(target, ban.until).await {
            // The ban row is in place; the next event from the user will
            // be rejected even if the teardown did not complete.
            warn!(user = %target, error = %e, "ban teardown failed");
        }
        Ok(ban)
    }

    /// Lift the ban on `target` and purge the reports against it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthorized`] or a store error.
    pub async fn unban(&self, actor: UserId, target: UserId) -> Result<UnbanSummary, SessionError> {
        self.authorize(actor)?;
        Ok(self.policy.unban(target).await?)
    }

    /// Record that the moderator was prompted for an id (or clear it).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthorized`] or a store error.
    pub async fn set_pending_admin(
        &self,
        actor: UserId,
        pending: Option<PendingAdminInput>,
    ) -> Result<(), SessionError> {
        self.authorize(actor)?;
        let _held = self.locks.lock(actor).await;
        self.store
            .upsert_user(actor, &UserPatch::default().pending_admin(pending))
            .await?;
        Ok(())
    }

    /// Take and clear the moderator's pending prompt, if any.
    ///
    /// Returns `None` for anyone who is not an authorised moderator.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn take_pending_admin(
        &self,
        actor: UserId,
    ) -> Result<Option<PendingAdminInput>, SessionError> {
        if !self.gate.authorize(actor) {
            return Ok(None);
        }
        let _held = self.locks.lock(actor).await;
        let Some(user) = self.store.get_user(actor).await? else {
            return Ok(None);
        };
        let Some(pending) = user.pending_admin else {
            return Ok(None);
        };
        self.store
            .upsert_user(actor, &UserPatch::default().pending_admin(None))
            .await?;
        Ok(Some(pending))
    }

    /// Remove a freshly banned user from the queue and any session.
    ///
    /// The partner is freed and told; the target is told about the ban.
    pub(crate) async fn enforce_ban(
        &self,
        target: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), SessionError> {
        self.queue.dequeue(target);
        if self.store.get_user(target).await?.is_none() {
            return Ok(());
        }

        let freed = {
            let (_held, user) = self.lock_with_partner(target).await?;
            self.queue.dequeue(target);
            match user.state {
                SessionState::Chatting | SessionState::Reporting => {
                    self.end_session(&user, SessionState::Menu, SessionEndReason::Banned)
                        .await?
                }
                SessionState::Searching => {
                    self.store
                        .upsert_user(target, &UserPatch::to_menu(Utc::now()))
                        .await?;
                    None
                }
                SessionState::Menu => None,
            }
        };

        if let Some(partner) = freed {
            self.notify(partner, Notice::PartnerLeft).await;
        }
        self.notify(target, Notice::Banned { until }).await;
        info!(user = %target, permanent = until.is_none(), "ban enforced");
        Ok(())
    }
}
