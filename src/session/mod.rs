//! Conversation state machine.
//!
//! The [`SessionEngine`] owns every legal transition of a user between
//! `Menu`, `Searching`, `Chatting` and `Reporting`, together with the side
//! effects each one implies: queue membership, reciprocal partner links,
//! partner notifications and report filing. Bans are checked before any
//! transition and are enforced by tearing the session down.
//!
//! Writes that touch both sides of a partner link go through
//! [`UserStore::update_users`], a single transaction, so the pair is never
//! left half-linked.

pub mod locks;
pub mod moderation;
pub mod relay;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::config::PolicyConfig;
use crate::notify::{Notice, Notifier, Outbound};
use crate::pairing::PairingQueue;
use crate::policy::{ModeratorGate, PolicyError, ReportPolicy};
use crate::store::{StoreError, UserStore};
use crate::types::{
    CompletedSession, Payload, SessionEndReason, SessionState, User, UserId, UserPatch,
};

use self::locks::{Held, UserLocks};

/// Attempts to pin a user's partner before giving up.
const PARTNER_LOCK_ATTEMPTS: usize = 3;

/// A planned end of session: the writes, plus what follows them.
struct Teardown {
    patches: Vec<(UserId, UserPatch)>,
    freed: Option<UserId>,
    next: SessionState,
    at: DateTime<Utc>,
}

/// Errors surfaced to the acting user.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The acting user is banned.
    #[error("user is banned")]
    Banned {
        /// Ban expiry (`None` = permanent).
        until: Option<DateTime<Utc>>,
    },

    /// The event is not legal in the user's current state.
    #[error("cannot {event} while in state {state}")]
    InvalidTransition {
        /// Current state.
        state: SessionState,
        /// Rejected event.
        event: &'static str,
    },

    /// The user has no (live) partner.
    #[error("no partner")]
    NoPartner,

    /// The partner link kept changing under us; the caller may retry.
    #[error("partner changed concurrently, retry")]
    Contended,

    /// The caller is not the moderator.
    #[error("not authorised")]
    Unauthorized,

    /// Report/ban policy rejection.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Record store failure; the action did not happen.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the matcher did with a candidate pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Both sides were still searching and are now chatting.
    Paired(UserId, UserId),
    /// At least one side had left; the listed ids went back into the queue.
    Abandoned {
        /// Ids returned to the queue.
        requeued: Vec<UserId>,
    },
}

/// Counts from startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Searching users put back into the in-memory queue.
    pub requeued: usize,
    /// Searching users reset to the menu because they are banned.
    pub reset: usize,
    /// Users whose partner link was not reciprocated and was cleared.
    pub repaired: usize,
}

/// The state machine plus its collaborators.
pub struct SessionEngine {
    store: Arc<dyn UserStore>,
    queue: Arc<PairingQueue>,
    notifier: Arc<dyn Notifier>,
    policy: ReportPolicy,
    gate: ModeratorGate,
    locks: UserLocks,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("queued", &self.queue.len())
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl SessionEngine {
    /// Wire the engine to its store, queue and transport.
    pub fn new(
        store: Arc<dyn UserStore>,
        queue: Arc<PairingQueue>,
        notifier: Arc<dyn Notifier>,
        policy: PolicyConfig,
        gate: ModeratorGate,
    ) -> Self {
        let policy = ReportPolicy::new(Arc::clone(&store), policy, gate.moderator());
        Self {
            store,
            queue,
            notifier,
            policy,
            gate,
            locks: UserLocks::new(),
        }
    }

    /// The pairing queue this engine feeds.
    pub fn queue(&self) -> &Arc<PairingQueue> {
        &self.queue
    }

    /// The record store.
    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// The report/ban policy.
    pub fn policy(&self) -> &ReportPolicy {
        &self.policy
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn ensure_not_banned(&self, id: UserId) -> Result<(), SessionError> {
        if let Some(ban) = self.store.active_ban(id, Utc::now()).await? {
            debug!(user = %id, "rejected banned user");
            return Err(SessionError::Banned { until: ban.until });
        }
        Ok(())
    }

    async fn load_or_create(&self, id: UserId) -> Result<User, SessionError> {
        match self.store.get_user(id).await? {
            Some(user) => Ok(user),
            None => Ok(self.store.upsert_user(id, &UserPatch::default()).await?),
        }
    }

    /// Lock `id` together with its current partner, re-reading the record
    /// under the lock until the partner link is stable.
    async fn lock_with_partner(&self, id: UserId) -> Result<(Held, User), SessionError> {
        for _ in 0..PARTNER_LOCK_ATTEMPTS {
            let snapshot = self.load_or_create(id).await?;
            let held = match snapshot.partner_id {
                Some(partner) => self.locks.lock_pair(id, partner).await,
                None => self.locks.lock(id).await,
            };
            let user = self.load_or_create(id).await?;
            if user.partner_id == snapshot.partner_id {
                return Ok((held, user));
            }
        }
        warn!(user = %id, "partner link kept changing, giving up");
        Err(SessionError::Contended)
    }

    /// Send a notice; failures are logged and reported as `false`.
    async fn notify(&self, user: UserId, notice: Notice) -> bool {
        match self.notifier.deliver(Outbound::notice(user, notice)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %user, error = %e, "notification failed");
                false
            }
        }
    }

    /// End `user`'s session and move it to `next` (`Menu` or `Searching`).
    ///
    /// Caller must hold the locks of `user` and its partner. The partner's
    /// link is cleared only if it still points back at `user`. Returns the
    /// partner that must be told the session ended.
    async fn end_session(
        &self,
        user: &User,
        next: SessionState,
        reason: SessionEndReason,
    ) -> Result<Option<UserId>, SessionError> {
        let teardown = self.plan_teardown(user, next).await?;
        self.store.update_users(&teardown.patches).await?;
        self.finish_teardown(user, &teardown, reason).await;
        Ok(teardown.freed)
    }

    /// Patches that end `user`'s session, without writing them.
    async fn plan_teardown(
        &self,
        user: &User,
        next: SessionState,
    ) -> Result<Teardown, SessionError> {
        let now = Utc::now();
        let own = if next == SessionState::Searching {
            UserPatch::to_searching(now)
        } else {
            UserPatch::to_menu(now)
        };
        let mut patches = vec![(user.id, own)];

        let mut freed = None;
        if let Some(partner_id) = user.partner_id {
            match self.store.get_user(partner_id).await? {
                Some(partner) if partner.is_partnered_with(user.id) => {
                    patches.push((partner_id, UserPatch::to_menu(now)));
                    freed = Some(partner_id);
                }
                _ => debug!(user = %user.id, partner = %partner_id, "partner already left"),
            }
        }

        Ok(Teardown {
            patches,
            freed,
            next,
            at: now,
        })
    }

    /// Queue membership and history once a teardown has been written.
    async fn finish_teardown(&self, user: &User, teardown: &Teardown, reason: SessionEndReason) {
        if teardown.next == SessionState::Searching {
            self.queue.enqueue(user.id);
        } else {
            self.queue.dequeue(user.id);
        }

        if let (Some(partner), Some(started_at)) = (user.partner_id, user.chat_start) {
            let completed = CompletedSession {
                ended_by: user.id,
                partner,
                started_at,
                ended_at: teardown.at,
                reason,
            };
            if let Err(e) = self.store.record_session(&completed).await {
                warn!(user = %user.id, error = %e, "failed to record session history");
            }
        }

        info!(user = %user.id, partner = ?user.partner_id, reason = reason.as_str(), "session ended");
    }

    /// Clear `id`'s partner link if the partner does not point back.
    ///
    /// Returns whether a repair was made.
    pub(crate) async fn repair_stale_link(&self, id: UserId) -> Result<bool, SessionError> {
        let _held = self.locks.lock(id).await;
        let Some(user) = self.store.get_user(id).await? else {
            return Ok(false);
        };
        let Some(partner_id) = user.partner_id else {
            if user.state.in_session() {
                self.store.upsert_user(id, &UserPatch::to_menu(Utc::now())).await?;
                warn!(user = %id, "session state without partner repaired");
                return Ok(true);
            }
            return Ok(false);
        };
        // A reciprocal link can only be created while holding our lock, so
        // the partner's view is stable here.
        let reciprocated = self
            .store
            .get_user(partner_id)
            .await?
            .is_some_and(|p| p.is_partnered_with(id) && p.state.in_session());
        if reciprocated {
            return Ok(false);
        }
        let now = Utc::now();
        self.store.upsert_user(id, &UserPatch::to_menu(now)).await?;
        warn!(user = %id, partner = %partner_id, "stale partner link repaired");
        if let Some(started_at) = user.chat_start {
            let completed = CompletedSession {
                ended_by: id,
                partner: partner_id,
                started_at,
                ended_at: now,
                reason: SessionEndReason::Repaired,
            };
            if let Err(e) = self.store.record_session(&completed).await {
                warn!(user = %id, error = %e, "failed to record session history");
            }
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Menu events
    // -----------------------------------------------------------------------

    /// `/start`: register the user and show the screen matching their state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Banned`] for banned users, or a store error.
    pub async fn start(&self, id: UserId) -> Result<Notice, SessionError> {
        let _held = self.locks.lock(id).await;
        self.ensure_not_banned(id).await?;
        let user = self
            .store
            .upsert_user(id, &UserPatch::default().touched(Utc::now()))
            .await?;
        Ok(self.screen_for(&user, Notice::Welcome))
    }

    /// "Back to menu" button: no state change.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Banned`] for banned users, or a store error.
    pub async fn main_menu(&self, id: UserId) -> Result<Notice, SessionError> {
        let _held = self.locks.lock(id).await;
        self.ensure_not_banned(id).await?;
        let user = self.load_or_create(id).await?;
        Ok(self.screen_for(&user, Notice::MainMenu))
    }

    /// Caller must hold `user`'s lock: a match may not commit between the
    /// read of `user` and the re-enqueue.
    fn screen_for(&self, user: &User, idle: Notice) -> Notice {
        match user.state {
            SessionState::Menu => idle,
            SessionState::Searching => {
                // The queue is in-memory; make sure a persisted search is live.
                self.queue.enqueue(user.id);
                Notice::AlreadySearching
            }
            SessionState::Chatting => Notice::StillChatting,
            SessionState::Reporting => Notice::ReportPrompt,
        }
    }

    /// The rules screen.
    pub fn rules(&self) -> Notice {
        Notice::Rules
    }

    /// The user's own id.
    pub fn my_id(&self, id: UserId) -> Notice {
        Notice::YourId(id)
    }

    // -----------------------------------------------------------------------
    // Searching
    // -----------------------------------------------------------------------

    /// Menu → Searching.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Banned`], [`SessionError::InvalidTransition`]
    /// while in a session, or a store error (the user is then not queued).
    pub async fn request_search(&self, id: UserId) -> Result<Notice, SessionError> {
        // Bans are enforced under this lock, so check under it too.
        let _held = self.locks.lock(id).await;
        self.ensure_not_banned(id).await?;
        let user = self.load_or_create(id).await?;
        match user.state {
            SessionState::Menu => {
                self.store
                    .upsert_user(id, &UserPatch::to_searching(Utc::now()))
                    .await?;
                self.queue.enqueue(id);
                info!(user = %id, queued = self.queue.len(), "search started");
                Ok(Notice::Searching)
            }
            SessionState::Searching => {
                self.queue.enqueue(id);
                Ok(Notice::AlreadySearching)
            }
            state @ (SessionState::Chatting | SessionState::Reporting) => {
                Err(SessionError::InvalidTransition {
                    state,
                    event: "search",
                })
            }
        }
    }

    /// Searching → Menu.
    ///
    /// Cancelling from the menu is a no-op that still succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] if a match already
    /// committed, or a store error (the user then stays queued).
    pub async fn cancel_search(&self, id: UserId) -> Result<Notice, SessionError> {
        let _held = self.locks.lock(id).await;
        let user = self.load_or_create(id).await?;
        match user.state {
            SessionState::Searching => {
                self.queue.dequeue(id);
                if let Err(e) = self
                    .store
                    .upsert_user(id, &UserPatch::to_menu(Utc::now()))
                    .await
                {
                    self.queue.enqueue(id);
                    return Err(e.into());
                }
                info!(user = %id, "search cancelled");
                Ok(Notice::SearchCancelled)
            }
            SessionState::Menu => {
                self.queue.dequeue(id);
                Ok(Notice::SearchCancelled)
            }
            state => Err(SessionError::InvalidTransition {
                state,
                event: "cancel search",
            }),
        }
    }

    /// Commit a candidate pair drawn from the queue.
    ///
    /// Both users are re-read under both locks; the match commits only if
    /// both are still searching, unpartnered and not banned. Otherwise every
    /// side that is still eligible goes back into the queue and the pairing
    /// is dropped silently.
    ///
    /// # Errors
    ///
    /// Returns a store error if the commit failed; both users are then
    /// re-enqueued if still searching.
    pub async fn commit_match(&self, a: UserId, b: UserId) -> Result<MatchOutcome, SessionError> {
        {
            let _held = self.locks.lock_pair(a, b).await;
            let now = Utc::now();
            let a_ok = self.still_searching(a, now).await;
            let b_ok = self.still_searching(b, now).await;

            match (a_ok, b_ok) {
                (Ok(true), Ok(true)) if a != b => {
                    let patches = [
                        (a, UserPatch::to_chat(b, now)),
                        (b, UserPatch::to_chat(a, now)),
                    ];
                    if let Err(e) = self.store.update_users(&patches).await {
                        error!(a = %a, b = %b, error = %e, "match commit failed, requeueing");
                        self.queue.enqueue(a);
                        self.queue.enqueue(b);
                        return Err(e.into());
                    }
                    // Neither may linger in the queue once paired.
                    self.queue.dequeue(a);
                    self.queue.dequeue(b);
                }
                (a_ok, b_ok) => {
                    let mut requeued = Vec::new();
                    for (id, ok) in [(a, a_ok), (b, b_ok)] {
                        match ok {
                            Ok(true) => {
                                self.queue.enqueue(id);
                                requeued.push(id);
                            }
                            Ok(false) => {}
                            Err(e) => {
                                // Unknown state: keep waiting rather than drop.
                                warn!(user = %id, error = %e, "eligibility check failed");
                                self.queue.enqueue(id);
                                requeued.push(id);
                            }
                        }
                    }
                    debug!(a = %a, b = %b, ?requeued, "stale pair abandoned");
                    return Ok(MatchOutcome::Abandoned { requeued });
                }
            }
        }

        info!(a = %a, b = %b, "users matched");
        self.notify(a, Notice::Matched).await;
        self.notify(b, Notice::Matched).await;
        Ok(MatchOutcome::Paired(a, b))
    }

    async fn still_searching(&self, id: UserId, now: DateTime<Utc>) -> Result<bool, SessionError> {
        let Some(user) = self.store.get_user(id).await? else {
            return Ok(false);
        };
        if user.state != SessionState::Searching || user.partner_id.is_some() {
            return Ok(false);
        }
        Ok(self.store.active_ban(id, now).await?.is_none())
    }

    /// Return users searching for longer than `timeout` to the menu.
    ///
    /// Returns how many searches expired.
    ///
    /// # Errors
    ///
    /// Returns a store error if the searching users cannot be listed.
    pub async fn expire_searches(&self, timeout: Duration) -> Result<usize, SessionError> {
        let now = Utc::now();
        let cutoff = now.checked_sub_signed(timeout).unwrap_or(now);
        let mut expired = 0usize;
        for candidate in self.store.users_in_state(SessionState::Searching).await? {
            if candidate.last_active > cutoff {
                continue;
            }
            {
                let _held = self.locks.lock(candidate.id).await;
                let current = self.store.get_user(candidate.id).await?;
                let still_stale = current.is_some_and(|u| {
                    u.state == SessionState::Searching && u.last_active <= cutoff
                });
                if !still_stale {
                    continue;
                }
                self.queue.dequeue(candidate.id);
                if let Err(e) = self
                    .store
                    .upsert_user(candidate.id, &UserPatch::to_menu(now))
                    .await
                {
                    warn!(user = %candidate.id, error = %e, "failed to expire search");
                    self.queue.enqueue(candidate.id);
                    continue;
                }
            }
            expired = expired.saturating_add(1);
            self.notify(candidate.id, Notice::NobodyFound).await;
        }
        if expired > 0 {
            info!(expired, "searches timed out");
        }
        Ok(expired)
    }

    // -----------------------------------------------------------------------
    // Chatting
    // -----------------------------------------------------------------------

    /// Chatting → Menu; the partner is freed and told.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] outside a chat, or a store
    /// error (nothing changed).
    pub async fn stop(&self, id: UserId) -> Result<Notice, SessionError> {
        self.ensure_not_banned(id).await?;
        let freed = {
            let (_held, user) = self.lock_with_partner(id).await?;
            if user.state != SessionState::Chatting {
                return Err(SessionError::InvalidTransition {
                    state: user.state,
                    event: "stop",
                });
            }
            self.end_session(&user, SessionState::Menu, SessionEndReason::Stopped)
                .await?
        };
        if let Some(partner) = freed {
            self.notify(partner, Notice::PartnerLeft).await;
        }
        Ok(Notice::ChatEnded)
    }

    /// Chatting → Searching; the partner is freed and told.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] outside a chat, or a store
    /// error (nothing changed).
    pub async fn next(&self, id: UserId) -> Result<Notice, SessionError> {
        self.ensure_not_banned(id).await?;
        let freed = {
            let (_held, user) = self.lock_with_partner(id).await?;
            if user.state != SessionState::Chatting {
                return Err(SessionError::InvalidTransition {
                    state: user.state,
                    event: "next",
                });
            }
            self.end_session(&user, SessionState::Searching, SessionEndReason::Skipped)
                .await?
        };
        if let Some(partner) = freed {
            self.notify(partner, Notice::PartnerLeft).await;
        }
        Ok(Notice::Searching)
    }

    /// Chatting → Reporting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] outside a chat,
    /// [`SessionError::NoPartner`] if the link was stale, or a store error.
    pub async fn request_report(&self, id: UserId) -> Result<Notice, SessionError> {
        self.ensure_not_banned(id).await?;
        {
            let _held = self.locks.lock(id).await;
            let user = self.load_or_create(id).await?;
            if user.state != SessionState::Chatting {
                return Err(SessionError::InvalidTransition {
                    state: user.state,
                    event: "report",
                });
            }
            if user.partner_id.is_some() {
                self.store
                    .upsert_user(
                        id,
                        &UserPatch::default()
                            .state(SessionState::Reporting)
                            .touched(Utc::now()),
                    )
                    .await?;
                return Ok(Notice::ReportPrompt);
            }
        }
        self.repair_stale_link(id).await?;
        Err(SessionError::NoPartner)
    }

    /// Reporting → Chatting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] if not reporting, or a
    /// store error.
    pub async fn cancel_report(&self, id: UserId) -> Result<Notice, SessionError> {
        self.ensure_not_banned(id).await?;
        let _held = self.locks.lock(id).await;
        let user = self.load_or_create(id).await?;
        if user.state != SessionState::Reporting {
            return Err(SessionError::InvalidTransition {
                state: user.state,
                event: "cancel report",
            });
        }
        self.store
            .upsert_user(
                id,
                &UserPatch::default()
                    .state(SessionState::Chatting)
                    .touched(Utc::now()),
            )
            .await?;
        Ok(Notice::ReportCancelled)
    }

    /// Reporting → Menu: file the report, end the session, evaluate bans.
    ///
    /// An invalid reason leaves the user in `Reporting` so they can retry.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] if not reporting,
    /// [`SessionError::Policy`] for a rejected reason, or a store error.
    pub async fn submit_report(&self, id: UserId, reason: &str) -> Result<Notice, SessionError> {
        self.ensure_not_banned(id).await?;
        let (reported, freed) = {
            let (_held, user) = self.lock_with_partner(id).await?;
            if user.state != SessionState::Reporting {
                return Err(SessionError::InvalidTransition {
                    state: user.state,
                    event: "submit report",
                });
            }
            let Some(reported) = user.partner_id else {
                self.store.upsert_user(id, &UserPatch::to_menu(Utc::now())).await?;
                return Err(SessionError::NoPartner);
            };
            let teardown = self.plan_teardown(&user, SessionState::Menu).await?;
            self.policy
                .file_report(id, reported, reason, &teardown.patches)
                .await?;
            self.finish_teardown(&user, &teardown, SessionEndReason::Reported).await;
            (reported, teardown.freed)
        };

        if let Some(partner) = freed {
            self.notify(partner, Notice::PartnerLeft).await;
        }

        let banned = match self.policy.maybe_auto_ban(reported).await {
            Ok(Some(ban)) => {
                if let Err(e) = self.enforce_ban(reported, ban.until).await {
                    error!(user = %reported, error = %e, "failed to enforce auto-ban");
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(user = %reported, error = %e, "auto-ban evaluation failed");
                false
            }
        };

        let total = self.policy.count_reports(reported).await.unwrap_or(0);
        self.notify(
            self.gate.moderator(),
            Notice::ReportAlert {
                reporter: id,
                reported,
                total,
                banned,
            },
        )
        .await;

        Ok(Notice::ReportFiled)
    }

    // -----------------------------------------------------------------------
    // Free text and media
    // -----------------------------------------------------------------------

    /// Route a non-command message according to the sender's state.
    ///
    /// Returns the notice to show the sender, if any (a successful relay
    /// shows nothing).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Banned`], [`SessionError::NoPartner`] for a
    /// broken session, report validation errors, or store errors.
    pub async fn handle_message(
        &self,
        id: UserId,
        payload: Payload,
    ) -> Result<Option<Notice>, SessionError> {
        self.ensure_not_banned(id).await?;
        let user = self.load_or_create(id).await?;
        match user.state {
            SessionState::Chatting => self.relay(&user, payload).await,
            SessionState::Reporting => match payload {
                Payload::Text(reason) => self.submit_report(id, &reason).await.map(Some),
                Payload::Media { .. } => Ok(Some(Notice::TextRequired)),
            },
            SessionState::Menu | SessionState::Searching => Ok(Some(Notice::NotInChat)),
        }
    }

    // -----------------------------------------------------------------------
    // Startup recovery
    // -----------------------------------------------------------------------

    /// Rebuild in-memory state after a restart.
    ///
    /// Persisted searches are re-enqueued (banned ones reset to the menu)
    /// and one-sided partner links left by a crash are cleared.
    ///
    /// # Errors
    ///
    /// Returns a store error if the users cannot be listed.
    pub async fn recover(&self) -> Result<RecoverySummary, SessionError> {
        let now = Utc::now();
        let mut summary = RecoverySummary::default();

        for user in self.store.users_in_state(SessionState::Searching).await? {
            if self.store.active_ban(user.id, now).await?.is_some() {
                self.store.upsert_user(user.id, &UserPatch::to_menu(now)).await?;
                summary.reset = summary.reset.saturating_add(1);
            } else if self.queue.enqueue(user.id) {
                summary.requeued = summary.requeued.saturating_add(1);
            }
        }

        for state in [SessionState::Chatting, SessionState::Reporting] {
            for user in self.store.users_in_state(state).await? {
                if self.repair_stale_link(user.id).await? {
                    summary.repaired = summary.repaired.saturating_add(1);
                }
            }
        }

        info!(
            requeued = summary.requeued,
            reset = summary.reset,
            repaired = summary.repaired,
            "session state recovered"
        );
        Ok(summary)
    }
}
