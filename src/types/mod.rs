//! Core domain types shared by the store, the pairing queue and the session engine.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stable opaque identity of a chat participant (the Telegram user id).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(UserId)
    }
}

/// A persisted enum column held a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field} value: {value:?}")]
pub struct UnknownVariant {
    /// Which field contained the bad value.
    pub field: &'static str,
    /// The unexpected value.
    pub value: String,
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Where a user currently is in the conversation state machine.
///
/// Bans are not a state: they live in their own table and are checked
/// before any transition is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Idle, looking at the main menu.
    Menu,
    /// Waiting in the pairing queue.
    Searching,
    /// Paired with a partner and relaying messages.
    Chatting,
    /// Paired, but currently typing a report reason about the partner.
    Reporting,
}

impl SessionState {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Menu => "menu",
            Self::Searching => "searching",
            Self::Chatting => "chat",
            Self::Reporting => "reporting",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised state.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "menu" => Ok(Self::Menu),
            "searching" => Ok(Self::Searching),
            "chat" => Ok(Self::Chatting),
            "reporting" => Ok(Self::Reporting),
            other => Err(UnknownVariant {
                field: "state",
                value: other.to_owned(),
            }),
        }
    }

    /// Whether the state implies a live partner link.
    pub fn in_session(&self) -> bool {
        matches!(self, Self::Chatting | Self::Reporting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Moderator sub-flow awaiting a typed argument.
///
/// Kept apart from [`SessionState`] so that a prompt such as "send the id to
/// ban" never masquerades as a chat state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAdminInput {
    /// Next text is the id of a user to ban.
    BanTarget,
    /// Next text is the id of a user to unban.
    UnbanTarget,
    /// Next text is the id of a user to look up.
    LookupTarget,
}

impl PendingAdminInput {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BanTarget => "ban_target",
            Self::UnbanTarget => "unban_target",
            Self::LookupTarget => "lookup_target",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised prompt.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "ban_target" => Ok(Self::BanTarget),
            "unban_target" => Ok(Self::UnbanTarget),
            "lookup_target" => Ok(Self::LookupTarget),
            other => Err(UnknownVariant {
                field: "pending_admin",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// User record
// ---------------------------------------------------------------------------

/// Durable per-user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identity.
    pub id: UserId,
    /// Current state machine position.
    pub state: SessionState,
    /// Partner while in a session; must be reciprocal.
    pub partner_id: Option<UserId>,
    /// When the current session started.
    pub chat_start: Option<DateTime<Utc>>,
    /// Last state change or relayed message.
    pub last_active: DateTime<Utc>,
    /// Moderator prompt awaiting input, if any.
    pub pending_admin: Option<PendingAdminInput>,
    /// First contact.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A fresh record for a user seen for the first time.
    pub fn new(id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: SessionState::Menu,
            partner_id: None,
            chat_start: None,
            last_active: now,
            pending_admin: None,
            created_at: now,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &UserPatch) {
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(partner) = patch.partner_id {
            self.partner_id = partner;
        }
        if let Some(start) = patch.chat_start {
            self.chat_start = start;
        }
        if let Some(at) = patch.last_active {
            self.last_active = at;
        }
        if let Some(pending) = patch.pending_admin {
            self.pending_admin = pending;
        }
    }

    /// Whether this user's partner link points at `other`.
    pub fn is_partnered_with(&self, other: UserId) -> bool {
        self.partner_id == Some(other)
    }
}

/// Partial update for a [`User`]. `None` leaves a field untouched; for
/// nullable columns `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    /// New state.
    pub state: Option<SessionState>,
    /// New partner link.
    pub partner_id: Option<Option<UserId>>,
    /// New session start.
    pub chat_start: Option<Option<DateTime<Utc>>>,
    /// New activity timestamp.
    pub last_active: Option<DateTime<Utc>>,
    /// New moderator prompt.
    pub pending_admin: Option<Option<PendingAdminInput>>,
}

impl UserPatch {
    /// Set the state.
    #[must_use]
    pub fn state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    /// Set or clear the partner link.
    #[must_use]
    pub fn partner(mut self, partner: Option<UserId>) -> Self {
        self.partner_id = Some(partner);
        self
    }

    /// Set or clear the session start.
    #[must_use]
    pub fn chat_start(mut self, start: Option<DateTime<Utc>>) -> Self {
        self.chat_start = Some(start);
        self
    }

    /// Bump the activity timestamp.
    #[must_use]
    pub fn touched(mut self, at: DateTime<Utc>) -> Self {
        self.last_active = Some(at);
        self
    }

    /// Set or clear the moderator prompt.
    #[must_use]
    pub fn pending_admin(mut self, pending: Option<PendingAdminInput>) -> Self {
        self.pending_admin = Some(pending);
        self
    }

    /// Leave any session and return to the menu.
    pub fn to_menu(now: DateTime<Utc>) -> Self {
        Self::default()
            .state(SessionState::Menu)
            .partner(None)
            .chat_start(None)
            .touched(now)
    }

    /// Leave any session and wait in the queue.
    pub fn to_searching(now: DateTime<Utc>) -> Self {
        Self::default()
            .state(SessionState::Searching)
            .partner(None)
            .chat_start(None)
            .touched(now)
    }

    /// Enter a session with `partner`.
    pub fn to_chat(partner: UserId, now: DateTime<Utc>) -> Self {
        Self::default()
            .state(SessionState::Chatting)
            .partner(Some(partner))
            .chat_start(Some(now))
            .touched(now)
    }
}

// ---------------------------------------------------------------------------
// Bans and reports
// ---------------------------------------------------------------------------

/// How long a ban lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanDuration {
    /// Expires after the given span.
    Temporary(Duration),
    /// Never expires.
    Permanent,
}

impl BanDuration {
    /// Temporary ban of `hours` hours.
    pub fn hours(hours: u32) -> Self {
        Self::Temporary(Duration::hours(i64::from(hours)))
    }

    /// Expiry timestamp relative to `now` (`None` = permanent).
    ///
    /// A span past chrono's range never expires.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Temporary(span) => now.checked_add_signed(*span),
            Self::Permanent => None,
        }
    }
}

/// An active or historical ban row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    /// Banned user.
    pub user_id: UserId,
    /// Expiry; `None` means permanent.
    pub until: Option<DateTime<Utc>>,
    /// When the ban was (last) applied.
    pub created_at: DateTime<Utc>,
}

impl Ban {
    /// Whether the ban never expires.
    pub fn is_permanent(&self) -> bool {
        self.until.is_none()
    }
}

/// Append-only complaint about a partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Row id.
    pub id: i64,
    /// Who complained.
    pub reporter_id: UserId,
    /// Who was reported.
    pub reported_id: UserId,
    /// Free-text reason.
    pub reason: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sessions and statistics
// ---------------------------------------------------------------------------

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEndReason {
    /// One side pressed stop.
    Stopped,
    /// One side moved on to the next partner.
    Skipped,
    /// One side filed a report.
    Reported,
    /// One side was banned mid-session.
    Banned,
    /// The link was found broken and repaired.
    Repaired,
}

impl SessionEndReason {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Skipped => "skipped",
            Self::Reported => "reported",
            Self::Banned => "banned",
            Self::Repaired => "repaired",
        }
    }
}

/// A finished session, kept for duration statistics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    /// Side that ended the session.
    pub ended_by: UserId,
    /// The other side.
    pub partner: UserId,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Session end.
    pub ended_at: DateTime<Utc>,
    /// How it ended.
    pub reason: SessionEndReason,
}

/// Aggregate figures for the moderator panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Users ever seen.
    pub total_users: u64,
    /// Live sessions (pairs).
    pub active_chats: u64,
    /// Users waiting in the queue.
    pub searching: u64,
    /// Reports on file.
    pub total_reports: u64,
    /// Bans currently in force.
    pub active_bans: u64,
    /// Sessions that have ended.
    pub completed_sessions: u64,
    /// Mean length of ended sessions in seconds.
    pub avg_session_secs: Option<u64>,
}

/// Everything the moderator sees about one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Looked-up id.
    pub id: UserId,
    /// Record, if the user ever contacted the bot.
    pub user: Option<User>,
    /// Reports against the user.
    pub reports: u64,
    /// Ban in force, if any.
    pub ban: Option<Ban>,
}

// ---------------------------------------------------------------------------
// Relay payloads
// ---------------------------------------------------------------------------

/// Kind of non-text message being relayed (for logging and rendering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Photo.
    Photo,
    /// Video clip.
    Video,
    /// Voice note.
    Voice,
    /// Round video note.
    VideoNote,
    /// Sticker.
    Sticker,
    /// GIF animation.
    Animation,
    /// Audio file.
    Audio,
    /// Arbitrary document.
    Document,
}

impl MediaKind {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Voice => "voice",
            Self::VideoNote => "video_note",
            Self::Sticker => "sticker",
            Self::Animation => "animation",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// Content forwarded from one participant to the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Plain text.
    Text(String),
    /// Reference to a media message in the sender's chat; relayed as a copy.
    Media {
        /// Message id in the sender's private chat with the bot.
        message_id: i32,
        /// What kind of media it is.
        kind: MediaKind,
    },
}
