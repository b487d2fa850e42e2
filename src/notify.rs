//! Outbound effects emitted by the session engine.
//!
//! The engine never formats text or talks to Telegram directly. It produces
//! [`Notice`]s and relay payloads addressed to a user and hands them to a
//! [`Notifier`]. The Telegram adapter renders notices to HTML and keyboards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Payload, UserId};

/// Something the bot tells a user, independent of wording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Greeting with the main menu.
    Welcome,
    /// Plain main menu.
    MainMenu,
    /// The rules screen.
    Rules,
    /// The user's own id.
    YourId(UserId),
    /// Now waiting for a partner.
    Searching,
    /// Already waiting; nothing changed.
    AlreadySearching,
    /// Search cancelled.
    SearchCancelled,
    /// Nobody turned up before the search timeout.
    NobodyFound,
    /// A partner was found.
    Matched,
    /// Still in a session; chat keyboard re-shown.
    StillChatting,
    /// The user ended the chat.
    ChatEnded,
    /// The partner ended the chat or moved on.
    PartnerLeft,
    /// Asking for a report reason.
    ReportPrompt,
    /// Report reason entry abandoned; back in the chat.
    ReportCancelled,
    /// Report accepted and chat ended.
    ReportFiled,
    /// The user is banned. `until = None` means permanently.
    Banned {
        /// Ban expiry.
        until: Option<DateTime<Utc>>,
    },
    /// Not in a chat, so the message went nowhere.
    NotInChat,
    /// The partner is busy filing a report; message not delivered.
    PartnerBusy,
    /// The message could not be delivered to the partner.
    DeliveryFailed,
    /// Only text is accepted here (e.g. report reasons).
    TextRequired,
    /// Moderator alert about a new report.
    ReportAlert {
        /// Who complained.
        reporter: UserId,
        /// Who was reported.
        reported: UserId,
        /// Reports against `reported` so far.
        total: u64,
        /// Whether this report triggered a ban.
        banned: bool,
    },
}

/// Content of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// A bot notice.
    Notice(Notice),
    /// A partner's message being relayed.
    Relay {
        /// Original sender (the source chat for media copies).
        from: UserId,
        /// What is relayed.
        payload: Payload,
    },
}

/// A message addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Recipient.
    pub user_id: UserId,
    /// Content.
    pub body: Body,
}

impl Outbound {
    /// A notice for `user_id`.
    pub fn notice(user_id: UserId, notice: Notice) -> Self {
        Self {
            user_id,
            body: Body::Notice(notice),
        }
    }

    /// A relayed payload from `from` to `user_id`.
    pub fn relay(user_id: UserId, from: UserId, payload: Payload) -> Self {
        Self {
            user_id,
            body: Body::Relay { from, payload },
        }
    }
}

/// Delivery failed at the transport.
#[derive(Debug, thiserror::Error)]
#[error("delivery to {user_id} failed: {reason}")]
pub struct DeliveryError {
    /// Intended recipient.
    pub user_id: UserId,
    /// Transport-specific description.
    pub reason: String,
}

/// Outbound messaging transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the transport rejected or lost the message.
    async fn deliver(&self, msg: Outbound) -> Result<(), DeliveryError>;
}
