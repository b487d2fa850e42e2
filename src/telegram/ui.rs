//! HTML formatting and inline keyboard helpers for Telegram messages.
//!
//! All output uses HTML parse mode (never MarkdownV2) per project convention.

use chrono::{DateTime, Utc};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::notify::Notice;
use crate::policy::PolicyError;
use crate::session::SessionError;

/// Callback data carried by inline buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start searching.
    Search,
    /// Cancel the search.
    CancelSearch,
    /// End the chat.
    Stop,
    /// End the chat and search again.
    Next,
    /// Start a report.
    Report,
    /// Abandon the report.
    CancelReport,
    /// Show the rules.
    Rules,
    /// Show the user's id.
    MyId,
    /// Back to the main menu.
    BackToMenu,
}

impl Action {
    /// Callback data string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::CancelSearch => "cancel_search",
            Self::Stop => "stop",
            Self::Next => "next",
            Self::Report => "report",
            Self::CancelReport => "cancel_report",
            Self::Rules => "rules",
            Self::MyId => "my_id",
            Self::BackToMenu => "back_to_menu",
        }
    }

    /// Parse callback data.
    pub fn parse(data: &str) -> Option<Self> {
        Some(match data {
            "search" => Self::Search,
            "cancel_search" => Self::CancelSearch,
            "stop" => Self::Stop,
            "next" => Self::Next,
            "report" => Self::Report,
            "cancel_report" => Self::CancelReport,
            "rules" => Self::Rules,
            "my_id" => Self::MyId,
            "back_to_menu" => Self::BackToMenu,
            _ => return None,
        })
    }
}

/// Escape special HTML characters in user-provided text.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn button(label: &str, action: Action) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label.to_owned(), action.as_str().to_owned())
}

/// Main menu: search, rules, my id.
pub fn main_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("\u{1F50D} Find a partner", Action::Search)],
        vec![button("Rules", Action::Rules)],
        vec![button("My ID", Action::MyId)],
    ])
}

/// Shown while searching.
pub fn searching_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("Cancel", Action::CancelSearch)]])
}

/// Shown during a chat.
pub fn chat_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("Stop", Action::Stop)],
        vec![button("Next", Action::Next)],
        vec![button("\u{26A0} Report", Action::Report)],
    ])
}

/// Shown while a report reason is expected.
pub fn reporting_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("Cancel", Action::CancelReport)]])
}

/// Single "Back" button.
pub fn back_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("Back", Action::BackToMenu)]])
}

/// Human-readable ban expiry.
pub fn format_until(until: Option<DateTime<Utc>>) -> String {
    match until {
        None => "permanently".to_owned(),
        Some(at) => format!("until {}", at.format("%Y-%m-%d %H:%M UTC")),
    }
}

/// Render a notice to HTML text and an optional keyboard.
pub fn render_notice(notice: &Notice) -> (String, Option<InlineKeyboardMarkup>) {
    match notice {
        Notice::Welcome => (
            "<b>Anonymous chat</b>\nTalk one-on-one with a random stranger. \
             Nobody sees who you are."
                .to_owned(),
            Some(main_keyboard()),
        ),
        Notice::MainMenu => ("Main menu".to_owned(), Some(main_keyboard())),
        Notice::Rules => (
            [
                "<b>Rules</b>",
                "1. Be respectful.",
                "2. No spam, ads or illegal content.",
                "3. Do not ask for or share personal data.",
                "",
                "Reported users are banned automatically.",
            ]
            .join("\n"),
            Some(back_keyboard()),
        ),
        Notice::YourId(id) => (
            format!("Your ID: <code>{id}</code>"),
            Some(back_keyboard()),
        ),
        Notice::Searching => (
            "Looking for a partner...".to_owned(),
            Some(searching_keyboard()),
        ),
        Notice::AlreadySearching => (
            "Still looking for a partner...".to_owned(),
            Some(searching_keyboard()),
        ),
        Notice::SearchCancelled => ("Search cancelled.".to_owned(), Some(main_keyboard())),
        Notice::NobodyFound => (
            "Nobody is around. Try again later.".to_owned(),
            Some(main_keyboard()),
        ),
        Notice::Matched => (
            "Partner found! Say hi.".to_owned(),
            Some(chat_keyboard()),
        ),
        Notice::StillChatting => (
            "You are still in a chat.".to_owned(),
            Some(chat_keyboard()),
        ),
        Notice::ChatEnded => ("Chat ended.".to_owned(), Some(main_keyboard())),
        Notice::PartnerLeft => (
            "Your partner ended the chat.".to_owned(),
            Some(main_keyboard()),
        ),
        Notice::ReportPrompt => (
            "Describe the problem in one short message.".to_owned(),
            Some(reporting_keyboard()),
        ),
        Notice::ReportCancelled => (
            "Report cancelled. You are back in the chat.".to_owned(),
            Some(chat_keyboard()),
        ),
        Notice::ReportFiled => (
            "Report sent. The chat has ended.".to_owned(),
            Some(main_keyboard()),
        ),
        Notice::Banned { until } => (
            format!(
                "You are banned {}. Appeal to the moderator.",
                format_until(*until)
            ),
            None,
        ),
        Notice::NotInChat => (
            "You are not in a chat. Find a partner first.".to_owned(),
            Some(main_keyboard()),
        ),
        Notice::PartnerBusy => (
            "Your partner is busy right now; the message was not delivered.".to_owned(),
            None,
        ),
        Notice::DeliveryFailed => (
            "The message could not be delivered.".to_owned(),
            None,
        ),
        Notice::TextRequired => ("Please send text.".to_owned(), Some(reporting_keyboard())),
        Notice::ReportAlert {
            reporter,
            reported,
            total,
            banned,
        } => {
            let mut text = format!(
                "<b>Report</b>: <code>{reporter}</code> \u{2192} <code>{reported}</code> (total: {total})"
            );
            if *banned {
                text.push_str("\nAuto-ban applied.");
            }
            (text, None)
        }
    }
}

/// Render an engine error shown to the acting user.
pub fn render_error(error: &SessionError) -> (String, Option<InlineKeyboardMarkup>) {
    match error {
        SessionError::Banned { until } => render_notice(&Notice::Banned { until: *until }),
        SessionError::InvalidTransition { .. } => (
            "That is not available right now.".to_owned(),
            Some(main_keyboard()),
        ),
        SessionError::NoPartner => (
            "You have no partner. Find a new one.".to_owned(),
            Some(main_keyboard()),
        ),
        SessionError::Contended => ("Please try again.".to_owned(), None),
        SessionError::Unauthorized => ("Not allowed.".to_owned(), None),
        SessionError::Policy(PolicyError::ReasonLength { max, .. }) => (
            format!("The reason must be 1 to {max} characters. Try again."),
            Some(reporting_keyboard()),
        ),
        SessionError::Policy(PolicyError::ModeratorExempt) => {
            ("The moderator cannot be banned.".to_owned(), None)
        }
        SessionError::Policy(PolicyError::SelfReport) => {
            ("You cannot report yourself.".to_owned(), None)
        }
        SessionError::Policy(PolicyError::Store(_)) | SessionError::Store(_) => (
            "Something went wrong. Please try again.".to_owned(),
            None,
        ),
    }
}
