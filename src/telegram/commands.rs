//! Telegram slash command parsing and reply formatting.
//!
//! Parsing is pure; the dispatcher in the parent module runs the parsed
//! command against the session engine and formats the result with the
//! helpers here. All output uses HTML parse mode per project convention.

use crate::store::UnbanSummary;
use crate::telegram::ui::{escape_html, format_until};
use crate::types::{Ban, BanDuration, PendingAdminInput, Report, Stats, UserId, UserProfile};

/// Default number of reports listed by `/reports`.
pub const DEFAULT_REPORTS_LISTED: usize = 10;

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start`
    Start,
    /// `/help`
    Help,
    /// `/search`
    Search,
    /// `/stop`: ends a chat or cancels a search.
    Stop,
    /// `/next`
    Next,
    /// `/mod [secret]`
    Panel {
        /// Secret presented to unlock the moderator commands.
        secret: Option<String>,
    },
    /// `/stats`
    Stats,
    /// `/ban [id] [hours|perm]`
    Ban {
        /// Target; `None` prompts for it.
        target: Option<UserId>,
        /// Duration; `None` uses the configured default.
        duration: Option<BanDuration>,
    },
    /// `/unban [id]`
    Unban {
        /// Target; `None` prompts for it.
        target: Option<UserId>,
    },
    /// `/user [id]`
    Lookup {
        /// Target; `None` prompts for it.
        target: Option<UserId>,
    },
    /// `/reports [n]`
    Reports {
        /// How many to list.
        limit: usize,
    },
    /// A known command with malformed arguments.
    Usage(&'static str),
    /// Anything else.
    Unknown(String),
}

impl Command {
    /// Whether this command belongs to the moderator surface.
    pub fn is_moderator_only(&self) -> bool {
        matches!(
            self,
            Self::Panel { .. }
                | Self::Stats
                | Self::Ban { .. }
                | Self::Unban { .. }
                | Self::Lookup { .. }
                | Self::Reports { .. }
        )
    }
}

/// Parse a message starting with `/`. Returns `None` for anything else.
pub fn parse_command(text: &str) -> Option<Command> {
    let without_slash = text.trim().strip_prefix('/')?;
    let (full_command, args) = match without_slash.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (without_slash, ""),
    };
    // Strip @bot_name suffix if present
    let command = full_command.split('@').next().unwrap_or(full_command);
    let mut words = args.split_whitespace();

    Some(match command {
        "start" => Command::Start,
        "help" => Command::Help,
        "search" => Command::Search,
        "stop" => Command::Stop,
        "next" => Command::Next,
        "mod" => Command::Panel {
            secret: words.next().map(str::to_owned),
        },
        "stats" => Command::Stats,
        "ban" => {
            let target = match words.next().map(str::parse::<UserId>) {
                None => None,
                Some(Ok(id)) => Some(id),
                Some(Err(_)) => return Some(Command::Usage(BAN_USAGE)),
            };
            let duration = match words.next() {
                None => None,
                Some(arg) => match parse_ban_duration(arg) {
                    Some(d) => Some(d),
                    None => return Some(Command::Usage(BAN_USAGE)),
                },
            };
            Command::Ban { target, duration }
        }
        "unban" => match parse_optional_id(words.next()) {
            Ok(target) => Command::Unban { target },
            Err(()) => Command::Usage(UNBAN_USAGE),
        },
        "user" => match parse_optional_id(words.next()) {
            Ok(target) => Command::Lookup { target },
            Err(()) => Command::Usage(USER_USAGE),
        },
        "reports" => match words.next() {
            None => Command::Reports {
                limit: DEFAULT_REPORTS_LISTED,
            },
            Some(n) => match n.parse::<usize>() {
                Ok(limit) if limit > 0 => Command::Reports { limit },
                _ => Command::Usage(REPORTS_USAGE),
            },
        },
        other => Command::Unknown(other.to_owned()),
    })
}

const BAN_USAGE: &str = "Usage: /ban &lt;id&gt; [hours|perm]";
const UNBAN_USAGE: &str = "Usage: /unban &lt;id&gt;";
const USER_USAGE: &str = "Usage: /user &lt;id&gt;";
const REPORTS_USAGE: &str = "Usage: /reports [n]";

fn parse_optional_id(arg: Option<&str>) -> Result<Option<UserId>, ()> {
    match arg {
        None => Ok(None),
        Some(s) => s.parse::<UserId>().map(Some).map_err(|_| ()),
    }
}

/// Parse a `/ban` duration: a positive number of hours or `perm`.
pub fn parse_ban_duration(arg: &str) -> Option<BanDuration> {
    match arg.to_ascii_lowercase().as_str() {
        "perm" | "permanent" | "forever" => Some(BanDuration::Permanent),
        other => {
            let hours = other.trim_end_matches('h').parse::<u32>().ok()?;
            (hours > 0).then(|| BanDuration::hours(hours))
        }
    }
}

/// Parse a moderator's reply to an id prompt.
pub fn parse_target(text: &str) -> Option<UserId> {
    text.trim().parse().ok()
}

/// User-facing help.
pub fn handle_help() -> String {
    [
        "<b>Commands:</b>",
        "",
        "/start - main menu",
        "/search - find a partner",
        "/stop - end the chat or cancel the search",
        "/next - end the chat and find someone else",
        "/help - show this message",
    ]
    .join("\n")
}

/// Moderator panel: stats plus the command list.
pub fn format_panel(stats: &Stats) -> String {
    format!(
        "<b>Moderator panel</b>\n\n{}\n\n\
         /ban &lt;id&gt; [hours|perm] - ban\n\
         /unban &lt;id&gt; - unban and clear reports\n\
         /user &lt;id&gt; - profile\n\
         /reports [n] - latest reports\n\
         /stats - statistics",
        format_stats(stats)
    )
}

/// Aggregate statistics.
pub fn format_stats(stats: &Stats) -> String {
    let avg = match stats.avg_session_secs {
        Some(secs) => format_duration(secs),
        None => "n/a".to_owned(),
    };
    format!(
        "Users: {}\n\
         Active chats: {}\n\
         Searching: {}\n\
         Reports: {}\n\
         Active bans: {}\n\
         Finished chats: {}\n\
         Average chat: {avg}",
        stats.total_users,
        stats.active_chats,
        stats.searching,
        stats.total_reports,
        stats.active_bans,
        stats.completed_sessions,
    )
}

/// Compact `1h 2m 3s` rendering.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// `/user` reply.
pub fn format_profile(profile: &UserProfile) -> String {
    let state = profile
        .user
        .as_ref()
        .map_or("unknown", |u| u.state.as_str());
    let banned = match &profile.ban {
        Some(ban) => format!("yes, {}", format_until(ban.until)),
        None => "no".to_owned(),
    };
    let mut lines = vec![
        format!("<b>User</b> <code>{}</code>", profile.id),
        format!("State: {state}"),
        format!("Reports: {}", profile.reports),
        format!("Banned: {banned}"),
    ];
    if let Some(user) = &profile.user {
        if let Some(partner) = user.partner_id {
            lines.push(format!("Partner: <code>{partner}</code>"));
        }
        lines.push(format!(
            "First seen: {}",
            user.created_at.format("%Y-%m-%d %H:%M UTC")
        ));
        lines.push(format!(
            "Last active: {}",
            user.last_active.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    lines.join("\n")
}

/// `/reports` reply.
pub fn format_reports(reports: &[Report]) -> String {
    if reports.is_empty() {
        return "No reports.".to_owned();
    }
    let mut lines = vec![format!("<b>Latest reports ({}):</b>", reports.len())];
    for report in reports {
        lines.push(format!(
            "#{} {} <code>{}</code> \u{2192} <code>{}</code>: {}",
            report.id,
            report.created_at.format("%m-%d %H:%M"),
            report.reporter_id,
            report.reported_id,
            escape_html(&report.reason),
        ));
    }
    lines.join("\n")
}

/// `/ban` reply.
pub fn format_ban(ban: &Ban) -> String {
    format!(
        "<code>{}</code> banned {}.",
        ban.user_id,
        format_until(ban.until)
    )
}

/// `/unban` reply.
pub fn format_unban(target: UserId, summary: &UnbanSummary) -> String {
    let lifted = if summary.ban_removed {
        "unbanned"
    } else {
        "was not banned"
    };
    format!(
        "<code>{target}</code> {lifted}; {} report(s) cleared.",
        summary.reports_purged
    )
}

/// Prompt sent when a target id is missing.
pub fn prompt_for(pending: PendingAdminInput) -> &'static str {
    match pending {
        PendingAdminInput::BanTarget => "Send the id to ban.",
        PendingAdminInput::UnbanTarget => "Send the id to unban.",
        PendingAdminInput::LookupTarget => "Send the id to look up.",
    }
}
