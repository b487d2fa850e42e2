//! Tests for `telegram::commands` parsing and formatting.

use chrono::Utc;

use tetatet::store::UnbanSummary;
use tetatet::telegram::commands::{
    format_ban, format_profile, format_reports, format_stats, format_unban, handle_help,
    parse_ban_duration, parse_command, parse_target, Command, DEFAULT_REPORTS_LISTED,
};
use tetatet::types::{Ban, BanDuration, Report, SessionState, Stats, User, UserId, UserProfile};

#[test]
fn plain_text_is_not_a_command() {
    assert_eq!(parse_command("hello"), None);
    assert_eq!(parse_command(""), None);
}

#[test]
fn user_commands_parse() {
    assert_eq!(parse_command("/start"), Some(Command::Start));
    assert_eq!(parse_command("/help"), Some(Command::Help));
    assert_eq!(parse_command("/search"), Some(Command::Search));
    assert_eq!(parse_command("  /stop  "), Some(Command::Stop));
    assert_eq!(parse_command("/next@tetatet_bot"), Some(Command::Next));
    assert_eq!(
        parse_command("/dance"),
        Some(Command::Unknown("dance".to_owned()))
    );
}

#[test]
fn moderator_commands_parse() {
    assert_eq!(
        parse_command("/mod hunter2"),
        Some(Command::Panel {
            secret: Some("hunter2".to_owned())
        })
    );
    assert_eq!(parse_command("/mod"), Some(Command::Panel { secret: None }));
    assert_eq!(
        parse_command("/ban 42 perm"),
        Some(Command::Ban {
            target: Some(UserId(42)),
            duration: Some(BanDuration::Permanent),
        })
    );
    assert_eq!(
        parse_command("/ban 42"),
        Some(Command::Ban {
            target: Some(UserId(42)),
            duration: None,
        })
    );
    assert_eq!(
        parse_command("/ban"),
        Some(Command::Ban {
            target: None,
            duration: None,
        })
    );
    assert_eq!(
        parse_command("/unban 7"),
        Some(Command::Unban {
            target: Some(UserId(7))
        })
    );
    assert_eq!(
        parse_command("/user"),
        Some(Command::Lookup { target: None })
    );
    assert_eq!(
        parse_command("/reports"),
        Some(Command::Reports {
            limit: DEFAULT_REPORTS_LISTED
        })
    );
    assert_eq!(
        parse_command("/reports 5"),
        Some(Command::Reports { limit: 5 })
    );
}

#[test]
fn malformed_arguments_yield_usage() {
    for text in ["/ban bob", "/ban 42 soon", "/unban x", "/user ?", "/reports 0"] {
        match parse_command(text) {
            Some(Command::Usage(usage)) => assert!(usage.starts_with("Usage:"), "{text}"),
            other => panic!("{text} should yield usage, got {other:?}"),
        }
    }
}

#[test]
fn moderator_only_classification() {
    assert!(parse_command("/stats").expect("cmd").is_moderator_only());
    assert!(parse_command("/ban 1").expect("cmd").is_moderator_only());
    assert!(!parse_command("/start").expect("cmd").is_moderator_only());
    assert!(!parse_command("/next").expect("cmd").is_moderator_only());
}

#[test]
fn ban_durations() {
    assert_eq!(parse_ban_duration("perm"), Some(BanDuration::Permanent));
    assert_eq!(parse_ban_duration("FOREVER"), Some(BanDuration::Permanent));
    assert_eq!(parse_ban_duration("48"), Some(BanDuration::hours(48)));
    assert_eq!(parse_ban_duration("12h"), Some(BanDuration::hours(12)));
    assert_eq!(parse_ban_duration("0"), None);
    assert_eq!(parse_ban_duration("-3"), None);
}

#[test]
fn prompt_replies_parse_ids() {
    assert_eq!(parse_target(" 123 "), Some(UserId(123)));
    assert_eq!(parse_target("abc"), None);
}

#[test]
fn help_lists_user_commands() {
    let help = handle_help();
    for cmd in ["/start", "/search", "/stop", "/next", "/help"] {
        assert!(help.contains(cmd), "{cmd} missing");
    }
    assert!(!help.contains("/ban"));
}

#[test]
fn stats_render_every_figure() {
    let stats = Stats {
        total_users: 10,
        active_chats: 2,
        searching: 1,
        total_reports: 4,
        active_bans: 1,
        completed_sessions: 6,
        avg_session_secs: Some(3725),
    };
    let text = format_stats(&stats);
    assert!(text.contains("Users: 10"));
    assert!(text.contains("Active chats: 2"));
    assert!(text.contains("Average chat: 1h 2m 5s"));

    let empty = format_stats(&Stats {
        avg_session_secs: None,
        ..stats
    });
    assert!(empty.contains("Average chat: n/a"));
}

#[test]
fn reports_escape_reasons() {
    assert_eq!(format_reports(&[]), "No reports.");
    let report = Report {
        id: 3,
        reporter_id: UserId(1),
        reported_id: UserId(2),
        reason: "<script>".to_owned(),
        created_at: Utc::now(),
    };
    let text = format_reports(&[report]);
    assert!(text.contains("#3"));
    assert!(text.contains("&lt;script&gt;"));
    assert!(!text.contains("<script>"));
}

#[test]
fn profile_shows_state_and_partner() {
    let now = Utc::now();
    let mut user = User::new(UserId(5), now);
    user.state = SessionState::Chatting;
    user.partner_id = Some(UserId(6));
    let profile = UserProfile {
        id: UserId(5),
        user: Some(user),
        reports: 2,
        ban: None,
    };
    let text = format_profile(&profile);
    assert!(text.contains("<code>5</code>"));
    assert!(text.contains("Reports: 2"));
    assert!(text.contains("Banned: no"));
    assert!(text.contains("Partner: <code>6</code>"));

    let unknown = format_profile(&UserProfile {
        id: UserId(9),
        user: None,
        reports: 0,
        ban: Some(Ban {
            user_id: UserId(9),
            until: None,
            created_at: now,
        }),
    });
    assert!(unknown.contains("State: unknown"));
    assert!(unknown.contains("Banned: yes, permanently"));
}

#[test]
fn ban_and_unban_replies() {
    let ban = Ban {
        user_id: UserId(8),
        until: None,
        created_at: Utc::now(),
    };
    assert_eq!(format_ban(&ban), "<code>8</code> banned permanently.");
    let summary = UnbanSummary {
        ban_removed: true,
        reports_purged: 3,
    };
    assert_eq!(
        format_unban(UserId(8), &summary),
        "<code>8</code> unbanned; 3 report(s) cleared."
    );
}
