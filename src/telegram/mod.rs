//! Telegram adapter: bot dispatcher, outbound notifier, UI formatting and
//! slash commands.
//!
//! Inbound updates are translated into [`SessionEngine`] calls; everything
//! the engine wants to tell a user comes back through [`TelegramNotifier`].

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId, ParseMode};
use tracing::{debug, info, warn};

use crate::notify::{Body, DeliveryError, Notice, Notifier, Outbound};
use crate::session::{SessionEngine, SessionError};
use crate::types::{BanDuration, MediaKind, Payload, PendingAdminInput, UserId};

use self::commands::Command;

pub mod commands;
pub mod ui;

/// Rendered reply: HTML text plus optional inline keyboard.
type Reply = (String, Option<InlineKeyboardMarkup>);

// ---------------------------------------------------------------------------
// Outbound notifier
// ---------------------------------------------------------------------------

/// [`Notifier`] that sends through the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    /// Wrap a bot handle.
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, msg: Outbound) -> Result<(), DeliveryError> {
        let chat_id = ChatId(msg.user_id.0);
        let result = match msg.body {
            Body::Notice(notice) => {
                let (text, keyboard) = ui::render_notice(&notice);
                let mut req = self
                    .bot
                    .send_message(chat_id, text)
                    .parse_mode(ParseMode::Html);
                if let Some(keyboard) = keyboard {
                    req = req.reply_markup(keyboard);
                }
                req.await.map(|_| ())
            }
            // Relayed text is sent verbatim, without parse mode.
            Body::Relay {
                payload: Payload::Text(text),
                ..
            } => self.bot.send_message(chat_id, text).await.map(|_| ()),
            Body::Relay {
                from,
                payload: Payload::Media { message_id, .. },
            } => self
                .bot
                .copy_message(chat_id, ChatId(from.0), MessageId(message_id))
                .await
                .map(|_| ()),
        };
        result.map_err(|e| DeliveryError {
            user_id: msg.user_id,
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Shared state for handler injection
// ---------------------------------------------------------------------------

/// Shared dependencies injected into teloxide handlers via `dptree::deps!`.
#[derive(Clone)]
struct SharedState {
    engine: Arc<SessionEngine>,
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run the Telegram dispatcher.
///
/// Blocks until the bot is stopped (Ctrl+C).
///
/// # Errors
///
/// Currently infallible once the dispatcher starts; the signature leaves
/// room for startup checks.
pub async fn run_telegram(bot: Bot, engine: Arc<SessionEngine>) -> anyhow::Result<()> {
    let shared = SharedState { engine };

    // Build dptree handler schema
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    info!("telegram dispatcher starting");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![shared])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("telegram dispatcher stopped");
    Ok(())
}

async fn send(bot: &Bot, user: UserId, (text, keyboard): Reply) -> ResponseResult<()> {
    let mut req = bot
        .send_message(ChatId(user.0), text)
        .parse_mode(ParseMode::Html);
    if let Some(keyboard) = keyboard {
        req = req.reply_markup(keyboard);
    }
    req.await?;
    Ok(())
}

fn render(user: UserId, result: Result<Notice, SessionError>) -> Reply {
    match result {
        Ok(notice) => ui::render_notice(&notice),
        Err(e) => render_failure(user, &e),
    }
}

fn render_failure(user: UserId, error: &SessionError) -> Reply {
    match error {
        SessionError::Store(_) | SessionError::Contended => {
            warn!(user = %user, error = %error, "action failed");
        }
        _ => debug!(user = %user, error = %error, "action rejected"),
    }
    ui::render_error(error)
}

fn plain(text: impl Into<String>) -> Reply {
    (text.into(), None)
}

// ---------------------------------------------------------------------------
// Message handler
// ---------------------------------------------------------------------------

/// Handle an incoming Telegram message.
///
/// Slash commands are dispatched; a pending moderator prompt consumes the
/// next plain text; everything else goes to the engine as chat input.
async fn handle_message(bot: Bot, msg: Message, state: SharedState) -> ResponseResult<()> {
    let user_id = match msg.from {
        // teloxide uses u64 for user IDs; ours are i64.
        Some(ref user) => match i64::try_from(user.id.0) {
            Ok(id) => UserId(id),
            Err(_) => return Ok(()),
        },
        None => return Ok(()),
    };

    if !msg.chat.is_private() {
        debug!(user = %user_id, "ignoring message outside a private chat");
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if let Some(command) = commands::parse_command(text) {
            let reply = dispatch_command(command, &state, user_id).await;
            return send(&bot, user_id, reply).await;
        }

        match state.engine.take_pending_admin(user_id).await {
            Ok(Some(pending)) => {
                let reply = handle_pending(pending, text, &state, user_id).await;
                return send(&bot, user_id, reply).await;
            }
            Ok(None) => {}
            Err(e) => warn!(user = %user_id, error = %e, "failed to read pending prompt"),
        }
    }

    let payload = if let Some(text) = msg.text() {
        Payload::Text(text.to_owned())
    } else if let Some(kind) = media_kind(&msg) {
        Payload::Media {
            message_id: msg.id.0,
            kind,
        }
    } else {
        debug!(user = %user_id, "unsupported message type, ignoring");
        return Ok(());
    };

    match state.engine.handle_message(user_id, payload).await {
        Ok(None) => Ok(()),
        Ok(Some(notice)) => send(&bot, user_id, ui::render_notice(&notice)).await,
        Err(e) => send(&bot, user_id, render_failure(user_id, &e)).await,
    }
}

/// Classify a non-text message that can be relayed as a copy.
fn media_kind(msg: &Message) -> Option<MediaKind> {
    // Animations also carry a document; check them first.
    if msg.animation().is_some() {
        Some(MediaKind::Animation)
    } else if msg.photo().is_some() {
        Some(MediaKind::Photo)
    } else if msg.video().is_some() {
        Some(MediaKind::Video)
    } else if msg.voice().is_some() {
        Some(MediaKind::Voice)
    } else if msg.video_note().is_some() {
        Some(MediaKind::VideoNote)
    } else if msg.sticker().is_some() {
        Some(MediaKind::Sticker)
    } else if msg.audio().is_some() {
        Some(MediaKind::Audio)
    } else if msg.document().is_some() {
        Some(MediaKind::Document)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Command dispatcher
// ---------------------------------------------------------------------------

/// Run a parsed slash command, returning the reply.
async fn dispatch_command(command: Command, state: &SharedState, user_id: UserId) -> Reply {
    let engine = &state.engine;

    if command.is_moderator_only() {
        return dispatch_moderator(command, state, user_id).await;
    }

    // Any user command abandons an open moderator prompt.
    if engine.is_moderator(user_id) {
        if let Err(e) = engine.take_pending_admin(user_id).await {
            warn!(user = %user_id, error = %e, "failed to clear pending prompt");
        }
    }

    match command {
        Command::Start => render(user_id, engine.start(user_id).await),
        Command::Help => plain(commands::handle_help()),
        Command::Search => render(user_id, engine.request_search(user_id).await),
        Command::Stop => match engine.stop(user_id).await {
            Err(SessionError::InvalidTransition { .. }) => {
                render(user_id, engine.cancel_search(user_id).await)
            }
            other => render(user_id, other),
        },
        Command::Next => render(user_id, engine.next(user_id).await),
        Command::Usage(usage) => plain(usage),
        Command::Unknown(name) => unknown_command(&name),
        _ => unknown_command("mod"),
    }
}

fn unknown_command(name: &str) -> Reply {
    plain(format!("Unknown command: /{}", ui::escape_html(name)))
}

/// Moderator commands. Unauthorised callers see an unknown command.
async fn dispatch_moderator(command: Command, state: &SharedState, actor: UserId) -> Reply {
    let engine = &state.engine;

    if let Command::Panel { secret } = &command {
        if engine.unlock_moderator(actor, secret.as_deref()).is_err() {
            return unknown_command("mod");
        }
    } else if !engine.is_moderator(actor) {
        return unknown_command("mod");
    }

    if let Err(e) = engine.take_pending_admin(actor).await {
        warn!(user = %actor, error = %e, "failed to clear pending prompt");
    }

    let result = match command {
        Command::Panel { .. } => engine
            .stats(actor)
            .await
            .map(|stats| plain(commands::format_panel(&stats))),
        Command::Stats => engine
            .stats(actor)
            .await
            .map(|stats| plain(commands::format_stats(&stats))),
        Command::Ban { target, duration } => match target {
            None => prompt(state, actor, PendingAdminInput::BanTarget).await,
            Some(target) => {
                let duration = duration.unwrap_or_else(|| {
                    BanDuration::hours(engine.policy().config().manual_ban_hours)
                });
                engine
                    .ban(actor, target, duration)
                    .await
                    .map(|ban| plain(commands::format_ban(&ban)))
            }
        },
        Command::Unban { target } => match target {
            None => prompt(state, actor, PendingAdminInput::UnbanTarget).await,
            Some(target) => engine
                .unban(actor, target)
                .await
                .map(|summary| plain(commands::format_unban(target, &summary))),
        },
        Command::Lookup { target } => match target {
            None => prompt(state, actor, PendingAdminInput::LookupTarget).await,
            Some(target) => engine
                .lookup(actor, target)
                .await
                .map(|profile| plain(commands::format_profile(&profile))),
        },
        Command::Reports { limit } => engine
            .recent_reports(actor, limit)
            .await
            .map(|reports| plain(commands::format_reports(&reports))),
        _ => return unknown_command("mod"),
    };

    result.unwrap_or_else(|e| render_failure(actor, &e))
}

async fn prompt(
    state: &SharedState,
    actor: UserId,
    pending: PendingAdminInput,
) -> Result<Reply, SessionError> {
    state.engine.set_pending_admin(actor, Some(pending)).await?;
    Ok(plain(commands::prompt_for(pending)))
}

/// Consume the moderator's answer to an id prompt.
async fn handle_pending(
    pending: PendingAdminInput,
    text: &str,
    state: &SharedState,
    actor: UserId,
) -> Reply {
    let Some(target) = commands::parse_target(text) else {
        return plain("That is not a user id. Command cancelled.");
    };
    let command = match pending {
        PendingAdminInput::BanTarget => Command::Ban {
            target: Some(target),
            duration: None,
        },
        PendingAdminInput::UnbanTarget => Command::Unban {
            target: Some(target),
        },
        PendingAdminInput::LookupTarget => Command::Lookup {
            target: Some(target),
        },
    };
    dispatch_moderator(command, state, actor).await
}

// ---------------------------------------------------------------------------
// Callback query handler
// ---------------------------------------------------------------------------

/// Handle inline keyboard button presses.
async fn handle_callback(bot: Bot, query: CallbackQuery, state: SharedState) -> ResponseResult<()> {
    let user_id = match i64::try_from(query.from.id.0) {
        Ok(id) => UserId(id),
        Err(_) => return Ok(()),
    };

    let Some(action) = query.data.as_deref().and_then(ui::Action::parse) else {
        bot.answer_callback_query(&query.id)
            .text("Unknown action")
            .await?;
        return Ok(());
    };

    let engine = &state.engine;

    if action == ui::Action::MyId {
        bot.answer_callback_query(&query.id)
            .text(format!("Your ID: {user_id}"))
            .show_alert(true)
            .await?;
        return Ok(());
    }

    bot.answer_callback_query(&query.id).await?;

    let reply = match action {
        ui::Action::Search => render(user_id, engine.request_search(user_id).await),
        ui::Action::CancelSearch => render(user_id, engine.cancel_search(user_id).await),
        ui::Action::Stop => render(user_id, engine.stop(user_id).await),
        ui::Action::Next => render(user_id, engine.next(user_id).await),
        ui::Action::Report => render(user_id, engine.request_report(user_id).await),
        ui::Action::CancelReport => render(user_id, engine.cancel_report(user_id).await),
        ui::Action::Rules => ui::render_notice(&engine.rules()),
        ui::Action::BackToMenu => render(user_id, engine.main_menu(user_id).await),
        ui::Action::MyId => ui::render_notice(&engine.my_id(user_id)),
    };

    send(&bot, user_id, reply).await
}
