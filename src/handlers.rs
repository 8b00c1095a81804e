use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::{error, info, instrument, warn};

use crate::catalog::{CatalogClient, CatalogSource};
use crate::formatter::{Formatted, Formatter};

pub const WORKING_MESSAGE: &str = "🔍 正在查询Epic限免游戏，请稍候...";
pub const EMPTY_RESULT_MESSAGE: &str = "获取游戏信息失败，请稍后重试。";

static QUERY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[/#])?(?:喜加一|epic|Epic)\s*$").expect("valid query pattern")
});

/// Whether `text` is the free-games query command.
pub fn is_query_command(text: &str) -> bool {
    QUERY_PATTERN.is_match(text)
}

/// Outbound side of a conversation.
#[async_trait]
pub trait Replier: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;
}

pub struct ChatReplier<'a> {
    bot: &'a Bot,
    chat_id: ChatId,
}

impl<'a> ChatReplier<'a> {
    pub fn new(bot: &'a Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl Replier for ChatReplier<'_> {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.bot.send_message(self.chat_id, text).await?;
        Ok(())
    }
}

/// Everything the query command needs, shared across updates.
pub struct BotState {
    pub catalog: CatalogClient,
    pub formatter: Formatter,
    pub allowed_users: Vec<i64>,
}

impl BotState {
    fn is_allowed(&self, tg_user_id: i64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&tg_user_id)
    }
}

#[instrument(skip_all)]
pub async fn handle_update(bot: &Bot, state: &BotState, msg: &Message) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !is_query_command(text) {
        return Ok(());
    }

    let user = match msg.from() {
        Some(u) => u,
        None => return Ok(()),
    };
    let tg_user_id = user.id.0 as i64;
    if !state.is_allowed(tg_user_id) {
        warn!(tg_user_id, "query from user not in allowed_users; ignoring");
        return Ok(());
    }

    info!(tg_user_id, chat_id = msg.chat.id.0, "free games query");
    let replier = ChatReplier::new(bot, msg.chat.id);
    run_query(&state.catalog, &state.formatter, &replier).await;
    Ok(())
}

/// Run the query command end to end. Never fails: any error is logged and
/// reported back as a short notice. Returns whether the query succeeded.
#[instrument(skip_all)]
pub async fn run_query(
    source: &dyn CatalogSource,
    formatter: &Formatter,
    replier: &dyn Replier,
) -> bool {
    match query(source, formatter, replier).await {
        Ok(sent) => sent,
        Err(err) => {
            error!(?err, "free games query failed");
            if let Err(send_err) = replier.send_text(&format!("查询失败：{}", err)).await {
                warn!(?send_err, "failed to report query failure");
            }
            false
        }
    }
}

async fn query(
    source: &dyn CatalogSource,
    formatter: &Formatter,
    replier: &dyn Replier,
) -> Result<bool> {
    replier.send_text(WORKING_MESSAGE).await?;

    let entries = source.fetch().await;
    let formatted = formatter.format(&entries);
    let reply = compose_reply(&formatted);
    if reply.is_empty() {
        replier.send_text(EMPTY_RESULT_MESSAGE).await?;
        return Ok(false);
    }

    replier.send_text(&reply).await?;
    Ok(true)
}

/// Single outbound message for a formatting pass: the lone header when there
/// is at most one element, otherwise a per-group summary followed by every
/// block, separated by blank lines.
pub fn compose_reply(formatted: &Formatted) -> String {
    if formatted.game_count() == 0 {
        return formatted.header.clone();
    }

    let current = formatted.current.len();
    let upcoming = formatted.upcoming.len();
    let mut header = format!("🎮 发现 {} 款Epic限免游戏：\n\n", formatted.game_count());
    if current > 0 {
        header.push_str(&format!("🆓 {} 款游戏现在免费！\n\n", current));
    }
    if upcoming > 0 {
        header.push_str(&format!("⏰ {} 款游戏即将免费！\n\n", upcoming));
    }

    let blocks: Vec<&str> = formatted
        .current
        .iter()
        .chain(formatted.upcoming.iter())
        .map(String::as_str)
        .collect();
    header + &blocks.join("\n\n")
}
