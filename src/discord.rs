//! Serenity-backed messaging gateway and the announcement embed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::builder::CreateEmbed;
use serenity::http::Http;
use serenity::model::channel::ReactionType;
use serenity::model::id::{ChannelId, MessageId, UserId};
use serenity::utils::Colour;

use crate::error::{Error, Result};
use crate::gateway::MessagingGateway;
use crate::lifecycle::Giveaway;
use crate::selector::EntrantId;
use crate::timefmt::remaining_text;

/// Discord caps reaction-user pages at 100.
const REACTION_PAGE: u8 = 100;

/// Builds the giveaway announcement embed for its current state.
pub fn render_announcement<'a>(
    embed: &'a mut CreateEmbed,
    giveaway: &Giveaway,
    now: DateTime<Utc>,
    entry_emoji: &str,
) -> &'a mut CreateEmbed {
    let open = giveaway.is_open();

    let title = if open {
        format!("{} Result-Provable Giveaway {}", entry_emoji, entry_emoji)
    } else {
        "GIVEAWAY ENDED".to_string()
    };
    let time_remaining = if open {
        remaining_text(giveaway.ends_at - now)
    } else {
        "Ended".to_string()
    };

    let mut description = format!(
        "• Prize: **{}**\n• Winners: **{}**\n• Time remaining: **{}**\n\n",
        giveaway.prize, giveaway.winner_quota, time_remaining
    );
    if open && giveaway.winners.is_empty() {
        description.push_str(&format!("React with {} to enter!", entry_emoji));
    }

    embed
        .title(title)
        .description(description)
        .colour(if open { Colour::BLURPLE } else { Colour::DARK_GREY })
        .author(|a| a.name(giveaway.id.to_string()))
        .footer(|f| {
            f.text(if open {
                format!("Ends {}", giveaway.ends_at.format("%H:%M:%S %A %B %d, %Y (UTC)"))
            } else {
                "Ended".to_string()
            })
        });

    if !giveaway.winners.is_empty() {
        let lines = giveaway
            .winners
            .iter()
            .map(|w| format!("• <@{}> | Index: {} | Nonce: {}", w.entrant, w.draw_index, w.nonce))
            .collect::<Vec<_>>()
            .join("\n");
        embed.field("Winners", lines, false);
    }

    embed
}

pub struct DiscordGateway {
    http: Arc<Http>,
    entry_emoji: String,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>, entry_emoji: String) -> Self {
        Self { http, entry_emoji }
    }

    fn entry_reaction(&self) -> ReactionType {
        ReactionType::Unicode(self.entry_emoji.clone())
    }
}

#[async_trait]
impl MessagingGateway for DiscordGateway {
    async fn fetch_reactors(&self, channel_id: u64, message_id: u64) -> Result<Vec<EntrantId>> {
        // Any fetch failure (deleted message, deleted channel, missing
        // permissions) means the entrant list is unrecoverable.
        let message = ChannelId(channel_id)
            .message(&self.http, MessageId(message_id))
            .await
            .map_err(|_| Error::MessageNotFound)?;

        let entry = self.entry_reaction();
        if !message.reactions.iter().any(|r| r.reaction_type == entry) {
            return Ok(Vec::new());
        }

        let mut entrants = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let batch = message
                .reaction_users(&self.http, entry.clone(), Some(REACTION_PAGE), after)
                .await?;
            let page_len = batch.len();
            after = batch.last().map(|u| u.id);
            entrants.extend(
                batch
                    .into_iter()
                    .filter(|u| !u.bot)
                    .map(|u| EntrantId(u.id.0)),
            );
            if page_len < REACTION_PAGE as usize {
                break;
            }
        }

        entrants.sort_unstable();
        entrants.dedup();
        Ok(entrants)
    }

    async fn edit_announcement(&self, giveaway: &Giveaway) -> Result<()> {
        let now = Utc::now();
        ChannelId(giveaway.channel_id)
            .edit_message(&self.http, MessageId(giveaway.message_id), |m| {
                m.embed(|e| render_announcement(e, giveaway, now, &self.entry_emoji))
            })
            .await
            .map_err(|_| Error::MessageNotFound)?;
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, content: &str) -> Result<()> {
        ChannelId(channel_id).say(&self.http, content).await?;
        Ok(())
    }
}
