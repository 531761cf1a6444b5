//! Bot commands: giveaway management and provable-fairness inspection.

use std::sync::Arc;

use const_format::formatcp;
use log::info;
use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{Args, CommandError, CommandResult};
use serenity::model::channel::{Message, ReactionType};
use serenity::prelude::TypeMapKey;
use serenity::utils::Colour;

use crate::discord::render_announcement;
use crate::error::Error;
use crate::gateway::{Clock, PersistenceGateway};
use crate::lifecycle::{CloseMode, Giveaway, GiveawayId, GiveawayLifecycle};
use crate::seed::{PrincipalId, SeedStore};
use crate::timefmt::parse_duration;

/// The bot can be summoned through commands prefixed by:
pub const BOT_PREFIX: &str = "!";

const GIVEAWAY_USAGE: &str = formatcp!(
    "Usage: `{BOT_PREFIX}giveaway [duration] [winners] [prize]`\n\
     Example: `{BOT_PREFIX}giveaway 12h 3 Discord Nitro`\n\
     Durations take `s`/`m`/`h`/`d` suffixes; winners go from 1 to 20."
);

/// Shared services built at startup and stashed in serenity's data map.
pub struct App {
    pub persistence: Arc<dyn PersistenceGateway>,
    pub seeds: Arc<SeedStore>,
    pub lifecycle: GiveawayLifecycle,
    pub clock: Arc<dyn Clock>,
    pub entry_emoji: String,
}

pub struct AppKey;

impl TypeMapKey for AppKey {
    type Value = Arc<App>;
}

#[group]
#[commands(giveaway, end, reroll, result, myseed, newseed, algorithm)]
struct Giveaways;

async fn app(ctx: &Context) -> Arc<App> {
    ctx.data
        .read()
        .await
        .get::<AppKey>()
        .expect("app state is installed at startup")
        .clone()
}

async fn say_embed(
    ctx: &Context,
    msg: &Message,
    title: &str,
    description: &str,
    colour: Colour,
) -> CommandResult {
    msg.channel_id
        .send_message(&ctx.http, |m| {
            m.embed(|e| e.title(title).description(description).colour(colour))
        })
        .await?;
    Ok(())
}

fn parse_id(args: &mut Args) -> Option<GiveawayId> {
    args.single::<u64>().ok().map(GiveawayId)
}

/// Loads a giveaway only when it belongs to the message author; replies with
/// a rejection otherwise.
async fn load_owned(
    app: &App,
    ctx: &Context,
    msg: &Message,
    id: GiveawayId,
) -> Result<Option<Giveaway>, CommandError> {
    match app.persistence.load_giveaway(id).await? {
        Some(g) if g.creator.0 == msg.author.id.0 => Ok(Some(g)),
        _ => {
            say_embed(
                ctx,
                msg,
                "Giveaway not found",
                &format!("You don't have a Giveaway with ID `{}`.", id),
                Colour::RED,
            )
            .await?;
            Ok(None)
        }
    }
}

#[command]
#[aliases("create")]
async fn giveaway(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let app = app(ctx).await;

    let duration = args
        .single::<String>()
        .ok()
        .and_then(|raw| parse_duration(&raw));
    let duration = match duration {
        Some(duration) => duration,
        None => return say_embed(ctx, msg, "Cannot create Giveaway", GIVEAWAY_USAGE, Colour::RED).await,
    };
    let quota = match args.single::<u32>() {
        Ok(quota) => quota,
        Err(_) => return say_embed(ctx, msg, "Cannot create Giveaway", GIVEAWAY_USAGE, Colour::RED).await,
    };
    let prize = args.rest().trim().to_string();
    if prize.is_empty() {
        return say_embed(ctx, msg, "Cannot create Giveaway", GIVEAWAY_USAGE, Colour::RED).await;
    }

    let creator = PrincipalId(msg.author.id.0);
    let (material, first_time) = app.seeds.get_or_create(creator).await?;
    if first_time {
        msg.channel_id
            .send_message(&ctx.http, |m| {
                m.embed(|e| {
                    e.title("New User Provable Fairness Information")
                        .description(format!(
                            "Hello <@{}>! This is the first time you created a Giveaway with me, \
                             so here is your Provable Fairness Information:\n```\n\
                             • User Seed: {}\n• Server Seed (hashed): {}\n• Nonce: {}\n```",
                            creator,
                            material.user_seed,
                            material.commitment(),
                            material.nonce
                        ))
                        .field(
                            "Please Don't Freak Out!",
                            formatcp!(
                                "You can just ditch this info and proceed with the Giveaway. It \
                                 matters when someone goes salty and wants to check how winners \
                                 were picked. Type `{BOT_PREFIX}algorithm` for more info."
                            ),
                            false,
                        )
                        .colour(Colour::BLURPLE)
                })
            })
            .await?;
    }

    let now = app.clock.now();
    let id = app.persistence.next_giveaway_id().await?;
    let mut giveaway =
        match Giveaway::new(id, creator, prize, quota, msg.channel_id.0, now, now + duration) {
            Ok(giveaway) => giveaway,
            Err(err @ (Error::InvalidWinnerQuota(_) | Error::PrizeTooLong)) => {
                return say_embed(ctx, msg, "Cannot create Giveaway", &err.to_string(), Colour::RED)
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

    let announcement = msg
        .channel_id
        .send_message(&ctx.http, |m| {
            m.embed(|e| render_announcement(e, &giveaway, now, &app.entry_emoji))
        })
        .await?;
    announcement
        .react(&ctx.http, ReactionType::Unicode(app.entry_emoji.clone()))
        .await?;

    giveaway.message_id = announcement.id.0;
    app.persistence.store_giveaway(&giveaway).await?;
    info!("giveaway {} created by {}", id, creator);

    say_embed(
        ctx,
        msg,
        "Giveaway Created!",
        &format!(
            "Your Giveaway has ID `{id}`. End it early with `{prefix}end {id}`, \
             reroll it after it ends with `{prefix}reroll {id}`.",
            id = id,
            prefix = BOT_PREFIX
        ),
        Colour::DARK_GREEN,
    )
    .await
}

#[command]
async fn end(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let app = app(ctx).await;
    let id = match parse_id(&mut args) {
        Some(id) => id,
        None => {
            return say_embed(
                ctx,
                msg,
                "Which Giveaway?",
                formatcp!("Usage: `{BOT_PREFIX}end [Giveaway ID]`"),
                Colour::RED,
            )
            .await;
        }
    };
    let giveaway = match load_owned(&app, ctx, msg, id).await? {
        Some(giveaway) => giveaway,
        None => return Ok(()),
    };

    match app.lifecycle.close(giveaway.id, CloseMode::ManualEnd).await {
        Ok(outcome) => {
            info!("giveaway {} manually ended: {:?}", id, outcome);
            Ok(())
        }
        Err(Error::AlreadyClosed(_)) => {
            say_embed(
                ctx,
                msg,
                "Already ended",
                &format!(
                    "Your Giveaway (ID: `{id}`) already ended. Use `{prefix}reroll {id}` \
                     if you want to reroll it.",
                    id = id,
                    prefix = BOT_PREFIX
                ),
                Colour::RED,
            )
            .await
        }
        Err(err) => Err(err.into()),
    }
}

#[command]
async fn reroll(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let app = app(ctx).await;
    let id = match parse_id(&mut args) {
        Some(id) => id,
        None => {
            return say_embed(
                ctx,
                msg,
                "Which Giveaway?",
                formatcp!("Usage: `{BOT_PREFIX}reroll [Giveaway ID]`"),
                Colour::RED,
            )
            .await;
        }
    };
    let giveaway = match load_owned(&app, ctx, msg, id).await? {
        Some(giveaway) => giveaway,
        None => return Ok(()),
    };

    match app.lifecycle.close(giveaway.id, CloseMode::Reroll).await {
        Ok(outcome) => {
            info!("giveaway {} rerolled: {:?}", id, outcome);
            Ok(())
        }
        Err(Error::StillOpen(_)) => {
            say_embed(
                ctx,
                msg,
                "Still on going",
                &format!(
                    "Your Giveaway (ID: `{id}`) is still on going. Use `{prefix}end {id}` \
                     if you want to end it.",
                    id = id,
                    prefix = BOT_PREFIX
                ),
                Colour::RED,
            )
            .await
        }
        Err(Error::AlreadyClosed(_)) => {
            say_embed(
                ctx,
                msg,
                "Cannot reroll",
                &format!("Your Giveaway (ID: `{}`) failed and cannot be rerolled.", id),
                Colour::RED,
            )
            .await
        }
        Err(err) => Err(err.into()),
    }
}

#[command]
async fn result(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let app = app(ctx).await;
    let id = match parse_id(&mut args) {
        Some(id) => id,
        None => {
            return say_embed(
                ctx,
                msg,
                "Which Giveaway?",
                formatcp!("Usage: `{BOT_PREFIX}result [Giveaway ID]`"),
                Colour::RED,
            )
            .await;
        }
    };
    let giveaway = match app.persistence.load_giveaway(id).await? {
        Some(giveaway) => giveaway,
        None => {
            return say_embed(
                ctx,
                msg,
                "Giveaway not found",
                &format!("No Giveaway with ID `{}` exists.", id),
                Colour::RED,
            )
            .await;
        }
    };
    let material = app.seeds.get(giveaway.creator).await?;

    let winners = if giveaway.winners.is_empty() {
        "None".to_string()
    } else {
        giveaway
            .winners
            .iter()
            .map(|w| format!("• <@{}> | Index: {} | Nonce: {}", w.entrant, w.draw_index, w.nonce))
            .collect::<Vec<_>>()
            .join("\n")
    };

    msg.channel_id
        .send_message(&ctx.http, |m| {
            m.embed(|e| {
                e.title(format!("Result Information for Giveaway {}", giveaway.id))
                    .description(format!(
                        "• Prize: **{}**\n• Created: **{}**\n• Participants: **{}**\n",
                        giveaway.prize,
                        giveaway.created_at.format("%H:%M:%S %A %B %d, %Y (UTC)"),
                        giveaway.participants.len()
                    ))
                    .field("Winners", winners, false)
                    .field(
                        "Creator User Seed",
                        format!("```{}```", material.user_seed),
                        false,
                    )
                    .field(
                        "Creator Server Seed - Hashed",
                        format!("```{}```", material.commitment()),
                        false,
                    )
                    .colour(Colour::BLURPLE)
            })
        })
        .await?;
    Ok(())
}

#[command]
async fn myseed(ctx: &Context, msg: &Message) -> CommandResult {
    let app = app(ctx).await;
    let material = app.seeds.get(PrincipalId(msg.author.id.0)).await?;

    msg.channel_id
        .send_message(&ctx.http, |m| {
            m.embed(|e| {
                e.title(format!("{}'s Provable Fairness Information", msg.author.name))
                    .field("User Seed", format!("```{}```", material.user_seed), false)
                    .field("Nonce", format!("```{}```", material.nonce), false)
                    .field(
                        "Server Seed - Hashed",
                        format!("```{}```", material.commitment()),
                        false,
                    )
                    .colour(Colour::BLURPLE)
            })
        })
        .await?;
    Ok(())
}

#[command]
async fn newseed(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let app = app(ctx).await;
    let new_seed = {
        let rest = args.rest().trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    };

    let rotation = match app
        .seeds
        .rotate(PrincipalId(msg.author.id.0), new_seed)
        .await
    {
        Ok(rotation) => rotation,
        Err(err @ Error::SeedTooLong(_)) => {
            return say_embed(ctx, msg, "Cannot renew seed", &err.to_string(), Colour::RED).await;
        }
        Err(err) => return Err(err.into()),
    };

    msg.channel_id
        .send_message(&ctx.http, |m| {
            m.embed(|e| {
                e.title(format!(
                    "Provable Fairness Information for {} updated",
                    msg.author.name
                ))
                .description(format!(
                    "[CURRENT] User Seed```{}```\n[CURRENT] Nonce```{}```\n\
                     [CURRENT] Server Seed - Hashed```{}```\n\
                     [PREVIOUS] Server Seed - Unhashed```{}```",
                    rotation.material.user_seed,
                    rotation.material.nonce,
                    rotation.material.commitment(),
                    rotation.previous_server_seed.as_deref().unwrap_or("N/A")
                ))
                .colour(Colour::DARK_GREEN)
            })
        })
        .await?;
    Ok(())
}

#[command]
async fn algorithm(ctx: &Context, msg: &Message) -> CommandResult {
    msg.channel_id
        .send_message(&ctx.http, |m| {
            m.embed(|e| {
                e.title("Randomization Algorithm Explained")
                    .description(
                        "A **provable**, unmodified \"randomized\" result beats a spooky, \
                         unprovable one. When someone is salty about your Giveaway result, \
                         use this to explain how winners are picked.",
                    )
                    .field(
                        "Step 1: Check the Server Seed integrity",
                        formatcp!(
                            "Renew your seed with `{BOT_PREFIX}newseed` to obtain the \
                             **Server Seed (Unhashed)**, then SHA512-hash it with any tool. \
                             If the digest equals the **Hashed** version published earlier, \
                             the result was not modified."
                        ),
                        false,
                    )
                    .field(
                        "Step 2: Recompute the draw",
                        formatcp!(
                            "Compute HMAC-SHA512 with message `[User Seed]-[Nonce]` and the \
                             unhashed Server Seed as the key. Convert the first 5 hex \
                             characters to decimal and take the remainder modulo the \
                             participant count from `{BOT_PREFIX}result [Giveaway ID]`. \
                             That remainder is the winner's **Index**."
                        ),
                        false,
                    )
                    .field(
                        "Step 3: Crosscheck",
                        "Participants are sorted ascending by their Discord ID; the Index \
                         points into that sorted list. The draw repeats (Nonce increasing by \
                         1 each time) until enough **distinct winners** are found. All of \
                         this is skipped when there are fewer participants than winners.",
                        false,
                    )
                    .colour(Colour::BLURPLE)
            })
        })
        .await?;
    Ok(())
}
