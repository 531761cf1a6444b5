use std::env;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use serenity::async_trait;
use serenity::client::{Client, Context, EventHandler};
use serenity::framework::standard::StandardFramework;
use serenity::model::gateway::Ready;

mod commands;
mod discord;
mod error;
mod fairness;
mod gateway;
mod lifecycle;
mod seed;
mod selector;
mod store;
#[cfg(test)]
mod testutil;
mod timefmt;

use commands::{App, AppKey, BOT_PREFIX, GIVEAWAYS_GROUP};
use discord::DiscordGateway;
use gateway::{Clock, MessagingGateway, PersistenceGateway, SystemClock};
use lifecycle::{CloseMode, GiveawayLifecycle};
use seed::SeedStore;
use store::MemoryStore;

/// Where the discord api key should be stored in the process or .env
/// environment variables
const TOKEN_KEY: &str = "DISCORD_TOKEN";

/// Overrides the emoji users react with to enter a giveaway.
const EMOJI_KEY: &str = "GIVEAWAY_EMOJI";

/// Default entry emoji when none is configured.
const DEFAULT_EMOJI: &str = "\u{1F389}";

/// Overrides the timed-check sweep interval, in seconds.
const POLL_INTERVAL_KEY: &str = "POLL_INTERVAL_SECS";

/// Default sweep interval.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// How many giveaways one sweep closes at the same time.
const SWEEP_CONCURRENCY: usize = 4;

struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("{} is connected and sweeping giveaways", ready.user.name);
    }
}

/// Periodically runs a timed check over every open giveaway. Each check
/// either refreshes the countdown or closes the giveaway once its end time
/// has passed; failures are logged and picked up again next tick.
async fn sweep_loop(app: Arc<App>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let ids = match app.persistence.open_giveaways().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!("could not list open giveaways: {}", err);
                continue;
            }
        };

        stream::iter(ids)
            .for_each_concurrent(SWEEP_CONCURRENCY, |id| {
                let app = Arc::clone(&app);
                async move {
                    if let Err(err) = app.lifecycle.close(id, CloseMode::TimedCheck).await {
                        warn!("timed check for giveaway {} failed: {}", id, err);
                    }
                }
            })
            .await;
    }
}

#[tokio::main]
async fn main() {
    // Vars below can be in proc variables or .env
    dotenv().ok();
    env_logger::init();

    let token = env::var(TOKEN_KEY).expect("missing discord API token in DISCORD_TOKEN");
    let entry_emoji = env::var(EMOJI_KEY).unwrap_or_else(|_| DEFAULT_EMOJI.to_string());
    let poll_interval = env::var(POLL_INTERVAL_KEY)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

    let framework = StandardFramework::new()
        .configure(|c| c.prefix(BOT_PREFIX))
        .group(&GIVEAWAYS_GROUP);

    let mut client = Client::builder(&token)
        .event_handler(Handler)
        .framework(framework)
        .await
        .expect("failed to create client");

    let persistence: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
    let seeds = Arc::new(SeedStore::new(persistence.clone()));
    let messaging: Arc<dyn MessagingGateway> = Arc::new(DiscordGateway::new(
        client.cache_and_http.http.clone(),
        entry_emoji.clone(),
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lifecycle = GiveawayLifecycle::new(
        persistence.clone(),
        messaging,
        clock.clone(),
        seeds.clone(),
    );

    let app = Arc::new(App {
        persistence,
        seeds,
        lifecycle,
        clock,
        entry_emoji,
    });
    client.data.write().await.insert::<AppKey>(app.clone());

    tokio::spawn(sweep_loop(app, Duration::from_secs(poll_interval)));

    // Run the bot
    if let Err(err) = client.start().await {
        error!("client stopped: {}", err);
    }
}
