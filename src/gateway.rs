//! Collaborator interfaces the giveaway core depends on.
//!
//! The core never touches serenity types directly; it talks to the chat
//! platform, the database and the wall clock through these traits so that
//! winner selection can be exercised with in-memory stand-ins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::lifecycle::{Giveaway, GiveawayId};
use crate::seed::{PrincipalId, SeedMaterial};
use crate::selector::{EntrantId, WinnerRecord};

/// Chat-platform surface used while closing a giveaway.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Returns everyone who reacted to the announcement message with the
    /// entry emoji, bots excluded, deduplicated.
    ///
    /// Fails with [`crate::error::Error::MessageNotFound`] when the message
    /// or its channel is gone or unreadable. A message that simply has no
    /// entry reaction yields an empty list.
    async fn fetch_reactors(&self, channel_id: u64, message_id: u64) -> Result<Vec<EntrantId>>;

    /// Re-renders the announcement for the giveaway's current state.
    async fn edit_announcement(&self, giveaway: &Giveaway) -> Result<()>;

    /// Posts a plain completion/failure notice to a channel.
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<()>;
}

/// Storage for giveaways, winner records and per-user seed material.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn load_seed(&self, principal: PrincipalId) -> Result<Option<SeedMaterial>>;

    async fn store_seed(&self, principal: PrincipalId, material: &SeedMaterial) -> Result<()>;

    /// Allocates a fresh giveaway ID. IDs are never reused.
    async fn next_giveaway_id(&self) -> Result<GiveawayId>;

    async fn load_giveaway(&self, id: GiveawayId) -> Result<Option<Giveaway>>;

    /// Upserts the full giveaway row, winners included.
    async fn store_giveaway(&self, giveaway: &Giveaway) -> Result<()>;

    /// IDs of giveaways still in the open state, for the timed sweep.
    async fn open_giveaways(&self) -> Result<Vec<GiveawayId>>;

    /// Stores the winner list for a giveaway as one atomic bulk insert.
    async fn record_winners(&self, id: GiveawayId, winners: &[WinnerRecord]) -> Result<()>;
}

/// Injectable wall clock so lifecycle tests can move time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
