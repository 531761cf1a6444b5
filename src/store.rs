//! In-memory persistence backing the bot process.
//!
//! Giveaway and seed rows live in maps behind async mutexes; good enough for
//! a single-process bot, and the same trait surface a database-backed store
//! would implement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::gateway::PersistenceGateway;
use crate::lifecycle::{Giveaway, GiveawayId};
use crate::seed::{PrincipalId, SeedMaterial};
use crate::selector::WinnerRecord;

pub struct MemoryStore {
    seeds: Mutex<HashMap<PrincipalId, SeedMaterial>>,
    giveaways: Mutex<HashMap<GiveawayId, Giveaway>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            seeds: Mutex::new(HashMap::new()),
            giveaways: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn load_seed(&self, principal: PrincipalId) -> Result<Option<SeedMaterial>> {
        Ok(self.seeds.lock().await.get(&principal).cloned())
    }

    async fn store_seed(&self, principal: PrincipalId, material: &SeedMaterial) -> Result<()> {
        self.seeds.lock().await.insert(principal, material.clone());
        Ok(())
    }

    async fn next_giveaway_id(&self) -> Result<GiveawayId> {
        Ok(GiveawayId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    async fn load_giveaway(&self, id: GiveawayId) -> Result<Option<Giveaway>> {
        Ok(self.giveaways.lock().await.get(&id).cloned())
    }

    async fn store_giveaway(&self, giveaway: &Giveaway) -> Result<()> {
        self.giveaways
            .lock()
            .await
            .insert(giveaway.id, giveaway.clone());
        Ok(())
    }

    async fn open_giveaways(&self) -> Result<Vec<GiveawayId>> {
        let mut ids: Vec<GiveawayId> = self
            .giveaways
            .lock()
            .await
            .values()
            .filter(|g| g.is_open())
            .map(|g| g.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn record_winners(&self, id: GiveawayId, winners: &[WinnerRecord]) -> Result<()> {
        let mut giveaways = self.giveaways.lock().await;
        let giveaway = giveaways
            .get_mut(&id)
            .ok_or_else(|| Error::Persistence(format!("no giveaway {} to record winners for", id)))?;
        // Single map mutation under one lock: the bulk insert is atomic.
        giveaway.winners = winners.to_vec();
        Ok(())
    }
}
