//! Per-user provable-fairness seed material.
//!
//! Every giveaway creator owns one [`SeedMaterial`] record shared across all
//! of their giveaways. The server seed stays secret; only its SHA-512
//! commitment is shown until the user rotates, at which point the old seed is
//! revealed exactly once so past results can be replayed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::distributions::{Alphanumeric, DistString};
use sha2::{Digest, Sha512};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::gateway::PersistenceGateway;

/// Longest user seed accepted by `!newseed`.
pub const MAX_USER_SEED_LEN: usize = 200;

/// Length of generated server seeds.
pub const SERVER_SEED_LEN: usize = 300;

/// Stable identity of a seed owner (their Discord user ID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrincipalId(pub u64);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedMaterial {
    pub user_seed: String,
    pub server_seed: String,
    /// Count of draws ever derived from this seed pair. Monotonic; reset
    /// only by rotation.
    pub nonce: u64,
}

impl SeedMaterial {
    /// Hex SHA-512 of the server seed, published before the seed itself is
    /// ever revealed (commit-then-reveal).
    pub fn commitment(&self) -> String {
        hex::encode(Sha512::digest(self.server_seed.as_bytes()))
    }
}

/// What a rotation hands back: the retired server seed (shown to the user
/// exactly once) and the material now in effect.
pub struct SeedRotation {
    pub previous_server_seed: Option<String>,
    pub material: SeedMaterial,
}

fn generate_server_seed() -> String {
    // thread_rng is a CSPRNG; the seed doubles as the HMAC key.
    Alphanumeric.sample_string(&mut rand::thread_rng(), SERVER_SEED_LEN)
}

/// Owns seed material access and serializes every mutation per principal.
///
/// Two giveaways closing at once for the same creator must not interleave
/// nonce updates, so all load-modify-store cycles go through the per-user
/// lock handed out by [`SeedStore::principal_lock`].
pub struct SeedStore {
    persistence: Arc<dyn PersistenceGateway>,
    locks: Mutex<HashMap<PrincipalId, Arc<Mutex<()>>>>,
}

impl SeedStore {
    pub fn new(persistence: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            persistence,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn principal_lock(&self, principal: PrincipalId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Drop entries nobody holds anymore so the map doesn't grow with
        // every principal ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(principal).or_default().clone()
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Returns the principal's material, creating and persisting a fresh
    /// record on first contact. The second tuple element is true when the
    /// record was just created.
    pub async fn get_or_create(&self, principal: PrincipalId) -> Result<(SeedMaterial, bool)> {
        let lock = self.principal_lock(principal).await;
        let _guard = lock.lock().await;
        if let Some(material) = self.persistence.load_seed(principal).await? {
            return Ok((material, false));
        }
        let material = SeedMaterial {
            user_seed: principal.to_string(),
            server_seed: generate_server_seed(),
            nonce: 0,
        };
        self.persistence.store_seed(principal, &material).await?;
        Ok((material, true))
    }

    pub async fn get(&self, principal: PrincipalId) -> Result<SeedMaterial> {
        Ok(self.get_or_create(principal).await?.0)
    }

    /// Replaces the seed pair and resets the nonce ledger to zero.
    ///
    /// `new_user_seed = None` falls back to the principal's ID string. The
    /// retired server seed is returned unhashed; this is its only disclosure,
    /// and it lets anyone check prior draws against the old commitment.
    pub async fn rotate(
        &self,
        principal: PrincipalId,
        new_user_seed: Option<String>,
    ) -> Result<SeedRotation> {
        let user_seed = match new_user_seed {
            Some(seed) => {
                let len = seed.chars().count();
                if len > MAX_USER_SEED_LEN {
                    return Err(Error::SeedTooLong(len));
                }
                seed
            }
            None => principal.to_string(),
        };

        let lock = self.principal_lock(principal).await;
        let _guard = lock.lock().await;

        let previous_server_seed = self
            .persistence
            .load_seed(principal)
            .await?
            .map(|m| m.server_seed);

        let material = SeedMaterial {
            user_seed,
            server_seed: generate_server_seed(),
            nonce: 0,
        };
        self.persistence.store_seed(principal, &material).await?;

        Ok(SeedRotation {
            previous_server_seed,
            material,
        })
    }

    /// Loads material without taking the principal lock. Callers must hold
    /// the lock from [`SeedStore::principal_lock`] themselves.
    pub(crate) async fn load_locked(&self, principal: PrincipalId) -> Result<SeedMaterial> {
        if let Some(material) = self.persistence.load_seed(principal).await? {
            return Ok(material);
        }
        let material = SeedMaterial {
            user_seed: principal.to_string(),
            server_seed: generate_server_seed(),
            nonce: 0,
        };
        self.persistence.store_seed(principal, &material).await?;
        Ok(material)
    }

    /// Persists material without taking the principal lock; see
    /// [`SeedStore::load_locked`].
    pub(crate) async fn store_locked(
        &self,
        principal: PrincipalId,
        material: &SeedMaterial,
    ) -> Result<()> {
        self.persistence.store_seed(principal, material).await
    }
}
