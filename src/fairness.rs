//! Deterministic index derivation for provably-fair draws.
//!
//! A draw is `HMAC-SHA512(server_seed, "{user_seed}-{nonce}")`, keeping the
//! first 5 hex characters of the digest as a base-16 number reduced modulo
//! the participant count. Anyone holding the revealed server seed can replay
//! every published `(index, nonce)` pair with an off-the-shelf HMAC tool.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::error::{Error, Result};
use crate::seed::{PrincipalId, SeedMaterial, SeedStore};

type HmacSha512 = Hmac<Sha512>;

/// One consumed draw: the derived participant index and the nonce that
/// produced it (the value *before* the increment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub index: usize,
    pub nonce: u64,
}

pub struct FairnessEngine {
    seeds: Arc<SeedStore>,
}

impl FairnessEngine {
    pub fn new(seeds: Arc<SeedStore>) -> Self {
        Self { seeds }
    }

    /// Pure index derivation; same material and count always yield the same
    /// index. This is the function a verifier re-runs by hand.
    pub fn derive_index(material: &SeedMaterial, participant_count: usize) -> usize {
        let mut mac = HmacSha512::new_from_slice(material.server_seed.as_bytes())
            .expect("hmac accepts keys of any length");
        mac.update(format!("{}-{}", material.user_seed, material.nonce).as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());
        // First 5 hex characters, exactly as the verification walkthrough
        // tells users to slice them.
        let prefix = u64::from_str_radix(&digest[..5], 16).expect("digest is valid hex");
        (prefix as usize) % participant_count
    }

    /// Derives an index for the principal's current seed state and advances
    /// the nonce by one, persisting it before returning.
    ///
    /// The returned nonce is the one consumed by this draw. The increment is
    /// persisted even when the caller ends up discarding the draw, so the
    /// nonce is a ledger of every draw ever requested, not just the accepted
    /// ones. Changing that would break replay of historical results.
    pub async fn draw(&self, principal: PrincipalId, participant_count: usize) -> Result<Draw> {
        if participant_count == 0 {
            return Err(Error::NoParticipants);
        }

        let lock = self.seeds.principal_lock(principal).await;
        let _guard = lock.lock().await;

        let mut material = self.seeds.load_locked(principal).await?;
        let nonce = material.nonce;
        let index = Self::derive_index(&material, participant_count);
        material.nonce += 1;
        self.seeds.store_locked(principal, &material).await?;

        Ok(Draw { index, nonce })
    }
}
