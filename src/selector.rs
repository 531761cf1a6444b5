//! Distinct-winner selection over a canonically ordered entrant list.

use std::fmt;

use crate::error::Result;
use crate::fairness::FairnessEngine;
use crate::seed::PrincipalId;

/// A giveaway entrant, identified by their platform user ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntrantId(pub u64);

impl fmt::Display for EntrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One published winner. `draw_index`/`nonce` are both zero for a sure win,
/// where no randomness was needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinnerRecord {
    pub entrant: EntrantId,
    pub draw_index: u32,
    pub nonce: u64,
}

impl WinnerRecord {
    fn sure_win(entrant: EntrantId) -> Self {
        Self {
            entrant,
            draw_index: 0,
            nonce: 0,
        }
    }
}

pub struct WinnerSelector<'a> {
    engine: &'a FairnessEngine,
}

impl<'a> WinnerSelector<'a> {
    pub fn new(engine: &'a FairnessEngine) -> Self {
        Self { engine }
    }

    /// Picks `quota` distinct winners from `entrants` using the creator's
    /// seed material.
    ///
    /// Entrants are deduplicated and sorted ascending by ID first; this
    /// canonical ordering is part of the protocol, since a verifier has to
    /// reproduce it to map published indices back to users. With no more
    /// entrants than the quota everyone wins outright and no draw happens.
    /// Otherwise draws repeat until enough distinct winners are found; a
    /// draw landing on an already-picked entrant is discarded, but the nonce
    /// it consumed stays consumed.
    pub async fn select(
        &self,
        entrants: &[EntrantId],
        quota: usize,
        creator: PrincipalId,
    ) -> Result<Vec<WinnerRecord>> {
        let mut pool = entrants.to_vec();
        pool.sort_unstable();
        pool.dedup();

        if pool.is_empty() {
            return Ok(Vec::new());
        }

        if pool.len() <= quota {
            return Ok(pool.into_iter().map(WinnerRecord::sure_win).collect());
        }

        let mut winners: Vec<WinnerRecord> = Vec::with_capacity(quota);
        while winners.len() < quota {
            let draw = self.engine.draw(creator, pool.len()).await?;
            let entrant = pool[draw.index];
            if winners.iter().any(|w| w.entrant == entrant) {
                continue;
            }
            winners.push(WinnerRecord {
                entrant,
                draw_index: draw.index as u32,
                nonce: draw.nonce,
            });
        }
        Ok(winners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{SeedMaterial, SeedStore};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const CREATOR: PrincipalId = PrincipalId(555);

    async fn fixture(server_seed: &str, user_seed: &str) -> (FairnessEngine, Arc<SeedStore>) {
        let seeds = Arc::new(SeedStore::new(Arc::new(MemoryStore::new())));
        let material = SeedMaterial {
            user_seed: user_seed.into(),
            server_seed: server_seed.into(),
            nonce: 0,
        };
        seeds.store_locked(CREATOR, &material).await.unwrap();
        (FairnessEngine::new(seeds.clone()), seeds)
    }

    fn ids(raw: &[u64]) -> Vec<EntrantId> {
        raw.iter().copied().map(EntrantId).collect()
    }

    #[tokio::test]
    async fn empty_entrants_yield_no_winners_and_no_draws() {
        let (engine, seeds) = fixture("seedX", "alice").await;
        let winners = WinnerSelector::new(&engine)
            .select(&[], 3, CREATOR)
            .await
            .unwrap();
        assert!(winners.is_empty());
        assert_eq!(seeds.get(CREATOR).await.unwrap().nonce, 0);
    }

    #[tokio::test]
    async fn everyone_wins_when_quota_covers_entrants() {
        let (engine, seeds) = fixture("seedX", "alice").await;
        let winners = WinnerSelector::new(&engine)
            .select(&ids(&[7, 3, 9]), 5, CREATOR)
            .await
            .unwrap();

        // Canonical ascending order, each a sure win.
        assert_eq!(
            winners,
            vec![
                WinnerRecord { entrant: EntrantId(3), draw_index: 0, nonce: 0 },
                WinnerRecord { entrant: EntrantId(7), draw_index: 0, nonce: 0 },
                WinnerRecord { entrant: EntrantId(9), draw_index: 0, nonce: 0 },
            ]
        );
        assert_eq!(seeds.get(CREATOR).await.unwrap().nonce, 0);
    }

    // hmac("seedX", "alice-0") -> 315f8 -> 202232 % 10 = 2
    // hmac("seedX", "alice-1") -> f23ab -> 992171 % 10 = 1
    #[tokio::test]
    async fn chance_win_follows_the_reference_draw_sequence() {
        let (engine, seeds) = fixture("seedX", "alice").await;
        let entrants = ids(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]);
        let winners = WinnerSelector::new(&engine)
            .select(&entrants, 2, CREATOR)
            .await
            .unwrap();

        // Sorted pool is [1..=10]; index 2 is entrant 3, index 1 is entrant 2.
        assert_eq!(
            winners,
            vec![
                WinnerRecord { entrant: EntrantId(3), draw_index: 2, nonce: 0 },
                WinnerRecord { entrant: EntrantId(2), draw_index: 1, nonce: 1 },
            ]
        );
        assert_eq!(seeds.get(CREATOR).await.unwrap().nonce, 2);
    }

    // hmac("s1", "bob-0") and hmac("s1", "bob-1") both reduce to index 1 over
    // 3 participants; hmac("s1", "bob-2") reduces to index 0.
    #[tokio::test]
    async fn duplicate_draws_are_discarded_but_still_consume_nonces() {
        let (engine, seeds) = fixture("s1", "bob").await;
        let winners = WinnerSelector::new(&engine)
            .select(&ids(&[10, 20, 30]), 2, CREATOR)
            .await
            .unwrap();

        assert_eq!(
            winners,
            vec![
                WinnerRecord { entrant: EntrantId(20), draw_index: 1, nonce: 0 },
                WinnerRecord { entrant: EntrantId(10), draw_index: 0, nonce: 2 },
            ]
        );
        // Three draws happened for two winners; the ledger shows all three.
        assert_eq!(seeds.get(CREATOR).await.unwrap().nonce, 3);
    }

    #[tokio::test]
    async fn entrant_duplicates_collapse_before_selection() {
        let (engine, _seeds) = fixture("seedX", "alice").await;
        let winners = WinnerSelector::new(&engine)
            .select(&ids(&[4, 4, 4, 2]), 5, CREATOR)
            .await
            .unwrap();
        assert_eq!(
            winners.iter().map(|w| w.entrant).collect::<Vec<_>>(),
            ids(&[2, 4])
        );
    }

    #[tokio::test]
    async fn winners_are_always_distinct_and_quota_sized() {
        let (engine, _seeds) = fixture("seedX", "alice").await;
        let entrants = ids(&(1..=30).collect::<Vec<_>>());
        let winners = WinnerSelector::new(&engine)
            .select(&entrants, 8, CREATOR)
            .await
            .unwrap();

        assert_eq!(winners.len(), 8);
        let mut seen = winners.iter().map(|w| w.entrant).collect::<Vec<_>>();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 8);
        assert!(winners.iter().all(|w| entrants.contains(&w.entrant)));
    }
}
