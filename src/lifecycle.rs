//! Giveaway state machine: open → closed (success or failure), with one
//! reroll path re-entering the closing procedure from a successful close.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::fairness::FairnessEngine;
use crate::gateway::{Clock, MessagingGateway, PersistenceGateway};
use crate::seed::{PrincipalId, SeedStore};
use crate::selector::{EntrantId, WinnerRecord, WinnerSelector};

pub const MAX_PRIZE_LEN: usize = 200;
pub const MAX_WINNER_QUOTA: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GiveawayId(pub u64);

impl fmt::Display for GiveawayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveawayState {
    Open,
    ClosedSuccess,
    /// The announcement message vanished; terminal, no reroll.
    ClosedFailure,
}

/// Why `close` is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Periodic sweep; only acts once the end time has passed, otherwise it
    /// just refreshes the countdown on the announcement.
    TimedCheck,
    /// Creator ended the giveaway early.
    ManualEnd,
    /// Creator asked for a fresh winner set; requires a prior successful
    /// close, whose winners are discarded first.
    Reroll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Timed check before the end time, or on an already-closed giveaway.
    StillRunning,
    /// Announcement message gone; giveaway marked failed.
    Failed,
    /// Closed successfully with nobody entered.
    NoWinners,
    WinnersDrawn(Vec<WinnerRecord>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Giveaway {
    pub id: GiveawayId,
    /// Seed-material owner. Material is shared across all of a creator's
    /// giveaways and outlives every single one of them.
    pub creator: PrincipalId,
    pub prize: String,
    pub winner_quota: u32,
    pub channel_id: u64,
    pub message_id: u64,
    pub created_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub state: GiveawayState,
    pub winners: Vec<WinnerRecord>,
    /// Entrant set captured when the giveaway closed.
    pub participants: Vec<EntrantId>,
}

impl Giveaway {
    pub fn new(
        id: GiveawayId,
        creator: PrincipalId,
        prize: String,
        winner_quota: u32,
        channel_id: u64,
        created_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Self> {
        if winner_quota == 0 || winner_quota > MAX_WINNER_QUOTA {
            return Err(Error::InvalidWinnerQuota(winner_quota));
        }
        if prize.chars().count() > MAX_PRIZE_LEN {
            return Err(Error::PrizeTooLong);
        }
        Ok(Self {
            id,
            creator,
            prize,
            winner_quota,
            channel_id,
            message_id: 0,
            created_at,
            ends_at,
            state: GiveawayState::Open,
            winners: Vec::new(),
            participants: Vec::new(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.state == GiveawayState::Open
    }
}

/// Coordinates the closing transition: entrant fetch, winner selection,
/// persistence and notifications.
pub struct GiveawayLifecycle {
    persistence: Arc<dyn PersistenceGateway>,
    messaging: Arc<dyn MessagingGateway>,
    clock: Arc<dyn Clock>,
    engine: FairnessEngine,
    close_locks: Mutex<HashMap<GiveawayId, Arc<Mutex<()>>>>,
}

impl GiveawayLifecycle {
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        messaging: Arc<dyn MessagingGateway>,
        clock: Arc<dyn Clock>,
        seeds: Arc<SeedStore>,
    ) -> Self {
        Self {
            persistence,
            messaging,
            clock,
            engine: FairnessEngine::new(seeds),
            close_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn close_lock(&self, id: GiveawayId) -> Arc<Mutex<()>> {
        let mut locks = self.close_locks.lock().await;
        // Drop entries nobody holds anymore so the map doesn't grow with
        // every giveaway ever closed.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id).or_default().clone()
    }

    #[cfg(test)]
    async fn close_lock_count(&self) -> usize {
        self.close_locks.lock().await.len()
    }

    /// Runs one closing attempt. At most one close per giveaway is in flight
    /// at a time; a concurrent timer tick and manual end serialize here, so
    /// the loser of the race sees the updated state instead of drawing a
    /// second winner set and burning extra nonces.
    pub async fn close(&self, id: GiveawayId, mode: CloseMode) -> Result<CloseOutcome> {
        let lock = self.close_lock(id).await;
        let _guard = lock.lock().await;

        let mut giveaway = self
            .persistence
            .load_giveaway(id)
            .await?
            .ok_or(Error::GiveawayNotFound(id))?;

        match mode {
            CloseMode::TimedCheck => {
                if !giveaway.is_open() {
                    return Ok(CloseOutcome::StillRunning);
                }
                if self.clock.now() < giveaway.ends_at {
                    // Not due yet; just refresh the countdown. A vanished
                    // message fails the giveaway here too.
                    return match self.messaging.edit_announcement(&giveaway).await {
                        Ok(()) => Ok(CloseOutcome::StillRunning),
                        Err(Error::MessageNotFound) => self.fail(&mut giveaway).await,
                        Err(err) => Err(err),
                    };
                }
            }
            CloseMode::ManualEnd => {
                if !giveaway.is_open() {
                    return Err(Error::AlreadyClosed(id));
                }
            }
            CloseMode::Reroll => match giveaway.state {
                GiveawayState::Open => return Err(Error::StillOpen(id)),
                GiveawayState::ClosedFailure => return Err(Error::AlreadyClosed(id)),
                GiveawayState::ClosedSuccess => giveaway.winners.clear(),
            },
        }

        let entrants = match self
            .messaging
            .fetch_reactors(giveaway.channel_id, giveaway.message_id)
            .await
        {
            Ok(entrants) => entrants,
            Err(Error::MessageNotFound) => return self.fail(&mut giveaway).await,
            Err(err) => return Err(err),
        };

        if entrants.is_empty() {
            giveaway.state = GiveawayState::ClosedSuccess;
            self.persistence.store_giveaway(&giveaway).await?;
            self.messaging.edit_announcement(&giveaway).await?;
            self.messaging
                .send_message(
                    giveaway.channel_id,
                    &format!(
                        "Giveaway ID `{}` ended but everyone is chillin' so no winner is selected~!",
                        giveaway.id
                    ),
                )
                .await?;
            return Ok(CloseOutcome::NoWinners);
        }

        let winners = WinnerSelector::new(&self.engine)
            .select(&entrants, giveaway.winner_quota as usize, giveaway.creator)
            .await?;

        self.persistence.record_winners(id, &winners).await?;

        let mut participants = entrants;
        participants.sort_unstable();
        participants.dedup();
        giveaway.participants = participants;
        giveaway.winners = winners.clone();
        giveaway.state = GiveawayState::ClosedSuccess;
        self.persistence.store_giveaway(&giveaway).await?;

        self.messaging.edit_announcement(&giveaway).await?;
        let mentions = winners
            .iter()
            .map(|w| format!("<@{}>", w.entrant))
            .collect::<Vec<_>>()
            .join(", ");
        self.messaging
            .send_message(
                giveaway.channel_id,
                &format!("Congratulations!! {} won **{}**!", mentions, giveaway.prize),
            )
            .await?;

        Ok(CloseOutcome::WinnersDrawn(winners))
    }

    /// Terminal failure path: the announcement is unreachable, so no entrant
    /// list can ever be fetched again. Not retried by the lifecycle.
    async fn fail(&self, giveaway: &mut Giveaway) -> Result<CloseOutcome> {
        giveaway.state = GiveawayState::ClosedFailure;
        self.persistence.store_giveaway(giveaway).await?;
        let notice = format!(
            "Giveaway with ID `{}` failed because its message was not found.",
            giveaway.id
        );
        if let Err(err) = self.messaging.send_message(giveaway.channel_id, &notice).await {
            warn!(
                "failure notice for giveaway {} not delivered: {}",
                giveaway.id, err
            );
        }
        Ok(CloseOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedMaterial;
    use crate::store::MemoryStore;
    use crate::testutil::{FixedClock, MockMessaging};
    use chrono::{Duration, TimeZone};

    const CREATOR: PrincipalId = PrincipalId(555);
    const CHANNEL: u64 = 11;

    struct Harness {
        store: Arc<MemoryStore>,
        seeds: Arc<SeedStore>,
        messaging: Arc<MockMessaging>,
        clock: Arc<FixedClock>,
        lifecycle: GiveawayLifecycle,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let seeds = Arc::new(SeedStore::new(store.clone() as Arc<dyn PersistenceGateway>));
        let material = SeedMaterial {
            user_seed: "alice".into(),
            server_seed: "seedX".into(),
            nonce: 0,
        };
        seeds.store_locked(CREATOR, &material).await.unwrap();

        let messaging = Arc::new(MockMessaging::new());
        let clock = Arc::new(FixedClock::at(Utc.ymd(2022, 3, 1).and_hms(12, 0, 0)));
        let lifecycle = GiveawayLifecycle::new(
            store.clone() as Arc<dyn PersistenceGateway>,
            messaging.clone() as Arc<dyn MessagingGateway>,
            clock.clone() as Arc<dyn Clock>,
            seeds.clone(),
        );
        Harness {
            store,
            seeds,
            messaging,
            clock,
            lifecycle,
        }
    }

    async fn open_giveaway(h: &Harness, quota: u32) -> GiveawayId {
        let id = h.store.next_giveaway_id().await.unwrap();
        let now = h.clock.now();
        let mut giveaway = Giveaway::new(
            id,
            CREATOR,
            "Nitro Classic".into(),
            quota,
            CHANNEL,
            now,
            now + Duration::hours(1),
        )
        .unwrap();
        giveaway.message_id = 99;
        h.store.store_giveaway(&giveaway).await.unwrap();
        id
    }

    fn entrants(raw: &[u64]) -> Vec<EntrantId> {
        raw.iter().copied().map(EntrantId).collect()
    }

    #[test]
    fn constructor_validates_quota_and_prize() {
        let t = Utc.ymd(2022, 3, 1).and_hms(0, 0, 0);
        let build = |quota, prize: String| {
            Giveaway::new(GiveawayId(1), CREATOR, prize, quota, CHANNEL, t, t)
        };
        assert!(matches!(
            build(0, "p".into()),
            Err(Error::InvalidWinnerQuota(0))
        ));
        assert!(matches!(
            build(21, "p".into()),
            Err(Error::InvalidWinnerQuota(21))
        ));
        assert!(matches!(
            build(1, "p".repeat(201)),
            Err(Error::PrizeTooLong)
        ));
        assert!(build(20, "p".repeat(200)).is_ok());
    }

    #[tokio::test]
    async fn timed_check_before_end_only_refreshes() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging.set_reactors(entrants(&[1, 2, 3]));

        let outcome = h.lifecycle.close(id, CloseMode::TimedCheck).await.unwrap();
        assert_eq!(outcome, CloseOutcome::StillRunning);
        assert_eq!(h.messaging.edit_count(), 1);

        let stored = h.store.load_giveaway(id).await.unwrap().unwrap();
        assert!(stored.is_open());
        assert_eq!(h.seeds.get(CREATOR).await.unwrap().nonce, 0);
    }

    #[tokio::test]
    async fn timed_check_after_end_draws_winners() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging
            .set_reactors(entrants(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]));
        h.clock.advance(Duration::hours(2));

        let outcome = h.lifecycle.close(id, CloseMode::TimedCheck).await.unwrap();
        let winners = match outcome {
            CloseOutcome::WinnersDrawn(winners) => winners,
            other => panic!("expected winners, got {:?}", other),
        };
        // Reference draws for ("seedX", "alice"): nonce 0 -> index 2,
        // nonce 1 -> index 1 over the sorted pool [1..=10].
        assert_eq!(
            winners,
            vec![
                WinnerRecord { entrant: EntrantId(3), draw_index: 2, nonce: 0 },
                WinnerRecord { entrant: EntrantId(2), draw_index: 1, nonce: 1 },
            ]
        );

        let stored = h.store.load_giveaway(id).await.unwrap().unwrap();
        assert_eq!(stored.state, GiveawayState::ClosedSuccess);
        assert_eq!(stored.winners, winners);
        assert_eq!(stored.participants, entrants(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]));

        let sent = h.messaging.sent_messages();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Congratulations"));
        assert!(sent[0].1.contains("Nitro Classic"));
    }

    #[tokio::test]
    async fn timed_check_on_closed_giveaway_is_a_no_op() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging.set_reactors(entrants(&[1, 2]));
        h.lifecycle.close(id, CloseMode::ManualEnd).await.unwrap();
        let sends = h.messaging.sent_messages().len();

        let outcome = h.lifecycle.close(id, CloseMode::TimedCheck).await.unwrap();
        assert_eq!(outcome, CloseOutcome::StillRunning);
        assert_eq!(h.messaging.sent_messages().len(), sends);
    }

    #[tokio::test]
    async fn manual_end_twice_is_rejected() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging.set_reactors(entrants(&[1, 2]));

        h.lifecycle.close(id, CloseMode::ManualEnd).await.unwrap();
        assert!(matches!(
            h.lifecycle.close(id, CloseMode::ManualEnd).await,
            Err(Error::AlreadyClosed(other)) if other == id
        ));
    }

    #[tokio::test]
    async fn reroll_requires_a_prior_successful_close() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging.set_reactors(entrants(&[1, 2]));

        assert!(matches!(
            h.lifecycle.close(id, CloseMode::Reroll).await,
            Err(Error::StillOpen(other)) if other == id
        ));
    }

    #[tokio::test]
    async fn reroll_clears_winners_and_draws_with_later_nonces() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging
            .set_reactors(entrants(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]));

        h.lifecycle.close(id, CloseMode::ManualEnd).await.unwrap();
        let outcome = h.lifecycle.close(id, CloseMode::Reroll).await.unwrap();

        // Draws continue the ledger: nonce 2 -> index 2, nonce 3 -> index 6.
        let winners = match outcome {
            CloseOutcome::WinnersDrawn(winners) => winners,
            other => panic!("expected winners, got {:?}", other),
        };
        assert_eq!(
            winners,
            vec![
                WinnerRecord { entrant: EntrantId(3), draw_index: 2, nonce: 2 },
                WinnerRecord { entrant: EntrantId(7), draw_index: 6, nonce: 3 },
            ]
        );

        let stored = h.store.load_giveaway(id).await.unwrap().unwrap();
        assert_eq!(stored.winners, winners);
        assert_eq!(h.seeds.get(CREATOR).await.unwrap().nonce, 4);
    }

    #[tokio::test]
    async fn vanished_message_fails_the_giveaway_terminally() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging.set_missing(true);

        let outcome = h.lifecycle.close(id, CloseMode::ManualEnd).await.unwrap();
        assert_eq!(outcome, CloseOutcome::Failed);

        let stored = h.store.load_giveaway(id).await.unwrap().unwrap();
        assert_eq!(stored.state, GiveawayState::ClosedFailure);
        assert!(h.messaging.sent_messages()[0].1.contains("failed"));

        // Failure is terminal: no reroll, no second end.
        assert!(matches!(
            h.lifecycle.close(id, CloseMode::Reroll).await,
            Err(Error::AlreadyClosed(_))
        ));
        assert!(matches!(
            h.lifecycle.close(id, CloseMode::ManualEnd).await,
            Err(Error::AlreadyClosed(_))
        ));
    }

    #[tokio::test]
    async fn vanished_message_during_timed_refresh_also_fails() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging.set_missing(true);

        let outcome = h.lifecycle.close(id, CloseMode::TimedCheck).await.unwrap();
        assert_eq!(outcome, CloseOutcome::Failed);
        let stored = h.store.load_giveaway(id).await.unwrap().unwrap();
        assert_eq!(stored.state, GiveawayState::ClosedFailure);
    }

    #[tokio::test]
    async fn no_entrants_close_successfully_without_winners() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;

        let outcome = h.lifecycle.close(id, CloseMode::ManualEnd).await.unwrap();
        assert_eq!(outcome, CloseOutcome::NoWinners);

        let stored = h.store.load_giveaway(id).await.unwrap().unwrap();
        assert_eq!(stored.state, GiveawayState::ClosedSuccess);
        assert!(stored.winners.is_empty());
        assert!(h.messaging.sent_messages()[0].1.contains("no winner"));
        assert_eq!(h.seeds.get(CREATOR).await.unwrap().nonce, 0);
    }

    #[tokio::test]
    async fn unknown_giveaway_is_reported() {
        let h = harness().await;
        assert!(matches!(
            h.lifecycle.close(GiveawayId(404), CloseMode::ManualEnd).await,
            Err(Error::GiveawayNotFound(GiveawayId(404)))
        ));
    }

    #[tokio::test]
    async fn released_close_locks_are_pruned() {
        let h = harness().await;
        let first = open_giveaway(&h, 1).await;
        let second = open_giveaway(&h, 1).await;
        h.lifecycle.close(first, CloseMode::ManualEnd).await.unwrap();
        h.lifecycle.close(second, CloseMode::ManualEnd).await.unwrap();

        // Both closes released their locks, so the next acquisition keeps
        // only its own entry in the map.
        let lock = h.lifecycle.close_lock(first).await;
        assert_eq!(h.lifecycle.close_lock_count().await, 1);
        drop(lock);
    }

    #[tokio::test]
    async fn concurrent_manual_ends_produce_exactly_one_winner_set() {
        let h = harness().await;
        let id = open_giveaway(&h, 2).await;
        h.messaging
            .set_reactors(entrants(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]));

        let (a, b) = tokio::join!(
            h.lifecycle.close(id, CloseMode::ManualEnd),
            h.lifecycle.close(id, CloseMode::ManualEnd),
        );
        assert!(a.is_ok() != b.is_ok(), "exactly one close may win");

        // Only the winning close consumed nonces.
        assert_eq!(h.seeds.get(CREATOR).await.unwrap().nonce, 2);
        assert_eq!(h.messaging.sent_messages().len(), 1);
    }
}
