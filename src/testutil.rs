//! In-memory collaborator stand-ins for core tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::gateway::{Clock, MessagingGateway};
use crate::lifecycle::Giveaway;
use crate::selector::EntrantId;

/// Messaging gateway whose reactor list and availability are set by tests.
pub struct MockMessaging {
    reactors: Mutex<Vec<EntrantId>>,
    missing: AtomicBool,
    sent: Mutex<Vec<(u64, String)>>,
    edits: AtomicUsize,
}

impl MockMessaging {
    pub fn new() -> Self {
        Self {
            reactors: Mutex::new(Vec::new()),
            missing: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            edits: AtomicUsize::new(0),
        }
    }

    pub fn set_reactors(&self, reactors: Vec<EntrantId>) {
        *self.reactors.lock().unwrap() = reactors;
    }

    /// Simulates the announcement message having been deleted.
    pub fn set_missing(&self, missing: bool) {
        self.missing.store(missing, Ordering::SeqCst);
    }

    pub fn sent_messages(&self) -> Vec<(u64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn edit_count(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingGateway for MockMessaging {
    async fn fetch_reactors(&self, _channel_id: u64, _message_id: u64) -> Result<Vec<EntrantId>> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(Error::MessageNotFound);
        }
        Ok(self.reactors.lock().unwrap().clone())
    }

    async fn edit_announcement(&self, _giveaway: &Giveaway) -> Result<()> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(Error::MessageNotFound);
        }
        self.edits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, content: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id, content.to_string()));
        Ok(())
    }
}

/// Clock that only moves when a test pushes it.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
