use thiserror::Error;

use crate::lifecycle::GiveawayId;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between a command arriving and a giveaway
/// result being published.
#[derive(Debug, Error)]
pub enum Error {
    /// User seeds are capped so they fit in seed-info embeds and in the HMAC
    /// message a verifier has to retype.
    #[error("your seed cannot be longer than 200 characters ({0} given)")]
    SeedTooLong(usize),

    #[error("winner count must be between 1 and 20 (got {0})")]
    InvalidWinnerQuota(u32),

    #[error("the prize cannot be longer than 200 characters")]
    PrizeTooLong,

    /// Asking for a draw over an empty participant list is a caller bug, not
    /// a user mistake.
    #[error("a draw requires at least one participant")]
    NoParticipants,

    #[error("no giveaway with ID `{0}` exists")]
    GiveawayNotFound(GiveawayId),

    #[error("giveaway `{0}` already ended")]
    AlreadyClosed(GiveawayId),

    #[error("giveaway `{0}` is still on going")]
    StillOpen(GiveawayId),

    /// The announcement message (or its channel) is gone or unreadable.
    #[error("the giveaway message could not be found")]
    MessageNotFound,

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("discord error: {0}")]
    Discord(#[from] serenity::Error),
}
