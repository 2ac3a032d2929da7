pub mod lock_token;
pub mod record;

pub use lock_token::LockToken;
pub use record::{ActivityType, DurationRecord, Interval};
