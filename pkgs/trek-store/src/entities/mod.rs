//! Sea-ORM entities for trek-store

pub mod conversations;
pub mod messages;
pub mod participants;
pub mod profiles;

pub use conversations::Entity as Conversations;
pub use messages::Entity as Messages;
pub use participants::Entity as Participants;
pub use profiles::Entity as Profiles;

use chrono::{DateTime, Utc};

/// Stored timestamps are microseconds since the Unix epoch
pub(crate) fn to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}
