pub mod review_record;
pub mod sm2;
pub mod sync_entry;

pub use review_record::{ItemStatus, MIN_EASE_FACTOR, ReviewRecord};
pub use sm2::{Quality, schedule};
pub use sync_entry::{DeadLetter, EntryState, SyncMethod, SyncQueueEntry, SyncTarget};
