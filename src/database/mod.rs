pub mod db;
pub mod queue;
pub mod records;
pub mod state;

pub use db::Database;
pub use queue::SyncQueue;
pub use records::RecordStore;
pub use state::AppState;
