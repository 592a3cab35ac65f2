mod error;
mod model;
mod store;

pub use error::{MirrorError, Result};
pub use model::{
    CandidateQuery, MailboxItem, SyncCursor, Tombstone, format_timestamp, parse_timestamp,
};
pub use store::{MirrorStore, SqliteMirrorStore};
