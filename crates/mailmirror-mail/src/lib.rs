mod config;
mod enumerate;
pub mod memory;
mod response;
mod retriever;
mod session;
mod transport;

pub use config::{
    DEFAULT_FOLDER, DEFAULT_HOST, DEFAULT_PORT, DeletionOptions, MailboxConfig, SyncOptions,
};
pub use enumerate::exclude_tombstoned;
pub use response::{FetchElement, ResponseDecoder, decode_fetch_response};
pub use retriever::{BatchFetcher, FetchedChunk, RawHeaders, plan_chunks};
pub use session::Session;
pub use transport::{AccessMode, ImapTransport, MailboxTransport, header_fetch_command, uid_set};
