use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Authentication failed for {username}: {reason}")]
    Authentication { username: String, reason: String },

    #[error("Connection to {host}:{port} failed: {reason}")]
    Connectivity {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("UID listing failed: {0}")]
    Enumeration(String),

    #[error("Fetch of {} uids failed: {reason}", uids.len())]
    BatchFetch { uids: Vec<u32>, reason: String },

    #[error("Record for uid {uid} could not be decoded: {reason}")]
    RecordDecode { uid: u32, reason: String },

    #[error("Delete of {} uids failed: {reason}", uids.len())]
    BatchDelete { uids: Vec<u32>, reason: String },

    #[error("Confirmation mismatch: expected {expected:?}, got {got:?}")]
    ConfirmationMismatch { expected: String, got: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Local store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl MirrorError {
    /// Uids a batch error applies to. Empty for every other kind.
    pub fn affected_uids(&self) -> &[u32] {
        match self {
            MirrorError::BatchFetch { uids, .. } | MirrorError::BatchDelete { uids, .. } => uids,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
