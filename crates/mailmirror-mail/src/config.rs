use std::fmt;
use std::time::Duration;

use mailmirror_core::MirrorError;

pub const DEFAULT_HOST: &str = "imap.gmail.com";
pub const DEFAULT_PORT: u16 = 993;
pub const DEFAULT_FOLDER: &str = "[Gmail]/All Mail";

pub const DEFAULT_SYNC_BATCH_SIZE: usize = 100;
pub const DEFAULT_SYNC_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 50;
pub const DEFAULT_DELETE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
    pub skip_tls_verify: bool,
}

impl MailboxConfig {
    /// Credentials for the default server and folder.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, MirrorError> {
        let config = Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: password.into(),
            folder: DEFAULT_FOLDER.to_string(),
            skip_tls_verify: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Result<Self, MirrorError> {
        self.host = host.into();
        self.port = port;
        self.validate()?;
        Ok(self)
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Result<Self, MirrorError> {
        self.folder = folder.into();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), MirrorError> {
        if self.username.trim().is_empty() {
            return Err(MirrorError::Config("username is empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(MirrorError::Config("password is empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(MirrorError::Config("imap host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(MirrorError::Config("imap port must be non-zero".to_string()));
        }
        if self.folder.trim().is_empty() {
            return Err(MirrorError::Config("folder is empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("folder", &self.folder)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    /// Ignore the cursor and enumerate the whole folder.
    pub full_resync: bool,
}

impl SyncOptions {
    pub fn new(
        batch_size: usize,
        inter_batch_delay: Duration,
        full_resync: bool,
    ) -> Result<Self, MirrorError> {
        check_batch_size(batch_size)?;
        Ok(Self {
            batch_size,
            inter_batch_delay,
            full_resync,
        })
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            inter_batch_delay: DEFAULT_SYNC_DELAY,
            full_resync: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOptions {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    /// When false, batches are only flagged `\Deleted`.
    pub expunge: bool,
}

impl DeletionOptions {
    pub fn new(
        batch_size: usize,
        inter_batch_delay: Duration,
        expunge: bool,
    ) -> Result<Self, MirrorError> {
        check_batch_size(batch_size)?;
        Ok(Self {
            batch_size,
            inter_batch_delay,
            expunge,
        })
    }
}

impl Default for DeletionOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_DELETE_BATCH_SIZE,
            inter_batch_delay: DEFAULT_DELETE_DELAY,
            expunge: true,
        }
    }
}

fn check_batch_size(batch_size: usize) -> Result<(), MirrorError> {
    if batch_size == 0 {
        return Err(MirrorError::Config("batch size must be at least 1".to_string()));
    }
    Ok(())
}
