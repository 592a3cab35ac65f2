use anyhow::Result;
use tracing::{debug, warn};

use mailmirror_core::MirrorError;

use crate::config::MailboxConfig;
use crate::transport::{AccessMode, ImapTransport, MailboxTransport, uid_set};

/// The single connection used for a run, bound to one folder.
///
/// Reads always happen in read-only mode. Write access is only available
/// inside [`Session::with_write_access`].
pub struct Session<T: MailboxTransport> {
    transport: T,
    folder: String,
    /// `None` when the folder state is unknown, e.g. after a failed restore.
    mode: Option<AccessMode>,
    exists: u32,
    closed: bool,
}

impl Session<ImapTransport> {
    pub fn open(config: &MailboxConfig) -> Result<Self, MirrorError> {
        config.validate()?;
        let transport = ImapTransport::connect(config)?;
        Self::with_transport(transport, config.folder.as_str())
    }
}

impl<T: MailboxTransport> Session<T> {
    /// Wraps an authenticated transport and examines `folder`.
    pub fn with_transport(transport: T, folder: impl Into<String>) -> Result<Self, MirrorError> {
        let mut session = Self {
            transport,
            folder: folder.into(),
            mode: None,
            exists: 0,
            closed: false,
        };
        if let Err(err) = session.ensure_read_only() {
            let (host, port) = session.transport.endpoint();
            return Err(MirrorError::Connectivity {
                host,
                port,
                reason: format!("examine {:?} failed: {:#}", session.folder, err),
            });
        }
        Ok(session)
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn mode(&self) -> Option<AccessMode> {
        self.mode
    }

    /// EXISTS count reported by the most recent select.
    pub fn exists(&self) -> u32 {
        self.exists
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn ensure_read_only(&mut self) -> Result<()> {
        if self.mode == Some(AccessMode::ReadOnly) {
            return Ok(());
        }
        self.open_folder(AccessMode::ReadOnly)
    }

    /// Runs `f` with the folder selected read-write, then examines it again
    /// whether `f` returned, failed or panicked.
    pub fn with_write_access<R>(&mut self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        self.open_folder(AccessMode::ReadWrite)?;
        let guard = ReadOnlyRestore { session: self };
        let result = f(&mut guard.session.transport);
        drop(guard);
        result
    }

    pub fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<u8>> {
        self.ensure_read_only()?;
        self.transport.uid_fetch_headers(&uid_set(uids))
    }

    pub fn search_all(&mut self) -> Result<Vec<u32>> {
        self.ensure_read_only()?;
        self.transport.uid_search_all()
    }

    pub fn uid_next(&mut self) -> Result<Option<u32>> {
        self.ensure_read_only()?;
        self.transport.uid_next(&self.folder)
    }

    /// Logs out. Errors are logged and otherwise ignored.
    pub fn close(mut self) {
        self.logout();
    }

    fn open_folder(&mut self, mode: AccessMode) -> Result<()> {
        self.mode = None;
        let exists = self.transport.select(&self.folder, mode)?;
        self.exists = exists;
        self.mode = Some(mode);
        debug!(folder = %self.folder, ?mode, exists, "folder mode set");
        Ok(())
    }

    fn logout(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.transport.logout() {
            warn!(error = %err, "logout failed");
        }
    }
}

impl<T: MailboxTransport> Drop for Session<T> {
    fn drop(&mut self) {
        self.logout();
    }
}

struct ReadOnlyRestore<'s, T: MailboxTransport> {
    session: &'s mut Session<T>,
}

impl<T: MailboxTransport> Drop for ReadOnlyRestore<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.session.open_folder(AccessMode::ReadOnly) {
            warn!(
                folder = %self.session.folder,
                error = %err,
                "restoring read-only access failed, mode unknown"
            );
        }
    }
}
