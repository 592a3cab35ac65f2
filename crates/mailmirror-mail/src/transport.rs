use anyhow::Result;
use imap::ClientBuilder;
use imap::ConnectionMode;
use tracing::debug;

use mailmirror_core::MirrorError;

use crate::config::MailboxConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// EXAMINE: flags and message set cannot change.
    ReadOnly,
    /// SELECT: required for STORE and EXPUNGE.
    ReadWrite,
}

/// One authenticated connection scoped to a single folder at a time.
///
/// Uid sets are passed pre-rendered (see [`uid_set`]).
pub trait MailboxTransport {
    /// Opens `folder` and returns its EXISTS count.
    fn select(&mut self, folder: &str, mode: AccessMode) -> Result<u32>;
    fn uid_search_all(&mut self) -> Result<Vec<u32>>;
    /// Raw untagged response bytes for a header fetch of `uid_set`.
    fn uid_fetch_headers(&mut self, uid_set: &str) -> Result<Vec<u8>>;
    fn uid_next(&mut self, folder: &str) -> Result<Option<u32>>;
    fn uid_mark_deleted(&mut self, uid_set: &str) -> Result<()>;
    /// Clears `\Deleted` again, so a later EXPUNGE leaves the set alone.
    fn uid_unmark_deleted(&mut self, uid_set: &str) -> Result<()>;
    fn expunge(&mut self) -> Result<()>;
    fn logout(&mut self) -> Result<()>;
    /// Host and port, for error reports.
    fn endpoint(&self) -> (String, u16);
}

pub struct ImapTransport {
    session: imap::Session<imap::Connection>,
    host: String,
    port: u16,
}

impl ImapTransport {
    pub fn connect(config: &MailboxConfig) -> Result<Self, MirrorError> {
        debug!(host = %config.host, port = config.port, "imap connect start");
        let connectivity = |reason: String| MirrorError::Connectivity {
            host: config.host.clone(),
            port: config.port,
            reason,
        };
        let client = ClientBuilder::new(config.host.as_str(), config.port)
            .tls_kind(imap::TlsKind::Native)
            .mode(ConnectionMode::AutoTls)
            .danger_skip_tls_verify(config.skip_tls_verify)
            .connect()
            .map_err(|err| connectivity(err.to_string()))?;
        debug!("imap connect tcp connected");
        let session = client
            .login(&config.username, &config.password)
            .map_err(|(err, _client)| match &err {
                imap::Error::No(_) | imap::Error::Bad(_) => MirrorError::Authentication {
                    username: config.username.clone(),
                    reason: err.to_string(),
                },
                _ => connectivity(err.to_string()),
            })?;
        debug!(username = %config.username, "imap login ok");
        Ok(Self {
            session,
            host: config.host.clone(),
            port: config.port,
        })
    }
}

impl MailboxTransport for ImapTransport {
    fn select(&mut self, folder: &str, mode: AccessMode) -> Result<u32> {
        let mailbox = match mode {
            AccessMode::ReadOnly => self.session.examine(folder)?,
            AccessMode::ReadWrite => self.session.select(folder)?,
        };
        debug!(folder, ?mode, exists = mailbox.exists, "imap folder opened");
        Ok(mailbox.exists)
    }

    fn uid_search_all(&mut self) -> Result<Vec<u32>> {
        let uids = self.session.uid_search("ALL")?;
        Ok(uids.into_iter().collect())
    }

    fn uid_fetch_headers(&mut self, uid_set: &str) -> Result<Vec<u8>> {
        let raw = self
            .session
            .run_command_and_read_response(header_fetch_command(uid_set))?;
        Ok(raw)
    }

    fn uid_next(&mut self, folder: &str) -> Result<Option<u32>> {
        let status = self.session.status(folder, "(UIDNEXT)")?;
        Ok(status.uid_next)
    }

    fn uid_mark_deleted(&mut self, uid_set: &str) -> Result<()> {
        self.session.uid_store(uid_set, "+FLAGS.SILENT (\\Deleted)")?;
        Ok(())
    }

    fn uid_unmark_deleted(&mut self, uid_set: &str) -> Result<()> {
        self.session.uid_store(uid_set, "-FLAGS.SILENT (\\Deleted)")?;
        Ok(())
    }

    fn expunge(&mut self) -> Result<()> {
        self.session.expunge()?;
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.session.logout()?;
        Ok(())
    }

    fn endpoint(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

/// `BODY.PEEK` keeps the fetch from setting `\Seen`.
pub fn header_fetch_command(uid_set: &str) -> String {
    format!("UID FETCH {} (UID RFC822.SIZE BODY.PEEK[HEADER])", uid_set)
}

pub fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
