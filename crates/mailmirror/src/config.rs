use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use mailmirror_core::MirrorError;
use mailmirror_mail::{
    DEFAULT_FOLDER, DEFAULT_HOST, DEFAULT_PORT, DeletionOptions, MailboxConfig, SyncOptions,
};

pub(crate) const USERNAME_ENV: &str = "MAILMIRROR_USERNAME";
pub(crate) const PASSWORD_ENV: &str = "MAILMIRROR_PASSWORD";
const DEFAULT_DB_PATH: &str = "mailmirror.db";

#[derive(Debug, Clone)]
pub(crate) struct ImapSettings {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) folder: String,
    pub(crate) skip_tls_verify: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct AppConfig {
    pub(crate) db_path: String,
    pub(crate) imap: ImapSettings,
    pub(crate) sync: SyncOptions,
    pub(crate) delete: DeletionOptions,
}

impl AppConfig {
    /// Fails when credentials are missing from both the file and environment.
    pub(crate) fn mailbox_config(&self) -> Result<MailboxConfig, MirrorError> {
        let username = self.imap.username.clone().ok_or_else(|| {
            MirrorError::Config(format!("no username: set [imap].username or {}", USERNAME_ENV))
        })?;
        let password = self.imap.password.clone().ok_or_else(|| {
            MirrorError::Config(format!("no password: set [imap].password or {}", PASSWORD_ENV))
        })?;
        let mut config = MailboxConfig::new(username, password)?
            .with_server(self.imap.host.as_str(), self.imap.port)?
            .with_folder(self.imap.folder.as_str())?;
        config.skip_tls_verify = self.imap.skip_tls_verify;
        Ok(config)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CredentialOverrides {
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
}

impl CredentialOverrides {
    pub(crate) fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|value| !value.is_empty());
        Self {
            username: read(USERNAME_ENV),
            password: read(PASSWORD_ENV),
        }
    }
}

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

pub(crate) fn xdg_state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("state"))
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn config_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("mailmirror.toml"),
        xdg_config_dir().join("mailmirror").join("mailmirror.toml"),
    ]
}

fn load_config_text() -> Option<String> {
    for path in config_path_candidates() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Some(content);
        }
    }
    None
}

pub(crate) fn load_app_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let content = match explicit {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?,
        ),
        None => load_config_text(),
    };
    parse_app_config(content.as_deref(), &CredentialOverrides::from_env())
}

pub(crate) fn parse_app_config(
    content: Option<&str>,
    overrides: &CredentialOverrides,
) -> Result<AppConfig> {
    let value: toml::Value = match content {
        Some(content) => {
            toml::from_str(content).map_err(|e| anyhow!("Invalid config: {}", e))?
        }
        None => toml::Value::Table(Default::default()),
    };

    let db_path = value
        .get("db_path")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_DB_PATH)
        .to_string();

    let imap = value.get("imap");
    let imap_str = |key: &str| {
        imap.and_then(|t| t.get(key))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };
    let port = match imap.and_then(|t| t.get("port")).and_then(|v| v.as_integer()) {
        Some(port) => u16::try_from(port).map_err(|_| anyhow!("Invalid [imap].port {}", port))?,
        None => DEFAULT_PORT,
    };
    let imap = ImapSettings {
        host: imap_str("host").unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port,
        username: overrides.username.clone().or_else(|| imap_str("username")),
        password: overrides.password.clone().or_else(|| imap_str("password")),
        folder: imap_str("folder").unwrap_or_else(|| DEFAULT_FOLDER.to_string()),
        skip_tls_verify: imap
            .and_then(|t| t.get("skip_tls_verify"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    };

    let sync_defaults = SyncOptions::default();
    let sync_table = value.get("sync");
    let sync = SyncOptions::new(
        batch_size_field(sync_table, sync_defaults.batch_size)?,
        delay_field(sync_table, sync_defaults.inter_batch_delay),
        false,
    )?;

    let delete_defaults = DeletionOptions::default();
    let delete_table = value.get("delete");
    let delete = DeletionOptions::new(
        batch_size_field(delete_table, delete_defaults.batch_size)?,
        delay_field(delete_table, delete_defaults.inter_batch_delay),
        delete_table
            .and_then(|t| t.get("expunge"))
            .and_then(|v| v.as_bool())
            .unwrap_or(delete_defaults.expunge),
    )?;

    Ok(AppConfig {
        db_path,
        imap,
        sync,
        delete,
    })
}

fn batch_size_field(table: Option<&toml::Value>, default: usize) -> Result<usize> {
    match table.and_then(|t| t.get("batch_size")).and_then(|v| v.as_integer()) {
        Some(size) => usize::try_from(size).map_err(|_| anyhow!("Invalid batch_size {}", size)),
        None => Ok(default),
    }
}

fn delay_field(table: Option<&toml::Value>, default: Duration) -> Duration {
    table
        .and_then(|t| t.get("batch_delay_ms"))
        .and_then(|v| v.as_integer())
        .map(|ms| Duration::from_millis(ms.max(0) as u64))
        .unwrap_or(default)
}
