use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "mailmirror",
    version,
    about = "Local metadata mirror of one IMAP folder"
)]
pub(crate) struct Cli {
    /// Config file. Defaults to ./mailmirror.toml, then the XDG config dir.
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Mirror new messages into the local store.
    Fetch(FetchCmd),
    /// Show the newest messages without storing them.
    Sample(SampleCmd),
    /// Cursor and counts of the local store.
    Status,
    /// Preview or delete messages on the server.
    Delete(DeleteCmd),
}

#[derive(Args, Debug)]
pub(crate) struct FetchCmd {
    /// Enumerate the whole folder instead of resuming from the cursor.
    #[arg(long)]
    pub(crate) full: bool,
    #[arg(long = "batch-size")]
    pub(crate) batch_size: Option<usize>,
    #[arg(long = "delay-ms")]
    pub(crate) delay_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub(crate) struct SampleCmd {
    #[arg(long, default_value_t = 10)]
    pub(crate) count: usize,
}

#[derive(Args, Debug)]
pub(crate) struct DeleteCmd {
    /// UIDs, comma or space separated.
    pub(crate) uids: Vec<String>,
    /// Read UIDs from a file, `-` for stdin.
    #[arg(long)]
    pub(crate) file: Option<PathBuf>,
    /// Sender address substring. Repeatable, any match selects.
    #[arg(long = "sender")]
    pub(crate) senders: Vec<String>,
    /// Only messages dated before this (YYYY-MM-DD or an RFC 2822 date).
    #[arg(long)]
    pub(crate) before: Option<String>,
    #[arg(long = "min-size")]
    pub(crate) min_size: Option<u32>,
    #[arg(long)]
    pub(crate) subject: Option<String>,
    /// Actually delete. Without it the command only previews.
    #[arg(long)]
    pub(crate) confirm: bool,
    /// Skip the typed confirmation prompt.
    #[arg(long, requires = "confirm")]
    pub(crate) yes: bool,
    #[arg(long = "batch-size")]
    pub(crate) batch_size: Option<usize>,
    #[arg(long = "delay-ms")]
    pub(crate) delay_ms: Option<u64>,
    /// Flag messages \Deleted without expunging them.
    #[arg(long = "no-expunge")]
    pub(crate) no_expunge: bool,
}
