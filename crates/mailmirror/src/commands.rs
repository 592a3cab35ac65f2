use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::warn;

use mailmirror_content::parse_date;
use mailmirror_core::{CandidateQuery, MirrorStore, SqliteMirrorStore};
use mailmirror_mail::{DeletionOptions, Session, SyncOptions};
use mailmirror_sync::{Confirmation, DeletionPlan, run_sync, sample_recent};

use crate::cli::{Cli, CliCommand, DeleteCmd, FetchCmd, SampleCmd};
use crate::config::{AppConfig, load_app_config};
use crate::output::output_ok;
use crate::uid_input::{UidList, parse_uid_text, read_uid_source};

pub(crate) fn run_cli(rt: &Runtime, cli: Cli) -> Result<()> {
    let config = load_app_config(cli.config.as_deref())?;
    match cli.command {
        CliCommand::Fetch(args) => run_fetch(rt, &config, args),
        CliCommand::Sample(args) => run_sample(rt, &config, args),
        CliCommand::Status => run_status(rt, &config),
        CliCommand::Delete(args) => run_delete(rt, &config, args),
    }
}

fn run_fetch(rt: &Runtime, config: &AppConfig, args: FetchCmd) -> Result<()> {
    let options = SyncOptions::new(
        args.batch_size.unwrap_or(config.sync.batch_size),
        args.delay_ms
            .map(Duration::from_millis)
            .unwrap_or(config.sync.inter_batch_delay),
        args.full,
    )?;
    let store = rt.block_on(SqliteMirrorStore::open(&config.db_path))?;
    let mut session = Session::open(&config.mailbox_config()?)?;
    let report = rt.block_on(run_sync(&mut session, &store, &options));
    session.close();
    output_ok(json!(report?))
}

fn run_sample(rt: &Runtime, config: &AppConfig, args: SampleCmd) -> Result<()> {
    let mut session = Session::open(&config.mailbox_config()?)?;
    let items = rt.block_on(sample_recent(&mut session, args.count));
    session.close();
    output_ok(json!(items?))
}

fn run_status(rt: &Runtime, config: &AppConfig) -> Result<()> {
    let store = rt.block_on(SqliteMirrorStore::open(&config.db_path))?;
    let cursor = rt.block_on(store.cursor())?;
    let items = rt.block_on(store.count_items())?;
    let tombstones = rt.block_on(store.count_tombstones())?;
    output_ok(json!({
        "db_path": config.db_path,
        "folder": config.imap.folder,
        "cursor": cursor,
        "items": items,
        "tombstones": tombstones,
    }))
}

fn run_delete(rt: &Runtime, config: &AppConfig, args: DeleteCmd) -> Result<()> {
    let options = DeletionOptions::new(
        args.batch_size.unwrap_or(config.delete.batch_size),
        args.delay_ms
            .map(Duration::from_millis)
            .unwrap_or(config.delete.inter_batch_delay),
        config.delete.expunge && !args.no_expunge,
    )?;
    let query = CandidateQuery {
        sender_patterns: args.senders.clone(),
        before: args.before.as_deref().map(parse_before).transpose()?,
        min_size: args.min_size,
        subject_contains: args.subject.clone(),
    };
    let explicit = collect_uids(&args)?;
    if explicit.is_some() && !query.is_empty() {
        return Err(anyhow!("give either uids or filters, not both"));
    }

    let store = rt.block_on(SqliteMirrorStore::open(&config.db_path))?;
    let plan = match explicit {
        Some(uids) => DeletionPlan::from_uids(uids),
        None => rt.block_on(DeletionPlan::from_query(&store, &query))?,
    };
    if plan.is_empty() {
        return output_ok(json!({ "dry_run": !args.confirm, "candidates": 0 }));
    }

    if !args.confirm {
        let preview = rt.block_on(plan.preview(&store))?;
        return output_ok(json!({
            "dry_run": true,
            "candidates": plan.len(),
            "total_size": preview.total_size,
            "not_found": preview.not_found,
            "items": preview.items,
            "confirm_with": plan.expected_confirmation(),
        }));
    }

    let confirmation = if args.yes {
        Confirmation::Count(plan.len())
    } else {
        prompt_confirmation(&plan.expected_confirmation())?
    };
    let confirmed = plan.confirm(&confirmation)?;

    let mut session = Session::open(&config.mailbox_config()?)?;
    let report = rt.block_on(confirmed.execute(&mut session, &store, &options));
    session.close();
    output_ok(json!(report?))
}

/// `None` when neither positional uids nor `--file` were given.
fn collect_uids(args: &DeleteCmd) -> Result<Option<Vec<u32>>> {
    if args.uids.is_empty() && args.file.is_none() {
        return Ok(None);
    }
    let mut text = args.uids.join("\n");
    if let Some(path) = args.file.as_deref() {
        text.push('\n');
        text.push_str(&read_uid_source(path)?);
    }
    let UidList { uids, rejected } = parse_uid_text(&text);
    for token in &rejected {
        warn!(token = %token, "ignoring value that is not a uid");
    }
    Ok(Some(uids))
}

fn parse_before(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(day) = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        if let Some(midnight) = day.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    parse_date(raw).ok_or_else(|| anyhow!("Invalid date for --before"))
}

fn prompt_confirmation(expected: &str) -> Result<Confirmation> {
    if !io::stdin().is_terminal() {
        return Err(anyhow!(
            "stdin is not a terminal, refusing to prompt (pass --yes to confirm)"
        ));
    }
    eprint!("Type '{}' to delete: ", expected);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(Confirmation::Typed(
        line.trim_end_matches(['\r', '\n']).to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::parse_before;

    #[test]
    fn before_accepts_plain_days_and_mail_dates() {
        assert_eq!(
            parse_before("2024-06-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_before("Sat, 1 Jun 2024 10:00:00 +0000").unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
        );
        assert!(parse_before("whenever").is_err());
    }
}
