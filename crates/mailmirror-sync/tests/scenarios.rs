use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mailmirror_core::{CandidateQuery, MirrorError, MirrorStore, SqliteMirrorStore};
use mailmirror_mail::memory::{Command, MemoryMailbox};
use mailmirror_mail::{AccessMode, DeletionOptions, Session, SyncOptions};
use mailmirror_sync::{Confirmation, DeletionPlan, run_sync, sample_recent};

fn temp_db_path(tag: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!(
        "mailmirror-sync-{}-{}-{}.db",
        tag,
        std::process::id(),
        ts
    ))
}

async fn fresh_store(tag: &str) -> anyhow::Result<(SqliteMirrorStore, PathBuf)> {
    let db_path = temp_db_path(tag);
    let _ = std::fs::remove_file(&db_path);
    let store = SqliteMirrorStore::open(
        db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("invalid temp db path"))?,
    )
    .await?;
    Ok((store, db_path))
}

fn sync_options(batch_size: usize) -> SyncOptions {
    SyncOptions::new(batch_size, Duration::ZERO, false).unwrap()
}

fn delete_options(batch_size: usize) -> DeletionOptions {
    DeletionOptions::new(batch_size, Duration::ZERO, true).unwrap()
}

#[tokio::test]
async fn first_sync_mirrors_the_folder_and_sets_the_cursor() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("first").await?;
    let mailbox = MemoryMailbox::with_generated_messages([10, 20, 30]);
    let mut session = Session::with_transport(mailbox.clone(), "[Gmail]/All Mail")?;

    let report = run_sync(&mut session, &store, &sync_options(100)).await?;

    assert_eq!(report.listed, 3);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.cursor_before, 0);
    assert_eq!(report.cursor_after, 30);
    assert_eq!(report.remote_total_estimate, 31);
    assert_eq!(store.count_items().await?, 3);
    assert_eq!(store.cursor().await?.last_seen_uid, 30);

    let item = store
        .get_item(20)
        .await?
        .ok_or_else(|| anyhow::anyhow!("uid 20 not mirrored"))?;
    assert_eq!(item.sender_address, "sender20@example.com");
    assert_eq!(item.subject, "Message 20");
    assert!(item.normalized_timestamp.is_some());
    assert!(
        !mailbox
            .commands()
            .contains(&Command::Select(AccessMode::ReadWrite))
    );

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn repeated_sync_adds_nothing() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("idempotent").await?;
    let mailbox = MemoryMailbox::with_generated_messages([10, 20, 30]);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;

    run_sync(&mut session, &store, &sync_options(2)).await?;
    let again = run_sync(&mut session, &store, &sync_options(2)).await?;
    assert_eq!(again.listed, 0);
    assert_eq!(again.inserted, 0);
    assert_eq!(again.cursor_after, 30);

    let full = SyncOptions::new(2, Duration::ZERO, true)?;
    let rescan = run_sync(&mut session, &store, &full).await?;
    assert_eq!(rescan.considered, 3);
    assert_eq!(rescan.inserted, 0);
    assert_eq!(rescan.already_present, 3);
    assert_eq!(rescan.cursor_after, 30);
    assert_eq!(store.count_items().await?, 3);

    mailbox.insert(45, "From: late@example.com\r\nSubject: late\r\n\r\n", 64);
    let incremental = run_sync(&mut session, &store, &sync_options(2)).await?;
    assert_eq!(incremental.listed, 1);
    assert_eq!(incremental.inserted, 1);
    assert_eq!(incremental.cursor_after, 45);

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn failed_chunk_holds_the_cursor_and_the_next_run_recovers() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("partial").await?;
    let mailbox = MemoryMailbox::with_generated_messages(1..=100);
    mailbox.fail_fetch_call(1);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;

    let report = run_sync(&mut session, &store, &sync_options(40)).await?;
    assert_eq!(report.chunks, 3);
    assert_eq!(report.failed_chunks, 1);
    assert_eq!(report.fetch_errors, 40);
    assert_eq!(report.considered, 60);
    assert_eq!(report.inserted, 60);
    assert_eq!(report.cursor_after, 40);
    assert_eq!(mailbox.fetch_commands().len(), 3);
    assert!(store.get_item(41).await?.is_none());
    assert!(store.get_item(81).await?.is_some());

    let retry = run_sync(&mut session, &store, &sync_options(40)).await?;
    assert_eq!(retry.listed, 60);
    assert_eq!(retry.failed_chunks, 0);
    assert_eq!(retry.inserted, 40);
    assert_eq!(retry.already_present, 20);
    assert_eq!(retry.cursor_after, 100);
    assert_eq!(store.count_items().await?, 100);

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn malformed_elements_are_counted_without_losing_records() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("malformed").await?;
    let mailbox = MemoryMailbox::with_generated_messages([1, 2, 3]);
    mailbox.inject_fetch_noise(b"* 9 FETCH (FLAGS (\\Seen))\r\n".to_vec());
    mailbox.hide_uid_next();
    let mut session = Session::with_transport(mailbox, "INBOX")?;

    let report = run_sync(&mut session, &store, &sync_options(10)).await?;
    assert_eq!(report.inserted, 3);
    assert_eq!(report.decode_errors, 1);
    assert_eq!(report.cursor_after, 3);
    assert_eq!(report.remote_total_estimate, 3);

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn deleted_uid_is_tombstoned_and_never_fetched_again() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("delete").await?;
    let mailbox = MemoryMailbox::with_generated_messages([10, 20, 30]);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;
    run_sync(&mut session, &store, &sync_options(100)).await?;

    let plan = DeletionPlan::from_uids([20]);
    let confirmed = plan.confirm(&Confirmation::Typed("DELETE 1".to_string()))?;
    let report = confirmed
        .execute(&mut session, &store, &delete_options(50))
        .await?;

    assert_eq!(report.deleted, 1);
    assert_eq!(report.tombstoned, 1);
    assert_eq!(report.failed, 0);
    assert!(!mailbox.contains(20));
    assert!(store.get_item(20).await?.is_none());
    assert_eq!(store.excluded_uids().await?, HashSet::from([20]));
    assert_eq!(session.mode(), Some(AccessMode::ReadOnly));

    // A lagging listing still reports 20.
    mailbox.report_expunged_in_search();
    mailbox.insert(40, "From: new@example.com\r\n\r\n", 10);
    mailbox.clear_commands();
    let full = SyncOptions::new(100, Duration::ZERO, true)?;
    let resync = run_sync(&mut session, &store, &full).await?;

    assert_eq!(resync.listed, 4);
    assert_eq!(resync.excluded, 1);
    assert_eq!(resync.inserted, 1);
    assert_eq!(mailbox.fetch_commands(), vec!["10,30,40"]);
    assert!(store.get_item(20).await?.is_none());

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn mismatched_confirmation_touches_nothing() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("mismatch").await?;
    let mailbox = MemoryMailbox::with_generated_messages([10, 20]);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;
    run_sync(&mut session, &store, &sync_options(100)).await?;
    mailbox.clear_commands();

    let plan = DeletionPlan::from_uids([10, 20]);
    let typed = plan.confirm(&Confirmation::Typed("delete 2".to_string()));
    assert!(matches!(
        typed,
        Err(MirrorError::ConfirmationMismatch { .. })
    ));
    assert!(plan.confirm(&Confirmation::Count(1)).is_err());

    assert!(mailbox.commands().is_empty());
    assert_eq!(store.count_items().await?, 2);
    assert_eq!(store.count_tombstones().await?, 0);
    assert_eq!(mailbox.uids(), vec![10, 20]);

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn failed_delete_batch_is_counted_and_not_tombstoned() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("failed-delete").await?;
    let mailbox = MemoryMailbox::with_generated_messages(1..=5);
    mailbox.fail_store_call(1);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;
    run_sync(&mut session, &store, &sync_options(100)).await?;

    let plan = DeletionPlan::from_uids(1..=5);
    let report = plan
        .confirm(&Confirmation::Count(5))?
        .execute(&mut session, &store, &delete_options(2))
        .await?;

    assert_eq!(report.batches, 3);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.deleted, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(report.failed_uids, vec![3, 4]);
    assert_eq!(store.excluded_uids().await?, HashSet::from([1, 2, 5]));
    assert_eq!(mailbox.uids(), vec![3, 4]);
    assert!(store.get_item(3).await?.is_some());
    assert_eq!(session.mode(), Some(AccessMode::ReadOnly));
    assert_eq!(
        mailbox.commands().last(),
        Some(&Command::Select(AccessMode::ReadOnly))
    );

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn flag_only_deletion_skips_expunge() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("flag-only").await?;
    let mailbox = MemoryMailbox::with_generated_messages([7, 8]);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;
    run_sync(&mut session, &store, &sync_options(100)).await?;

    let options = DeletionOptions::new(10, Duration::ZERO, false)?;
    let report = DeletionPlan::from_uids([7])
        .confirm(&Confirmation::Count(1))?
        .execute(&mut session, &store, &options)
        .await?;

    assert_eq!(report.deleted, 1);
    assert!(!report.expunged);
    assert!(mailbox.is_flagged_deleted(7));
    assert!(!mailbox.commands().contains(&Command::Expunge));
    assert!(store.get_item(7).await?.is_none());

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn query_plans_preview_without_mutation() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("query").await?;
    let mailbox = MemoryMailbox::with_generated_messages([1, 2, 3, 4]);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;
    run_sync(&mut session, &store, &sync_options(100)).await?;

    let empty = DeletionPlan::from_query(&store, &CandidateQuery::default()).await;
    assert!(matches!(empty, Err(MirrorError::Config(_))));

    let query = CandidateQuery {
        sender_patterns: vec!["SENDER2@".to_string(), "sender4@".to_string()],
        ..CandidateQuery::default()
    };
    let plan = DeletionPlan::from_query(&store, &query).await?;
    assert_eq!(plan.uids(), &[2, 4]);

    let mixed = DeletionPlan::from_uids([2, 99]);
    let preview = mixed.preview(&store).await?;
    assert_eq!(preview.items.len(), 1);
    assert_eq!(preview.not_found, vec![99]);
    assert_eq!(preview.total_size, u64::from(preview.items[0].size_bytes));

    assert_eq!(store.count_items().await?, 4);
    assert_eq!(mailbox.uids(), vec![1, 2, 3, 4]);

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn sample_returns_newest_messages_without_storing() -> anyhow::Result<()> {
    let mailbox = MemoryMailbox::with_generated_messages([3, 9, 12, 15]);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;

    let items = sample_recent(&mut session, 2).await?;
    assert_eq!(items.iter().map(|item| item.uid).collect::<Vec<_>>(), vec![15, 12]);
    assert_eq!(items[0].subject, "Message 15");
    assert_eq!(mailbox.fetch_commands(), vec!["12,15"]);
    assert!(sample_recent(&mut session, 0).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn omitted_uid_holds_the_cursor_until_it_is_stored() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("omitted").await?;
    let mailbox = MemoryMailbox::with_generated_messages([1, 2, 3]);
    mailbox.omit_from_next_fetch(2);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;

    let first = run_sync(&mut session, &store, &sync_options(10)).await?;
    assert_eq!(first.inserted, 2);
    assert_eq!(first.missing, 1);
    assert_eq!(first.cursor_after, 1);
    assert_eq!(first.record_errors.len(), 1);
    assert!(first.record_errors[0].contains("uid 2"));
    assert!(store.get_item(2).await?.is_none());

    let second = run_sync(&mut session, &store, &sync_options(10)).await?;
    assert_eq!(second.listed, 2);
    assert_eq!(second.inserted, 1);
    assert_eq!(second.already_present, 1);
    assert_eq!(second.cursor_after, 3);
    assert!(second.record_errors.is_empty());
    assert!(store.get_item(2).await?.is_some());

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn failed_expunge_unflags_the_batch_and_leaves_it_mirrored() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("expunge-revert").await?;
    let mailbox = MemoryMailbox::with_generated_messages([1, 2]);
    mailbox.fail_expunge_call(0);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;
    run_sync(&mut session, &store, &sync_options(100)).await?;

    let report = DeletionPlan::from_uids([1, 2])
        .confirm(&Confirmation::Count(2))?
        .execute(&mut session, &store, &delete_options(1))
        .await?;

    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_uids, vec![1]);
    assert!(mailbox.commands().contains(&Command::Unflag("1".to_string())));
    assert_eq!(mailbox.uids(), vec![1]);
    assert!(!mailbox.is_flagged_deleted(1));
    assert!(store.get_item(1).await?.is_some());
    assert_eq!(store.excluded_uids().await?, HashSet::from([2]));

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}

#[tokio::test]
async fn still_flagged_batch_is_tombstoned_by_the_next_expunge() -> anyhow::Result<()> {
    let (store, db_path) = fresh_store("expunge-sweep").await?;
    let mailbox = MemoryMailbox::with_generated_messages([1, 2, 3]);
    mailbox.fail_expunge_call(0);
    mailbox.fail_unflag_call(0);
    let mut session = Session::with_transport(mailbox.clone(), "INBOX")?;
    run_sync(&mut session, &store, &sync_options(100)).await?;

    let report = DeletionPlan::from_uids([1, 2])
        .confirm(&Confirmation::Count(2))?
        .execute(&mut session, &store, &delete_options(1))
        .await?;

    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 0);
    assert!(report.failed_uids.is_empty());
    assert_eq!(report.failed_batches, 1);
    assert_eq!(mailbox.uids(), vec![3]);
    assert_eq!(store.excluded_uids().await?, HashSet::from([1, 2]));
    assert!(store.get_item(1).await?.is_none());

    let full = SyncOptions::new(100, Duration::ZERO, true)?;
    let resync = run_sync(&mut session, &store, &full).await?;
    assert_eq!(resync.listed, 1);
    assert_eq!(store.count_items().await?, 1);

    let _ = std::fs::remove_file(&db_path);
    Ok(())
}
