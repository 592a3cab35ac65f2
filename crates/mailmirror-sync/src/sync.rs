use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use mailmirror_content::normalize;
use mailmirror_core::{MailboxItem, MirrorError, MirrorStore};
use mailmirror_mail::{
    BatchFetcher, MailboxTransport, Session, SyncOptions, exclude_tombstoned,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Uids returned by the enumerator.
    pub listed: usize,
    /// Listed uids dropped because they are tombstoned.
    pub excluded: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    /// Records received and normalized.
    pub considered: usize,
    pub inserted: usize,
    pub already_present: usize,
    /// Uids belonging to failed chunks.
    pub fetch_errors: usize,
    pub decode_errors: usize,
    /// Requested uids a successful chunk returned no record for.
    pub missing: usize,
    /// The first few of those, as decode errors.
    pub record_errors: Vec<String>,
    pub cursor_before: u32,
    pub cursor_after: u32,
    pub remote_total_estimate: u32,
}

const RECORD_ERROR_SAMPLE: usize = 20;

/// Brings the store up to date with the folder.
///
/// The cursor is written once at the end. It moves to the highest stored uid
/// below the first uid that was not stored, whether its chunk failed or the
/// response carried no record for it, and never backwards.
pub async fn run_sync<T, S>(
    session: &mut Session<T>,
    store: &S,
    options: &SyncOptions,
) -> Result<SyncReport, MirrorError>
where
    T: MailboxTransport,
    S: MirrorStore + ?Sized,
{
    let cursor = store.cursor().await?;
    let mut report = SyncReport {
        cursor_before: cursor.last_seen_uid,
        ..SyncReport::default()
    };

    let listed = if options.full_resync || cursor.last_seen_uid == 0 {
        session.list_all()?
    } else {
        session.list_since(cursor.last_seen_uid)?
    };
    let excluded = store.excluded_uids().await?;
    let candidates = exclude_tombstoned(&listed, &excluded);
    report.listed = listed.len();
    report.excluded = listed.len() - candidates.len();
    info!(
        cursor = cursor.last_seen_uid,
        listed = report.listed,
        excluded = report.excluded,
        full = options.full_resync,
        "sync start"
    );

    let mut durable_high = cursor.last_seen_uid;
    let mut first_failed: Option<u32> = None;
    {
        let mut fetcher = BatchFetcher::new(
            session,
            &candidates,
            options.batch_size,
            options.inter_batch_delay,
        );
        report.chunks = fetcher.chunk_count();
        while let Some(outcome) = fetcher.next_chunk().await {
            let chunk = match outcome {
                Ok(chunk) => chunk,
                Err(err) => {
                    let uids = err.affected_uids();
                    report.failed_chunks += 1;
                    report.fetch_errors += uids.len();
                    if first_failed.is_none() {
                        first_failed = uids.first().copied();
                    }
                    warn!(error = %err, "chunk skipped, continuing");
                    continue;
                }
            };

            let items: Vec<MailboxItem> = chunk
                .records
                .iter()
                .map(|(uid, raw)| normalize(*uid, &raw.bytes, raw.size))
                .collect();
            let inserted = store.insert_batch(&items).await?;

            report.considered += items.len();
            report.inserted += inserted;
            report.already_present += items.len() - inserted;
            report.decode_errors += chunk.malformed;
            report.missing += chunk.missing.len();
            for uid in &chunk.missing {
                let err = MirrorError::RecordDecode {
                    uid: *uid,
                    reason: if chunk.malformed > 0 {
                        "no record decoded from the fetch response".to_string()
                    } else {
                        "omitted from the fetch response".to_string()
                    },
                };
                debug!(chunk = chunk.index, error = %err, "uid not stored");
                if report.record_errors.len() < RECORD_ERROR_SAMPLE {
                    report.record_errors.push(err.to_string());
                }
            }

            if first_failed.is_none() {
                let gap = chunk.missing.first().copied();
                let stored = match gap {
                    Some(gap) => chunk.records.range(..gap).next_back(),
                    None => chunk.records.iter().next_back(),
                };
                if let Some((high, _)) = stored {
                    durable_high = durable_high.max(*high);
                }
                first_failed = gap;
            }
            debug!(
                chunk = chunk.index,
                records = items.len(),
                inserted,
                malformed = chunk.malformed,
                "chunk stored"
            );
        }
    }

    report.remote_total_estimate = match session.uid_next() {
        Ok(Some(uid_next)) => uid_next,
        Ok(None) => session.exists(),
        Err(err) => {
            warn!(error = %format!("{:#}", err), "UIDNEXT unavailable, using EXISTS");
            session.exists()
        }
    };

    store
        .advance_cursor(durable_high, report.remote_total_estimate)
        .await?;
    report.cursor_after = store.cursor().await?.last_seen_uid;
    info!(
        inserted = report.inserted,
        fetch_errors = report.fetch_errors,
        decode_errors = report.decode_errors,
        cursor = report.cursor_after,
        "sync done"
    );
    Ok(report)
}

/// Normalizes the `count` highest uids without touching the store, newest
/// first.
pub async fn sample_recent<T: MailboxTransport>(
    session: &mut Session<T>,
    count: usize,
) -> Result<Vec<MailboxItem>, MirrorError> {
    let uids = session.list_all()?;
    let recent = &uids[uids.len().saturating_sub(count)..];
    if recent.is_empty() {
        return Ok(Vec::new());
    }
    let mut fetcher = BatchFetcher::new(session, recent, recent.len(), Duration::ZERO);
    let mut items = Vec::new();
    while let Some(outcome) = fetcher.next_chunk().await {
        let chunk = outcome?;
        items.extend(
            chunk
                .records
                .iter()
                .map(|(uid, raw)| normalize(*uid, &raw.bytes, raw.size)),
        );
    }
    items.sort_by(|a, b| b.uid.cmp(&a.uid));
    Ok(items)
}
