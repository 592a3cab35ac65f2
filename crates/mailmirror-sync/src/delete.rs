use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use mailmirror_core::{CandidateQuery, MailboxItem, MirrorError, MirrorStore, SqliteMirrorStore};
use mailmirror_mail::{DeletionOptions, MailboxTransport, Session, plan_chunks, uid_set};

/// How the operator approved a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Text typed at the prompt. Must equal `DELETE <count>` exactly.
    Typed(String),
    /// Non-interactive approval carrying the expected candidate count.
    Count(usize),
}

/// Candidate uids awaiting confirmation. Building or previewing a plan
/// changes nothing locally or remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionPlan {
    uids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionPreview {
    pub items: Vec<MailboxItem>,
    /// Candidates with no local record.
    pub not_found: Vec<u32>,
    pub total_size: u64,
}

impl DeletionPlan {
    pub fn from_uids(uids: impl IntoIterator<Item = u32>) -> Self {
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        uids.dedup();
        Self { uids }
    }

    /// Refuses an empty query so a missing filter can never select the whole
    /// mirror.
    pub async fn from_query(
        store: &SqliteMirrorStore,
        query: &CandidateQuery,
    ) -> Result<Self, MirrorError> {
        if query.is_empty() {
            return Err(MirrorError::Config(
                "candidate query needs at least one filter".to_string(),
            ));
        }
        let uids = store.find_uids(query).await?;
        Ok(Self::from_uids(uids))
    }

    pub fn uids(&self) -> &[u32] {
        &self.uids
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    pub async fn preview(&self, store: &SqliteMirrorStore) -> Result<DeletionPreview, MirrorError> {
        let items = store.items_for_uids(&self.uids).await?;
        let found: HashSet<u32> = items.iter().map(|item| item.uid).collect();
        let not_found = self
            .uids
            .iter()
            .copied()
            .filter(|uid| !found.contains(uid))
            .collect();
        let total_size = items.iter().map(|item| u64::from(item.size_bytes)).sum();
        Ok(DeletionPreview {
            items,
            not_found,
            total_size,
        })
    }

    pub fn expected_confirmation(&self) -> String {
        format!("DELETE {}", self.uids.len())
    }

    pub fn confirm(&self, confirmation: &Confirmation) -> Result<ConfirmedDeletion, MirrorError> {
        let expected = self.expected_confirmation();
        let accepted = match confirmation {
            Confirmation::Typed(text) => *text == expected,
            Confirmation::Count(count) => *count == self.uids.len(),
        };
        if !accepted {
            let got = match confirmation {
                Confirmation::Typed(text) => text.clone(),
                Confirmation::Count(count) => format!("DELETE {}", count),
            };
            warn!(%expected, %got, "deletion not confirmed");
            return Err(MirrorError::ConfirmationMismatch { expected, got });
        }
        Ok(ConfirmedDeletion {
            uids: self.uids.clone(),
        })
    }
}

/// A plan the operator approved. Only [`DeletionPlan::confirm`] creates one.
#[derive(Debug)]
pub struct ConfirmedDeletion {
    uids: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub requested: usize,
    pub deleted: usize,
    pub failed: usize,
    pub failed_uids: Vec<u32>,
    pub tombstoned: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub expunged: bool,
}

impl ConfirmedDeletion {
    pub fn uids(&self) -> &[u32] {
        &self.uids
    }

    /// Flags and expunges batch by batch under write access. A batch is
    /// tombstoned as soon as the server acknowledges it. A failed batch is
    /// counted and skipped. A store failure ends the run.
    ///
    /// When EXPUNGE fails the batch is unflagged again. If that fails too the
    /// uids stay `\Deleted` remotely, so they are tombstoned along with the
    /// next batch whose EXPUNGE succeeds.
    pub async fn execute<T, S>(
        self,
        session: &mut Session<T>,
        store: &S,
        options: &DeletionOptions,
    ) -> Result<DeletionReport, MirrorError>
    where
        T: MailboxTransport,
        S: MirrorStore + ?Sized,
    {
        let batches = plan_chunks(&self.uids, options.batch_size);
        let mut report = DeletionReport {
            requested: self.uids.len(),
            batches: batches.len(),
            expunged: options.expunge,
            ..DeletionReport::default()
        };
        info!(
            requested = report.requested,
            batches = report.batches,
            expunge = options.expunge,
            "deletion start"
        );

        let mut left_flagged: Vec<u32> = Vec::new();
        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !options.inter_batch_delay.is_zero() {
                tokio::time::sleep(options.inter_batch_delay).await;
            }
            let set = uid_set(&batch);
            let outcome = session
                .with_write_access(|transport| remove_batch(transport, &set, options.expunge));
            let reason = match outcome {
                Ok(BatchOutcome::Removed) => {
                    report.tombstoned += store.tombstone(&batch).await?;
                    report.deleted += batch.len();
                    if !left_flagged.is_empty() {
                        let swept = std::mem::take(&mut left_flagged);
                        info!(count = swept.len(), "earlier flagged uids expunged with this batch");
                        report.tombstoned += store.tombstone(&swept).await?;
                        report.deleted += swept.len();
                        report.failed -= swept.len();
                        report.failed_uids.retain(|uid| !swept.contains(uid));
                    }
                    continue;
                }
                Ok(BatchOutcome::Reverted(reason)) => reason,
                Ok(BatchOutcome::LeftFlagged(reason)) => {
                    left_flagged.extend_from_slice(&batch);
                    reason
                }
                Err(err) => format!("{:#}", err),
            };
            let err = MirrorError::BatchDelete {
                uids: batch,
                reason,
            };
            warn!(batch = index, error = %err, "batch not deleted");
            report.failed += err.affected_uids().len();
            report.failed_uids.extend_from_slice(err.affected_uids());
            report.failed_batches += 1;
        }

        if !left_flagged.is_empty() {
            warn!(
                uids = %uid_set(&left_flagged),
                "uids still flagged \\Deleted remotely, next expunge removes them"
            );
        }
        info!(
            deleted = report.deleted,
            failed = report.failed,
            "deletion done"
        );
        Ok(report)
    }
}

enum BatchOutcome {
    Removed,
    /// EXPUNGE failed and the flags were cleared again.
    Reverted(String),
    /// EXPUNGE failed and clearing the flags failed as well.
    LeftFlagged(String),
}

fn remove_batch<T: MailboxTransport>(
    transport: &mut T,
    set: &str,
    expunge: bool,
) -> anyhow::Result<BatchOutcome> {
    transport.uid_mark_deleted(set)?;
    if !expunge {
        return Ok(BatchOutcome::Removed);
    }
    let Err(err) = transport.expunge() else {
        return Ok(BatchOutcome::Removed);
    };
    let reason = format!("expunge failed: {:#}", err);
    match transport.uid_unmark_deleted(set) {
        Ok(()) => Ok(BatchOutcome::Reverted(reason)),
        Err(undo) => {
            warn!(error = %format!("{:#}", undo), "clearing \\Deleted after failed expunge failed");
            Ok(BatchOutcome::LeftFlagged(reason))
        }
    }
}
