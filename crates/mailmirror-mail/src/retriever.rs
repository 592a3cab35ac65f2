use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use mailmirror_core::MirrorError;
use tracing::{debug, warn};

use crate::response::{FetchElement, ResponseDecoder};
use crate::session::Session;
use crate::transport::MailboxTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeaders {
    pub bytes: Vec<u8>,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct FetchedChunk {
    pub index: usize,
    pub uids: Vec<u32>,
    pub records: BTreeMap<u32, RawHeaders>,
    /// Elements the decoder could not turn into a record.
    pub malformed: usize,
    /// Requested uids the server did not return.
    pub missing: Vec<u32>,
}

/// Contiguous chunks of at most `batch_size` uids, input order kept.
pub fn plan_chunks(uids: &[u32], batch_size: usize) -> Vec<Vec<u32>> {
    uids.chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Lazily fetches headers chunk by chunk, one request per chunk, pausing
/// between chunks. A failed chunk does not stop the sequence.
pub struct BatchFetcher<'s, T: MailboxTransport> {
    session: &'s mut Session<T>,
    chunks: std::vec::IntoIter<Vec<u32>>,
    chunk_count: usize,
    next_index: usize,
    inter_batch_delay: Duration,
}

impl<'s, T: MailboxTransport> BatchFetcher<'s, T> {
    pub fn new(
        session: &'s mut Session<T>,
        uids: &[u32],
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> Self {
        let chunks = plan_chunks(uids, batch_size);
        Self {
            session,
            chunk_count: chunks.len(),
            chunks: chunks.into_iter(),
            next_index: 0,
            inter_batch_delay,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub async fn next_chunk(&mut self) -> Option<Result<FetchedChunk, MirrorError>> {
        let uids = self.chunks.next()?;
        let index = self.next_index;
        self.next_index += 1;
        if index > 0 && !self.inter_batch_delay.is_zero() {
            tokio::time::sleep(self.inter_batch_delay).await;
        }
        Some(self.fetch_chunk(index, uids))
    }

    fn fetch_chunk(&mut self, index: usize, uids: Vec<u32>) -> Result<FetchedChunk, MirrorError> {
        debug!(chunk = index, of = self.chunk_count, count = uids.len(), "fetching headers");
        let raw = match self.session.fetch_headers(&uids) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(chunk = index, error = %format!("{:#}", err), "header fetch failed");
                return Err(MirrorError::BatchFetch {
                    uids,
                    reason: format!("{:#}", err),
                });
            }
        };

        let requested: HashSet<u32> = uids.iter().copied().collect();
        let mut records = BTreeMap::new();
        let mut malformed = 0usize;
        for element in ResponseDecoder::new(&raw) {
            match element {
                FetchElement::Skip => {}
                FetchElement::Record { uid, size, headers } if requested.contains(&uid) => {
                    records.insert(
                        uid,
                        RawHeaders {
                            bytes: headers,
                            size,
                        },
                    );
                }
                FetchElement::Record { uid, .. } => {
                    debug!(chunk = index, uid, "dropping record for unrequested uid");
                }
                FetchElement::Malformed { reason } => {
                    malformed += 1;
                    warn!(chunk = index, %reason, "malformed fetch element");
                }
            }
        }
        let missing: Vec<u32> = uids
            .iter()
            .copied()
            .filter(|uid| !records.contains_key(uid))
            .collect();
        if !missing.is_empty() {
            debug!(chunk = index, missing = missing.len(), "server omitted requested uids");
        }
        Ok(FetchedChunk {
            index,
            uids,
            records,
            malformed,
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mailmirror_core::MirrorError;

    use super::{BatchFetcher, plan_chunks};
    use crate::memory::MemoryMailbox;
    use crate::session::Session;

    #[test]
    fn chunks_partition_the_input_in_order() {
        let uids: Vec<u32> = (1..=100).collect();
        let chunks = plan_chunks(&uids, 40);
        assert_eq!(
            chunks.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![40, 40, 20]
        );
        assert_eq!(chunks.concat(), uids);
        assert!(plan_chunks(&[], 10).is_empty());
        assert_eq!(plan_chunks(&[5, 6], 10), vec![vec![5, 6]]);
    }

    #[tokio::test]
    async fn one_request_per_chunk_and_failures_do_not_stop_iteration() {
        let uids: Vec<u32> = (1..=7).collect();
        let mailbox = MemoryMailbox::with_generated_messages(uids.clone());
        mailbox.fail_fetch_call(1);
        let mut session = Session::with_transport(mailbox.clone(), "INBOX").unwrap();

        let mut fetcher = BatchFetcher::new(&mut session, &uids, 3, Duration::ZERO);
        assert_eq!(fetcher.chunk_count(), 3);
        let mut outcomes = Vec::new();
        while let Some(outcome) = fetcher.next_chunk().await {
            outcomes.push(outcome);
        }

        assert_eq!(outcomes.len(), 3);
        let first = outcomes[0].as_ref().unwrap();
        assert_eq!(first.records.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(matches!(
            &outcomes[1],
            Err(MirrorError::BatchFetch { uids, .. }) if uids == &vec![4, 5, 6]
        ));
        let last = outcomes[2].as_ref().unwrap();
        assert_eq!(last.index, 2);
        assert_eq!(last.records.len(), 1);
        assert_eq!(mailbox.fetch_commands(), vec!["1,2,3", "4,5,6", "7"]);
    }

    #[tokio::test]
    async fn noise_and_missing_uids_are_reported_per_chunk() {
        let mailbox = MemoryMailbox::with_generated_messages([1, 2, 3]);
        mailbox.inject_fetch_noise(b"* 99 FETCH (FLAGS (\\Seen))\r\n".to_vec());
        let mut session = Session::with_transport(mailbox, "INBOX").unwrap();

        let mut fetcher = BatchFetcher::new(&mut session, &[1, 2, 3, 4], 10, Duration::ZERO);
        let chunk = fetcher.next_chunk().await.unwrap().unwrap();
        assert!(fetcher.next_chunk().await.is_none());

        assert_eq!(chunk.records.len(), 3);
        assert_eq!(chunk.malformed, 1);
        assert_eq!(chunk.missing, vec![4]);
        assert!(chunk.records[&2].size > 0);
    }
}
