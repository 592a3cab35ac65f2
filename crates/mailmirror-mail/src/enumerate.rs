use std::collections::HashSet;

use mailmirror_core::MirrorError;
use tracing::debug;

use crate::session::Session;
use crate::transport::MailboxTransport;

impl<T: MailboxTransport> Session<T> {
    /// Every uid in the folder, ascending and without duplicates.
    pub fn list_all(&mut self) -> Result<Vec<u32>, MirrorError> {
        let mut uids = self
            .search_all()
            .map_err(|err| MirrorError::Enumeration(format!("{:#}", err)))?;
        uids.sort_unstable();
        uids.dedup();
        debug!(folder = %self.folder(), count = uids.len(), "uid listing");
        Ok(uids)
    }

    /// Uids above `cursor`. Filters a full listing client-side.
    pub fn list_since(&mut self, cursor: u32) -> Result<Vec<u32>, MirrorError> {
        let mut uids = self.list_all()?;
        uids.retain(|uid| *uid > cursor);
        Ok(uids)
    }
}

/// Drops tombstoned uids and keeps the input order.
pub fn exclude_tombstoned(uids: &[u32], excluded: &HashSet<u32>) -> Vec<u32> {
    uids.iter()
        .copied()
        .filter(|uid| !excluded.contains(uid))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use mailmirror_core::MirrorError;

    use super::exclude_tombstoned;
    use crate::memory::MemoryMailbox;
    use crate::session::Session;

    #[test]
    fn listings_are_sorted_and_filtered_by_cursor() {
        let mailbox = MemoryMailbox::with_generated_messages([30, 10, 20]);
        let mut session = Session::with_transport(mailbox, "INBOX").unwrap();
        assert_eq!(session.list_all().unwrap(), vec![10, 20, 30]);
        assert_eq!(session.list_since(0).unwrap(), vec![10, 20, 30]);
        assert_eq!(session.list_since(20).unwrap(), vec![30]);
        assert!(session.list_since(30).unwrap().is_empty());
    }

    #[test]
    fn search_failure_is_an_enumeration_error() {
        let mailbox = MemoryMailbox::with_generated_messages([1, 2]);
        mailbox.fail_search();
        let mut session = Session::with_transport(mailbox, "INBOX").unwrap();
        assert!(matches!(
            session.list_since(0),
            Err(MirrorError::Enumeration(_))
        ));
    }

    #[test]
    fn tombstoned_uids_are_removed_in_order() {
        let excluded = HashSet::from([20, 40]);
        assert_eq!(
            exclude_tombstoned(&[50, 20, 10, 40, 30], &excluded),
            vec![50, 10, 30]
        );
    }
}
