use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};

use crate::transport::{AccessMode, MailboxTransport};

/// A remote call as seen by [`MemoryMailbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Select(AccessMode),
    Search,
    Fetch(String),
    UidNext,
    Store(String),
    Unflag(String),
    Expunge,
    Logout,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    headers: Vec<u8>,
    size: u32,
    deleted: bool,
}

#[derive(Debug, Default)]
struct MailboxState {
    messages: BTreeMap<u32, StoredMessage>,
    highest_uid: u32,
    /// Expunged uids that searches keep reporting.
    stale: BTreeSet<u32>,
    report_stale: bool,
    uid_next_hidden: bool,
    mode: Option<AccessMode>,
    commands: Vec<Command>,
    fetch_calls: usize,
    store_calls: usize,
    unflag_calls: usize,
    expunge_calls: usize,
    failing_fetches: HashSet<usize>,
    failing_stores: HashSet<usize>,
    failing_unflags: HashSet<usize>,
    failing_expunges: HashSet<usize>,
    /// Uids left out of the next fetch that asks for them.
    omit_once: HashSet<u32>,
    fail_search: bool,
    fail_next_select: Option<AccessMode>,
    fetch_noise: Option<Vec<u8>>,
    logged_out: bool,
}

/// In-process folder that answers like an IMAP server, FETCH bytes included.
///
/// Clones share state, so a test can keep one handle while a session owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// A folder holding a small synthetic message for each uid.
    pub fn with_generated_messages(uids: impl IntoIterator<Item = u32>) -> Self {
        let mailbox = Self::new();
        for uid in uids {
            let headers = generated_headers(uid);
            let size = headers.len() as u32 + 1_000;
            mailbox.insert(uid, headers, size);
        }
        mailbox
    }

    pub fn insert(&self, uid: u32, headers: impl Into<Vec<u8>>, size: u32) {
        let mut state = self.state();
        state.highest_uid = state.highest_uid.max(uid);
        state.messages.insert(
            uid,
            StoredMessage {
                headers: headers.into(),
                size,
                deleted: false,
            },
        );
    }

    /// Makes the fetch call with this zero-based index fail.
    pub fn fail_fetch_call(&self, index: usize) {
        self.state().failing_fetches.insert(index);
    }

    /// Makes the store call with this zero-based index fail.
    pub fn fail_store_call(&self, index: usize) {
        self.state().failing_stores.insert(index);
    }

    /// Makes the unflag call with this zero-based index fail.
    pub fn fail_unflag_call(&self, index: usize) {
        self.state().failing_unflags.insert(index);
    }

    /// Makes the expunge call with this zero-based index fail.
    pub fn fail_expunge_call(&self, index: usize) {
        self.state().failing_expunges.insert(index);
    }

    /// The next fetch covering `uid` answers without it.
    pub fn omit_from_next_fetch(&self, uid: u32) {
        self.state().omit_once.insert(uid);
    }

    pub fn fail_search(&self) {
        self.state().fail_search = true;
    }

    /// The next select in `mode` fails once.
    pub fn fail_next_select(&self, mode: AccessMode) {
        self.state().fail_next_select = Some(mode);
    }

    /// Expunged uids keep showing up in searches, like a lagging replica.
    pub fn report_expunged_in_search(&self) {
        self.state().report_stale = true;
    }

    pub fn hide_uid_next(&self) {
        self.state().uid_next_hidden = true;
    }

    /// Bytes spliced into every fetch response after the first record.
    pub fn inject_fetch_noise(&self, noise: impl Into<Vec<u8>>) {
        self.state().fetch_noise = Some(noise.into());
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    pub fn fetch_commands(&self) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::Fetch(set) => Some(set.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn uids(&self) -> Vec<u32> {
        self.state().messages.keys().copied().collect()
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.state().messages.contains_key(&uid)
    }

    pub fn is_flagged_deleted(&self, uid: u32) -> bool {
        self.state()
            .messages
            .get(&uid)
            .map(|message| message.deleted)
            .unwrap_or(false)
    }

    pub fn logged_out(&self) -> bool {
        self.state().logged_out
    }

    fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MailboxTransport for MemoryMailbox {
    fn select(&mut self, _folder: &str, mode: AccessMode) -> Result<u32> {
        let mut state = self.state();
        state.commands.push(Command::Select(mode));
        if state.fail_next_select == Some(mode) {
            state.fail_next_select = None;
            state.mode = None;
            bail!("NO simulated select failure");
        }
        state.mode = Some(mode);
        Ok(state.messages.len() as u32)
    }

    fn uid_search_all(&mut self) -> Result<Vec<u32>> {
        let mut state = self.state();
        state.commands.push(Command::Search);
        if state.fail_search {
            bail!("BAD simulated search failure");
        }
        let mut uids: Vec<u32> = state.messages.keys().copied().collect();
        if state.report_stale {
            uids.extend(state.stale.iter().copied());
        }
        // Servers make no ordering promise.
        uids.reverse();
        Ok(uids)
    }

    fn uid_fetch_headers(&mut self, uid_set: &str) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.commands.push(Command::Fetch(uid_set.to_string()));
        let call = state.fetch_calls;
        state.fetch_calls += 1;
        if state.failing_fetches.contains(&call) {
            bail!("simulated fetch failure on call {}", call);
        }
        let mut requested = parse_uid_set(uid_set)?;
        let omitted: Vec<u32> = state
            .omit_once
            .iter()
            .copied()
            .filter(|uid| requested.contains(uid))
            .collect();
        for uid in omitted {
            state.omit_once.remove(&uid);
            requested.remove(&uid);
        }
        let mut out = Vec::new();
        let mut wrote_record = false;
        for (position, (uid, message)) in state.messages.iter().enumerate() {
            if !requested.contains(uid) {
                continue;
            }
            out.extend_from_slice(
                format!(
                    "* {} FETCH (UID {} RFC822.SIZE {} BODY[HEADER] {{{}}}\r\n",
                    position + 1,
                    uid,
                    message.size,
                    message.headers.len()
                )
                .as_bytes(),
            );
            out.extend_from_slice(&message.headers);
            out.extend_from_slice(b")\r\n");
            if !wrote_record {
                wrote_record = true;
                if let Some(noise) = state.fetch_noise.as_ref() {
                    out.extend_from_slice(noise);
                }
            }
        }
        Ok(out)
    }

    fn uid_next(&mut self, _folder: &str) -> Result<Option<u32>> {
        let mut state = self.state();
        state.commands.push(Command::UidNext);
        if state.uid_next_hidden {
            return Ok(None);
        }
        Ok(Some(state.highest_uid + 1))
    }

    fn uid_mark_deleted(&mut self, uid_set: &str) -> Result<()> {
        let mut state = self.state();
        state.commands.push(Command::Store(uid_set.to_string()));
        let call = state.store_calls;
        state.store_calls += 1;
        if state.mode != Some(AccessMode::ReadWrite) {
            bail!("NO mailbox is read-only");
        }
        if state.failing_stores.contains(&call) {
            bail!("simulated store failure on call {}", call);
        }
        for uid in parse_uid_set(uid_set)? {
            if let Some(message) = state.messages.get_mut(&uid) {
                message.deleted = true;
            }
        }
        Ok(())
    }

    fn uid_unmark_deleted(&mut self, uid_set: &str) -> Result<()> {
        let mut state = self.state();
        state.commands.push(Command::Unflag(uid_set.to_string()));
        let call = state.unflag_calls;
        state.unflag_calls += 1;
        if state.mode != Some(AccessMode::ReadWrite) {
            bail!("NO mailbox is read-only");
        }
        if state.failing_unflags.contains(&call) {
            bail!("simulated unflag failure on call {}", call);
        }
        for uid in parse_uid_set(uid_set)? {
            if let Some(message) = state.messages.get_mut(&uid) {
                message.deleted = false;
            }
        }
        Ok(())
    }

    fn expunge(&mut self) -> Result<()> {
        let mut state = self.state();
        state.commands.push(Command::Expunge);
        let call = state.expunge_calls;
        state.expunge_calls += 1;
        if state.mode != Some(AccessMode::ReadWrite) {
            bail!("NO mailbox is read-only");
        }
        if state.failing_expunges.contains(&call) {
            bail!("simulated expunge failure on call {}", call);
        }
        let removed: Vec<u32> = state
            .messages
            .iter()
            .filter(|(_, message)| message.deleted)
            .map(|(uid, _)| *uid)
            .collect();
        for uid in removed {
            state.messages.remove(&uid);
            state.stale.insert(uid);
        }
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        let mut state = self.state();
        state.commands.push(Command::Logout);
        state.logged_out = true;
        Ok(())
    }

    fn endpoint(&self) -> (String, u16) {
        ("memory".to_string(), 0)
    }
}

fn parse_uid_set(uid_set: &str) -> Result<HashSet<u32>> {
    let mut uids = HashSet::new();
    for part in uid_set.split(',').filter(|part| !part.is_empty()) {
        match part.split_once(':') {
            Some((start, end)) => {
                let start: u32 = start.parse()?;
                let end: u32 = end.parse()?;
                uids.extend(start.min(end)..=start.max(end));
            }
            None => {
                uids.insert(part.parse().map_err(|_| anyhow!("BAD uid set {:?}", uid_set))?);
            }
        }
    }
    Ok(uids)
}

fn generated_headers(uid: u32) -> Vec<u8> {
    format!(
        "From: Sender {uid} <sender{uid}@example.com>\r\n\
To: me@example.com\r\n\
Subject: Message {uid}\r\n\
Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n\
Message-ID: <{uid}@example.com>\r\n\
\r\n"
    )
    .into_bytes()
}
