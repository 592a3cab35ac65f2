mod address;
mod charset;
mod date;

use chrono::{DateTime, Utc};
use mailparse::MailHeader;
use tracing::debug;

use mailmirror_core::MailboxItem;

pub use address::{Sender, parse_sender};
pub use charset::{decode_encoded_words, decode_text};
pub use date::parse_date;

/// Builds the canonical record for one message from its raw header block.
/// Never fails: unreadable fields come out empty (or `None`).
pub fn normalize(uid: u32, raw_headers: &[u8], declared_size: u32) -> MailboxItem {
    normalize_at(uid, raw_headers, declared_size, Utc::now())
}

pub fn normalize_at(
    uid: u32,
    raw_headers: &[u8],
    declared_size: u32,
    fetched_at: DateTime<Utc>,
) -> MailboxItem {
    let headers = match mailparse::parse_headers(raw_headers) {
        Ok((headers, _)) => headers,
        Err(err) => {
            debug!(uid, error = %err, "header block unparseable, normalizing empty record");
            Vec::new()
        }
    };

    let from = header_text(&headers, "From");
    let sender = parse_sender(&from);
    let raw_date = header_text(&headers, "Date");
    let message_id = header_text(&headers, "Message-ID");
    let message_id = message_id.trim();

    MailboxItem {
        uid,
        message_id: (!message_id.is_empty()).then(|| message_id.to_string()),
        sender_raw: decode_encoded_words(&from),
        sender_address: sender.address,
        sender_display_name: sender.display_name,
        recipient_raw: decode_encoded_words(&header_text(&headers, "To")),
        subject: decode_encoded_words(&header_text(&headers, "Subject")),
        normalized_timestamp: parse_date(&raw_date),
        raw_date,
        size_bytes: declared_size,
        fetched_at,
    }
}

/// First occurrence of `name`, unfolded and charset decoded. Encoded words
/// are left in place.
fn header_text(headers: &[MailHeader], name: &str) -> String {
    headers
        .iter()
        .find(|header| header.get_key().eq_ignore_ascii_case(name))
        .map(|header| {
            let unfolded: Vec<u8> = header
                .get_value_raw()
                .iter()
                .copied()
                .filter(|byte| *byte != b'\r' && *byte != b'\n')
                .collect();
            decode_text(&unfolded, None).trim().to_string()
        })
        .unwrap_or_default()
}
