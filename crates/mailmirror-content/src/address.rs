use mailparse::{MailAddr, SingleInfo, addrparse};

use crate::charset::decode_encoded_words;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    pub address: String,
    pub display_name: String,
}

/// Extracts the first mailbox of a `From` value. `value` is charset decoded
/// but may still hold encoded words.
pub fn parse_sender(value: &str) -> Sender {
    let value = value.trim();
    if value.is_empty() {
        return Sender::default();
    }
    if let Some(sender) = parse_trailing_comment(value) {
        return sender;
    }
    if let Some(info) = first_mailbox(value) {
        if info.addr.contains('@') {
            return Sender {
                address: clean_address(&info.addr),
                display_name: clean_name(info.display_name.as_deref().unwrap_or("")),
            };
        }
    }
    parse_fallback(value)
}

fn first_mailbox(value: &str) -> Option<SingleInfo> {
    let list = addrparse(value).ok()?;
    list.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(info.clone()),
        MailAddr::Group(group) => group.addrs.first().cloned(),
    })
}

/// `user@example.com (Display Name)`
fn parse_trailing_comment(value: &str) -> Option<Sender> {
    if value.contains('<') || !value.ends_with(')') {
        return None;
    }
    let open = value.rfind('(')?;
    let address = value[..open].trim();
    if address.is_empty() || address.contains(char::is_whitespace) || !address.contains('@') {
        return None;
    }
    Some(Sender {
        address: clean_address(address),
        display_name: clean_name(&value[open + 1..value.len() - 1]),
    })
}

fn parse_fallback(value: &str) -> Sender {
    if let (Some(open), Some(close)) = (value.rfind('<'), value.rfind('>')) {
        if open < close {
            return Sender {
                address: clean_address(&value[open + 1..close]),
                display_name: clean_name(&value[..open]),
            };
        }
    }
    if let Some(token) = value.split_whitespace().find(|token| token.contains('@')) {
        let name = value.replacen(token, "", 1);
        return Sender {
            address: clean_address(token),
            display_name: clean_name(&name),
        };
    }
    Sender {
        address: String::new(),
        display_name: clean_name(value),
    }
}

fn clean_address(raw: &str) -> String {
    raw.trim()
        .trim_matches(|ch: char| matches!(ch, '<' | '>' | '"' | '\'' | ',' | ';'))
        .trim()
        .to_lowercase()
}

fn clean_name(raw: &str) -> String {
    let decoded = decode_encoded_words(raw.trim());
    decoded
        .trim()
        .trim_matches(|ch: char| ch == '"' || ch == '\'')
        .replace("\\\"", "\"")
        .trim()
        .to_string()
}
