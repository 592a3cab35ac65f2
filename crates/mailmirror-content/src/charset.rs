use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::{Encoding, WINDOWS_1252};

const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Turns header bytes of unknown provenance into text. Never fails.
///
/// Order of attempts: the declared charset (strict), UTF-8 (strict), UTF-8
/// with replacement when the bytes carry at least one real multi-byte
/// sequence, then windows-1252.
pub fn decode_text(bytes: &[u8], declared: Option<&str>) -> String {
    if let Some(encoding) = declared.and_then(|label| Encoding::for_label(label.trim().as_bytes()))
    {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            return text.into_owned();
        }
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    if has_multibyte_utf8(bytes) {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}

fn has_multibyte_utf8(bytes: &[u8]) -> bool {
    bytes
        .utf8_chunks()
        .any(|chunk| chunk.valid().chars().any(|ch| !ch.is_ascii()))
}

/// Decodes RFC 2047 encoded words (`=?charset?B|Q?text?=`). Whitespace that
/// only separates two encoded words is dropped. Malformed words stay verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut last_was_word = false;
    while !rest.is_empty() {
        let Some(start) = rest.find("=?") else {
            out.push_str(rest);
            break;
        };
        let (before, candidate) = rest.split_at(start);
        match parse_encoded_word(candidate) {
            Some((decoded, consumed)) => {
                if !(last_was_word && before.chars().all(char::is_whitespace)) {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = &candidate[consumed..];
                last_was_word = true;
            }
            None => {
                out.push_str(before);
                out.push_str("=?");
                rest = &candidate[2..];
                last_was_word = false;
            }
        }
    }
    out
}

/// `word` starts with `=?`. Returns the decoded text and the byte length of
/// the encoded word.
fn parse_encoded_word(word: &str) -> Option<(String, usize)> {
    let body = &word[2..];
    let charset_end = body.find('?')?;
    let charset = &body[..charset_end];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }
    // RFC 2231 language suffix, e.g. `utf-8*en`.
    let charset = charset.split('*').next().unwrap_or(charset);

    let rest = &body[charset_end + 1..];
    let mode = rest.as_bytes().first()?.to_ascii_uppercase();
    if !matches!(mode, b'B' | b'Q') || rest.as_bytes().get(1) != Some(&b'?') {
        return None;
    }
    let payload_region = &rest[2..];
    let payload_end = payload_region.find("?=")?;
    let payload = &payload_region[..payload_end];
    if payload.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match mode {
        b'B' => BASE64_LENIENT.decode(payload).ok()?,
        _ => decode_q(payload)?,
    };
    let consumed = 2 + charset_end + 1 + 2 + payload_end + 2;
    Some((decode_text(&bytes, Some(charset)), consumed))
}

fn decode_q(payload: &str) -> Option<Vec<u8>> {
    let raw = payload.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut idx = 0;
    while idx < raw.len() {
        match raw[idx] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = raw.get(idx + 1..idx + 3)?;
                let hex = std::str::from_utf8(hex).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                idx += 2;
            }
            other => out.push(other),
        }
        idx += 1;
    }
    Some(out)
}
