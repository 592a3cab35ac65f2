use imap_proto::parser::parse_response;
use imap_proto::types::{AttributeValue, Response};

const UNTAGGED_LINE: &[u8] = b"\r\n* ";

/// One element of a header fetch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchElement {
    /// Anything that is not a FETCH: status lines, EXISTS, tagged completion.
    Skip,
    Record { uid: u32, size: u32, headers: Vec<u8> },
    Malformed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Ready,
    /// Skipping to the start of the next untagged line.
    Resync,
    Done,
}

/// Walks raw response bytes element by element. An unparseable element is
/// reported once and decoding resumes at the next untagged line.
pub struct ResponseDecoder<'a> {
    input: &'a [u8],
    state: DecoderState,
}

impl<'a> ResponseDecoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            state: DecoderState::Ready,
        }
    }
}

impl Iterator for ResponseDecoder<'_> {
    type Item = FetchElement;

    fn next(&mut self) -> Option<FetchElement> {
        loop {
            match self.state {
                DecoderState::Done => return None,
                DecoderState::Resync => {
                    match find(self.input, UNTAGGED_LINE) {
                        Some(pos) => {
                            self.input = &self.input[pos + 2..];
                            self.state = DecoderState::Ready;
                        }
                        None => {
                            self.input = &[];
                            self.state = DecoderState::Done;
                        }
                    }
                }
                DecoderState::Ready => {
                    let input = self.input;
                    if input.iter().all(u8::is_ascii_whitespace) {
                        self.state = DecoderState::Done;
                        return None;
                    }
                    match parse_response(input) {
                        Ok((rest, response)) => {
                            self.input = rest;
                            return Some(classify(response));
                        }
                        Err(err) if err.is_incomplete() => {
                            self.state = DecoderState::Done;
                            return Some(FetchElement::Malformed {
                                reason: "response truncated".to_string(),
                            });
                        }
                        Err(_) => {
                            self.state = DecoderState::Resync;
                            return Some(FetchElement::Malformed {
                                reason: format!("unparseable response: {}", preview(input)),
                            });
                        }
                    }
                }
            }
        }
    }
}

pub fn decode_fetch_response(input: &[u8]) -> Vec<FetchElement> {
    ResponseDecoder::new(input).collect()
}

fn classify(response: Response<'_>) -> FetchElement {
    let Response::Fetch(_, attributes) = response else {
        return FetchElement::Skip;
    };
    let mut uid = None;
    let mut size = 0;
    let mut headers = None;
    for attribute in attributes {
        match attribute {
            AttributeValue::Uid(value) => uid = Some(value),
            AttributeValue::Rfc822Size(value) => size = value,
            AttributeValue::BodySection {
                data: Some(data), ..
            } => headers = Some(data.to_vec()),
            AttributeValue::Rfc822Header(Some(data)) => headers = Some(data.to_vec()),
            _ => {}
        }
    }
    match uid {
        Some(uid) => FetchElement::Record {
            uid,
            size,
            headers: headers.unwrap_or_default(),
        },
        None => FetchElement::Malformed {
            reason: "FETCH without UID".to_string(),
        },
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn preview(input: &[u8]) -> String {
    let line = input.split(|byte| *byte == b'\n').next().unwrap_or(input);
    let line = &line[..line.len().min(60)];
    String::from_utf8_lossy(line).trim_end().to_string()
}
