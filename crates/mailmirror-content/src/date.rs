use chrono::{DateTime, NaiveDateTime, Utc};

const NAIVE_LAYOUTS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Interprets a `Date` header. Layouts without an offset are taken as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = strip_comments(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(&cleaned) {
        return Some(parsed.with_timezone(&Utc));
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, layout) {
            return Some(naive.and_utc());
        }
    }
    if !cleaned.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }
    match mailparse::dateparse(&cleaned) {
        Ok(ts) if ts != 0 => DateTime::from_timestamp(ts, 0),
        _ => None,
    }
}

/// Removes parenthesized comments, including nested ones.
fn strip_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::parse_date;

    #[test]
    fn rfc2822_offsets_become_utc() {
        assert_eq!(
            parse_date("Tue, 1 Jul 2003 10:52:37 +0200"),
            Some(Utc.with_ymd_and_hms(2003, 7, 1, 8, 52, 37).unwrap())
        );
        assert_eq!(
            parse_date("Wed, 31 Jan 2024 23:30:00 -0500 (EST)"),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 4, 30, 0).unwrap())
        );
    }

    #[test]
    fn naive_layouts_are_read_as_utc() {
        assert_eq!(
            parse_date("2024-03-05 14:30:00"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap())
        );
        assert_eq!(
            parse_date("05 Mar 2024 14:30:00"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap())
        );
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("sometime last week"), None);
        assert_eq!(parse_date("(only a comment)"), None);
    }
}
