//! Small helpers shared across modules.

use chrono::{NaiveDate, NaiveTime, Timelike};

/// Truncate to at most `max_chars` characters (not bytes), appending an
/// ellipsis when something was cut. Safe on multi-byte input.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= 1 {
        return "…".chars().take(max_chars).collect();
    }
    let kept: String = s.chars().take(max_chars - 1).collect();
    format!("{}…", kept)
}

/// Escape text destined for the HTML subset the transport accepts.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Strict `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// `HH:MM`, tolerating a seconds suffix which is stripped.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
        .map(|t| t.with_second(0).unwrap_or(t))
}

/// Render a time as `HH:MM`.
pub fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// Render a date as `DD.MM.YYYY` for user-facing copy.
pub fn fmt_date_ru(d: NaiveDate) -> String {
    d.format("%d.%m.%Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("привет", 10), "привет");
        assert_eq!(truncate_str("привет мир", 7), "привет…");
        assert_eq!(truncate_str("abc", 0), "");
    }

    #[test]
    fn escape_covers_html_specials() {
        assert_eq!(html_escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(html_escape("plain"), "plain");
    }

    #[test]
    fn date_parsing_is_strict() {
        assert_eq!(
            parse_date("2026-03-01"),
            Some(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
        );
        assert_eq!(parse_date("01.03.2026"), None);
        assert_eq!(parse_date("2026-3-1"), None);
        assert_eq!(parse_date("2026-13-01"), None);
    }

    #[test]
    fn time_parsing_strips_seconds() {
        let t = parse_time("18:30:45").unwrap();
        assert_eq!(fmt_time(t), "18:30");
        assert_eq!(parse_time("9:00"), None);
        assert!(parse_time("09:00").is_some());
        assert_eq!(parse_time("25:00"), None);
    }
}
