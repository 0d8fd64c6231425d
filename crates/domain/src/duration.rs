//! Go-style duration strings ("1.5s", "2m30s", "150ms") for result files.
//!
//! The result file format predates this implementation and is shared with
//! other PromptKit tooling, so both directions are implemented here: a
//! formatter used when sealing a [`crate::result::RunResult`] and a parser
//! used by the reader side.

use std::time::Duration;

/// Format a duration the way Go's `time.Duration` prints it, at millisecond
/// precision: `0s`, `150ms`, `1.5s`, `2m30s`, `1h2m3s`.
pub fn format_go(d: Duration) -> String {
    let total_ms = d.as_millis() as u64;
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms < 1000 {
        return format!("{total_ms}ms");
    }

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let millis = total_ms % 60_000;

    let secs = format_seconds(millis);
    match (hours, minutes) {
        (0, 0) => secs,
        (0, m) => format!("{m}m{secs}"),
        (h, m) => format!("{h}h{m}m{secs}"),
    }
}

/// Seconds component with trailing zeros trimmed: 1500ms -> "1.5s".
fn format_seconds(millis: u64) -> String {
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        let s = format!("{:.3}", millis as f64 / 1000.0);
        format!("{}s", s.trim_end_matches('0').trim_end_matches('.'))
    }
}

/// Parse a Go-style duration string. Accepts `h`, `m`, `s`, and `ms` units
/// with optional fractional values, e.g. `"1h2m3.5s"` or `"250ms"`.
pub fn parse_go(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let mut total_ms = 0f64;
    let mut num = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            num.push(c);
            continue;
        }
        let value: f64 = num.parse().ok()?;
        num.clear();
        let unit_ms = match c {
            'h' => 3_600_000.0,
            's' => 1000.0,
            'm' => {
                if chars.peek() == Some(&'s') {
                    chars.next();
                    1.0
                } else {
                    60_000.0
                }
            }
            _ => return None,
        };
        total_ms += value * unit_ms;
    }
    if !num.is_empty() {
        return None; // trailing number without a unit
    }
    Some(Duration::from_millis(total_ms.round() as u64))
}

/// Serde adapter: `#[serde(with = "pk_domain::duration::go")]`.
pub mod go {
    use super::{format_go, parse_go};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format_go(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        parse_go(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_common_values() {
        assert_eq!(format_go(Duration::ZERO), "0s");
        assert_eq!(format_go(Duration::from_millis(150)), "150ms");
        assert_eq!(format_go(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_go(Duration::from_secs(2)), "2s");
        assert_eq!(format_go(Duration::from_secs(150)), "2m30s");
        assert_eq!(format_go(Duration::from_secs(3723)), "1h2m3s");
    }

    #[test]
    fn parses_what_it_formats() {
        for d in [
            Duration::ZERO,
            Duration::from_millis(250),
            Duration::from_millis(1500),
            Duration::from_secs(90),
            Duration::from_secs(3723),
        ] {
            assert_eq!(parse_go(&format_go(d)), Some(d), "{d:?}");
        }
    }

    #[test]
    fn parses_fractional_seconds() {
        assert_eq!(parse_go("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_go("0.001s"), Some(Duration::from_millis(1)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_go(""), None);
        assert_eq!(parse_go("abc"), None);
        assert_eq!(parse_go("12"), None);
        assert_eq!(parse_go("1x"), None);
    }
}
