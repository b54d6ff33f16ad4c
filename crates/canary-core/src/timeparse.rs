//! Timeout and duration parsing.
//!
//! Directive files accept timeouts as plain seconds (`300`, `2.5`),
//! suffixed forms (`"1h 20m"`, `"90s"`), or clock notation
//! (`"HH:MM:SS"` / `"MM:SS"`). A timeout of zero is invalid: a case that
//! may not run for any time at all is a configuration error, not a fast
//! test.

use std::time::Duration;

use thiserror::Error;

/// Error parsing a timeout string.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeParseError {
    /// Empty input
    #[error("empty duration string")]
    Empty,

    /// Unparseable number or field
    #[error("invalid duration value: '{0}'")]
    Invalid(String),

    /// Parsed fine but is not a usable timeout
    #[error("timeout must be positive, got {0} seconds")]
    NonPositive(f64),
}

/// Parse a timeout string into a [`Duration`].
///
/// Accepted forms:
/// - plain seconds: `"300"`, `"2.5"`
/// - suffixed components: `"90s"`, `"30m"`, `"1h"`, `"1h 20m"`, `"1h20m"`
/// - clock notation: `"1:00:00"` (3600 s), `"02:30"` (150 s)
pub fn parse_timeout(s: &str) -> Result<Duration, TimeParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TimeParseError::Empty);
    }

    let secs = if s.contains(':') {
        parse_clock(s)?
    } else if s.ends_with(['h', 'm', 's']) {
        parse_suffixed(s)?
    } else {
        s.parse::<f64>()
            .map_err(|_| TimeParseError::Invalid(s.to_string()))?
    };

    if !secs.is_finite() || secs <= 0.0 {
        return Err(TimeParseError::NonPositive(secs));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// `HH:MM:SS` or `MM:SS`, leftmost field may exceed its usual range.
fn parse_clock(s: &str) -> Result<f64, TimeParseError> {
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() > 3 || fields.iter().any(|f| f.is_empty()) {
        return Err(TimeParseError::Invalid(s.to_string()));
    }
    let mut secs = 0.0;
    for field in &fields {
        let v: f64 = field
            .parse()
            .map_err(|_| TimeParseError::Invalid(s.to_string()))?;
        if v < 0.0 {
            return Err(TimeParseError::Invalid(s.to_string()));
        }
        secs = secs * 60.0 + v;
    }
    Ok(secs)
}

/// One or more `<number><h|m|s>` components, whitespace optional.
fn parse_suffixed(s: &str) -> Result<f64, TimeParseError> {
    let mut secs = 0.0;
    let mut num = String::new();
    let mut seen_component = false;
    for c in s.chars() {
        match c {
            '0'..='9' | '.' | '-' => num.push(c),
            'h' | 'm' | 's' => {
                let v: f64 = num
                    .parse()
                    .map_err(|_| TimeParseError::Invalid(s.to_string()))?;
                secs += match c {
                    'h' => v * 3600.0,
                    'm' => v * 60.0,
                    _ => v,
                };
                num.clear();
                seen_component = true;
            }
            c if c.is_whitespace() => {}
            _ => return Err(TimeParseError::Invalid(s.to_string())),
        }
    }
    if !num.is_empty() || !seen_component {
        return Err(TimeParseError::Invalid(s.to_string()));
    }
    Ok(secs)
}

/// Render a duration the way session reports print elapsed times.
pub fn format_hms(d: Duration) -> String {
    let total = d.as_secs();
    let (h, rem) = (total / 3600, total % 3600);
    let (m, s) = (rem / 60, rem % 60);
    format!("{h:02}:{m:02}:{s:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_seconds() {
        assert_eq!(parse_timeout("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_timeout("2.5").unwrap(), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn suffixed_components() {
        assert_eq!(parse_timeout("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_timeout("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_timeout("1h 20m").unwrap(), Duration::from_secs(4800));
        assert_eq!(parse_timeout("1h20m").unwrap(), Duration::from_secs(4800));
    }

    #[test]
    fn clock_notation() {
        assert_eq!(parse_timeout("1:00:00").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_timeout("02:30").unwrap(), Duration::from_secs(150));
    }

    #[test]
    fn zero_and_negative_are_rejected() {
        assert!(matches!(
            parse_timeout("0s"),
            Err(TimeParseError::NonPositive(_))
        ));
        assert!(matches!(
            parse_timeout("0:00"),
            Err(TimeParseError::NonPositive(_))
        ));
        assert!(parse_timeout("-5").is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_timeout("").is_err());
        assert!(parse_timeout("fast").is_err());
        assert!(parse_timeout("1:2:3:4").is_err());
        assert!(parse_timeout("5x").is_err());
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(Duration::from_secs(3725)), "01:02:05");
    }
}
