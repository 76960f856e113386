//! Small utility routines.

use std::time::Duration;

/// Upper bound on the bytes a script may print for one dependency query.
pub const LINE_MAX: usize = 2048;

/// Parse a decimal seconds value, typically taken from the environment.
///
/// `None`, non-numeric input, trailing garbage and values less than or
/// equal to zero all yield `None`.
pub fn parse_seconds(value: Option<&str>) -> Option<Duration> {
    let value = value?;
    match value.parse::<i64>() {
        Ok(seconds) if seconds > 0 => Some(Duration::from_secs(seconds as u64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seconds_accepts_positive_integers() {
        let parsed = parse_seconds(Some("123")).unwrap();
        assert_eq!(parsed.as_secs(), 123);
        assert_eq!(parsed.subsec_nanos(), 0);
    }

    #[test]
    fn parse_seconds_rejects_everything_else() {
        assert_eq!(parse_seconds(Some("-1")), None);
        assert_eq!(parse_seconds(Some("123.4")), None);
        assert_eq!(parse_seconds(Some("hello")), None);
        assert_eq!(parse_seconds(Some("0")), None);
        assert_eq!(parse_seconds(None), None);
    }
}
