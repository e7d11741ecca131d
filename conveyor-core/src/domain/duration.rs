//! Human-friendly durations used in action configuration

use std::time::Duration;

/// Parse `"500ms"`, `"30s"`, `"2m"` or a bare number of seconds
pub fn parse(raw: &str) -> Option<Duration> {
    let raw = raw.trim();

    let (number, unit): (&str, fn(u64) -> Duration) = if let Some(n) = raw.strip_suffix("ms") {
        (n, Duration::from_millis)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, Duration::from_secs)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, |m| Duration::from_secs(m.saturating_mul(60)))
    } else {
        (raw, Duration::from_secs)
    };

    number.trim().parse::<u64>().ok().map(unit)
}
