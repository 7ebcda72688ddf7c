use std::time::{Duration, Instant};

#[cfg(not(test))]
pub fn now_monotonic() -> Instant {
    Instant::now()
}

#[cfg(test)]
pub use mock_time::now_monotonic;

/// Returns how long ago `instant` happened, saturating at zero for instants in the future.
pub fn age_of(instant: Instant) -> Duration {
    now_monotonic().saturating_duration_since(instant)
}

/// Parses a humantime duration (`30s`, `5m`) or a bare number of seconds.
pub fn parse_duration(value: &str) -> anyhow::Result<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value)
        .map_err(|e| anyhow::anyhow!("Invalid duration `{value}`: {e}"))
}

/// Reads a duration in milliseconds from an environment variable.
pub fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}


#[cfg(test)]
mod tests {
    use super::parse_duration;
    use std::time::Duration;

    #[test]
    fn parse_plain_seconds() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn parse_human_duration() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration(" 1h 30s ").unwrap(), Duration::from_secs(3630));
    }

    #[test]
    fn parse_invalid_duration() {
        assert!(parse_duration("soon").is_err());
    }
}
