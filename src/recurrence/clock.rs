use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Timelike};

/// Resolve a local wall-clock time back to an instant. Ambiguous times
/// (fall-back transition) resolve to the earlier mapping; times skipped by
/// spring-forward are pushed past the gap.
pub fn resolve_local(naive: NaiveDateTime) -> DateTime<Local> {
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => {
            // Inside a spring-forward gap; an hour later always exists
            let shifted = naive + Duration::hours(1);
            Local
                .from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(Local::now)
        }
    }
}

/// Round to the whole minute: 30 seconds or more rounds up, less rounds
/// down. Sub-second precision is always dropped.
pub fn round_to_minute(time: DateTime<Local>) -> DateTime<Local> {
    let seconds = time.second();
    let truncated = time
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time);

    if seconds >= 30 {
        truncated + Duration::minutes(1)
    } else {
        truncated
    }
}

/// Delay from `now` until the next exact minute boundary (seconds and
/// sub-seconds zero).
pub fn until_next_minute(now: DateTime<Local>) -> std::time::Duration {
    let seconds = now.second() as u64;
    // Leap-second representation can push nanosecond() past 1e9
    let nanos = (now.nanosecond() as u64).min(999_999_999);

    let elapsed = seconds * 1_000_000_000 + nanos;
    std::time::Duration::from_nanos(60_000_000_000 - elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn round_down_below_thirty_seconds() {
        let t = Local.with_ymd_and_hms(2025, 7, 15, 9, 7, 29).unwrap();
        let rounded = round_to_minute(t);
        assert_eq!(rounded.minute(), 7);
        assert_eq!(rounded.second(), 0);
    }

    #[test]
    fn round_up_from_thirty_seconds() {
        let t = Local.with_ymd_and_hms(2025, 7, 15, 9, 7, 30).unwrap();
        let rounded = round_to_minute(t);
        assert_eq!(rounded.minute(), 8);
        assert_eq!(rounded.second(), 0);
    }

    #[test]
    fn round_carries_across_hour() {
        let t = Local.with_ymd_and_hms(2025, 7, 15, 9, 59, 45).unwrap();
        let rounded = round_to_minute(t);
        assert_eq!(rounded.hour(), 10);
        assert_eq!(rounded.minute(), 0);
    }

    #[test]
    fn delay_to_next_minute_is_under_a_minute() {
        let d = until_next_minute(Local::now());
        assert!(d <= std::time::Duration::from_secs(60));
        assert!(d > std::time::Duration::ZERO);
    }

    #[test]
    fn resolve_plain_time_is_identity() {
        let t = Local.with_ymd_and_hms(2025, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(resolve_local(t.naive_local()), t);
    }
}
