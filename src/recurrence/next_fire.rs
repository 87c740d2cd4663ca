use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Duration, Local, Months, NaiveDateTime, Weekday};

use super::clock::resolve_local;
use super::rule::{Frequency, RecurrenceRule, ALL_WEEK};

/// Upper bound on day-by-day scan steps for week/month rules. A valid mask
/// matches long before this; hitting it means the mask names a day the
/// scanned months never contain (e.g. day 30 with a February-locked rate).
const MAX_SCAN_STEPS: u32 = 10_000;

/// Advance `target` until it is strictly later than `now` plus one minute.
///
/// The one-minute guard prevents a re-fire race: the timer re-arms to the
/// next minute boundary right after firing, and without the guard the same
/// occurrence could be selected again on that tick.
///
/// Arithmetic runs on the local wall clock; daylight-saving behavior is
/// whatever the platform calendar yields for the chosen unit.
pub fn next_fire(
    target: DateTime<Local>,
    now: DateTime<Local>,
    rule: &RecurrenceRule,
) -> Result<DateTime<Local>> {
    rule.validate()?;

    if rule.frequency == Frequency::NotSet {
        // One-time events pass through; the caller decides whether a past
        // target is acceptable.
        return Ok(target);
    }

    let guard = (now + Duration::minutes(1)).naive_local();
    let mut cursor = target.naive_local();
    let rate = rule.rate;

    match rule.frequency {
        Frequency::NotSet => unreachable!(),
        Frequency::Minute => {
            let step = Duration::minutes(rate as i64);
            while cursor <= guard {
                cursor += step;
            }
        }
        Frequency::Hour => {
            let step = Duration::hours(rate as i64);
            while cursor <= guard {
                cursor += step;
            }
        }
        Frequency::Day => {
            let step = Duration::days(rate as i64);
            while cursor <= guard {
                cursor += step;
            }
        }
        Frequency::Year => {
            let step = Months::new(rate.saturating_mul(12));
            while cursor <= guard {
                cursor = cursor
                    .checked_add_months(step)
                    .context("yearly recurrence overflowed the calendar")?;
            }
        }
        Frequency::Week => {
            cursor = next_weekly(cursor, guard, rate, rule.add_rate & ALL_WEEK)?;
        }
        Frequency::Month => {
            cursor = next_monthly(cursor, guard, rate, rule.add_rate as u32)?;
        }
    }

    Ok(resolve_local(cursor))
}

/// Day-by-day walk over the weekday mask. Weeks run Sunday..Saturday;
/// crossing into Sunday skips ahead `7 * (rate - 1)` days so only every
/// rate-th week block is scanned.
fn next_weekly(
    mut cursor: NaiveDateTime,
    guard: NaiveDateTime,
    rate: u32,
    mask: i32,
) -> Result<NaiveDateTime> {
    if cursor > guard && weekday_selected(mask, cursor.weekday()) {
        return Ok(cursor);
    }

    for _ in 0..MAX_SCAN_STEPS {
        cursor += Duration::days(1);
        if cursor.weekday() == Weekday::Sun && rate > 1 {
            cursor += Duration::days(7 * (rate as i64 - 1));
        }
        if weekday_selected(mask, cursor.weekday()) && cursor > guard {
            return Ok(cursor);
        }
    }

    bail!("weekly recurrence never matched a selected day");
}

/// Day-by-day walk over the month-day mask, preserving the target's
/// hour:minute. Rolling past the last day of a month skips ahead
/// `rate - 1` months.
fn next_monthly(
    mut cursor: NaiveDateTime,
    guard: NaiveDateTime,
    rate: u32,
    mask: u32,
) -> Result<NaiveDateTime> {
    for _ in 0..MAX_SCAN_STEPS {
        if mask & (1u32 << cursor.day()) != 0 && cursor > guard {
            return Ok(cursor);
        }
        let month = cursor.month();
        cursor += Duration::days(1);
        if cursor.month() != month && rate > 1 {
            cursor = cursor
                .checked_add_months(Months::new(rate - 1))
                .context("monthly recurrence overflowed the calendar")?;
        }
    }

    bail!("monthly recurrence never matched a selected day");
}

fn weekday_selected(mask: i32, weekday: Weekday) -> bool {
    mask & (1 << weekday.num_days_from_sunday()) != 0
}
