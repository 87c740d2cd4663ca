use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Local};

/// Weekday mask aliases, bit 0 = Sunday .. bit 6 = Saturday.
pub const WORKDAYS: i32 = 0x3E;
pub const WEEKENDS: i32 = 0x41;
pub const ALL_WEEK: i32 = 0x7F;

const WEEKDAY_NAMES: [&str; 7] = ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"];

/// How often an event repeats. The names on the wire are the
/// `EveryNth*` strings; parsing is case-insensitive and anything
/// unrecognized falls back to `NotSet` (a one-time event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    NotSet,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Frequency {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "everynthminute" => Frequency::Minute,
            "everynthhour" => Frequency::Hour,
            "everynthday" => Frequency::Day,
            "everynthweek" => Frequency::Week,
            "everynthmonth" => Frequency::Month,
            "everynthyear" => Frequency::Year,
            _ => Frequency::NotSet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::NotSet => "NotSet",
            Frequency::Minute => "EveryNthMinute",
            Frequency::Hour => "EveryNthHour",
            Frequency::Day => "EveryNthDay",
            Frequency::Week => "EveryNthWeek",
            Frequency::Month => "EveryNthMonth",
            Frequency::Year => "EveryNthYear",
        }
    }
}

/// A recurrence rule: frequency, rate and the day-selection bitmask.
///
/// `add_rate` selects weekdays for weekly rules (bit 0 = Sunday) and days
/// of the month for monthly rules (bit d = day d, bit 0 unused). Other
/// frequencies ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub rate: u32,
    pub add_rate: i32,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, rate: u32, add_rate: i32) -> Self {
        Self {
            frequency,
            rate,
            add_rate,
        }
    }

    pub fn one_time() -> Self {
        Self::new(Frequency::NotSet, 1, 0)
    }

    pub fn is_one_time(&self) -> bool {
        self.frequency == Frequency::NotSet
    }

    /// Reject rules the advance loop cannot make progress on.
    pub fn validate(&self) -> Result<()> {
        if self.frequency == Frequency::NotSet {
            return Ok(());
        }

        if self.rate == 0 {
            bail!("recurrence rate must be at least 1");
        }

        match self.frequency {
            Frequency::Week => {
                if self.add_rate <= 0 {
                    bail!("weekly recurrence requires a positive day mask");
                }
                if self.add_rate & ALL_WEEK == 0 {
                    bail!("weekly recurrence selects no weekdays");
                }
            }
            Frequency::Month => {
                if self.add_rate <= 0 {
                    bail!("monthly recurrence requires a positive day mask");
                }
                if (self.add_rate as u32) & 0xFFFF_FFFE == 0 {
                    bail!("monthly recurrence selects no days");
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Human-readable recurrence description, stable across saves.
    pub fn describe(&self, target: DateTime<Local>) -> String {
        match self.frequency {
            Frequency::NotSet => "One time event".to_string(),
            Frequency::Minute => format!("Every({})Minute", self.rate),
            Frequency::Hour => format!("Every({})Hour", self.rate),
            Frequency::Day => format!("Every({})Day", self.rate),
            Frequency::Week => format!(
                "Every({})Week ({})",
                self.rate,
                describe_weekdays(self.add_rate)
            ),
            Frequency::Month => format!(
                "Every({})Month ({})",
                self.rate,
                describe_month_days(self.add_rate)
            ),
            Frequency::Year => format!(
                "Every({})Year ({:02}/{:02})",
                self.rate,
                target.day(),
                target.month()
            ),
        }
    }
}

fn describe_weekdays(mask: i32) -> String {
    let mut out = String::from("-");
    for (bit, name) in WEEKDAY_NAMES.iter().enumerate() {
        if mask & (1 << bit) != 0 {
            out.push_str(name);
            out.push('-');
        }
    }
    out
}

fn describe_month_days(mask: i32) -> String {
    let mut out = String::from("-");
    for day in 1..=31u32 {
        if (mask as u32) & (1 << day) != 0 {
            out.push_str(&day.to_string());
            out.push_str(".-");
        }
    }
    out
}
