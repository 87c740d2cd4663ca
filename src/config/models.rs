use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Timestamp layout used across profile files: local time with its UTC
/// offset, second precision.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Legacy split date/time layout still accepted on load.
const LEGACY_DATE_FORMAT: &str = "%m/%d/%Y";
const LEGACY_TIME_FORMAT: &str = "%H:%M";

#[inline]
fn default_rate() -> u32 {
    1
}

/// One profile file on disk: a named set of event configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProfileConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Stamped on every save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,

    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// Wire form of a single event. String enums are parsed case-insensitively
/// by the event constructor; unknown values fall back to safe defaults
/// there, so this struct stays permissive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventConfig {
    /// Display order only; rewritten 1..N by target time on save.
    #[serde(default)]
    pub id: u32,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Derived from the recurrence rule; overwritten on save.
    #[serde(default)]
    pub rec_description: String,

    /// `"AbsoluteEvent"` or `"AstronomicalEvent"`.
    #[serde(rename = "type", default)]
    pub event_type: String,

    /// `"Enabled"` or `"Disabled"`.
    #[serde(default)]
    pub state: String,

    /// `"NotSet"` or one of the `EveryNth*` names.
    #[serde(default)]
    pub frequency: String,

    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Day-selection bitmask for weekly/monthly rules.
    #[serde(default)]
    pub add_rate: i32,

    /// `"<Kind>:<±minutes>"`, meaningful for astronomical events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub astro_offset: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_time: Option<String>,

    /// Legacy `HH:mm`, combined with `date` when `target-time` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    /// Legacy `MM/dd/yyyy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<String>,

    /// Reserved; carried through saves untouched.
    #[serde(default)]
    pub acknowledge: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
}

impl EventConfig {
    /// Minimal config used as a base by builders and tests.
    pub fn named(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            rec_description: String::new(),
            event_type: String::new(),
            state: String::new(),
            frequency: String::new(),
            rate: 1,
            add_rate: 0,
            astro_offset: None,
            target_time: None,
            time: None,
            date: None,
            last_fired: None,
            acknowledge: false,
            actions: None,
        }
    }
}

pub fn format_timestamp(time: &DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Local>> {
    DateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Local))
}

/// Combine the legacy `date` and `time` fields into a local instant.
pub fn parse_legacy_date_time(date: &str, time: &str) -> Option<DateTime<Local>> {
    let date = chrono::NaiveDate::parse_from_str(date.trim(), LEGACY_DATE_FORMAT).ok()?;
    let time = chrono::NaiveTime::parse_from_str(time.trim(), LEGACY_TIME_FORMAT).ok()?;
    Some(crate::recurrence::resolve_local(date.and_time(time)))
}
