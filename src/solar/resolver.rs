use chrono::{DateTime, Duration, Local, NaiveTime};
use std::sync::Arc;
use tracing::{debug, warn};

use super::provider::{NoaaSolarProvider, SolarProvider, SolarTimes};
use crate::recurrence::resolve_local;

/// The solar phenomenon an astronomical event anchors to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarEventKind {
    Sunrise,
    Sunset,
    SolarNoon,
    DawnCivil,
    DuskCivil,
    DawnNautical,
    DuskNautical,
    DawnAstronomical,
    DuskAstronomical,
}

impl SolarEventKind {
    /// Case-insensitive parse; anything unrecognized anchors to sunset.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sunrise" => SolarEventKind::Sunrise,
            "sunset" => SolarEventKind::Sunset,
            "solarnoon" => SolarEventKind::SolarNoon,
            "dawncivil" => SolarEventKind::DawnCivil,
            "duskcivil" => SolarEventKind::DuskCivil,
            "dawnnautical" => SolarEventKind::DawnNautical,
            "dusknautical" => SolarEventKind::DuskNautical,
            "dawnastronomical" => SolarEventKind::DawnAstronomical,
            "duskastronomical" => SolarEventKind::DuskAstronomical,
            _ => SolarEventKind::Sunset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolarEventKind::Sunrise => "Sunrise",
            SolarEventKind::Sunset => "Sunset",
            SolarEventKind::SolarNoon => "SolarNoon",
            SolarEventKind::DawnCivil => "DawnCivil",
            SolarEventKind::DuskCivil => "DuskCivil",
            SolarEventKind::DawnNautical => "DawnNautical",
            SolarEventKind::DuskNautical => "DuskNautical",
            SolarEventKind::DawnAstronomical => "DawnAstronomical",
            SolarEventKind::DuskAstronomical => "DuskAstronomical",
        }
    }

    fn pick(&self, times: &SolarTimes) -> DateTime<Local> {
        match self {
            SolarEventKind::Sunrise => times.sunrise,
            SolarEventKind::Sunset => times.sunset,
            SolarEventKind::SolarNoon => times.solar_noon,
            SolarEventKind::DawnCivil => times.dawn_civil,
            SolarEventKind::DuskCivil => times.dusk_civil,
            SolarEventKind::DawnNautical => times.dawn_nautical,
            SolarEventKind::DuskNautical => times.dusk_nautical,
            SolarEventKind::DawnAstronomical => times.dawn_astronomical,
            SolarEventKind::DuskAstronomical => times.dusk_astronomical,
        }
    }
}

/// A solar anchor plus a signed minute offset, serialized as
/// `"<Kind>:<±minutes>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AstroOffset {
    pub kind: SolarEventKind,
    pub minutes: i32,
}

impl AstroOffset {
    /// Parse `"Sunset:-10"` style descriptors. A malformed descriptor
    /// falls back to sunset with no offset.
    pub fn parse(value: &str) -> Self {
        let mut parts = value.splitn(2, ':');
        let kind = SolarEventKind::parse(parts.next().unwrap_or(""));
        let minutes = parts
            .next()
            .and_then(|m| m.trim().parse::<i32>().ok())
            .unwrap_or(0);
        Self { kind, minutes }
    }

    pub fn descriptor(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.minutes)
    }
}

impl Default for AstroOffset {
    /// The default anchor when a config omits one: ten minutes before
    /// sunset.
    fn default() -> Self {
        Self {
            kind: SolarEventKind::Sunset,
            minutes: -10,
        }
    }
}

/// Resolves solar phenomena at the scheduler's configured coordinates.
pub struct SolarClock {
    latitude: f64,
    longitude: f64,
    provider: Arc<dyn SolarProvider>,
}

/// Days searched forward before giving up on a future solar instant.
const MAX_DAY_SEARCH: u32 = 370;

impl SolarClock {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self::with_provider(latitude, longitude, Arc::new(NoaaSolarProvider))
    }

    pub fn with_provider(
        latitude: f64,
        longitude: f64,
        provider: Arc<dyn SolarProvider>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            provider,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// The instant of `kind` on `date`'s day, or the first later day whose
    /// instant is still in the future when `allow_past` is false.
    ///
    /// Times of day before 03:30 are re-anchored to 03:10 so the day's
    /// phenomena are computed from a clock time that cannot fall inside a
    /// spring-forward gap. On exhaustion the current time is returned as a
    /// sentinel; callers treat a non-future result by advancing on the
    /// next tick.
    pub fn solar_time(
        &self,
        kind: SolarEventKind,
        date: DateTime<Local>,
        allow_past: bool,
    ) -> DateTime<Local> {
        let mut date = dst_safe(date);
        let earliest = Local::now() + Duration::minutes(1);

        for _ in 0..MAX_DAY_SEARCH {
            let times = self
                .provider
                .solar_times(date.date_naive(), self.latitude, self.longitude);
            let instant = kind.pick(&times);

            if allow_past || instant > earliest {
                return instant;
            }

            debug!(
                "solar {} for {} already passed, trying next day",
                kind.as_str(),
                date.date_naive()
            );
            date = resolve_local(date.naive_local() + Duration::days(1));
        }

        warn!(
            "no future {} found within {} days at ({}, {})",
            kind.as_str(),
            MAX_DAY_SEARCH,
            self.latitude,
            self.longitude
        );
        Local::now()
    }
}

fn dst_safe(date: DateTime<Local>) -> DateTime<Local> {
    let cutoff = NaiveTime::from_hms_opt(3, 30, 0).unwrap_or_default();
    let anchor = NaiveTime::from_hms_opt(3, 10, 0).unwrap_or_default();

    if date.time() < cutoff {
        resolve_local(date.date_naive().and_time(anchor))
    } else {
        date
    }
}
