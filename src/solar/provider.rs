use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};
use std::f64::consts::PI;

/// Sun phenomena for one date at one location, as local instants.
#[derive(Debug, Clone, Copy)]
pub struct SolarTimes {
    pub sunrise: DateTime<Local>,
    pub sunset: DateTime<Local>,
    pub solar_noon: DateTime<Local>,
    pub dawn_civil: DateTime<Local>,
    pub dusk_civil: DateTime<Local>,
    pub dawn_nautical: DateTime<Local>,
    pub dusk_nautical: DateTime<Local>,
    pub dawn_astronomical: DateTime<Local>,
    pub dusk_astronomical: DateTime<Local>,
}

/// Source of solar position data. The scheduler only needs this one call;
/// hosts can swap in an external ephemeris library.
pub trait SolarProvider: Send + Sync {
    fn solar_times(&self, date: NaiveDate, latitude: f64, longitude: f64) -> SolarTimes;
}

/// Built-in provider implementing the NOAA general solar position
/// equations. Accuracy is within a couple of minutes, which is inside the
/// scheduler's one-minute resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoaaSolarProvider;

/// Solar zenith angles in degrees for the supported phenomena. The
/// sunrise/sunset figure includes refraction and the solar disc radius.
const ZENITH_OFFICIAL: f64 = 90.833;
const ZENITH_CIVIL: f64 = 96.0;
const ZENITH_NAUTICAL: f64 = 102.0;
const ZENITH_ASTRONOMICAL: f64 = 108.0;

impl SolarProvider for NoaaSolarProvider {
    fn solar_times(&self, date: NaiveDate, latitude: f64, longitude: f64) -> SolarTimes {
        let (eqtime, decl) = solar_parameters(date);
        let noon_minutes = 720.0 - 4.0 * longitude - eqtime;

        let event = |zenith: f64, rising: bool| -> DateTime<Local> {
            let ha = hour_angle_degrees(latitude, decl, zenith);
            let signed = if rising { ha } else { -ha };
            let minutes = 720.0 - 4.0 * (longitude + signed) - eqtime;
            utc_minutes_to_local(date, minutes)
        };

        SolarTimes {
            sunrise: event(ZENITH_OFFICIAL, true),
            sunset: event(ZENITH_OFFICIAL, false),
            solar_noon: utc_minutes_to_local(date, noon_minutes),
            dawn_civil: event(ZENITH_CIVIL, true),
            dusk_civil: event(ZENITH_CIVIL, false),
            dawn_nautical: event(ZENITH_NAUTICAL, true),
            dusk_nautical: event(ZENITH_NAUTICAL, false),
            dawn_astronomical: event(ZENITH_ASTRONOMICAL, true),
            dusk_astronomical: event(ZENITH_ASTRONOMICAL, false),
        }
    }
}

/// Equation of time (minutes) and solar declination (radians) at solar
/// noon of the given date.
fn solar_parameters(date: NaiveDate) -> (f64, f64) {
    let day_of_year = date.ordinal() as f64;
    let gamma = 2.0 * PI / 365.0 * (day_of_year - 1.0);

    let eqtime = 229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());

    let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    (eqtime, decl)
}

/// Hour angle in degrees for the given zenith. The cosine is clamped so
/// polar day and polar night degenerate toward solar noon/midnight instead
/// of producing NaN.
fn hour_angle_degrees(latitude: f64, declination: f64, zenith_deg: f64) -> f64 {
    let lat = latitude.to_radians();
    let cos_ha = (zenith_deg.to_radians().cos() - lat.sin() * declination.sin())
        / (lat.cos() * declination.cos());
    cos_ha.clamp(-1.0, 1.0).acos().to_degrees()
}

fn utc_minutes_to_local(date: NaiveDate, minutes: f64) -> DateTime<Local> {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let utc = Utc.from_utc_datetime(&midnight) + Duration::seconds((minutes * 60.0) as i64);
    utc.with_timezone(&Local)
}
