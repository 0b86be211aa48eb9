//! Sunrise and sunset from the standard sunrise equation.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Julian date of 2000-01-01 12:00 UTC.
const J2000: f64 = 2_451_545.0;

/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Solar altitude at apparent sunrise, in degrees (refraction and disc).
const HORIZON: f64 = -0.833;

/// Earth's axial tilt, in degrees.
const OBLIQUITY: f64 = 23.4397;

/// Observer position. Longitude is positive east.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Sunrise and sunset in UTC for `date` at `location`.
///
/// `None` during polar day or night.
pub fn sun_times(date: NaiveDate, location: Location) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)?;
    let days = (date - epoch).num_days() as f64;

    let mean_solar_noon = days + 0.0008 - location.longitude / 360.0;
    let anomaly = (357.5291 + 0.985_600_28 * mean_solar_noon).rem_euclid(360.0);
    let m = anomaly.to_radians();
    let center = 1.9148 * m.sin() + 0.0200 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
    let ecliptic_longitude = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
    let lambda = ecliptic_longitude.to_radians();

    let transit = J2000 + mean_solar_noon + 0.0053 * m.sin() - 0.0069 * (2.0 * lambda).sin();

    let declination = (lambda.sin() * OBLIQUITY.to_radians().sin()).asin();
    let phi = location.latitude.to_radians();
    let cos_hour_angle = (HORIZON.to_radians().sin() - phi.sin() * declination.sin())
        / (phi.cos() * declination.cos());
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }
    let hour_angle = cos_hour_angle.acos().to_degrees();

    let sunrise = julian_to_utc(transit - hour_angle / 360.0)?;
    let sunset = julian_to_utc(transit + hour_angle / 360.0)?;
    Some((sunrise, sunset))
}

fn julian_to_utc(julian: f64) -> Option<DateTime<Utc>> {
    let millis = ((julian - UNIX_EPOCH_JD) * 86_400_000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// The next sunrise (or sunset) strictly after `now`.
pub fn next_solar_event(
    now: DateTime<Utc>,
    location: Location,
    sunset: bool,
) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    // Polar days are skipped; give up after a year of them.
    (0..=366).find_map(|offset| {
        let date = today.checked_add_signed(Duration::days(offset))?;
        let (rise, set) = sun_times(date, location)?;
        let event = if sunset { set } else { rise };
        (event > now).then_some(event)
    })
}
