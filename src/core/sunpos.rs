//! Analytic solar-position model.
//!
//! Compact formula accurate to a fraction of a degree between 1901 and 2099:
//! days from J2000, mean solar longitude/anomaly, ecliptic longitude,
//! obliquity, right ascension, declination, local sidereal time and hour
//! angle, from which azimuth and elevation follow. Pure function, suitable
//! for validation against almanac values.

use chrono::{Datelike, NaiveDateTime, Timelike};

/// Sun azimuth/elevation pair in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    /// Degrees clockwise from north, in [0, 360)
    pub azimuth: f64,
    /// Degrees above the horizon, in [-180, 180)
    pub elevation: f64,
}

impl SunPosition {
    /// Cache key for artifacts derived from this sun geometry
    pub fn cache_key(&self) -> String {
        format!("{:.2}-az_{:.2}-z", self.azimuth, self.elevation)
    }
}

/// Wrap `x` into [range_min, range_max)
fn into_range(x: f64, range_min: f64, range_max: f64) -> f64 {
    let shifted = x - range_min;
    let delta = range_max - range_min;
    ((shifted % delta) + delta) % delta + range_min
}

/// Sun azimuth and elevation for a UTC timestamp at (latitude, longitude).
///
/// When `refraction` is set, the elevation is adjusted by the empirical
/// atmospheric-refraction term `1.02 / tan(e + 10.3/(e + 5.11)) / 60`.
/// Both outputs are rounded to two decimal places.
pub fn sun_position(
    when: NaiveDateTime,
    latitude: f64,
    longitude: f64,
    refraction: bool,
) -> SunPosition {
    let year = when.year() as i64;
    let month = when.month() as i64;
    let day = when.day() as i64;

    let rlat = latitude.to_radians();
    let rlon = longitude.to_radians();

    // Decimal hour of the day at Greenwich
    let greenwich_time =
        when.hour() as f64 + when.minute() as f64 / 60.0 + when.second() as f64 / 3600.0;

    // Days from J2000, accurate from 1901 to 2099
    let daynum = (367 * year - 7 * (year + (month + 9) / 12) / 4 + 275 * month / 9 + day) as f64
        - 730531.5
        + greenwich_time / 24.0;

    // Mean longitude and mean anomaly of the sun
    let mean_long = daynum * 0.01720279239 + 4.894967873;
    let mean_anom = daynum * 0.01720197034 + 6.240040768;

    // Ecliptic longitude of the sun
    let eclip_long =
        mean_long + 0.03342305518 * mean_anom.sin() + 0.0003490658504 * (2.0 * mean_anom).sin();

    // Obliquity of the ecliptic
    let obliquity = 0.4090877234 - 0.000000006981317008 * daynum;

    // Right ascension and declination
    let rasc = (obliquity.cos() * eclip_long.sin()).atan2(eclip_long.cos());
    let decl = (obliquity.sin() * eclip_long.sin()).asin();

    // Local sidereal time and hour angle
    let sidereal = 4.894961213 + 6.300388099 * daynum + rlon;
    let hour_ang = sidereal - rasc;

    // Local elevation and azimuth
    let elevation =
        (decl.sin() * rlat.sin() + decl.cos() * rlat.cos() * hour_ang.cos()).asin();
    let azimuth = (-(decl.cos()) * rlat.cos() * hour_ang.sin())
        .atan2(decl.sin() - rlat.sin() * elevation.sin());

    let azimuth = into_range(azimuth.to_degrees(), 0.0, 360.0);
    let mut elevation = into_range(elevation.to_degrees(), -180.0, 180.0);

    if refraction {
        let targ = (elevation + 10.3 / (elevation + 5.11)).to_radians();
        elevation += 1.02 / targ.tan() / 60.0;
    }

    SunPosition {
        azimuth: (azimuth * 100.0).round() / 100.0,
        elevation: (elevation * 100.0).round() / 100.0,
    }
}
