//! Sun and Moon positions, illumination classification, flare geometry
//!
//! The Sun uses the standard low-precision analytic formula (arcminute
//! class); the Moon uses a truncated Brown-theory series (a few km). Both
//! are plenty for eclipse and glint work, and neither needs external
//! ephemeris files.

use glam::DVec3;
use satkit::Instant;

use super::{gmst, julian_date, Geodetic, AU_KM, EARTH_RADIUS_KM};

/// Illumination of an object as seen from the ground station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Illumination {
    /// Object in sunlight while the observer is in astronomical twilight
    /// or darker.
    Visible,
    /// Object in sunlight, observer in daylight.
    Daylight,
    /// Object inside the Earth's umbral cone.
    Eclipsed,
}

/// Specular-glint prediction off a nadir-pointing flat face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlareStatus {
    None,
    /// Reflection within 1 degree of the line of sight.
    Near,
    /// Reflection within half a degree of the line of sight.
    Hit,
}

/// Solar position in the inertial frame (km).
pub fn sun_eci(t: &Instant) -> DVec3 {
    let n = julian_date(t) - 2_451_545.0;
    let l = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
    let g = ((357.528 + 0.985_600_3 * n).rem_euclid(360.0)).to_radians();
    let lambda = (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    let eps = (23.439 - 0.000_000_4 * n).to_radians();
    DVec3::new(
        AU_KM * lambda.cos(),
        AU_KM * eps.cos() * lambda.sin(),
        AU_KM * eps.sin() * lambda.sin(),
    )
}

/// Lunar position in the inertial frame (km), truncated Brown series:
/// six longitude terms, four latitude terms, four distance terms.
pub fn moon_eci(t: &Instant) -> DVec3 {
    let tc = (julian_date(t) - 2_451_545.0) / 36_525.0;

    let norm = |deg: f64| deg.rem_euclid(360.0).to_radians();

    // Mean longitude, elongation, anomalies, argument of latitude.
    let l_prime = norm(218.316_447_7 + 481_267.881_234_21 * tc - 0.001_578_6 * tc * tc);
    let d = norm(297.850_192_1 + 445_267.111_403_4 * tc - 0.001_881_9 * tc * tc);
    let m = norm(357.529_109_2 + 35_999.050_34 * tc - 0.000_153_6 * tc * tc);
    let m_prime = norm(134.963_396_4 + 477_198.867_505_5 * tc + 0.008_741_4 * tc * tc);
    let f = norm(93.272_095_0 + 483_202.017_523_3 * tc - 0.003_653_9 * tc * tc);

    let sigma_l = 6.288_774 * m_prime.sin()
        + 1.274_027 * (2.0 * d - m_prime).sin()
        + 0.658_314 * (2.0 * d).sin()
        + 0.213_618 * (2.0 * m_prime).sin()
        - 0.185_116 * m.sin()
        - 0.114_332 * (2.0 * f).sin();

    let sigma_b = 5.128_122 * f.sin()
        + 0.280_602 * (m_prime + f).sin()
        + 0.277_693 * (m_prime - f).sin()
        + 0.173_237 * (2.0 * d - f).sin();

    let sigma_r = -20_905.355 * m_prime.cos()
        - 3_699.111 * (2.0 * d - m_prime).cos()
        - 2_955.968 * (2.0 * d).cos()
        - 569.925 * (2.0 * m_prime).cos();

    let lambda = l_prime + sigma_l.to_radians();
    let beta = sigma_b.to_radians();
    let r = 385_000.56 + sigma_r;

    let eps = (23.439_291 - 0.013_004_2 * tc).to_radians();

    // Ecliptic to equatorial.
    let x_ecl = r * beta.cos() * lambda.cos();
    let y_ecl = r * beta.cos() * lambda.sin();
    let z_ecl = r * beta.sin();
    DVec3::new(
        x_ecl,
        y_ecl * eps.cos() - z_ecl * eps.sin(),
        y_ecl * eps.sin() + z_ecl * eps.cos(),
    )
}

/// Sub-point of a distant body: rotate west by GMST, take latitude and
/// longitude directly off the Earth-fixed direction.
pub fn ground_point(eci: DVec3, t: &Instant) -> Geodetic {
    let theta = gmst(t);
    let x_ecf = eci.x * theta.cos() + eci.y * theta.sin();
    let y_ecf = -eci.x * theta.sin() + eci.y * theta.cos();
    let z_ecf = eci.z;

    let hyp = (x_ecf * x_ecf + y_ecf * y_ecf).sqrt();
    Geodetic {
        lat_deg: z_ecf.atan2(hyp).to_degrees(),
        lon_deg: y_ecf.atan2(x_ecf).to_degrees(),
        alt_km: eci.length() - EARTH_RADIUS_KM,
    }
}

/// Solar elevation above the observer's local horizontal, in radians.
pub fn solar_elevation(observer_eci: DVec3, sun: DVec3) -> f64 {
    std::f64::consts::FRAC_PI_2 - observer_eci.normalize().dot(sun.normalize()).acos()
}

/// Classify an object against the cylindrical-umbra model and the
/// observer's twilight state.
pub fn illumination(object_eci: DVec3, observer_eci: DVec3, t: &Instant) -> Illumination {
    let sun = sun_eci(t);
    let umbra_half_angle = (EARTH_RADIUS_KM / object_eci.length()).asin();
    let theta = object_eci.normalize().dot(sun.normalize()).acos();

    let lit = theta < std::f64::consts::FRAC_PI_2
        || (std::f64::consts::PI - theta) >= umbra_half_angle;
    if !lit {
        return Illumination::Eclipsed;
    }

    if solar_elevation(observer_eci, sun) < (-6.0_f64).to_radians() {
        Illumination::Visible
    } else {
        Illumination::Daylight
    }
}

/// Glint test for a nadir-pointing mirror face. Only low orbits under a
/// dark observer qualify; everything else is `None` outright.
pub fn flare(
    object_eci: DVec3,
    observer_eci: DVec3,
    sun: DVec3,
    apogee_km: f64,
) -> FlareStatus {
    if apogee_km > 1000.0 {
        return FlareStatus::None;
    }
    if solar_elevation(observer_eci, sun) >= (-12.0_f64).to_radians() {
        return FlareStatus::None;
    }

    let normal = -object_eci.normalize();
    let incoming = (object_eci - sun).normalize();
    let cos_in = incoming.dot(normal);
    if cos_in >= 0.0 {
        // Light arriving on the zenith face; the mirror can't see it.
        return FlareStatus::None;
    }

    let reflection = incoming - 2.0 * cos_in * normal;
    let to_observer = (observer_eci - object_eci).normalize();
    let separation = reflection
        .dot(to_observer)
        .clamp(-1.0, 1.0)
        .acos()
        .to_degrees();

    if separation < 0.5 {
        FlareStatus::Hit
    } else if separation < 1.0 {
        FlareStatus::Near
    } else {
        FlareStatus::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satkit::{Duration, Instant};

    #[test]
    fn test_sun_near_solstice_declination() {
        let t = Instant::from_datetime(2024, 6, 21, 12, 0, 0.0).unwrap();
        let geo = ground_point(sun_eci(&t), &t);
        assert!((geo.lat_deg - 23.43).abs() < 0.2, "lat {}", geo.lat_deg);
        // Subsolar point close to the Greenwich meridian at 12:00 UT.
        assert!(geo.lon_deg.abs() < 3.0, "lon {}", geo.lon_deg);
    }

    #[test]
    fn test_sun_distance_about_one_au() {
        let t = Instant::from_datetime(2024, 3, 20, 0, 0, 0.0).unwrap();
        let r = sun_eci(&t).length();
        assert!((r - AU_KM).abs() / AU_KM < 0.02);
    }

    #[test]
    fn test_moon_distance_within_orbit_bounds() {
        let mut t = Instant::from_datetime(2024, 1, 1, 0, 0, 0.0).unwrap();
        for _ in 0..28 {
            let r = moon_eci(&t).length();
            assert!((356_000.0..=407_000.0).contains(&r), "moon at {r} km");
            t = t + Duration::from_seconds(86_400.0);
        }
    }

    #[test]
    fn test_midnight_object_is_visible() {
        // Observer on the equator at the prime meridian at 00:00 UT, which
        // is local midnight; a polar object at 7000 km stays in sunlight.
        let t = Instant::from_datetime(2024, 6, 21, 0, 0, 0.0).unwrap();
        let obs = crate::astro::Observer::new(0.0, 0.0, 0.0).eci_position(&t);
        let object = DVec3::new(0.0, 0.0, 7000.0);
        assert!(solar_elevation(obs, sun_eci(&t)) < (-6.0_f64).to_radians());
        assert_eq!(illumination(object, obs, &t), Illumination::Visible);
    }

    #[test]
    fn test_antisolar_low_object_is_eclipsed() {
        let t = Instant::from_datetime(2024, 6, 21, 0, 0, 0.0).unwrap();
        let sun_dir = sun_eci(&t).normalize();
        let object = -sun_dir * 7000.0;
        let obs = -sun_dir * EARTH_RADIUS_KM;
        assert_eq!(illumination(object, obs, &t), Illumination::Eclipsed);
    }

    #[test]
    fn test_flare_hit_on_axis() {
        // Reflection exactly antiparallel to the object-to-observer line.
        let object = DVec3::new(0.0, 0.0, 7000.0);
        let obs = DVec3::new(0.0, 0.0, EARTH_RADIUS_KM + 0.001);
        let sun = DVec3::new(0.0, 0.0, -1.5e8);
        assert_eq!(flare(object, obs, sun, 622.0), FlareStatus::Hit);
    }

    #[test]
    fn test_flare_rejected_under_daylight() {
        let object = DVec3::new(0.0, 0.0, 7000.0);
        let obs = DVec3::new(0.0, 0.0, EARTH_RADIUS_KM + 0.001);
        let sun = DVec3::new(0.0, 0.0, 1.5e8);
        assert_eq!(flare(object, obs, sun, 622.0), FlareStatus::None);
    }

    #[test]
    fn test_flare_rejected_above_apogee_limit() {
        let object = DVec3::new(0.0, 0.0, 9000.0);
        let obs = DVec3::new(0.0, 0.0, EARTH_RADIUS_KM + 0.001);
        let sun = DVec3::new(0.0, 0.0, -1.5e8);
        assert_eq!(flare(object, obs, sun, 2000.0), FlareStatus::None);
    }

    #[test]
    fn test_flare_near_band() {
        let object = DVec3::new(0.0, 0.0, 7000.0);
        let obs = DVec3::new(0.0, 0.0, EARTH_RADIUS_KM + 0.001);
        // Tilt the sun by 0.75 degrees: reflection lands between the hit
        // and near thresholds.
        let ang = 0.75_f64.to_radians();
        let sun = DVec3::new(1.5e8 * ang.sin(), 0.0, -1.5e8 * ang.cos());
        assert_eq!(flare(object, obs, sun, 622.0), FlareStatus::Near);
    }
}
