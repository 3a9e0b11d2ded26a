//! Ground-station geometry: geodetic site position, look angles, range-rate

use glam::DVec3;
use satkit::Instant;

use super::{gmst, Geodetic, EARTH_FLATTENING, EARTH_OMEGA_RAD_S, EARTH_RADIUS_KM};

/// Topocentric pointing solution. Azimuth is measured clockwise from true
/// north in [0, 360); elevation from the local horizon in [-90, 90].
#[derive(Debug, Clone, Copy)]
pub struct LookAngle {
    pub az_deg: f64,
    pub el_deg: f64,
    pub range_km: f64,
}

/// A fixed geodetic site on the WGS-84 ellipsoid.
#[derive(Debug, Clone, Copy)]
pub struct Observer {
    location: Geodetic,
}

impl Observer {
    pub fn new(lat_deg: f64, lon_deg: f64, alt_km: f64) -> Self {
        Self {
            location: Geodetic {
                lat_deg,
                lon_deg,
                alt_km,
            },
        }
    }

    pub fn location(&self) -> Geodetic {
        self.location
    }

    /// Site position in the inertial frame at `t`: ellipsoidal Earth-fixed
    /// coordinates rotated east by GMST.
    pub fn eci_position(&self, t: &Instant) -> DVec3 {
        let lat = self.location.lat_deg.to_radians();
        let lon = self.location.lon_deg.to_radians();
        let e2 = 2.0 * EARTH_FLATTENING - EARTH_FLATTENING * EARTH_FLATTENING;
        let n = EARTH_RADIUS_KM / (1.0 - e2 * lat.sin() * lat.sin()).sqrt();

        let x_ecf = (n + self.location.alt_km) * lat.cos() * lon.cos();
        let y_ecf = (n + self.location.alt_km) * lat.cos() * lon.sin();
        let z_ecf = (n * (1.0 - e2) + self.location.alt_km) * lat.sin();

        let theta = gmst(t);
        DVec3::new(
            x_ecf * theta.cos() - y_ecf * theta.sin(),
            x_ecf * theta.sin() + y_ecf * theta.cos(),
            z_ecf,
        )
    }

    /// Transform the site-to-object vector into the local SEZ frame and
    /// read off azimuth, elevation, and slant range.
    pub fn look_angle(&self, object_eci: DVec3, t: &Instant) -> LookAngle {
        let r = object_eci - self.eci_position(t);
        let lat = self.location.lat_deg.to_radians();
        let lst = gmst(t) + self.location.lon_deg.to_radians();

        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lst, cos_lst) = lst.sin_cos();

        let south = sin_lat * cos_lst * r.x + sin_lat * sin_lst * r.y - cos_lat * r.z;
        let east = -sin_lst * r.x + cos_lst * r.y;
        let zenith = cos_lat * cos_lst * r.x + cos_lat * sin_lst * r.y + sin_lat * r.z;

        let range_km = (south * south + east * east + zenith * zenith).sqrt();
        let mut az = east.atan2(-south);
        if az < 0.0 {
            az += std::f64::consts::TAU;
        }

        LookAngle {
            az_deg: az.to_degrees(),
            el_deg: (zenith / range_km).asin().to_degrees(),
            range_km,
        }
    }

    /// Line-of-sight range-rate in km/s; positive means receding. The
    /// site's own inertial velocity from Earth rotation is accounted for.
    pub fn range_rate(&self, object_pos: DVec3, object_vel: DVec3, t: &Instant) -> f64 {
        let site = self.eci_position(t);
        let site_vel = DVec3::new(0.0, 0.0, EARTH_OMEGA_RAD_S).cross(site);
        let los = object_pos - site;
        let range = los.length();
        if range <= 0.0 {
            return 0.0;
        }
        (object_vel - site_vel).dot(los / range)
    }
}

/// Geodetic coordinates of an inertial position: rotate west by GMST into
/// the Earth-fixed frame, then invert the ellipsoid by fixed-point
/// iteration. Round-trips with [`Observer::eci_position`] to well under a
/// metre away from the poles.
pub fn geodetic_of_eci(eci: DVec3, t: &Instant) -> Geodetic {
    let theta = gmst(t);
    let x_ecf = eci.x * theta.cos() + eci.y * theta.sin();
    let y_ecf = -eci.x * theta.sin() + eci.y * theta.cos();
    let z_ecf = eci.z;

    let e2 = 2.0 * EARTH_FLATTENING - EARTH_FLATTENING * EARTH_FLATTENING;
    let p = (x_ecf * x_ecf + y_ecf * y_ecf).sqrt();

    let mut lat = z_ecf.atan2(p * (1.0 - e2));
    let mut alt = 0.0;
    for _ in 0..5 {
        let n = EARTH_RADIUS_KM / (1.0 - e2 * lat.sin() * lat.sin()).sqrt();
        alt = if lat.cos().abs() > 1e-12 {
            p / lat.cos() - n
        } else {
            z_ecf.abs() - n * (1.0 - e2)
        };
        lat = z_ecf.atan2(p * (1.0 - e2 * n / (n + alt)));
    }

    Geodetic {
        lat_deg: lat.to_degrees(),
        lon_deg: y_ecf.atan2(x_ecf).to_degrees(),
        alt_km: alt,
    }
}
