//! Astrodynamics: time scales, observer geometry, Sun/Moon ephemerides,
//! illumination classification, and horizon-crossing prediction.
//!
//! Everything here works on inertial (equator-aligned, non-rotating) or
//! Earth-fixed kilometre vectors. SGP4 itself lives behind
//! [`crate::engine::TrackedObject`]; this module supplies the frames and
//! the geometry around it.

mod ephemeris;
mod observer;
mod passes;
mod time;

pub use ephemeris::*;
pub use observer::*;
pub use passes::*;
pub use time::*;

/// WGS-84 equatorial radius (km). Also used as the mean radius for apogee
/// altitude and umbra-cone geometry.
pub const EARTH_RADIUS_KM: f64 = 6378.137;

/// WGS-84 flattening.
pub const EARTH_FLATTENING: f64 = 1.0 / 298.257223563;

/// Earth rotation rate (rad/s), used for the observer's inertial velocity.
pub const EARTH_OMEGA_RAD_S: f64 = 7.2921150e-5;

/// Gravitational parameter of Earth (km^3/s^2).
pub const MU_EARTH_KM3_S2: f64 = 398600.4418;

/// One astronomical unit (km).
pub const AU_KM: f64 = 149_597_870.7;

/// Speed of light (km/s), for Doppler factors.
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Latitude/longitude in degrees, altitude above the reference ellipsoid
/// in kilometres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Geodetic {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_km: f64,
}
