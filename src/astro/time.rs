//! Time scales and the decoupled display/physics clocks
//!
//! Numerical work runs on the physics clock; the renderer and the
//! next-event countdowns run on the display clock. Both advance at the
//! real monotonic rate since startup, so when no simulated start time is
//! requested they are the same clock.

use satkit::{Duration, Instant};

use super::SECONDS_PER_DAY;

/// Julian date of an instant (UT1 approximated by UTC).
pub fn julian_date(t: &Instant) -> f64 {
    t.as_jd()
}

/// Greenwich Mean Sidereal Time in radians, IAU 1982 polynomial.
///
/// The 0h term is evaluated at the preceding UT midnight; the current UT
/// fraction contributes at the sidereal-to-solar rate.
pub fn gmst(t: &Instant) -> f64 {
    let jd = julian_date(t);
    let jd_midnight = (jd - 0.5).floor() + 0.5;
    let tc = (jd_midnight - 2_451_545.0) / 36_525.0;
    let gmst_0h_sec =
        24_110.54841 + 8_640_184.812866 * tc + 0.093104 * tc * tc - 6.2e-6 * tc * tc * tc;
    let ut_hours = (jd - jd_midnight) * 24.0;
    let mut gmst_sec = (gmst_0h_sec + ut_hours * 3600.0 * 1.002_737_909_35) % SECONDS_PER_DAY;
    if gmst_sec < 0.0 {
        gmst_sec += SECONDS_PER_DAY;
    }
    gmst_sec * (std::f64::consts::TAU / SECONDS_PER_DAY)
}

/// Current true UTC as a satkit [`Instant`].
pub fn utc_now() -> Instant {
    use chrono::{Datelike, Timelike};
    let now = chrono::Utc::now();
    Instant::from_datetime(
        now.year(),
        now.month() as i32,
        now.day() as i32,
        now.hour() as i32,
        now.minute() as i32,
        now.second() as f64 + f64::from(now.nanosecond()) * 1e-9,
    )
    .unwrap_or_else(|_| Instant::from_datetime(2026, 1, 1, 0, 0, 0.0).unwrap())
}

/// The two startup epochs plus a shared monotonic reference.
///
/// `physics_epoch` is a true UTC instant and feeds every numerical
/// routine. `display_epoch` is the face value the operator asked to see;
/// it is rendered under the label "LOC" and drives countdowns only.
#[derive(Debug, Clone)]
pub struct TrackClock {
    physics_epoch: Instant,
    display_epoch: Instant,
    started: std::time::Instant,
}

impl TrackClock {
    /// Both epochs equal to true UTC now; the clocks coincide.
    pub fn starting_now() -> Self {
        let now = utc_now();
        Self {
            physics_epoch: now,
            display_epoch: now,
            started: std::time::Instant::now(),
        }
    }

    /// Simulated start: both epochs pinned to the requested instant, so the
    /// sky and the displayed wall reading match what was typed.
    pub fn starting_at(simulated: Instant) -> Self {
        Self {
            physics_epoch: simulated,
            display_epoch: simulated,
            started: std::time::Instant::now(),
        }
    }

    pub fn now_physics(&self) -> Instant {
        self.physics_epoch + Duration::from_seconds(self.started.elapsed().as_secs_f64())
    }

    pub fn now_display(&self) -> Instant {
        self.display_epoch + Duration::from_seconds(self.started.elapsed().as_secs_f64())
    }
}

/// "YYYY-MM-DD HH:MM:SS" formatting for headers and logs.
pub fn format_instant(t: &Instant) -> String {
    let (year, month, day, hour, min, sec) = t.as_datetime();
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, month, day, hour, min, sec as u32
    )
}
