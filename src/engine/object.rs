//! Tracked objects and the generational object store
//!
//! A [`TrackedObject`] owns its element set (or, for the Sun and Moon, an
//! ephemeris body) plus the two background-computed caches. Snapshots
//! never hold references into the store; they carry `(catalog id,
//! generation)` handles that readers resolve against the live store, so a
//! hot reload can swap the whole store without ordering gymnastics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::DVec3;
use parking_lot::Mutex;
use satkit::{sgp4::sgp4, Duration, Instant, TLE};

use crate::astro::{
    self, geodetic_of_eci, Geodetic, PassEvent, EARTH_RADIUS_KM, MU_EARTH_KM3_S2,
    SECONDS_PER_DAY,
};
use crate::errors::{Result, TrackError};

/// Reserved catalog number for the Sun.
pub const SUN_CATALOG_ID: i32 = -1;
/// Reserved catalog number for the Moon.
pub const MOON_CATALOG_ID: i32 = -2;

/// Objects whose apogee has sunk below this altitude are treated as
/// decayed and excluded from every output.
pub const DECAY_APOGEE_KM: f64 = 80.0;

enum Body {
    Elements(TLE),
    Sun,
    Moon,
}

#[derive(Default)]
struct Caches {
    ground_track: Vec<Geodetic>,
    passes: Vec<PassEvent>,
}

/// One tracked object: identity, propagator, and background caches.
pub struct TrackedObject {
    name: String,
    catalog_id: i32,
    epoch: Instant,
    apogee_km: f64,
    body: Body,
    caches: Mutex<Caches>,
    /// Claim bit: at most one background job computes for this object.
    computing: AtomicBool,
}

impl TrackedObject {
    /// Build from the two 69-character catalog lines. Fails with
    /// `ElementParse` when the propagator rejects the lines, the epoch
    /// predates the space age, or the mean elements are unusable.
    pub fn from_elements(name: &str, line1: &str, line2: &str) -> Result<Self> {
        let reject = |reason: String| TrackError::ElementParse {
            name: name.to_string(),
            reason,
        };

        let tle = TLE::load_2line(line1, line2).map_err(|e| reject(e.to_string()))?;

        let (epoch_year, ..) = tle.epoch.as_datetime();
        if epoch_year < 1957 {
            return Err(reject(format!("epoch year {epoch_year} predates 1957")));
        }

        let apogee_km = apogee_from_elements(&tle)
            .ok_or_else(|| reject("unusable mean motion or eccentricity".to_string()))?;

        Ok(Self {
            name: name.trim().to_string(),
            catalog_id: tle.sat_num,
            epoch: tle.epoch,
            apogee_km,
            body: Body::Elements(tle),
            caches: Mutex::new(Caches::default()),
            computing: AtomicBool::new(false),
        })
    }

    /// The Sun as a tracked object (catalog −1, module-D ephemeris).
    pub fn sun(reference: Instant) -> Self {
        Self::special("Sun", SUN_CATALOG_ID, Body::Sun, reference)
    }

    /// The Moon as a tracked object (catalog −2).
    pub fn moon(reference: Instant) -> Self {
        Self::special("Moon", MOON_CATALOG_ID, Body::Moon, reference)
    }

    fn special(name: &str, catalog_id: i32, body: Body, reference: Instant) -> Self {
        Self {
            name: name.to_string(),
            catalog_id,
            epoch: reference,
            apogee_km: 0.0,
            body,
            caches: Mutex::new(Caches::default()),
            computing: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog_id(&self) -> i32 {
        self.catalog_id
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    pub fn apogee_km(&self) -> f64 {
        self.apogee_km
    }

    pub fn is_special(&self) -> bool {
        !matches!(self.body, Body::Elements(_))
    }

    /// Element-set objects with apogee under the reentry floor are dead
    /// weight; the ephemeris bodies are exempt.
    pub fn is_decayed(&self) -> bool {
        matches!(self.body, Body::Elements(_)) && self.apogee_km < DECAY_APOGEE_KM
    }

    /// Inertial position and velocity (km, km/s) at `t`. A numerical
    /// failure is a transient miss, not a hard error.
    pub fn propagate(&self, t: &Instant) -> Result<(DVec3, DVec3)> {
        match &self.body {
            Body::Elements(tle) => {
                let mut tle = tle.clone();
                match sgp4(&mut tle, &[*t]) {
                    Ok(result) => {
                        let pos = result.pos.column(0);
                        let vel = result.vel.column(0);
                        let pos_km = DVec3::new(pos[0], pos[1], pos[2]) / 1000.0;
                        let vel_kms = DVec3::new(vel[0], vel[1], vel[2]) / 1000.0;
                        if !pos_km.is_finite()
                            || !vel_kms.is_finite()
                            || pos_km.length() < EARTH_RADIUS_KM * 0.5
                        {
                            return Err(TrackError::PropagateTransient);
                        }
                        Ok((pos_km, vel_kms))
                    }
                    Err(_) => Err(TrackError::PropagateTransient),
                }
            }
            Body::Sun => Ok((astro::sun_eci(t), DVec3::ZERO)),
            Body::Moon => Ok((astro::moon_eci(t), DVec3::ZERO)),
        }
    }

    /// Sub-point on the ground at `t`.
    pub fn sub_satellite(&self, t: &Instant) -> Result<Geodetic> {
        let (pos, _) = self.propagate(t)?;
        Ok(match self.body {
            Body::Elements(_) => geodetic_of_eci(pos, t),
            // Distant bodies only need the spherical sub-point.
            Body::Sun | Body::Moon => astro::ground_point(pos, t),
        })
    }

    /// Populate the ground-track cache: fixed-step samples over a
    /// symmetric window around `reference`, with propagator-failure
    /// artifacts (near-zero latitude and altitude) filtered out.
    pub fn ensure_ground_track(&self, reference: &Instant, half_width_min: i64, step_s: i64) {
        let step_s = step_s.max(1);
        let steps = (half_width_min * 2 * 60) / step_s;
        let start = *reference - Duration::from_seconds((half_width_min * 60) as f64);

        let mut samples = Vec::with_capacity(steps as usize + 1);
        for i in 0..=steps {
            let t = start + Duration::from_seconds((i * step_s) as f64);
            if let Ok(geo) = self.sub_satellite(&t) {
                if geo.lat_deg.abs() < 0.001 && geo.alt_km.abs() < 0.001 {
                    continue;
                }
                samples.push(geo);
            }
        }
        self.caches.lock().ground_track = samples;
    }

    pub fn ground_track(&self) -> Vec<Geodetic> {
        self.caches.lock().ground_track.clone()
    }

    pub fn set_passes(&self, passes: Vec<PassEvent>) {
        self.caches.lock().passes = passes;
    }

    pub fn passes(&self) -> Vec<PassEvent> {
        self.caches.lock().passes.clone()
    }

    pub fn clear_passes(&self) {
        self.caches.lock().passes.clear();
    }

    /// Both background caches populated; nothing to schedule.
    pub fn caches_warm(&self) -> bool {
        let caches = self.caches.lock();
        !caches.passes.is_empty() && !caches.ground_track.is_empty()
    }

    /// Claim this object for a background job. Returns false when some
    /// other job already holds it.
    pub fn try_claim(&self) -> bool {
        self.computing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_claim(&self) {
        self.computing.store(false, Ordering::Release);
    }
}

/// Apogee altitude (km) from mean motion and eccentricity.
fn apogee_from_elements(tle: &TLE) -> Option<f64> {
    if !tle.mean_motion.is_finite() || !tle.eccen.is_finite() {
        return None;
    }
    if tle.mean_motion <= 0.0 || !(0.0..1.0).contains(&tle.eccen) {
        return None;
    }
    let n_rad_s = tle.mean_motion * std::f64::consts::TAU / SECONDS_PER_DAY;
    let a_km = (MU_EARTH_KM3_S2 / (n_rad_s * n_rad_s)).cbrt();
    if !a_km.is_finite() {
        return None;
    }
    Some(a_km * (1.0 + tle.eccen) - EARTH_RADIUS_KM)
}

/// Handle a snapshot carries instead of a reference: resolvable only
/// while the store generation that minted it is still live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHandle {
    pub catalog_id: i32,
    pub generation: u64,
}

/// Owned store of tracked objects in insertion order, deduplicated by
/// catalog number. Replacing the contents bumps the generation, which
/// invalidates every outstanding handle at once.
pub struct ObjectStore {
    generation: u64,
    order: Vec<Arc<TrackedObject>>,
    by_id: HashMap<i32, usize>,
}

impl ObjectStore {
    pub fn new(objects: Vec<TrackedObject>) -> Self {
        let mut store = Self {
            generation: 0,
            order: Vec::new(),
            by_id: HashMap::new(),
        };
        store.rebuild(objects);
        store
    }

    /// Replace the contents and invalidate all outstanding handles.
    pub fn rebuild(&mut self, objects: Vec<TrackedObject>) {
        self.generation += 1;
        self.order.clear();
        self.by_id.clear();
        for obj in objects {
            if self.by_id.contains_key(&obj.catalog_id()) {
                log::debug!(
                    "duplicate catalog id {} ({}) dropped",
                    obj.catalog_id(),
                    obj.name()
                );
                continue;
            }
            self.by_id.insert(obj.catalog_id(), self.order.len());
            self.order.push(Arc::new(obj));
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Objects in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<TrackedObject>> {
        self.order.iter()
    }

    pub fn get(&self, catalog_id: i32) -> Option<&Arc<TrackedObject>> {
        self.by_id.get(&catalog_id).map(|&i| &self.order[i])
    }

    /// Resolve a handle; stale generations resolve to nothing.
    pub fn resolve(&self, handle: &ObjectHandle) -> Option<Arc<TrackedObject>> {
        if handle.generation != self.generation {
            return None;
        }
        self.get(handle.catalog_id).cloned()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Canonical ISS element set (valid checksums).
    pub const ISS_NAME: &str = "ISS (ZARYA)";
    pub const ISS_LINE1: &str =
        "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    pub const ISS_LINE2: &str =
        "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    fn checksum(line: &str) -> char {
        let sum: u32 = line
            .chars()
            .take(68)
            .map(|c| match c {
                '-' => 1,
                c if c.is_ascii_digit() => c.to_digit(10).unwrap_or(0),
                _ => 0,
            })
            .sum();
        char::from_digit(sum % 10, 10).unwrap()
    }

    /// The ISS line pair with a substituted mean-motion field and a
    /// recomputed checksum, for exercising the decay threshold.
    pub fn iss_with_mean_motion(mean_motion: &str) -> (String, String) {
        assert_eq!(mean_motion.len(), 11);
        let mut line2 = ISS_LINE2.to_string();
        line2.replace_range(52..63, mean_motion);
        let ck = checksum(&line2).to_string();
        line2.replace_range(68..69, &ck);
        (ISS_LINE1.to_string(), line2)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_element_construction_and_apogee() {
        let obj = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        assert_eq!(obj.catalog_id(), 25544);
        assert_eq!(obj.name(), "ISS (ZARYA)");
        let (year, ..) = obj.epoch().as_datetime();
        assert_eq!(year, 2008);
        assert!(
            (300.0..400.0).contains(&obj.apogee_km()),
            "apogee {}",
            obj.apogee_km()
        );
        assert!(!obj.is_decayed());
    }

    #[test]
    fn test_malformed_elements_are_rejected() {
        let err = TrackedObject::from_elements("JUNK", "1 garbage", "2 garbage");
        assert!(matches!(err, Err(TrackError::ElementParse { .. })));
    }

    #[test]
    fn test_decay_threshold() {
        let (l1, l2) = iss_with_mean_motion("16.75000000");
        let obj = TrackedObject::from_elements("REENTRY", &l1, &l2).unwrap();
        assert!(obj.apogee_km() < DECAY_APOGEE_KM, "apogee {}", obj.apogee_km());
        assert!(obj.is_decayed());
    }

    #[test]
    fn test_specials_are_exempt_from_decay() {
        let now = Instant::from_datetime(2024, 6, 21, 0, 0, 0.0).unwrap();
        assert!(!TrackedObject::sun(now).is_decayed());
        assert!(!TrackedObject::moon(now).is_decayed());
    }

    #[test]
    fn test_propagation_near_epoch() {
        let obj = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        let (pos, vel) = obj.propagate(&obj.epoch()).unwrap();
        let r = pos.length();
        assert!((6650.0..6850.0).contains(&r), "radius {r}");
        let v = vel.length();
        assert!((7.0..8.2).contains(&v), "speed {v}");
    }

    #[test]
    fn test_ground_track_is_populated_and_bounded() {
        let obj = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        let epoch = obj.epoch();
        obj.ensure_ground_track(&epoch, 5, 60);
        let track = obj.ground_track();
        assert!(!track.is_empty());
        assert!(track.len() <= 11);
        for geo in &track {
            assert!(geo.lat_deg.abs() <= 52.0, "inclination bound, got {}", geo.lat_deg);
        }
    }

    #[test]
    fn test_claim_bit_is_exclusive() {
        let obj = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        assert!(obj.try_claim());
        assert!(!obj.try_claim());
        obj.release_claim();
        assert!(obj.try_claim());
    }

    #[test]
    fn test_store_dedup_and_generations() {
        let a = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        let b = TrackedObject::from_elements("ISS COPY", ISS_LINE1, ISS_LINE2).unwrap();
        let mut store = ObjectStore::new(vec![a, b]);
        assert_eq!(store.len(), 1);

        let handle = ObjectHandle {
            catalog_id: 25544,
            generation: store.generation(),
        };
        assert!(store.resolve(&handle).is_some());

        let c = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        store.rebuild(vec![c]);
        assert!(store.resolve(&handle).is_none(), "stale generation");
        let fresh = ObjectHandle {
            catalog_id: 25544,
            generation: store.generation(),
        };
        assert!(store.resolve(&fresh).is_some());
    }
}
