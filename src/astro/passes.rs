//! Horizon-crossing prediction: coarse scan plus Newton refinement

use satkit::{Duration, Instant};

use super::Observer;
use crate::engine::TrackedObject;

/// One horizon crossing. `rising` distinguishes AOS from LOS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassEvent {
    pub time: Instant,
    pub rising: bool,
}

const COARSE_STEP_S: f64 = 120.0;
const NEWTON_DELTA_S: f64 = 1.0;
const NEWTON_MAX_STEP_S: f64 = 600.0;
const NEWTON_MAX_ITER: usize = 10;
const NEWTON_TOL_DEG: f64 = 0.01;

/// Finds AOS/LOS instants for one object over a search window.
#[derive(Debug, Clone, Copy)]
pub struct PassPredictor {
    observer: Observer,
}

impl PassPredictor {
    pub fn new(observer: Observer) -> Self {
        Self { observer }
    }

    /// Scan `window_minutes` from `start` in two-minute strides; refine
    /// every sign change of the elevation to better than 0.01 degrees.
    /// Events come back in time order.
    pub fn predict(
        &self,
        object: &TrackedObject,
        start: Instant,
        window_minutes: i64,
    ) -> Vec<PassEvent> {
        let mut events = Vec::new();
        let end = start + Duration::from_seconds(window_minutes as f64 * 60.0);

        let mut t = start;
        let mut prev_el = self.elevation(object, &t);
        while (end - t).as_seconds() > 0.0 {
            let next_t = t + Duration::from_seconds(COARSE_STEP_S);
            let next_el = self.elevation(object, &next_t);

            if let (Some(a), Some(b)) = (prev_el, next_el) {
                if (a < 0.0 && b >= 0.0) || (a >= 0.0 && b < 0.0) {
                    let midpoint = t + Duration::from_seconds(COARSE_STEP_S / 2.0);
                    if let Some(crossing) = self.refine(object, midpoint) {
                        let after = crossing + Duration::from_seconds(NEWTON_DELTA_S);
                        if let Some(el_after) = self.elevation(object, &after) {
                            events.push(PassEvent {
                                time: crossing,
                                rising: el_after > 0.0,
                            });
                        }
                    }
                }
            }

            prev_el = next_el;
            t = next_t;
        }
        events
    }

    /// Newton iteration with a one-second finite-difference slope. Steps
    /// are clamped to ±600 s; unconverged roots are discarded.
    fn refine(&self, object: &TrackedObject, initial_guess: Instant) -> Option<Instant> {
        let mut t = initial_guess;
        for _ in 0..NEWTON_MAX_ITER {
            let el = self.elevation(object, &t)?;
            if el.abs() < NEWTON_TOL_DEG {
                return Some(t);
            }
            let el_plus =
                self.elevation(object, &(t + Duration::from_seconds(NEWTON_DELTA_S)))?;
            let slope = el_plus - el;
            if slope.abs() < 1e-5 {
                return None;
            }
            let delta_s = (el / slope).clamp(-NEWTON_MAX_STEP_S, NEWTON_MAX_STEP_S);
            t = t - Duration::from_seconds(delta_s);
        }
        None
    }

    fn elevation(&self, object: &TrackedObject, t: &Instant) -> Option<f64> {
        let (pos, _) = object.propagate(t).ok()?;
        Some(self.observer.look_angle(pos, t).el_deg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::object::test_support::{ISS_LINE1, ISS_LINE2, ISS_NAME};

    #[test]
    fn test_leo_day_of_passes() {
        let object = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        let observer = Observer::new(39.5478, -76.0916, 0.1);
        let predictor = PassPredictor::new(observer);

        let events = predictor.predict(&object, object.epoch(), 1440);

        assert!(
            (10..=16).contains(&events.len()),
            "expected 10..=16 horizon crossings, got {}",
            events.len()
        );

        for pair in events.windows(2) {
            assert!(
                (pair[1].time - pair[0].time).as_seconds() > 0.0,
                "events must be strictly ordered"
            );
            assert_ne!(
                pair[0].rising, pair[1].rising,
                "crossings must alternate rising/falling"
            );
        }

        // Every refined root sits on the horizon.
        for event in &events {
            let (pos, _) = object.propagate(&event.time).unwrap();
            let el = observer.look_angle(pos, &event.time).el_deg;
            assert!(el.abs() < 0.02, "root off horizon by {el} deg");
        }
    }

    #[test]
    fn test_empty_window_yields_nothing() {
        let object = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        let predictor = PassPredictor::new(Observer::new(39.5478, -76.0916, 0.1));
        assert!(predictor.predict(&object, object.epoch(), 0).is_empty());
    }
}
