//! The per-tick producer: propagate, classify, filter, rank, publish
//!
//! One dedicated thread runs this loop at ~1 Hz. Readers only ever see
//! whole snapshots; background work goes through the worker pool; the
//! effectors are owned here so no other thread touches their sockets.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use satkit::Instant;

use crate::astro::{
    self, geodetic_of_eci, FlareStatus, Illumination, Observer, PassPredictor, TrackClock,
};
use crate::data::{Config, ElementStore, TransmitterDb, VisibilityMode};
use crate::effectors::{doppler_pair, RadioLink, RadioMode, RotatorLink};
use crate::engine::object::{ObjectHandle, ObjectStore, TrackedObject, SUN_CATALOG_ID};
use crate::engine::pool::WorkerPool;
use crate::engine::state::{sort_and_cap, DisplayRow, ReloadSlot, SharedState};

/// How far ahead the background pass search looks.
pub const PASS_WINDOW_MINUTES: i64 = 1440;
/// Ground-track sample spacing.
pub const GROUND_TRACK_STEP_S: i64 = 60;
/// Sentinel for "no effector target selected".
pub const NO_SELECTION: i32 = 0;

const TICK_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);
const PACE_SLICE: std::time::Duration = std::time::Duration::from_millis(50);

pub struct Orchestrator {
    clock: Arc<TrackClock>,
    store: Arc<RwLock<ObjectStore>>,
    config: Arc<RwLock<Config>>,
    shared: Arc<SharedState>,
    reload: Arc<ReloadSlot>,
    selected: Arc<AtomicI32>,
    transmitters: Arc<TransmitterDb>,
    elements: ElementStore,
    running: Arc<AtomicBool>,
    observer: Observer,
    pool: WorkerPool,
    rotator: Option<RotatorLink>,
    radio: Option<RadioLink>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<TrackClock>,
        store: Arc<RwLock<ObjectStore>>,
        config: Arc<RwLock<Config>>,
        shared: Arc<SharedState>,
        reload: Arc<ReloadSlot>,
        selected: Arc<AtomicI32>,
        transmitters: Arc<TransmitterDb>,
        elements: ElementStore,
        running: Arc<AtomicBool>,
        workers: usize,
    ) -> Self {
        let cfg = config.read().clone();
        let observer = Observer::new(cfg.observer_lat, cfg.observer_lon, cfg.observer_alt_km);
        let site = observer.location();
        log::info!(
            "observer at {:.4}, {:.4}, {:.3} km",
            site.lat_deg,
            site.lon_deg,
            site.alt_km
        );
        let rotator = cfg
            .rotator_enabled
            .then(|| RotatorLink::new(&cfg.rotator_endpoint));
        let radio = cfg.radio_enabled.then(|| RadioLink::new(&cfg.radio_endpoint));

        Self {
            clock,
            store,
            config,
            shared,
            reload,
            selected,
            transmitters,
            elements,
            running,
            observer,
            pool: WorkerPool::new(workers),
            rotator,
            radio,
        }
    }

    pub fn run(mut self) {
        log::info!("tick loop starting");
        while self.running.load(Ordering::Relaxed) {
            let tick_started = std::time::Instant::now();
            self.tick();
            self.pace(tick_started);
        }
        log::info!("tick loop stopped");
    }

    fn tick(&mut self) {
        if let Some(pending) = self.reload.take() {
            self.apply_reload(pending);
        }

        let t = self.clock.now_physics();
        let config = self.config.read().clone();
        let obs_eci = self.observer.eci_position(&t);
        let selected = self.selected.load(Ordering::Relaxed);

        // Grab the object list and let go of the store; the tick computes
        // on its own copy of the Arcs while readers stay unblocked.
        let (objects, generation) = {
            let store = self.store.read();
            (
                store.iter().cloned().collect::<Vec<_>>(),
                store.generation(),
            )
        };

        let mut rows: Vec<DisplayRow> = Vec::with_capacity(objects.len() + 2);

        // Special bodies first: they skip every user filter.
        for obj in objects.iter().filter(|o| o.is_special()) {
            let Ok((pos, vel)) = obj.propagate(&t) else {
                continue;
            };
            let look = self.observer.look_angle(pos, &t);
            let state = if obj.catalog_id() == SUN_CATALOG_ID {
                if look.el_deg > 0.0 {
                    Illumination::Visible
                } else {
                    Illumination::Daylight
                }
            } else {
                astro::illumination(pos, obs_eci, &t)
            };
            self.schedule_background(obj, t, config.trail_half_minutes);
            let geo = astro::ground_point(pos, &t);
            rows.push(DisplayRow {
                name: obj.name().to_string(),
                az_deg: look.az_deg,
                el_deg: look.el_deg,
                range_km: look.range_km,
                range_rate_kms: self.observer.range_rate(pos, vel, &t),
                lat_deg: geo.lat_deg,
                lon_deg: geo.lon_deg,
                apogee_km: obj.apogee_km(),
                state,
                catalog_id: obj.catalog_id(),
                next_event: next_event_label(obj, &t),
                flare: FlareStatus::None,
            });
        }

        for obj in objects.iter().filter(|o| !o.is_special()) {
            if obj.is_decayed() {
                continue;
            }
            // A transient numerical miss drops the row for this tick only.
            let Ok((pos, vel)) = obj.propagate(&t) else {
                continue;
            };
            let look = self.observer.look_angle(pos, &t);
            let range_rate = self.observer.range_rate(pos, vel, &t);
            let is_target = obj.catalog_id() == selected;

            if is_target
                && config.rotator_enabled
                && look.el_deg >= config.rotator_min_elevation_deg
            {
                if let Some(rotator) = self.rotator.as_mut() {
                    rotator.ensure_connected();
                    rotator.command(look.az_deg, look.el_deg);
                }
            }

            let state = astro::illumination(pos, obs_eci, &t);

            if config.max_apogee_km >= 0.0 && obj.apogee_km() > config.max_apogee_km {
                continue;
            }
            if look.el_deg < config.min_elevation_deg {
                continue;
            }
            if config.visibility_mode == VisibilityMode::Optical && state != Illumination::Visible
            {
                continue;
            }

            let flare = if state == Illumination::Visible {
                astro::flare(pos, obs_eci, astro::sun_eci(&t), obj.apogee_km())
            } else {
                FlareStatus::None
            };

            self.schedule_background(obj, t, config.trail_half_minutes);
            let next_event = next_event_label(obj, &t);

            if is_target && config.radio_enabled {
                if let Some(tx) = self.transmitters.best_for(obj.catalog_id()) {
                    let (uplink, downlink) =
                        doppler_pair(tx.uplink_hz, tx.downlink_hz, range_rate);
                    if let Some(radio) = self.radio.as_mut() {
                        radio.ensure_connected();
                        radio.set_freqs(uplink, downlink);
                        radio.set_mode(RadioMode::from_symbol(&tx.mode));
                    }
                }
            }

            let geo = geodetic_of_eci(pos, &t);
            rows.push(DisplayRow {
                name: obj.name().to_string(),
                az_deg: look.az_deg,
                el_deg: look.el_deg,
                range_km: look.range_km,
                range_rate_kms: range_rate,
                lat_deg: geo.lat_deg,
                lon_deg: geo.lon_deg,
                apogee_km: obj.apogee_km(),
                state,
                catalog_id: obj.catalog_id(),
                next_event,
                flare,
            });
        }

        sort_and_cap(&mut rows, config.effective_cap());

        let refs: Vec<ObjectHandle> = rows
            .iter()
            .map(|row| ObjectHandle {
                catalog_id: row.catalog_id,
                generation,
            })
            .collect();

        self.shared.publish(rows, refs, t);
    }

    /// Swap in a validated pending configuration: rebuild the object
    /// store when the selection changed, the observer when the site
    /// moved, and the effector links when their settings changed.
    fn apply_reload(&mut self, pending: Config) {
        if let Err(e) = pending.validate() {
            log::warn!("hot reload rejected, keeping current config: {e}");
            return;
        }
        let current = self.config.read().clone();

        let selection_changed = pending.selection_mode != current.selection_mode
            || pending.group_list != current.group_list
            || pending.explicit_names != current.explicit_names;
        if selection_changed {
            log::info!("selection changed to {:?}", pending.selection_csv());
            let reference = self.clock.now_physics();
            let mut objects = self.elements.load_selection(&pending);
            objects.push(TrackedObject::sun(reference));
            objects.push(TrackedObject::moon(reference));
            let mut store = self.store.write();
            store.rebuild(objects);
            let selected = self.selected.load(Ordering::Relaxed);
            if selected != NO_SELECTION && store.get(selected).is_none() {
                self.selected.store(NO_SELECTION, Ordering::Relaxed);
            }
        }

        let observer_changed = pending.observer_lat != current.observer_lat
            || pending.observer_lon != current.observer_lon
            || pending.observer_alt_km != current.observer_alt_km;
        if observer_changed {
            log::info!(
                "observer moved to ({:.4}, {:.4}, {:.3} km)",
                pending.observer_lat,
                pending.observer_lon,
                pending.observer_alt_km
            );
            self.observer = Observer::new(
                pending.observer_lat,
                pending.observer_lon,
                pending.observer_alt_km,
            );
            // Cached passes and tracks were computed for the old site.
            for obj in self.store.read().iter() {
                obj.clear_passes();
            }
        }

        let rotator_changed = pending.rotator_enabled != current.rotator_enabled
            || pending.rotator_endpoint != current.rotator_endpoint;
        if rotator_changed {
            self.rotator = pending
                .rotator_enabled
                .then(|| RotatorLink::new(&pending.rotator_endpoint));
            if let Some(rotator) = &self.rotator {
                log::info!(
                    "rotator link {}",
                    if rotator.connected() { "up" } else { "down" }
                );
            }
        }
        let radio_changed = pending.radio_enabled != current.radio_enabled
            || pending.radio_endpoint != current.radio_endpoint;
        if radio_changed {
            self.radio = pending
                .radio_enabled
                .then(|| RadioLink::new(&pending.radio_endpoint));
            if let Some(radio) = &self.radio {
                log::info!(
                    "radio link {}",
                    if radio.connected() { "up" } else { "down" }
                );
            }
        }

        *self.config.write() = pending;
        log::info!("hot reload applied");
    }

    /// Background pass/track fill for one object, admitted by its claim
    /// bit so at most one job per object is ever in flight.
    fn schedule_background(&self, obj: &Arc<TrackedObject>, t: Instant, trail_half_minutes: i64) {
        if obj.caches_warm() {
            return;
        }
        if !obj.try_claim() {
            return;
        }
        let obj = obj.clone();
        let predictor = PassPredictor::new(self.observer);
        self.pool.submit(move || {
            let passes = predictor.predict(&obj, t, PASS_WINDOW_MINUTES);
            obj.set_passes(passes);
            obj.ensure_ground_track(&t, trail_half_minutes, GROUND_TRACK_STEP_S);
            obj.release_claim();
        });
    }

    /// Sleep to the next 1 Hz edge in short slices that watch the
    /// shutdown flag.
    fn pace(&self, tick_started: std::time::Instant) {
        while self.running.load(Ordering::Relaxed) {
            let elapsed = tick_started.elapsed();
            if elapsed >= TICK_PERIOD {
                break;
            }
            std::thread::sleep((TICK_PERIOD - elapsed).min(PACE_SLICE));
        }
    }
}

/// Countdown text for the first future horizon crossing. A stale head
/// entry clears the cache so the predictor gets re-run.
fn next_event_label(obj: &TrackedObject, t: &Instant) -> String {
    let passes = obj.passes();
    match passes.first() {
        Some(event) => {
            let diff = (event.time - *t).as_seconds();
            if diff < 0.0 {
                obj.clear_passes();
                return "Calculating...".to_string();
            }
            let total = diff as i64;
            format!(
                "{} {}m {}s",
                if event.rising { "AOS" } else { "LOS" },
                total / 60,
                total % 60
            )
        }
        None => "Calculating...".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astro::PassEvent;
    use crate::engine::object::test_support::{
        iss_with_mean_motion, ISS_LINE1, ISS_LINE2, ISS_NAME,
    };
    use crate::engine::object::MOON_CATALOG_ID;
    use satkit::Duration;

    fn test_config() -> Config {
        Config {
            observer_lat: 39.5478,
            observer_lon: -76.0916,
            observer_alt_km: 0.1,
            min_elevation_deg: -90.0,
            visibility_mode: VisibilityMode::Radio,
            ..Config::default()
        }
    }

    fn build(config: Config) -> (Orchestrator, Arc<SharedState>, Arc<ReloadSlot>) {
        let iss = TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap();
        let epoch = iss.epoch();
        let (l1, l2) = iss_with_mean_motion("16.75000000");
        let decayed = TrackedObject::from_elements("REENTRY", &l1, &l2).unwrap();

        let objects = vec![
            iss,
            decayed,
            TrackedObject::sun(epoch),
            TrackedObject::moon(epoch),
        ];
        let clock = Arc::new(TrackClock::starting_at(epoch));
        let store = Arc::new(RwLock::new(ObjectStore::new(objects)));
        let shared = Arc::new(SharedState::new(epoch));
        let reload = Arc::new(ReloadSlot::new());
        let elements =
            ElementStore::new(std::env::temp_dir().join("skytrack-test-orch")).unwrap();

        let orch = Orchestrator::new(
            clock,
            store,
            Arc::new(RwLock::new(config)),
            shared.clone(),
            reload.clone(),
            Arc::new(AtomicI32::new(NO_SELECTION)),
            Arc::new(TransmitterDb::empty()),
            elements,
            Arc::new(AtomicBool::new(true)),
            2,
        );
        (orch, shared, reload)
    }

    #[test]
    fn test_tick_publishes_aligned_snapshot() {
        let (mut orch, shared, _) = build(test_config());
        orch.tick();
        let snap = shared.read();

        assert_eq!(snap.revision, 1);
        assert_eq!(snap.rows.len(), snap.refs.len());
        for (row, handle) in snap.rows.iter().zip(snap.refs.iter()) {
            assert_eq!(row.catalog_id, handle.catalog_id);
        }

        let ids: Vec<i32> = snap.rows.iter().map(|r| r.catalog_id).collect();
        assert!(ids.contains(&SUN_CATALOG_ID));
        assert!(ids.contains(&MOON_CATALOG_ID));
        assert!(ids.contains(&25544), "radio mode shows the whole sky");

        orch.tick();
        assert_eq!(shared.read().revision, 2);
    }

    #[test]
    fn test_decayed_objects_never_publish() {
        let (mut orch, shared, _) = build(test_config());
        for _ in 0..3 {
            orch.tick();
        }
        let snap = shared.read();
        assert!(snap.rows.iter().all(|r| r.name != "REENTRY"));
    }

    #[test]
    fn test_optical_mode_only_publishes_visible() {
        let mut config = test_config();
        config.visibility_mode = VisibilityMode::Optical;
        let (mut orch, shared, _) = build(config);
        orch.tick();
        let snap = shared.read();
        for row in snap.rows.iter().filter(|r| !r.is_special()) {
            assert_eq!(row.state, Illumination::Visible);
        }
    }

    #[test]
    fn test_cap_keeps_specials() {
        let mut config = test_config();
        config.max_objects = 1;
        let (mut orch, shared, _) = build(config);
        orch.tick();
        let snap = shared.read();
        let ids: Vec<i32> = snap.rows.iter().map(|r| r.catalog_id).collect();
        assert!(ids.contains(&SUN_CATALOG_ID));
        assert!(ids.contains(&MOON_CATALOG_ID));
        assert!(snap.rows.iter().filter(|r| !r.is_special()).count() <= 1);
    }

    #[test]
    fn test_flare_rows_satisfy_preconditions() {
        let (mut orch, shared, _) = build(test_config());
        orch.tick();
        for row in shared.read().rows.iter() {
            if row.flare != FlareStatus::None {
                assert!(row.apogee_km <= 1000.0);
            }
        }
    }

    #[test]
    fn test_hot_reload_moves_observer_next_tick() {
        let (mut orch, shared, reload) = build(test_config());
        orch.tick();
        let revision_before = shared.read().revision;

        let mut moved = test_config();
        moved.observer_lat = -39.5478;
        reload.request(moved.clone());
        orch.tick();

        // The gate runs at the top of the tick, so the snapshot published
        // by that same tick already comes from the relocated site.
        assert_eq!(orch.config.read().observer_lat, moved.observer_lat);
        assert_eq!(orch.observer.location().lat_deg, moved.observer_lat);
        let after = shared.read();
        assert_eq!(after.revision, revision_before + 1);
        assert!(!after.rows.is_empty());
    }

    #[test]
    fn test_invalid_reload_is_rejected() {
        let (mut orch, _, reload) = build(test_config());
        orch.tick();
        let mut bad = test_config();
        bad.observer_lat = 500.0;
        reload.request(bad);
        orch.tick();
        assert_eq!(orch.config.read().observer_lat, 39.5478);
    }

    #[test]
    fn test_stale_pass_head_becomes_calculating_once() {
        let (orch, _, _) = build(test_config());
        let store = orch.store.read();
        let iss = store.get(25544).unwrap();
        let t = orch.clock.now_physics();

        // Claim the object so no background job overwrites our fixture.
        assert!(iss.try_claim());
        iss.set_passes(vec![PassEvent {
            time: t - Duration::from_seconds(30.0),
            rising: true,
        }]);

        assert_eq!(next_event_label(iss, &t), "Calculating...");
        assert!(iss.passes().is_empty(), "stale cache is cleared");

        iss.set_passes(vec![PassEvent {
            time: t + Duration::from_seconds(125.5),
            rising: true,
        }]);
        assert_eq!(next_event_label(iss, &t), "AOS 2m 5s");

        iss.set_passes(vec![PassEvent {
            time: t + Duration::from_seconds(59.5),
            rising: false,
        }]);
        assert_eq!(next_event_label(iss, &t), "LOS 0m 59s");
    }
}
