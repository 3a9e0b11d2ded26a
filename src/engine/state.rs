//! Shared tick products: snapshot handoff, reader-side smoothing, and
//! the hot-reload mailbox
//!
//! The orchestrator publishes a whole [`Snapshot`] under one mutex;
//! readers copy it out and let go. A short-lived reader cache papers over
//! single-tick drop-outs so a propagator hiccup doesn't blink a row off
//! the screen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use satkit::Instant;

use crate::astro::{FlareStatus, Illumination};
use crate::data::Config;
use crate::engine::object::{ObjectHandle, MOON_CATALOG_ID, SUN_CATALOG_ID};

/// Everything the renderer and the JSON endpoint need for one object.
#[derive(Debug, Clone)]
pub struct DisplayRow {
    pub name: String,
    pub az_deg: f64,
    pub el_deg: f64,
    pub range_km: f64,
    pub range_rate_kms: f64,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub apogee_km: f64,
    pub state: Illumination,
    pub catalog_id: i32,
    pub next_event: String,
    pub flare: FlareStatus,
}

impl DisplayRow {
    pub fn is_special(&self) -> bool {
        self.catalog_id == SUN_CATALOG_ID || self.catalog_id == MOON_CATALOG_ID
    }
}

/// One published tick: rows plus index-aligned store handles.
#[derive(Clone)]
pub struct Snapshot {
    pub rows: Vec<DisplayRow>,
    pub refs: Vec<ObjectHandle>,
    pub produced_at: Instant,
    pub revision: u64,
}

impl Snapshot {
    fn empty(t: Instant) -> Self {
        Self {
            rows: Vec::new(),
            refs: Vec::new(),
            produced_at: t,
            revision: 0,
        }
    }
}

/// Single-mutex handoff between the producer and all readers.
pub struct SharedState {
    snapshot: Mutex<Snapshot>,
}

impl SharedState {
    pub fn new(t: Instant) -> Self {
        Self {
            snapshot: Mutex::new(Snapshot::empty(t)),
        }
    }

    /// Replace the published snapshot and bump the revision counter.
    pub fn publish(&self, rows: Vec<DisplayRow>, refs: Vec<ObjectHandle>, produced_at: Instant) {
        debug_assert_eq!(rows.len(), refs.len());
        let mut guard = self.snapshot.lock();
        let revision = guard.revision + 1;
        *guard = Snapshot {
            rows,
            refs,
            produced_at,
            revision,
        };
    }

    /// Copy the snapshot out; the lock is held only for the clone.
    pub fn read(&self) -> Snapshot {
        self.snapshot.lock().clone()
    }
}

/// Stable elevation-descending sort, then cap to `max_rows` while always
/// keeping the Sun and Moon rows.
pub fn sort_and_cap(rows: &mut Vec<DisplayRow>, max_rows: usize) {
    rows.sort_by(|a, b| {
        b.el_deg
            .partial_cmp(&a.el_deg)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept = 0usize;
    rows.retain(|row| {
        if row.is_special() {
            return true;
        }
        if kept < max_rows {
            kept += 1;
            true
        } else {
            false
        }
    });
}

/// How long a vanished row keeps rendering before it is evicted.
const ROW_RETENTION_MS: u128 = 2000;

struct CachedRow {
    row: DisplayRow,
    refreshed: std::time::Instant,
}

/// Reader-side union of the latest snapshot with recently-seen rows.
#[derive(Default)]
pub struct RowCache {
    entries: HashMap<i32, CachedRow>,
}

impl RowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh from a snapshot, evict stale entries, and return the
    /// merged row list sorted and capped exactly like the producer does.
    pub fn merge(&mut self, snapshot_rows: &[DisplayRow], max_rows: usize) -> Vec<DisplayRow> {
        let now = std::time::Instant::now();
        for row in snapshot_rows {
            self.entries.insert(
                row.catalog_id,
                CachedRow {
                    row: row.clone(),
                    refreshed: now,
                },
            );
        }
        self.entries
            .retain(|_, e| now.duration_since(e.refreshed).as_millis() <= ROW_RETENTION_MS);

        let mut rows: Vec<DisplayRow> = self.entries.values().map(|e| e.row.clone()).collect();
        sort_and_cap(&mut rows, max_rows);
        rows
    }
}

/// Request/response mailbox for hot reload. The control-plane writer
/// deposits a whole Config; the orchestrator takes it at the top of the
/// next tick.
#[derive(Default)]
pub struct ReloadSlot {
    pending: Mutex<Option<Config>>,
    dirty: AtomicBool,
}

impl ReloadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, config: Config) {
        *self.pending.lock() = Some(config);
        self.dirty.store(true, Ordering::Release);
    }

    /// Drain the pending config, if any. Cheap when clean: one atomic
    /// load, no lock.
    pub fn take(&self) -> Option<Config> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.pending.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i32, el: f64) -> DisplayRow {
        DisplayRow {
            name: format!("OBJ-{id}"),
            az_deg: 0.0,
            el_deg: el,
            range_km: 1000.0,
            range_rate_kms: 0.0,
            lat_deg: 0.0,
            lon_deg: 0.0,
            apogee_km: 500.0,
            state: Illumination::Visible,
            catalog_id: id,
            next_event: String::new(),
            flare: FlareStatus::None,
        }
    }

    fn t0() -> Instant {
        Instant::from_datetime(2024, 6, 21, 0, 0, 0.0).unwrap()
    }

    #[test]
    fn test_revision_is_strictly_monotonic() {
        let shared = SharedState::new(t0());
        let mut last = shared.read().revision;
        for _ in 0..5 {
            shared.publish(vec![], vec![], t0());
            let rev = shared.read().revision;
            assert!(rev > last);
            last = rev;
        }
    }

    #[test]
    fn test_publish_keeps_rows_and_refs_aligned() {
        let shared = SharedState::new(t0());
        let rows = vec![row(100, 10.0), row(200, 5.0)];
        let refs = vec![
            ObjectHandle {
                catalog_id: 100,
                generation: 1,
            },
            ObjectHandle {
                catalog_id: 200,
                generation: 1,
            },
        ];
        shared.publish(rows, refs, t0());
        let snap = shared.read();
        assert_eq!(snap.rows.len(), snap.refs.len());
        for (row, handle) in snap.rows.iter().zip(snap.refs.iter()) {
            assert_eq!(row.catalog_id, handle.catalog_id);
        }
    }

    #[test]
    fn test_sort_and_cap_preserves_specials() {
        let mut rows = vec![
            row(100, 80.0),
            row(SUN_CATALOG_ID, -40.0),
            row(200, 60.0),
            row(300, 40.0),
            row(MOON_CATALOG_ID, -50.0),
        ];
        sort_and_cap(&mut rows, 2);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].catalog_id, 100);
        assert_eq!(rows[1].catalog_id, 200);
        assert!(rows.iter().any(|r| r.catalog_id == SUN_CATALOG_ID));
        assert!(rows.iter().any(|r| r.catalog_id == MOON_CATALOG_ID));
        assert!(!rows.iter().any(|r| r.catalog_id == 300));
    }

    #[test]
    fn test_sort_is_elevation_descending() {
        let mut rows = vec![row(1, 10.0), row(2, 30.0), row(3, 20.0)];
        sort_and_cap(&mut rows, 10);
        let els: Vec<f64> = rows.iter().map(|r| r.el_deg).collect();
        assert_eq!(els, vec![30.0, 20.0, 10.0]);
    }

    #[test]
    fn test_row_cache_masks_single_tick_dropout() {
        let mut cache = RowCache::new();

        // Tick N: object present.
        let merged = cache.merge(&[row(100, 30.0)], 50);
        assert_eq!(merged.len(), 1);

        // Tick N+1: transient drop-out, row still rendered from cache.
        let merged = cache.merge(&[], 50);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].catalog_id, 100);

        // Tick N+2: back again.
        let merged = cache.merge(&[row(100, 31.0)], 50);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].el_deg - 31.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_row_cache_evicts_after_retention() {
        let mut cache = RowCache::new();
        cache.merge(&[row(100, 30.0)], 50);
        std::thread::sleep(std::time::Duration::from_millis(2100));
        let merged = cache.merge(&[], 50);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_reload_slot_is_one_shot() {
        let slot = ReloadSlot::new();
        assert!(slot.take().is_none());
        slot.request(Config::default());
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
    }
}
