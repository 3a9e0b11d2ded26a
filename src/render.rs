//! Terminal frame renderer (the consumer side of the snapshot handoff)
//!
//! Reads the published snapshot, merges it with the short-retention row
//! cache so single-tick drop-outs don't flicker, and paints a plain-text
//! frame to stdout. The exact frame text is also kept for the
//! terminal-mirror HTTP page.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::astro::{format_instant, FlareStatus, Illumination, TrackClock};
use crate::data::{Config, VisibilityMode};
use crate::engine::{ObjectStore, RowCache, SharedState};

const FRAME_PERIOD: std::time::Duration = std::time::Duration::from_millis(500);

pub struct FrameRenderer {
    clock: Arc<TrackClock>,
    store: Arc<RwLock<ObjectStore>>,
    config: Arc<RwLock<Config>>,
    shared: Arc<SharedState>,
    selected: Arc<AtomicI32>,
    last_frame: Arc<Mutex<String>>,
    running: Arc<AtomicBool>,
    data_port: u16,
    cache: RowCache,
}

impl FrameRenderer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<TrackClock>,
        store: Arc<RwLock<ObjectStore>>,
        config: Arc<RwLock<Config>>,
        shared: Arc<SharedState>,
        selected: Arc<AtomicI32>,
        last_frame: Arc<Mutex<String>>,
        running: Arc<AtomicBool>,
        data_port: u16,
    ) -> Self {
        Self {
            clock,
            store,
            config,
            shared,
            selected,
            last_frame,
            running,
            data_port,
            cache: RowCache::new(),
        }
    }

    pub fn run(mut self) {
        while self.running.load(Ordering::Relaxed) {
            let frame = self.build_frame();
            *self.last_frame.lock() = frame.clone();
            // Home the cursor and repaint; stderr keeps the log lines.
            print!("\x1b[2J\x1b[H{frame}");
            use std::io::Write;
            let _ = std::io::stdout().flush();
            std::thread::sleep(FRAME_PERIOD);
        }
    }

    fn build_frame(&mut self) -> String {
        let snapshot = self.shared.read();
        let config = self.config.read().clone();
        let rows = self.cache.merge(&snapshot.rows, config.effective_cap());
        let tracked = self.store.read().len();
        let selected = self.selected.load(Ordering::Relaxed);

        let mode = match config.visibility_mode {
            VisibilityMode::Optical => "optical",
            VisibilityMode::Radio => "radio",
        };

        let mut out = String::with_capacity(4096);
        let _ = writeln!(
            out,
            "SKYTRACK  |  http://0.0.0.0:{}  |  {} LOC",
            self.data_port,
            format_instant(&self.clock.now_display()),
        );
        let _ = writeln!(
            out,
            "Observer {:.4}, {:.4}  |  tracked {}  |  shown {}  |  mode {}  |  tick {} @ {} UTC",
            config.observer_lat,
            config.observer_lon,
            tracked,
            rows.len(),
            mode,
            snapshot.revision,
            format_instant(&snapshot.produced_at),
        );
        let _ = writeln!(out, "{}", "-".repeat(96));
        let _ = writeln!(
            out,
            "{:<18} {:>7} {:>7} {:>9} {:>7} {:>7} {:>8} {:>8}  {:<3} {:<4} {}",
            "NAME", "AZ", "EL", "RANGE", "RATE", "LAT", "LON", "APO", "VIS", "FLR", "NEXT EVENT"
        );

        for row in &rows {
            let vis = match row.state {
                Illumination::Visible => "VIS",
                Illumination::Daylight => "DAY",
                Illumination::Eclipsed => "ECL",
            };
            let flr = match row.flare {
                FlareStatus::None => "",
                FlareStatus::Near => "near",
                FlareStatus::Hit => "HIT",
            };
            let marker = if row.catalog_id == selected { '>' } else { ' ' };
            let mut name: String = row.name.chars().take(17).collect();
            name.insert(0, marker);
            let _ = writeln!(
                out,
                "{:<18} {:>7.1} {:>7.1} {:>9.1} {:>7.2} {:>7.2} {:>8.2} {:>8.0}  {:<3} {:<4} {}",
                name,
                row.az_deg,
                row.el_deg,
                row.range_km,
                row.range_rate_kms,
                row.lat_deg,
                row.lon_deg,
                row.apogee_km,
                vis,
                flr,
                row.next_event,
            );
        }

        let _ = writeln!(out, "{}", "-".repeat(96));
        let _ = writeln!(out, "commands: q<enter> save and quit  |  x<enter> quit");
        out
    }
}
