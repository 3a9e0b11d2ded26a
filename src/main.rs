//! skytrack - ground-station situational awareness
//!
//! Propagates a selected set of Earth-orbiting objects against a fixed
//! observer, classifies their illumination, predicts passes and optical
//! flares, and serves the results to a terminal, a JSON API, and an
//! optional rotator/transceiver pair.

mod astro;
mod data;
mod effectors;
mod engine;
mod errors;
mod render;
mod server;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::{Mutex, RwLock};
use satkit::Instant;

use astro::TrackClock;
use data::{Config, ElementStore, SelectionMode, TransmitterDb, VisibilityMode};
use engine::{
    ObjectStore, Orchestrator, ReloadSlot, SharedState, TrackedObject, DEFAULT_WORKERS,
    NO_SELECTION,
};
use render::FrameRenderer;
use server::ServerContext;

#[derive(Parser, Debug)]
#[command(name = "skytrack", version, about = "Live satellite tracking for a ground station")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "skytrack.conf")]
    config: PathBuf,

    /// Observer latitude override (degrees)
    #[arg(long)]
    lat: Option<f64>,

    /// Observer longitude override (degrees)
    #[arg(long)]
    lon: Option<f64>,

    /// Observer altitude override (km)
    #[arg(long)]
    alt: Option<f64>,

    /// Minimum elevation filter (degrees)
    #[arg(long)]
    minel: Option<f64>,

    /// Apogee filter in km (negative disables)
    #[arg(long)]
    maxapo: Option<f64>,

    /// Cap on displayed objects (0 = unlimited)
    #[arg(long = "max_sats")]
    max_sats: Option<usize>,

    /// Ground-track half window (minutes)
    #[arg(long = "trail_mins")]
    trail_mins: Option<i64>,

    /// Comma-separated Celestrak group tags
    #[arg(long)]
    groupsel: Option<String>,

    /// Comma-separated object names (explicit selection)
    #[arg(long)]
    satsel: Option<String>,

    /// true = optical filtering, false = radio (whole sky)
    #[arg(long)]
    visible: Option<bool>,

    /// Drive the rotator toward the selected object
    #[arg(long)]
    rotator: Option<bool>,

    /// Drive the transceiver with Doppler-tuned frequencies
    #[arg(long)]
    radio: Option<bool>,

    /// Clear the element cache before loading
    #[arg(long)]
    refresh: bool,

    /// Simulated start time, "YYYY-MM-DD HH:MM:SS"
    #[arg(long)]
    time: Option<String>,

    /// Run the mission-planner page first, then continue tracking
    #[arg(long)]
    groupbuild: bool,

    /// JSON/dashboard port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Terminal-mirror port
    #[arg(long, default_value_t = 12345)]
    mirror_port: u16,

    /// Element cache directory
    #[arg(long, default_value = "tle_cache")]
    cache_dir: PathBuf,
}

/// Fallback site when the config carries no observer at all.
const DEFAULT_SITE: (f64, f64) = (39.5478, -76.0916);

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(v) = args.lat {
        config.observer_lat = v;
    }
    if let Some(v) = args.lon {
        config.observer_lon = v;
    }
    if let Some(v) = args.alt {
        config.observer_alt_km = v;
    }
    if let Some(v) = args.minel {
        config.min_elevation_deg = v;
    }
    if let Some(v) = args.maxapo {
        config.max_apogee_km = v;
    }
    if let Some(v) = args.max_sats {
        config.max_objects = v;
    }
    if let Some(v) = args.trail_mins {
        config.trail_half_minutes = v;
    }
    if let Some(csv) = &args.groupsel {
        config.selection_mode = SelectionMode::Groups;
        config.group_list = split_csv(csv);
    }
    if let Some(csv) = &args.satsel {
        config.selection_mode = SelectionMode::Explicit;
        config.explicit_names = split_csv(csv);
    }
    if let Some(optical) = args.visible {
        config.visibility_mode = if optical {
            VisibilityMode::Optical
        } else {
            VisibilityMode::Radio
        };
    }
    if let Some(v) = args.rotator {
        config.rotator_enabled = v;
    }
    if let Some(v) = args.radio {
        config.radio_enabled = v;
    }
}

fn split_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_start_time(text: &str) -> Result<Instant> {
    let naive = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("unparseable --time {text:?} (want YYYY-MM-DD HH:MM:SS)"))?;
    use chrono::{Datelike, Timelike};
    Instant::from_datetime(
        naive.year(),
        naive.month() as i32,
        naive.day() as i32,
        naive.hour() as i32,
        naive.minute() as i32,
        naive.second() as f64,
    )
    .map_err(|e| anyhow::anyhow!("satkit rejected --time: {e}"))
}

/// Line-based command reader: `q` saves the config and quits, `x` quits
/// without saving.
fn spawn_input_thread(
    running: Arc<AtomicBool>,
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
) {
    let _ = std::thread::Builder::new().name("input".into()).spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        while running.load(Ordering::Relaxed) {
            line.clear();
            if std::io::BufRead::read_line(&mut stdin.lock(), &mut line).is_err() {
                break;
            }
            match line.trim() {
                "q" => {
                    if let Err(e) = config.read().save(&config_path) {
                        log::warn!("could not save config on quit: {e:#}");
                    }
                    running.store(false, Ordering::Relaxed);
                }
                "x" => running.store(false, Ordering::Relaxed),
                "" => {}
                other => log::info!("unknown command {other:?} (q = save+quit, x = quit)"),
            }
        }
    });
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("starting up");

    let mut config = Config::load(&args.config)?;
    apply_overrides(&mut config, &args);
    if config.observer_lat == 0.0 && config.observer_lon == 0.0 {
        config.observer_lat = DEFAULT_SITE.0;
        config.observer_lon = DEFAULT_SITE.1;
    }

    if args.groupbuild {
        config = server::run_planner(args.port, config)?;
        config.save(&args.config)?;
    }

    config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    let clock = Arc::new(match &args.time {
        Some(text) => {
            let start = parse_start_time(text)?;
            log::info!("simulated start requested: {text}");
            TrackClock::starting_at(start)
        }
        None => TrackClock::starting_now(),
    });

    let elements = ElementStore::new(&args.cache_dir)?;
    if args.refresh {
        elements.clear_cache();
    }

    log::info!("loading elements for {:?}", config.selection_csv());
    let mut objects = elements.load_selection(&config);
    if objects.is_empty() {
        bail!("no objects loaded for selection {:?}", config.selection_csv());
    }
    log::info!("loaded {} objects", objects.len());

    let reference = clock.now_physics();
    let stale = objects
        .iter()
        .filter(|o| (reference - o.epoch()).as_seconds() > 30.0 * 86_400.0)
        .count();
    if stale > 0 {
        log::warn!("{stale} objects carry element sets older than 30 days");
    }
    objects.push(TrackedObject::sun(reference));
    objects.push(TrackedObject::moon(reference));

    let transmitters = Arc::new(if config.radio_enabled {
        TransmitterDb::load_or_fetch("transmitters.json")
    } else {
        TransmitterDb::empty()
    });

    let store = Arc::new(RwLock::new(ObjectStore::new(objects)));
    let selected = Arc::new(AtomicI32::new(NO_SELECTION));
    if config.selection_mode == SelectionMode::Explicit && config.explicit_names.len() == 1 {
        if let Some(obj) = store.read().iter().find(|o| !o.is_special()) {
            selected.store(obj.catalog_id(), Ordering::Relaxed);
            log::info!("effector target: {} ({})", obj.name(), obj.catalog_id());
            if config.radio_enabled && !transmitters.has(obj.catalog_id()) {
                log::warn!("no transmitter records for the selected object");
            }
        }
    }

    let shared = Arc::new(SharedState::new(reference));
    let reload = Arc::new(ReloadSlot::new());
    let running = Arc::new(AtomicBool::new(true));
    let last_frame = Arc::new(Mutex::new(String::new()));
    let config = Arc::new(RwLock::new(config));

    let ctx = Arc::new(ServerContext {
        clock: clock.clone(),
        store: store.clone(),
        config: config.clone(),
        shared: shared.clone(),
        reload: reload.clone(),
        selected: selected.clone(),
        last_frame: last_frame.clone(),
    });
    let http = server::spawn(ctx, args.port, args.mirror_port, running.clone());

    spawn_input_thread(running.clone(), config.clone(), args.config.clone());

    let renderer = FrameRenderer::new(
        clock.clone(),
        store.clone(),
        config.clone(),
        shared.clone(),
        selected.clone(),
        last_frame,
        running.clone(),
        args.port,
    );
    let render = std::thread::Builder::new()
        .name("render".into())
        .spawn(move || renderer.run())
        .expect("spawn render thread");

    // The producer runs on the main thread; everything else is a reader.
    let orchestrator = Orchestrator::new(
        clock,
        store,
        config,
        shared,
        reload,
        selected,
        transmitters,
        elements,
        running.clone(),
        DEFAULT_WORKERS,
    );
    orchestrator.run();

    running.store(false, Ordering::Relaxed);
    let _ = render.join();
    let _ = http.join();
    log::info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file_values() {
        let args = Args::parse_from([
            "skytrack",
            "--lat",
            "10.5",
            "--minel",
            "15",
            "--groupsel",
            "weather,stations",
            "--visible",
            "false",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert!((config.observer_lat - 10.5).abs() < f64::EPSILON);
        assert!((config.min_elevation_deg - 15.0).abs() < f64::EPSILON);
        assert_eq!(config.group_list, vec!["weather", "stations"]);
        assert_eq!(config.visibility_mode, VisibilityMode::Radio);
    }

    #[test]
    fn test_satsel_switches_to_explicit() {
        let args = Args::parse_from(["skytrack", "--satsel", "ISS", "--rotator", "true"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.selection_mode, SelectionMode::Explicit);
        assert_eq!(config.explicit_names, vec!["ISS"]);
        assert!(config.rotator_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_start_time_parsing() {
        let t = parse_start_time("2024-06-21 23:30:00").unwrap();
        let (y, mo, d, h, mi, s) = t.as_datetime();
        assert_eq!((y, mo, d, h, mi), (2024, 6, 21, 23, 30));
        assert!(s < 1.0);
        assert!(parse_start_time("21/06/2024").is_err());
    }
}
