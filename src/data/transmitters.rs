//! SatNOGS transmitter database
//!
//! Downloaded opportunistically at startup, cached as JSON on disk, and
//! consulted only when a radio is driving a selected object. The pick
//! order prefers the transmitters an operator can actually hear with an
//! FM rig, then works down to "anything with a downlink".

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::TrackError;

const SATNOGS_URL: &str = "https://db.satnogs.org/api/transmitters/?format=json";
const USER_AGENT: &str = concat!("skytrack/", env!("CARGO_PKG_VERSION"));

/// One usable transmitter record.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmitter {
    pub uplink_hz: f64,
    pub downlink_hz: f64,
    pub mode: String,
    pub description: String,
    pub active: bool,
}

/// Raw SatNOGS schema; most fields are nullable.
#[derive(Debug, Deserialize)]
struct RawTransmitter {
    norad_cat_id: Option<i32>,
    uplink_low: Option<f64>,
    downlink_low: Option<f64>,
    mode: Option<String>,
    status: Option<String>,
    description: Option<String>,
}

#[derive(Default)]
pub struct TransmitterDb {
    by_id: HashMap<i32, Vec<Transmitter>>,
}

impl TransmitterDb {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Try a fresh download, fall back to the disk cache, fall back to an
    /// empty database. Never fatal.
    pub fn load_or_fetch(cache_path: impl AsRef<Path>) -> Self {
        let cache_path = cache_path.as_ref();
        match fetch() {
            Ok(body) => {
                if let Err(e) = std::fs::write(cache_path, &body) {
                    log::warn!("could not cache transmitter db: {e}");
                }
                match Self::from_json(&body) {
                    Ok(db) => return db,
                    Err(e) => log::warn!("fresh transmitter db unparseable: {e}"),
                }
            }
            Err(e) => log::warn!("{e}; trying transmitter cache"),
        }

        match std::fs::read_to_string(cache_path) {
            Ok(body) => match Self::from_json(&body) {
                Ok(db) => db,
                Err(e) => {
                    log::warn!("cached transmitter db unparseable: {e}");
                    Self::empty()
                }
            },
            Err(_) => {
                log::info!("no transmitter database available; Doppler tuning disabled");
                Self::empty()
            }
        }
    }

    pub fn from_json(body: &str) -> anyhow::Result<Self> {
        let raw: Vec<RawTransmitter> = serde_json::from_str(body)?;
        let mut by_id: HashMap<i32, Vec<Transmitter>> = HashMap::new();
        let mut count = 0usize;
        for entry in raw {
            let Some(norad) = entry.norad_cat_id else {
                continue;
            };
            by_id.entry(norad).or_default().push(Transmitter {
                uplink_hz: entry.uplink_low.unwrap_or(0.0),
                downlink_hz: entry.downlink_low.unwrap_or(0.0),
                mode: entry.mode.unwrap_or_default(),
                description: entry.description.unwrap_or_default(),
                active: entry.status.as_deref() == Some("active"),
            });
            count += 1;
        }
        log::info!("parsed {count} transmitters for {} objects", by_id.len());
        Ok(Self { by_id })
    }

    pub fn has(&self, catalog_id: i32) -> bool {
        self.by_id.contains_key(&catalog_id)
    }

    /// The transmitter an operator would want first. Weather APT on 137
    /// MHz FM wins, then FM voice, any FM, linear SSB/CW, any active
    /// downlink, and finally anything with a downlink at all.
    pub fn best_for(&self, catalog_id: i32) -> Option<&Transmitter> {
        let list = self.by_id.get(&catalog_id)?;

        let apt = |tx: &&Transmitter| {
            tx.active
                && (137_000_000.0..=138_000_000.0).contains(&tx.downlink_hz)
                && tx.mode.contains("FM")
        };
        let fm_voice = |tx: &&Transmitter| {
            tx.active
                && tx.mode.contains("FM")
                && (tx.description.contains("Voice") || tx.description.contains("Repeater"))
        };
        let any_fm = |tx: &&Transmitter| tx.active && tx.mode.contains("FM");
        let linear =
            |tx: &&Transmitter| tx.active && (tx.mode.contains("SSB") || tx.mode.contains("CW"));
        let active_downlink = |tx: &&Transmitter| tx.active && tx.downlink_hz > 0.0;
        let any_downlink = |tx: &&Transmitter| tx.downlink_hz > 0.0;

        list.iter()
            .find(apt)
            .or_else(|| list.iter().find(fm_voice))
            .or_else(|| list.iter().find(any_fm))
            .or_else(|| list.iter().find(linear))
            .or_else(|| list.iter().find(active_downlink))
            .or_else(|| list.iter().find(any_downlink))
    }
}

fn fetch() -> std::result::Result<String, TrackError> {
    log::info!("downloading transmitter database from {SATNOGS_URL}");
    let mut response = ureq::get(SATNOGS_URL)
        .header("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| TrackError::NetworkFetch(e.to_string()))?;
    response
        .body_mut()
        .read_to_string()
        .map_err(|e| TrackError::NetworkFetch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> TransmitterDb {
        let json = r#"[
            {"norad_cat_id": 25544, "uplink_low": 145990000, "downlink_low": 437800000,
             "mode": "FM", "status": "active", "description": "Voice Repeater"},
            {"norad_cat_id": 25544, "uplink_low": null, "downlink_low": 145800000,
             "mode": "FM", "status": "inactive", "description": "Old downlink"},
            {"norad_cat_id": 33591, "uplink_low": null, "downlink_low": 137100000,
             "mode": "APT FM", "status": "active", "description": "APT imagery"},
            {"norad_cat_id": 7530,  "uplink_low": 432145000, "downlink_low": 145960000,
             "mode": "SSB", "status": "active", "description": "Linear transponder"},
            {"norad_cat_id": 900,   "uplink_low": null, "downlink_low": 136650000,
             "mode": "CW", "status": "dead", "description": ""}
        ]"#;
        TransmitterDb::from_json(json).unwrap()
    }

    #[test]
    fn test_weather_apt_wins() {
        let db = sample_db();
        let tx = db.best_for(33591).unwrap();
        assert!((tx.downlink_hz - 137_100_000.0).abs() < 1.0);
    }

    #[test]
    fn test_fm_voice_preferred_over_inactive() {
        let db = sample_db();
        let tx = db.best_for(25544).unwrap();
        assert!(tx.active);
        assert!((tx.downlink_hz - 437_800_000.0).abs() < 1.0);
        assert!((tx.uplink_hz - 145_990_000.0).abs() < 1.0);
    }

    #[test]
    fn test_linear_fallback() {
        let db = sample_db();
        let tx = db.best_for(7530).unwrap();
        assert_eq!(tx.mode, "SSB");
    }

    #[test]
    fn test_dead_downlink_still_beats_nothing() {
        let db = sample_db();
        let tx = db.best_for(900).unwrap();
        assert!(!tx.active);
        assert!(tx.downlink_hz > 0.0);
    }

    #[test]
    fn test_unknown_object_has_no_transmitter() {
        let db = sample_db();
        assert!(db.best_for(1).is_none());
        assert!(!db.has(1));
    }
}
