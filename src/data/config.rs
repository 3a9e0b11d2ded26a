//! Configuration: a value type, a line-oriented disk format, validation
//!
//! The file format is `key: value`, one per line, `#` comments, optional
//! matching quotes around values, booleans as `true|false|1|0`. Unknown
//! keys are ignored so newer files load on older builds; a handful of
//! legacy key names map onto their modern equivalents.

use std::path::Path;

use anyhow::{Context, Result};

use crate::errors::TrackError;

/// Hard ceiling on displayed objects when `max_objects` is unlimited.
pub const SAFETY_CAP: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Load whole Celestrak groups.
    Groups,
    /// Load objects picked by name from the active catalog.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityMode {
    /// Show only optically visible objects above the elevation floor.
    Optical,
    /// Show everything the propagator produces, sky brightness ignored.
    Radio,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub observer_lat: f64,
    pub observer_lon: f64,
    pub observer_alt_km: f64,

    /// 0 means unlimited, clamped at [`SAFETY_CAP`].
    pub max_objects: usize,
    pub min_elevation_deg: f64,
    /// Negative disables the apogee filter.
    pub max_apogee_km: f64,
    /// Symmetric half-window for the ground track, minutes.
    pub trail_half_minutes: i64,

    pub selection_mode: SelectionMode,
    pub group_list: Vec<String>,
    pub explicit_names: Vec<String>,

    pub visibility_mode: VisibilityMode,

    pub rotator_enabled: bool,
    pub rotator_min_elevation_deg: f64,
    pub rotator_endpoint: String,

    pub radio_enabled: bool,
    pub radio_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            observer_lat: 0.0,
            observer_lon: 0.0,
            observer_alt_km: 0.0,
            max_objects: 100,
            min_elevation_deg: 0.0,
            max_apogee_km: -1.0,
            trail_half_minutes: 5,
            selection_mode: SelectionMode::Groups,
            group_list: vec!["active".to_string()],
            explicit_names: Vec::new(),
            visibility_mode: VisibilityMode::Optical,
            rotator_enabled: false,
            rotator_min_elevation_deg: 0.0,
            rotator_endpoint: "127.0.0.1:4533".to_string(),
            radio_enabled: false,
            radio_endpoint: "127.0.0.1:4532".to_string(),
        }
    }
}

impl Config {
    /// Display cap with the unlimited case folded in.
    pub fn effective_cap(&self) -> usize {
        if self.max_objects == 0 {
            SAFETY_CAP
        } else {
            self.max_objects.min(SAFETY_CAP)
        }
    }

    /// The selection as one comma-separated string, for logs and the
    /// JSON config block.
    pub fn selection_csv(&self) -> String {
        match self.selection_mode {
            SelectionMode::Groups => self.group_list.join(","),
            SelectionMode::Explicit => self.explicit_names.join(","),
        }
    }

    /// Reject configurations the engine cannot run with. Used verbatim
    /// at startup (fatal) and at the hot-reload gate (keep the old one).
    pub fn validate(&self) -> std::result::Result<(), TrackError> {
        let bad = |msg: String| Err(TrackError::ConfigInvalid(msg));
        if !(-90.0..=90.0).contains(&self.observer_lat) {
            return bad(format!("observer_lat {} out of range", self.observer_lat));
        }
        if !(-180.0..=180.0).contains(&self.observer_lon) {
            return bad(format!("observer_lon {} out of range", self.observer_lon));
        }
        if !self.observer_alt_km.is_finite() || self.observer_alt_km < -0.5 {
            return bad(format!("observer_alt_km {} implausible", self.observer_alt_km));
        }
        if self.trail_half_minutes < 0 {
            return bad("trail_half_minutes must be non-negative".to_string());
        }
        match self.selection_mode {
            SelectionMode::Groups if self.group_list.is_empty() => {
                return bad("group selection requested with an empty group list".to_string());
            }
            SelectionMode::Explicit if self.explicit_names.is_empty() => {
                return bad("explicit selection requested with no names".to_string());
            }
            _ => {}
        }
        if self.rotator_enabled || self.radio_enabled {
            let single = self.selection_mode == SelectionMode::Explicit
                && self.explicit_names.len() == 1;
            if !single {
                return bad(
                    "rotator/radio control requires exactly one explicitly selected object"
                        .to_string(),
                );
            }
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("no config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {:?}", path))?;
        Ok(Self::parse(&text))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_file_string())
            .with_context(|| format!("failed to write config {:?}", path))?;
        log::info!("config saved to {:?}", path);
        Ok(())
    }

    /// Parse the line-oriented format. Unparseable values leave the
    /// default in place; unknown keys are skipped.
    pub fn parse(text: &str) -> Self {
        let mut cfg = Self::default();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = unquote(value.trim());
            cfg.apply_key(key, value);
        }
        cfg
    }

    fn apply_key(&mut self, key: &str, value: &str) {
        match key {
            "observer_lat" => set_f64(&mut self.observer_lat, value),
            "observer_lon" => set_f64(&mut self.observer_lon, value),
            "observer_alt_km" => set_f64(&mut self.observer_alt_km, value),
            "max_objects" => {
                if let Ok(v) = value.parse::<usize>() {
                    self.max_objects = v;
                }
            }
            "min_elevation_deg" => set_f64(&mut self.min_elevation_deg, value),
            "max_apogee_km" => set_f64(&mut self.max_apogee_km, value),
            "trail_half_minutes" => {
                if let Ok(v) = value.parse::<i64>() {
                    self.trail_half_minutes = v;
                }
            }
            "selection_mode" => match value {
                "groups" => self.selection_mode = SelectionMode::Groups,
                "explicit" => self.selection_mode = SelectionMode::Explicit,
                other => log::warn!("unknown selection_mode {:?}", other),
            },
            "group_list" => self.group_list = csv_list(value),
            "explicit_names" => self.explicit_names = csv_list(value),
            "visibility_mode" => match value {
                "optical" => self.visibility_mode = VisibilityMode::Optical,
                "radio" => self.visibility_mode = VisibilityMode::Radio,
                other => log::warn!("unknown visibility_mode {:?}", other),
            },
            "rotator" => set_bool(&mut self.rotator_enabled, value),
            "rotator_min_elevation_deg" => set_f64(&mut self.rotator_min_elevation_deg, value),
            "rotator_endpoint" => self.rotator_endpoint = value.to_string(),
            "radio" => set_bool(&mut self.radio_enabled, value),
            "radio_endpoint" => self.radio_endpoint = value.to_string(),

            // Legacy names from earlier releases.
            "show_all_visible" => {
                let mut all = false;
                set_bool(&mut all, value);
                self.visibility_mode = if all {
                    VisibilityMode::Radio
                } else {
                    VisibilityMode::Optical
                };
            }
            "radio_mode" => set_bool(&mut self.radio_enabled, value),
            "rotator_enabled" => set_bool(&mut self.rotator_enabled, value),

            _ => log::debug!("ignoring unknown config key {:?}", key),
        }
    }

    pub fn to_file_string(&self) -> String {
        let selection = match self.selection_mode {
            SelectionMode::Groups => "groups",
            SelectionMode::Explicit => "explicit",
        };
        let visibility = match self.visibility_mode {
            VisibilityMode::Optical => "optical",
            VisibilityMode::Radio => "radio",
        };
        format!(
            "# skytrack configuration\n\
             observer_lat: {}\n\
             observer_lon: {}\n\
             observer_alt_km: {}\n\
             max_objects: {}\n\
             min_elevation_deg: {}\n\
             max_apogee_km: {}\n\
             trail_half_minutes: {}\n\
             selection_mode: {}\n\
             group_list: {}\n\
             explicit_names: {}\n\
             visibility_mode: {}\n\
             rotator: {}\n\
             rotator_min_elevation_deg: {}\n\
             rotator_endpoint: {}\n\
             radio: {}\n\
             radio_endpoint: {}\n",
            self.observer_lat,
            self.observer_lon,
            self.observer_alt_km,
            self.max_objects,
            self.min_elevation_deg,
            self.max_apogee_km,
            self.trail_half_minutes,
            selection,
            self.group_list.join(","),
            self.explicit_names.join(","),
            visibility,
            self.rotator_enabled,
            self.rotator_min_elevation_deg,
            self.rotator_endpoint,
            self.radio_enabled,
            self.radio_endpoint,
        )
    }
}

fn set_f64(slot: &mut f64, value: &str) {
    if let Ok(v) = value.parse::<f64>() {
        *slot = v;
    }
}

fn set_bool(slot: &mut bool, value: &str) {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => *slot = true,
        "false" | "0" => *slot = false,
        other => log::warn!("unparseable boolean {:?}", other),
    }
}

fn csv_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
