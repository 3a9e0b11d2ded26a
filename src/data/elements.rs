//! Element-set fetching, disk caching, and catalog-file parsing
//!
//! Groups come from Celestrak's GP service, one cache file per group tag
//! with a 24-hour freshness window. A download failure falls back to
//! whatever cache exists, stale included; a group with neither is simply
//! skipped so the rest of the selection still loads.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::data::{Config, SelectionMode};
use crate::engine::TrackedObject;
use crate::errors::TrackError;

const USER_AGENT: &str = concat!("skytrack/", env!("CARGO_PKG_VERSION"));
const CACHE_MAX_AGE: Duration = Duration::from_secs(86_400);
/// A group file bigger than this is a poisoned download, not a group.
const CACHE_POISON_BYTES: u64 = 2 * 1024 * 1024;

/// Celestrak group tags this build knows how to fetch.
pub const KNOWN_GROUPS: &[&str] = &[
    // Special interest
    "active", "visual", "stations", "last-30-days", "analyst",
    // Weather and earth resources
    "weather", "noaa", "goes", "resource", "sarsat", "dmc", "tdrss", "argos", "planet", "spire",
    // Communications
    "geo", "intelsat", "ses", "iridium", "iridium-NEXT", "starlink", "oneweb", "orbcomm",
    "globalstar", "swpc", "amateur", "x-comm", "other-comm", "satnogs", "gorizont", "raduga",
    "molniya",
    // Navigation
    "gnss", "gps-ops", "glo-ops", "galileo", "beidou", "sbas", "nnss", "musson",
    // Science
    "science", "geodetic", "engineering", "education",
    // Miscellaneous
    "military", "radar", "cubesat", "other",
];

/// Disk-backed element-set store keyed by group tag.
pub struct ElementStore {
    cache_dir: PathBuf,
}

impl ElementStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create element cache {:?}", cache_dir))?;
        Ok(Self { cache_dir })
    }

    pub fn clear_cache(&self) {
        match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let _ = std::fs::remove_file(entry.path());
                }
                log::info!("element cache cleared");
            }
            Err(e) => log::warn!("could not clear element cache: {e}"),
        }
    }

    /// Load whatever the configuration selects, deduplicated by catalog
    /// number in first-seen order.
    pub fn load_selection(&self, config: &Config) -> Vec<TrackedObject> {
        match config.selection_mode {
            SelectionMode::Groups => self.load_groups(&config.group_list),
            SelectionMode::Explicit => self.load_named(&config.explicit_names),
        }
    }

    /// Fetch-or-cache each group, parse, and merge.
    pub fn load_groups(&self, groups: &[String]) -> Vec<TrackedObject> {
        let mut objects = Vec::new();
        let mut seen = HashSet::new();

        for group in groups {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let Some(text) = self.group_text(group) else {
                continue;
            };

            let parsed = parse_elements(&text);
            if parsed.is_empty() {
                log::warn!("group {group:?} contained no usable element sets");
            }
            for obj in parsed {
                if seen.insert(obj.catalog_id()) {
                    objects.push(obj);
                }
            }
        }
        objects
    }

    /// Case-insensitive name-substring selection out of the active
    /// catalog.
    pub fn load_named(&self, names: &[String]) -> Vec<TrackedObject> {
        let Some(text) = self.group_text("active") else {
            return Vec::new();
        };
        let targets: Vec<String> = names
            .iter()
            .map(|n| n.trim().to_uppercase())
            .filter(|n| !n.is_empty())
            .collect();

        let mut seen = HashSet::new();
        parse_elements(&text)
            .into_iter()
            .filter(|obj| {
                let upper = obj.name().to_uppercase();
                targets.iter().any(|t| upper.contains(t))
            })
            .filter(|obj| seen.insert(obj.catalog_id()))
            .collect()
    }

    /// The text for one group: fresh cache, else download, else stale
    /// cache as a last resort.
    fn group_text(&self, group: &str) -> Option<String> {
        let Some(url) = group_url(group) else {
            log::error!("unknown group name {group:?}, skipping");
            return None;
        };
        let path = self.cache_dir.join(format!("{group}.txt"));

        if self.cache_fresh(&path, group) {
            log::info!("using cached elements for {group:?}");
            return std::fs::read_to_string(&path).ok();
        }

        match fetch(&url) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&path, &body) {
                    log::warn!("could not cache {group:?}: {e}");
                }
                Some(body)
            }
            Err(e) => {
                log::warn!("{e}; falling back to cache for {group:?}");
                match std::fs::read_to_string(&path) {
                    Ok(text) => Some(text),
                    Err(_) => {
                        log::error!("no cache for {group:?}, continuing without it");
                        None
                    }
                }
            }
        }
    }

    fn cache_fresh(&self, path: &Path, group: &str) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        if meta.len() == 0 {
            let _ = std::fs::remove_file(path);
            return false;
        }
        if group != "active" && meta.len() > CACHE_POISON_BYTES {
            log::warn!("cache for {group:?} implausibly large, discarding");
            let _ = std::fs::remove_file(path);
            return false;
        }
        meta.modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .map(|age| age < CACHE_MAX_AGE)
            .unwrap_or(false)
    }
}

fn group_url(group: &str) -> Option<String> {
    KNOWN_GROUPS.contains(&group).then(|| {
        format!("https://celestrak.org/NORAD/elements/gp.php?GROUP={group}&FORMAT=tle")
    })
}

fn fetch(url: &str) -> std::result::Result<String, TrackError> {
    log::info!("downloading {url}");
    let mut response = ureq::get(url)
        .header("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| TrackError::NetworkFetch(e.to_string()))?;
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| TrackError::NetworkFetch(e.to_string()))?;
    if body.is_empty() {
        return Err(TrackError::NetworkFetch(format!("{url} returned an empty body")));
    }
    log::info!("downloaded {} bytes", body.len());
    Ok(body)
}

/// Parse a catalog text file: name line followed by its "1 "/"2 " pair.
/// Objects the propagator rejects are logged and skipped.
pub fn parse_elements(text: &str) -> Vec<TrackedObject> {
    let mut objects = Vec::new();
    let mut name: Option<String> = None;
    let mut line1: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.len() < 2 {
            continue;
        }
        if line.starts_with("1 ") && name.is_some() {
            line1 = Some(line.to_string());
        } else if line.starts_with("2 ") {
            if let (Some(n), Some(l1)) = (name.take(), line1.take()) {
                match TrackedObject::from_elements(&n, &l1, line) {
                    Ok(obj) => objects.push(obj),
                    Err(e) => log::warn!("{e}"),
                }
            }
        } else {
            name = Some(line.to_string());
            line1 = None;
        }
    }
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::object::test_support::{ISS_LINE1, ISS_LINE2, ISS_NAME};

    fn catalog_text() -> String {
        format!(
            "{ISS_NAME}\n{ISS_LINE1}\n{ISS_LINE2}\n\
             BROKEN SAT\n1 nonsense line\n2 nonsense line\n"
        )
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let objects = parse_elements(&catalog_text());
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].catalog_id(), 25544);
        assert_eq!(objects[0].name(), "ISS (ZARYA)");
    }

    #[test]
    fn test_parse_handles_crlf_and_blank_lines() {
        let text = format!("\r\n{ISS_NAME}\r\n{ISS_LINE1}\r\n{ISS_LINE2}\r\n\r\n");
        let objects = parse_elements(&text);
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn test_unknown_group_has_no_url() {
        assert!(group_url("definitely-not-a-group").is_none());
        assert!(group_url("amateur").is_some());
    }

    #[test]
    fn test_named_selection_matches_substring() {
        let dir = std::env::temp_dir().join("skytrack-test-elements");
        let store = ElementStore::new(&dir).unwrap();
        std::fs::write(dir.join("active.txt"), catalog_text()).unwrap();

        let hits = store.load_named(&["zarya".to_string()]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].catalog_id(), 25544);

        let misses = store.load_named(&["HUBBLE".to_string()]);
        assert!(misses.is_empty());
    }
}
