// Data model for the MBTA Transfer Guardian live navigation assistant
//
// External services:
// - MBTA v3 API (predictions, vehicles, stops): https://api-v3.mbta.com
// - Google Directions transit API: https://maps.googleapis.com/maps/api/directions/json
// - ElevenLabs text-to-speech: https://api.elevenlabs.io

use chrono::{TimeZone, Utc};
use chrono_tz::America::New_York;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Downtown Boston, used when the rider's position cannot be determined.
pub const DEFAULT_LOCATION: LatLng = LatLng {
    lat: 42.355,
    lng: -71.065,
};

/// Assessment of whether the planned transfers will be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn label(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Confidence::High => "🟢",
            Confidence::Medium => "🟡",
            Confidence::Low => "🔴",
        }
    }

    /// Sort rank used when ordering candidate itineraries, safest first.
    pub fn rank(&self) -> u8 {
        match self {
            Confidence::High => 1,
            Confidence::Medium => 2,
            Confidence::Low => 3,
        }
    }
}

/// One leg of an itinerary: either a transit ride or a walking segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub instruction: String,
    pub is_transit: bool,
    /// Scheduled departure, epoch seconds. Transit legs only.
    pub departure_time: Option<i64>,
    /// Scheduled arrival, epoch seconds. Transit legs only.
    pub arrival_time: Option<i64>,
    /// Boarding stop. A transit step without one is informational only
    /// and is never evaluated for transfer safety.
    pub stop_id: Option<String>,
    pub dest_stop_id: Option<String>,
    pub station_name: Option<String>,
    pub line_name: Option<String>,
    pub accessibility_info: Option<String>,
}

impl Step {
    pub fn walking(instruction: impl Into<String>) -> Self {
        Step {
            instruction: instruction.into(),
            is_transit: false,
            departure_time: None,
            arrival_time: None,
            stop_id: None,
            dest_stop_id: None,
            station_name: None,
            line_name: None,
            accessibility_info: None,
        }
    }
}

/// A planned route from origin to destination, immutable once active.
#[derive(Debug, Clone, PartialEq)]
pub struct Itinerary {
    pub id: usize,
    pub summary: String,
    pub duration: String,
    pub time_range: String,
    pub station_eta: String,
    pub steps: Vec<Step>,
    pub path: Vec<LatLng>,
    pub catch_confidence: Confidence,
    pub warning: Option<String>,
    /// Display label such as "5 min walk"; the leading numeric token is the
    /// planned walking estimate for the first leg.
    pub walk_minutes: String,
    pub user_arrival_time: String,
    pub train_departure_time: String,
}

impl Itinerary {
    /// Planned first-leg walking minutes, 0 when the label has no leading number.
    pub fn planned_walk_minutes(&self) -> u32 {
        parse_walk_minutes(&self.walk_minutes)
    }

    /// Subway routes worth tracking for this itinerary, extracted from the
    /// summary label. Green expands to its four branches.
    pub fn lines_to_track(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.summary.contains("Red") {
            lines.push("Red".to_string());
        }
        if self.summary.contains("Orange") {
            lines.push("Orange".to_string());
        }
        if self.summary.contains("Blue") {
            lines.push("Blue".to_string());
        }
        if self.summary.contains("Green") {
            for branch in ["Green-B", "Green-C", "Green-D", "Green-E"] {
                lines.push(branch.to_string());
            }
        }
        lines
    }
}

/// A real-time arrival estimate for one stop. Refreshed every poll, never
/// persisted across cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub minutes: f64,
    pub route: String,
    pub destination: String,
    pub status: String,
}

/// Live vehicle position, consumed for display only.
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePosition {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub bearing: f64,
    pub route: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationInfo {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub routes: Vec<String>,
}

// ============================================================================
// Station Directory Cache (15-day persistence)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationCache {
    pub stations: Vec<StationInfo>,
    pub cached_at: u64,
}

impl StationCache {
    pub fn new(stations: Vec<StationInfo>) -> Self {
        StationCache {
            stations,
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let age_days = (now.saturating_sub(self.cached_at)) / 86400;
        age_days >= 15
    }

    pub fn cache_path() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("mbta_tg");
        fs::create_dir_all(&path).ok();
        path.push("station_cache.json");
        path
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::cache_path();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TGError::File(format!("Failed to serialize station cache: {}", e)))?;

        fs::write(&path, json)
            .map_err(|e| TGError::File(format!("Failed to write station cache: {}", e)))?;

        log::info!("station cache saved to {:?}", path);
        Ok(())
    }

    pub fn load() -> Option<Self> {
        let path = Self::cache_path();

        if !path.exists() {
            log::info!("no station cache found, will download fresh data");
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<StationCache>(&contents) {
                Ok(cache) => {
                    if cache.is_expired() {
                        log::info!("station cache expired (>15 days old), refreshing");
                        None
                    } else {
                        log::info!("station cache loaded ({} stations)", cache.stations.len());
                        Some(cache)
                    }
                }
                Err(e) => {
                    log::warn!("failed to parse station cache ({}), will refresh", e);
                    None
                }
            },
            Err(e) => {
                log::warn!("failed to read station cache file ({}), will refresh", e);
                None
            }
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum TGError {
    Network(String),
    Parse(String),
    File(String),
    Config(String),
    NoAlternativesFound,
    Playback(String),
    PermissionDenied(String),
}

impl std::fmt::Display for TGError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TGError::Network(e) => write!(f, "Network error: {}", e),
            TGError::Parse(e) => write!(f, "Parse error: {}", e),
            TGError::File(e) => write!(f, "File error: {}", e),
            TGError::Config(e) => write!(f, "Configuration error: {}", e),
            TGError::NoAlternativesFound => write!(f, "No alternative routes found"),
            TGError::Playback(e) => write!(f, "Playback error: {}", e),
            TGError::PermissionDenied(e) => write!(f, "Permission denied: {}", e),
        }
    }
}

impl std::error::Error for TGError {}

pub type Result<T> = std::result::Result<T, TGError>;

// ============================================================================
// Helpers
// ============================================================================

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").expect("valid html tag pattern");

    /// Walking speed profiles in meters per second.
    pub static ref WALKING_SPEEDS: HashMap<&'static str, f64> = {
        let mut m = HashMap::new();
        m.insert("slow", 0.9);
        m.insert("normal", 1.4);
        m.insert("fast", 1.8);
        m
    };
}

pub fn walking_speed_mps(profile: &str) -> f64 {
    WALKING_SPEEDS.get(profile).copied().unwrap_or(1.4)
}

/// Strip HTML tags from a routing instruction so it reads cleanly when spoken.
pub fn strip_html(text: &str) -> String {
    HTML_TAG.replace_all(text, "").to_string()
}

/// Leading numeric token of a walk label, e.g. "5 min walk" -> 5.
pub fn parse_walk_minutes(label: &str) -> u32 {
    label
        .split(' ')
        .next()
        .and_then(|token| token.parse::<u32>().ok())
        .unwrap_or(0)
}

/// Minutes between an epoch-second timestamp and a now in epoch milliseconds.
/// Negative when the timestamp is in the past.
pub fn minutes_until(timestamp_secs: i64, now_ms: i64) -> f64 {
    (timestamp_secs * 1000 - now_ms) as f64 / 60000.0
}

/// Format an epoch-second timestamp as Boston local time, e.g. "8:05 PM".
pub fn format_timestamp(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt.with_timezone(&New_York).format("%-I:%M %p").to_string(),
        None => "??:??".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_minutes_parses_leading_token() {
        assert_eq!(parse_walk_minutes("5 min walk"), 5);
        assert_eq!(parse_walk_minutes("12 min walk"), 12);
        assert_eq!(parse_walk_minutes("0 min walk"), 0);
    }

    #[test]
    fn walk_minutes_defaults_to_zero_when_unparseable() {
        assert_eq!(parse_walk_minutes(""), 0);
        assert_eq!(parse_walk_minutes("short walk"), 0);
        assert_eq!(parse_walk_minutes("min 5 walk"), 0);
    }

    #[test]
    fn strip_html_removes_tags() {
        assert_eq!(
            strip_html("Take <b>Red Line</b> from Park Street"),
            "Take Red Line from Park Street"
        );
        assert_eq!(strip_html("Walk to <div class=\"x\">Downtown</div>"), "Walk to Downtown");
        assert_eq!(strip_html("no markup"), "no markup");
    }

    #[test]
    fn confidence_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Confidence::High).unwrap(), "\"high\"");
        let parsed: Confidence = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(parsed, Confidence::Medium);
    }

    #[test]
    fn confidence_ranks_safest_first() {
        assert!(Confidence::High.rank() < Confidence::Medium.rank());
        assert!(Confidence::Medium.rank() < Confidence::Low.rank());
    }

    #[test]
    fn minutes_until_handles_past_and_future() {
        let now_ms = 1_700_000_000_000;
        assert_eq!(minutes_until(1_700_000_000 + 120, now_ms), 2.0);
        assert_eq!(minutes_until(1_700_000_000 - 60, now_ms), -1.0);
    }

    #[test]
    fn walking_speed_falls_back_to_normal() {
        assert_eq!(walking_speed_mps("slow"), 0.9);
        assert_eq!(walking_speed_mps("fast"), 1.8);
        assert_eq!(walking_speed_mps("jetpack"), 1.4);
    }

    #[test]
    fn lines_to_track_expands_green_branches() {
        let itinerary = Itinerary {
            id: 0,
            summary: "Via Red Line & Green Line".to_string(),
            duration: "32 mins".to_string(),
            time_range: String::new(),
            station_eta: String::new(),
            steps: Vec::new(),
            path: Vec::new(),
            catch_confidence: Confidence::High,
            warning: None,
            walk_minutes: "4 min walk".to_string(),
            user_arrival_time: String::new(),
            train_departure_time: String::new(),
        };
        assert_eq!(
            itinerary.lines_to_track(),
            vec!["Red", "Green-B", "Green-C", "Green-D", "Green-E"]
        );
    }
}
