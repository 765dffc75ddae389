use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::ThawError;

/// Date layout embedded in unit names and accepted on the command line.
pub const DATE_FORMAT: &str = "%Y.%m.%d";

/// Prefix the snapshot jobs put in front of the unit name.
pub const SNAPSHOT_PREFIX: &str = "snapshot_";

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}\.\d{2}\.\d{2}").expect("static regex"))
}

pub fn parse_reference_date(s: &str) -> Result<NaiveDate, ThawError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|_| ThawError::InvalidDate(s.to_string()))
}

/// First `YYYY.MM.DD` component in a unit or snapshot name.
pub fn extract_date(name: &str) -> Option<NaiveDate> {
    let m = date_re().find(name)?;
    NaiveDate::parse_from_str(m.as_str(), DATE_FORMAT).ok()
}

/// The rotation series a unit belongs to: everything before its date component.
///
/// `.ds-aex20-c01-logs-gpn-k8s-access-2024.01.18-000051` -> `.ds-aex20-c01-logs-gpn-k8s-access`
pub fn series_key(unit: &str) -> String {
    match date_re().find(unit) {
        Some(m) => unit[..m.start()].trim_end_matches(|c: char| c == '-' || c == '_' || c == '.').to_string(),
        None => unit.to_string(),
    }
}

/// Unit name a snapshot restores into.
pub fn unit_name(snapshot_name: &str) -> &str {
    snapshot_name.strip_prefix(SNAPSHOT_PREFIX).unwrap_or(snapshot_name)
}

pub fn snapshot_name_for(unit: &str) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, unit)
}

/// Human readable size, 1024-based with two decimals (`26.79 GB`).
pub fn format_bytes(size_in_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size_in_bytes as f64;
    for unit in UNITS.iter().take(UNITS.len() - 1) {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} {}", size, UNITS[UNITS.len() - 1])
}
