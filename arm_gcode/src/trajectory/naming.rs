//! File naming for stored trajectories:
//! `<owner>__<slug>__<YYYYMMDD_HHMMSS>.gcode`.

use chrono::{DateTime, Local};

use crate::ArmError;

pub const EXTENSION: &str = ".gcode";
pub const SEPARATOR: &str = "__";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const FALLBACK_SLUG: &str = "traj";

/// Lowercase alphanumerics survive, space/`-`/`_` become `_`, the rest is dropped.
pub fn slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase()),
            ' ' | '-' | '_' => Some('_'),
            _ => None,
        })
        .collect();
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

pub fn owner_prefix(owner: i64) -> String {
    format!("{}{}", owner, SEPARATOR)
}

/// Prefix shared by every file recorded by `owner` under `name`.
pub fn name_prefix(owner: i64, name: &str) -> String {
    format!("{}{}{}", owner_prefix(owner), slug(name), SEPARATOR)
}

pub fn filename_at(owner: i64, name: &str, at: DateTime<Local>) -> String {
    format!("{}{}{}", name_prefix(owner, name), at.format(TIMESTAMP_FORMAT), EXTENSION)
}

pub fn is_stored_name(name: &str) -> bool {
    name.ends_with(EXTENSION)
}

/// Rejects names that could escape the storage directory.
pub fn validate(name: &str) -> Result<(), ArmError> {
    if name.trim().is_empty() {
        return Err(ArmError::Validation("trajectory name cannot be empty".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") || name.contains('\0') {
        return Err(ArmError::Validation(format!("invalid trajectory name '{}'", name)));
    }
    Ok(())
}
