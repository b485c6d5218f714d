//! Layered settings loading.
//!
//! Later layers win: compiled defaults, then the JSON file merged key by key
//! (arrays replace, `null` keeps the lower layer), then `SIMBUS_*` variables.
//! Only the final result is validated, so a file may rely on a variable to
//! fill in a required value.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use simbus_core::split_topic;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{BusSettings, MAX_ENCODER_POOL_SIZE, MAX_REQUEST_TIMEOUT_MS};

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_VAR: &str = "SIMBUS_SETTINGS";

/// Resolve the settings file path.
///
/// `$SIMBUS_SETTINGS` when set, otherwise `~/.simbus/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string(SETTINGS_PATH_VAR) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".simbus").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults. Invalid JSON or an invalid final
/// value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BusSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

/// [`load_settings_from_path`] with a custom variable lookup.
pub fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<BusSettings> {
    let defaults = serde_json::to_value(BusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "merging settings file over defaults");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file");
        defaults
    };

    let mut settings: BusSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Merge `source` over `target`, recursing into objects present in both.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut BusSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning; the file or default value
/// stays in place.
pub fn apply_overrides(settings: &mut BusSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Identity ────────────────────────────────────────────────────
    if let Some(v) = env.string("SIMBUS_NAMESPACE") {
        settings.identity.namespace = split_topic(&v);
    }
    if let Some(v) = env.string("SIMBUS_APP_ID") {
        settings.identity.app_id = v;
    }
    if let Some(v) = env.string("SIMBUS_GROUP_ID") {
        settings.identity.group_id = v;
    }
    if let Some(v) = env.string("SIMBUS_CLIENT_ID") {
        settings.identity.client_id = v;
    }

    // ── Requests and encoding ───────────────────────────────────────
    if let Some(v) = env.number("SIMBUS_REQUEST_TIMEOUT_MS", 1..=MAX_REQUEST_TIMEOUT_MS) {
        settings.request_timeout_ms = v;
    }
    if let Some(v) = env.string("SIMBUS_DEFAULT_CODEC") {
        match v.parse() {
            Ok(kind) => settings.default_codec = kind,
            Err(e) => tracing::warn!(key = "SIMBUS_DEFAULT_CODEC", error = %e, "ignoring"),
        }
    }
    if let Some(v) = env.number("SIMBUS_ENCODER_POOL_SIZE", 0..=MAX_ENCODER_POOL_SIZE) {
        settings.encoder_pool_size = v;
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = env.string("SIMBUS_TRANSPORT") {
        settings.transport.access_name = v;
    }
    if let Some(v) = env.string("SIMBUS_TRANSPORT_HOST") {
        settings.transport.host = v;
    }
    if let Some(v) = env.number("SIMBUS_TRANSPORT_PORT", 1..=u16::MAX) {
        settings.transport.port = v;
    }
}

/// Parse `val` and accept it only inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.parse().ok().filter(|n| range.contains(n))
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Reads override variables through an injectable lookup.
struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn number<T>(&self, name: &str, range: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd + Clone + fmt::Debug,
    {
        let val = self.string(name)?;
        let parsed = parse_in_range(&val, range.clone());
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, ?range, "ignoring out-of-range override");
        }
        parsed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
