//! # simbus-settings
//!
//! Client configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BusSettings::default()`]
//! 2. **Settings file**: `$SIMBUS_SETTINGS` or `~/.simbus/settings.json`,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `SIMBUS_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned, so a loaded
//! [`BusSettings`] always yields a valid
//! [`ClientIdentifier`](simbus_core::ClientIdentifier).

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    load_with, parse_in_range, settings_path,
};
pub use types::{BusSettings, IdentitySettings, TransportSettings};
