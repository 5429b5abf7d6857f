//! # taskcast-settings
//!
//! Configuration for the taskcast broker, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`TaskcastSettings::default()`]
//! 2. **Settings file**: `~/.taskcast/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `TASKCAST_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::{LogLevel, LoggingSettings, ServerSettings, TaskcastSettings};
