//! # arbor-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ArborSettings::default()`]
//! 2. **User file**: `~/.arbor/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ARBOR_*` overrides (highest priority)
//!
//! Command-line flags are applied by the binary on top of the result.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{arbor_home, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
