//! # huddle-settings
//!
//! Configuration with layered sources for the huddle WebSocket layer.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HuddleSettings::default()`]
//! 2. **User file**: `~/.huddle/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `HUDDLE_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use huddle_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{SettingsError, SettingsResult};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
