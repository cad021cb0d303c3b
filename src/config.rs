//! Crate-wide tunables, sourced through the `config` crate's builder with
//! `PAGESTORE_`-prefixed environment overrides. There is no CLI or file-based
//! configuration surface (out of scope) — this module exists purely so the
//! constants below aren't scattered `const`s sprinkled through the storage
//! layer, matching the teacher's `config::config` module.

use config::{Config, ConfigError, Environment};
use once_cell::sync::OnceCell;

/// Size of a page, in bytes. Fixed at 8 KiB per the data model.
pub const PAGE_SIZE_BYTES: usize = 8192;

/// Directory new [`crate::storage::file::HeapFile`]s are created in by
/// default when no explicit path is supplied (tests always supply an
/// explicit `tempfile` path instead).
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default number of frames in a fresh [`crate::storage::buffer::BufferManager`].
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Settings resolved once per process from defaults plus `PAGESTORE_*` env vars.
#[derive(Debug, Clone)]
pub struct Settings {
    pub page_size_bytes: usize,
    pub default_pool_size: usize,
    pub data_dir: String,
}

impl Settings {
    fn load() -> Self {
        let builder = Config::builder()
            .set_default("page_size_bytes", PAGE_SIZE_BYTES as i64)
            .and_then(|b| b.set_default("default_pool_size", DEFAULT_POOL_SIZE as i64))
            .and_then(|b| b.set_default("data_dir", DEFAULT_DATA_DIR))
            .and_then(|b| b.add_source(Environment::with_prefix("PAGESTORE")).build());

        match builder {
            Ok(cfg) => Self::from_config(cfg).unwrap_or_default(),
            Err(_) => Settings::default(),
        }
    }

    fn from_config(cfg: Config) -> Result<Self, ConfigError> {
        Ok(Settings {
            page_size_bytes: cfg.get_int("page_size_bytes")? as usize,
            default_pool_size: cfg.get_int("default_pool_size")? as usize,
            data_dir: cfg.get_string("data_dir")?,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            page_size_bytes: PAGE_SIZE_BYTES,
            default_pool_size: DEFAULT_POOL_SIZE,
            data_dir: DEFAULT_DATA_DIR.to_string(),
        }
    }
}

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Returns the process-wide resolved settings, loading them on first use.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(Settings::load)
}
