//! Runtime configuration loaded from environment variables.
//!
//! DESIGN
//! ======
//! Every knob has a typed default. Unparseable values fall back to the
//! default so a typo in the environment degrades instead of blocking startup.

use std::time::Duration;

use crate::camera::FitOptions;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_WHITEBOARD_NAME: &str = "Ana Harita";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_AUTOSAVE_DELAY_MS: u64 = 1200;
const DEFAULT_RENDER_MAX_WIDTH: u32 = 1600;
const DEFAULT_RENDER_MAX_HEIGHT: u32 = 1200;
const DEFAULT_IMAGE_FETCH_TIMEOUT_SECS: u64 = 15;
const DEFAULT_EDITOR_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_IMAGE_MAX_BYTES: usize = 16 * 1024 * 1024;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// SECTIONS
// =============================================================================

/// Debounced persistence tuning for the sync controller.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Quiescence required after the last local edit before an auto-save.
    pub autosave_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { autosave_delay: Duration::from_millis(DEFAULT_AUTOSAVE_DELAY_MS) }
    }
}

/// Pixel bounds for the static fallback render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self { max_width: DEFAULT_RENDER_MAX_WIDTH, max_height: DEFAULT_RENDER_MAX_HEIGHT }
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Postgres URL. `None` selects the in-memory scene store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Name of the whiteboard row this service serves.
    pub whiteboard_name: String,
    pub sync: SyncConfig,
    pub fit: FitOptions,
    pub render: RenderLimits,
    pub image_fetch_timeout: Duration,
    /// Largest downloaded gallery image accepted.
    pub image_max_bytes: usize,
    /// Request body limit for editor routes; scenes carry files as data URLs.
    pub editor_max_body_bytes: usize,
    /// Bearer token for editor routes. `None` disables editing.
    pub admin_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            whiteboard_name: DEFAULT_WHITEBOARD_NAME.to_owned(),
            sync: SyncConfig::default(),
            fit: FitOptions::default(),
            render: RenderLimits::default(),
            image_fetch_timeout: Duration::from_secs(DEFAULT_IMAGE_FETCH_TIMEOUT_SECS),
            image_max_bytes: DEFAULT_IMAGE_MAX_BYTES,
            editor_max_body_bytes: DEFAULT_EDITOR_MAX_BODY_BYTES,
            admin_token: None,
        }
    }
}

impl AppConfig {
    /// Build the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let fit = FitOptions {
            zoom_factor: env_parse("FIT_ZOOM_FACTOR", defaults.fit.zoom_factor),
            min_zoom: env_parse("FIT_MIN_ZOOM", defaults.fit.min_zoom),
            max_zoom: env_parse("FIT_MAX_ZOOM", defaults.fit.max_zoom),
        };

        Self {
            port: env_parse("PORT", defaults.port),
            database_url: env_string("DATABASE_URL"),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", defaults.db_max_connections),
            whiteboard_name: env_string("WHITEBOARD_NAME").unwrap_or(defaults.whiteboard_name),
            sync: SyncConfig {
                autosave_delay: Duration::from_millis(env_parse("AUTOSAVE_DELAY_MS", DEFAULT_AUTOSAVE_DELAY_MS)),
            },
            fit: fit.sanitized(),
            render: RenderLimits {
                max_width: env_parse("RENDER_MAX_WIDTH", defaults.render.max_width).max(1),
                max_height: env_parse("RENDER_MAX_HEIGHT", defaults.render.max_height).max(1),
            },
            image_fetch_timeout: Duration::from_secs(env_parse(
                "IMAGE_FETCH_TIMEOUT_SECS",
                DEFAULT_IMAGE_FETCH_TIMEOUT_SECS,
            )),
            image_max_bytes: env_parse("IMAGE_MAX_BYTES", defaults.image_max_bytes).max(1),
            editor_max_body_bytes: env_parse("EDITOR_MAX_BODY_BYTES", defaults.editor_max_body_bytes).max(1),
            admin_token: env_string("ADMIN_TOKEN"),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
