//! Runtime configuration parsed from environment variables.

use std::path::PathBuf;

use crate::error::VizError;
use crate::geo::GroupId;

pub const DEFAULT_RUN_DIR: &str = ".";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FIT_PADDING_PX: u64 = 200;
pub const DEFAULT_FIT_DELAY_MS: u64 = 10;
pub const DEFAULT_TRANSITION_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Load a run, settle the graph and log the derived products.
    Inspect,
    /// Serve a run directory under `/data/`.
    Serve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// How the viewport controller fits a target box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSettings {
    pub padding_px: f64,
    pub delay_ms: u64,
    pub transition_ms: u64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            padding_px: u64_to_f64(DEFAULT_FIT_PADDING_PX),
            delay_ms: DEFAULT_FIT_DELAY_MS,
            transition_ms: DEFAULT_TRANSITION_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VizConfig {
    pub mode: Mode,
    /// Data server base URL; when unset, datasets are read from `run_dir`.
    pub data_url: Option<String>,
    pub run_dir: PathBuf,
    pub port: u16,
    pub timeouts: HttpTimeouts,
    pub fit: FitSettings,
    /// Rendering surface size in pixels, when known up front.
    pub viewport_size: Option<(f64, f64)>,
    /// Group to select once the datasets have loaded.
    pub select_group: Option<GroupId>,
}

impl Default for VizConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Inspect,
            data_url: None,
            run_dir: PathBuf::from(DEFAULT_RUN_DIR),
            port: DEFAULT_PORT,
            timeouts: HttpTimeouts::default(),
            fit: FitSettings::default(),
            viewport_size: None,
            select_group: None,
        }
    }
}

impl VizConfig {
    /// Build typed config from environment variables.
    ///
    /// All optional:
    /// - `VIZ_MODE`: `inspect` (default) or `serve`
    /// - `VIZ_DATA_URL`: data server base URL; unset reads `VIZ_RUN_DIR` directly
    /// - `VIZ_RUN_DIR`: clustering run output directory, default `.`
    /// - `VIZ_PORT`: default 8000
    /// - `VIZ_REQUEST_TIMEOUT_SECS`: default 30
    /// - `VIZ_CONNECT_TIMEOUT_SECS`: default 10
    /// - `VIZ_FIT_PADDING_PX`: default 200
    /// - `VIZ_FIT_DELAY_MS`: default 10
    /// - `VIZ_TRANSITION_MS`: default 1000
    /// - `VIZ_VIEWPORT_WIDTH` / `VIZ_VIEWPORT_HEIGHT`: both or neither
    /// - `VIZ_SELECT_GROUP`: group id to select after loading
    ///
    /// # Errors
    ///
    /// Returns [`VizError::Config`] for any value that does not parse.
    pub fn from_env() -> Result<Self, VizError> {
        Self::from_vars(|key| std::env::var_os(key).map(|v| v.to_string_lossy().into_owned()))
    }

    /// Same as [`VizConfig::from_env`], reading variables through `var`.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::Config`] for any value that does not parse.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, VizError> {
        let mode = parse_mode(var("VIZ_MODE").as_deref())?;
        let data_url = var("VIZ_DATA_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        let run_dir = var("VIZ_RUN_DIR").map_or_else(|| PathBuf::from(DEFAULT_RUN_DIR), PathBuf::from);

        let port = match var("VIZ_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| VizError::Config(format!("VIZ_PORT is not a port number: {raw}")))?,
            None => DEFAULT_PORT,
        };
        let timeouts = HttpTimeouts {
            request_secs: env_parse_u64(&var, "VIZ_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: env_parse_u64(&var, "VIZ_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        let fit = FitSettings {
            padding_px: u64_to_f64(env_parse_u64(&var, "VIZ_FIT_PADDING_PX", DEFAULT_FIT_PADDING_PX)?),
            delay_ms: env_parse_u64(&var, "VIZ_FIT_DELAY_MS", DEFAULT_FIT_DELAY_MS)?,
            transition_ms: env_parse_u64(&var, "VIZ_TRANSITION_MS", DEFAULT_TRANSITION_MS)?,
        };

        let width = env_parse_f64(&var, "VIZ_VIEWPORT_WIDTH")?;
        let height = env_parse_f64(&var, "VIZ_VIEWPORT_HEIGHT")?;
        let viewport_size = match (width, height) {
            (Some(w), Some(h)) => Some((w, h)),
            (None, None) => None,
            _ => {
                return Err(VizError::Config(
                    "VIZ_VIEWPORT_WIDTH and VIZ_VIEWPORT_HEIGHT must be set together".into(),
                ));
            }
        };

        let select_group = match var("VIZ_SELECT_GROUP") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<GroupId>()
                    .map_err(|_| VizError::Config(format!("VIZ_SELECT_GROUP is not a group id: {raw}")))?,
            ),
            None => None,
        };

        Ok(Self { mode, data_url, run_dir, port, timeouts, fit, viewport_size, select_group })
    }
}

fn env_parse_u64(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64, VizError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| VizError::Config(format!("{key} is not a non-negative integer: {raw}"))),
        None => Ok(default),
    }
}

fn env_parse_f64(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<f64>, VizError> {
    let Some(raw) = var(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(Some(v)),
        _ => Err(VizError::Config(format!("{key} is not a positive size: {raw}"))),
    }
}

fn parse_mode(raw: Option<&str>) -> Result<Mode, VizError> {
    match raw.map(str::trim).unwrap_or("inspect") {
        "inspect" => Ok(Mode::Inspect),
        "serve" => Ok(Mode::Serve),
        other => Err(VizError::Config(format!("unknown VIZ_MODE '{other}' (expected 'inspect' or 'serve')"))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn u64_to_f64(v: u64) -> f64 {
    v as f64
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
