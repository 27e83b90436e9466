//! Map camera state and the controller that refits it to the camera target.
//!
//! DESIGN
//! ======
//! The viewport is a graph input shared with the rendering surface: the
//! surface writes it on every pan or resize, and the controller writes it
//! when the camera target changes. Last writer wins.
//!
//! The controller never fits immediately. A new target schedules a fit a
//! short delay later, and the fit reads whatever viewport is current at
//! that point so the latest surface size is used.
//!
//! Fitting follows Web Mercator with 512 px tiles: the target box is
//! projected to world pixels at zoom 0 and the zoom is the log2 of the
//! scale that fits it inside the padded viewport.

#[cfg(test)]
#[path = "viewport_test.rs"]
mod viewport_test;

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::FitSettings;
use crate::derive::CAMERA_TARGET;
use crate::error::VizError;
use crate::geo::BoundingBox;
use crate::graph::{Graph, NodeKey, NodeState};

/// Current camera, shared with the rendering surface.
pub const VIEWPORT: NodeKey<ViewportState> = NodeKey::new("mapview");

/// World size in pixels at zoom 0.
pub const TILE_SIZE: f64 = 512.0;
pub const MAX_ZOOM: f64 = 20.0;
/// Latitude limit of the Web Mercator square.
pub const MAX_LATITUDE: f64 = 85.051_129;

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolator {
    Linear,
    FlyTo,
}

/// How the surface should animate to a new camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub duration_ms: u64,
    pub interpolator: Interpolator,
}

/// Camera parameters. `width`/`height` stay unset until the surface has
/// been laid out.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportState {
    pub longitude: f64,
    pub latitude: f64,
    pub zoom: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

impl ViewportState {
    /// Surface size, once both dimensions are known and non-zero.
    #[must_use]
    pub fn size(&self) -> Option<(f64, f64)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some((w, h)),
            _ => None,
        }
    }

    /// Same viewport with a different surface size.
    #[must_use]
    pub fn with_size(self, width: f64, height: f64) -> Self {
        Self { width: Some(width), height: Some(height), ..self }
    }
}

// =============================================================================
// WEB MERCATOR
// =============================================================================

/// Project `(lon, lat)` to world pixels at zoom 0, y growing southwards.
#[must_use]
pub fn project(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = TILE_SIZE * (lon.to_radians() + PI) / (2.0 * PI);
    let y = TILE_SIZE * (PI - (PI / 4.0 + lat / 2.0).tan().ln()) / (2.0 * PI);
    (x, y)
}

/// Inverse of [`project`].
#[must_use]
pub fn unproject(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / TILE_SIZE * 2.0 * PI - PI).to_degrees();
    let lat = (2.0 * (PI - y / TILE_SIZE * 2.0 * PI).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Pixels kept clear on every side.
    pub padding: f64,
    pub max_zoom: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self { padding: 0.0, max_zoom: MAX_ZOOM }
    }
}

/// Camera centre and zoom framing a box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFit {
    pub longitude: f64,
    pub latitude: f64,
    pub zoom: f64,
}

/// Fit `bounds` inside a `width` x `height` surface.
///
/// A degenerate box needs an unbounded scale and lands on `max_zoom`.
/// Padding larger than the surface leaves a one pixel target.
#[must_use]
pub fn fit_bounds(bounds: &BoundingBox, width: f64, height: f64, options: FitOptions) -> CameraFit {
    let (west, north) = project(bounds.min_lon, bounds.max_lat);
    let (east, south) = project(bounds.max_lon, bounds.min_lat);
    let span_x = (east - west).abs();
    let span_y = (south - north).abs();

    let target_w = (width - 2.0 * options.padding).max(1.0);
    let target_h = (height - 2.0 * options.padding).max(1.0);
    let scale = (target_w / span_x).min(target_h / span_y);
    let zoom = scale.log2().min(options.max_zoom);

    let (longitude, latitude) = unproject((west + east) / 2.0, (north + south) / 2.0);
    CameraFit { longitude, latitude, zoom }
}

// =============================================================================
// CONTROLLER
// =============================================================================

struct PendingFit {
    target: BoundingBox,
    due: Instant,
}

/// Watches the camera target and refits the viewport after a delay.
pub struct ViewportController {
    settings: FitSettings,
    observed: Option<Arc<BoundingBox>>,
    failed: bool,
    pending: Option<PendingFit>,
}

impl ViewportController {
    #[must_use]
    pub fn new(settings: FitSettings) -> Self {
        Self { settings, observed: None, failed: false, pending: None }
    }

    /// Read the camera target and schedule a fit if it is a new value.
    ///
    /// A pending target schedules nothing; a failed one is logged once.
    pub fn observe(&mut self, graph: &mut Graph) {
        match graph.get(&CAMERA_TARGET) {
            NodeState::Ready(target) => {
                self.failed = false;
                if self.observed.as_ref().is_some_and(|seen| Arc::ptr_eq(seen, &target)) {
                    return;
                }
                let due = Instant::now() + Duration::from_millis(self.settings.delay_ms);
                debug!(bounds = ?target.to_array(), delay_ms = self.settings.delay_ms, "viewport fit scheduled");
                self.pending = Some(PendingFit { target: *target, due });
                self.observed = Some(target);
            }
            NodeState::Pending => {}
            NodeState::Failed(e) => {
                if !self.failed {
                    warn!(error = %e, "camera target unavailable; viewport left as is");
                    self.failed = true;
                }
            }
        }
    }

    /// When the scheduled fit is due, if one is scheduled.
    #[must_use]
    pub fn due(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.due)
    }

    /// Apply the scheduled fit to the current viewport.
    ///
    /// Returns whether the viewport was written. The fit is dropped when the
    /// surface size is not known yet.
    ///
    /// # Errors
    ///
    /// Propagates a failed read or write of the viewport node.
    pub fn apply_fit(&mut self, graph: &mut Graph) -> Result<bool, VizError> {
        let Some(fit) = self.pending.take() else {
            return Ok(false);
        };
        let current = match graph.get(&VIEWPORT) {
            NodeState::Ready(v) => *v,
            NodeState::Pending => return Ok(false),
            NodeState::Failed(e) => return Err(e),
        };
        let Some((width, height)) = current.size() else {
            debug!("viewport size unknown; fit skipped");
            return Ok(false);
        };

        let options = FitOptions { padding: self.settings.padding_px, max_zoom: MAX_ZOOM };
        let camera = fit_bounds(&fit.target, width, height, options);
        let next = ViewportState {
            longitude: camera.longitude,
            latitude: camera.latitude,
            zoom: camera.zoom,
            transition: Some(Transition { duration_ms: self.settings.transition_ms, interpolator: Interpolator::FlyTo }),
            ..current
        };
        info!(longitude = next.longitude, latitude = next.latitude, zoom = next.zoom, "viewport fitted");
        graph.set(&VIEWPORT, next)?;
        Ok(true)
    }
}
