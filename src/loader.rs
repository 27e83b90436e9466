//! Source loaders for the four datasets a clustering run produces.
//!
//! DESIGN
//! ======
//! Fetching is a seam (`Source`) so the graph never knows whether bytes came
//! from the data server, a local run directory, or a test double. Each load is
//! a single attempt: a non-success status, an I/O error or a payload that is
//! not the expected document fails the load, and no default is substituted.

#[cfg(test)]
#[path = "loader_test.rs"]
mod loader_test;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::HttpTimeouts;
use crate::error::VizError;
use crate::geo::FeatureCollection;

// =============================================================================
// RESOURCES
// =============================================================================

/// The fixed logical datasets of a clustering run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    MeetingPoints,
    GroupBoundaries,
    RunDetails,
}

impl Resource {
    pub const ALL: [Self; 4] = [Self::Users, Self::MeetingPoints, Self::GroupBoundaries, Self::RunDetails];

    /// File name inside the run directory (and under `/data/` when served).
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Users => "usersAssignments.geojson",
            Self::MeetingPoints => "groupMeetingPoints.geojson",
            Self::GroupBoundaries => "groupRegions.geojson",
            Self::RunDetails => "runDetails.json",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// How the clustering run that produced the datasets was configured.
///
/// Optional fields stay optional: fallback display values belong to whoever
/// renders them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub name: String,
    #[serde(default)]
    pub min_occupancy: Option<u32>,
    #[serde(default)]
    pub max_occupancy: Option<u32>,
    #[serde(default)]
    pub max_iters: Option<u32>,
    #[serde(default)]
    pub meeting_point_method: Option<String>,
}

// =============================================================================
// SOURCES
// =============================================================================

/// Raw document fetcher.
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetch the raw JSON text of `resource`.
    async fn fetch(&self, resource: Resource) -> Result<String, VizError>;
}

/// Fetches `{base_url}/data/{file}` over HTTP.
pub struct HttpSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    /// # Errors
    ///
    /// Returns [`VizError::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeouts: HttpTimeouts) -> Result<Self, VizError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| VizError::Config(format!("http client: {e}")))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    #[must_use]
    pub fn url_for(&self, resource: Resource) -> String {
        format!("{}/data/{}", self.base_url, resource.file_name())
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, resource: Resource) -> Result<String, VizError> {
        let url = self.url_for(resource);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| VizError::LoadFailed { resource, reason: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VizError::LoadStatus { resource, status: status.as_u16() });
        }

        response
            .text()
            .await
            .map_err(|e| VizError::LoadFailed { resource, reason: e.to_string() })
    }
}

/// Reads `{run_dir}/{file}` from the local filesystem.
pub struct DirSource {
    run_dir: PathBuf,
}

impl DirSource {
    #[must_use]
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self { run_dir: run_dir.into() }
    }
}

#[async_trait]
impl Source for DirSource {
    async fn fetch(&self, resource: Resource) -> Result<String, VizError> {
        let path = self.run_dir.join(resource.file_name());
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| VizError::LoadFailed { resource, reason: format!("{}: {e}", path.display()) })
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Parse a GeoJSON `FeatureCollection` document.
///
/// # Errors
///
/// Returns [`VizError::Malformed`] when the text is not a feature collection.
pub fn parse_feature_collection(resource: Resource, text: &str) -> Result<FeatureCollection, VizError> {
    serde_json::from_str(text).map_err(|e| VizError::Malformed { resource, reason: e.to_string() })
}

/// Parse the run-details record.
///
/// # Errors
///
/// Returns [`VizError::Malformed`] when the text is not a run-details record.
pub fn parse_run_details(text: &str) -> Result<RunDetails, VizError> {
    serde_json::from_str(text).map_err(|e| VizError::Malformed { resource: Resource::RunDetails, reason: e.to_string() })
}

// =============================================================================
// LOADS
// =============================================================================

/// Fetch and parse one of the three geospatial datasets.
///
/// # Errors
///
/// Propagates the fetch failure or the parse failure unchanged.
pub async fn load_collection(source: &dyn Source, resource: Resource) -> Result<FeatureCollection, VizError> {
    debug!(%resource, "load started");
    let result = source
        .fetch(resource)
        .await
        .and_then(|text| parse_feature_collection(resource, &text));
    match &result {
        Ok(collection) => info!(%resource, features = collection.len(), "load resolved"),
        Err(e) => warn!(%resource, error = %e, "load failed"),
    }
    result
}

/// Fetch and parse the run-details record.
///
/// # Errors
///
/// Propagates the fetch failure or the parse failure unchanged.
pub async fn load_run_details(source: &dyn Source) -> Result<RunDetails, VizError> {
    let resource = Resource::RunDetails;
    debug!(%resource, "load started");
    let result = source.fetch(resource).await.and_then(|text| parse_run_details(&text));
    match &result {
        Ok(details) => info!(%resource, run = %details.name, "load resolved"),
        Err(e) => warn!(%resource, error = %e, "load failed"),
    }
    result
}
