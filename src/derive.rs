//! Named derivations: the node keys a session exposes and their formulas.
//!
//! DESIGN
//! ======
//! Every formula is a plain function over already-loaded values so it can be
//! tested without a graph. [`register`] wires those functions into nodes;
//! each node body only reads its inputs through the scope and delegates.
//!
//! SYSTEM CONTEXT
//! ==============
//! ```text
//! users ──────────┬─> clusterSizeCounts ──> clusterSizeHistogram
//!                 ├─> bounds ─────────────────────────────┐
//! meetingPoints ──┼─> groupIds ──> minMaxLabels ──┐       │
//! groupBoundaries ┤                               v       v
//! selectedGroup ──┴─> selectedGroupDetails ──> filterRange / cameraTarget
//!                                                 └──> layers
//! ```

#[cfg(test)]
#[path = "derive_test.rs"]
mod derive_test;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::VizError;
use crate::geo::{BoundingBox, Feature, FeatureCollection, GroupId, Properties, bounding_box};
use crate::graph::{Graph, NodeKey, Scope, Suspend};
use crate::loader::{self, Resource, RunDetails, Source};
use crate::selection::SELECTED_GROUP;

/// Half-width of the label window shown for a selected group.
pub const SELECTION_EPSILON: f64 = 0.1;

/// Number of equal-width bins in the cluster-size histogram.
pub const HISTOGRAM_BINS: usize = 25;

// =============================================================================
// NODE KEYS
// =============================================================================

pub const USERS: NodeKey<FeatureCollection> = NodeKey::new("users");
pub const MEETING_POINTS: NodeKey<FeatureCollection> = NodeKey::new("meetingPoints");
pub const GROUP_BOUNDARIES: NodeKey<FeatureCollection> = NodeKey::new("groupBoundaries");
pub const RUN_DETAILS: NodeKey<RunDetails> = NodeKey::new("runDetails");

pub const CLUSTER_SIZE_COUNTS: NodeKey<ClusterSizeCounts> = NodeKey::new("clusterSizeCounts");
pub const CLUSTER_SIZE_HISTOGRAM: NodeKey<Histogram> = NodeKey::new("clusterSizeHistogram");
pub const BOUNDS: NodeKey<BoundingBox> = NodeKey::new("bounds");
pub const GROUP_IDS: NodeKey<Vec<GroupId>> = NodeKey::new("groupIds");
pub const MIN_MAX_LABELS: NodeKey<[GroupId; 2]> = NodeKey::new("minMaxLabels");
pub const SELECTED_GROUP_DETAILS: NodeKey<Option<GroupDetails>> = NodeKey::new("selectedGroupDetails");
pub const FILTER_RANGE: NodeKey<FilterRange> = NodeKey::new("filterRange");
pub const LAYERS: NodeKey<Vec<LayerSpec>> = NodeKey::new("layers");
pub const CAMERA_TARGET: NodeKey<BoundingBox> = NodeKey::new("cameraTarget");

// =============================================================================
// DERIVED TYPES
// =============================================================================

/// Users per group, ordered by group id.
pub type ClusterSizeCounts = BTreeMap<GroupId, usize>;

/// Everything shown for the selected group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupDetails {
    #[serde(skip)]
    pub group: GroupId,
    /// Properties of every user in the group, in source order.
    pub users: Vec<Properties>,
    #[serde(rename = "selectedGroup")]
    pub boundary: Properties,
    #[serde(rename = "selectedMeetingPoint")]
    pub meeting_point: Properties,
    /// Box around the group's boundary polygon.
    pub bounds: BoundingBox,
}

/// Inclusive `[lo, hi]` window over feature labels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct FilterRange {
    pub lo: f64,
    pub hi: f64,
}

impl FilterRange {
    /// Window isolating a single group.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn around(group: GroupId) -> Self {
        let g = group as f64;
        Self { lo: g - SELECTION_EPSILON, hi: g + SELECTION_EPSILON }
    }

    /// Window spanning every group.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn spanning([min, max]: [GroupId; 2]) -> Self {
        Self { lo: min as f64, hi: max as f64 }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn contains(&self, label: GroupId) -> bool {
        let l = label as f64;
        l >= self.lo && l <= self.hi
    }
}

impl From<[f64; 2]> for FilterRange {
    fn from([lo, hi]: [f64; 2]) -> Self {
        Self { lo, hi }
    }
}

impl From<FilterRange> for [f64; 2] {
    fn from(r: FilterRange) -> Self {
        [r.lo, r.hi]
    }
}

/// One bar of the cluster-size histogram, covering `[lo, hi)`.
/// The last bin also holds values equal to its upper edge.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
    /// `count` over the number of groups.
    pub fraction: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Histogram {
    pub bins: Vec<HistogramBin>,
}

impl Histogram {
    /// Number of values binned.
    #[must_use]
    pub fn total(&self) -> usize {
        self.bins.iter().map(|b| b.count).sum()
    }
}

/// Renderable layers, in draw order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerId {
    Hulls,
    Users,
    MeetingPoints,
}

impl LayerId {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hulls => "hulls",
            Self::Users => "users",
            Self::MeetingPoints => "meeting-points",
        }
    }
}

/// A layer's data paired with the shared label window.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSpec {
    pub id: LayerId,
    pub data: Arc<FeatureCollection>,
    pub filter_range: FilterRange,
    /// Whether clicking a feature selects its group.
    pub pickable: bool,
}

impl LayerSpec {
    /// Features inside the filter window, in source order.
    pub fn visible_features(&self) -> impl Iterator<Item = &Feature> {
        self.data
            .features
            .iter()
            .filter(|f| f.label().is_some_and(|label| self.filter_range.contains(label)))
    }

    /// Group of the feature at `index`, if this layer is pickable.
    #[must_use]
    pub fn pick(&self, index: usize) -> Option<GroupId> {
        if !self.pickable {
            return None;
        }
        self.data.features.get(index)?.label()
    }
}

// =============================================================================
// FORMULAS
// =============================================================================

/// Number of users carrying each label. Unlabelled users are not counted.
#[must_use]
pub fn cluster_size_counts(users: &FeatureCollection) -> ClusterSizeCounts {
    let mut counts = ClusterSizeCounts::new();
    for label in users.features.iter().filter_map(Feature::label) {
        *counts.entry(label).or_default() += 1;
    }
    counts
}

/// Meeting-point labels in source order, duplicates kept.
#[must_use]
pub fn group_ids(meeting_points: &FeatureCollection) -> Vec<GroupId> {
    meeting_points.features.iter().filter_map(Feature::label).collect()
}

/// `[min, max]` of the group ids.
///
/// # Errors
///
/// Returns [`VizError::NoGroups`] for an empty list.
pub fn min_max_labels(ids: &[GroupId]) -> Result<[GroupId; 2], VizError> {
    let min = ids.iter().min().ok_or(VizError::NoGroups)?;
    let max = ids.iter().max().ok_or(VizError::NoGroups)?;
    Ok([*min, *max])
}

/// Bundle the features of `group`.
///
/// # Errors
///
/// Returns [`VizError::InconsistentData`] when the group has no boundary or
/// no meeting point, and [`VizError::EmptyGeometry`] when its boundary has no
/// coordinates.
pub fn group_details(
    group: GroupId,
    users: &FeatureCollection,
    boundaries: &FeatureCollection,
    meeting_points: &FeatureCollection,
) -> Result<GroupDetails, VizError> {
    let boundary = boundaries
        .with_label(group)
        .next()
        .ok_or(VizError::InconsistentData { group, missing: "boundary" })?;
    let meeting_point = meeting_points
        .with_label(group)
        .next()
        .ok_or(VizError::InconsistentData { group, missing: "meeting point" })?;

    Ok(GroupDetails {
        group,
        users: users.with_label(group).map(|u| u.properties.clone()).collect(),
        boundary: boundary.properties.clone(),
        meeting_point: meeting_point.properties.clone(),
        bounds: bounding_box(boundary)?,
    })
}

/// Bin cluster sizes into `bins` equal-width buckets over `[min, max]`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn cluster_size_histogram(counts: &ClusterSizeCounts, bins: usize) -> Histogram {
    let sizes: Vec<f64> = counts.values().map(|&n| n as f64).collect();
    let (Some(min), Some(max)) = (
        sizes.iter().copied().reduce(f64::min),
        sizes.iter().copied().reduce(f64::max),
    ) else {
        return Histogram::default();
    };
    if bins == 0 {
        return Histogram::default();
    }
    let total = sizes.len() as f64;

    if max <= min {
        let bin = HistogramBin { lo: min, hi: min + 1.0, count: sizes.len(), fraction: 1.0 };
        return Histogram { bins: vec![bin] };
    }

    let width = (max - min) / bins as f64;
    let mut tallies = vec![0_usize; bins];
    for size in &sizes {
        let index = (((size - min) / width).floor() as usize).min(bins - 1);
        tallies[index] += 1;
    }
    let bins = tallies
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lo: min + width * i as f64,
            hi: min + width * (i + 1) as f64,
            count,
            fraction: count as f64 / total,
        })
        .collect();
    Histogram { bins }
}

/// The three map layers sharing one label window.
#[must_use]
pub fn layers(
    boundaries: Arc<FeatureCollection>,
    users: Arc<FeatureCollection>,
    meeting_points: Arc<FeatureCollection>,
    filter_range: FilterRange,
) -> Vec<LayerSpec> {
    vec![
        LayerSpec { id: LayerId::Hulls, data: boundaries, filter_range, pickable: true },
        LayerSpec { id: LayerId::Users, data: users, filter_range, pickable: false },
        LayerSpec { id: LayerId::MeetingPoints, data: meeting_points, filter_range, pickable: false },
    ]
}

/// Box the camera should frame: the selected group, else the whole dataset.
#[must_use]
pub fn camera_target(details: Option<&GroupDetails>, bounds: BoundingBox) -> BoundingBox {
    details.map_or(bounds, |d| d.bounds)
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Register the four dataset sources and every derived node.
///
/// The selection input is registered by the caller.
///
/// # Errors
///
/// Returns [`VizError::DuplicateNode`] if any key is already registered.
pub fn register(graph: &mut Graph, source: Arc<dyn Source>) -> Result<(), VizError> {
    for (key, resource) in [
        (USERS, Resource::Users),
        (MEETING_POINTS, Resource::MeetingPoints),
        (GROUP_BOUNDARIES, Resource::GroupBoundaries),
    ] {
        let source = Arc::clone(&source);
        graph.source(key, move || async move { loader::load_collection(source.as_ref(), resource).await })?;
    }
    graph.source(RUN_DETAILS, move || async move { loader::load_run_details(source.as_ref()).await })?;

    graph.derived(CLUSTER_SIZE_COUNTS, |scope| Ok(cluster_size_counts(&*scope.get(&USERS)?)))?;
    graph.derived(CLUSTER_SIZE_HISTOGRAM, |scope| {
        Ok(cluster_size_histogram(&*scope.get(&CLUSTER_SIZE_COUNTS)?, HISTOGRAM_BINS))
    })?;
    graph.derived(BOUNDS, |scope| Ok(bounding_box(&*scope.get(&USERS)?)?))?;
    graph.derived(GROUP_IDS, |scope| Ok(group_ids(&*scope.get(&MEETING_POINTS)?)))?;
    graph.derived(MIN_MAX_LABELS, |scope| Ok(min_max_labels(&*scope.get(&GROUP_IDS)?)?))?;
    graph.derived(SELECTED_GROUP_DETAILS, selected_group_details)?;
    graph.derived(FILTER_RANGE, |scope| match *scope.get(&SELECTED_GROUP)? {
        Some(group) => Ok(FilterRange::around(group)),
        None => Ok(FilterRange::spanning(*scope.get(&MIN_MAX_LABELS)?)),
    })?;
    graph.derived(LAYERS, |scope| {
        let boundaries = scope.get(&GROUP_BOUNDARIES)?;
        let users = scope.get(&USERS)?;
        let meeting_points = scope.get(&MEETING_POINTS)?;
        Ok(layers(boundaries, users, meeting_points, *scope.get(&FILTER_RANGE)?))
    })?;
    graph.derived(CAMERA_TARGET, |scope| {
        let details = scope.get(&SELECTED_GROUP_DETAILS)?;
        let bounds = scope.get(&BOUNDS)?;
        Ok(camera_target((*details).as_ref(), *bounds))
    })?;
    Ok(())
}

/// All three datasets are read before the selection so the details stay
/// pending (or failed) while any of them is, selection or not.
fn selected_group_details(scope: &mut Scope<'_>) -> Result<Option<GroupDetails>, Suspend> {
    let boundaries = scope.get(&GROUP_BOUNDARIES)?;
    let users = scope.get(&USERS)?;
    let meeting_points = scope.get(&MEETING_POINTS)?;
    let Some(group) = *scope.get(&SELECTED_GROUP)? else {
        return Ok(None);
    };
    Ok(Some(group_details(group, &users, &boundaries, &meeting_points)?))
}
