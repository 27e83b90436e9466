//! GeoJSON data model and bounding-box computation.
//!
//! DESIGN
//! ======
//! Geometry stays opaque to the rest of the crate: the only thing the core
//! ever asks of it is the axis-aligned box around its coordinates. Features
//! keep their properties as raw JSON so downstream bundles can hand them to
//! the rendering surface untouched.

#[cfg(test)]
#[path = "geo_test.rs"]
mod geo_test;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::VizError;

/// Group identifier carried in every feature's `label` property.
pub type GroupId = i64;

/// Free-form feature properties.
pub type Properties = Map<String, Value>;

/// Property key holding the group id.
pub const LABEL_KEY: &str = "label";

/// Property key holding a user's identifier.
pub const USER_ID_KEY: &str = "user_id";

// =============================================================================
// GEOMETRY
// =============================================================================

/// A GeoJSON position: `[lon, lat]` with an optional trailing altitude.
pub type Position = Vec<f64>;

/// GeoJSON geometry object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    #[must_use]
    pub fn point(lon: f64, lat: f64) -> Self {
        Self::Point { coordinates: vec![lon, lat] }
    }

    /// Single-ring polygon from a list of `(lon, lat)` vertices.
    #[must_use]
    pub fn polygon(ring: &[(f64, f64)]) -> Self {
        let ring = ring.iter().map(|&(lon, lat)| vec![lon, lat]).collect();
        Self::Polygon { coordinates: vec![ring] }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum FeatureType {
    Feature,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum FeatureCollectionType {
    FeatureCollection,
}

// =============================================================================
// FEATURES
// =============================================================================

/// A geometry plus its properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    kind: FeatureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Properties,
}

impl Feature {
    #[must_use]
    pub fn new(geometry: Geometry, properties: Properties) -> Self {
        Self { kind: FeatureType::Feature, id: None, geometry: Some(geometry), properties }
    }

    /// Group id from the `label` property.
    ///
    /// Integral floats (`3.0`) are accepted since dataframe exports often
    /// write integer columns that way. Anything else means "no group".
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn label(&self) -> Option<GroupId> {
        let value = self.properties.get(LABEL_KEY)?;
        if let Some(label) = value.as_i64() {
            return Some(label);
        }
        let float = value.as_f64()?;
        (float.is_finite() && float.fract() == 0.0).then_some(float as GroupId)
    }
}

/// An ordered collection of features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    kind: FeatureCollectionType,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    #[must_use]
    pub fn new(features: Vec<Feature>) -> Self {
        Self { kind: FeatureCollectionType::FeatureCollection, features }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features whose label equals `group`, in source order.
    pub fn with_label(&self, group: GroupId) -> impl Iterator<Item = &Feature> {
        self.features.iter().filter(move |f| f.label() == Some(group))
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Properties, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Properties>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// BOUNDING BOX
// =============================================================================

/// Axis-aligned box `[min_lon, min_lat, max_lon, max_lat]`.
///
/// Invariant: `min <= max` on both axes. Point boxes are valid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn from_point(lon: f64, lat: f64) -> Self {
        Self { min_lon: lon, min_lat: lat, max_lon: lon, max_lat: lat }
    }

    /// Grow the box to include `(lon, lat)`.
    pub fn extend(&mut self, lon: f64, lat: f64) {
        self.min_lon = self.min_lon.min(lon);
        self.min_lat = self.min_lat.min(lat);
        self.max_lon = self.max_lon.max(lon);
        self.max_lat = self.max_lat.max(lat);
    }

    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        ((self.min_lon + self.max_lon) * 0.5, (self.min_lat + self.max_lat) * 0.5)
    }

    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.min_lon == self.max_lon || self.min_lat == self.max_lat
    }

    #[must_use]
    pub fn to_array(self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(a: [f64; 4]) -> Self {
        Self { min_lon: a[0], min_lat: a[1], max_lon: a[2], max_lat: a[3] }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        b.to_array()
    }
}

/// Anything with coordinates that a bounding box can enclose.
pub trait Bounded {
    /// Call `visit` with every `(lon, lat)` pair in the input.
    fn for_each_position(&self, visit: &mut dyn FnMut(f64, f64));

    /// Minimal box enclosing every position.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::EmptyGeometry`] when the input has no positions.
    /// Callers are expected not to ask for the box of empty input.
    fn bounding_box(&self) -> Result<BoundingBox, VizError> {
        let mut acc: Option<BoundingBox> = None;
        self.for_each_position(&mut |lon, lat| match acc.as_mut() {
            Some(b) => b.extend(lon, lat),
            None => acc = Some(BoundingBox::from_point(lon, lat)),
        });
        acc.ok_or(VizError::EmptyGeometry)
    }
}

/// Box around a geometry, feature or collection.
///
/// # Errors
///
/// See [`Bounded::bounding_box`].
pub fn bounding_box<B: Bounded + ?Sized>(input: &B) -> Result<BoundingBox, VizError> {
    input.bounding_box()
}

fn visit_position(p: &[f64], visit: &mut dyn FnMut(f64, f64)) {
    // Positions with fewer than two ordinates carry no location.
    if let [lon, lat, ..] = p {
        visit(*lon, *lat);
    }
}

impl Bounded for Geometry {
    fn for_each_position(&self, visit: &mut dyn FnMut(f64, f64)) {
        match self {
            Self::Point { coordinates } => visit_position(coordinates, visit),
            Self::MultiPoint { coordinates } | Self::LineString { coordinates } => {
                for p in coordinates {
                    visit_position(p, visit);
                }
            }
            Self::MultiLineString { coordinates } | Self::Polygon { coordinates } => {
                for p in coordinates.iter().flatten() {
                    visit_position(p, visit);
                }
            }
            Self::MultiPolygon { coordinates } => {
                for p in coordinates.iter().flatten().flatten() {
                    visit_position(p, visit);
                }
            }
            Self::GeometryCollection { geometries } => {
                for g in geometries {
                    g.for_each_position(visit);
                }
            }
        }
    }
}

impl Bounded for Feature {
    fn for_each_position(&self, visit: &mut dyn FnMut(f64, f64)) {
        if let Some(geometry) = &self.geometry {
            geometry.for_each_position(visit);
        }
    }
}

impl Bounded for FeatureCollection {
    fn for_each_position(&self, visit: &mut dyn FnMut(f64, f64)) {
        for feature in &self.features {
            feature.for_each_position(visit);
        }
    }
}
