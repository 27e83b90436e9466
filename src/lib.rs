//! Reactive derived-state core for visualizing geospatial clustering runs.
//!
//! A clustering run writes four files: user assignments, group meeting
//! points, group boundary hulls and a run-details record. This crate loads
//! them, derives everything a map view needs (bounds, per-group filters and
//! details, cluster-size histogram, renderable layers, camera target) and
//! keeps those products current as the selected group changes.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`graph`] | Memoized, dependency-tracked node graph with async sources |
//! | [`derive`] | Named node keys and their formulas |
//! | [`session`] | Session context: event entry points and the load loop |
//! | [`viewport`] | Camera state, Web Mercator fitting, refit controller |
//! | [`selection`] | Selected-group input and selection events |
//! | [`loader`] | HTTP and run-directory sources, document parsing |
//! | [`geo`] | GeoJSON model and bounding boxes |
//! | [`server`] | Serves a run directory under `/data/` |
//! | [`config`] | Environment configuration |
//! | [`error`] | Shared error enum and error codes |

pub mod config;
pub mod derive;
pub mod error;
pub mod geo;
pub mod graph;
pub mod loader;
pub mod selection;
pub mod server;
pub mod session;
pub mod viewport;

#[cfg(test)]
pub(crate) mod test_helpers;
