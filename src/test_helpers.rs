//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::VizError;
use crate::geo::{Feature, FeatureCollection, Geometry, LABEL_KEY, Properties, USER_ID_KEY};
use crate::loader::{Resource, Source};

pub fn user(user_id: &str, label: i64, lon: f64, lat: f64) -> Feature {
    let mut props = Properties::new();
    props.insert(USER_ID_KEY.into(), json!(user_id));
    props.insert(LABEL_KEY.into(), json!(label));
    Feature::new(Geometry::point(lon, lat), props)
}

pub fn meeting_point(label: i64, lon: f64, lat: f64) -> Feature {
    let mut props = Properties::new();
    props.insert(LABEL_KEY.into(), json!(label));
    props.insert("name".into(), json!(format!("meet-{label}")));
    Feature::new(Geometry::point(lon, lat), props)
}

/// Square boundary of half-width `r` around `(lon, lat)`.
pub fn boundary(label: i64, lon: f64, lat: f64, r: f64) -> Feature {
    let mut props = Properties::new();
    props.insert(LABEL_KEY.into(), json!(label));
    let ring = [(lon - r, lat - r), (lon + r, lat - r), (lon + r, lat + r), (lon - r, lat + r), (lon - r, lat - r)];
    Feature::new(Geometry::polygon(&ring), props)
}

/// Two groups: 1 around (0, 0) with two users, 2 around (10, 10) with one.
pub fn users() -> FeatureCollection {
    FeatureCollection::new(vec![
        user("alice", 1, -0.5, 0.5),
        user("bob", 1, 0.5, -0.5),
        user("carol", 2, 10.0, 10.0),
    ])
}

pub fn meeting_points() -> FeatureCollection {
    FeatureCollection::new(vec![meeting_point(1, 0.0, 0.0), meeting_point(2, 10.0, 10.0)])
}

pub fn boundaries() -> FeatureCollection {
    FeatureCollection::new(vec![boundary(1, 0.0, 0.0, 1.0), boundary(2, 10.0, 10.0, 0.5)])
}

pub fn run_details_json() -> Value {
    json!({
        "name": "test-run",
        "minOccupancy": 2,
        "maxOccupancy": 8,
        "meetingPointMethod": "centroid"
    })
}

/// Canned documents for every resource.
pub fn documents() -> HashMap<Resource, String> {
    let mut docs = HashMap::new();
    docs.insert(Resource::Users, to_text(&users()));
    docs.insert(Resource::MeetingPoints, to_text(&meeting_points()));
    docs.insert(Resource::GroupBoundaries, to_text(&boundaries()));
    docs.insert(Resource::RunDetails, run_details_json().to_string());
    docs
}

fn to_text(fc: &FeatureCollection) -> String {
    serde_json::to_string(fc).unwrap()
}

/// What the mock does when a resource is fetched.
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Status(u16),
    Hang,
}

/// In-memory source counting fetches per resource.
pub struct MockSource {
    replies: Mutex<HashMap<Resource, MockReply>>,
    fetches: Mutex<HashMap<Resource, usize>>,
    total: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        let replies = documents()
            .into_iter()
            .map(|(r, text)| (r, MockReply::Text(text)))
            .collect();
        Self { replies: Mutex::new(replies), fetches: Mutex::new(HashMap::new()), total: AtomicUsize::new(0) }
    }

    pub fn with_reply(self, resource: Resource, reply: MockReply) -> Self {
        self.replies.lock().unwrap().insert(resource, reply);
        self
    }

    pub fn with_users(self, users: &FeatureCollection) -> Self {
        self.with_reply(Resource::Users, MockReply::Text(to_text(users)))
    }

    pub fn fetches(&self, resource: Resource) -> usize {
        self.fetches.lock().unwrap().get(&resource).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for MockSource {
    async fn fetch(&self, resource: Resource) -> Result<String, VizError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.fetches.lock().unwrap().entry(resource).or_default() += 1;
        let reply = self.replies.lock().unwrap().get(&resource).cloned();
        match reply {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Status(status)) => Err(VizError::LoadStatus { resource, status }),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(VizError::LoadFailed { resource, reason: "no such resource".into() }),
        }
    }
}

/// Fresh directory under the system temp dir holding every canned document.
pub fn write_run_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("meetup-viz-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    for (resource, text) in documents() {
        std::fs::write(dir.join(resource.file_name()), text).unwrap();
    }
    dir
}
