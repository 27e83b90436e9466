use super::*;

#[test]
fn load_failed_is_retryable() {
    let err = VizError::LoadFailed { resource: Resource::Users, reason: "connection reset".into() };
    assert!(err.retryable());
    assert_eq!(err.error_code(), "E_LOAD_FAILED");
}

#[test]
fn load_status_retryable_only_for_server_errors() {
    let server = VizError::LoadStatus { resource: Resource::Users, status: 503 };
    let throttled = VizError::LoadStatus { resource: Resource::Users, status: 429 };
    let missing = VizError::LoadStatus { resource: Resource::Users, status: 404 };
    assert!(server.retryable());
    assert!(throttled.retryable());
    assert!(!missing.retryable());
}

#[test]
fn malformed_and_graph_errors_are_not_retryable() {
    assert!(!VizError::Malformed { resource: Resource::RunDetails, reason: "eof".into() }.retryable());
    assert!(!VizError::Cycle { path: "a -> a".into() }.retryable());
    assert!(!VizError::InconsistentData { group: 3, missing: "boundary" }.retryable());
    assert!(!VizError::EmptyGeometry.retryable());
}

#[test]
fn display_names_the_resource_file() {
    let err = VizError::LoadStatus { resource: Resource::GroupBoundaries, status: 404 };
    assert_eq!(err.to_string(), "failed to load groupRegions.geojson: status 404");
}

#[test]
fn inconsistent_data_display_names_group_and_missing_dataset() {
    let err = VizError::InconsistentData { group: 7, missing: "boundary" };
    assert_eq!(err.to_string(), "group 7 has no matching boundary");
    assert_eq!(err.error_code(), "E_INCONSISTENT_DATA");
}

#[test]
fn errors_compare_by_value_after_clone() {
    let err = VizError::Cycle { path: "bounds -> bounds".into() };
    assert_eq!(err.clone(), err);
}
