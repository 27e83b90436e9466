use super::*;
use crate::loader::Resource;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const A: NodeKey<i64> = NodeKey::new("a");
const B: NodeKey<i64> = NodeKey::new("b");
const C: NodeKey<i64> = NodeKey::new("c");
const FLAG: NodeKey<bool> = NodeKey::new("flag");
const LOADED: NodeKey<i64> = NodeKey::new("loaded");

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn count(c: &Arc<AtomicUsize>) -> usize {
    c.load(Ordering::SeqCst)
}

/// `b = a * 2`, counting recomputes.
fn doubled_graph(calls: &Arc<AtomicUsize>) -> Graph {
    let mut graph = Graph::new();
    graph.input(A, 21).unwrap();
    let calls = Arc::clone(calls);
    graph
        .derived(B, move |scope| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(*scope.get(&A)? * 2)
        })
        .unwrap();
    graph
}

fn failed_load() -> VizError {
    VizError::LoadStatus { resource: Resource::Users, status: 500 }
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn duplicate_key_is_rejected() {
    let mut graph = Graph::new();
    graph.input(A, 1).unwrap();
    assert_eq!(graph.input(A, 2), Err(VizError::DuplicateNode("a")));
}

#[test]
fn unknown_key_reads_as_failed() {
    let mut graph = Graph::new();
    assert_eq!(graph.get(&A), NodeState::Failed(VizError::UnknownNode("a")));
}

#[test]
fn wrongly_typed_key_reads_as_type_mismatch() {
    let mut graph = Graph::new();
    graph.input(A, 1).unwrap();
    let as_string: NodeKey<String> = NodeKey::new("a");
    assert_eq!(graph.get(&as_string), NodeState::Failed(VizError::TypeMismatch("a")));
    assert_eq!(graph.set(&as_string, "x".into()), Err(VizError::TypeMismatch("a")));
}

#[test]
fn derived_nodes_are_not_writable() {
    let calls = counter();
    let mut graph = doubled_graph(&calls);
    assert_eq!(graph.set(&B, 3), Err(VizError::ReadOnlyNode("b")));
}

// =============================================================================
// Memoization
// =============================================================================

#[test]
fn derived_is_lazy() {
    let calls = counter();
    let _graph = doubled_graph(&calls);
    assert_eq!(count(&calls), 0);
}

#[test]
fn rereading_unchanged_node_returns_same_value_without_recompute() {
    let calls = counter();
    let mut graph = doubled_graph(&calls);
    let first = graph.get(&B).ready().unwrap();
    let second = graph.get(&B).ready().unwrap();
    assert_eq!(*first, 42);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(count(&calls), 1);
}

#[test]
fn writing_input_recomputes_on_next_read_only() {
    let calls = counter();
    let mut graph = doubled_graph(&calls);
    let before = graph.get(&B).ready().unwrap();
    graph.set(&A, 5).unwrap();
    assert!(graph.is_stale(&B));
    assert_eq!(count(&calls), 1);
    let after = graph.get(&B).ready().unwrap();
    assert_eq!(*after, 10);
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(count(&calls), 2);
}

#[test]
fn unrelated_node_is_not_invalidated() {
    let b_calls = counter();
    let c_calls = counter();
    let mut graph = doubled_graph(&b_calls);
    graph.input(FLAG, false).unwrap();
    let cc = Arc::clone(&c_calls);
    graph
        .derived(C, move |scope| {
            cc.fetch_add(1, Ordering::SeqCst);
            Ok(i64::from(*scope.get(&FLAG)?))
        })
        .unwrap();
    let c_before = graph.get(&C).ready().unwrap();
    graph.get(&B);

    graph.set(&A, 1).unwrap();
    assert!(!graph.is_stale(&C));
    let c_after = graph.get(&C).ready().unwrap();
    assert!(Arc::ptr_eq(&c_before, &c_after));
    assert_eq!(count(&c_calls), 1);
}

#[test]
fn transitive_reads_recompute_in_dependency_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut graph = Graph::new();
    graph.input(A, 1).unwrap();
    let o = Arc::clone(&order);
    graph
        .derived(B, move |scope| {
            let a = *scope.get(&A)?;
            o.lock().unwrap().push("b");
            Ok(a + 1)
        })
        .unwrap();
    let o = Arc::clone(&order);
    graph
        .derived(C, move |scope| {
            let b = *scope.get(&B)?;
            o.lock().unwrap().push("c");
            Ok(b * 10)
        })
        .unwrap();

    assert_eq!(graph.get(&C), NodeState::Ready(Arc::new(20)));
    graph.set(&A, 4).unwrap();
    assert_eq!(graph.get(&C), NodeState::Ready(Arc::new(50)));
    assert_eq!(*order.lock().unwrap(), vec!["b", "c", "b", "c"]);
}

#[test]
fn dependencies_follow_the_last_compute() {
    let calls = counter();
    let mut graph = Graph::new();
    graph.input(FLAG, true).unwrap();
    graph.input(A, 7).unwrap();
    let cc = Arc::clone(&calls);
    graph
        .derived(C, move |scope| {
            cc.fetch_add(1, Ordering::SeqCst);
            if *scope.get(&FLAG)? { Ok(*scope.get(&A)?) } else { Ok(0) }
        })
        .unwrap();

    assert_eq!(graph.get(&C).ready().map(|v| *v), Some(7));
    graph.set(&FLAG, false).unwrap();
    assert_eq!(graph.get(&C).ready().map(|v| *v), Some(0));
    // `a` was not read by the last compute, so writing it changes nothing.
    graph.set(&A, 99).unwrap();
    assert!(!graph.is_stale(&C));
    graph.get(&C);
    assert_eq!(count(&calls), 2);
}

// =============================================================================
// Cycles
// =============================================================================

#[test]
fn self_read_is_a_cycle_on_first_read() {
    let mut graph = Graph::new();
    graph.derived(A, |scope| Ok(*scope.get(&A)? + 1)).unwrap();
    assert_eq!(graph.get(&A), NodeState::Failed(VizError::Cycle { path: "a -> a".into() }));
    assert!(graph.halted().is_some());
}

#[test]
fn indirect_cycle_names_the_path() {
    let mut graph = Graph::new();
    graph.derived(A, |scope| Ok(*scope.get(&B)?)).unwrap();
    graph.derived(B, |scope| Ok(*scope.get(&A)?)).unwrap();
    let err = graph.get(&A).error().cloned().unwrap();
    assert_eq!(err, VizError::Cycle { path: "a -> b -> a".into() });
}

#[test]
fn cycle_halts_the_whole_graph() {
    let mut graph = Graph::new();
    graph.input(FLAG, true).unwrap();
    graph.derived(A, |scope| Ok(*scope.get(&A)?)).unwrap();
    graph.get(&A);
    assert!(matches!(graph.get(&FLAG), NodeState::Failed(VizError::Cycle { .. })));
}

#[test]
fn swallowed_cycle_read_still_fails() {
    let mut graph = Graph::new();
    graph.derived(A, |scope| Ok(scope.get(&A).map_or(0, |v| *v))).unwrap();
    assert!(matches!(graph.get(&A), NodeState::Failed(VizError::Cycle { .. })));
}

// =============================================================================
// Async sources
// =============================================================================

#[tokio::test]
async fn source_is_pending_until_resolved_and_propagates() {
    let (tx, rx) = tokio::sync::oneshot::channel::<i64>();
    let mut graph = Graph::new();
    graph
        .source(LOADED, move || async move { rx.await.map_err(|_| failed_load()) })
        .unwrap();
    graph.derived(B, |scope| Ok(*scope.get(&LOADED)? + 1)).unwrap();

    assert!(graph.get(&B).is_pending());
    assert_eq!(graph.in_flight(), 1);

    tx.send(41).unwrap();
    assert_eq!(graph.next_load().await, Some("loaded"));
    assert_eq!(graph.get(&B), NodeState::Ready(Arc::new(42)));
    assert_eq!(graph.in_flight(), 0);
    assert_eq!(graph.next_load().await, None);
}

#[tokio::test]
async fn source_failure_fails_every_dependent() {
    let mut graph = Graph::new();
    graph
        .source(LOADED, || async { Err::<i64, _>(failed_load()) })
        .unwrap();
    graph.derived(B, |scope| Ok(*scope.get(&LOADED)?)).unwrap();
    graph.derived(C, |scope| Ok(*scope.get(&B)? * 2)).unwrap();

    assert!(graph.get(&C).is_pending());
    graph.next_load().await;
    assert_eq!(graph.get(&C), NodeState::Failed(failed_load()));
    assert_eq!(graph.get(&B), NodeState::Failed(failed_load()));
}

#[tokio::test]
async fn source_loads_once_for_many_readers() {
    let loads = counter();
    let mut graph = Graph::new();
    let l = Arc::clone(&loads);
    graph
        .source(LOADED, move || {
            l.fetch_add(1, Ordering::SeqCst);
            async { Ok(3) }
        })
        .unwrap();
    graph.derived(B, |scope| Ok(*scope.get(&LOADED)?)).unwrap();
    graph.derived(C, |scope| Ok(*scope.get(&LOADED)?)).unwrap();

    graph.get(&B);
    graph.get(&C);
    graph.get(&LOADED);
    while graph.next_load().await.is_some() {}
    graph.get(&B);
    graph.get(&C);
    assert_eq!(count(&loads), 1);
}

#[tokio::test]
async fn source_is_not_started_before_first_read() {
    let loads = counter();
    let mut graph = Graph::new();
    let l = Arc::clone(&loads);
    graph
        .source(LOADED, move || {
            l.fetch_add(1, Ordering::SeqCst);
            async { Ok(3) }
        })
        .unwrap();
    assert_eq!(graph.in_flight(), 0);
    assert_eq!(count(&loads), 0);
}

#[test]
fn pending_to_pending_does_not_ripple() {
    let outer_calls = counter();
    let mut graph = Graph::new();
    graph.input(A, 1).unwrap();
    graph
        .source(LOADED, || futures::future::pending::<Result<i64, VizError>>())
        .unwrap();
    graph
        .derived(B, |scope| {
            let a = *scope.get(&A)?;
            Ok(a + *scope.get(&LOADED)?)
        })
        .unwrap();
    let oc = Arc::clone(&outer_calls);
    graph
        .derived(C, move |scope| {
            oc.fetch_add(1, Ordering::SeqCst);
            Ok(*scope.get(&B)?)
        })
        .unwrap();

    assert!(graph.get(&C).is_pending());
    graph.set(&A, 2).unwrap();
    assert!(graph.get(&C).is_pending());
    assert_eq!(count(&outer_calls), 1);
}

// =============================================================================
// Subscriptions
// =============================================================================

#[test]
fn subscriber_gets_current_value_then_changes() {
    let calls = counter();
    let mut graph = doubled_graph(&calls);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    graph
        .subscribe(&B, move |state: &NodeState<Arc<i64>>| {
            s.lock().unwrap().push(state.as_ready().map(|v| **v));
        })
        .unwrap();
    graph.set(&A, 1).unwrap();
    graph.set(&A, 2).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Some(42), Some(2), Some(4)]);
}

#[test]
fn subscriber_is_not_redelivered_for_unrelated_writes() {
    let calls = counter();
    let mut graph = doubled_graph(&calls);
    graph.input(FLAG, false).unwrap();
    let deliveries = counter();
    let d = Arc::clone(&deliveries);
    graph
        .subscribe(&B, move |_: &NodeState<Arc<i64>>| {
            d.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    graph.set(&FLAG, true).unwrap();
    assert_eq!(count(&deliveries), 1);
}

#[test]
fn second_subscriber_does_not_redeliver_to_first() {
    let calls = counter();
    let mut graph = doubled_graph(&calls);
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second"] {
        let d = Arc::clone(&deliveries);
        graph
            .subscribe(&B, move |state: &NodeState<Arc<i64>>| {
                d.lock().unwrap().push((label, state.as_ready().map(|v| **v)));
            })
            .unwrap();
    }
    assert_eq!(*deliveries.lock().unwrap(), vec![("first", Some(42)), ("second", Some(42))]);

    graph.set(&A, 5).unwrap();
    assert_eq!(
        *deliveries.lock().unwrap(),
        vec![("first", Some(42)), ("second", Some(42)), ("first", Some(10)), ("second", Some(10))]
    );
    assert_eq!(count(&calls), 2);
}

#[tokio::test]
async fn subscriber_sees_pending_then_resolution() {
    let mut graph = Graph::new();
    graph.source(LOADED, || async { Ok(8) }).unwrap();
    graph.derived(B, |scope| Ok(*scope.get(&LOADED)? * 2)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    graph
        .subscribe(&B, move |state: &NodeState<Arc<i64>>| {
            s.lock().unwrap().push(state.clone().map(|v| *v));
        })
        .unwrap();
    graph.next_load().await;
    assert_eq!(*seen.lock().unwrap(), vec![NodeState::Pending, NodeState::Ready(16)]);
}

#[test]
fn subscribing_to_unknown_node_fails() {
    let mut graph = Graph::new();
    let result = graph.subscribe(&A, |_: &NodeState<Arc<i64>>| {});
    assert_eq!(result, Err(VizError::UnknownNode("a")));
}
