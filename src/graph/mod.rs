//! Derivation graph: memoized, pull-based, dependency-tracked values.
//!
//! ARCHITECTURE
//! ============
//! Every node is one of three kinds:
//! - **input**: written from outside (`set`); always ready.
//! - **source**: backed by a one-shot asynchronous load. The load future is
//!   created on the node's first read and driven by whoever owns the graph
//!   through [`Graph::next_load`].
//! - **derived**: a synchronous compute body reading other nodes through a
//!   [`Scope`].
//!
//! DESIGN
//! ======
//! - Dependencies are recorded, not declared: a [`Scope`] notes every node a
//!   compute body reads together with that node's version at read time.
//! - Each new value bumps the node's version. A dirty node recomputes only if
//!   one of its recorded dependencies now has a different version.
//! - Writes and load resolutions mark transitive dependents dirty; nothing
//!   recomputes until read.
//! - A read that re-enters a node already on the compute stack is a cycle.
//!   The graph halts and every later read reports the same error.
//! - Pending and failed states flow through `?` on scope reads, so a compute
//!   body stops at its first unavailable input.

pub mod state;

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use tracing::{debug, error, trace};

use crate::error::VizError;
pub use state::{AnyValue, NodeState, Suspend};

// =============================================================================
// KEYS
// =============================================================================

/// Typed handle naming a node.
pub struct NodeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> NodeKey<T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: PhantomData }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for NodeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeKey<T> {}

impl<T> std::fmt::Debug for NodeKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeKey").field(&self.name).finish()
    }
}

// =============================================================================
// NODES
// =============================================================================

type ComputeFn = Arc<dyn Compute>;
type LoadFuture = BoxFuture<'static, Result<AnyValue, VizError>>;
type LoadFactory = Box<dyn FnOnce() -> LoadFuture + Send>;
type Resolution = BoxFuture<'static, (&'static str, Result<AnyValue, VizError>)>;
type Subscriber = Box<dyn FnMut(&NodeState<AnyValue>) + Send>;

/// Type-erased compute body.
trait Compute: Send + Sync {
    fn compute(&self, scope: &mut Scope<'_>) -> Result<AnyValue, Suspend>;
}

struct Erased<T, F> {
    body: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> Compute for Erased<T, F>
where
    T: Any + Send + Sync,
    F: Fn(&mut Scope<'_>) -> Result<T, Suspend> + Send + Sync,
{
    fn compute(&self, scope: &mut Scope<'_>) -> Result<AnyValue, Suspend> {
        (self.body)(scope).map(|v| Arc::new(v) as AnyValue)
    }
}

enum Kind {
    Input,
    /// `None` once the load has been started.
    Source(Option<LoadFactory>),
    Derived(ComputeFn),
}

struct Node {
    kind: Kind,
    state: NodeState<AnyValue>,
    version: u64,
    computed: bool,
    dirty: bool,
    /// Reads made by the last compute, with the version seen.
    deps: Vec<(&'static str, u64)>,
    dependents: HashSet<&'static str>,
    subscribers: Vec<Subscriber>,
    delivered: Option<u64>,
}

impl Node {
    fn new(kind: Kind, state: NodeState<AnyValue>, computed: bool) -> Self {
        Self {
            kind,
            state,
            version: 0,
            computed,
            dirty: false,
            deps: Vec::new(),
            dependents: HashSet::new(),
            subscribers: Vec::new(),
            delivered: None,
        }
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// Session-scoped set of nodes.
pub struct Graph {
    nodes: HashMap<&'static str, Node>,
    stack: Vec<&'static str>,
    in_flight: FuturesUnordered<Resolution>,
    halted: Option<VizError>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: HashMap::new(), stack: Vec::new(), in_flight: FuturesUnordered::new(), halted: None }
    }

    // -------------------------------------------------------------------------
    // registration
    // -------------------------------------------------------------------------

    /// Register an externally written node holding `initial`.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::DuplicateNode`] if the key is taken.
    pub fn input<T: Any + Send + Sync>(&mut self, key: NodeKey<T>, initial: T) -> Result<(), VizError> {
        let value: AnyValue = Arc::new(initial);
        self.insert(key.name, Node::new(Kind::Input, NodeState::Ready(value), true))
    }

    /// Register a node backed by a one-shot asynchronous load.
    ///
    /// `load` is called at most once, on the node's first read.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::DuplicateNode`] if the key is taken.
    pub fn source<T, F, Fut>(&mut self, key: NodeKey<T>, load: F) -> Result<(), VizError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, VizError>> + Send + 'static,
    {
        let factory: LoadFactory = Box::new(move || -> LoadFuture {
            let fut = load();
            Box::pin(async move { fut.await.map(|v| Arc::new(v) as AnyValue) })
        });
        self.insert(key.name, Node::new(Kind::Source(Some(factory)), NodeState::Pending, false))
    }

    /// Register a derived node.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::DuplicateNode`] if the key is taken.
    pub fn derived<T, F>(&mut self, key: NodeKey<T>, compute: F) -> Result<(), VizError>
    where
        T: Any + Send + Sync,
        F: Fn(&mut Scope<'_>) -> Result<T, Suspend> + Send + Sync + 'static,
    {
        let compute: ComputeFn = Arc::new(Erased { body: compute, _marker: PhantomData });
        self.insert(key.name, Node::new(Kind::Derived(compute), NodeState::Pending, false))
    }

    fn insert(&mut self, name: &'static str, node: Node) -> Result<(), VizError> {
        if self.nodes.contains_key(name) {
            return Err(VizError::DuplicateNode(name));
        }
        self.nodes.insert(name, node);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // reads
    // -------------------------------------------------------------------------

    /// Bring `key` up to date and return its state.
    pub fn get<T: Any + Send + Sync>(&mut self, key: &NodeKey<T>) -> NodeState<Arc<T>> {
        if let Err(e) = self.refresh(key.name) {
            return NodeState::Failed(e);
        }
        match self.nodes.get(key.name) {
            Some(node) => node.state.typed(key.name),
            None => NodeState::Failed(VizError::UnknownNode(key.name)),
        }
    }

    /// Current version of a node, without refreshing it.
    #[must_use]
    pub fn version<T>(&self, key: &NodeKey<T>) -> Option<u64> {
        self.nodes.get(key.name).map(|n| n.version)
    }

    /// Whether the next read of `key` may recompute it.
    #[must_use]
    pub fn is_stale<T>(&self, key: &NodeKey<T>) -> bool {
        self.nodes
            .get(key.name)
            .is_some_and(|n| matches!(n.kind, Kind::Derived(_)) && (n.dirty || !n.computed))
    }

    /// Number of started loads that have not resolved.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The cycle that halted the graph, if any.
    #[must_use]
    pub fn halted(&self) -> Option<&VizError> {
        self.halted.as_ref()
    }

    // -------------------------------------------------------------------------
    // writes
    // -------------------------------------------------------------------------

    /// Replace the value of an input node and notify affected subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::UnknownNode`], [`VizError::ReadOnlyNode`] for
    /// computed nodes, or [`VizError::TypeMismatch`] for a wrongly typed key.
    pub fn set<T: Any + Send + Sync>(&mut self, key: &NodeKey<T>, value: T) -> Result<(), VizError> {
        let name = key.name;
        let node = self.nodes.get_mut(name).ok_or(VizError::UnknownNode(name))?;
        if !matches!(node.kind, Kind::Input) {
            return Err(VizError::ReadOnlyNode(name));
        }
        if let NodeState::Ready(current) = &node.state {
            if !current.is::<T>() {
                return Err(VizError::TypeMismatch(name));
            }
        }
        node.state = NodeState::Ready(Arc::new(value));
        node.version += 1;
        trace!(node = name, version = node.version, "input written");
        self.invalidate(name);
        self.notify();
        Ok(())
    }

    /// Wait for the next started load to finish and apply it.
    ///
    /// Returns the resolved node's name, or `None` when nothing is in flight.
    pub async fn next_load(&mut self) -> Option<&'static str> {
        let (name, result) = self.in_flight.next().await?;
        self.resolve(name, result);
        Some(name)
    }

    fn resolve(&mut self, name: &'static str, result: Result<AnyValue, VizError>) {
        let Some(node) = self.nodes.get_mut(name) else {
            return;
        };
        node.state = match result {
            Ok(v) => NodeState::Ready(v),
            Err(e) => NodeState::Failed(e),
        };
        node.computed = true;
        node.version += 1;
        debug!(node = name, failed = node.state.is_failed(), "source settled");
        self.invalidate(name);
        self.notify();
    }

    /// Mark every transitive dependent of `name` dirty.
    fn invalidate(&mut self, name: &'static str) {
        let mut queue: VecDeque<&'static str> = self
            .nodes
            .get(name)
            .map(|n| n.dependents.iter().copied().collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop_front() {
            let Some(node) = self.nodes.get_mut(next) else {
                continue;
            };
            if node.dirty {
                continue;
            }
            node.dirty = true;
            queue.extend(node.dependents.iter().copied());
        }
    }

    // -------------------------------------------------------------------------
    // subscriptions
    // -------------------------------------------------------------------------

    /// Deliver the current state of `key` to `f` now, and again whenever the
    /// node takes a new value after a write or a load resolution.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::UnknownNode`] for an unregistered key.
    pub fn subscribe<T, F>(&mut self, key: &NodeKey<T>, mut f: F) -> Result<(), VizError>
    where
        T: Any + Send + Sync,
        F: FnMut(&NodeState<Arc<T>>) + Send + 'static,
    {
        let name = key.name;
        if !self.nodes.contains_key(name) {
            return Err(VizError::UnknownNode(name));
        }
        // Existing subscribers catch up first so the new one is not counted
        // among them.
        self.notify();
        if let Err(e) = self.refresh(name) {
            trace!(node = name, error = %e, "subscriber refresh failed");
        }

        let halted = self.halted.clone();
        let node = self.nodes.get_mut(name).ok_or(VizError::UnknownNode(name))?;
        let state = match halted {
            Some(e) => NodeState::Failed(e),
            None => node.state.clone(),
        };
        let mut subscriber: Subscriber = Box::new(move |state: &NodeState<AnyValue>| f(&state.typed::<T>(name)));
        subscriber(&state);
        if node.subscribers.is_empty() {
            node.delivered = Some(node.version);
        }
        node.subscribers.push(subscriber);
        Ok(())
    }

    fn notify(&mut self) {
        let mut names: Vec<&'static str> = self
            .nodes
            .iter()
            .filter(|(_, n)| !n.subscribers.is_empty())
            .map(|(name, _)| *name)
            .collect();
        names.sort_unstable();

        for name in names {
            if let Err(e) = self.refresh(name) {
                trace!(node = name, error = %e, "subscriber refresh failed");
            }
            let halted = self.halted.clone();
            let Some(node) = self.nodes.get_mut(name) else {
                continue;
            };
            if node.delivered == Some(node.version) {
                continue;
            }
            node.delivered = Some(node.version);
            let state = match halted {
                Some(e) => NodeState::Failed(e),
                None => node.state.clone(),
            };
            let mut subscribers = std::mem::take(&mut node.subscribers);
            for subscriber in &mut subscribers {
                subscriber(&state);
            }
            if let Some(node) = self.nodes.get_mut(name) {
                node.subscribers = subscribers;
            }
        }
    }

    // -------------------------------------------------------------------------
    // evaluation
    // -------------------------------------------------------------------------

    /// Make `name` current: start its load, verify its dependencies, or
    /// recompute it.
    fn refresh(&mut self, name: &'static str) -> Result<(), VizError> {
        if let Some(e) = &self.halted {
            return Err(e.clone());
        }
        if self.stack.contains(&name) {
            return Err(self.halt_on_cycle(name));
        }

        let node = self.nodes.get_mut(name).ok_or(VizError::UnknownNode(name))?;
        let compute = match &mut node.kind {
            Kind::Input => return Ok(()),
            Kind::Source(factory) => {
                if let Some(factory) = factory.take() {
                    debug!(node = name, "source load started");
                    let load = factory();
                    self.in_flight.push(Box::pin(async move { (name, load.await) }));
                }
                return Ok(());
            }
            Kind::Derived(compute) => {
                if node.computed && !node.dirty {
                    return Ok(());
                }
                Arc::clone(compute)
            }
        };

        if node.computed && !self.dependencies_changed(name) {
            if let Some(node) = self.nodes.get_mut(name) {
                node.dirty = false;
            }
            return Ok(());
        }
        self.recompute(name, &compute);
        Ok(())
    }

    /// Refresh recorded dependencies in read order; true at the first one
    /// whose version moved.
    fn dependencies_changed(&mut self, name: &'static str) -> bool {
        let deps = self.nodes.get(name).map(|n| n.deps.clone()).unwrap_or_default();
        self.stack.push(name);
        let changed = deps.into_iter().any(|(dep, seen)| {
            self.refresh(dep).is_err() || self.nodes.get(dep).map(|d| d.version) != Some(seen)
        });
        self.stack.pop();
        changed
    }

    fn recompute(&mut self, name: &'static str, compute: &ComputeFn) {
        trace!(node = name, "recompute");
        self.stack.push(name);
        let mut scope = Scope { graph: &mut *self, reads: Vec::new() };
        let outcome = compute.compute(&mut scope);
        let reads = scope.reads;
        self.stack.pop();

        let state = match (&self.halted, outcome) {
            // A body that swallowed a cycle read still reports it.
            (Some(e), _) => NodeState::Failed(e.clone()),
            (None, outcome) => NodeState::from(outcome),
        };
        self.store(name, state, reads);
    }

    fn store(&mut self, name: &'static str, state: NodeState<AnyValue>, reads: Vec<(&'static str, u64)>) {
        let old_deps = self
            .nodes
            .get_mut(name)
            .map(|n| std::mem::take(&mut n.deps))
            .unwrap_or_default();
        for (dep, _) in &old_deps {
            if let Some(d) = self.nodes.get_mut(dep) {
                d.dependents.remove(name);
            }
        }
        for (dep, _) in &reads {
            if let Some(d) = self.nodes.get_mut(dep) {
                d.dependents.insert(name);
            }
        }

        let Some(node) = self.nodes.get_mut(name) else {
            return;
        };
        // Pending to pending is not a new value.
        let unchanged = node.computed && node.state.is_pending() && state.is_pending();
        node.state = state;
        node.deps = reads;
        node.computed = true;
        node.dirty = false;
        if !unchanged {
            node.version += 1;
        }
    }

    fn halt_on_cycle(&mut self, name: &'static str) -> VizError {
        let start = self.stack.iter().position(|n| *n == name).unwrap_or(0);
        let mut path: Vec<&str> = self.stack[start..].to_vec();
        path.push(name);
        let err = VizError::Cycle { path: path.join(" -> ") };
        error!(error = %err, "derivation graph halted");
        self.halted = Some(err.clone());
        err
    }
}

// =============================================================================
// SCOPE
// =============================================================================

/// Read access handed to a compute body; records what it reads.
pub struct Scope<'g> {
    graph: &'g mut Graph,
    reads: Vec<(&'static str, u64)>,
}

impl Scope<'_> {
    /// Read another node, recording the dependency.
    ///
    /// # Errors
    ///
    /// [`Suspend::Pending`] while the node waits on a load, and
    /// [`Suspend::Failed`] when it (or the graph) failed.
    pub fn get<T: Any + Send + Sync>(&mut self, key: &NodeKey<T>) -> Result<Arc<T>, Suspend> {
        let name = key.name;
        self.graph.refresh(name)?;
        let node = self.graph.nodes.get(name).ok_or(VizError::UnknownNode(name))?;
        if !self.reads.iter().any(|(n, _)| *n == name) {
            self.reads.push((name, node.version));
        }
        node.state.typed::<T>(name).into_result()
    }
}
