//! Session context: the graph, the viewport controller and the event entry
//! points a rendering surface talks to.
//!
//! ARCHITECTURE
//! ============
//! A session is single-owner and single-threaded. Every inbound event (a
//! selection, a pick, a viewport write, a load resolving) is applied to the
//! graph as one discrete step, subscribers are notified inside that step,
//! and the viewport controller then looks at the camera target.
//!
//! Loads only start when something reads a node that needs them, so a
//! surface subscribes (or reads) first and then calls [`Session::settle`].

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::VizConfig;
use crate::derive::{self, LAYERS, LayerId};
use crate::error::VizError;
use crate::graph::{Graph, NodeKey, NodeState};
use crate::loader::Source;
use crate::selection::{SELECTED_GROUP, SelectionEvent};
use crate::viewport::{VIEWPORT, ViewportController, ViewportState};

pub struct Session {
    graph: Graph,
    controller: ViewportController,
}

impl Session {
    /// Register every node over `source`.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::DuplicateNode`] if node registration collides.
    pub fn new(source: Arc<dyn Source>, config: &VizConfig) -> Result<Self, VizError> {
        let viewport = match config.viewport_size {
            Some((width, height)) => ViewportState::default().with_size(width, height),
            None => ViewportState::default(),
        };

        let mut graph = Graph::new();
        graph.input(SELECTED_GROUP, None)?;
        graph.input(VIEWPORT, viewport)?;
        derive::register(&mut graph, source)?;

        let mut session = Self { graph, controller: ViewportController::new(config.fit) };
        session.controller.observe(&mut session.graph);
        Ok(session)
    }

    // -------------------------------------------------------------------------
    // outbound
    // -------------------------------------------------------------------------

    pub fn get<T: Any + Send + Sync>(&mut self, key: &NodeKey<T>) -> NodeState<Arc<T>> {
        self.graph.get(key)
    }

    /// Deliver `key`'s state now and on every change.
    ///
    /// # Errors
    ///
    /// Returns [`VizError::UnknownNode`] for an unregistered key.
    pub fn subscribe<T, F>(&mut self, key: &NodeKey<T>, f: F) -> Result<(), VizError>
    where
        T: Any + Send + Sync,
        F: FnMut(&NodeState<Arc<T>>) + Send + 'static,
    {
        self.graph.subscribe(key, f)
    }

    /// The cycle that halted the graph, if any.
    #[must_use]
    pub fn halted(&self) -> Option<&VizError> {
        self.graph.halted()
    }

    // -------------------------------------------------------------------------
    // inbound
    // -------------------------------------------------------------------------

    /// Apply a selection change.
    ///
    /// # Errors
    ///
    /// Propagates a failed write of the selection node.
    pub fn dispatch(&mut self, event: SelectionEvent) -> Result<(), VizError> {
        info!(group = ?event.value(), "selection changed");
        self.graph.set(&SELECTED_GROUP, event.value())?;
        self.controller.observe(&mut self.graph);
        Ok(())
    }

    /// Select the group of the feature at `index` on `layer`.
    ///
    /// Picks on non-pickable layers, out-of-range indices and unlabelled
    /// features are ignored. Returns whether a selection was made.
    ///
    /// # Errors
    ///
    /// Returns the layers' failure, or a failed selection write.
    pub fn pick(&mut self, layer: LayerId, index: usize) -> Result<bool, VizError> {
        let layers = match self.graph.get(&LAYERS) {
            NodeState::Ready(layers) => layers,
            NodeState::Pending => {
                debug!(layer = layer.as_str(), index, "pick ignored; layers pending");
                return Ok(false);
            }
            NodeState::Failed(e) => return Err(e),
        };
        let Some(group) = layers.iter().find(|l| l.id == layer).and_then(|l| l.pick(index)) else {
            debug!(layer = layer.as_str(), index, "pick ignored");
            return Ok(false);
        };
        self.dispatch(SelectionEvent::Select(group))?;
        Ok(true)
    }

    /// Write the viewport, as the rendering surface does on pan or resize.
    ///
    /// # Errors
    ///
    /// Propagates a failed write of the viewport node.
    pub fn set_viewport(&mut self, state: ViewportState) -> Result<(), VizError> {
        self.graph.set(&VIEWPORT, state)?;
        self.controller.observe(&mut self.graph);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // event loop
    // -------------------------------------------------------------------------

    /// Apply every in-flight load, one resolution at a time, then run the
    /// scheduled viewport fit if there is one.
    ///
    /// # Errors
    ///
    /// Propagates a failure to read or write the viewport during the fit.
    pub async fn settle(&mut self) -> Result<(), VizError> {
        while let Some(node) = self.graph.next_load().await {
            debug!(node = node, "load applied");
            self.controller.observe(&mut self.graph);
        }
        self.run_pending_fit().await?;
        Ok(())
    }

    /// Wait until the scheduled fit is due and apply it.
    ///
    /// Returns whether the viewport was written.
    ///
    /// # Errors
    ///
    /// Propagates a failure to read or write the viewport.
    pub async fn run_pending_fit(&mut self) -> Result<bool, VizError> {
        let Some(due) = self.controller.due() else {
            return Ok(false);
        };
        tokio::time::sleep_until(due).await;
        self.controller.apply_fit(&mut self.graph)
    }
}
