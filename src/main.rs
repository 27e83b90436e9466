use std::sync::Arc;

use meetup_viz::config::{Mode, VizConfig};
use meetup_viz::derive::{
    BOUNDS, CLUSTER_SIZE_COUNTS, CLUSTER_SIZE_HISTOGRAM, FILTER_RANGE, LAYERS, RUN_DETAILS, SELECTED_GROUP_DETAILS,
};
use meetup_viz::error::{ErrorCode, VizError};
use meetup_viz::graph::NodeState;
use meetup_viz::loader::{DirSource, HttpSource, Source};
use meetup_viz::selection::SelectionEvent;
use meetup_viz::server;
use meetup_viz::session::Session;
use meetup_viz::viewport::VIEWPORT;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match VizConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "invalid configuration");
            std::process::exit(2);
        }
    };

    let result = match config.mode {
        Mode::Serve => server::serve(&config).await,
        Mode::Inspect => inspect(&config).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, code = e.error_code(), retryable = e.retryable(), "meetup-viz failed");
        std::process::exit(1);
    }
}

/// Load a run, settle every derivation and log the products.
async fn inspect(config: &VizConfig) -> Result<(), VizError> {
    let source: Arc<dyn Source> = match &config.data_url {
        Some(url) => Arc::new(HttpSource::new(url, config.timeouts)?),
        None => Arc::new(DirSource::new(&config.run_dir)),
    };
    tracing::info!(
        data_url = config.data_url.as_deref().unwrap_or("-"),
        run_dir = %config.run_dir.display(),
        "inspecting clustering run"
    );

    let mut session = Session::new(source, config)?;
    // Reads start the loads behind them.
    session.get(&RUN_DETAILS);
    session.get(&CLUSTER_SIZE_HISTOGRAM);
    session.get(&LAYERS);
    session.settle().await?;

    if let Some(group) = config.select_group {
        session.dispatch(SelectionEvent::Select(group))?;
        session.run_pending_fit().await?;
    }

    report(&mut session);
    match session.halted() {
        Some(e) => Err(e.clone()),
        None => Ok(()),
    }
}

fn report(session: &mut Session) {
    if let Some(details) = ready("runDetails", session.get(&RUN_DETAILS)) {
        tracing::info!(
            run = %details.name,
            min_occupancy = ?details.min_occupancy,
            max_occupancy = ?details.max_occupancy,
            max_iters = ?details.max_iters,
            meeting_point_method = ?details.meeting_point_method,
            "run details"
        );
    }
    if let Some(counts) = ready("clusterSizeCounts", session.get(&CLUSTER_SIZE_COUNTS)) {
        let users: usize = counts.values().sum();
        tracing::info!(groups = counts.len(), users, "cluster sizes");
    }
    if let Some(hist) = ready("clusterSizeHistogram", session.get(&CLUSTER_SIZE_HISTOGRAM)) {
        for bin in hist.bins.iter().filter(|b| b.count > 0) {
            tracing::info!(lo = bin.lo, hi = bin.hi, count = bin.count, fraction = bin.fraction, "histogram bin");
        }
    }
    if let Some(bounds) = ready("bounds", session.get(&BOUNDS)) {
        tracing::info!(bounds = ?bounds.to_array(), "dataset bounds");
    }
    if let Some(range) = ready("filterRange", session.get(&FILTER_RANGE)) {
        tracing::info!(lo = range.lo, hi = range.hi, "label filter");
    }
    if let Some(Some(details)) = ready("selectedGroupDetails", session.get(&SELECTED_GROUP_DETAILS)).as_deref() {
        tracing::info!(group = details.group, users = details.users.len(), bounds = ?details.bounds.to_array(), "selected group");
    }
    if let Some(layers) = ready("layers", session.get(&LAYERS)) {
        for layer in layers.iter() {
            tracing::info!(
                layer = layer.id.as_str(),
                features = layer.data.len(),
                visible = layer.visible_features().count(),
                pickable = layer.pickable,
                "layer"
            );
        }
    }
    if let Some(view) = ready("mapview", session.get(&VIEWPORT)) {
        tracing::info!(longitude = view.longitude, latitude = view.latitude, zoom = view.zoom, "viewport");
    }
}

fn ready<T>(node: &str, state: NodeState<Arc<T>>) -> Option<Arc<T>> {
    match state {
        NodeState::Ready(value) => Some(value),
        NodeState::Pending => {
            tracing::warn!(node, "still pending after settle");
            None
        }
        NodeState::Failed(e) => {
            tracing::warn!(node, error = %e, code = e.error_code(), "derivation failed");
            None
        }
    }
}
