//! Test fixtures for engine testing.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use super::mocks::RecordingExecutor;
use crate::artifacts::InMemoryArtifactStore;
use crate::engine::TransitionEngine;
use crate::errors::{ConfigurationError, EngineError, NotFoundError};
use crate::events::CollectingEventSink;
use crate::graph::StageGraphConfig;
use crate::identity::{PipelineInputs, StageInputs};
use crate::observability::LOG_ENV_VAR;
use crate::store::InMemoryRunStore;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Output goes through the test writer, so it only shows for failing tests.
/// Honors `STAGELOCK_LOG`; defaults to warnings only.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Representative inputs for a stage of the default pipeline.
///
/// Unknown stages get an empty input set.
#[must_use]
pub fn sample_inputs(stage: &str) -> StageInputs {
    let inputs = match stage {
        "discover" => PipelineInputs::Discover {
            root: "/data".to_string(),
            patterns: vec!["*.csv".to_string()],
        },
        "select" => PipelineInputs::Select {
            files: vec!["/data/orders.csv".to_string()],
        },
        "context" => PipelineInputs::Context {
            profile: "warehouse".to_string(),
            target: None,
        },
        "probe" => PipelineInputs::Probe { timeout_seconds: 5 },
        "choose-tables" => PipelineInputs::ChooseTables {
            tables: vec!["orders".to_string()],
        },
        "preview" => PipelineInputs::Preview { rows: 20 },
        "transform" => PipelineInputs::Transform {
            format: "parquet".to_string(),
            options: BTreeMap::from([("compression".to_string(), json!("zstd"))]),
        },
        "export" => PipelineInputs::Export {
            destination: "/out/orders.parquet".to_string(),
            format: "parquet".to_string(),
        },
        other => return StageInputs::new(other),
    };
    inputs.into()
}

/// An engine over in-memory stores with a collecting event sink.
#[derive(Debug)]
pub struct TestHarness {
    /// The engine under test.
    pub engine: Arc<TransitionEngine>,
    /// Its run store.
    pub store: Arc<InMemoryRunStore>,
    /// Its artifact store.
    pub artifacts: Arc<InMemoryArtifactStore>,
    /// Every event the engine emitted.
    pub events: Arc<CollectingEventSink>,
    /// Executor used by [`TestHarness::lock_through`].
    pub executor: Arc<RecordingExecutor>,
}

impl TestHarness {
    /// Creates a harness over the default pipeline.
    pub fn default_pipeline() -> Result<Self, ConfigurationError> {
        Ok(Self::with_graph(StageGraphConfig::default_pipeline()?))
    }

    /// Creates a harness over `graph`.
    #[must_use]
    pub fn with_graph(graph: StageGraphConfig) -> Self {
        let store = Arc::new(InMemoryRunStore::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let engine = TransitionEngine::new(Arc::new(graph), store.clone(), artifacts.clone())
            .with_event_sink(events.clone());

        Self {
            engine: Arc::new(engine),
            store,
            artifacts,
            events,
            executor: Arc::new(RecordingExecutor::new()),
        }
    }

    /// Creates a run and returns its id.
    pub async fn run(&self) -> Result<Uuid, EngineError> {
        Ok(self.engine.create_run().await?.run_id)
    }

    /// Locks every stage from the start of the graph up to and including
    /// `stage`, with [`sample_inputs`].
    pub async fn lock_through(&self, run_id: Uuid, stage: &str) -> Result<(), EngineError> {
        let graph = self.engine.graph().clone();
        let end = graph
            .position(stage)
            .ok_or_else(|| NotFoundError::Stage(stage.to_string()))?;

        for name in graph.stages().into_iter().take(end + 1) {
            self.engine
                .lock_stage(run_id, &sample_inputs(name), self.executor.as_ref())
                .await?;
        }
        Ok(())
    }
}
