//! Migration orchestrator
//!
//! Sequences one run: allocate the transfer medium, publish the source
//! credential, export, publish the destination credential, rewind the
//! medium and replay. Any fatal error aborts the run at the step it
//! happened in; the medium is removed on every path.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use migrator_common::{publish_credential, ClientFactory, ClusterEndpoint, KubeconfigClientFactory};
use migrator_engine::{Completion, ReplayOutcome};
use tracing::{error, info, warn};

use crate::error::{MigrateError, MigrationStep};
use crate::export::{ExportDriver, ExportPhase};
use crate::medium::TransferMedium;
use crate::replay::{ReplayDriver, ReplayPhase};

/// States a migration run moves through
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationState {
    /// Nothing done yet
    Init,
    /// Transfer medium allocated
    MediumReady,
    /// Source exported into the medium
    Exported,
    /// Shared credential points at the destination
    CredentialSwitched,
    /// Replay ran to completion
    Replayed,
    /// Run finished and outcome classified
    Done,
    /// Run stopped by a fatal error
    Aborted,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What to migrate and where the run keeps its scratch files
#[derive(Clone, Debug)]
pub struct MigrationRequest {
    /// Cluster to export from
    pub source: ClusterEndpoint,
    /// Cluster to replay into
    pub destination: ClusterEndpoint,
    /// Namespaces to migrate
    pub namespaces: Vec<String>,
    /// Directory holding plugin executables
    pub plugin_dir: PathBuf,
    /// Directory the transfer medium is created in
    pub cache_dir: PathBuf,
    /// Kubeconfig path read by plugin processes
    pub shared_credential: PathBuf,
}

/// How a run ended
#[derive(Debug)]
pub enum MigrationResult {
    /// Replay ran; the outcome may still hold warnings or errors
    Completed {
        /// Classification of the outcome
        completion: Completion,
        /// Per-object warnings and errors
        outcome: ReplayOutcome,
    },
    /// A fatal error stopped the run
    Aborted {
        /// Step the run stopped at
        step: MigrationStep,
        /// The error
        error: MigrateError,
    },
}

/// Record of one run
#[derive(Debug)]
pub struct MigrationReport {
    /// Every state entered, in order, starting with `Init`
    pub history: Vec<MigrationState>,
    /// How the run ended
    pub result: MigrationResult,
}

impl MigrationReport {
    /// Terminal state of the run
    pub fn final_state(&self) -> MigrationState {
        self.history
            .last()
            .copied()
            .unwrap_or(MigrationState::Init)
    }

    /// Whether a fatal error stopped the run
    pub fn is_aborted(&self) -> bool {
        matches!(self.result, MigrationResult::Aborted { .. })
    }
}

/// Attribute an error to the step it happened in
trait AtStep<T> {
    fn at(self, step: MigrationStep) -> Result<T, (MigrationStep, MigrateError)>;
}

impl<T, E: Into<MigrateError>> AtStep<T> for Result<T, E> {
    fn at(self, step: MigrationStep) -> Result<T, (MigrationStep, MigrateError)> {
        self.map_err(|e| (step, e.into()))
    }
}

/// Runs migrations through an export phase and a replay phase
pub struct Migrator<E = ExportDriver, R = ReplayDriver> {
    export: E,
    replay: R,
}

impl Migrator {
    /// Migrator reading kubeconfigs from disk
    pub fn new() -> Self {
        Self::with_factory(Arc::new(KubeconfigClientFactory::default()))
    }

    /// Migrator opening clients through `factory`
    pub fn with_factory(factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_phases(
            ExportDriver::new(factory.clone()),
            ReplayDriver::new(factory),
        )
    }
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ExportPhase, R: ReplayPhase> Migrator<E, R> {
    /// Migrator with explicit phases
    pub fn with_phases(export: E, replay: R) -> Self {
        Self { export, replay }
    }

    /// Run one migration.
    ///
    /// Never fails: fatal errors are returned in the report along with
    /// the step they happened in.
    pub async fn run(&self, request: &MigrationRequest) -> MigrationReport {
        info!(
            source = %request.source.kubeconfig().display(),
            destination = %request.destination.kubeconfig().display(),
            namespaces = ?request.namespaces,
            "Starting migration"
        );

        let mut history = vec![MigrationState::Init];

        let mut medium = match TransferMedium::allocate(&request.cache_dir) {
            Ok(medium) => medium,
            Err(e) => return abort(history, MigrationStep::AllocateMedium, e),
        };
        history.push(MigrationState::MediumReady);

        let driven = self.drive(request, &mut medium, &mut history).await;
        medium.remove();

        match driven {
            Ok(outcome) => {
                history.push(MigrationState::Done);
                let completion = outcome.completion();
                report_outcome(&outcome);
                info!(
                    restored = outcome.restored(),
                    "Migration {}", completion
                );
                MigrationReport {
                    history,
                    result: MigrationResult::Completed {
                        completion,
                        outcome,
                    },
                }
            }
            Err((step, e)) => abort(history, step, e),
        }
    }

    async fn drive(
        &self,
        request: &MigrationRequest,
        medium: &mut TransferMedium,
        history: &mut Vec<MigrationState>,
    ) -> Result<ReplayOutcome, (MigrationStep, MigrateError)> {
        // Step 1: point plugins at the source and export
        info!(step = "export", "Publishing source credential");
        publish_credential(request.source.kubeconfig(), &request.shared_credential)
            .at(MigrationStep::PublishSourceCredential)?;

        let descriptor = self
            .export
            .run_export(
                &request.source,
                &request.plugin_dir,
                &request.namespaces,
                medium.writer(),
            )
            .await
            .at(MigrationStep::Export)?;
        history.push(MigrationState::Exported);
        info!(export = %descriptor.name, "Export complete");

        // Step 2: point plugins at the destination
        publish_credential(request.destination.kubeconfig(), &request.shared_credential)
            .at(MigrationStep::PublishDestinationCredential)?;
        history.push(MigrationState::CredentialSwitched);
        info!(step = "replay", "Published destination credential");

        // Step 3: replay the medium
        let source = medium.rewind().at(MigrationStep::RewindMedium)?;
        let outcome = self
            .replay
            .run_replay(&request.destination, &request.plugin_dir, source, &descriptor)
            .await
            .at(MigrationStep::Replay)?;
        history.push(MigrationState::Replayed);

        Ok(outcome)
    }
}

fn abort(
    mut history: Vec<MigrationState>,
    step: MigrationStep,
    error: MigrateError,
) -> MigrationReport {
    error!(step = %step, error = %error, "Migration aborted");
    history.push(MigrationState::Aborted);
    MigrationReport {
        history,
        result: MigrationResult::Aborted { step, error },
    }
}

fn report_outcome(outcome: &ReplayOutcome) {
    let warnings = outcome.warnings();
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "Replay warnings:\n{}", warnings);
    }
    let errors = outcome.errors();
    if !errors.is_empty() {
        error!(count = errors.len(), "Replay errors:\n{}", errors);
    }
}
