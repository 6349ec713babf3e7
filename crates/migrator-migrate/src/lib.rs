//! Two-phase cluster migration
//!
//! Moves the objects of a set of namespaces from a source cluster to a
//! destination cluster through a temporary archive on local disk.
//!
//! ## Architecture
//!
//! ```text
//! Source cluster            Orchestrator                 Destination cluster
//! ──────────────            ────────────                 ───────────────────
//!                           1. Allocate transfer medium
//!                           2. Publish source kubeconfig
//!                              to the shared path
//! 3. Discover, list,  ◄──── Export phase
//!    run export actions ──► archive written to medium
//!                           4. Publish destination
//!                              kubeconfig
//!                           5. Rewind medium
//!                              Replay phase ─────────────►  6. Create objects in
//!                                                              priority order
//!                           ◄──────────── ReplayOutcome ───  7. Warnings and errors
//!                           8. Remove medium, classify
//! ```
//!
//! Fatal errors abort the run and are reported with the [`MigrationStep`]
//! they happened in. Per-object replay failures never abort; they are
//! collected in the [`ReplayOutcome`](migrator_engine::ReplayOutcome).

#![deny(missing_docs)]

mod error;
mod export;
mod medium;
mod orchestrator;
mod replay;

#[cfg(test)]
mod testing;

pub use error::{MigrateError, MigrationStep};
pub use export::{ExportDriver, ExportPhase};
pub use medium::TransferMedium;
pub use orchestrator::{
    MigrationReport, MigrationRequest, MigrationResult, MigrationState, Migrator,
};
pub use replay::{ReplayDriver, ReplayPhase};

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, MigrateError>;
