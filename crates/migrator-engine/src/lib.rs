//! Export and replay engines
//!
//! The exporter walks a discovery snapshot of the source cluster and streams
//! every selected object into a gzip-compressed tar archive. The importer
//! reads that archive back and recreates the objects on the destination in
//! priority order, recording per-object failures in a [`ReplayOutcome`]
//! instead of aborting.
//!
//! Both engines talk to the API server through [`ResourceClient`], so they
//! run unchanged against an in-memory cluster in tests.

#![deny(missing_docs)]

pub mod archive;
pub mod client;
pub mod discovery;
pub mod error;
pub mod export;
pub mod outcome;
pub mod replay;

#[cfg(test)]
mod testing;

pub use archive::{ArchiveWriter, ArchivedItem, ExportArchive};
pub use client::{KubeResourceClient, ResourceClient};
pub use discovery::{DiscoveredResource, DiscoverySnapshot};
pub use error::EngineError;
pub use export::{ExportDescriptor, ExportRequest, ExportSummary, Exporter};
pub use outcome::{Completion, ReplayEvent, ReplayOutcome, ResourceRef, Scope, ScopedMessages, Severity};
pub use replay::{Importer, ImporterConfig, ReplayRequest};

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
