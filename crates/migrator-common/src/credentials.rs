//! Credential bridge
//!
//! Plugin processes read a shared kubeconfig path when they start. Before
//! each phase the kubeconfig of the cluster about to be acted on is
//! published there, replacing the previous one in a single rename.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::Error;

/// Publish `source` at `shared` as a byte-for-byte copy.
///
/// The parent directory of `shared` is created when missing. The copy is
/// staged in a temporary file next to `shared` and renamed over it, so a
/// reader sees either the previous kubeconfig or the new one, never a
/// partial file. Publishing the same source twice leaves the same result.
pub fn publish_credential(source: &Path, shared: &Path) -> Result<(), Error> {
    let parent = match shared.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    fs::create_dir_all(parent)
        .map_err(|e| Error::io(format!("create directory {}", parent.display()), e))?;

    let mut reader = File::open(source)
        .map_err(|e| Error::io(format!("open kubeconfig {}", source.display()), e))?;

    let mut staged = NamedTempFile::new_in(parent)
        .map_err(|e| Error::io(format!("stage kubeconfig in {}", parent.display()), e))?;

    io::copy(&mut reader, staged.as_file_mut())
        .map_err(|e| Error::io(format!("copy kubeconfig {}", source.display()), e))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|e| Error::io("sync staged kubeconfig", e))?;

    staged
        .persist(shared)
        .map_err(|e| Error::io(format!("replace {}", shared.display()), e.error))?;

    debug!(
        source = %source.display(),
        shared = %shared.display(),
        "Published kubeconfig for plugins"
    );
    Ok(())
}
