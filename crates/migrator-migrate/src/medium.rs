//! Transfer medium
//!
//! The archive written by the export phase and read by the replay phase.
//! It lives as a `backup-*.tar.gz` file in the cache directory for the
//! duration of one run and is removed when the run ends, whatever the
//! outcome. Dropping the medium also removes the file.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::MigrateError;

/// Scratch archive file owned by one migration run
#[derive(Debug)]
pub struct TransferMedium {
    file: NamedTempFile,
    rewound: bool,
}

impl TransferMedium {
    /// Create an empty medium in `cache_dir`
    pub fn allocate(cache_dir: &Path) -> Result<Self, MigrateError> {
        let file = tempfile::Builder::new()
            .prefix("backup-")
            .suffix(".tar.gz")
            .tempfile_in(cache_dir)
            .map_err(|e| MigrateError::io("cannot allocate transfer medium", e))?;
        debug!(path = %file.path().display(), "Allocated transfer medium");
        Ok(Self {
            file,
            rewound: false,
        })
    }

    /// Location of the medium on disk
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Handle the export phase writes through
    pub fn writer(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Seek back to the start and hand out the handle for reading.
    ///
    /// A medium is read exactly once, so a second rewind fails.
    pub fn rewind(&mut self) -> Result<&mut File, MigrateError> {
        if self.rewound {
            return Err(MigrateError::io(
                "rewind transfer medium",
                std::io::Error::other("transfer medium already rewound"),
            ));
        }
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(0))
            .map_err(|e| MigrateError::io("rewind transfer medium", e))?;
        self.rewound = true;
        Ok(file)
    }

    /// Close and delete the medium
    pub fn remove(self) {
        let path = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(()) => debug!(path = %path.display(), "Removed transfer medium"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove transfer medium"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn allocate_in_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let medium = TransferMedium::allocate(dir.path()).unwrap();

        assert_eq!(medium.path().parent(), Some(dir.path()));
        let name = medium.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("backup-"));
        assert!(name.ends_with(".tar.gz"));
    }

    #[test]
    fn missing_cache_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TransferMedium::allocate(&dir.path().join("missing")).unwrap_err();
        assert!(err.to_string().starts_with("cannot allocate transfer medium"));
    }

    #[test]
    fn written_bytes_read_back_after_rewind() {
        let dir = tempfile::tempdir().unwrap();
        let mut medium = TransferMedium::allocate(dir.path()).unwrap();
        medium.writer().write_all(b"archive bytes").unwrap();

        let mut data = Vec::new();
        medium.rewind().unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"archive bytes");
    }

    #[test]
    fn rewind_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut medium = TransferMedium::allocate(dir.path()).unwrap();
        medium.rewind().unwrap();
        assert!(medium.rewind().is_err());
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let medium = TransferMedium::allocate(dir.path()).unwrap();
        let path = medium.path().to_path_buf();
        assert!(path.exists());

        medium.remove();
        assert!(!path.exists());
    }
}
