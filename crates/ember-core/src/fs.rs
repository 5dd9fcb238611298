// SPDX-License-Identifier: CEPL-1.0
//! Binary file loading for shader bytecode and other blobs.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => FileError::NotFound {
                path: path.to_path_buf(),
            },
            _ => FileError::Read {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Reads the whole file into memory.
pub fn read_binary_file(path: impl AsRef<Path>) -> Result<Vec<u8>, FileError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| FileError::from_io(path, e))?;
    debug!("read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let path = std::env::temp_dir().join("ember-core-definitely-missing.spv");
        let _ = std::fs::remove_file(&path);
        match read_binary_file(&path) {
            Err(FileError::NotFound { path: p }) => assert_eq!(p, path),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn reading_a_directory_is_a_read_error() {
        let dir = std::env::temp_dir();
        assert!(matches!(
            read_binary_file(&dir),
            Err(FileError::Read { .. })
        ));
    }

    #[test]
    fn reads_bytes_verbatim() {
        let path = std::env::temp_dir().join(format!("ember-core-{}.bin", std::process::id()));
        std::fs::write(&path, [0x03, 0x02, 0x23, 0x07, 0xff]).unwrap();
        let bytes = read_binary_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(bytes, vec![0x03, 0x02, 0x23, 0x07, 0xff]);
    }
}
