//! Persistent storage
//!
//! Locates the application data directory and persists settings there.

use std::path::PathBuf;
use thiserror::Error;

pub mod settings;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access data directory: {0}")]
    DataDirError(String),
    #[error("Failed to read or write file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to serialize/deserialize JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Get the application data directory
///
/// Returns the platform-specific application data directory:
/// - Windows: `C:\Users\{user}\AppData\Roaming\llmodel\llmodel`
/// - macOS: `/Users/{user}/Library/Application Support/com.llmodel.llmodel`
/// - Linux: `/home/{user}/.local/share/llmodel`
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("com", "llmodel", "llmodel")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| StorageError::DataDirError("Could not determine data directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_names_the_application() {
        // no home directory in some sandboxes
        if let Ok(path) = get_data_dir() {
            assert!(path.to_string_lossy().contains("llmodel"));
        }
    }
}
