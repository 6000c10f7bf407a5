//! Model file checks
//!
//! Verifies a model path before it is handed to the engine, so missing,
//! unreadable or non-GGUF files fail with a precise error instead of an
//! opaque backend failure.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x46554747;

/// Size of the fixed GGUF header: magic, version, tensor count, kv count
const GGUF_HEADER_LEN: usize = 24;

/// Errors raised before any generation can start
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Model file does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("Model file cannot be read: {path}")]
    FileNotReadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not a usable GGUF model ({path}): {reason}")]
    InvalidModel { path: PathBuf, reason: String },

    #[error("Could not load model {name}: {reason}")]
    ModelLoad { name: String, reason: String },
}

/// A model file that exists, is readable and carries a GGUF header.
#[derive(Debug, Clone)]
pub struct ModelFile {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File name, used as the model identifier in responses
    pub name: String,
    /// GGUF format version
    pub version: u32,
    /// Number of tensors in the model
    pub tensor_count: u64,
}

impl ModelFile {
    /// Checks `path` and reads its header.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        if !path.exists() {
            return Err(LoadError::FileNotFound(path));
        }

        let mut file = File::open(&path).map_err(|source| LoadError::FileNotReadable {
            path: path.clone(),
            source,
        })?;

        let mut header = [0u8; GGUF_HEADER_LEN];
        if let Err(e) = file.read_exact(&mut header) {
            let reason = match e.kind() {
                io::ErrorKind::UnexpectedEof => "file too small to be valid GGUF".to_string(),
                _ => e.to_string(),
            };
            return Err(LoadError::InvalidModel { path, reason });
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != GGUF_MAGIC {
            return Err(LoadError::InvalidModel {
                path,
                reason: format!(
                    "magic bytes mismatch (expected 0x{:08X}, got 0x{:08X})",
                    GGUF_MAGIC, magic
                ),
            });
        }

        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if !(2..=3).contains(&version) {
            return Err(LoadError::InvalidModel {
                path,
                reason: format!("unsupported GGUF version {}", version),
            });
        }

        let mut count = [0u8; 8];
        count.copy_from_slice(&header[8..16]);
        let tensor_count = u64::from_le_bytes(count);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        tracing::debug!("Model file {:?} passed header checks", path);

        Ok(Self {
            path,
            name,
            version,
            tensor_count,
        })
    }
}
