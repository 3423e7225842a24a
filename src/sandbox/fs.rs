//! The sandbox's virtual filesystem.
//!
//! Generated artifacts live here for the lifetime of one request. The
//! filesystem itself is process-wide: nothing is removed when a request ends,
//! which is why the pipeline clears stale PDFs at the *start* of every run.
//!
//! Two implementations:
//!
//! * [`MemoryFs`]: a name → bytes map; runtimes that draw through
//!   [`crate::sandbox::ExecutionContext::document`] need nothing more.
//! * [`DirFs`]: a real directory, required by runtimes that run user code
//!   in another process (the child writes files on its own).
//!
//! Listing order is lexicographic by file name for both, so "the first PDF"
//! is deterministic.

use crate::error::Code2PdfError;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Extension that marks a file as a harvestable artifact.
pub const PDF_EXTENSION: &str = ".pdf";

/// Flat, process-wide file store shared by every request on a sandbox.
pub trait SandboxFs: Send + Sync + fmt::Debug {
    /// All file names, lexicographically ordered.
    fn list(&self) -> Result<Vec<String>, Code2PdfError>;
    fn read(&self, name: &str) -> Result<Vec<u8>, Code2PdfError>;
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), Code2PdfError>;
    fn remove(&self, name: &str) -> Result<(), Code2PdfError>;

    /// Backing directory, when there is one.
    fn root(&self) -> Option<&Path> {
        None
    }

    /// PDF artifacts in listing order.
    fn list_pdfs(&self) -> Result<Vec<String>, Code2PdfError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|name| name.ends_with(PDF_EXTENSION))
            .collect())
    }

    /// Delete every PDF artifact. A file that cannot be removed is logged
    /// and skipped; returns how many were removed.
    fn remove_pdfs(&self) -> Result<usize, Code2PdfError> {
        let mut removed = 0;
        for name in self.list_pdfs()? {
            match self.remove(&name) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove stale artifact '{}': {}", name, e),
            }
        }
        Ok(removed)
    }
}

/// Reject anything that is not a plain file name.
fn check_name(name: &str) -> Result<(), Code2PdfError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(Code2PdfError::Sandbox {
            detail: format!("'{name}' is not a plain file name"),
        });
    }
    Ok(())
}

// ── MemoryFs ─────────────────────────────────────────────────────────────

/// In-memory filesystem.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, Code2PdfError> {
        self.files
            .lock()
            .map_err(|_| Code2PdfError::Internal("sandbox filesystem lock poisoned".into()))
    }
}

impl fmt::Debug for MemoryFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("MemoryFs").field("files", &names).finish()
    }
}

impl SandboxFs for MemoryFs {
    fn list(&self) -> Result<Vec<String>, Code2PdfError> {
        Ok(self.files()?.keys().cloned().collect())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, Code2PdfError> {
        self.files()?
            .get(name)
            .cloned()
            .ok_or_else(|| Code2PdfError::SandboxIo {
                path: PathBuf::from(name),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), Code2PdfError> {
        check_name(name)?;
        self.files()?.insert(name.to_string(), bytes.to_vec());
        debug!("sandbox: wrote {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), Code2PdfError> {
        self.files()?.remove(name);
        Ok(())
    }
}

// ── DirFs ────────────────────────────────────────────────────────────────

/// Directory-backed filesystem.
pub struct DirFs {
    root: PathBuf,
    /// Keeps an owned temp directory alive; deleted when the `DirFs` drops.
    _temp_dir: Option<TempDir>,
}

impl DirFs {
    /// Use an existing directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Code2PdfError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| Code2PdfError::SandboxIo {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            _temp_dir: None,
        })
    }

    /// A fresh temporary directory owned by this filesystem.
    pub fn temp() -> Result<Self, Code2PdfError> {
        let dir = tempfile::Builder::new()
            .prefix("code2pdf-sandbox-")
            .tempdir()
            .map_err(|source| Code2PdfError::SandboxIo {
                path: std::env::temp_dir(),
                source,
            })?;
        Ok(Self {
            root: dir.path().to_path_buf(),
            _temp_dir: Some(dir),
        })
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, Code2PdfError> {
        check_name(name)?;
        Ok(self.root.join(name))
    }
}

impl fmt::Debug for DirFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirFs")
            .field("root", &self.root)
            .field("temporary", &self._temp_dir.is_some())
            .finish()
    }
}

impl SandboxFs for DirFs {
    fn list(&self) -> Result<Vec<String>, Code2PdfError> {
        let io_err = |source| Code2PdfError::SandboxIo {
            path: self.root.clone(),
            source,
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, Code2PdfError> {
        let path = self.path_of(name)?;
        std::fs::read(&path).map_err(|source| Code2PdfError::SandboxIo { path, source })
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), Code2PdfError> {
        let path = self.path_of(name)?;
        std::fs::write(&path, bytes).map_err(|source| Code2PdfError::SandboxIo { path, source })?;
        debug!("sandbox: wrote {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), Code2PdfError> {
        let path = self.path_of(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Code2PdfError::SandboxIo { path, source }),
        }
    }

    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}
