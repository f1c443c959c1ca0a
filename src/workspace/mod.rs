//! Path & workspace guard (§6 "Environment hooks", SPEC_FULL §12).
//!
//! Grounded on the teacher's `security/policy.rs::validate_path`, with the
//! single `workspace_root` generalized into the three named roots
//! `original_source/path_management.py`'s `PathManager` distinguishes
//! (`workspace_path`, `output_path`, `project_path` — renamed here to
//! [`PathRoot::Scratch`] to match this system's terminology). The
//! teacher's command-risk classification, rate limiting, and audit log have
//! no counterpart in this spec's tool contract and are left behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A named filesystem root a tool's path argument may be confined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathRoot {
    Workspace,
    Output,
    Scratch,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathGuardError {
    #[error("path contains a null byte")]
    NullByte,
    #[error("path traversal ('..') is not allowed")]
    Traversal,
    #[error("no root configured for {0:?}")]
    RootNotConfigured(PathRoot),
    #[error("path escapes the configured {0:?} root")]
    OutsideRoot(PathRoot),
}

/// Confines tool filesystem access to a fixed set of named roots
/// (§6 "Environment hooks").
pub struct PathGuard {
    roots: HashMap<PathRoot, PathBuf>,
}

impl PathGuard {
    pub fn new(roots: HashMap<PathRoot, PathBuf>) -> Self {
        Self { roots }
    }

    /// Resolve `relative` against `root`, rejecting it per the validation
    /// order carried over from the teacher's `validate_path`: null byte →
    /// literal `..` substring → canonicalize-or-raw → confinement check.
    pub fn resolve(&self, root: PathRoot, relative: &Path) -> Result<PathBuf, PathGuardError> {
        let path_str = relative.to_string_lossy();

        if path_str.contains('\0') {
            return Err(PathGuardError::NullByte);
        }
        if path_str.contains("..") {
            return Err(PathGuardError::Traversal);
        }

        let root_path = self.roots.get(&root).ok_or(PathGuardError::RootNotConfigured(root))?;
        let candidate = if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            root_path.join(relative)
        };

        let canonical_candidate = candidate.canonicalize().unwrap_or(candidate);
        let canonical_root = root_path.canonicalize().unwrap_or_else(|_| root_path.clone());

        if !canonical_candidate.starts_with(&canonical_root) {
            return Err(PathGuardError::OutsideRoot(root));
        }

        Ok(canonical_candidate)
    }
}
