//! The filesystem and environment boundary every side-effecting tool
//! passes through.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use pigo_core::Error;

/// Environment variable name prefixes (uppercased) stripped from every
/// subprocess.
const SENSITIVE_PREFIXES: &[&str] = &["OPENAI_", "API_KEY", "SECRET", "TOKEN", "AWS_SECRET"];

/// Validate a tool-supplied path against the allowed directory.
///
/// The path must be absolute (tools never resolve relative to an implicit
/// cwd). Existing paths are resolved through symlinks so a link cannot
/// escape the boundary; for paths being created, the nearest existing
/// ancestor is resolved instead. An empty `allowed_dir` disables the
/// boundary check.
pub fn validate_path(path: &str, allowed_dir: &Path) -> Result<PathBuf, Error> {
    if path.trim().is_empty() {
        return Err(Error::invalid_argument("path is empty"));
    }

    let requested = Path::new(path);
    if !requested.is_absolute() {
        return Err(Error::invalid_argument(format!(
            "path '{}' must be absolute",
            path
        )));
    }

    let cleaned = lexical_clean(requested);
    let resolved = resolve_symlinks(&cleaned)?;

    if allowed_dir.as_os_str().is_empty() {
        return Ok(resolved);
    }

    let allowed = resolve_symlinks(&lexical_clean(allowed_dir))?;
    match resolved.strip_prefix(&allowed) {
        Ok(rel) if !rel.starts_with("..") => Ok(resolved),
        _ => Err(Error::permission_denied(format!(
            "path '{}' is outside the allowed directory",
            path
        ))),
    }
}

/// Remove `.` and resolve `..` lexically, without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            c => cleaned.push(c),
        }
    }
    cleaned
}

/// Canonicalize the longest existing prefix of `path` and re-append the
/// rest, so symlinked ancestors are seen through even for paths that do not
/// exist yet.
fn resolve_symlinks(path: &Path) -> Result<PathBuf, Error> {
    if let Ok(real) = path.canonicalize() {
        return Ok(real);
    }

    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| Error::invalid_argument(format!("invalid path '{}': {}", path.display(), e)))?;
    for name in tail.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// The boundary configuration shared by every file-accepting tool.
#[derive(Debug, Clone)]
pub struct Sandbox {
    allowed_dir: PathBuf,
}

impl Sandbox {
    pub fn new(allowed_dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_dir: allowed_dir.into(),
        }
    }

    /// No boundary: paths are still required to be absolute and are still
    /// symlink-resolved, but nothing is out of bounds.
    pub fn unrestricted() -> Self {
        Self {
            allowed_dir: PathBuf::new(),
        }
    }

    pub fn allowed_dir(&self) -> &Path {
        &self.allowed_dir
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf, Error> {
        validate_path(path, &self.allowed_dir)
    }
}

/// The process environment minus anything secret-shaped.
pub fn sanitize_env() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(name, _)| {
            let upper = name.to_uppercase();
            !SENSITIVE_PREFIXES
                .iter()
                .any(|prefix| upper.starts_with(prefix))
        })
        .collect()
}
