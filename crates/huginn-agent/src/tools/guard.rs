//! Workspace boundary enforcement for file and shell tools.

use std::path::{Path, PathBuf};

use huginn_core::config::ToolsConfig;

/// The workspace root used by file/shell tools: the configured directory,
/// falling back to the process working directory.
pub fn workspace_root(config: &ToolsConfig) -> PathBuf {
    config
        .workspace_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Resolve a user-supplied path against the workspace boundary.
///
/// When `restrict` is set, the resolved path must stay inside `workspace`
/// after symlink resolution. Relative paths are joined onto the workspace
/// either way. For paths that do not exist yet (writes), the nearest
/// existing ancestor is what gets checked.
pub fn resolve_in_workspace(
    restrict: bool,
    workspace: &Path,
    path: &str,
) -> Result<PathBuf, String> {
    let candidate = {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            workspace.join(p)
        }
    };

    if !restrict {
        return Ok(candidate);
    }

    let workspace = workspace
        .canonicalize()
        .map_err(|e| format!("workspace root is unusable: {e}"))?;

    let resolved = canonicalize_allowing_missing(&candidate)?;
    if resolved.starts_with(&workspace) {
        Ok(candidate)
    } else {
        Err(format!(
            "path '{}' is outside the workspace",
            candidate.display()
        ))
    }
}

/// Canonicalize `path`, tolerating a missing final component chain by
/// resolving the nearest existing ancestor and re-appending the rest.
fn canonicalize_allowing_missing(path: &Path) -> Result<PathBuf, String> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }

    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Err(format!("cannot resolve path '{}'", path.display())),
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| format!("cannot resolve path '{}': {e}", path.display()))?;
    for part in tail.iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}
