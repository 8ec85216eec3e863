//! Validation of model-supplied file paths.
//!
//! Every path a tool touches must resolve under the sandbox workspace root.
//! Accepted forms: a relative path (`app/page.tsx`, `./app/page.tsx`) or an
//! absolute path inside the root (`/home/user/app/page.tsx`). Anything
//! containing `..` is refused outright, even inside a file name.

use crate::errors::SandboxError;

/// Default workspace root inside the sandbox.
pub const DEFAULT_WORKSPACE_ROOT: &str = "/home/user";

/// A path that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePath {
    /// Normalized path relative to the workspace root; the key in the
    /// accumulated file map.
    pub relative: String,
    /// Absolute path inside the sandbox.
    pub absolute: String,
}

fn reject(path: &str, reason: &str) -> SandboxError {
    SandboxError::PathRejected {
        path: path.escape_debug().to_string(),
        reason: reason.to_string(),
    }
}

pub fn validate_path(raw: &str, workspace_root: &str) -> Result<WorkspacePath, SandboxError> {
    if raw.trim().is_empty() {
        return Err(reject(raw, "empty path"));
    }
    if raw.contains(['\0', '\n', '\r']) {
        return Err(reject(raw, "control character in path"));
    }
    if raw.contains('\\') {
        return Err(reject(raw, "backslash in path"));
    }
    if raw.contains("..") {
        return Err(reject(raw, "parent directory reference"));
    }

    let root = workspace_root.trim_end_matches('/');
    let rest = if raw.starts_with('/') {
        match raw.strip_prefix(root).filter(|r| r.is_empty() || r.starts_with('/')) {
            Some(inside) => inside,
            None => return Err(reject(raw, "absolute path outside the workspace")),
        }
    } else {
        raw
    };

    let mut segments = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => continue,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(reject(raw, "path names the workspace root"));
    }

    let relative = segments.join("/");
    let absolute = format!("{}/{}", root, relative);
    Ok(WorkspacePath { relative, absolute })
}
