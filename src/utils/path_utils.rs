use std::path::PathBuf;
use tracing::debug;

/// Expands tilde (~) in a path string to the user's home directory.
pub fn expand_tilde_path_buf(path_str: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path_str).as_ref())
}

/// Resolves a user-supplied working directory to a canonical absolute path.
///
/// The error is a message fit for per-field display, not an `AppError`, so the
/// caller can fold it into a validation report alongside other fields.
pub fn resolve_working_directory(path_str: &str) -> Result<PathBuf, String> {
    let trimmed = path_str.trim();
    if trimmed.is_empty() {
        return Err("Path cannot be empty".to_string());
    }

    let expanded = expand_tilde_path_buf(trimmed);
    // dunce keeps Windows paths free of the \\?\ prefix that std canonicalize adds.
    let canonical = dunce::canonicalize(&expanded)
        .map_err(|_| "Invalid path: directory does not exist".to_string())?;

    if !canonical.is_dir() {
        return Err("Invalid path: not a directory".to_string());
    }

    debug!(input = %path_str, resolved = %canonical.display(), "Resolved working directory");
    Ok(canonical)
}
