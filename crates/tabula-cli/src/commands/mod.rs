pub(crate) mod admin;
pub(crate) mod eval;
pub(crate) mod routine;
pub(crate) mod run;

use std::path::{Path, PathBuf};

/// Relative configured paths resolve against the working directory.
pub(crate) fn resolve_dir(cwd: &Path, configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() { path } else { cwd.join(path) }
}
