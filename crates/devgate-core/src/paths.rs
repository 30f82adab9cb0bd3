use crate::dev::config::CONFIG_FILES;
use std::path::{Component, Path, PathBuf};

/// Find the project root by walking up from `cwd`.
///
/// Returns the first directory containing a devgate/vite config file or a
/// `package.json`, or `None` if no ancestor has either.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        let has_config = CONFIG_FILES.iter().any(|name| current.join(name).exists());
        if has_config || current.join("package.json").exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. Does not touch the filesystem.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
