//! External tool lookup

use std::path::{Path, PathBuf};

/// Resolve `name` against `PATH`, like `command -v`
///
/// A name containing a path separator is checked as-is.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = Path::new(name);
        return is_executable(path).then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_finds_shell() {
        assert!(find_executable("sh").is_some());
    }

    #[test]
    fn test_missing_tool() {
        assert!(find_executable("k0rdentd-definitely-not-installed").is_none());
        assert!(find_executable("/nonexistent/bin/tool").is_none());
    }
}
