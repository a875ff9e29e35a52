use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `FLOW_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.claude/`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
/// The result is absolute whenever the working directory is readable.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(p) = explicit {
        return cwd.join(p);
    }
    find_upward(&cwd, ".claude")
        .or_else(|| find_upward(&cwd, ".git"))
        .unwrap_or(cwd)
}

/// Nearest ancestor of `start` (inclusive) containing a directory `marker`.
fn find_upward(start: &Path, marker: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).is_dir())
        .map(Path::to_path_buf)
}

/// Template roots to search, first wins. Without explicit `--plugin` dirs
/// the project's own `.claude/` is used.
pub fn plugin_roots(root: &Path, explicit: &[PathBuf]) -> Vec<PathBuf> {
    if explicit.is_empty() {
        return vec![root.join(".claude")];
    }
    explicit
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { root.join(p) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_root(Some(dir.path())), dir.path());
    }

    #[test]
    fn finds_claude_dir_from_nested_path() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude")).unwrap();
        let deep = dir.path().join("product/features/F001-Login");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(find_upward(&deep, ".claude").as_deref(), Some(dir.path()));
    }

    #[test]
    fn missing_marker_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(find_upward(dir.path(), "no-such-marker-dir").is_none());
    }

    #[test]
    fn plugin_roots_default_to_project_claude_dir() {
        let root = Path::new("/work/app");
        assert_eq!(plugin_roots(root, &[]), vec![root.join(".claude")]);
        assert_eq!(
            plugin_roots(root, &[PathBuf::from("plugins/prod-flow"), PathBuf::from("/opt/p")]),
            vec![root.join("plugins/prod-flow"), PathBuf::from("/opt/p")]
        );
    }
}
