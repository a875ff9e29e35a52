use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::Result;

/// Modification times of every file under a set of directories.
///
/// The CLI does not report which files it touched, so the dispatcher takes
/// one snapshot before the run and one after and diffs them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, SystemTime>,
}

impl Snapshot {
    /// Directories that do not exist yet are recorded as empty.
    pub fn take(dirs: &[PathBuf]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for dir in dirs {
            collect(dir, &mut files)?;
        }
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in `after` that are new or carry a different mtime.
    pub fn changed(&self, after: &Snapshot) -> Vec<PathBuf> {
        after
            .files
            .iter()
            .filter(|(path, mtime)| self.files.get(*path) != Some(*mtime))
            .map(|(path, _)| path.clone())
            .collect()
    }
}

fn collect(dir: &Path, files: &mut BTreeMap<PathBuf, SystemTime>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect(&path, files)?;
        } else if file_type.is_file() {
            let modified = entry.metadata()?.modified()?;
            files.insert(path, modified);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let snap = Snapshot::take(&[dir.path().join("product")]).unwrap();
        assert!(snap.is_empty());
    }

    #[test]
    fn reports_new_and_touched_files_only() {
        let dir = TempDir::new().unwrap();
        let product = dir.path().join("product");
        fs::create_dir_all(product.join("features/F001-Login")).unwrap();
        fs::write(product.join("product.md"), "# Product\n").unwrap();
        fs::write(product.join("features/F001-Login/feature.md"), "# Login\n").unwrap();

        let before = Snapshot::take(std::slice::from_ref(&product)).unwrap();
        assert_eq!(before.len(), 2);

        let plan = product.join("features/F001-Login/plan.md");
        fs::write(&plan, "# Plan\n").unwrap();
        let doc = product.join("product.md");
        let file = fs::OpenOptions::new().write(true).open(&doc).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        let after = Snapshot::take(std::slice::from_ref(&product)).unwrap();
        let changed = before.changed(&after);
        // sorted by path
        assert_eq!(changed, vec![plan, doc]);
    }
}
