//! Runtime root discovery and the on-disk layout beneath it.
//!
//! ```text
//! <root>/
//!   artifacts/<artifact>[/<version>]/types.json
//!   artifacts/<artifact>[/<version>]/web/static/
//!   data/<artifact>/<db>.db
//!   shared/
//! ```

use std::path::{Component, Path, PathBuf};

use crate::CliError;

/// Name of the directory that marks the runtime root.
pub const ROOT_DIR_NAME: &str = "relish";

/// An empty manifest, written by `-init`.
const EMPTY_MANIFEST: &str = "{\n  \"types\": [],\n  \"methods\": []\n}\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
}

impl Layout {
    /// Walks up from `start` to the nearest directory named `relish`. Its
    /// `rt/` subdirectory is the root when present.
    pub fn discover(start: &Path) -> Result<Layout, CliError> {
        let found = start
            .ancestors()
            .find(|dir| dir.file_name().is_some_and(|n| n == ROOT_DIR_NAME) && dir.is_dir())
            .ok_or_else(|| CliError::NoRoot(start.to_path_buf()))?;
        let rt = found.join("rt");
        let root = if rt.is_dir() { rt } else { found.to_path_buf() };
        Ok(Layout { root })
    }

    pub fn at(root: impl Into<PathBuf>) -> Layout {
        Layout { root: root.into() }
    }

    pub fn artifact_dir(&self, artifact: &str, version: Option<&str>) -> Result<PathBuf, CliError> {
        let mut dir = self.root.join("artifacts").join(relative(artifact)?);
        if let Some(v) = version {
            dir.push(relative(v)?);
        }
        Ok(dir)
    }

    pub fn data_dir(&self, artifact: &str) -> Result<PathBuf, CliError> {
        Ok(self.root.join("data").join(relative(artifact)?))
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.root.join("shared")
    }

    /// Creates the directory skeleton of a new artifact and an empty type
    /// manifest. Refuses to overwrite an existing manifest.
    pub fn init(&self, artifact: &str, webapp: bool) -> Result<PathBuf, CliError> {
        let dir = self.artifact_dir(artifact, None)?;
        let manifest = dir.join("types.json");
        if manifest.exists() {
            return Err(CliError::Exists(manifest));
        }
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(self.data_dir(artifact)?)?;
        std::fs::create_dir_all(self.shared_dir())?;
        if webapp {
            std::fs::create_dir_all(dir.join("web").join("static"))?;
        }
        std::fs::write(&manifest, EMPTY_MANIFEST)?;
        tracing::info!(artifact, path = %dir.display(), "initialized artifact");
        Ok(dir)
    }
}

/// An artifact identifier or version as a path that stays below its parent.
fn relative(id: &str) -> Result<PathBuf, CliError> {
    let path = PathBuf::from(id);
    let ok = !id.is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(path)
    } else {
        Err(CliError::Usage(format!("invalid artifact identifier '{id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_enclosing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let deep = tmp.path().join("relish/artifacts/shop/web");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(Layout::discover(&deep).unwrap().root, tmp.path().join("relish"));

        std::fs::create_dir_all(tmp.path().join("relish/rt")).unwrap();
        assert_eq!(Layout::discover(&deep).unwrap().root, tmp.path().join("relish/rt"));
    }

    #[test]
    fn missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(Layout::discover(tmp.path()), Err(CliError::NoRoot(_))));
    }

    #[test]
    fn init_creates_skeleton_once() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::at(tmp.path());
        let dir = layout.init("example.com/shop", true).unwrap();
        assert!(dir.join("types.json").is_file());
        assert!(dir.join("web/static").is_dir());
        assert!(tmp.path().join("data/example.com/shop").is_dir());
        assert!(matches!(layout.init("example.com/shop", false), Err(CliError::Exists(_))));
    }

    #[test]
    fn identifiers_stay_inside_root() {
        let layout = Layout::at("/r");
        assert!(layout.artifact_dir("../etc", None).is_err());
        assert!(layout.artifact_dir("/abs", None).is_err());
        assert_eq!(
            layout.artifact_dir("shop", Some("1.2")).unwrap(),
            PathBuf::from("/r/artifacts/shop/1.2")
        );
    }
}
