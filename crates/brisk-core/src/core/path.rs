use crate::core::error::BriskResult;
use std::path::{Component, Path, PathBuf};

/// Name of the project configuration file
pub const CONFIG_FILE_NAME: &str = "brisk.yaml";

/// Find the config file by walking up from `start`
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> BriskResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Lexically normalize a path: drop `.` segments and fold `..` into the parent.
///
/// Does not touch the filesystem, so symlinks are not followed.
pub fn normalize_path(path: &Path) -> PathBuf {
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

/// Stable module identifier: the path relative to the project root with `/` separators.
///
/// Paths outside the root keep their `../` prefix so ids stay unique.
pub fn module_id(root: &Path, path: &Path) -> String {
    let relative = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
    to_slash(&relative)
}

/// Render a path with forward slashes regardless of platform
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|s| s != "/" && s != "\\")
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve `path` against `base` unless it is already absolute
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("project");
        fs::create_dir_all(project_dir.join("src/components")).unwrap();
        fs::write(project_dir.join(CONFIG_FILE_NAME), "entry: src/index.ts\n").unwrap();

        let found = find_config_file(&project_dir.join("src/components")).unwrap();
        assert_eq!(found, project_dir.join(CONFIG_FILE_NAME));
        assert!(find_config_file(temp.path()).is_none());
    }

    #[test]
    fn test_ensure_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("test_dir");

        ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_normalize_path_folds_parent_segments() {
        let path = Path::new("/app/src/./lib/../util.ts");
        assert_eq!(normalize_path(path), PathBuf::from("/app/src/util.ts"));
    }

    #[test]
    fn test_module_id_is_root_relative() {
        let id = module_id(Path::new("/app"), Path::new("/app/src/util.ts"));
        assert_eq!(id, "src/util.ts");
    }
}
