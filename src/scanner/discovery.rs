use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of walking one or more roots: candidate image files plus any
/// directories that could not be read. Errors never abort the walk.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub files: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Recursively enumerate image files under `root`, filtered by
/// lowercase extension.
pub fn discover_images(root: &Path, extensions: &[String]) -> DiscoveryResult {
    let mut result = DiscoveryResult::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                result.errors.push(format!(
                    "{}: {e}",
                    e.path().unwrap_or(root).display()
                ));
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if extensions.iter().any(|e| e.to_lowercase() == ext_lower) {
                result.files.push(path.to_path_buf());
            }
        }
    }

    // Sort by path for consistent ordering
    result.files.sort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_discover_images() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("photo1.jpg")).unwrap();
        File::create(dir.path().join("photo2.PNG")).unwrap();
        File::create(dir.path().join("document.txt")).unwrap();

        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join("subdir/photo3.jpeg")).unwrap();

        let extensions = vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()];
        let result = discover_images(dir.path(), &extensions);

        assert_eq!(result.files.len(), 3);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error_not_a_panic() {
        let result = discover_images(
            Path::new("/definitely/not/a/real/root"),
            &["jpg".to_string()],
        );
        assert!(result.files.is_empty());
        assert_eq!(result.errors.len(), 1);
    }
}
