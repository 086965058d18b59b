//! Image reference derivation from bundle archive paths

use crate::error::{AirgapError, Result};
use std::fmt;
use std::path::Path;

const ARCHIVE_EXTENSION: &str = ".tar";
const DEFAULT_TAG: &str = "latest";

/// Repository path and tag an image archive is pushed under
///
/// Archives are laid out as `<namespace>/<name>_<tag>.tar` (or
/// `<name>:<tag>.tar`) relative to the bundle root; the directory part
/// becomes the repository namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Derive the reference for `archive`, which must live under `root`
    pub fn from_archive(root: &Path, archive: &Path) -> Result<Self> {
        let relative = archive
            .strip_prefix(root)
            .map_err(|_| AirgapError::ArchiveOutsideRoot {
                path: archive.to_path_buf(),
                root: root.to_path_buf(),
            })?;

        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(Self::from_relative_path(&relative))
    }

    /// Derive the reference from a `/`-separated path relative to the bundle root
    pub fn from_relative_path(relative: &str) -> Self {
        let relative = relative.strip_suffix(ARCHIVE_EXTENSION).unwrap_or(relative);

        let (dir, file) = match relative.rfind('/') {
            Some(idx) => (&relative[..idx], &relative[idx + 1..]),
            None => ("", relative),
        };

        let (name, tag) = match file.rfind('_').or_else(|| file.rfind(':')) {
            Some(idx) => (&file[..idx], &file[idx + 1..]),
            None => (file, DEFAULT_TAG),
        };

        let repository = if dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", dir, name)
        };

        Self {
            repository,
            tag: tag.to_string(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_underscore_separates_tag() {
        let image = ImageReference::from_archive(
            Path::new("/bundle"),
            Path::new("/bundle/charts/k0rdent-enterprise_1.2.2.tar"),
        )
        .unwrap();
        assert_eq!(image.repository, "charts/k0rdent-enterprise");
        assert_eq!(image.tag, "1.2.2");
        assert_eq!(image.to_string(), "charts/k0rdent-enterprise:1.2.2");
    }

    #[test]
    fn test_colon_separates_tag() {
        let image = ImageReference::from_relative_path("k0sproject/k0s:v1.32.8-k0s.0.tar");
        assert_eq!(image.repository, "k0sproject/k0s");
        assert_eq!(image.tag, "v1.32.8-k0s.0");
    }

    #[test]
    fn test_missing_separator_defaults_to_latest() {
        let image = ImageReference::from_relative_path("library/busybox.tar");
        assert_eq!(image.repository, "library/busybox");
        assert_eq!(image.tag, "latest");
    }

    #[test]
    fn test_underscore_wins_over_colon() {
        let image = ImageReference::from_relative_path("ns/app:x_1.0.tar");
        assert_eq!(image.repository, "ns/app:x");
        assert_eq!(image.tag, "1.0");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let root = PathBuf::from("/srv/bundle");
        let archive = root.join("quay.io/jetstack/cert-manager-controller_v1.16.2.tar");
        let first = ImageReference::from_archive(&root, &archive).unwrap();
        let second = ImageReference::from_archive(&root, &archive).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.repository, "quay.io/jetstack/cert-manager-controller");
    }

    #[test]
    fn test_archive_outside_root_is_rejected() {
        let err =
            ImageReference::from_archive(Path::new("/bundle"), Path::new("/other/a_1.tar"))
                .unwrap_err();
        assert!(matches!(err, AirgapError::ArchiveOutsideRoot { .. }));
    }
}
