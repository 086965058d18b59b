//! Bundle introspection
//!
//! A bundle is either an extracted directory or a gzip-compressed tarball
//! holding the k0rdent Helm chart(s) and one OCI archive per image.

use crate::error::{AirgapError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Chart whose `Chart.yaml` carries the bundle version
pub const CHART_NAME: &str = "k0rdent-enterprise";
const CHART_MANIFEST: &str = "Chart.yaml";
const IMAGE_ARCHIVE_EXTENSION: &str = "tar";
/// Archives whose path contains this are helper binaries, not images
const HELPER_MARKER: &str = "skopeo";

fn is_compressed_tarball(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

/// Read the k0rdent version from a bundle directory or tarball
pub fn extract_version(path: &Path) -> Result<String> {
    if path.is_dir() {
        return version_from_dir(path);
    }
    if !path.exists() {
        return Err(AirgapError::BundleNotFound(path.to_path_buf()));
    }
    version_from_tarball(path)
}

/// Stream the tarball and read the first chart manifest belonging to [`CHART_NAME`]
fn version_from_tarball(path: &Path) -> Result<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.to_string_lossy().into_owned();
        if entry_path.contains(CHART_NAME) && entry_path.ends_with(CHART_MANIFEST) {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            return parse_chart_version(&content);
        }
    }

    Err(AirgapError::ChartNotFound)
}

fn version_from_dir(dir: &Path) -> Result<String> {
    let charts = dir.join("charts");
    if !charts.is_dir() {
        return Err(AirgapError::ChartNotFound);
    }

    let mut entries = std::fs::read_dir(&charts)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(CHART_NAME) {
            continue;
        }

        let path = entry.path();
        if path.is_dir() {
            let content = std::fs::read_to_string(path.join(CHART_MANIFEST))?;
            return parse_chart_version(&content);
        }

        if name.ends_with(".tar") || name.ends_with(".tgz") {
            match version_from_chart_archive(&path) {
                Ok(version) => return Ok(version),
                Err(e) => {
                    tracing::debug!("No usable chart manifest in {}: {}", path.display(), e);
                    continue;
                }
            }
        }
    }

    Err(AirgapError::ChartNotFound)
}

/// A packaged chart; the manifest is matched by base name
fn version_from_chart_archive(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "tgz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_manifest = entry
            .path()?
            .file_name()
            .is_some_and(|name| name == CHART_MANIFEST);
        if is_manifest {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            return parse_chart_version(&content);
        }
    }

    Err(AirgapError::ChartNotFound)
}

/// First `version:` line of a chart manifest, quotes stripped
pub fn parse_chart_version(content: &str) -> Result<String> {
    for line in content.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("version:") {
            let version = value.trim().trim_matches('"').trim_matches('\'');
            if version.is_empty() {
                return Err(AirgapError::VersionEmpty);
            }
            return Ok(version.to_string());
        }
    }
    Err(AirgapError::VersionNotFound)
}

/// A bundle ready to be walked on disk
///
/// Tarballs are unpacked into a scratch directory that lives as long as
/// this value.
#[derive(Debug)]
pub struct PreparedBundle {
    root: PathBuf,
    _scratch: Option<TempDir>,
}

impl PreparedBundle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_extracted(&self) -> bool {
        self._scratch.is_some()
    }
}

/// Use a directory in place, or unpack a `.tar.gz`/`.tgz` bundle
pub fn prepare_bundle(path: &Path) -> Result<PreparedBundle> {
    if path.is_dir() {
        return Ok(PreparedBundle {
            root: path.to_path_buf(),
            _scratch: None,
        });
    }
    if !path.exists() {
        return Err(AirgapError::BundleNotFound(path.to_path_buf()));
    }
    if !is_compressed_tarball(path) {
        return Err(AirgapError::UnsupportedBundle(path.to_path_buf()));
    }

    let scratch = tempfile::Builder::new()
        .prefix("k0rdentd-bundle-")
        .tempdir()?;
    tracing::info!(
        "Extracting bundle {} to {}",
        path.display(),
        scratch.path().display()
    );

    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));
    archive.unpack(scratch.path())?;

    Ok(PreparedBundle {
        root: scratch.path().to_path_buf(),
        _scratch: Some(scratch),
    })
}

/// Every image archive under `root`, sorted
pub fn find_image_archives(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/**/*.{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        IMAGE_ARCHIVE_EXTENSION
    );

    let mut archives = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry.map_err(glob::GlobError::into_error)?;
        if !path.is_file() || path.to_string_lossy().contains(HELPER_MARKER) {
            continue;
        }
        archives.push(path);
    }
    archives.sort();

    tracing::debug!("Found {} image archives in {}", archives.len(), root.display());
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::tempdir;

    fn append(builder: &mut tar::Builder<impl std::io::Write>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn write_tarball(path: &Path, files: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            append(&mut builder, name, data);
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_parse_strips_quotes() {
        assert_eq!(
            parse_chart_version("apiVersion: v2\nname: x\nversion: \"1.2.3\"\n").unwrap(),
            "1.2.3"
        );
        assert_eq!(parse_chart_version("  version: '1.0.0'").unwrap(), "1.0.0");
    }

    #[test]
    fn test_parse_empty_and_missing_fail() {
        assert!(matches!(
            parse_chart_version("name: x\nversion: \"\"\n"),
            Err(AirgapError::VersionEmpty)
        ));
        assert!(matches!(
            parse_chart_version("name: x\n"),
            Err(AirgapError::VersionNotFound)
        ));
    }

    #[test]
    fn test_version_from_directory() {
        let dir = tempdir().unwrap();
        let chart = dir.path().join("charts/k0rdent-enterprise");
        std::fs::create_dir_all(&chart).unwrap();
        std::fs::write(chart.join("Chart.yaml"), "version: 1.2.2\n").unwrap();

        assert_eq!(extract_version(dir.path()).unwrap(), "1.2.2");
    }

    #[test]
    fn test_version_from_nested_chart_archive() {
        let dir = tempdir().unwrap();
        let charts = dir.path().join("charts");
        std::fs::create_dir_all(&charts).unwrap();

        let file = File::create(charts.join("k0rdent-enterprise_1.3.0.tar")).unwrap();
        let mut builder = tar::Builder::new(file);
        append(
            &mut builder,
            "k0rdent-enterprise/Chart.yaml",
            b"name: k0rdent-enterprise\nversion: \"1.3.0\"\n",
        );
        builder.finish().unwrap();

        assert_eq!(extract_version(dir.path()).unwrap(), "1.3.0");
    }

    #[test]
    fn test_version_from_tarball() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("airgap-bundle-1.2.3.tar.gz");
        write_tarball(
            &bundle,
            &[
                ("other/Chart.yaml", b"version: 9.9.9\n"),
                ("charts/k0rdent-enterprise/Chart.yaml", b"version: \"1.2.3\"\n"),
            ],
        );

        assert_eq!(extract_version(&bundle).unwrap(), "1.2.3");
    }

    #[test]
    fn test_chart_missing_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            extract_version(dir.path()),
            Err(AirgapError::ChartNotFound)
        ));
        assert!(matches!(
            extract_version(&dir.path().join("missing.tar.gz")),
            Err(AirgapError::BundleNotFound(_))
        ));
    }

    #[test]
    fn test_prepare_and_find_archives() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("bundle.tgz");
        write_tarball(
            &bundle,
            &[
                ("k0sproject/k0s_v1.32.8.tar", b"img"),
                ("charts/k0rdent-enterprise_1.2.2.tar", b"chart"),
                ("bin/skopeo.tar", b"helper"),
                ("README.md", b"docs"),
            ],
        );

        let prepared = prepare_bundle(&bundle).unwrap();
        assert!(prepared.is_extracted());

        let archives = find_image_archives(prepared.root()).unwrap();
        let relative: Vec<_> = archives
            .iter()
            .map(|p| p.strip_prefix(prepared.root()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("charts/k0rdent-enterprise_1.2.2.tar"),
                PathBuf::from("k0sproject/k0s_v1.32.8.tar"),
            ]
        );
    }

    #[test]
    fn test_prepare_directory_in_place() {
        let dir = tempdir().unwrap();
        let prepared = prepare_bundle(dir.path()).unwrap();
        assert_eq!(prepared.root(), dir.path());
        assert!(!prepared.is_extracted());
    }

    #[test]
    fn test_prepare_rejects_unknown_format() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("bundle.zip");
        std::fs::write(&bundle, b"PK").unwrap();
        assert!(matches!(
            prepare_bundle(&bundle),
            Err(AirgapError::UnsupportedBundle(_))
        ));
    }
}
