use crate::domain::{ArtifactKind, Locator};
use crate::error::MmitError;
use crate::sample::SampleRecord;

const SCHEMES: &[&str] = &["s3://", "s3a://", "s3n://"];

/// Maps a sample's stored artifact path to a store/prefix/file triple.
///
/// The leading path segment names the store and the final segment the file.
/// For imzML and ibd files the name is rebuilt as `<dataset>.<ext>`; any file
/// segment already present in the stored path is dropped from the prefix.
pub fn resolve(sample: &SampleRecord, kind: ArtifactKind) -> Result<Locator, MmitError> {
    let raw = sample
        .artifact_path(kind)
        .ok_or_else(|| MmitError::MissingArtifactPath {
            dataset: sample.dataset_name.clone(),
            kind,
        })?;

    let path = strip_scheme(raw.trim());
    let segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    let (store, rest) = segments
        .split_first()
        .ok_or_else(|| MmitError::InvalidArtifactPath(raw.to_string()))?;

    match kind.derived_extension() {
        Some(ext) => {
            let file_name = format!("{}.{}", sample.dataset_name, ext);
            let prefix = match rest.split_last() {
                Some((last, init)) if names_file(last, &file_name, ext) => init,
                _ => rest,
            };
            Ok(Locator::new(*store, prefix.join("/"), file_name))
        }
        None => {
            let (file_name, prefix) = rest.split_last().ok_or_else(|| {
                MmitError::InvalidArtifactPath(format!("{raw}: no file name after store"))
            })?;
            Ok(Locator::new(*store, prefix.join("/"), *file_name))
        }
    }
}

fn strip_scheme(path: &str) -> &str {
    SCHEMES
        .iter()
        .find_map(|scheme| path.strip_prefix(scheme))
        .unwrap_or(path)
}

fn names_file(segment: &str, file_name: &str, ext: &str) -> bool {
    if segment == file_name {
        return true;
    }
    segment
        .rsplit_once('.')
        .is_some_and(|(_, suffix)| suffix.eq_ignore_ascii_case(ext))
}
