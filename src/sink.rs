use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::MmitError;

/// Payload handed to the sink, text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Directory-creating writer rooted at the run's output directory.
#[derive(Debug, Clone)]
pub struct Sink {
    root: Utf8PathBuf,
}

impl Sink {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn destination(&self, path: &str, file_name: &str) -> Utf8PathBuf {
        let mut dest = self.root.clone();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            dest.push(segment);
        }
        dest.join(file_name)
    }

    /// Writes `payload` to `<root>/<path>/<file_name>` and returns the file path
    /// and the number of bytes written.
    pub fn write(
        &self,
        path: &str,
        file_name: &str,
        payload: &Payload,
    ) -> Result<(Utf8PathBuf, u64), MmitError> {
        if file_name.is_empty() || file_name.contains('/') || file_name == ".." {
            return Err(MmitError::Filesystem(format!(
                "invalid file name for sink: {file_name:?}"
            )));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(MmitError::Filesystem(format!(
                "sink path escapes output root: {path}"
            )));
        }

        let dest = self.destination(path, file_name);
        let parent = dest
            .parent()
            .ok_or_else(|| MmitError::Filesystem("invalid destination path".to_string()))?;
        // create_dir_all tolerates a concurrent creator of the same directory
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MmitError::Filesystem(format!("create {parent}: {err}")))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".mmit-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| MmitError::Filesystem(err.to_string()))?;
        temp.write_all(payload.as_bytes())
            .map_err(|err| MmitError::Filesystem(format!("write {dest}: {err}")))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| MmitError::Filesystem(format!("persist {dest}: {err}")))?;

        Ok((dest, payload.len() as u64))
    }
}
