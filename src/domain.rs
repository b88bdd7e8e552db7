use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MmitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Imzml,
    Ibd,
    Image,
    Annotation,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Imzml,
        ArtifactKind::Ibd,
        ArtifactKind::Image,
        ArtifactKind::Annotation,
    ];

    /// Extension appended to the dataset name for kinds whose file name is derived.
    pub fn derived_extension(self) -> Option<&'static str> {
        match self {
            ArtifactKind::Imzml => Some("imzML"),
            ArtifactKind::Ibd => Some("ibd"),
            ArtifactKind::Image | ArtifactKind::Annotation => None,
        }
    }

    pub fn encoding(self) -> Encoding {
        match self {
            ArtifactKind::Imzml | ArtifactKind::Annotation => Encoding::Text,
            ArtifactKind::Ibd | ArtifactKind::Image => Encoding::Binary,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Imzml => write!(f, "imzml"),
            ArtifactKind::Ibd => write!(f, "ibd"),
            ArtifactKind::Image => write!(f, "image"),
            ArtifactKind::Annotation => write!(f, "annotation"),
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = MmitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "imzml" => Ok(ArtifactKind::Imzml),
            "ibd" => Ok(ArtifactKind::Ibd),
            "image" | "images" | "optical_image" => Ok(ArtifactKind::Image),
            "annotation" | "annotations" => Ok(ArtifactKind::Annotation),
            _ => Err(MmitError::InvalidArtifactPath(format!(
                "unknown artifact kind: {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Text,
    Binary,
}

/// Addressing triple for one artifact of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Locator {
    pub store: String,
    pub path_prefix: String,
    pub file_name: String,
}

impl Locator {
    pub fn new(
        store: impl Into<String>,
        path_prefix: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            store: store.into(),
            path_prefix: path_prefix.into(),
            file_name: file_name.into(),
        }
    }

    /// Object key inside the store.
    pub fn key(&self) -> String {
        if self.path_prefix.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.path_prefix, self.file_name)
        }
    }

    /// Splits a full object key into prefix and file name.
    pub fn from_key(store: &str, key: &str) -> Option<Self> {
        let key = key.trim_matches('/');
        if key.is_empty() {
            return None;
        }
        let (prefix, file_name) = key.rsplit_once('/').unwrap_or(("", key));
        Some(Self::new(store, prefix, file_name))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Imzml,
    Ibd,
    Image,
    AnnotationExport,
    Annotations,
    OpticalImage,
    Study,
}

impl Operation {
    /// Artifact kind fetched from the object store, for retrieval operations.
    pub fn artifact_kind(self) -> Option<ArtifactKind> {
        match self {
            Operation::Imzml => Some(ArtifactKind::Imzml),
            Operation::Ibd => Some(ArtifactKind::Ibd),
            Operation::Image => Some(ArtifactKind::Image),
            Operation::AnnotationExport => Some(ArtifactKind::Annotation),
            Operation::Annotations | Operation::OpticalImage | Operation::Study => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Imzml => write!(f, "imzml"),
            Operation::Ibd => write!(f, "ibd"),
            Operation::Image => write!(f, "image"),
            Operation::AnnotationExport => write!(f, "annotation-export"),
            Operation::Annotations => write!(f, "annotations"),
            Operation::OpticalImage => write!(f, "optical-image"),
            Operation::Study => write!(f, "study"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StudyFormat {
    #[default]
    Isatab,
    Isajson,
}
