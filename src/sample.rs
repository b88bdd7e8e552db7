use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::ArtifactKind;
use crate::error::MmitError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub first_name: String,
    pub surname: String,
    pub email: String,
}

/// One submission's metadata, validated once at load time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub institution: String,
    pub submitter: Person,
    pub principal_investigator: Person,
    pub dataset_name: String,
    pub artifact_paths: BTreeMap<ArtifactKind, String>,
    pub metaspace_options: Map<String, Value>,
    pub sample_information: Map<String, Value>,
    pub sample_preparation: Map<String, Value>,
    pub ms_analysis: Map<String, Value>,
    pub additional_information: Map<String, Value>,
}

impl SampleRecord {
    pub fn artifact_path(&self, kind: ArtifactKind) -> Option<&str> {
        self.artifact_paths.get(&kind).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct RawSubmission {
    #[serde(rename = "Submitted_By")]
    submitted_by: Option<RawSubmittedBy>,
    #[serde(default)]
    metaspace_options: Map<String, Value>,
    #[serde(rename = "Sample_Information", default)]
    sample_information: Map<String, Value>,
    #[serde(rename = "Sample_Preparation", default)]
    sample_preparation: Map<String, Value>,
    #[serde(rename = "MS_Analysis", default)]
    ms_analysis: Map<String, Value>,
    #[serde(rename = "Additional_Information", default)]
    additional_information: Map<String, Value>,
    #[serde(default)]
    s3dir: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawSubmittedBy {
    #[serde(rename = "Institution")]
    institution: Option<String>,
    #[serde(rename = "Submitter")]
    submitter: Option<RawPerson>,
    #[serde(rename = "Principal_Investigator")]
    principal_investigator: Option<RawPerson>,
}

#[derive(Debug, Deserialize)]
struct RawPerson {
    #[serde(rename = "First_Name")]
    first_name: Option<String>,
    #[serde(rename = "Surname")]
    surname: Option<String>,
    #[serde(rename = "Email", default)]
    email: Option<String>,
}

pub struct MetadataLoader;

impl MetadataLoader {
    pub fn from_path(path: &Path) -> Result<Vec<SampleRecord>, MmitError> {
        let content =
            fs::read_to_string(path).map_err(|_| MmitError::InputRead(path.to_path_buf()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Vec<SampleRecord>, MmitError> {
        let value: Value =
            serde_json::from_str(content).map_err(|err| MmitError::InputParse(err.to_string()))?;
        let Value::Array(items) = value else {
            return Err(MmitError::InputParse(
                "expected a JSON array of submissions".to_string(),
            ));
        };
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let raw: RawSubmission =
                    serde_json::from_value(item).map_err(|err| MmitError::InvalidSampleShape {
                        index,
                        reason: err.to_string(),
                    })?;
                validate(index, raw)
            })
            .collect()
    }
}

fn validate(index: usize, raw: RawSubmission) -> Result<SampleRecord, MmitError> {
    let shape = |reason: &str| MmitError::InvalidSampleShape {
        index,
        reason: reason.to_string(),
    };

    let submitted_by = raw
        .submitted_by
        .ok_or_else(|| shape("missing Submitted_By"))?;
    let institution = non_empty(submitted_by.institution)
        .ok_or_else(|| shape("missing Submitted_By.Institution"))?;
    let submitter = person(submitted_by.submitter)
        .ok_or_else(|| shape("missing Submitted_By.Submitter name"))?;
    let principal_investigator = person(submitted_by.principal_investigator)
        .ok_or_else(|| shape("missing Submitted_By.Principal_Investigator name"))?;

    let mut artifact_paths = BTreeMap::new();
    for (key, value) in &raw.s3dir {
        let Ok(kind) = key.parse::<ArtifactKind>() else {
            debug!(index, key = key.as_str(), "ignoring unknown s3dir entry");
            continue;
        };
        let Some(path) = value.as_str().map(str::trim).filter(|path| !path.is_empty()) else {
            return Err(shape(&format!("s3dir.{key} must be a non-empty string")));
        };
        artifact_paths.insert(kind, path.to_string());
    }

    let dataset_name = raw
        .metaspace_options
        .get("Dataset_Name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| {
            artifact_paths
                .get(&ArtifactKind::Imzml)
                .and_then(|path| dataset_name_from_path(path))
        })
        .ok_or_else(|| shape("no dataset name (metaspace_options.Dataset_Name or s3dir.imzML)"))?;

    Ok(SampleRecord {
        institution,
        submitter,
        principal_investigator,
        dataset_name,
        artifact_paths,
        metaspace_options: raw.metaspace_options,
        sample_information: raw.sample_information,
        sample_preparation: raw.sample_preparation,
        ms_analysis: raw.ms_analysis,
        additional_information: raw.additional_information,
    })
}

fn person(raw: Option<RawPerson>) -> Option<Person> {
    let raw = raw?;
    Some(Person {
        first_name: non_empty(raw.first_name)?,
        surname: non_empty(raw.surname)?,
        email: raw.email.map(|email| email.trim().to_string()).unwrap_or_default(),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn dataset_name_from_path(path: &str) -> Option<String> {
    let file_name = path.trim_end_matches('/').rsplit('/').next()?;
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    (!stem.is_empty()).then(|| stem.to_string())
}
