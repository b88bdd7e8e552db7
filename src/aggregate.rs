use std::iter::Take;
use std::vec::IntoIter;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::MmitError;
use crate::metaspace::{AnnotationService, DatasetHandle, RawAnnotation};
use crate::sample::SampleRecord;

/// Column names of the tabular export; `msm` carries the mean image intensity.
pub const TSV_HEADER: [&str; 11] = [
    "institution",
    "datasetName",
    "formula",
    "adduct",
    "mz",
    "msm",
    "fdr",
    "rhoSpatial",
    "rhoSpectral",
    "rhoChaos",
    "moleculeNames",
];

/// How many annotations per dataset to turn into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnotationLimit {
    #[default]
    All,
    First(usize),
}

impl AnnotationLimit {
    fn count(self) -> usize {
        match self {
            AnnotationLimit::All => usize::MAX,
            AnnotationLimit::First(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub institution: String,
    pub dataset_name: String,
    pub formula: String,
    pub adduct: String,
    pub mz: Option<f64>,
    #[serde(serialize_with = "number_or_label")]
    pub mean_intensity: f64,
    pub false_discovery_rate: Option<f64>,
    pub spatial_correlation: Option<f64>,
    pub spectral_correlation: Option<f64>,
    pub chaos_metric: Option<f64>,
    pub molecule_names: Vec<String>,
}

// JSON has no NaN; emit the same label the TSV shows instead of null.
fn number_or_label<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_str(&value.to_string())
    }
}

impl AnnotationRecord {
    pub fn tsv_row(&self) -> String {
        let optional = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        [
            cell(&self.institution),
            cell(&self.dataset_name),
            cell(&self.formula),
            cell(&self.adduct),
            optional(self.mz),
            self.mean_intensity.to_string(),
            optional(self.false_discovery_rate),
            optional(self.spatial_correlation),
            optional(self.spectral_correlation),
            optional(self.chaos_metric),
            cell(&self.molecule_names.join("; ")),
        ]
        .join("\t")
    }
}

/// Header line plus one row per record, newline terminated.
pub fn to_tsv(records: &[AnnotationRecord]) -> String {
    let mut out = TSV_HEADER.join("\t");
    out.push('\n');
    for record in records {
        out.push_str(&record.tsv_row());
        out.push('\n');
    }
    out
}

fn cell(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

pub struct Aggregator<A: AnnotationService> {
    service: A,
    limit: AnnotationLimit,
}

impl<A: AnnotationService> Aggregator<A> {
    pub fn new(service: A, limit: AnnotationLimit) -> Self {
        Self { service, limit }
    }

    pub fn service(&self) -> &A {
        &self.service
    }

    /// Looks up the sample's dataset and its annotations passing `fdr`;
    /// images and names are fetched as the returned iterator is pulled.
    pub fn aggregate<'a>(
        &'a self,
        sample: &'a SampleRecord,
        database: &'a str,
        fdr: f64,
    ) -> Result<Annotations<'a, A>, MmitError> {
        let dataset = self.service.dataset_by_name(&sample.dataset_name)?;
        let raw = self.service.annotations(&dataset, database, fdr)?;
        debug!(
            dataset = dataset.name.as_str(),
            available = raw.len(),
            limit = ?self.limit,
            "aggregating annotations"
        );
        Ok(Annotations {
            service: &self.service,
            sample,
            dataset,
            database,
            pending: raw.into_iter().take(self.limit.count()),
        })
    }
}

/// Lazy sequence of records for one sample.
pub struct Annotations<'a, A: AnnotationService> {
    service: &'a A,
    sample: &'a SampleRecord,
    dataset: DatasetHandle,
    database: &'a str,
    pending: Take<IntoIter<RawAnnotation>>,
}

impl<A: AnnotationService> Annotations<'_, A> {
    pub fn dataset(&self) -> &DatasetHandle {
        &self.dataset
    }

    fn build(&self, raw: RawAnnotation) -> Result<AnnotationRecord, MmitError> {
        let image = self
            .service
            .isotope_image(&self.dataset, &raw.formula, &raw.adduct)?;
        let molecule_names = self.service.molecule_names(self.database, &raw.formula)?;
        Ok(AnnotationRecord {
            institution: self.sample.institution.clone(),
            dataset_name: self.sample.dataset_name.clone(),
            mean_intensity: image.mean_positive(),
            formula: raw.formula,
            adduct: raw.adduct,
            mz: raw.mz,
            false_discovery_rate: raw.fdr,
            spatial_correlation: raw.rho_spatial,
            spectral_correlation: raw.rho_spectral,
            chaos_metric: raw.rho_chaos,
            molecule_names,
        })
    }
}

impl<A: AnnotationService> Iterator for Annotations<'_, A> {
    type Item = Result<AnnotationRecord, MmitError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.pending.next()?;
        Some(self.build(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_row_keeps_nan_and_blanks() {
        let record = AnnotationRecord {
            institution: "EMBL\tHeidelberg".to_string(),
            dataset_name: "d1".to_string(),
            formula: "C6H12O6".to_string(),
            adduct: "+Na".to_string(),
            mz: Some(203.05),
            mean_intensity: f64::NAN,
            false_discovery_rate: None,
            spatial_correlation: None,
            spectral_correlation: None,
            chaos_metric: None,
            molecule_names: vec!["Glucose".to_string(), "Fructose".to_string()],
        };
        assert_eq!(
            record.tsv_row(),
            "EMBL Heidelberg\td1\tC6H12O6\t+Na\t203.05\tNaN\t\t\t\t\tGlucose; Fructose"
        );
        let tsv = to_tsv(std::slice::from_ref(&record));
        assert!(tsv.starts_with("institution\tdatasetName\tformula"));
        assert_eq!(tsv.lines().count(), 2);
    }

    #[test]
    fn json_keeps_nan_label() {
        let mut record = AnnotationRecord {
            institution: "EMBL".to_string(),
            dataset_name: "d1".to_string(),
            formula: "C6H12O6".to_string(),
            adduct: "+Na".to_string(),
            mz: None,
            mean_intensity: f64::NAN,
            false_discovery_rate: Some(0.1),
            spatial_correlation: None,
            spectral_correlation: None,
            chaos_metric: None,
            molecule_names: Vec::new(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["meanIntensity"], "NaN");
        assert!(json["mz"].is_null());

        record.mean_intensity = 2.5;
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["meanIntensity"], 2.5);
    }
}
