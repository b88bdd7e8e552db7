use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::MmitError;
use crate::http;
use crate::image::IntensityGrid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetHandle {
    pub id: String,
    pub name: String,
}

/// One annotated feature as reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawAnnotation {
    pub formula: String,
    pub adduct: String,
    pub mz: Option<f64>,
    pub fdr: Option<f64>,
    pub msm: Option<f64>,
    pub rho_spatial: Option<f64>,
    pub rho_spectral: Option<f64>,
    pub rho_chaos: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OpticalImage {
    /// Service-relative URL, e.g. `/fs/raw_optical_images/<id>`.
    pub url: String,
    pub bytes: Vec<u8>,
}

pub trait AnnotationService: Send + Sync {
    fn dataset_by_name(&self, name: &str) -> Result<DatasetHandle, MmitError>;
    fn dataset_by_id(&self, id: &str) -> Result<DatasetHandle, MmitError>;
    fn annotations(
        &self,
        dataset: &DatasetHandle,
        database: &str,
        fdr: f64,
    ) -> Result<Vec<RawAnnotation>, MmitError>;
    /// Image of the principal isotope peak.
    fn isotope_image(
        &self,
        dataset: &DatasetHandle,
        formula: &str,
        adduct: &str,
    ) -> Result<IntensityGrid, MmitError>;
    fn molecule_names(&self, database: &str, formula: &str) -> Result<Vec<String>, MmitError>;
    fn optical_image(&self, dataset: &DatasetHandle) -> Result<Option<OpticalImage>, MmitError>;
}

impl<T: AnnotationService + ?Sized> AnnotationService for &T {
    fn dataset_by_name(&self, name: &str) -> Result<DatasetHandle, MmitError> {
        (**self).dataset_by_name(name)
    }

    fn dataset_by_id(&self, id: &str) -> Result<DatasetHandle, MmitError> {
        (**self).dataset_by_id(id)
    }

    fn annotations(
        &self,
        dataset: &DatasetHandle,
        database: &str,
        fdr: f64,
    ) -> Result<Vec<RawAnnotation>, MmitError> {
        (**self).annotations(dataset, database, fdr)
    }

    fn isotope_image(
        &self,
        dataset: &DatasetHandle,
        formula: &str,
        adduct: &str,
    ) -> Result<IntensityGrid, MmitError> {
        (**self).isotope_image(dataset, formula, adduct)
    }

    fn molecule_names(&self, database: &str, formula: &str) -> Result<Vec<String>, MmitError> {
        (**self).molecule_names(database, formula)
    }

    fn optical_image(&self, dataset: &DatasetHandle) -> Result<Option<OpticalImage>, MmitError> {
        (**self).optical_image(dataset)
    }
}

const DATASET_BY_NAME: &str = "query DatasetByName($filter: DatasetFilter) {
  allDatasets(filter: $filter, limit: 10) { id name }
}";

const DATASET_BY_ID: &str = "query DatasetById($id: String!) {
  dataset(id: $id) { id name }
}";

const ANNOTATIONS: &str = "query Annotations($datasetId: String, $filter: AnnotationFilter) {
  allAnnotations(datasetFilter: { ids: $datasetId }, filter: $filter, limit: 100000) {
    sumFormula adduct mz fdrLevel msmScore rhoSpatial rhoSpectral rhoChaos
    possibleCompounds { name }
    isotopeImages { url minIntensity maxIntensity }
  }
}";

const RAW_OPTICAL_IMAGE: &str = "query RawOpticalImage($id: String!) {
  rawOpticalImage(datasetId: $id) { url }
}";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotationNode {
    sum_formula: String,
    adduct: String,
    mz: Option<f64>,
    fdr_level: Option<f64>,
    msm_score: Option<f64>,
    rho_spatial: Option<f64>,
    rho_spectral: Option<f64>,
    rho_chaos: Option<f64>,
    #[serde(default)]
    possible_compounds: Vec<CompoundNode>,
    #[serde(default)]
    isotope_images: Vec<IsotopeImageNode>,
}

#[derive(Debug, Deserialize)]
struct CompoundNode {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsotopeImageNode {
    url: Option<String>,
    #[serde(default)]
    min_intensity: f64,
    #[serde(default)]
    max_intensity: f64,
}

#[derive(Debug, Deserialize)]
struct DatasetNode {
    id: String,
    name: String,
}

/// The service's name filter is a substring match; only an exact hit counts.
fn select_dataset(datasets: Vec<DatasetNode>, name: &str) -> Result<DatasetHandle, MmitError> {
    datasets
        .into_iter()
        .find(|node| node.name == name)
        .map(|node| DatasetHandle {
            id: node.id,
            name: node.name,
        })
        .ok_or_else(|| MmitError::DatasetNotFound(name.to_string()))
}

type ImageKey = (String, String, String);

/// METASPACE GraphQL client.
pub struct MetaspaceHttpClient {
    client: Client,
    base_url: Url,
    images: Mutex<HashMap<ImageKey, IsotopeImageNode>>,
    names: Mutex<HashMap<(String, String), Vec<String>>>,
}

impl MetaspaceHttpClient {
    pub fn new(base_url: &str) -> Result<Self, MmitError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| MmitError::ServiceHttp(format!("invalid service url: {err}")))?;
        let client = http::build_client(Duration::from_secs(60)).map_err(MmitError::ServiceHttp)?;
        Ok(Self {
            client,
            base_url,
            images: Mutex::new(HashMap::new()),
            names: Mutex::new(HashMap::new()),
        })
    }

    fn resolve_url(&self, path: &str) -> Result<Url, MmitError> {
        self.base_url
            .join(path)
            .map_err(|err| MmitError::ServiceResponse(format!("bad url {path}: {err}")))
    }

    fn graphql(&self, query: &str, variables: Value) -> Result<Value, MmitError> {
        let url = self.resolve_url("/graphql")?;
        let body = json!({ "query": query, "variables": variables });
        let response = http::send_with_retries(|| self.client.post(url.clone()).json(&body))
            .map_err(|err| MmitError::ServiceHttp(err.to_string()))?;
        if !response.status().is_success() {
            let (status, message) = http::failure(response, "annotation service request failed");
            return Err(MmitError::ServiceStatus { status, message });
        }
        let mut payload: Value = response
            .json()
            .map_err(|err| MmitError::ServiceResponse(err.to_string()))?;
        if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
            if let Some(first) = errors.first() {
                let message = first
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown GraphQL error");
                return Err(MmitError::ServiceResponse(message.to_string()));
            }
        }
        payload
            .get_mut("data")
            .map(Value::take)
            .ok_or_else(|| MmitError::ServiceResponse("response has no data".to_string()))
    }

    fn field<T: DeserializeOwned>(data: &mut Value, name: &str) -> Result<T, MmitError> {
        let value = data.get_mut(name).map(Value::take).unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|err| MmitError::ServiceResponse(format!("{name}: {err}")))
    }

    fn query_annotations(
        &self,
        dataset: &DatasetHandle,
        filter: Value,
    ) -> Result<Vec<AnnotationNode>, MmitError> {
        let mut data = self.graphql(
            ANNOTATIONS,
            json!({ "datasetId": dataset.id, "filter": filter }),
        )?;
        Self::field(&mut data, "allAnnotations")
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, MmitError> {
        let url = self.resolve_url(path)?;
        let response = http::send_with_retries(|| self.client.get(url.clone()))
            .map_err(|err| MmitError::ServiceHttp(err.to_string()))?;
        if !response.status().is_success() {
            let (status, message) = http::failure(response, "image download failed");
            return Err(MmitError::ServiceStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| MmitError::ServiceHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl AnnotationService for MetaspaceHttpClient {
    fn dataset_by_name(&self, name: &str) -> Result<DatasetHandle, MmitError> {
        let mut data = self.graphql(DATASET_BY_NAME, json!({ "filter": { "name": name } }))?;
        let datasets: Vec<DatasetNode> = Self::field(&mut data, "allDatasets")?;
        select_dataset(datasets, name)
    }

    fn dataset_by_id(&self, id: &str) -> Result<DatasetHandle, MmitError> {
        let mut data = self.graphql(DATASET_BY_ID, json!({ "id": id }))?;
        let dataset: Option<DatasetNode> = Self::field(&mut data, "dataset")?;
        dataset
            .map(|node| DatasetHandle {
                id: node.id,
                name: node.name,
            })
            .ok_or_else(|| MmitError::DatasetNotFound(id.to_string()))
    }

    fn annotations(
        &self,
        dataset: &DatasetHandle,
        database: &str,
        fdr: f64,
    ) -> Result<Vec<RawAnnotation>, MmitError> {
        let nodes = self.query_annotations(
            dataset,
            json!({ "fdrLevel": fdr, "database": database }),
        )?;
        debug!(dataset = dataset.name.as_str(), count = nodes.len(), "annotations received");

        let mut annotations = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(image) = node.isotope_images.first() {
                if let Ok(mut images) = self.images.lock() {
                    images.insert(
                        (dataset.id.clone(), node.sum_formula.clone(), node.adduct.clone()),
                        image.clone(),
                    );
                }
            }
            if let Ok(mut names) = self.names.lock() {
                names.insert(
                    (database.to_string(), node.sum_formula.clone()),
                    node.possible_compounds.iter().map(|c| c.name.clone()).collect(),
                );
            }
            annotations.push(RawAnnotation {
                formula: node.sum_formula,
                adduct: node.adduct,
                mz: node.mz,
                fdr: node.fdr_level,
                msm: node.msm_score,
                rho_spatial: node.rho_spatial,
                rho_spectral: node.rho_spectral,
                rho_chaos: node.rho_chaos,
            });
        }
        Ok(annotations)
    }

    fn isotope_image(
        &self,
        dataset: &DatasetHandle,
        formula: &str,
        adduct: &str,
    ) -> Result<IntensityGrid, MmitError> {
        let key = (dataset.id.clone(), formula.to_string(), adduct.to_string());
        let cached = self
            .images
            .lock()
            .ok()
            .and_then(|images| images.get(&key).cloned());
        let image = match cached {
            Some(image) => image,
            None => self
                .query_annotations(dataset, json!({ "sumFormula": formula, "adduct": adduct }))?
                .into_iter()
                .find_map(|node| node.isotope_images.into_iter().next())
                .ok_or_else(|| {
                    MmitError::ServiceResponse(format!("no isotope image for {formula}{adduct}"))
                })?,
        };
        let url = image.url.ok_or_else(|| {
            MmitError::ServiceResponse(format!("isotope image of {formula}{adduct} has no url"))
        })?;
        let bytes = self.download(&url)?;
        IntensityGrid::from_png(&bytes, image.min_intensity, image.max_intensity)
    }

    fn molecule_names(&self, database: &str, formula: &str) -> Result<Vec<String>, MmitError> {
        let key = (database.to_string(), formula.to_string());
        if let Some(names) = self.names.lock().ok().and_then(|names| names.get(&key).cloned()) {
            return Ok(names);
        }
        let mut data = self.graphql(
            "query Names($filter: AnnotationFilter) {
  allAnnotations(filter: $filter, limit: 1) { possibleCompounds { name } }
}",
            json!({ "filter": { "database": database, "sumFormula": formula } }),
        )?;
        let nodes: Vec<Value> = Self::field(&mut data, "allAnnotations")?;
        Ok(nodes
            .first()
            .and_then(|node| node.get("possibleCompounds"))
            .and_then(Value::as_array)
            .map(|compounds| {
                compounds
                    .iter()
                    .filter_map(|c| c.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn optical_image(&self, dataset: &DatasetHandle) -> Result<Option<OpticalImage>, MmitError> {
        let mut data = self.graphql(RAW_OPTICAL_IMAGE, json!({ "id": dataset.id }))?;
        let image: Option<Value> = Self::field(&mut data, "rawOpticalImage")?;
        let Some(url) = image
            .as_ref()
            .and_then(|image| image.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(None);
        };
        let bytes = self.download(&url)?;
        Ok(Some(OpticalImage { url, bytes }))
    }
}
