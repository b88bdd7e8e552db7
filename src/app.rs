use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, AnnotationLimit, AnnotationRecord, to_tsv};
use crate::config::ResolvedConfig;
use crate::domain::{ArtifactKind, Operation, StudyFormat};
use crate::error::MmitError;
use crate::isa::{DocumentSerializer, IsaJsonSerializer, IsaTabSerializer};
use crate::metaspace::AnnotationService;
use crate::object_store::ObjectStoreClient;
use crate::resolver::resolve;
use crate::retrieval::{RetrievalEngine, RetrievalStatus};
use crate::sample::SampleRecord;
use crate::session::StoreSession;
use crate::sink::{Payload, Sink};
use crate::study::StudyBuilder;

/// Directory below the output root that receives annotation tables.
pub const ANNOTATIONS_DIR: &str = "annotations";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub title: String,
    pub description: String,
    pub database: String,
    pub fdr: f64,
    pub study_format: StudyFormat,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            database: config.database.clone(),
            fdr: config.fdr,
            study_format: config.study_format,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub sample_key: String,
    pub operation: Operation,
    pub status: ReportStatus,
    pub detail: Option<String>,
}

impl ReportEntry {
    fn new(
        sample: &SampleRecord,
        operation: Operation,
        status: ReportStatus,
        detail: String,
    ) -> Self {
        Self {
            sample_key: sample.dataset_name.clone(),
            operation,
            status,
            detail: Some(detail),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<ReportEntry>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, status: ReportStatus) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(ReportStatus::Failed) > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Resolving,
    Retrieving,
    Aggregating,
    Building,
    Reported,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchPhase::Idle => write!(f, "Idle"),
            BatchPhase::Resolving => write!(f, "Resolve"),
            BatchPhase::Retrieving => write!(f, "Retrieve"),
            BatchPhase::Aggregating => write!(f, "Aggregate"),
            BatchPhase::Building => write!(f, "Build"),
            BatchPhase::Reported => write!(f, "Report"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Runs the requested operations over a batch of samples.
pub struct App<'s, S: ObjectStoreClient, A: AnnotationService> {
    session: &'s StoreSession,
    retrieval: RetrievalEngine<'s, S>,
    aggregator: Aggregator<A>,
    phase: Cell<BatchPhase>,
}

impl<'s, S: ObjectStoreClient, A: AnnotationService> App<'s, S, A> {
    pub fn new(
        session: &'s StoreSession,
        store: S,
        service: A,
        sink: Sink,
        limit: AnnotationLimit,
    ) -> Self {
        Self {
            session,
            retrieval: RetrievalEngine::new(session, store, sink),
            aggregator: Aggregator::new(service, limit),
            phase: Cell::new(BatchPhase::Idle),
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase.get()
    }

    pub fn retrieval(&self) -> &RetrievalEngine<'s, S> {
        &self.retrieval
    }

    /// One report entry per (operation, sample) pair, operations in request
    /// order and samples in input order. Per-sample failures are reported;
    /// failing to serialize or write the study document aborts the batch.
    pub fn run(
        &self,
        samples: &[SampleRecord],
        operations: &[Operation],
        options: &RunOptions,
        progress: &dyn ProgressSink,
    ) -> Result<BatchReport, MmitError> {
        let start = Instant::now();
        let result = self.run_phases(samples, operations, options, progress);
        self.enter(
            progress,
            BatchPhase::Reported,
            format!(
                "{} entries",
                result.as_ref().map_or(0, |report| report.entries.len())
            ),
            Some(start.elapsed()),
        );
        self.phase.set(BatchPhase::Idle);
        result
    }

    fn run_phases(
        &self,
        samples: &[SampleRecord],
        operations: &[Operation],
        options: &RunOptions,
        progress: &dyn ProgressSink,
    ) -> Result<BatchReport, MmitError> {
        let mut operations_in_order: Vec<Operation> = Vec::new();
        for op in operations {
            if !operations_in_order.contains(op) {
                operations_in_order.push(*op);
            }
        }
        self.enter(
            progress,
            BatchPhase::Resolving,
            format!(
                "{} samples, {} operations",
                samples.len(),
                operations_in_order.len()
            ),
            None,
        );

        let mut report = BatchReport::default();
        if samples.is_empty() {
            return Ok(report);
        }

        for operation in operations_in_order {
            match operation {
                Operation::Imzml
                | Operation::Ibd
                | Operation::Image
                | Operation::AnnotationExport => {
                    let Some(kind) = operation.artifact_kind() else {
                        continue;
                    };
                    self.enter(progress, BatchPhase::Retrieving, format!("{kind} files"), None);
                    report
                        .entries
                        .extend(self.retrieve(samples, operation, kind, options));
                }
                Operation::Annotations => {
                    self.enter(
                        progress,
                        BatchPhase::Aggregating,
                        format!("annotations from {}", options.database),
                        None,
                    );
                    for sample in samples {
                        report.entries.push(self.per_sample(
                            sample,
                            operation,
                            options,
                            |sample| self.export_annotations(sample, options),
                        ));
                    }
                }
                Operation::OpticalImage => {
                    self.enter(
                        progress,
                        BatchPhase::Aggregating,
                        "optical images".to_string(),
                        None,
                    );
                    for sample in samples {
                        report.entries.push(self.per_sample(
                            sample,
                            operation,
                            options,
                            |sample| self.export_optical_image(sample),
                        ));
                    }
                }
                Operation::Study => {
                    self.enter(
                        progress,
                        BatchPhase::Building,
                        format!("{:?} study document", options.study_format),
                        None,
                    );
                    report.entries.extend(self.build_study(samples, options)?);
                }
            }
        }

        Ok(report)
    }

    fn enter(
        &self,
        progress: &dyn ProgressSink,
        phase: BatchPhase,
        message: String,
        elapsed: Option<Duration>,
    ) {
        self.phase.set(phase);
        debug!(%phase, "{message}");
        progress.event(ProgressEvent {
            message: format!("phase={phase}; {message}"),
            elapsed,
        });
    }

    fn retrieve(
        &self,
        samples: &[SampleRecord],
        operation: Operation,
        kind: ArtifactKind,
        options: &RunOptions,
    ) -> Vec<ReportEntry> {
        let mut entries: Vec<Option<ReportEntry>> = Vec::with_capacity(samples.len());
        let mut pending = Vec::new();
        for (index, sample) in samples.iter().enumerate() {
            match resolve(sample, kind) {
                Ok(locator) if options.dry_run => entries.push(Some(ReportEntry::new(
                    sample,
                    operation,
                    ReportStatus::Skipped,
                    format!("dry run: {}", self.session.uri(&locator)),
                ))),
                Ok(locator) => {
                    entries.push(None);
                    pending.push((index, locator));
                }
                Err(err) => {
                    warn!(
                        sample = sample.dataset_name.as_str(),
                        error = %err,
                        "cannot resolve artifact"
                    );
                    entries.push(Some(ReportEntry::new(
                        sample,
                        operation,
                        ReportStatus::Failed,
                        err.to_string(),
                    )));
                }
            }
        }

        let indices = pending.iter().map(|(index, _)| *index).collect::<Vec<_>>();
        let outcomes = self.retrieval.fetch_many(
            pending
                .into_iter()
                .map(move |(_, locator)| (locator, kind.encoding())),
        );
        for (index, outcome) in indices.into_iter().zip(outcomes) {
            let (status, detail) = match outcome.status {
                RetrievalStatus::Success => (
                    ReportStatus::Success,
                    outcome
                        .written_to
                        .map(|path| path.to_string())
                        .unwrap_or_default(),
                ),
                RetrievalStatus::NotFound | RetrievalStatus::TransferError => (
                    ReportStatus::Failed,
                    outcome.detail.unwrap_or_else(|| "retrieval failed".to_string()),
                ),
            };
            entries[index] = Some(ReportEntry::new(&samples[index], operation, status, detail));
        }

        entries.into_iter().flatten().collect()
    }

    fn per_sample<F>(
        &self,
        sample: &SampleRecord,
        operation: Operation,
        options: &RunOptions,
        work: F,
    ) -> ReportEntry
    where
        F: FnOnce(&SampleRecord) -> Result<Option<String>, MmitError>,
    {
        if options.dry_run {
            return ReportEntry::new(
                sample,
                operation,
                ReportStatus::Skipped,
                "dry run".to_string(),
            );
        }
        match work(sample) {
            Ok(Some(detail)) => ReportEntry::new(sample, operation, ReportStatus::Success, detail),
            Ok(None) => ReportEntry::new(
                sample,
                operation,
                ReportStatus::Skipped,
                "nothing to export".to_string(),
            ),
            Err(err) => {
                warn!(
                    sample = sample.dataset_name.as_str(),
                    %operation,
                    error = %err,
                    "sample failed"
                );
                ReportEntry::new(sample, operation, ReportStatus::Failed, err.to_string())
            }
        }
    }

    fn export_annotations(
        &self,
        sample: &SampleRecord,
        options: &RunOptions,
    ) -> Result<Option<String>, MmitError> {
        let records = self
            .aggregator
            .aggregate(sample, &options.database, options.fdr)?
            .collect::<Result<Vec<AnnotationRecord>, _>>()?;
        info!(
            dataset = sample.dataset_name.as_str(),
            records = records.len(),
            "annotations aggregated"
        );

        let json = serde_json::to_string_pretty(&records)
            .map_err(|err| MmitError::Serialization(err.to_string()))?;
        let sink = self.retrieval.sink();
        let (tsv_path, _) = sink.write(
            ANNOTATIONS_DIR,
            &format!("{}.tsv", sample.dataset_name),
            &Payload::Text(to_tsv(&records)),
        )?;
        sink.write(
            ANNOTATIONS_DIR,
            &format!("{}.json", sample.dataset_name),
            &Payload::Text(json),
        )?;
        Ok(Some(format!("{} annotations -> {tsv_path}", records.len())))
    }

    fn export_optical_image(&self, sample: &SampleRecord) -> Result<Option<String>, MmitError> {
        let service = self.aggregator.service();
        let dataset = service.dataset_by_name(&sample.dataset_name)?;
        let Some(image) = service.optical_image(&dataset)? else {
            debug!(dataset = dataset.name.as_str(), "no optical image");
            return Ok(None);
        };
        let (folder, name) = optical_image_destination(&image.url).ok_or_else(|| {
            MmitError::ServiceResponse(format!("unexpected optical image url: {}", image.url))
        })?;
        info!(url = image.url.as_str(), "Getting file {}", image.url);
        let (path, _) = self.retrieval.sink().write(
            folder,
            &format!("{name}.jpg"),
            &Payload::Binary(image.bytes),
        )?;
        Ok(Some(path.to_string()))
    }

    fn build_study(
        &self,
        samples: &[SampleRecord],
        options: &RunOptions,
    ) -> Result<Vec<ReportEntry>, MmitError> {
        if options.dry_run {
            return Ok(samples
                .iter()
                .map(|sample| {
                    ReportEntry::new(
                        sample,
                        Operation::Study,
                        ReportStatus::Skipped,
                        "dry run".to_string(),
                    )
                })
                .collect());
        }

        let doc = StudyBuilder::new(self.session).build(
            &options.title,
            &options.description,
            samples,
        );
        let serialized = match options.study_format {
            StudyFormat::Isatab => IsaTabSerializer.serialize(&doc)?,
            StudyFormat::Isajson => IsaJsonSerializer.serialize(&doc)?,
        };
        let mut written = Vec::with_capacity(serialized.files.len());
        for file in serialized.files {
            let (path, _) = self
                .retrieval
                .sink()
                .write("", &file.name, &Payload::Text(file.content))?;
            written.push(path.to_string());
        }
        info!(files = written.len(), "study document written");

        let detail = written.join(", ");
        Ok(samples
            .iter()
            .map(|sample| {
                ReportEntry::new(sample, Operation::Study, ReportStatus::Success, detail.clone())
            })
            .collect())
    }
}

/// `(folder, name)` for a service image URL: the last path segment names the
/// file, everything before it is the folder.
pub fn optical_image_destination(url: &str) -> Option<(&str, &str)> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let (folder, name) = path.trim_matches('/').rsplit_once('/')?;
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() || name.is_empty() {
        return None;
    }
    Some((folder, name))
}
