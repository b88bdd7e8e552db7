use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use mmit::aggregate::AnnotationLimit;
use mmit::app::{App, BatchPhase, ProgressEvent, ProgressSink, ReportStatus, RunOptions};
use mmit::domain::{Operation, StudyFormat};
use mmit::error::MmitError;
use mmit::image::IntensityGrid;
use mmit::metaspace::{AnnotationService, DatasetHandle, OpticalImage, RawAnnotation};
use mmit::object_store::ObjectStoreClient;
use mmit::output::JsonOutput;
use mmit::sample::{MetadataLoader, SampleRecord};
use mmit::session::StoreSession;
use mmit::sink::Sink;

#[derive(Default)]
struct MockStore {
    objects: HashMap<String, Vec<u8>>,
    calls: Mutex<usize>,
}

impl MockStore {
    fn with(mut self, key: &str, bytes: &[u8]) -> Self {
        self.objects.insert(key.to_string(), bytes.to_vec());
        self
    }
}

impl ObjectStoreClient for MockStore {
    fn get(&self, store: &str, prefix: &str, file_name: &str) -> Result<Vec<u8>, MmitError> {
        *self.calls.lock().unwrap() += 1;
        let key = format!("{store}/{prefix}/{file_name}");
        self.objects
            .get(&key)
            .cloned()
            .ok_or(MmitError::ObjectNotFound(key))
    }

    fn list(&self, _store: &str, _prefix_filter: &str) -> Result<Vec<String>, MmitError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct MockService {
    calls: Mutex<usize>,
    optical_folder: Option<&'static str>,
}

impl AnnotationService for MockService {
    fn dataset_by_name(&self, name: &str) -> Result<DatasetHandle, MmitError> {
        *self.calls.lock().unwrap() += 1;
        Ok(DatasetHandle {
            id: format!("id-{name}"),
            name: name.to_string(),
        })
    }

    fn dataset_by_id(&self, id: &str) -> Result<DatasetHandle, MmitError> {
        Err(MmitError::DatasetNotFound(id.to_string()))
    }

    fn annotations(
        &self,
        dataset: &DatasetHandle,
        _database: &str,
        _fdr: f64,
    ) -> Result<Vec<RawAnnotation>, MmitError> {
        if dataset.name == "d2" {
            return Err(MmitError::ServiceStatus {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        Ok(vec![RawAnnotation {
            formula: "C6H12O6".to_string(),
            adduct: "+K".to_string(),
            mz: Some(219.03),
            fdr: Some(0.05),
            msm: Some(0.7),
            rho_spatial: None,
            rho_spectral: None,
            rho_chaos: None,
        }])
    }

    fn isotope_image(
        &self,
        _dataset: &DatasetHandle,
        _formula: &str,
        _adduct: &str,
    ) -> Result<IntensityGrid, MmitError> {
        IntensityGrid::new(1, 3, vec![1.0, 0.0, 3.0])
    }

    fn molecule_names(&self, _database: &str, _formula: &str) -> Result<Vec<String>, MmitError> {
        Ok(vec!["glucose".to_string()])
    }

    fn optical_image(&self, dataset: &DatasetHandle) -> Result<Option<OpticalImage>, MmitError> {
        if let Some(folder) = self.optical_folder {
            return Ok(Some(OpticalImage {
                url: format!("{folder}/{}", dataset.id),
                bytes: dataset.name.as_bytes().to_vec(),
            }));
        }
        if dataset.name == "d1" {
            return Ok(Some(OpticalImage {
                url: "/raw_optical_images/abc123".to_string(),
                bytes: vec![0xff, 0xd8, 0xff],
            }));
        }
        Ok(None)
    }
}

#[derive(Default)]
struct RecordingProgress {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingProgress {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn samples() -> Vec<SampleRecord> {
    MetadataLoader::from_path(Path::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/metaspace_export.json"
    )))
    .unwrap()
}

fn options() -> RunOptions {
    RunOptions {
        title: "Brain atlas".to_string(),
        description: "Two slides".to_string(),
        database: "HMDB-v4".to_string(),
        fdr: 0.1,
        study_format: StudyFormat::Isatab,
        dry_run: false,
    }
}

fn output_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    (temp, root)
}

fn statuses(report: &mmit::app::BatchReport) -> Vec<(Operation, &str, ReportStatus)> {
    report
        .entries
        .iter()
        .map(|entry| (entry.operation, entry.sample_key.as_str(), entry.status))
        .collect()
}

#[test]
fn failing_sample_does_not_stop_siblings() {
    let session = StoreSession::new("https://store.example");
    let store = MockStore::default()
        .with("bucketA/studyX/d1.imzML", b"<imzML/>")
        .with("bucketA/studyX/d1.ibd", b"\x00\x01")
        .with("bucketA/studyY/d2.imzML", b"<imzML/>");
    let service = MockService::default();
    let (_temp, root) = output_root();
    let app = App::new(&session, &store, &service, Sink::new(root.clone()), AnnotationLimit::All);

    let report = app
        .run(&samples(), &[Operation::Imzml, Operation::Ibd], &options(), &JsonOutput)
        .unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            (Operation::Imzml, "d1", ReportStatus::Success),
            (Operation::Imzml, "d2", ReportStatus::Success),
            (Operation::Ibd, "d1", ReportStatus::Success),
            (Operation::Ibd, "d2", ReportStatus::Failed),
        ]
    );
    assert!(report.has_failures());
    assert!(root.join("studyX/d1.imzML").as_std_path().exists());
    assert!(root.join("studyY/d2.imzML").as_std_path().exists());
    assert!(!root.join("studyY/d2.ibd").as_std_path().exists());
    assert!(report.entries[3].detail.as_deref().unwrap().contains("not found"));
}

#[test]
fn operations_are_deduplicated_in_request_order() {
    let session = StoreSession::new("https://store.example");
    let store = MockStore::default();
    let service = MockService::default();
    let (_temp, root) = output_root();
    let app = App::new(&session, &store, &service, Sink::new(root), AnnotationLimit::All);

    let report = app
        .run(
            &samples(),
            &[Operation::Ibd, Operation::Image, Operation::Ibd],
            &options(),
            &JsonOutput,
        )
        .unwrap();

    let operations = report
        .entries
        .iter()
        .map(|entry| entry.operation)
        .collect::<Vec<_>>();
    assert_eq!(
        operations,
        vec![Operation::Ibd, Operation::Ibd, Operation::Image, Operation::Image]
    );
    // neither sample declares an image path
    assert_eq!(report.entries[2].status, ReportStatus::Failed);
    assert!(report.entries[2].detail.as_deref().unwrap().contains("no image path"));
}

#[test]
fn dry_run_skips_everything() {
    let session = StoreSession::new("https://store.example");
    let store = MockStore::default().with("bucketA/studyX/d1.imzML", b"x");
    let service = MockService::default();
    let (_temp, root) = output_root();
    let app = App::new(&session, &store, &service, Sink::new(root.clone()), AnnotationLimit::All);
    let options = RunOptions {
        dry_run: true,
        ..options()
    };

    let report = app
        .run(
            &samples(),
            &[
                Operation::Imzml,
                Operation::Annotations,
                Operation::OpticalImage,
                Operation::Study,
            ],
            &options,
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(report.entries.len(), 8);
    assert_eq!(report.count(ReportStatus::Skipped), 8);
    assert!(
        report.entries[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("s3://bucketA/studyX/d1.imzML")
    );
    assert_eq!(*store.calls.lock().unwrap(), 0);
    assert_eq!(*service.calls.lock().unwrap(), 0);
    assert!(!root.as_std_path().exists());
}

#[test]
fn empty_batch_yields_empty_report() {
    let session = StoreSession::new("https://store.example");
    let store = MockStore::default();
    let service = MockService::default();
    let (_temp, root) = output_root();
    let app = App::new(&session, &store, &service, Sink::new(root), AnnotationLimit::All);
    let progress = RecordingProgress::default();

    let report = app
        .run(&[], &[Operation::Imzml, Operation::Study], &options(), &progress)
        .unwrap();

    assert!(report.is_empty());
    assert_eq!(app.phase(), BatchPhase::Idle);
    let messages = progress.messages.lock().unwrap();
    assert!(messages.first().unwrap().starts_with("phase=Resolve;"));
    assert!(messages.last().unwrap().starts_with("phase=Report;"));
}

#[test]
fn annotations_and_optical_images_are_written() {
    let session = StoreSession::new("https://store.example");
    let store = MockStore::default();
    let service = MockService::default();
    let (_temp, root) = output_root();
    let app = App::new(&session, &store, &service, Sink::new(root.clone()), AnnotationLimit::All);

    let report = app
        .run(
            &samples(),
            &[Operation::Annotations, Operation::OpticalImage],
            &options(),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            (Operation::Annotations, "d1", ReportStatus::Success),
            (Operation::Annotations, "d2", ReportStatus::Failed),
            (Operation::OpticalImage, "d1", ReportStatus::Success),
            (Operation::OpticalImage, "d2", ReportStatus::Skipped),
        ]
    );

    let tsv = std::fs::read_to_string(root.join("annotations/d1.tsv").as_std_path()).unwrap();
    let row = tsv.lines().nth(1).unwrap();
    assert!(row.starts_with("EMBL Heidelberg\td1\tC6H12O6\t+K\t219.03\t2\t"));
    assert!(row.ends_with("\tglucose"));
    assert!(root.join("annotations/d1.json").as_std_path().exists());
    assert!(!root.join("annotations/d2.tsv").as_std_path().exists());

    let jpg = std::fs::read(root.join("raw_optical_images/abc123.jpg").as_std_path()).unwrap();
    assert_eq!(jpg, vec![0xff, 0xd8, 0xff]);
}

#[test]
fn optical_images_are_named_by_image_id() {
    let session = StoreSession::new("https://store.example");
    let store = MockStore::default();
    let service = MockService {
        optical_folder: Some("/fs/raw_optical_images"),
        ..MockService::default()
    };
    let (_temp, root) = output_root();
    let app = App::new(&session, &store, &service, Sink::new(root.clone()), AnnotationLimit::All);

    let report = app
        .run(&samples(), &[Operation::OpticalImage], &options(), &JsonOutput)
        .unwrap();

    assert_eq!(report.count(ReportStatus::Success), 2);
    let d1 = std::fs::read(root.join("fs/raw_optical_images/id-d1.jpg").as_std_path()).unwrap();
    let d2 = std::fs::read(root.join("fs/raw_optical_images/id-d2.jpg").as_std_path()).unwrap();
    assert_eq!(d1, b"d1");
    assert_eq!(d2, b"d2");
    assert!(!root.join("fs/raw_optical_images.jpg").as_std_path().exists());
}

#[test]
fn study_document_is_written_once_per_batch() {
    let session = StoreSession::new("https://store.example");
    let store = MockStore::default();
    let service = MockService::default();
    let (_temp, root) = output_root();
    let app = App::new(&session, &store, &service, Sink::new(root.clone()), AnnotationLimit::All);

    let report = app
        .run(&samples(), &[Operation::Study], &options(), &JsonOutput)
        .unwrap();

    assert_eq!(report.count(ReportStatus::Success), 2);
    for name in ["i_Investigation.txt", "s_study.txt", "a_assay.txt"] {
        assert!(root.join(name).as_std_path().exists(), "{name} missing");
    }

    let json_options = RunOptions {
        study_format: StudyFormat::Isajson,
        ..options()
    };
    app.run(&samples(), &[Operation::Study], &json_options, &JsonOutput)
        .unwrap();
    assert!(root.join("investigation.json").as_std_path().exists());
}

#[test]
fn unserializable_study_aborts_the_batch() {
    let session = StoreSession::new("https://store.example");
    let store = MockStore::default();
    let service = MockService::default();
    let (_temp, root) = output_root();
    let app = App::new(&session, &store, &service, Sink::new(root), AnnotationLimit::All);
    let options = RunOptions {
        title: "line one\nline two".to_string(),
        ..options()
    };

    let result = app.run(&samples(), &[Operation::Study], &options, &JsonOutput);
    assert_matches!(result, Err(MmitError::Serialization(_)));
    assert_eq!(app.phase(), BatchPhase::Idle);
}
