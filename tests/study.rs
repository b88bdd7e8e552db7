use std::path::Path;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use mmit::error::MmitError;
use mmit::isa::{
    ASSAY_FILE, DocumentSerializer, INVESTIGATION_FILE, IsaJsonSerializer, IsaTabSerializer,
    STUDY_FILE,
};
use mmit::sample::{MetadataLoader, SampleRecord};
use mmit::session::StoreSession;
use mmit::study::{Role, StudyBuilder};

fn samples() -> Vec<SampleRecord> {
    MetadataLoader::from_path(Path::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/metaspace_export.json"
    )))
    .unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 11, 5).unwrap()
}

#[test]
fn contacts_are_appended_pi_first() {
    let session = StoreSession::new("https://store.example");
    let builder = StudyBuilder::new(&session);
    let samples = samples();

    let doc = builder.new_document_with_dates("Brain atlas", "MALDI run", date(), date());
    let doc = builder.add_sample(doc, &samples[0]);

    assert_eq!(doc.contacts.len(), 2);
    let pi = &doc.contacts[0];
    assert_eq!(pi.last_name, "Vogel");
    assert_eq!(pi.affiliation, "EMBL Heidelberg");
    assert!(pi.roles.contains(&Role::PrincipalInvestigator));
    assert!(pi.roles.contains(&Role::Submitter));
    let submitter = &doc.contacts[1];
    assert_eq!(submitter.last_name, "Lopez");
    assert_eq!(submitter.roles.len(), 1);

    assert_eq!(doc.assays.len(), 1);
    assert_eq!(doc.assays[0].contacts, doc.contacts);
    assert_eq!(
        doc.assays[0].data_files,
        vec![
            "s3://bucketA/studyX/d1.imzML".to_string(),
            "s3://bucketA/studyX/d1.ibd".to_string(),
        ]
    );
}

#[test]
fn submitter_who_is_pi_is_listed_twice() {
    let session = StoreSession::new("https://store.example");
    let samples = samples();

    let doc = StudyBuilder::new(&session).build("t", "d", &samples[1..]);
    assert_eq!(doc.contacts.len(), 2);
    assert!(doc.contacts[0].same_person(&doc.contacts[1]));
}

#[test]
fn batch_preserves_input_order() {
    let session = StoreSession::new("https://store.example");
    let samples = samples();

    let doc = StudyBuilder::new(&session).build("t", "d", &samples);
    let names = doc
        .samples
        .iter()
        .map(|sample| sample.dataset_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["d1", "d2"]);
    assert_eq!(doc.contacts.len(), 4);
}

#[test]
fn empty_batch_serializes() {
    let session = StoreSession::new("https://store.example");
    let doc = StudyBuilder::new(&session).build("Empty", "", &[]);
    assert!(doc.contacts.is_empty());

    let files = IsaTabSerializer.serialize(&doc).unwrap();
    let names = files.files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec![INVESTIGATION_FILE, STUDY_FILE, ASSAY_FILE]);
}

#[test]
fn isatab_lists_contacts_and_samples() {
    let session = StoreSession::new("https://store.example");
    let builder = StudyBuilder::new(&session);
    let samples = samples();
    let doc = samples.iter().fold(
        builder.new_document_with_dates("Brain atlas", "MALDI run", date(), date()),
        |doc, sample| builder.add_sample(doc, sample),
    );

    let files = IsaTabSerializer.serialize(&doc).unwrap();
    let investigation = &files.file(INVESTIGATION_FILE).unwrap().content;
    assert!(investigation.contains("Study Public Release Date\t\"05-11-2024\""));
    assert!(investigation.contains(
        "Study Person Last Name\t\"Vogel\"\t\"Lopez\"\t\"Dubois\"\t\"Dubois\""
    ));
    assert!(investigation.contains("\"submitter;principal investigator role\""));

    let study = &files.file(STUDY_FILE).unwrap().content;
    assert_eq!(study.lines().count(), 3);
    assert!(study.contains("\"Mus musculus\"\t\"Brain\""));

    let assay = &files.file(ASSAY_FILE).unwrap().content;
    assert!(assay.contains("\"s3://bucketA/studyY/d2.imzML\"\t\"s3://bucketA/studyY/d2.ibd\""));
    assert!(assay.contains("\"DESI\"\t\"FTICR\"\t\"Negative\""));
}

#[test]
fn tab_in_title_cannot_be_rendered() {
    let session = StoreSession::new("https://store.example");
    let doc = StudyBuilder::new(&session).build("bad\ttitle", "", &samples());
    assert_matches!(
        IsaTabSerializer.serialize(&doc),
        Err(MmitError::Serialization(_))
    );
    assert!(IsaJsonSerializer.serialize(&doc).is_ok());
}
