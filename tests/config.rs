use assert_matches::assert_matches;

use mmit::aggregate::AnnotationLimit;
use mmit::config::{Config, ConfigLoader, DEFAULT_SERVICE_URL, ServiceSection, StoreSection};
use mmit::domain::StudyFormat;
use mmit::error::MmitError;
use mmit::session::StoreSession;

#[test]
fn resolve_full_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("mmit.json");
    std::fs::write(
        &path,
        r#"{
            "store": {
                "endpoint": "https://minio.local:9000/",
                "bucket": "sm-engine-upload",
                "access_key_id": "AKIAEXAMPLE",
                "secret_access_key": "secret"
            },
            "service": { "url": "https://beta.metaspace2020.eu" },
            "database": "ChEBI-2018-01",
            "fdr": 0.2,
            "annotation_limit": 1,
            "study_format": "isajson"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.bucket.as_deref(), Some("sm-engine-upload"));
    assert_eq!(resolved.service_url, "https://beta.metaspace2020.eu");
    assert_eq!(resolved.database, "ChEBI-2018-01");
    assert_eq!(resolved.fdr, 0.2);
    assert_eq!(resolved.annotation_limit, AnnotationLimit::First(1));
    assert_eq!(resolved.study_format, StudyFormat::Isajson);
    assert_eq!(
        resolved.credentials.as_ref().unwrap().access_key_id,
        "AKIAEXAMPLE"
    );

    let session = StoreSession::from_config(&resolved);
    assert_eq!(session.endpoint(), "https://minio.local:9000");
    assert_eq!(session.default_bucket(), Some("sm-engine-upload"));
    assert!(session.credentials().is_some());
}

#[test]
fn partial_config_keeps_defaults() {
    let config = Config {
        store: Some(StoreSection {
            bucket: Some("b".to_string()),
            ..StoreSection::default()
        }),
        service: Some(ServiceSection { url: None }),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config);
    assert_eq!(resolved.service_url, DEFAULT_SERVICE_URL);
    assert_eq!(resolved.database, "HMDB-v4");
    assert_eq!(resolved.fdr, 0.1);
    assert_eq!(resolved.study_format, StudyFormat::Isatab);
}

#[test]
fn explicit_missing_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(MmitError::ConfigRead(_))
    );
}

#[test]
fn malformed_or_out_of_range_config_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let broken = temp.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(broken.to_str()),
        Err(MmitError::ConfigParse(_))
    );

    let out_of_range = temp.path().join("fdr.json");
    std::fs::write(&out_of_range, r#"{ "fdr": 1.5 }"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(out_of_range.to_str()),
        Err(MmitError::ConfigParse(message)) if message.contains("1.5")
    );
}
