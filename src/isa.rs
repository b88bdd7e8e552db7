use serde_json::{Map, Value, json};

use crate::error::MmitError;
use crate::sample::SampleRecord;
use crate::study::{AssayEntry, Contact, StudyDocument};

pub const INVESTIGATION_FILE: &str = "i_Investigation.txt";
pub const STUDY_FILE: &str = "s_study.txt";
pub const ASSAY_FILE: &str = "a_assay.txt";
pub const INVESTIGATION_JSON_FILE: &str = "investigation.json";

const STUDY_IDENTIFIER: &str = "s1";
const DATE_FORMAT: &str = "%d-%m-%Y";
const MEASUREMENT_TYPE: &str = "metabolite profiling";
const TECHNOLOGY_TYPE: &str = "mass spectrometry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerializedDocument {
    pub files: Vec<SerializedFile>,
}

impl SerializedDocument {
    pub fn file(&self, name: &str) -> Option<&SerializedFile> {
        self.files.iter().find(|file| file.name == name)
    }
}

pub trait DocumentSerializer {
    fn serialize(&self, doc: &StudyDocument) -> Result<SerializedDocument, MmitError>;
}

/// Tab-separated ISA-Tab: investigation, study and assay files.
pub struct IsaTabSerializer;

impl DocumentSerializer for IsaTabSerializer {
    fn serialize(&self, doc: &StudyDocument) -> Result<SerializedDocument, MmitError> {
        Ok(SerializedDocument {
            files: vec![
                SerializedFile {
                    name: INVESTIGATION_FILE.to_string(),
                    content: investigation_file(doc)?,
                },
                SerializedFile {
                    name: STUDY_FILE.to_string(),
                    content: study_table(&doc.samples)?,
                },
                SerializedFile {
                    name: ASSAY_FILE.to_string(),
                    content: assay_table(&doc.samples, &doc.assays)?,
                },
            ],
        })
    }
}

fn investigation_file(doc: &StudyDocument) -> Result<String, MmitError> {
    let submission = doc.submission_date.format(DATE_FORMAT).to_string();
    let release = doc.release_date.format(DATE_FORMAT).to_string();

    let mut out = Vec::new();
    out.push("ONTOLOGY SOURCE REFERENCE".to_string());
    for label in [
        "Term Source Name",
        "Term Source File",
        "Term Source Version",
        "Term Source Description",
    ] {
        out.push(label.to_string());
    }

    out.push("INVESTIGATION".to_string());
    for label in [
        "Investigation Identifier",
        "Investigation Title",
        "Investigation Description",
        "Investigation Submission Date",
        "Investigation Public Release Date",
    ] {
        out.push(row(label, &[""])?);
    }
    out.push("INVESTIGATION PUBLICATIONS".to_string());
    publication_rows(&mut out, "Investigation");
    out.push("INVESTIGATION CONTACTS".to_string());
    contact_rows(&mut out, "Investigation", &doc.contacts)?;

    out.push("STUDY".to_string());
    out.push(row("Study Identifier", &[STUDY_IDENTIFIER])?);
    out.push(row("Study Title", &[doc.title.as_str()])?);
    out.push(row("Study Description", &[doc.description.as_str()])?);
    out.push(row("Study Submission Date", &[submission.as_str()])?);
    out.push(row("Study Public Release Date", &[release.as_str()])?);
    out.push(row("Study File Name", &[STUDY_FILE])?);
    out.push("STUDY DESIGN DESCRIPTORS".to_string());
    for label in [
        "Study Design Type",
        "Study Design Type Term Accession Number",
        "Study Design Type Term Source REF",
    ] {
        out.push(label.to_string());
    }
    out.push("STUDY PUBLICATIONS".to_string());
    publication_rows(&mut out, "Study");
    out.push("STUDY FACTORS".to_string());
    for label in [
        "Study Factor Name",
        "Study Factor Type",
        "Study Factor Type Term Accession Number",
        "Study Factor Type Term Source REF",
    ] {
        out.push(label.to_string());
    }
    out.push("STUDY ASSAYS".to_string());
    out.push(row("Study Assay File Name", &[ASSAY_FILE])?);
    out.push(row("Study Assay Measurement Type", &[MEASUREMENT_TYPE])?);
    out.push(row("Study Assay Technology Type", &[TECHNOLOGY_TYPE])?);
    out.push("STUDY PROTOCOLS".to_string());
    for label in [
        "Study Protocol Name",
        "Study Protocol Type",
        "Study Protocol Description",
    ] {
        out.push(label.to_string());
    }
    out.push("STUDY CONTACTS".to_string());
    contact_rows(&mut out, "Study", &doc.contacts)?;

    let mut text = out.join("\n");
    text.push('\n');
    Ok(text)
}

fn publication_rows(out: &mut Vec<String>, section: &str) {
    for label in [
        "PubMed ID",
        "Publication DOI",
        "Publication Author List",
        "Publication Title",
        "Publication Status",
    ] {
        out.push(format!("{section} {label}"));
    }
}

fn contact_rows(
    out: &mut Vec<String>,
    section: &str,
    contacts: &[Contact],
) -> Result<(), MmitError> {
    let column = |f: fn(&Contact) -> String| contacts.iter().map(f).collect::<Vec<_>>();
    let rows: [(&str, Vec<String>); 6] = [
        ("Last Name", column(|c| c.last_name.clone())),
        ("First Name", column(|c| c.first_name.clone())),
        ("Email", column(|c| c.email.clone())),
        ("Affiliation", column(|c| c.affiliation.clone())),
        ("Roles", column(roles_cell)),
        ("Roles Term Source REF", column(|_| String::new())),
    ];
    for (label, values) in rows {
        let values = values.iter().map(String::as_str).collect::<Vec<_>>();
        out.push(row(&format!("{section} Person {label}"), &values)?);
    }
    Ok(())
}

fn roles_cell(contact: &Contact) -> String {
    contact
        .roles
        .iter()
        .map(|role| role.term())
        .collect::<Vec<_>>()
        .join(";")
}

fn study_table(samples: &[SampleRecord]) -> Result<String, MmitError> {
    let mut lines = vec![header_line(&[
        "Source Name",
        "Characteristics[Organism]",
        "Characteristics[Organism part]",
        "Characteristics[Condition]",
        "Protocol REF",
        "Sample Name",
    ])];
    for sample in samples {
        let organism = text(&sample.sample_information, "Organism");
        let part = text(&sample.sample_information, "Organism_Part");
        let condition = text(&sample.sample_information, "Condition");
        lines.push(cells(&[
            sample.dataset_name.as_str(),
            organism.as_str(),
            part.as_str(),
            condition.as_str(),
            "sample collection",
            sample.dataset_name.as_str(),
        ])?);
    }
    Ok(lines.join("\n") + "\n")
}

fn assay_table(samples: &[SampleRecord], assays: &[AssayEntry]) -> Result<String, MmitError> {
    let mut lines = vec![header_line(&[
        "Sample Name",
        "Protocol REF",
        "Parameter Value[Ion source]",
        "Parameter Value[Mass analyzer]",
        "Parameter Value[Scan polarity]",
        "Raw Spectral Data File",
        "Derived Spectral Data File",
    ])];
    for (sample, assay) in samples.iter().zip(assays) {
        let imzml = data_file(assay, ".imzML");
        let ibd = data_file(assay, ".ibd");
        let ion_source = text(&sample.ms_analysis, "Ionisation_Source");
        let analyzer = text(&sample.ms_analysis, "Analyzer");
        let polarity = text(&sample.ms_analysis, "Polarity");
        lines.push(cells(&[
            assay.sample_name.as_str(),
            TECHNOLOGY_TYPE,
            ion_source.as_str(),
            analyzer.as_str(),
            polarity.as_str(),
            imzml,
            ibd,
        ])?);
    }
    Ok(lines.join("\n") + "\n")
}

fn data_file<'a>(assay: &'a AssayEntry, suffix: &str) -> &'a str {
    assay
        .data_files
        .iter()
        .find(|file| file.ends_with(suffix))
        .map_or("", String::as_str)
}

fn header_line(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join("\t")
}

fn row(label: &str, values: &[&str]) -> Result<String, MmitError> {
    let mut line = label.to_string();
    for value in values {
        line.push('\t');
        line.push_str(&quote(label, value)?);
    }
    Ok(line)
}

fn cells(values: &[&str]) -> Result<String, MmitError> {
    values
        .iter()
        .map(|value| quote("table cell", value))
        .collect::<Result<Vec<_>, _>>()
        .map(|cells| cells.join("\t"))
}

fn quote(field: &str, value: &str) -> Result<String, MmitError> {
    if value.contains(['\t', '\n', '\r']) {
        return Err(MmitError::Serialization(format!(
            "{field} contains a tab or line break: {value:?}"
        )));
    }
    Ok(format!("\"{}\"", value.replace('"', "\"\"")))
}

fn text(block: &Map<String, Value>, key: &str) -> String {
    match block.get(key) {
        Some(Value::String(value)) => value.trim().to_string(),
        Some(Value::Number(value)) => value.to_string(),
        Some(Value::Bool(value)) => value.to_string(),
        _ => String::new(),
    }
}

/// ISA-JSON rendering of the same investigation.
pub struct IsaJsonSerializer;

impl DocumentSerializer for IsaJsonSerializer {
    fn serialize(&self, doc: &StudyDocument) -> Result<SerializedDocument, MmitError> {
        let people = doc.contacts.iter().map(person_json).collect::<Vec<_>>();
        let samples = doc
            .samples
            .iter()
            .map(|sample| json!({ "name": sample.dataset_name }))
            .collect::<Vec<_>>();
        let data_files = doc
            .assays
            .iter()
            .flat_map(|assay| assay.data_files.iter())
            .map(|file| json!({ "name": file, "type": "Raw Spectral Data File" }))
            .collect::<Vec<_>>();

        let investigation = json!({
            "identifier": "",
            "title": "",
            "description": "",
            "submissionDate": "",
            "publicReleaseDate": "",
            "people": people,
            "studies": [{
                "identifier": STUDY_IDENTIFIER,
                "filename": STUDY_FILE,
                "title": doc.title,
                "description": doc.description,
                "submissionDate": doc.submission_date.format("%Y-%m-%d").to_string(),
                "publicReleaseDate": doc.release_date.format("%Y-%m-%d").to_string(),
                "people": people,
                "materials": { "samples": samples },
                "assays": [{
                    "filename": ASSAY_FILE,
                    "measurementType": { "annotationValue": MEASUREMENT_TYPE },
                    "technologyType": { "annotationValue": TECHNOLOGY_TYPE },
                    "dataFiles": data_files,
                    "materials": { "samples": samples },
                }],
            }],
        });

        let content = serde_json::to_string_pretty(&investigation)
            .map_err(|err| MmitError::Serialization(err.to_string()))?;
        Ok(SerializedDocument {
            files: vec![SerializedFile {
                name: INVESTIGATION_JSON_FILE.to_string(),
                content,
            }],
        })
    }
}

fn person_json(contact: &Contact) -> Value {
    json!({
        "firstName": contact.first_name,
        "lastName": contact.last_name,
        "email": contact.email,
        "affiliation": contact.affiliation,
        "roles": contact
            .roles
            .iter()
            .map(|role| json!({ "annotationValue": role.term() }))
            .collect::<Vec<_>>(),
    })
}
