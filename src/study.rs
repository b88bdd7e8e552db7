use std::collections::BTreeSet;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::domain::ArtifactKind;
use crate::resolver::resolve;
use crate::sample::{Person, SampleRecord};
use crate::session::StoreSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Role {
    Submitter,
    PrincipalInvestigator,
}

impl Role {
    /// Ontology term used for the role in ISA documents.
    pub fn term(self) -> &'static str {
        match self {
            Role::Submitter => "submitter",
            Role::PrincipalInvestigator => "principal investigator role",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub affiliation: String,
    pub email: String,
    pub roles: BTreeSet<Role>,
}

impl Contact {
    pub fn from_person(person: &Person, affiliation: &str, roles: &[Role]) -> Self {
        Self {
            first_name: person.first_name.clone(),
            last_name: person.surname.clone(),
            affiliation: affiliation.to_string(),
            email: person.email.clone(),
            roles: roles.iter().copied().collect(),
        }
    }

    pub fn same_person(&self, other: &Contact) -> bool {
        self.first_name == other.first_name && self.last_name == other.last_name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssayEntry {
    pub sample_name: String,
    pub contacts: Vec<Contact>,
    pub data_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyDocument {
    pub title: String,
    pub description: String,
    pub submission_date: NaiveDate,
    pub release_date: NaiveDate,
    pub contacts: Vec<Contact>,
    pub samples: Vec<SampleRecord>,
    pub assays: Vec<AssayEntry>,
}

/// Folds sample records into one study document. Performs no I/O.
pub struct StudyBuilder<'s> {
    session: &'s StoreSession,
}

impl<'s> StudyBuilder<'s> {
    pub fn new(session: &'s StoreSession) -> Self {
        Self { session }
    }

    /// Empty document dated today.
    pub fn new_document(&self, title: &str, description: &str) -> StudyDocument {
        let today = Local::now().date_naive();
        self.new_document_with_dates(title, description, today, today)
    }

    pub fn new_document_with_dates(
        &self,
        title: &str,
        description: &str,
        submission_date: NaiveDate,
        release_date: NaiveDate,
    ) -> StudyDocument {
        StudyDocument {
            title: title.to_string(),
            description: description.to_string(),
            submission_date,
            release_date,
            contacts: Vec::new(),
            samples: Vec::new(),
            assays: Vec::new(),
        }
    }

    /// Appends the sample, its PI and submitter contacts and its assay entry.
    ///
    /// Both contacts are always appended, even when the submitter is the
    /// principal investigator.
    pub fn add_sample(&self, mut doc: StudyDocument, sample: &SampleRecord) -> StudyDocument {
        let ppal_investigator = Contact::from_person(
            &sample.principal_investigator,
            &sample.institution,
            &[Role::Submitter, Role::PrincipalInvestigator],
        );
        let submitter =
            Contact::from_person(&sample.submitter, &sample.institution, &[Role::Submitter]);
        if ppal_investigator.same_person(&submitter) {
            // TODO: decide whether a submitter who is also the PI should be listed once
            debug!(
                dataset = sample.dataset_name.as_str(),
                "submitter is the principal investigator; adding both contacts"
            );
        }

        let data_files = [ArtifactKind::Imzml, ArtifactKind::Ibd]
            .into_iter()
            .filter_map(|kind| resolve(sample, kind).ok())
            .map(|locator| self.session.uri(&locator))
            .collect();

        let contacts = vec![ppal_investigator, submitter];
        doc.contacts.extend(contacts.iter().cloned());
        doc.assays.push(AssayEntry {
            sample_name: sample.dataset_name.clone(),
            contacts,
            data_files,
        });
        doc.samples.push(sample.clone());
        doc
    }

    /// Builds a document from a whole batch, preserving input order.
    pub fn build<'a>(
        &self,
        title: &str,
        description: &str,
        samples: impl IntoIterator<Item = &'a SampleRecord>,
    ) -> StudyDocument {
        samples
            .into_iter()
            .fold(self.new_document(title, description), |doc, sample| {
                self.add_sample(doc, sample)
            })
    }
}
