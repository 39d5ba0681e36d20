//! Form submission: validate, deduplicate, enrich and persist a record.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use formkit_core::{CanonicalData, EnrichedValue, FormId, FormRecord, RecordId};
use formkit_storage::EntityStore;

use crate::error::SubmissionError;
use crate::layout::{FormLayout, PlacedField};
use crate::payload::FieldWrite;
use crate::relation::upsert_relation;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub form_id: FormId,
    pub record_data: Map<String, Value>,
    #[serde(default)]
    pub submitted_by: Option<String>,
}

impl Submission {
    pub fn new(form_id: impl Into<FormId>, record_data: Map<String, Value>) -> Self {
        Self {
            form_id: form_id.into(),
            record_data,
            submitted_by: None,
        }
    }

    pub fn by(mut self, submitted_by: impl Into<String>) -> Self {
        self.submitted_by = Some(submitted_by.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub record_id: RecordId,
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn enrich(value: &Value, placed: &PlacedField) -> EnrichedValue {
    let field = &placed.field;
    EnrichedValue {
        value: value.clone(),
        label: field.label.clone(),
        field_type: field.field_type.as_str().to_string(),
        section_id: placed.section.id.clone(),
        section_title: placed.section.title.clone(),
        subform_id: placed.subform.as_ref().map(|s| s.id.clone()),
        description: field.description.clone(),
        placeholder: field.placeholder.clone(),
        options: field.options.clone(),
        validation: field.validation.clone(),
    }
}

/// Validate, deduplicate and persist `submission`. Storage and encoding
/// failures are logged with the form id before they are returned.
pub fn submit<S: EntityStore>(
    store: &mut S,
    submission: &Submission,
) -> Result<SubmissionReceipt, SubmissionError> {
    let result = run(store, submission);
    if let Err(err @ (SubmissionError::Storage(_) | SubmissionError::Core(_))) = &result {
        error!(form_id = %submission.form_id, error = %err, "submission failed");
    }
    result
}

fn run<S: EntityStore>(
    store: &mut S,
    submission: &Submission,
) -> Result<SubmissionReceipt, SubmissionError> {
    let form_id = &submission.form_id;
    let data = &submission.record_data;

    if data.is_empty() || data.values().all(is_blank) {
        info!(form_id = %form_id, "rejected empty submission");
        return Err(SubmissionError::EmptyPayload);
    }

    let layout = FormLayout::load(&*store, form_id)?
        .ok_or_else(|| SubmissionError::FormNotFound(form_id.to_string()))?;
    let catalog = layout.by_id();

    let unknown: Vec<String> = data
        .keys()
        .filter(|key| !catalog.contains_key(key.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        info!(form_id = %form_id, unknown = ?unknown, "rejected submission with unknown fields");
        return Err(SubmissionError::UnknownField { field_ids: unknown });
    }

    let canonical = CanonicalData::of(data)?;
    if let Some(existing) = store.find_record_by_exact_data(form_id, &canonical)? {
        info!(form_id = %form_id, record_id = %existing.id, "rejected duplicate submission");
        return Err(SubmissionError::DuplicateSubmission { record_id: existing.id });
    }

    let record_data: BTreeMap<String, EnrichedValue> = data
        .iter()
        .filter_map(|(key, value)| {
            catalog
                .get(key.as_str())
                .map(|placed| (key.clone(), enrich(value, placed)))
        })
        .collect();

    for placed in &layout.fields {
        if placed.field.lookup.declaration().is_some() {
            upsert_relation(store, &FieldWrite::from_field(&placed.field));
        }
    }

    let record = FormRecord {
        id: RecordId::generate(),
        form_id: form_id.clone(),
        record_data,
        submitted_by: submission.submitted_by.clone(),
        submitted_at: Utc::now(),
    };

    let created = store.atomically(|store| store.create_record(&record, &canonical));
    match created {
        Ok(()) => {
            debug!(form_id = %form_id, record_id = %record.id, "record created");
            Ok(SubmissionReceipt { record_id: record.id })
        }
        Err(err) if err.is_constraint_violation() => {
            // Lost a race against an identical submission.
            match store.find_record_by_exact_data(form_id, &canonical)? {
                Some(existing) => Err(SubmissionError::DuplicateSubmission { record_id: existing.id }),
                None => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_values() {
        assert!(is_blank(&Value::Null));
        assert!(is_blank(&json!("")));
        assert!(!is_blank(&json!(" ")));
        assert!(!is_blank(&json!(0)));
        assert!(!is_blank(&json!(false)));
        assert!(!is_blank(&json!([])));
    }

    #[test]
    fn submission_deserializes_from_camel_case() {
        let submission: Submission = serde_json::from_value(json!({
            "formId": "f_1",
            "recordData": {"fld_1": "Alice"},
        }))
        .unwrap();
        assert_eq!(submission.form_id, FormId::new("f_1"));
        assert_eq!(submission.record_data.get("fld_1"), Some(&json!("Alice")));
        assert_eq!(submission.submitted_by, None);
    }
}
