//! Read-side lookup service: list sources, describe their fields, and page
//! through their rows with optional search.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use formkit_core::{
    Field, Form, FormId, FormRecord, Module, SectionId, SourceId, SourceKind, SourceTarget,
    static_sources::{self, StaticSource},
};
use formkit_storage::EntityStore;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::layout::FormLayout;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub id: SourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub description: Option<String>,
    pub record_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_id: Option<FormId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupQuery {
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Record-data key whose value becomes the row label.
    pub display_field: Option<String>,
    /// Record-data key whose value becomes the row value.
    pub value_field: Option<String>,
}

impl LookupQuery {
    /// Query shaped by a lookup field's own display/value mapping.
    pub fn for_field(field: &Field) -> Self {
        Self {
            display_field: field.lookup.display_field.clone(),
            value_field: field.lookup.value_field.clone(),
            ..Self::default()
        }
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn display(mut self, display_field: impl Into<String>) -> Self {
        self.display_field = Some(display_field.into());
        self
    }

    pub fn value(mut self, value_field: impl Into<String>) -> Self {
        self.value_field = Some(value_field.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRow {
    pub id: String,
    pub value: Value,
    pub label: String,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_id: Option<FormId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_name: Option<String>,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupPage {
    pub rows: Vec<LookupRow>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

enum Target {
    Static(&'static StaticSource),
    Form(Form),
    Module(Module),
}

fn resolve_target<S: EntityStore>(store: &S, source_id: &SourceId) -> Result<Target, EngineError> {
    let unknown = || EngineError::UnknownSource(source_id.to_string());
    match source_id.target() {
        SourceTarget::Module(id) => store.find_module(&id)?.map(Target::Module).ok_or_else(unknown),
        SourceTarget::Form(id) => store.find_form(&id)?.map(Target::Form).ok_or_else(unknown),
        SourceTarget::Named(name) => {
            if let Some(list) = static_sources::find(&name) {
                return Ok(Target::Static(list));
            }
            let stored = store.find_lookup_source(source_id)?.ok_or_else(unknown)?;
            if let Some(form_id) = &stored.source_form_id {
                return store.find_form(form_id)?.map(Target::Form).ok_or_else(unknown);
            }
            if let Some(module_id) = &stored.source_module_id {
                return store.find_module(module_id)?.map(Target::Module).ok_or_else(unknown);
            }
            Err(unknown())
        }
    }
}

// ============================================================================
// Sources
// ============================================================================

pub fn list_sources<S: EntityStore>(store: &S, config: &EngineConfig) -> Result<Vec<SourceSummary>, EngineError> {
    let mut out = Vec::new();

    if config.list_static_sources {
        for list in static_sources::STATIC_SOURCES {
            out.push(SourceSummary {
                id: SourceId::from_stored(list.id),
                name: list.name.to_string(),
                kind: SourceKind::Static,
                description: Some(list.description.to_string()),
                record_count: list.entries.len() as u64,
            });
        }
    }

    for module in store.list_modules()? {
        let mut record_count = 0;
        for form in store.list_forms_under_module(&module.id)? {
            record_count += store.count_records(&form.id)?;
        }
        out.push(SourceSummary {
            id: SourceId::for_module(&module.id),
            name: module.name,
            kind: SourceKind::Module,
            description: module.description,
            record_count,
        });
    }

    for form in store.list_forms()? {
        out.push(SourceSummary {
            id: SourceId::for_form(&form.id),
            record_count: store.count_records(&form.id)?,
            name: form.name,
            kind: SourceKind::Form,
            description: form.description,
        });
    }

    Ok(out)
}

// ============================================================================
// Fields
// ============================================================================

fn static_descriptors() -> Vec<FieldDescriptor> {
    [("value", "Value"), ("label", "Label"), ("description", "Description")]
        .into_iter()
        .map(|(id, label)| FieldDescriptor {
            id: id.to_string(),
            label: label.to_string(),
            field_type: "text".to_string(),
            form_id: None,
            form_name: None,
            section_id: None,
        })
        .collect()
}

fn form_descriptors<S: EntityStore>(
    store: &S,
    form: &Form,
    tag_form: bool,
) -> Result<Vec<FieldDescriptor>, EngineError> {
    let Some(layout) = FormLayout::load(store, &form.id)? else {
        return Ok(Vec::new());
    };
    Ok(layout
        .fields
        .into_iter()
        .map(|placed| FieldDescriptor {
            id: placed.field.id.into_string(),
            label: placed.field.label,
            field_type: placed.field.field_type.as_str().to_string(),
            form_id: tag_form.then(|| form.id.clone()),
            form_name: tag_form.then(|| form.name.clone()),
            section_id: Some(placed.section.id),
        })
        .collect())
}

pub fn get_fields<S: EntityStore>(store: &S, source_id: &SourceId) -> Result<Vec<FieldDescriptor>, EngineError> {
    match resolve_target(store, source_id)? {
        Target::Static(_) => Ok(static_descriptors()),
        Target::Form(form) => form_descriptors(store, &form, false),
        Target::Module(module) => {
            let mut out = Vec::new();
            for form in store.list_forms_under_module(&module.id)? {
                out.extend(form_descriptors(store, &form, true)?);
            }
            Ok(out)
        }
    }
}

// ============================================================================
// Data
// ============================================================================

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

fn static_rows(list: &StaticSource) -> Vec<LookupRow> {
    list.entries
        .iter()
        .map(|entry| {
            let mut data = BTreeMap::new();
            data.insert("value".to_string(), Value::from(entry.value));
            data.insert("label".to_string(), Value::from(entry.label));
            if let Some(description) = entry.description {
                data.insert("description".to_string(), Value::from(description));
            }
            LookupRow {
                id: entry.value.to_string(),
                value: Value::from(entry.value),
                label: entry.label.to_string(),
                description: entry.description.map(str::to_string),
                form_id: None,
                form_name: None,
                data,
            }
        })
        .collect()
}

fn record_row(record: &FormRecord, form: &Form, query: &LookupQuery, tag_form: bool) -> LookupRow {
    let data: BTreeMap<String, Value> = record
        .raw_values()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();

    let label = query
        .display_field
        .as_deref()
        .and_then(|key| data.get(key))
        .and_then(value_text)
        .or_else(|| {
            data.values()
                .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string))
        })
        .unwrap_or_else(|| record.id.to_string());

    let value = query
        .value_field
        .as_deref()
        .and_then(|key| data.get(key))
        .cloned()
        .unwrap_or_else(|| Value::from(record.id.as_str()));

    LookupRow {
        id: record.id.to_string(),
        value,
        label,
        description: tag_form.then(|| form.name.clone()),
        form_id: Some(form.id.clone()),
        form_name: Some(form.name.clone()),
        data,
    }
}

fn matches_search(row: &LookupRow, needle: &str) -> bool {
    let hit = |s: &str| s.to_lowercase().contains(needle);
    hit(&row.label)
        || row.description.as_deref().is_some_and(hit)
        || row.data.values().filter_map(value_text).any(|s| hit(&s))
}

pub fn get_data<S: EntityStore>(
    store: &S,
    config: &EngineConfig,
    source_id: &SourceId,
    query: &LookupQuery,
) -> Result<LookupPage, EngineError> {
    let rows = match resolve_target(store, source_id)? {
        Target::Static(list) => static_rows(list),
        Target::Form(form) => store
            .list_records(&form.id)?
            .iter()
            .map(|record| record_row(record, &form, query, false))
            .collect(),
        Target::Module(module) => {
            let mut rows = Vec::new();
            for form in store.list_forms_under_module(&module.id)? {
                for record in store.list_records(&form.id)? {
                    rows.push(record_row(&record, &form, query, true));
                }
            }
            rows
        }
    };

    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let rows: Vec<LookupRow> = match &needle {
        Some(needle) => rows.into_iter().filter(|row| matches_search(row, needle)).collect(),
        None => rows,
    };

    let limit = config.page_size(query.limit);
    let total = rows.len();
    let page: Vec<LookupRow> = rows.into_iter().skip(query.offset).take(limit).collect();
    Ok(LookupPage {
        has_more: query.offset.saturating_add(page.len()) < total,
        rows: page,
        total,
        limit,
        offset: query.offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(label: &str, description: Option<&str>, data: Value) -> LookupRow {
        let data = match data {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        LookupRow {
            id: "rec_1".into(),
            value: json!("rec_1"),
            label: label.into(),
            description: description.map(str::to_string),
            form_id: None,
            form_name: None,
            data,
        }
    }

    #[test]
    fn search_is_case_insensitive_across_label_description_and_data() {
        let r = row("Alice Smith", Some("Key account"), json!({"fld_2": "Berlin", "fld_3": 42, "fld_4": ["red", "Blue"]}));
        assert!(matches_search(&r, "alice"));
        assert!(matches_search(&r, "account"));
        assert!(matches_search(&r, "berlin"));
        assert!(matches_search(&r, "42"));
        assert!(matches_search(&r, "blue"));
        assert!(!matches_search(&r, "paris"));
    }

    #[test]
    fn value_text_flattens() {
        assert_eq!(value_text(&json!(null)), None);
        assert_eq!(value_text(&json!(true)).as_deref(), Some("true"));
        assert_eq!(value_text(&json!(["a", null, 2])).as_deref(), Some("a, 2"));
        assert_eq!(value_text(&json!([])), None);
    }

    #[test]
    fn static_rows_carry_value_and_label() {
        let rows = static_rows(static_sources::find("priorities").unwrap());
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].value, json!("low"));
        assert_eq!(rows[0].label, "Low");
        assert_eq!(rows[0].data.get("description"), Some(&json!("Can wait")));
    }
}
