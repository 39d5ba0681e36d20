use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::*;
use crate::lookup::SourceDeclaration;

/// Opaque key-value filter map carried by lookup fields and relations.
pub type Filters = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<ModuleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    pub id: FormId,
    pub module_id: Option<ModuleId>,
    pub name: String,
    pub description: Option<String>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: SectionId,
    pub form_id: FormId,
    pub title: String,
    pub description: Option<String>,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subform {
    pub id: SubformId,
    pub section_id: SectionId,
    pub name: String,
    pub description: Option<String>,
    pub order: i64,
}

/// A field lives in exactly one section or one subform, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldParent {
    Section(SectionId),
    Subform(SubformId),
}

impl FieldParent {
    pub fn section_id(&self) -> Option<&SectionId> {
        match self {
            Self::Section(id) => Some(id),
            Self::Subform(_) => None,
        }
    }

    pub fn subform_id(&self) -> Option<&SubformId> {
        match self {
            Self::Subform(id) => Some(id),
            Self::Section(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Email,
    Phone,
    Date,
    DateTime,
    Select,
    MultiSelect,
    Radio,
    Checkbox,
    File,
    Lookup,
    Formula,
    Rollup,
    Other(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Textarea => "textarea",
            Self::Number => "number",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Select => "select",
            Self::MultiSelect => "multiselect",
            Self::Radio => "radio",
            Self::Checkbox => "checkbox",
            Self::File => "file",
            Self::Lookup => "lookup",
            Self::Formula => "formula",
            Self::Rollup => "rollup",
            Self::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "textarea" => Self::Textarea,
            "number" => Self::Number,
            "email" => Self::Email,
            "phone" => Self::Phone,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "select" => Self::Select,
            "multiselect" => Self::MultiSelect,
            "radio" => Self::Radio,
            "checkbox" => Self::Checkbox,
            "file" => Self::File,
            "lookup" => Self::Lookup,
            "formula" => Self::Formula,
            "rollup" => Self::Rollup,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup)
    }
}

impl From<String> for FieldType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup-related attributes of a field. Only meaningful when the field type is
/// `lookup`, but persisted for every field so a type change keeps them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupConfig {
    pub source_id: Option<String>,
    pub source_module: Option<ModuleId>,
    pub source_form: Option<FormId>,
    pub display_field: Option<String>,
    pub value_field: Option<String>,
    pub multiple: bool,
    pub searchable: bool,
    pub filters: Filters,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            source_id: None,
            source_module: None,
            source_form: None,
            display_field: None,
            value_field: None,
            multiple: false,
            searchable: true,
            filters: Filters::new(),
        }
    }
}

impl LookupConfig {
    pub fn declaration(&self) -> Option<SourceDeclaration> {
        SourceDeclaration::from_parts(
            self.source_id.as_deref(),
            self.source_module.as_ref(),
            self.source_form.as_ref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: FieldId,
    pub parent: FieldParent,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    pub description: Option<String>,
    pub placeholder: Option<String>,
    pub options: Option<Value>,
    pub validation: Option<Value>,
    pub order: i64,
    pub lookup: LookupConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Builder inputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewModule {
    pub id: Option<ModuleId>,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<ModuleId>,
}

impl NewModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            parent_id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<ModuleId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn within(mut self, parent_id: impl Into<ModuleId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewForm {
    pub id: Option<FormId>,
    pub module_id: Option<ModuleId>,
    pub name: String,
    pub description: Option<String>,
}

impl NewForm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            module_id: None,
            name: name.into(),
            description: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<FormId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn in_module(mut self, module_id: impl Into<ModuleId>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewSection {
    pub id: Option<SectionId>,
    pub form_id: FormId,
    pub title: String,
    pub description: Option<String>,
}

impl NewSection {
    pub fn new(form_id: impl Into<FormId>, title: impl Into<String>) -> Self {
        Self {
            id: None,
            form_id: form_id.into(),
            title: title.into(),
            description: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<SectionId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewSubform {
    pub id: Option<SubformId>,
    pub section_id: SectionId,
    pub name: String,
    pub description: Option<String>,
}

impl NewSubform {
    pub fn new(section_id: impl Into<SectionId>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            section_id: section_id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<SubformId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewField {
    pub id: Option<FieldId>,
    pub parent: FieldParent,
    pub field_type: FieldType,
    pub label: String,
    pub description: Option<String>,
    pub placeholder: Option<String>,
    pub options: Option<Value>,
    pub validation: Option<Value>,
    pub lookup: LookupConfig,
}

impl NewField {
    pub fn new(parent: FieldParent, field_type: FieldType, label: impl Into<String>) -> Self {
        Self {
            id: None,
            parent,
            field_type,
            label: label.into(),
            description: None,
            placeholder: None,
            options: None,
            validation: None,
            lookup: LookupConfig::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<FieldId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_lookup(mut self, lookup: LookupConfig) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn with_validation(mut self, validation: Value) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// Partial field update. `None` leaves the stored attribute untouched; the
/// nested `Option`s on source pointers allow clearing them.
#[derive(Debug, Clone, Default)]
pub struct FieldPatch {
    pub parent: Option<FieldParent>,
    pub field_type: Option<FieldType>,
    pub label: Option<String>,
    pub description: Option<Option<String>>,
    pub placeholder: Option<Option<String>>,
    pub options: Option<Option<Value>>,
    pub validation: Option<Option<Value>>,
    pub lookup_source_id: Option<Option<String>>,
    pub source_module: Option<Option<ModuleId>>,
    pub source_form: Option<Option<FormId>>,
    pub display_field: Option<Option<String>>,
    pub value_field: Option<Option<String>>,
    pub multiple: Option<bool>,
    pub searchable: Option<bool>,
    pub filters: Option<Filters>,
}

impl FieldPatch {
    /// Apply the patch to a stored field in place.
    pub fn apply_to(&self, field: &mut Field) {
        if let Some(parent) = &self.parent {
            field.parent = parent.clone();
        }
        if let Some(field_type) = &self.field_type {
            field.field_type = field_type.clone();
        }
        if let Some(label) = &self.label {
            field.label = label.clone();
        }
        if let Some(description) = &self.description {
            field.description = description.clone();
        }
        if let Some(placeholder) = &self.placeholder {
            field.placeholder = placeholder.clone();
        }
        if let Some(options) = &self.options {
            field.options = options.clone();
        }
        if let Some(validation) = &self.validation {
            field.validation = validation.clone();
        }
        if let Some(source_id) = &self.lookup_source_id {
            field.lookup.source_id = source_id.clone();
        }
        if let Some(source_module) = &self.source_module {
            field.lookup.source_module = source_module.clone();
        }
        if let Some(source_form) = &self.source_form {
            field.lookup.source_form = source_form.clone();
        }
        if let Some(display_field) = &self.display_field {
            field.lookup.display_field = display_field.clone();
        }
        if let Some(value_field) = &self.value_field {
            field.lookup.value_field = value_field.clone();
        }
        if let Some(multiple) = self.multiple {
            field.lookup.multiple = multiple;
        }
        if let Some(searchable) = self.searchable {
            field.lookup.searchable = searchable;
        }
        if let Some(filters) = &self.filters {
            field.lookup.filters = filters.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_round_trips_through_strings() {
        assert_eq!(FieldType::parse("lookup"), FieldType::Lookup);
        assert!(FieldType::parse("lookup").is_lookup());
        assert_eq!(FieldType::parse("signature"), FieldType::Other("signature".into()));
        assert_eq!(FieldType::Other("signature".into()).as_str(), "signature");
        let json = serde_json::to_string(&FieldType::Rollup).unwrap();
        assert_eq!(json, "\"rollup\"");
    }

    #[test]
    fn patch_clears_source_pointer() {
        let now = Utc::now();
        let mut field = Field {
            id: FieldId::new("fld_1"),
            parent: FieldParent::Section(SectionId::new("sec_1")),
            field_type: FieldType::Lookup,
            label: "Customer".into(),
            description: None,
            placeholder: None,
            options: None,
            validation: None,
            order: 0,
            lookup: LookupConfig {
                source_module: Some(ModuleId::new("m_1")),
                ..LookupConfig::default()
            },
            created_at: now,
            updated_at: now,
        };
        let patch = FieldPatch {
            source_module: Some(None),
            source_form: Some(Some(FormId::new("f_2"))),
            multiple: Some(true),
            ..FieldPatch::default()
        };
        patch.apply_to(&mut field);
        assert_eq!(field.lookup.source_module, None);
        assert_eq!(field.lookup.source_form, Some(FormId::new("f_2")));
        assert!(field.lookup.multiple);
        assert_eq!(field.label, "Customer");
    }
}
