use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;
use crate::model::Filters;

pub const MODULE_SOURCE_PREFIX: &str = "module_";
pub const FORM_SOURCE_PREFIX: &str = "form_";
pub const RELATION_PREFIX: &str = "lfr_";

/// Canonical identifier of a lookup source. Derived ids are `module_<id>` and
/// `form_<id>`; anything else is an opaque caller-supplied id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn for_module(module_id: &ModuleId) -> Self {
        Self(format!("{MODULE_SOURCE_PREFIX}{module_id}"))
    }

    pub fn for_form(form_id: &FormId) -> Self {
        Self(format!("{FORM_SOURCE_PREFIX}{form_id}"))
    }

    /// Validate a caller-declared id, kept verbatim. The derived prefixes are
    /// reserved.
    pub fn explicit(id: &str) -> Result<Self, CoreError> {
        if id.trim().is_empty() {
            return Err(CoreError::InvalidData("empty lookup source id".into()));
        }
        if id.starts_with(MODULE_SOURCE_PREFIX) || id.starts_with(FORM_SOURCE_PREFIX) {
            return Err(CoreError::ReservedSourceId(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    /// Wrap an id read back from storage or a query string, unvalidated.
    pub fn from_stored(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn target(&self) -> SourceTarget {
        if let Some(rest) = self.0.strip_prefix(MODULE_SOURCE_PREFIX) {
            if !rest.is_empty() {
                return SourceTarget::Module(ModuleId::new(rest));
            }
        }
        if let Some(rest) = self.0.strip_prefix(FORM_SOURCE_PREFIX) {
            if !rest.is_empty() {
                return SourceTarget::Form(FormId::new(rest));
            }
        }
        SourceTarget::Named(self.0.clone())
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTarget {
    Module(ModuleId),
    Form(FormId),
    Named(String),
}

/// How a field declares what it looks up against. Precedence when several are
/// present: explicit id, then module, then form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDeclaration {
    Explicit(String),
    Module(ModuleId),
    Form(FormId),
}

impl SourceDeclaration {
    pub fn from_parts(
        explicit: Option<&str>,
        source_module: Option<&ModuleId>,
        source_form: Option<&FormId>,
    ) -> Option<Self> {
        if let Some(id) = explicit.filter(|s| !s.trim().is_empty()) {
            return Some(Self::Explicit(id.to_string()));
        }
        if let Some(id) = source_module.filter(|m| !m.as_str().is_empty()) {
            return Some(Self::Module(id.clone()));
        }
        if let Some(id) = source_form.filter(|f| !f.as_str().is_empty()) {
            return Some(Self::Form(id.clone()));
        }
        None
    }

    pub fn source_id(&self) -> Result<SourceId, CoreError> {
        match self {
            Self::Explicit(id) => SourceId::explicit(id),
            Self::Module(id) => Ok(SourceId::for_module(id)),
            Self::Form(id) => Ok(SourceId::for_form(id)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Static,
    Form,
    Module,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Form => "form",
            Self::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "static" => Ok(Self::Static),
            "form" => Ok(Self::Form),
            "module" => Ok(Self::Module),
            _ => Err(CoreError::InvalidData(format!("unknown source kind: {s}"))),
        }
    }
}

/// Identifier of a lookup-field relation: `lfr_<sourceId>_<fieldId>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(String);

impl RelationId {
    pub fn for_pair(source_id: &SourceId, field_id: &FieldId) -> Self {
        Self(format!("{RELATION_PREFIX}{source_id}_{field_id}"))
    }

    pub fn from_stored(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelationId({})", self.0)
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupSource {
    pub id: SourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub description: Option<String>,
    pub source_module_id: Option<ModuleId>,
    pub source_form_id: Option<FormId>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupFieldRelation {
    pub id: RelationId,
    pub source_id: SourceId,
    pub field_id: FieldId,
    /// Owning form of the referencing field, not of the source.
    pub form_id: FormId,
    pub module_id: ModuleId,
    pub display_field: Option<String>,
    pub value_field: Option<String>,
    pub multiple: bool,
    pub searchable: bool,
    pub filters: Filters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
