pub mod ancestry;
pub mod config;
pub mod error;
pub mod layout;
pub mod payload;
pub mod query;
pub mod relation;
pub mod source;
pub mod submission;

pub use ancestry::{Ancestry, resolve_ancestry};
pub use config::EngineConfig;
pub use error::{EngineError, LookupError, SubmissionError};
pub use layout::{FormLayout, PlacedField};
pub use payload::{FieldWrite, LookupRef};
pub use query::{FieldDescriptor, LookupPage, LookupQuery, LookupRow, SourceSummary};
pub use relation::{try_upsert_relation, upsert_relation};
pub use source::{ensure_source, resolve_source_id};
pub use submission::{Submission, SubmissionReceipt};

use chrono::Utc;
use tracing::{debug, info};

use formkit_core::{
    Field, FieldId, FieldParent, FieldPatch, Form, FormId, FormRecord, LookupFieldRelation,
    LookupSource, Module, ModuleId, NewField, NewForm, NewModule, NewSection, NewSubform, RecordId,
    RelationId, Section, SectionId, SourceId, Subform, SubformId,
};
use formkit_storage::{EntityStore, SqliteStore};

/// Form builder, submission pipeline and lookup service over one store.
///
/// Every field write goes through [`Engine::create_field`] or
/// [`Engine::update_field`], which run the lookup-relation hook after the
/// write has been persisted.
pub struct Engine<S = SqliteStore> {
    store: S,
    config: EngineConfig,
}

impl Engine<SqliteStore> {
    /// Open the database named by `config`, or an in-memory one if it names none.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_in_memory()?,
        };
        info!(path = ?config.database_path, "engine opened");
        Ok(Self::new(store, config))
    }
}

impl<S: EntityStore> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn require_module(&self, id: &ModuleId) -> Result<Module, EngineError> {
        self.store
            .find_module(id)?
            .ok_or_else(|| EngineError::ModuleNotFound(id.to_string()))
    }

    fn require_form(&self, id: &FormId) -> Result<Form, EngineError> {
        self.store
            .find_form(id)?
            .ok_or_else(|| EngineError::FormNotFound(id.to_string()))
    }

    fn require_section(&self, id: &SectionId) -> Result<Section, EngineError> {
        self.store
            .find_section(id)?
            .ok_or_else(|| EngineError::SectionNotFound(id.to_string()))
    }

    fn require_subform(&self, id: &SubformId) -> Result<Subform, EngineError> {
        self.store
            .find_subform(id)?
            .ok_or_else(|| EngineError::SubformNotFound(id.to_string()))
    }

    /// Number of fields already under `parent`, used as the next field's order.
    fn sibling_count(&self, parent: &FieldParent) -> Result<i64, EngineError> {
        let count = match parent {
            FieldParent::Section(id) => {
                self.require_section(id)?;
                self.store.list_section_fields(id)?.len()
            }
            FieldParent::Subform(id) => {
                self.require_subform(id)?;
                self.store.list_subform_fields(id)?.len()
            }
        };
        Ok(count as i64)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn create_module(&mut self, new: NewModule) -> Result<Module, EngineError> {
        if let Some(parent) = &new.parent_id {
            self.require_module(parent)?;
        }
        let now = Utc::now();
        let module = Module {
            id: new.id.unwrap_or_else(ModuleId::generate),
            name: new.name,
            description: new.description,
            parent_id: new.parent_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_module(&module)?;
        debug!(module_id = %module.id, "module created");
        Ok(module)
    }

    pub fn create_form(&mut self, new: NewForm) -> Result<Form, EngineError> {
        if let Some(module_id) = &new.module_id {
            self.require_module(module_id)?;
        }
        let now = Utc::now();
        let form = Form {
            id: new.id.unwrap_or_else(FormId::generate),
            module_id: new.module_id,
            name: new.name,
            description: new.description,
            is_published: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_form(&form)?;
        debug!(form_id = %form.id, "form created");
        Ok(form)
    }

    pub fn create_section(&mut self, new: NewSection) -> Result<Section, EngineError> {
        self.require_form(&new.form_id)?;
        let order = self.store.list_sections(&new.form_id)?.len() as i64;
        let section = Section {
            id: new.id.unwrap_or_else(SectionId::generate),
            form_id: new.form_id,
            title: new.title,
            description: new.description,
            order,
        };
        self.store.insert_section(&section)?;
        Ok(section)
    }

    pub fn create_subform(&mut self, new: NewSubform) -> Result<Subform, EngineError> {
        self.require_section(&new.section_id)?;
        let order = self.store.list_subforms(&new.section_id)?.len() as i64;
        let subform = Subform {
            id: new.id.unwrap_or_else(SubformId::generate),
            section_id: new.section_id,
            name: new.name,
            description: new.description,
            order,
        };
        self.store.insert_subform(&subform)?;
        Ok(subform)
    }

    // ========================================================================
    // Fields (with lookup-relation hook)
    // ========================================================================

    /// Persist a new field, then record its lookup relation if it is a lookup.
    /// Relation failures are logged and never undo the field.
    pub fn create_field(&mut self, new: NewField) -> Result<Field, EngineError> {
        if new.label.trim().is_empty() {
            return Err(EngineError::InvalidField("label must not be empty".into()));
        }
        let order = self.sibling_count(&new.parent)?;
        let now = Utc::now();
        let field = Field {
            id: new.id.unwrap_or_else(FieldId::generate),
            parent: new.parent,
            field_type: new.field_type,
            label: new.label,
            description: new.description,
            placeholder: new.placeholder,
            options: new.options,
            validation: new.validation,
            order,
            lookup: new.lookup,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_field(&field)?;
        debug!(field_id = %field.id, field_type = %field.field_type, "field created");

        upsert_relation(&mut self.store, &FieldWrite::from_field(&field));
        Ok(field)
    }

    /// Apply a partial update, then refresh the lookup relation. The hook sees
    /// only what the patch carried and falls back to the stored field for the
    /// rest. A field that no longer resolves to a source loses its relations.
    pub fn update_field(&mut self, id: &FieldId, patch: FieldPatch) -> Result<Field, EngineError> {
        if let Some(parent) = &patch.parent {
            self.sibling_count(parent)?;
        }
        if patch.label.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(EngineError::InvalidField("label must not be empty".into()));
        }
        let updated = self
            .store
            .update_field(id, &patch)?
            .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;
        debug!(field_id = %id, "field updated");

        let write = FieldWrite::from_patch(id, updated.field_type.clone(), &patch);
        if upsert_relation(&mut self.store, &write).is_none() {
            let dropped = self.store.delete_relations_for_field(id)?;
            if dropped > 0 {
                debug!(field_id = %id, dropped, "stale lookup relations removed");
            }
        }
        Ok(updated)
    }

    pub fn find_field(&self, id: &FieldId) -> Result<Option<Field>, EngineError> {
        Ok(self.store.find_field(id)?)
    }

    /// Deleting a field also drops its lookup relations.
    pub fn delete_field(&mut self, id: &FieldId) -> Result<bool, EngineError> {
        Ok(self.store.delete_field(id)?)
    }

    /// Deleting a form drops its sections, fields, records and relations, and
    /// the lookup source backed by it.
    pub fn delete_form(&mut self, id: &FormId) -> Result<bool, EngineError> {
        Ok(self.store.delete_form(id)?)
    }

    /// Deleting a module drops its sub-modules and their forms.
    pub fn delete_module(&mut self, id: &ModuleId) -> Result<bool, EngineError> {
        Ok(self.store.delete_module(id)?)
    }

    /// Deleting a lookup source drops every relation that references it.
    pub fn delete_lookup_source(&mut self, id: &SourceId) -> Result<bool, EngineError> {
        Ok(self.store.delete_lookup_source(id)?)
    }

    // ========================================================================
    // Lookup bookkeeping
    // ========================================================================

    pub fn resolve_source_id(&self, field: &FieldWrite) -> Result<SourceId, LookupError> {
        source::resolve_source_id(field)
    }

    pub fn ensure_source(&mut self, source_id: &SourceId) -> Result<LookupSource, LookupError> {
        self.store.atomically(|store| source::ensure_source(store, source_id))
    }

    pub fn resolve_ancestry(&self, field: &FieldWrite) -> Result<Ancestry, LookupError> {
        ancestry::resolve_ancestry(&self.store, field)
    }

    /// Relation hook. Never fails; see [`relation::upsert_relation`].
    pub fn upsert_relation(&mut self, field: &FieldWrite) -> Option<LookupFieldRelation> {
        relation::upsert_relation(&mut self.store, field)
    }

    pub fn try_upsert_relation(&mut self, field: &FieldWrite) -> Result<LookupFieldRelation, LookupError> {
        relation::try_upsert_relation(&mut self.store, field)
    }

    pub fn find_lookup_source(&self, id: &SourceId) -> Result<Option<LookupSource>, EngineError> {
        Ok(self.store.find_lookup_source(id)?)
    }

    pub fn lookup_sources(&self) -> Result<Vec<LookupSource>, EngineError> {
        Ok(self.store.list_lookup_sources()?)
    }

    pub fn find_relation(&self, id: &RelationId) -> Result<Option<LookupFieldRelation>, EngineError> {
        Ok(self.store.find_lookup_field_relation(id)?)
    }

    pub fn relations_for_field(&self, field_id: &FieldId) -> Result<Vec<LookupFieldRelation>, EngineError> {
        Ok(self.store.list_relations_for_field(field_id)?)
    }

    pub fn relations_for_source(&self, source_id: &SourceId) -> Result<Vec<LookupFieldRelation>, EngineError> {
        Ok(self.store.list_relations_for_source(source_id)?)
    }

    // ========================================================================
    // Submissions
    // ========================================================================

    pub fn submit(&mut self, submission: &Submission) -> Result<SubmissionReceipt, SubmissionError> {
        submission::submit(&mut self.store, submission)
    }

    pub fn find_record(&self, id: &RecordId) -> Result<Option<FormRecord>, EngineError> {
        Ok(self.store.find_record(id)?)
    }

    pub fn records(&self, form_id: &FormId) -> Result<Vec<FormRecord>, EngineError> {
        Ok(self.store.list_records(form_id)?)
    }

    // ========================================================================
    // Lookup queries
    // ========================================================================

    pub fn list_sources(&self) -> Result<Vec<SourceSummary>, EngineError> {
        query::list_sources(&self.store, &self.config)
    }

    pub fn lookup_fields(&self, source_id: &SourceId) -> Result<Vec<FieldDescriptor>, EngineError> {
        query::get_fields(&self.store, source_id)
    }

    pub fn lookup_data(&self, source_id: &SourceId, query: &LookupQuery) -> Result<LookupPage, EngineError> {
        query::get_data(&self.store, &self.config, source_id, query)
    }
}
