use formkit_core::{
    ids::*,
    lookup::{LookupFieldRelation, LookupSource, RelationId, SourceId},
    model::{Field, FieldPatch, Form, Module, Section, Subform},
    record::{CanonicalData, FormRecord},
};

use crate::error::StorageError;

/// Persistent store for the form hierarchy, submitted records, lookup sources
/// and lookup-field relations.
pub trait EntityStore {
    /// Run `f` inside a write transaction. Nested calls join the outer
    /// transaction. Any error rolls the whole unit back.
    fn atomically<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StorageError>;

    // ------------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------------

    fn insert_module(&mut self, module: &Module) -> Result<(), StorageError>;

    fn find_module(&self, id: &ModuleId) -> Result<Option<Module>, StorageError>;

    fn list_modules(&self) -> Result<Vec<Module>, StorageError>;

    /// Removes the module and everything beneath it. Returns false if absent.
    fn delete_module(&mut self, id: &ModuleId) -> Result<bool, StorageError>;

    // ------------------------------------------------------------------------
    // Forms, sections, subforms
    // ------------------------------------------------------------------------

    fn insert_form(&mut self, form: &Form) -> Result<(), StorageError>;

    fn find_form(&self, id: &FormId) -> Result<Option<Form>, StorageError>;

    fn list_forms(&self) -> Result<Vec<Form>, StorageError>;

    /// Forms owned by the module or any of its descendant modules.
    fn list_forms_under_module(&self, id: &ModuleId) -> Result<Vec<Form>, StorageError>;

    fn delete_form(&mut self, id: &FormId) -> Result<bool, StorageError>;

    fn insert_section(&mut self, section: &Section) -> Result<(), StorageError>;

    fn find_section(&self, id: &SectionId) -> Result<Option<Section>, StorageError>;

    fn list_sections(&self, form_id: &FormId) -> Result<Vec<Section>, StorageError>;

    fn insert_subform(&mut self, subform: &Subform) -> Result<(), StorageError>;

    fn find_subform(&self, id: &SubformId) -> Result<Option<Subform>, StorageError>;

    fn list_subforms(&self, section_id: &SectionId) -> Result<Vec<Subform>, StorageError>;

    // ------------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------------

    fn insert_field(&mut self, field: &Field) -> Result<(), StorageError>;

    fn find_field(&self, id: &FieldId) -> Result<Option<Field>, StorageError>;

    /// Apply a partial update. Returns the stored field after the update, or
    /// None if no such field exists.
    fn update_field(
        &mut self,
        id: &FieldId,
        patch: &FieldPatch,
    ) -> Result<Option<Field>, StorageError>;

    fn delete_field(&mut self, id: &FieldId) -> Result<bool, StorageError>;

    fn list_section_fields(&self, section_id: &SectionId) -> Result<Vec<Field>, StorageError>;

    fn list_subform_fields(&self, subform_id: &SubformId) -> Result<Vec<Field>, StorageError>;

    // ------------------------------------------------------------------------
    // Lookup sources and relations
    // ------------------------------------------------------------------------

    fn find_lookup_source(&self, id: &SourceId) -> Result<Option<LookupSource>, StorageError>;

    fn list_lookup_sources(&self) -> Result<Vec<LookupSource>, StorageError>;

    /// Insert or overwrite by id. On conflict the stored `created_at` is kept and
    /// every other attribute takes the incoming value. Returns the stored row.
    fn upsert_lookup_source(&mut self, source: &LookupSource) -> Result<LookupSource, StorageError>;

    fn delete_lookup_source(&mut self, id: &SourceId) -> Result<bool, StorageError>;

    /// Insert or overwrite by id, keeping the stored `created_at`.
    fn upsert_lookup_field_relation(
        &mut self,
        relation: &LookupFieldRelation,
    ) -> Result<LookupFieldRelation, StorageError>;

    fn find_lookup_field_relation(
        &self,
        id: &RelationId,
    ) -> Result<Option<LookupFieldRelation>, StorageError>;

    fn list_relations_for_field(
        &self,
        field_id: &FieldId,
    ) -> Result<Vec<LookupFieldRelation>, StorageError>;

    fn list_relations_for_source(
        &self,
        source_id: &SourceId,
    ) -> Result<Vec<LookupFieldRelation>, StorageError>;

    /// Drop every relation of `field_id`. Returns the count removed.
    fn delete_relations_for_field(&mut self, field_id: &FieldId) -> Result<usize, StorageError>;

    /// Drop every relation of `field_id` other than `keep`. Returns the count removed.
    fn delete_relations_for_field_except(
        &mut self,
        field_id: &FieldId,
        keep: &RelationId,
    ) -> Result<usize, StorageError>;

    // ------------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------------

    /// Record on `form_id` whose raw submitted data is identical to `data`.
    fn find_record_by_exact_data(
        &self,
        form_id: &FormId,
        data: &CanonicalData,
    ) -> Result<Option<FormRecord>, StorageError>;

    /// Persist a record. A second record with the same raw data on the same form
    /// fails with `ConstraintViolation`.
    fn create_record(
        &mut self,
        record: &FormRecord,
        raw: &CanonicalData,
    ) -> Result<(), StorageError>;

    fn find_record(&self, id: &RecordId) -> Result<Option<FormRecord>, StorageError>;

    fn list_records(&self, form_id: &FormId) -> Result<Vec<FormRecord>, StorageError>;

    fn count_records(&self, form_id: &FormId) -> Result<u64, StorageError>;
}
