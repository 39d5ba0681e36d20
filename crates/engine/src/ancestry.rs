use serde::Serialize;

use formkit_core::{FieldId, FieldParent, FormId, ModuleId, SectionId, SubformId};
use formkit_storage::EntityStore;

use crate::error::LookupError;
use crate::payload::FieldWrite;

/// The form and module a field belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ancestry {
    pub form_id: FormId,
    pub module_id: ModuleId,
}

/// Walk section -> form -> module for `field`. Uses the payload's section or
/// subform when present, otherwise the stored field's parent.
pub fn resolve_ancestry<S: EntityStore>(store: &S, field: &FieldWrite) -> Result<Ancestry, LookupError> {
    if let Some(section_id) = &field.section_id {
        return from_section(store, &field.id, section_id);
    }
    if let Some(subform_id) = &field.subform_id {
        return from_subform(store, &field.id, subform_id);
    }

    let stored = store
        .find_field(&field.id)?
        .ok_or_else(|| not_found(&field.id, "payload has no parent and the field is not stored".into()))?;
    match &stored.parent {
        FieldParent::Section(section_id) => from_section(store, &field.id, section_id),
        FieldParent::Subform(subform_id) => from_subform(store, &field.id, subform_id),
    }
}

fn from_subform<S: EntityStore>(
    store: &S,
    field_id: &FieldId,
    subform_id: &SubformId,
) -> Result<Ancestry, LookupError> {
    let subform = store
        .find_subform(subform_id)?
        .ok_or_else(|| not_found(field_id, format!("subform {subform_id} does not exist")))?;
    from_section(store, field_id, &subform.section_id)
}

fn from_section<S: EntityStore>(
    store: &S,
    field_id: &FieldId,
    section_id: &SectionId,
) -> Result<Ancestry, LookupError> {
    let section = store
        .find_section(section_id)?
        .ok_or_else(|| not_found(field_id, format!("section {section_id} does not exist")))?;
    let form = store
        .find_form(&section.form_id)?
        .ok_or_else(|| not_found(field_id, format!("form {} does not exist", section.form_id)))?;
    let module_id = form
        .module_id
        .ok_or_else(|| not_found(field_id, format!("form {} is not in a module", form.id)))?;
    Ok(Ancestry {
        form_id: form.id,
        module_id,
    })
}

fn not_found(field_id: &FieldId, reason: String) -> LookupError {
    LookupError::AncestryNotFound {
        field_id: field_id.to_string(),
        reason,
    }
}
