use std::collections::BTreeMap;

use formkit_core::{Field, Form, FormId, Section, Subform};
use formkit_storage::{EntityStore, StorageError};

/// A field together with the section (and subform, if any) it sits in.
#[derive(Debug, Clone)]
pub struct PlacedField {
    pub field: Field,
    pub section: Section,
    pub subform: Option<Subform>,
}

/// Every field a form declares, in section order: each section's direct fields
/// first, then its subforms' fields.
#[derive(Debug, Clone)]
pub struct FormLayout {
    pub form: Form,
    pub fields: Vec<PlacedField>,
}

impl FormLayout {
    pub fn load<S: EntityStore>(store: &S, form_id: &FormId) -> Result<Option<Self>, StorageError> {
        let Some(form) = store.find_form(form_id)? else {
            return Ok(None);
        };

        let mut fields = Vec::new();
        for section in store.list_sections(form_id)? {
            for field in store.list_section_fields(&section.id)? {
                fields.push(PlacedField {
                    field,
                    section: section.clone(),
                    subform: None,
                });
            }
            for subform in store.list_subforms(&section.id)? {
                for field in store.list_subform_fields(&subform.id)? {
                    fields.push(PlacedField {
                        field,
                        section: section.clone(),
                        subform: Some(subform.clone()),
                    });
                }
            }
        }

        Ok(Some(Self { form, fields }))
    }

    /// Field id -> placement.
    pub fn by_id(&self) -> BTreeMap<&str, &PlacedField> {
        self.fields
            .iter()
            .map(|placed| (placed.field.id.as_str(), placed))
            .collect()
    }
}
