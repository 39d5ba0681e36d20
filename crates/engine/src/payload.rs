use serde::Deserialize;

use formkit_core::{
    Field, FieldId, FieldPatch, FieldType, Filters, FormId, ModuleId, SectionId, SourceDeclaration,
    SubformId,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRef {
    pub source_id: Option<String>,
}

/// Field payload handed to the relation hook after a field write. Only `id` and
/// `type` are required; anything missing is read back from the stored field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldWrite {
    pub id: FieldId,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub section_id: Option<SectionId>,
    #[serde(default)]
    pub subform_id: Option<SubformId>,
    #[serde(default)]
    pub lookup: Option<LookupRef>,
    #[serde(default)]
    pub source_module: Option<ModuleId>,
    #[serde(default)]
    pub source_form: Option<FormId>,
    #[serde(default)]
    pub display_field: Option<String>,
    #[serde(default)]
    pub value_field: Option<String>,
    #[serde(default)]
    pub multiple: Option<bool>,
    #[serde(default)]
    pub searchable: Option<bool>,
    #[serde(default)]
    pub filters: Option<Filters>,
    /// Set when the payload mirrors a whole stored field.
    #[serde(skip)]
    complete: bool,
}

impl FieldWrite {
    pub fn new(id: impl Into<FieldId>, field_type: FieldType) -> Self {
        Self {
            id: id.into(),
            field_type,
            section_id: None,
            subform_id: None,
            lookup: None,
            source_module: None,
            source_form: None,
            display_field: None,
            value_field: None,
            multiple: None,
            searchable: None,
            filters: None,
            complete: false,
        }
    }

    /// Full payload for a field just created or read back.
    pub fn from_field(field: &Field) -> Self {
        Self {
            id: field.id.clone(),
            field_type: field.field_type.clone(),
            section_id: field.parent.section_id().cloned(),
            subform_id: field.parent.subform_id().cloned(),
            lookup: field.lookup.source_id.as_ref().map(|id| LookupRef {
                source_id: Some(id.clone()),
            }),
            source_module: field.lookup.source_module.clone(),
            source_form: field.lookup.source_form.clone(),
            display_field: field.lookup.display_field.clone(),
            value_field: field.lookup.value_field.clone(),
            multiple: Some(field.lookup.multiple),
            searchable: Some(field.lookup.searchable),
            filters: Some(field.lookup.filters.clone()),
            complete: true,
        }
    }

    /// Partial payload carrying only what an update changed. Cleared
    /// attributes are absent, exactly as in an update diff.
    pub fn from_patch(id: &FieldId, field_type: FieldType, patch: &FieldPatch) -> Self {
        let parent = patch.parent.as_ref();
        Self {
            id: id.clone(),
            field_type,
            section_id: parent.and_then(|p| p.section_id().cloned()),
            subform_id: parent.and_then(|p| p.subform_id().cloned()),
            lookup: patch.lookup_source_id.clone().flatten().map(|id| LookupRef {
                source_id: Some(id),
            }),
            source_module: patch.source_module.clone().flatten(),
            source_form: patch.source_form.clone().flatten(),
            display_field: patch.display_field.clone().flatten(),
            value_field: patch.value_field.clone().flatten(),
            multiple: patch.multiple,
            searchable: patch.searchable,
            filters: patch.filters.clone(),
            complete: false,
        }
    }

    pub fn with_section(mut self, section_id: impl Into<SectionId>) -> Self {
        self.section_id = Some(section_id.into());
        self
    }

    pub fn with_source_module(mut self, module_id: impl Into<ModuleId>) -> Self {
        self.source_module = Some(module_id.into());
        self
    }

    pub fn with_source_form(mut self, form_id: impl Into<FormId>) -> Self {
        self.source_form = Some(form_id.into());
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.lookup = Some(LookupRef {
            source_id: Some(source_id.into()),
        });
        self
    }

    pub fn explicit_source_id(&self) -> Option<&str> {
        self.lookup.as_ref().and_then(|l| l.source_id.as_deref())
    }

    pub fn declaration(&self) -> Option<SourceDeclaration> {
        SourceDeclaration::from_parts(
            self.explicit_source_id(),
            self.source_module.as_ref(),
            self.source_form.as_ref(),
        )
    }

    /// Whether the stored field must be consulted to complete this payload.
    pub(crate) fn is_partial(&self) -> bool {
        !self.complete
    }

    /// Fill attributes absent from the payload with the stored field's values.
    /// Source pointers merge one by one so declaration precedence sees the same
    /// state the stored field has. The parent is left alone; ancestry
    /// resolution does its own fallback.
    pub(crate) fn completed_from(&self, stored: &Field) -> Self {
        let mut out = self.clone();
        if out.explicit_source_id().is_none() {
            out.lookup = stored.lookup.source_id.as_ref().map(|id| LookupRef {
                source_id: Some(id.clone()),
            });
        }
        if out.source_module.is_none() {
            out.source_module = stored.lookup.source_module.clone();
        }
        if out.source_form.is_none() {
            out.source_form = stored.lookup.source_form.clone();
        }
        if out.display_field.is_none() {
            out.display_field = stored.lookup.display_field.clone();
        }
        if out.value_field.is_none() {
            out.value_field = stored.lookup.value_field.clone();
        }
        out.multiple = out.multiple.or(Some(stored.lookup.multiple));
        out.searchable = out.searchable.or(Some(stored.lookup.searchable));
        if out.filters.is_none() {
            out.filters = Some(stored.lookup.filters.clone());
        }
        out.complete = true;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_payload_deserializes() {
        let write: FieldWrite = serde_json::from_str(r#"{"id": "fld_1", "type": "lookup"}"#).unwrap();
        assert_eq!(write.id, FieldId::new("fld_1"));
        assert!(write.field_type.is_lookup());
        assert!(write.declaration().is_none());
        assert!(write.is_partial());
    }

    #[test]
    fn nested_lookup_source_id_deserializes() {
        let write: FieldWrite = serde_json::from_str(
            r#"{"id": "fld_1", "type": "lookup", "lookup": {"sourceId": "countries"}, "sourceModule": "m_1", "multiple": true}"#,
        )
        .unwrap();
        assert_eq!(write.explicit_source_id(), Some("countries"));
        assert_eq!(write.declaration(), Some(SourceDeclaration::Explicit("countries".into())));
        assert_eq!(write.multiple, Some(true));
    }

    #[test]
    fn patch_payload_omits_cleared_pointers() {
        let patch = FieldPatch {
            source_module: Some(None),
            source_form: Some(Some(FormId::new("f_9"))),
            ..FieldPatch::default()
        };
        let write = FieldWrite::from_patch(&FieldId::new("fld_1"), FieldType::Lookup, &patch);
        assert_eq!(write.source_module, None);
        assert_eq!(write.declaration(), Some(SourceDeclaration::Form(FormId::new("f_9"))));
        assert_eq!(write.section_id, None);
    }
}
