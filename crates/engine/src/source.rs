//! Canonical lookup-source identity: derive a stable `SourceId` from a field's
//! declaration and make sure a matching `LookupSource` row exists.

use chrono::Utc;
use tracing::debug;

use formkit_core::{
    CoreError, LookupSource, SourceDeclaration, SourceId, SourceKind, SourceTarget, static_sources,
};
use formkit_storage::EntityStore;

use crate::error::LookupError;
use crate::payload::FieldWrite;

/// The field's source declaration, resolved by precedence (explicit id, then
/// `sourceModule`, then `sourceForm`).
pub fn declaration(field: &FieldWrite) -> Result<SourceDeclaration, LookupError> {
    field.declaration().ok_or_else(|| LookupError::MissingSource {
        field_id: field.id.to_string(),
    })
}

pub fn resolve_source_id(field: &FieldWrite) -> Result<SourceId, LookupError> {
    declaration(field)?
        .source_id()
        .map_err(|err| match err {
            reserved @ CoreError::ReservedSourceId(_) => LookupError::ReservedSourceId {
                field_id: field.id.to_string(),
                source: reserved,
            },
            _ => LookupError::MissingSource {
                field_id: field.id.to_string(),
            },
        })
}

/// Return the stored source for `source_id`, materializing it from the backing
/// module, form or static list when absent. Concurrent callers converge on one
/// row; the last writer's name and timestamps win.
pub fn ensure_source<S: EntityStore>(
    store: &mut S,
    source_id: &SourceId,
) -> Result<LookupSource, LookupError> {
    if let Some(existing) = store.find_lookup_source(source_id)? {
        return Ok(existing);
    }

    let now = Utc::now();
    let source = match source_id.target() {
        SourceTarget::Module(module_id) => {
            let module = store.find_module(&module_id)?.ok_or_else(|| LookupError::SourceNotFound {
                source_id: source_id.to_string(),
                reason: format!("module {module_id} does not exist"),
            })?;
            LookupSource {
                id: source_id.clone(),
                name: module.name,
                kind: SourceKind::Module,
                description: module.description,
                source_module_id: Some(module.id),
                source_form_id: None,
                active: true,
                created_at: now,
                updated_at: now,
            }
        }
        SourceTarget::Form(form_id) => {
            let form = store.find_form(&form_id)?.ok_or_else(|| LookupError::SourceNotFound {
                source_id: source_id.to_string(),
                reason: format!("form {form_id} does not exist"),
            })?;
            LookupSource {
                id: source_id.clone(),
                name: form.name,
                kind: SourceKind::Form,
                description: form.description,
                source_module_id: None,
                source_form_id: Some(form.id),
                active: true,
                created_at: now,
                updated_at: now,
            }
        }
        SourceTarget::Named(name) => {
            let list = static_sources::find(&name).ok_or_else(|| LookupError::SourceNotFound {
                source_id: source_id.to_string(),
                reason: "no stored or built-in source with this id".into(),
            })?;
            LookupSource {
                id: source_id.clone(),
                name: list.name.to_string(),
                kind: SourceKind::Static,
                description: Some(list.description.to_string()),
                source_module_id: None,
                source_form_id: None,
                active: true,
                created_at: now,
                updated_at: now,
            }
        }
    };

    let stored = store.upsert_lookup_source(&source)?;
    debug!(source_id = %stored.id, kind = stored.kind.as_str(), "materialized lookup source");
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use formkit_core::{FieldId, FieldType};

    #[test]
    fn module_declaration_resolves_deterministically() {
        let field = FieldWrite::new("fld_1", FieldType::Lookup).with_source_module("mod_42");
        let first = resolve_source_id(&field).unwrap();
        let second = resolve_source_id(&field).unwrap();
        assert_eq!(first.as_str(), "module_mod_42");
        assert_eq!(first, second);
    }

    #[test]
    fn form_declaration_resolves() {
        let field = FieldWrite::new("fld_1", FieldType::Lookup).with_source_form("f_1");
        assert_eq!(resolve_source_id(&field).unwrap().as_str(), "form_f_1");
    }

    #[test]
    fn explicit_id_wins_over_legacy_pointers() {
        let field = FieldWrite::new("fld_1", FieldType::Lookup)
            .with_source_module("m_1")
            .with_source_id("countries");
        assert_eq!(resolve_source_id(&field).unwrap().as_str(), "countries");
    }

    #[test]
    fn missing_declaration_fails() {
        let field = FieldWrite::new(FieldId::new("fld_1"), FieldType::Lookup);
        assert!(matches!(
            resolve_source_id(&field),
            Err(LookupError::MissingSource { .. })
        ));
    }

    #[test]
    fn reserved_explicit_id_fails() {
        let field = FieldWrite::new("fld_1", FieldType::Lookup).with_source_id("form_f_1");
        assert!(matches!(
            resolve_source_id(&field),
            Err(LookupError::ReservedSourceId { .. })
        ));
    }
}
