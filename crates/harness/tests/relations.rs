use std::thread;

use formkit_core::{
    FieldId, FieldParent, FieldPatch, FieldType, FormId, LookupConfig, ModuleId, NewSection,
    RelationId, SourceId, SourceKind,
};
use formkit_engine::{FieldWrite, LookupError, relation};
use formkit_harness::{Fixture, LogCapture, form_lookup, module_lookup, named_lookup};
use formkit_storage::{EntityStore, SqliteStore};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Module m_1 holding form f_1 with section sec_1, plus a source module mod_42.
fn hierarchy() -> Result<Fixture, Box<dyn std::error::Error>> {
    let mut fx = Fixture::new()?;
    fx.module("m_1", "Operations")?;
    fx.form("f_1", Some("m_1"), "Work orders", "sec_1")?;
    fx.module("mod_42", "Customers")?;
    Ok(fx)
}

fn in_section(id: &str) -> FieldParent {
    FieldParent::Section(id.into())
}

// ============================================================================
// Relation upsert
// ============================================================================

#[test]
fn repeated_upsert_leaves_one_relation_with_latest_config() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;

    let mut write = FieldWrite::from_field(&field);
    write.display_field = Some("name".into());
    write.multiple = Some(true);
    let relation = fx.engine.upsert_relation(&write).ok_or("hook returned nothing")?;

    let relations = fx.engine.relations_for_field(&field.id)?;
    assert_eq!(relations.len(), 1);
    assert_eq!(relation.id.as_str(), "lfr_module_mod_42_fld_x");
    assert_eq!(relations[0].id, relation.id);
    assert_eq!(relations[0].display_field.as_deref(), Some("name"));
    assert!(relations[0].multiple);
    assert!(relations[0].searchable);
    assert_eq!(relations[0].form_id, FormId::new("f_1"));
    assert_eq!(relations[0].module_id, ModuleId::new("m_1"));
    assert_eq!(relations[0].source_id.as_str(), "module_mod_42");
    Ok(())
}

#[test]
fn relation_keeps_created_at_across_upserts() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;
    let first = fx.engine.relations_for_field(&field.id)?.remove(0);

    let second = fx
        .engine
        .try_upsert_relation(&FieldWrite::from_field(&field))?;
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    Ok(())
}

#[test]
fn source_id_resolution_is_deterministic() -> TestResult {
    let fx = hierarchy()?;
    let write = FieldWrite::new("fld_x", FieldType::Lookup).with_source_module("mod_42");
    let a = fx.engine.resolve_source_id(&write)?;
    let b = fx.engine.resolve_source_id(&write)?;
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "module_mod_42");

    let by_form = FieldWrite::new("fld_y", FieldType::Lookup).with_source_form("f_1");
    assert_eq!(fx.engine.resolve_source_id(&by_form)?.as_str(), "form_f_1");

    let explicit = by_form.clone().with_source_id("priorities");
    assert_eq!(fx.engine.resolve_source_id(&explicit)?.as_str(), "priorities");
    Ok(())
}

#[test]
fn missing_declaration_is_reported() -> TestResult {
    let fx = hierarchy()?;
    let write = FieldWrite::new("fld_x", FieldType::Lookup);
    let err = fx.engine.resolve_source_id(&write).err().ok_or("expected an error")?;
    assert!(matches!(err, LookupError::MissingSource { .. }));
    Ok(())
}

#[test]
fn explicit_ids_in_reserved_namespace_are_rejected() -> TestResult {
    let mut fx = hierarchy()?;
    let write = FieldWrite::new("fld_x", FieldType::Lookup).with_source_id("module_mod_42");
    let err = fx.engine.resolve_source_id(&write).err().ok_or("expected an error")?;
    assert!(matches!(err, LookupError::ReservedSourceId { .. }));

    // The field itself is still created; only the bookkeeping is skipped.
    let field = fx.lookup_field("fld_x", in_section("sec_1"), named_lookup("form_f_1"))?;
    assert!(fx.engine.find_field(&field.id)?.is_some());
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    Ok(())
}

// ============================================================================
// Ancestry
// ============================================================================

#[test]
fn ancestry_falls_back_to_stored_field() -> TestResult {
    let mut fx = hierarchy()?;
    fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;

    let bare: FieldWrite = serde_json::from_value(serde_json::json!({"id": "fld_x", "type": "lookup"}))?;
    let ancestry = fx.engine.resolve_ancestry(&bare)?;
    assert_eq!(ancestry.form_id, FormId::new("f_1"));
    assert_eq!(ancestry.module_id, ModuleId::new("m_1"));

    // The same bare payload is enough for the hook as a whole.
    let relation = fx.engine.try_upsert_relation(&bare)?;
    assert_eq!(relation.id.as_str(), "lfr_module_mod_42_fld_x");
    Ok(())
}

#[test]
fn ancestry_walks_through_subforms() -> TestResult {
    let mut fx = hierarchy()?;
    fx.subform("sub_1", "sec_1", "Line items")?;
    let field = fx.lookup_field(
        "fld_part",
        FieldParent::Subform("sub_1".into()),
        module_lookup("mod_42"),
    )?;

    let relations = fx.engine.relations_for_field(&field.id)?;
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].form_id, FormId::new("f_1"));
    assert_eq!(relations[0].module_id, ModuleId::new("m_1"));
    Ok(())
}

#[test]
fn field_on_unfiled_form_gets_no_relation() -> TestResult {
    let mut fx = hierarchy()?;
    fx.form("f_loose", None, "Scratch", "sec_loose")?;
    let field = fx.lookup_field("fld_x", in_section("sec_loose"), module_lookup("mod_42"))?;

    let err = fx
        .engine
        .try_upsert_relation(&FieldWrite::from_field(&field))
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, LookupError::AncestryNotFound { .. }));
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    Ok(())
}

#[test]
fn missing_payload_section_is_an_ancestry_error() -> TestResult {
    let mut fx = hierarchy()?;
    let write = FieldWrite::new("fld_x", FieldType::Lookup)
        .with_source_module("mod_42")
        .with_section("sec_gone");

    let err = fx.engine.try_upsert_relation(&write).err().ok_or("expected an error")?;
    assert!(matches!(err, LookupError::AncestryNotFound { .. }));
    assert!(fx.engine.relations_for_field(&FieldId::new("fld_x"))?.is_empty());
    Ok(())
}

#[test]
fn missing_payload_subform_is_an_ancestry_error() -> TestResult {
    let mut fx = hierarchy()?;
    let write: FieldWrite = serde_json::from_value(serde_json::json!({
        "id": "fld_x",
        "type": "lookup",
        "subformId": "sub_gone",
        "sourceModule": "mod_42",
    }))?;

    let err = fx.engine.try_upsert_relation(&write).err().ok_or("expected an error")?;
    assert!(matches!(err, LookupError::AncestryNotFound { .. }));
    assert!(fx.engine.relations_for_field(&FieldId::new("fld_x"))?.is_empty());
    Ok(())
}

#[test]
fn subform_without_its_section_is_an_ancestry_error() -> TestResult {
    let mut fx = hierarchy()?;
    fx.engine
        .create_section(NewSection::new("f_1", "Extra").with_id("sec_2"))?;
    fx.subform("sub_2", "sec_2", "Line items")?;
    // Orphan the subform; the cascade would otherwise remove it too.
    fx.engine.store().conn().execute_batch(
        "PRAGMA foreign_keys = OFF; DELETE FROM sections WHERE id = 'sec_2'; PRAGMA foreign_keys = ON;",
    )?;

    let field = fx.lookup_field(
        "fld_part",
        FieldParent::Subform("sub_2".into()),
        module_lookup("mod_42"),
    )?;
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());

    let err = fx
        .engine
        .try_upsert_relation(&FieldWrite::from_field(&field))
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, LookupError::AncestryNotFound { .. }));
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    Ok(())
}

// ============================================================================
// Non-fatal bookkeeping
// ============================================================================

#[test]
fn missing_source_form_does_not_block_field_creation() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), form_lookup("f_missing"))?;

    assert!(fx.engine.find_field(&field.id)?.is_some());
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    assert!(fx.engine.find_lookup_source(&SourceId::for_form(&FormId::new("f_missing")))?.is_none());
    assert!(fx.engine.lookup_sources()?.is_empty());

    let err = fx
        .engine
        .try_upsert_relation(&FieldWrite::from_field(&field))
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, LookupError::SourceNotFound { .. }));
    Ok(())
}

#[test]
fn non_lookup_fields_are_ignored() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.text_field("fld_name", "sec_1", "Name")?;
    assert!(fx.engine.upsert_relation(&FieldWrite::from_field(&field)).is_none());
    assert!(fx.engine.lookup_sources()?.is_empty());
    Ok(())
}

// ============================================================================
// Sources
// ============================================================================

#[test]
fn module_source_is_materialized_from_the_module() -> TestResult {
    let mut fx = hierarchy()?;
    fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;

    let source = fx
        .engine
        .find_lookup_source(&SourceId::for_module(&ModuleId::new("mod_42")))?
        .ok_or("source not stored")?;
    assert_eq!(source.kind, SourceKind::Module);
    assert_eq!(source.name, "Customers");
    assert_eq!(source.source_module_id, Some(ModuleId::new("mod_42")));
    assert!(source.active);
    Ok(())
}

#[test]
fn explicit_static_source_is_materialized() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_prio", in_section("sec_1"), named_lookup("priorities"))?;

    let relations = fx.engine.relations_for_field(&field.id)?;
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].id.as_str(), "lfr_priorities_fld_prio");

    let source = fx
        .engine
        .find_lookup_source(&SourceId::from_stored("priorities"))?
        .ok_or("source not stored")?;
    assert_eq!(source.kind, SourceKind::Static);
    assert_eq!(source.source_module_id, None);
    assert_eq!(source.source_form_id, None);
    Ok(())
}

#[test]
fn ensure_source_returns_existing_row() -> TestResult {
    let mut fx = hierarchy()?;
    let id = SourceId::for_form(&FormId::new("f_1"));
    let first = fx.engine.ensure_source(&id)?;
    let again = fx.engine.ensure_source(&id)?;
    assert_eq!(first, again);
    assert_eq!(fx.engine.lookup_sources()?.len(), 1);
    Ok(())
}

#[test]
fn unknown_named_source_is_not_found() -> TestResult {
    let mut fx = hierarchy()?;
    let err = fx
        .engine
        .ensure_source(&SourceId::from_stored("planets"))
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, LookupError::SourceNotFound { .. }));
    Ok(())
}

// ============================================================================
// Field updates
// ============================================================================

#[test]
fn partial_update_refreshes_relation_config() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;

    let patch = FieldPatch {
        display_field: Some(Some("company".into())),
        searchable: Some(false),
        ..FieldPatch::default()
    };
    let updated = fx.engine.update_field(&field.id, patch)?;
    assert_eq!(updated.lookup.display_field.as_deref(), Some("company"));

    let relations = fx.engine.relations_for_field(&field.id)?;
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].source_id.as_str(), "module_mod_42");
    assert_eq!(relations[0].display_field.as_deref(), Some("company"));
    assert!(!relations[0].searchable);
    Ok(())
}

#[test]
fn repointing_a_field_replaces_its_relation() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;

    let patch = FieldPatch {
        source_module: Some(None),
        source_form: Some(Some("f_1".into())),
        ..FieldPatch::default()
    };
    fx.engine.update_field(&field.id, patch)?;

    let relations = fx.engine.relations_for_field(&field.id)?;
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].id.as_str(), "lfr_form_f_1_fld_x");
    assert!(
        fx.engine
            .find_relation(&RelationId::from_stored("lfr_module_mod_42_fld_x"))?
            .is_none()
    );
    Ok(())
}

#[test]
fn field_converted_away_from_lookup_loses_its_relation() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;
    assert_eq!(fx.engine.relations_for_field(&field.id)?.len(), 1);

    let patch = FieldPatch {
        field_type: Some(FieldType::Text),
        ..FieldPatch::default()
    };
    fx.engine.update_field(&field.id, patch)?;
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    assert!(
        fx.engine
            .find_relation(&RelationId::from_stored("lfr_module_mod_42_fld_x"))?
            .is_none()
    );
    Ok(())
}

#[test]
fn clearing_the_last_source_pointer_drops_the_relation() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;

    let patch = FieldPatch {
        source_module: Some(None),
        ..FieldPatch::default()
    };
    let updated = fx.engine.update_field(&field.id, patch)?;
    assert!(updated.lookup.declaration().is_none());
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    Ok(())
}

#[test]
fn repointing_at_a_missing_source_drops_the_stale_relation() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;

    let patch = FieldPatch {
        source_module: Some(None),
        source_form: Some(Some("f_missing".into())),
        ..FieldPatch::default()
    };
    let updated = fx.engine.update_field(&field.id, patch)?;
    assert_eq!(updated.lookup.source_form, Some(FormId::new("f_missing")));
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    Ok(())
}

#[test]
fn skipped_bookkeeping_logs_the_resolved_source() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), form_lookup("f_missing"))?;

    let logs = LogCapture::start();
    // The patch carries no source pointer; the source comes from the stored field.
    let patch = FieldPatch {
        label: Some("Customer".into()),
        ..FieldPatch::default()
    };
    fx.engine.update_field(&field.id, patch)?;

    let warnings = logs.lines_at("WARN");
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("field_id=fld_x"), "{}", warnings[0]);
    assert!(warnings[0].contains("source_id=form_f_missing"), "{}", warnings[0]);
    Ok(())
}

#[test]
fn field_converted_to_lookup_gains_relation() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.text_field("fld_x", "sec_1", "Customer")?;
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());

    let patch = FieldPatch {
        field_type: Some(FieldType::Lookup),
        source_module: Some(Some("mod_42".into())),
        ..FieldPatch::default()
    };
    fx.engine.update_field(&field.id, patch)?;
    assert_eq!(fx.engine.relations_for_field(&field.id)?.len(), 1);
    Ok(())
}

#[test]
fn updating_missing_field_fails() -> TestResult {
    let mut fx = hierarchy()?;
    let patch = FieldPatch {
        label: Some("Renamed".into()),
        ..FieldPatch::default()
    };
    assert!(fx.engine.update_field(&FieldId::new("fld_nope"), patch).is_err());
    Ok(())
}

// ============================================================================
// Cascades
// ============================================================================

#[test]
fn deleting_field_drops_its_relation() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;
    let source_id = SourceId::for_module(&ModuleId::new("mod_42"));
    assert_eq!(fx.engine.relations_for_source(&source_id)?.len(), 1);

    assert!(fx.engine.delete_field(&field.id)?);
    assert!(fx.engine.relations_for_source(&source_id)?.is_empty());
    assert!(fx.engine.find_lookup_source(&source_id)?.is_some());
    Ok(())
}

#[test]
fn deleting_source_drops_its_relations() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;
    let source_id = SourceId::for_module(&ModuleId::new("mod_42"));

    assert!(fx.engine.delete_lookup_source(&source_id)?);
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    assert!(fx.engine.find_field(&field.id)?.is_some());
    Ok(())
}

#[test]
fn deleting_backing_module_drops_source_and_relations() -> TestResult {
    let mut fx = hierarchy()?;
    let field = fx.lookup_field("fld_x", in_section("sec_1"), module_lookup("mod_42"))?;

    assert!(fx.engine.delete_module(&ModuleId::new("mod_42"))?);
    assert!(fx.engine.lookup_sources()?.is_empty());
    assert!(fx.engine.relations_for_field(&field.id)?.is_empty());
    Ok(())
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_upserts_converge_on_one_row() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("forms.db");
    let path = path.to_str().ok_or("non-utf8 temp path")?.to_string();

    let mut fx = Fixture::with_store(SqliteStore::open(&path)?);
    fx.module("m_1", "Operations")?;
    fx.form("f_1", Some("m_1"), "Work orders", "sec_1")?;
    fx.module("mod_42", "Customers")?;
    fx.engine.create_field(
        formkit_core::NewField::new(in_section("sec_1"), FieldType::Lookup, "Customer")
            .with_id("fld_x")
            .with_lookup(LookupConfig::default()),
    )?;

    let workers: Vec<_> = (0..2)
        .map(|worker| {
            let path = path.clone();
            thread::spawn(move || -> Result<(), String> {
                let mut store = SqliteStore::open(&path).map_err(|e| e.to_string())?;
                let write = FieldWrite::new("fld_x", FieldType::Lookup)
                    .with_source_module("mod_42")
                    .with_section("sec_1");
                for _ in 0..20 {
                    relation::try_upsert_relation(&mut store, &write)
                        .map_err(|e| format!("worker {worker}: {e}"))?;
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().map_err(|_| "worker panicked")??;
    }

    let store = fx.engine.store();
    let relations = store.list_relations_for_field(&FieldId::new("fld_x"))?;
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].id.as_str(), "lfr_module_mod_42_fld_x");
    assert_eq!(store.list_lookup_sources()?.len(), 1);
    Ok(())
}
