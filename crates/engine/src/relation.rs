//! Lookup-field relation bookkeeping.
//!
//! Runs after every lookup field write and at submission time. Each relation
//! is keyed by `lfr_<sourceId>_<fieldId>`, so repeated or concurrent runs for
//! the same field converge on one row. Failures are logged and swallowed: the
//! field write that triggered the hook has already happened and stands.

use chrono::Utc;
use tracing::{debug, error, warn};

use formkit_core::{LookupFieldRelation, RelationId};
use formkit_storage::EntityStore;

use crate::ancestry::resolve_ancestry;
use crate::error::LookupError;
use crate::payload::FieldWrite;
use crate::source::{ensure_source, resolve_source_id};

/// Create or refresh the relation for `field`. Returns `None` for non-lookup
/// fields and whenever bookkeeping fails; failures only reach the log.
pub fn upsert_relation<S: EntityStore>(store: &mut S, field: &FieldWrite) -> Option<LookupFieldRelation> {
    if !field.field_type.is_lookup() {
        return None;
    }
    let field = match completed(&*store, field) {
        Ok(field) => field,
        Err(err) => {
            error!(field_id = %field.id, error = %err, "failed to read stored field for lookup relation");
            return None;
        }
    };

    match try_upsert_relation(store, &field) {
        Ok(relation) => {
            debug!(
                field_id = %relation.field_id,
                source_id = %relation.source_id,
                relation_id = %relation.id,
                "lookup relation upserted"
            );
            Some(relation)
        }
        Err(LookupError::Storage(err)) => {
            error!(field_id = %field.id, error = %err, "lookup relation bookkeeping failed in storage");
            None
        }
        Err(err) => {
            let source_id = resolve_source_id(&field)
                .map(|id| id.to_string())
                .unwrap_or_else(|_| "none".into());
            warn!(
                field_id = %field.id,
                source_id = %source_id,
                error = %err,
                "lookup relation bookkeeping skipped"
            );
            None
        }
    }
}

/// Fallible core of [`upsert_relation`], exposed so callers that need the
/// failure reason can get it.
pub fn try_upsert_relation<S: EntityStore>(
    store: &mut S,
    field: &FieldWrite,
) -> Result<LookupFieldRelation, LookupError> {
    let field = completed(&*store, field)?;
    let source_id = resolve_source_id(&field)?;
    let ancestry = resolve_ancestry(&*store, &field)?;

    store.atomically(|store| {
        let source = ensure_source(store, &source_id)?;
        let now = Utc::now();
        let relation = LookupFieldRelation {
            id: RelationId::for_pair(&source.id, &field.id),
            source_id: source.id,
            field_id: field.id.clone(),
            form_id: ancestry.form_id,
            module_id: ancestry.module_id,
            display_field: field.display_field.clone(),
            value_field: field.value_field.clone(),
            multiple: field.multiple.unwrap_or(false),
            searchable: field.searchable.unwrap_or(true),
            filters: field.filters.clone().unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        let stored = store.upsert_lookup_field_relation(&relation)?;
        let pruned = store.delete_relations_for_field_except(&field.id, &stored.id)?;
        if pruned > 0 {
            debug!(field_id = %field.id, pruned, "dropped relations to previous sources");
        }
        Ok(stored)
    })
}

/// Fill a partial payload from the stored field. Unstored fields pass through.
fn completed<S: EntityStore>(store: &S, field: &FieldWrite) -> Result<FieldWrite, LookupError> {
    if !field.is_partial() {
        return Ok(field.clone());
    }
    Ok(match store.find_field(&field.id)? {
        Some(stored) => field.completed_from(&stored),
        None => field.clone(),
    })
}
