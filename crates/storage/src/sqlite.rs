use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use formkit_core::{
    ids::*,
    lookup::{LookupFieldRelation, LookupSource, RelationId, SourceId, SourceKind},
    model::{Field, FieldParent, FieldPatch, FieldType, Filters, Form, LookupConfig, Module, Section, Subform},
    record::{CanonicalData, FormRecord},
};

use crate::error::StorageError;
use crate::traits::EntityStore;

fn to_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str, label: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("invalid {label} timestamp {s:?}: {e}")))
}

fn to_json<T: Serialize + ?Sized>(value: &T, label: &str) -> Result<String, StorageError> {
    serde_json::to_string(value)
        .map_err(|e| StorageError::Serialization(format!("encode {label}: {e}")))
}

fn from_json<T: DeserializeOwned>(text: &str, label: &str) -> Result<T, StorageError> {
    serde_json::from_str(text)
        .map_err(|e| StorageError::Serialization(format!("decode {label}: {e}")))
}

fn opt_json<T: DeserializeOwned>(text: Option<String>, label: &str) -> Result<Option<T>, StorageError> {
    text.map(|t| from_json(&t, label)).transpose()
}

/// Map a unique/foreign-key failure to `ConstraintViolation`, everything else to `Sqlite`.
fn constraint(err: rusqlite::Error, what: impl FnOnce() -> String) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            StorageError::ConstraintViolation(what())
        }
        other => StorageError::Sqlite(other),
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn query_all<R, T, P, F, C>(&self, sql: &str, params: P, read: F, convert: C) -> Result<Vec<T>, StorageError>
    where
        P: rusqlite::Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<R>,
        C: FnMut(R) -> Result<T, StorageError>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt.query_map(params, read)?.collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(convert).collect()
    }

    fn query_one<R, T, P, F, C>(&self, sql: &str, params: P, read: F, convert: C) -> Result<Option<T>, StorageError>
    where
        P: rusqlite::Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<R>,
        C: FnOnce(R) -> Result<T, StorageError>,
    {
        let raw = self.conn.query_row(sql, params, read).optional()?;
        raw.map(convert).transpose()
    }

    fn write_field(&self, sql: &str, field: &Field) -> Result<usize, StorageError> {
        let (section_id, subform_id) = match &field.parent {
            FieldParent::Section(id) => (Some(id.as_str()), None),
            FieldParent::Subform(id) => (None, Some(id.as_str())),
        };
        let options = field.options.as_ref().map(|v| to_json(v, "options")).transpose()?;
        let validation = field.validation.as_ref().map(|v| to_json(v, "validation")).transpose()?;
        let filters = to_json(&field.lookup.filters, "filters")?;
        self.conn
            .execute(
                sql,
                rusqlite::params![
                    field.id.as_str(),
                    section_id,
                    subform_id,
                    field.field_type.as_str(),
                    field.label,
                    field.description,
                    field.placeholder,
                    options,
                    validation,
                    field.order,
                    field.lookup.source_id,
                    field.lookup.source_module.as_ref().map(|m| m.as_str()),
                    field.lookup.source_form.as_ref().map(|f| f.as_str()),
                    field.lookup.display_field,
                    field.lookup.value_field,
                    field.lookup.multiple,
                    field.lookup.searchable,
                    filters,
                    to_ts(&field.created_at),
                    to_ts(&field.updated_at),
                ],
            )
            .map_err(|e| constraint(e, || format!("field {}", field.id)))
    }
}

// ============================================================================
// Row decoding
// ============================================================================

const MODULE_COLUMNS: &str = "id, name, description, parent_id, created_at, updated_at";

fn read_module(row: &Row<'_>) -> rusqlite::Result<(String, String, Option<String>, Option<String>, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn into_module(
    (id, name, description, parent_id, created_at, updated_at): (String, String, Option<String>, Option<String>, String, String),
) -> Result<Module, StorageError> {
    Ok(Module {
        id: ModuleId::new(id),
        name,
        description,
        parent_id: parent_id.map(ModuleId::new),
        created_at: parse_ts(&created_at, "created_at")?,
        updated_at: parse_ts(&updated_at, "updated_at")?,
    })
}

const FORM_COLUMNS: &str = "id, module_id, name, description, is_published, created_at, updated_at";

struct RawForm {
    id: String,
    module_id: Option<String>,
    name: String,
    description: Option<String>,
    is_published: bool,
    created_at: String,
    updated_at: String,
}

fn read_form(row: &Row<'_>) -> rusqlite::Result<RawForm> {
    Ok(RawForm {
        id: row.get(0)?,
        module_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_published: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn into_form(raw: RawForm) -> Result<Form, StorageError> {
    Ok(Form {
        id: FormId::new(raw.id),
        module_id: raw.module_id.map(ModuleId::new),
        name: raw.name,
        description: raw.description,
        is_published: raw.is_published,
        created_at: parse_ts(&raw.created_at, "created_at")?,
        updated_at: parse_ts(&raw.updated_at, "updated_at")?,
    })
}

const SECTION_COLUMNS: &str = "id, form_id, title, description, position";

fn read_section(row: &Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: SectionId::new(row.get::<_, String>(0)?),
        form_id: FormId::new(row.get::<_, String>(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        order: row.get(4)?,
    })
}

const SUBFORM_COLUMNS: &str = "id, section_id, name, description, position";

fn read_subform(row: &Row<'_>) -> rusqlite::Result<Subform> {
    Ok(Subform {
        id: SubformId::new(row.get::<_, String>(0)?),
        section_id: SectionId::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
        order: row.get(4)?,
    })
}

const FIELD_COLUMNS: &str = "id, section_id, subform_id, field_type, label, description, placeholder, options, validation, position, lookup_source_id, source_module, source_form, display_field, value_field, multiple, searchable, filters, created_at, updated_at";

struct RawField {
    id: String,
    section_id: Option<String>,
    subform_id: Option<String>,
    field_type: String,
    label: String,
    description: Option<String>,
    placeholder: Option<String>,
    options: Option<String>,
    validation: Option<String>,
    position: i64,
    lookup_source_id: Option<String>,
    source_module: Option<String>,
    source_form: Option<String>,
    display_field: Option<String>,
    value_field: Option<String>,
    multiple: bool,
    searchable: bool,
    filters: String,
    created_at: String,
    updated_at: String,
}

fn read_field(row: &Row<'_>) -> rusqlite::Result<RawField> {
    Ok(RawField {
        id: row.get(0)?,
        section_id: row.get(1)?,
        subform_id: row.get(2)?,
        field_type: row.get(3)?,
        label: row.get(4)?,
        description: row.get(5)?,
        placeholder: row.get(6)?,
        options: row.get(7)?,
        validation: row.get(8)?,
        position: row.get(9)?,
        lookup_source_id: row.get(10)?,
        source_module: row.get(11)?,
        source_form: row.get(12)?,
        display_field: row.get(13)?,
        value_field: row.get(14)?,
        multiple: row.get(15)?,
        searchable: row.get(16)?,
        filters: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

fn into_field(raw: RawField) -> Result<Field, StorageError> {
    let parent = match (raw.section_id, raw.subform_id) {
        (Some(section), None) => FieldParent::Section(SectionId::new(section)),
        (None, Some(subform)) => FieldParent::Subform(SubformId::new(subform)),
        _ => {
            return Err(StorageError::Serialization(format!(
                "field {} must have exactly one parent",
                raw.id
            )));
        }
    };
    Ok(Field {
        parent,
        field_type: FieldType::parse(&raw.field_type),
        label: raw.label,
        description: raw.description,
        placeholder: raw.placeholder,
        options: opt_json(raw.options, "options")?,
        validation: opt_json(raw.validation, "validation")?,
        order: raw.position,
        lookup: LookupConfig {
            source_id: raw.lookup_source_id,
            source_module: raw.source_module.map(ModuleId::new),
            source_form: raw.source_form.map(FormId::new),
            display_field: raw.display_field,
            value_field: raw.value_field,
            multiple: raw.multiple,
            searchable: raw.searchable,
            filters: from_json(&raw.filters, "filters")?,
        },
        created_at: parse_ts(&raw.created_at, "created_at")?,
        updated_at: parse_ts(&raw.updated_at, "updated_at")?,
        id: FieldId::new(raw.id),
    })
}

const SOURCE_COLUMNS: &str = "id, name, source_type, description, source_module_id, source_form_id, active, created_at, updated_at";

struct RawSource {
    id: String,
    name: String,
    source_type: String,
    description: Option<String>,
    source_module_id: Option<String>,
    source_form_id: Option<String>,
    active: bool,
    created_at: String,
    updated_at: String,
}

fn read_source(row: &Row<'_>) -> rusqlite::Result<RawSource> {
    Ok(RawSource {
        id: row.get(0)?,
        name: row.get(1)?,
        source_type: row.get(2)?,
        description: row.get(3)?,
        source_module_id: row.get(4)?,
        source_form_id: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn into_source(raw: RawSource) -> Result<LookupSource, StorageError> {
    Ok(LookupSource {
        id: SourceId::from_stored(raw.id),
        name: raw.name,
        kind: SourceKind::parse(&raw.source_type)?,
        description: raw.description,
        source_module_id: raw.source_module_id.map(ModuleId::new),
        source_form_id: raw.source_form_id.map(FormId::new),
        active: raw.active,
        created_at: parse_ts(&raw.created_at, "created_at")?,
        updated_at: parse_ts(&raw.updated_at, "updated_at")?,
    })
}

const RELATION_COLUMNS: &str = "id, lookup_source_id, field_id, form_id, module_id, display_field, value_field, multiple, searchable, filters, created_at, updated_at";

struct RawRelation {
    id: String,
    source_id: String,
    field_id: String,
    form_id: String,
    module_id: String,
    display_field: Option<String>,
    value_field: Option<String>,
    multiple: bool,
    searchable: bool,
    filters: String,
    created_at: String,
    updated_at: String,
}

fn read_relation(row: &Row<'_>) -> rusqlite::Result<RawRelation> {
    Ok(RawRelation {
        id: row.get(0)?,
        source_id: row.get(1)?,
        field_id: row.get(2)?,
        form_id: row.get(3)?,
        module_id: row.get(4)?,
        display_field: row.get(5)?,
        value_field: row.get(6)?,
        multiple: row.get(7)?,
        searchable: row.get(8)?,
        filters: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn into_relation(raw: RawRelation) -> Result<LookupFieldRelation, StorageError> {
    let filters: Filters = from_json(&raw.filters, "filters")?;
    Ok(LookupFieldRelation {
        id: RelationId::from_stored(raw.id),
        source_id: SourceId::from_stored(raw.source_id),
        field_id: FieldId::new(raw.field_id),
        form_id: FormId::new(raw.form_id),
        module_id: ModuleId::new(raw.module_id),
        display_field: raw.display_field,
        value_field: raw.value_field,
        multiple: raw.multiple,
        searchable: raw.searchable,
        filters,
        created_at: parse_ts(&raw.created_at, "created_at")?,
        updated_at: parse_ts(&raw.updated_at, "updated_at")?,
    })
}

const RECORD_COLUMNS: &str = "id, form_id, record_data, submitted_by, submitted_at";

fn read_record(row: &Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_record(
    (id, form_id, record_data, submitted_by, submitted_at): (String, String, String, Option<String>, String),
) -> Result<FormRecord, StorageError> {
    Ok(FormRecord {
        id: RecordId::new(id),
        form_id: FormId::new(form_id),
        record_data: from_json(&record_data, "record_data")?,
        submitted_by,
        submitted_at: parse_ts(&submitted_at, "submitted_at")?,
    })
}

// ============================================================================
// EntityStore
// ============================================================================

impl EntityStore for SqliteStore {
    fn atomically<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StorageError>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(StorageError::from)?;
        let result = f(self);
        match result {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(e) => {
                    if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                        warn!(error = %rollback, "rollback after failed commit failed");
                    }
                    Err(StorageError::from(e).into())
                }
            },
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn insert_module(&mut self, module: &Module) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO modules (id, name, description, parent_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    module.id.as_str(),
                    module.name,
                    module.description,
                    module.parent_id.as_ref().map(|p| p.as_str()),
                    to_ts(&module.created_at),
                    to_ts(&module.updated_at),
                ],
            )
            .map_err(|e| constraint(e, || format!("module {}", module.id)))?;
        Ok(())
    }

    fn find_module(&self, id: &ModuleId) -> Result<Option<Module>, StorageError> {
        self.query_one(
            &format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            read_module,
            into_module,
        )
    }

    fn list_modules(&self) -> Result<Vec<Module>, StorageError> {
        self.query_all(
            &format!("SELECT {MODULE_COLUMNS} FROM modules ORDER BY name, id"),
            [],
            read_module,
            into_module,
        )
    }

    fn delete_module(&mut self, id: &ModuleId) -> Result<bool, StorageError> {
        let n = self
            .conn
            .execute("DELETE FROM modules WHERE id = ?1", rusqlite::params![id.as_str()])?;
        Ok(n > 0)
    }

    fn insert_form(&mut self, form: &Form) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO forms (id, module_id, name, description, is_published, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    form.id.as_str(),
                    form.module_id.as_ref().map(|m| m.as_str()),
                    form.name,
                    form.description,
                    form.is_published,
                    to_ts(&form.created_at),
                    to_ts(&form.updated_at),
                ],
            )
            .map_err(|e| constraint(e, || format!("form {}", form.id)))?;
        Ok(())
    }

    fn find_form(&self, id: &FormId) -> Result<Option<Form>, StorageError> {
        self.query_one(
            &format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            read_form,
            into_form,
        )
    }

    fn list_forms(&self) -> Result<Vec<Form>, StorageError> {
        self.query_all(
            &format!("SELECT {FORM_COLUMNS} FROM forms ORDER BY name, id"),
            [],
            read_form,
            into_form,
        )
    }

    fn list_forms_under_module(&self, id: &ModuleId) -> Result<Vec<Form>, StorageError> {
        self.query_all(
            &format!(
                "WITH RECURSIVE tree(id) AS (
                     SELECT id FROM modules WHERE id = ?1
                     UNION
                     SELECT m.id FROM modules m JOIN tree t ON m.parent_id = t.id
                 )
                 SELECT {FORM_COLUMNS} FROM forms WHERE module_id IN (SELECT id FROM tree) ORDER BY name, id"
            ),
            rusqlite::params![id.as_str()],
            read_form,
            into_form,
        )
    }

    fn delete_form(&mut self, id: &FormId) -> Result<bool, StorageError> {
        let n = self
            .conn
            .execute("DELETE FROM forms WHERE id = ?1", rusqlite::params![id.as_str()])?;
        Ok(n > 0)
    }

    fn insert_section(&mut self, section: &Section) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO sections (id, form_id, title, description, position) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    section.id.as_str(),
                    section.form_id.as_str(),
                    section.title,
                    section.description,
                    section.order,
                ],
            )
            .map_err(|e| constraint(e, || format!("section {}", section.id)))?;
        Ok(())
    }

    fn find_section(&self, id: &SectionId) -> Result<Option<Section>, StorageError> {
        self.query_one(
            &format!("SELECT {SECTION_COLUMNS} FROM sections WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            read_section,
            Ok,
        )
    }

    fn list_sections(&self, form_id: &FormId) -> Result<Vec<Section>, StorageError> {
        self.query_all(
            &format!("SELECT {SECTION_COLUMNS} FROM sections WHERE form_id = ?1 ORDER BY position, id"),
            rusqlite::params![form_id.as_str()],
            read_section,
            Ok,
        )
    }

    fn insert_subform(&mut self, subform: &Subform) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO subforms (id, section_id, name, description, position) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    subform.id.as_str(),
                    subform.section_id.as_str(),
                    subform.name,
                    subform.description,
                    subform.order,
                ],
            )
            .map_err(|e| constraint(e, || format!("subform {}", subform.id)))?;
        Ok(())
    }

    fn find_subform(&self, id: &SubformId) -> Result<Option<Subform>, StorageError> {
        self.query_one(
            &format!("SELECT {SUBFORM_COLUMNS} FROM subforms WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            read_subform,
            Ok,
        )
    }

    fn list_subforms(&self, section_id: &SectionId) -> Result<Vec<Subform>, StorageError> {
        self.query_all(
            &format!("SELECT {SUBFORM_COLUMNS} FROM subforms WHERE section_id = ?1 ORDER BY position, id"),
            rusqlite::params![section_id.as_str()],
            read_subform,
            Ok,
        )
    }

    fn insert_field(&mut self, field: &Field) -> Result<(), StorageError> {
        self.write_field(
            &format!(
                "INSERT INTO fields ({FIELD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
            ),
            field,
        )?;
        Ok(())
    }

    fn find_field(&self, id: &FieldId) -> Result<Option<Field>, StorageError> {
        self.query_one(
            &format!("SELECT {FIELD_COLUMNS} FROM fields WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            read_field,
            into_field,
        )
    }

    fn update_field(
        &mut self,
        id: &FieldId,
        patch: &FieldPatch,
    ) -> Result<Option<Field>, StorageError> {
        self.atomically(|store| {
            let Some(mut field) = store.find_field(id)? else {
                return Ok(None);
            };
            patch.apply_to(&mut field);
            field.updated_at = Utc::now();
            store.write_field(
                "UPDATE fields SET section_id = ?2, subform_id = ?3, field_type = ?4, label = ?5, description = ?6,
                     placeholder = ?7, options = ?8, validation = ?9, position = ?10, lookup_source_id = ?11,
                     source_module = ?12, source_form = ?13, display_field = ?14, value_field = ?15,
                     multiple = ?16, searchable = ?17, filters = ?18, created_at = ?19, updated_at = ?20
                 WHERE id = ?1",
                &field,
            )?;
            Ok(Some(field))
        })
    }

    fn delete_field(&mut self, id: &FieldId) -> Result<bool, StorageError> {
        let n = self
            .conn
            .execute("DELETE FROM fields WHERE id = ?1", rusqlite::params![id.as_str()])?;
        Ok(n > 0)
    }

    fn list_section_fields(&self, section_id: &SectionId) -> Result<Vec<Field>, StorageError> {
        self.query_all(
            &format!("SELECT {FIELD_COLUMNS} FROM fields WHERE section_id = ?1 ORDER BY position, id"),
            rusqlite::params![section_id.as_str()],
            read_field,
            into_field,
        )
    }

    fn list_subform_fields(&self, subform_id: &SubformId) -> Result<Vec<Field>, StorageError> {
        self.query_all(
            &format!("SELECT {FIELD_COLUMNS} FROM fields WHERE subform_id = ?1 ORDER BY position, id"),
            rusqlite::params![subform_id.as_str()],
            read_field,
            into_field,
        )
    }

    fn find_lookup_source(&self, id: &SourceId) -> Result<Option<LookupSource>, StorageError> {
        self.query_one(
            &format!("SELECT {SOURCE_COLUMNS} FROM lookup_sources WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            read_source,
            into_source,
        )
    }

    fn list_lookup_sources(&self) -> Result<Vec<LookupSource>, StorageError> {
        self.query_all(
            &format!("SELECT {SOURCE_COLUMNS} FROM lookup_sources ORDER BY id"),
            [],
            read_source,
            into_source,
        )
    }

    fn upsert_lookup_source(&mut self, source: &LookupSource) -> Result<LookupSource, StorageError> {
        self.conn
            .execute(
                "INSERT INTO lookup_sources (id, name, source_type, description, source_module_id, source_form_id, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, source_type = excluded.source_type,
                     description = excluded.description, source_module_id = excluded.source_module_id,
                     source_form_id = excluded.source_form_id, active = excluded.active,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    source.id.as_str(),
                    source.name,
                    source.kind.as_str(),
                    source.description,
                    source.source_module_id.as_ref().map(|m| m.as_str()),
                    source.source_form_id.as_ref().map(|f| f.as_str()),
                    source.active,
                    to_ts(&source.created_at),
                    to_ts(&source.updated_at),
                ],
            )
            .map_err(|e| constraint(e, || format!("lookup source {}", source.id)))?;
        self.find_lookup_source(&source.id)?
            .ok_or_else(|| StorageError::NotFound(format!("lookup source {}", source.id)))
    }

    fn delete_lookup_source(&mut self, id: &SourceId) -> Result<bool, StorageError> {
        let n = self.conn.execute(
            "DELETE FROM lookup_sources WHERE id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        Ok(n > 0)
    }

    fn upsert_lookup_field_relation(
        &mut self,
        relation: &LookupFieldRelation,
    ) -> Result<LookupFieldRelation, StorageError> {
        let filters = to_json(&relation.filters, "filters")?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO lookup_field_relations ({RELATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(id) DO UPDATE SET form_id = excluded.form_id, module_id = excluded.module_id,
                         display_field = excluded.display_field, value_field = excluded.value_field,
                         multiple = excluded.multiple, searchable = excluded.searchable,
                         filters = excluded.filters, updated_at = excluded.updated_at"
                ),
                rusqlite::params![
                    relation.id.as_str(),
                    relation.source_id.as_str(),
                    relation.field_id.as_str(),
                    relation.form_id.as_str(),
                    relation.module_id.as_str(),
                    relation.display_field,
                    relation.value_field,
                    relation.multiple,
                    relation.searchable,
                    filters,
                    to_ts(&relation.created_at),
                    to_ts(&relation.updated_at),
                ],
            )
            .map_err(|e| constraint(e, || format!("lookup field relation {}", relation.id)))?;
        self.find_lookup_field_relation(&relation.id)?
            .ok_or_else(|| StorageError::NotFound(format!("lookup field relation {}", relation.id)))
    }

    fn find_lookup_field_relation(
        &self,
        id: &RelationId,
    ) -> Result<Option<LookupFieldRelation>, StorageError> {
        self.query_one(
            &format!("SELECT {RELATION_COLUMNS} FROM lookup_field_relations WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            read_relation,
            into_relation,
        )
    }

    fn list_relations_for_field(
        &self,
        field_id: &FieldId,
    ) -> Result<Vec<LookupFieldRelation>, StorageError> {
        self.query_all(
            &format!("SELECT {RELATION_COLUMNS} FROM lookup_field_relations WHERE field_id = ?1 ORDER BY id"),
            rusqlite::params![field_id.as_str()],
            read_relation,
            into_relation,
        )
    }

    fn list_relations_for_source(
        &self,
        source_id: &SourceId,
    ) -> Result<Vec<LookupFieldRelation>, StorageError> {
        self.query_all(
            &format!("SELECT {RELATION_COLUMNS} FROM lookup_field_relations WHERE lookup_source_id = ?1 ORDER BY id"),
            rusqlite::params![source_id.as_str()],
            read_relation,
            into_relation,
        )
    }

    fn delete_relations_for_field(&mut self, field_id: &FieldId) -> Result<usize, StorageError> {
        let n = self.conn.execute(
            "DELETE FROM lookup_field_relations WHERE field_id = ?1",
            [field_id.as_str()],
        )?;
        Ok(n)
    }

    fn delete_relations_for_field_except(
        &mut self,
        field_id: &FieldId,
        keep: &RelationId,
    ) -> Result<usize, StorageError> {
        let n = self.conn.execute(
            "DELETE FROM lookup_field_relations WHERE field_id = ?1 AND id <> ?2",
            rusqlite::params![field_id.as_str(), keep.as_str()],
        )?;
        Ok(n)
    }

    fn find_record_by_exact_data(
        &self,
        form_id: &FormId,
        data: &CanonicalData,
    ) -> Result<Option<FormRecord>, StorageError> {
        self.query_one(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM form_records WHERE form_id = ?1 AND fingerprint = ?2 AND raw_data = ?3"
            ),
            rusqlite::params![form_id.as_str(), data.fingerprint.to_hex(), data.json],
            read_record,
            into_record,
        )
    }

    fn create_record(
        &mut self,
        record: &FormRecord,
        raw: &CanonicalData,
    ) -> Result<(), StorageError> {
        let record_data = to_json(&record.record_data, "record_data")?;
        self.conn
            .execute(
                "INSERT INTO form_records (id, form_id, record_data, raw_data, fingerprint, submitted_by, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.id.as_str(),
                    record.form_id.as_str(),
                    record_data,
                    raw.json,
                    raw.fingerprint.to_hex(),
                    record.submitted_by,
                    to_ts(&record.submitted_at),
                ],
            )
            .map_err(|e| constraint(e, || format!("record {} on form {}", record.id, record.form_id)))?;
        Ok(())
    }

    fn find_record(&self, id: &RecordId) -> Result<Option<FormRecord>, StorageError> {
        self.query_one(
            &format!("SELECT {RECORD_COLUMNS} FROM form_records WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            read_record,
            into_record,
        )
    }

    fn list_records(&self, form_id: &FormId) -> Result<Vec<FormRecord>, StorageError> {
        self.query_all(
            &format!("SELECT {RECORD_COLUMNS} FROM form_records WHERE form_id = ?1 ORDER BY submitted_at, rowid"),
            rusqlite::params![form_id.as_str()],
            read_record,
            into_record,
        )
    }

    fn count_records(&self, form_id: &FormId) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM form_records WHERE form_id = ?1",
            rusqlite::params![form_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
