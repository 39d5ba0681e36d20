use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA busy_timeout = 5000;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, unixepoch())",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS modules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    parent_id TEXT REFERENCES modules (id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_modules_parent ON modules (parent_id);

CREATE TABLE IF NOT EXISTS forms (
    id TEXT PRIMARY KEY,
    module_id TEXT REFERENCES modules (id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    is_published INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_forms_module ON forms (module_id);

CREATE TABLE IF NOT EXISTS sections (
    id TEXT PRIMARY KEY,
    form_id TEXT NOT NULL REFERENCES forms (id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT,
    position INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sections_form ON sections (form_id, position);

CREATE TABLE IF NOT EXISTS subforms (
    id TEXT PRIMARY KEY,
    section_id TEXT NOT NULL REFERENCES sections (id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    position INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_subforms_section ON subforms (section_id, position);

CREATE TABLE IF NOT EXISTS fields (
    id TEXT PRIMARY KEY,
    section_id TEXT REFERENCES sections (id) ON DELETE CASCADE,
    subform_id TEXT REFERENCES subforms (id) ON DELETE CASCADE,
    field_type TEXT NOT NULL,
    label TEXT NOT NULL,
    description TEXT,
    placeholder TEXT,
    options TEXT,
    validation TEXT,
    position INTEGER NOT NULL,
    lookup_source_id TEXT,
    source_module TEXT,
    source_form TEXT,
    display_field TEXT,
    value_field TEXT,
    multiple INTEGER NOT NULL DEFAULT 0,
    searchable INTEGER NOT NULL DEFAULT 1,
    filters TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((section_id IS NULL) <> (subform_id IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_fields_section ON fields (section_id, position);
CREATE INDEX IF NOT EXISTS idx_fields_subform ON fields (subform_id, position);

CREATE TABLE IF NOT EXISTS form_records (
    id TEXT PRIMARY KEY,
    form_id TEXT NOT NULL REFERENCES forms (id) ON DELETE CASCADE,
    record_data TEXT NOT NULL,
    raw_data TEXT NOT NULL,
    fingerprint TEXT NOT NULL CHECK (length(fingerprint) = 64),
    submitted_by TEXT,
    submitted_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_form_records_fingerprint ON form_records (form_id, fingerprint);

CREATE TABLE IF NOT EXISTS lookup_sources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    source_type TEXT NOT NULL CHECK (source_type IN ('static', 'form', 'module')),
    description TEXT,
    source_module_id TEXT REFERENCES modules (id) ON DELETE CASCADE,
    source_form_id TEXT REFERENCES forms (id) ON DELETE CASCADE,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (source_type = 'static' OR ((source_module_id IS NULL) <> (source_form_id IS NULL)))
);

CREATE TABLE IF NOT EXISTS lookup_field_relations (
    id TEXT PRIMARY KEY,
    lookup_source_id TEXT NOT NULL REFERENCES lookup_sources (id) ON DELETE CASCADE,
    field_id TEXT NOT NULL REFERENCES fields (id) ON DELETE CASCADE,
    form_id TEXT NOT NULL,
    module_id TEXT NOT NULL,
    display_field TEXT,
    value_field TEXT,
    multiple INTEGER NOT NULL,
    searchable INTEGER NOT NULL,
    filters TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (lookup_source_id, field_id)
);
CREATE INDEX IF NOT EXISTS idx_relations_field ON lookup_field_relations (field_id);
";
