use serde_json::{Map, Value};

use formkit_core::{
    Field, FieldParent, FieldType, Form, LookupConfig, Module, NewField, NewForm, NewModule,
    NewSection, NewSubform, Section, Subform,
};
use formkit_engine::{
    Engine, EngineConfig, EngineError, Submission, SubmissionError, SubmissionReceipt,
};
use formkit_storage::SqliteStore;

/// An engine over a fresh in-memory database, with shorthand for building
/// form hierarchies in tests.
pub struct Fixture {
    pub engine: Engine<SqliteStore>,
}

impl Fixture {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        crate::init_tracing();
        Ok(Self {
            engine: Engine::open(config)?,
        })
    }

    /// Wrap an already opened store, e.g. a second connection to a shared file.
    pub fn with_store(store: SqliteStore) -> Self {
        crate::init_tracing();
        Self {
            engine: Engine::new(store, EngineConfig::default()),
        }
    }

    pub fn module(&mut self, id: &str, name: &str) -> Result<Module, EngineError> {
        self.engine.create_module(NewModule::new(name).with_id(id))
    }

    pub fn submodule(&mut self, id: &str, parent: &str, name: &str) -> Result<Module, EngineError> {
        self.engine
            .create_module(NewModule::new(name).with_id(id).within(parent))
    }

    /// A form with one section. Pass `None` for a form outside any module.
    pub fn form(
        &mut self,
        id: &str,
        module: Option<&str>,
        name: &str,
        section_id: &str,
    ) -> Result<(Form, Section), EngineError> {
        let mut new = NewForm::new(name).with_id(id);
        if let Some(module) = module {
            new = new.in_module(module);
        }
        let form = self.engine.create_form(new)?;
        let section = self
            .engine
            .create_section(NewSection::new(id, "Main").with_id(section_id))?;
        Ok((form, section))
    }

    pub fn subform(&mut self, id: &str, section: &str, name: &str) -> Result<Subform, EngineError> {
        self.engine
            .create_subform(NewSubform::new(section, name).with_id(id))
    }

    pub fn text_field(&mut self, id: &str, section: &str, label: &str) -> Result<Field, EngineError> {
        self.engine.create_field(
            NewField::new(FieldParent::Section(section.into()), FieldType::Text, label).with_id(id),
        )
    }

    pub fn lookup_field(
        &mut self,
        id: &str,
        parent: FieldParent,
        lookup: LookupConfig,
    ) -> Result<Field, EngineError> {
        self.engine.create_field(
            NewField::new(parent, FieldType::Lookup, id)
                .with_id(id)
                .with_lookup(lookup),
        )
    }

    /// Submit `data`, which should be a JSON object keyed by field id.
    pub fn submit(&mut self, form: &str, data: Value) -> Result<SubmissionReceipt, SubmissionError> {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.engine.submit(&Submission::new(form, data))
    }
}

/// Lookup configuration pointing at a module.
pub fn module_lookup(module: &str) -> LookupConfig {
    LookupConfig {
        source_module: Some(module.into()),
        ..LookupConfig::default()
    }
}

/// Lookup configuration pointing at a form.
pub fn form_lookup(form: &str) -> LookupConfig {
    LookupConfig {
        source_form: Some(form.into()),
        ..LookupConfig::default()
    }
}

/// Lookup configuration with an explicit source id.
pub fn named_lookup(source_id: &str) -> LookupConfig {
    LookupConfig {
        source_id: Some(source_id.to_string()),
        ..LookupConfig::default()
    }
}
