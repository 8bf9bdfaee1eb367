//! JSON-Schema gate for ingest events.
//!
//! Each origin schema (`ingest-<origin>.v1.schema.json`) composes with the shared
//! envelope schema through `$ref`. Every document is registered in memory under
//! its `$id` and under its `file://` location, and the compiler is handed a
//! resolver that only consults that registry: validation never fetches over
//! the network, and an unresolved reference is a configuration error.

use crate::constants::ENVELOPE_SCHEMA_FILE;
use crate::envelope::{EventType, IngestEvent};
use crate::error::{IngestError, Result};
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema, SchemaResolver, SchemaResolverError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// One schema violation, tagged with the path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Violation {
    pub path: Vec<String>,
    pub message: String,
}

impl Violation {
    pub fn new(path: Vec<String>, message: impl Into<String>) -> Self {
        Self { path, message: message.into() }
    }

    /// Dotted field path, `<root>` for the document itself.
    pub fn field(&self) -> String {
        if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path.join(".")
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field(), self.message)
    }
}

#[derive(Clone, Default)]
struct DocumentStore {
    by_uri: HashMap<String, Arc<Value>>,
    by_file_name: HashMap<String, Arc<Value>>,
}

impl DocumentStore {
    fn insert(&mut self, file_name: &str, location: Option<&Url>, doc: Value) -> Arc<Value> {
        let doc = Arc::new(doc);
        if let Some(id) = doc.get("$id").and_then(Value::as_str) {
            self.by_uri.insert(id.to_string(), doc.clone());
        }
        if let Some(loc) = location {
            self.by_uri.insert(loc.to_string(), doc.clone());
        }
        self.by_file_name.insert(file_name.to_string(), doc.clone());
        doc
    }

    fn lookup(&self, url: &Url) -> Option<Arc<Value>> {
        let mut without_fragment = url.clone();
        without_fragment.set_fragment(None);
        if let Some(doc) = self.by_uri.get(without_fragment.as_str()) {
            return Some(doc.clone());
        }
        // Relative references resolved against a schema without `$id` land on a
        // synthetic base; fall back to the file name they name.
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| self.by_file_name.get(name))
            .cloned()
    }
}

struct LocalResolver {
    store: DocumentStore,
}

impl SchemaResolver for LocalResolver {
    fn resolve(
        &self,
        _root_schema: &Value,
        url: &Url,
        original_reference: &str,
    ) -> std::result::Result<Arc<Value>, SchemaResolverError> {
        self.store.lookup(url).ok_or_else(|| {
            anyhow::anyhow!(
                "schema reference '{}' ({}) is not in the local registry",
                original_reference,
                url
            )
        })
    }
}

/// Compiled schemas for every event type, built once at startup.
pub struct SchemaRegistry {
    compiled: HashMap<EventType, JSONSchema>,
}

impl SchemaRegistry {
    /// Loads the envelope schema and every origin schema from `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let dir = dir.canonicalize().map_err(|e| {
            IngestError::SchemaConfig(format!("schema directory {} not readable: {}", dir.display(), e))
        })?;
        let mut store = DocumentStore::default();
        load_document(&mut store, &dir, ENVELOPE_SCHEMA_FILE)?;
        let mut origins = Vec::new();
        for event_type in EventType::ALL {
            let doc = load_document(&mut store, &dir, event_type.schema_file())?;
            origins.push((event_type, doc));
        }
        let registry = Self::compile(store, origins)?;
        info!(dir = %dir.display(), "Schema registry loaded");
        Ok(registry)
    }

    /// Builds a registry from in-memory documents keyed by file name
    /// (`envelope.v1.schema.json`, `ingest-file.v1.schema.json`, ...).
    pub fn from_documents(documents: Vec<(String, Value)>) -> Result<Self> {
        let mut store = DocumentStore::default();
        let mut by_name = HashMap::new();
        for (name, doc) in documents {
            let doc = store.insert(&name, None, doc);
            by_name.insert(name, doc);
        }
        if !by_name.contains_key(ENVELOPE_SCHEMA_FILE) {
            return Err(IngestError::SchemaConfig(format!("missing {}", ENVELOPE_SCHEMA_FILE)));
        }
        let mut origins = Vec::new();
        for event_type in EventType::ALL {
            let doc = by_name.get(event_type.schema_file()).cloned().ok_or_else(|| {
                IngestError::SchemaConfig(format!("missing {}", event_type.schema_file()))
            })?;
            origins.push((event_type, doc));
        }
        Self::compile(store, origins)
    }

    /// Registry for one explicit envelope/payload schema pair. The payload
    /// schema governs `event_type`; it must reference the envelope schema.
    pub fn from_pair(event_type: EventType, envelope_schema: Value, payload_schema: Value) -> Result<Self> {
        let mut store = DocumentStore::default();
        store.insert(ENVELOPE_SCHEMA_FILE, None, envelope_schema);
        let doc = store.insert(event_type.schema_file(), None, payload_schema);
        Self::compile(store, vec![(event_type, doc)])
    }

    fn compile(store: DocumentStore, origins: Vec<(EventType, Arc<Value>)>) -> Result<Self> {
        let mut compiled = HashMap::new();
        for (event_type, doc) in origins {
            let mut options = JSONSchema::options();
            options.with_draft(Draft::Draft7);
            for (uri, document) in &store.by_uri {
                options.with_document(uri.clone(), (**document).clone());
            }
            let schema = options
                .with_resolver(LocalResolver { store: store.clone() })
                .compile(&doc)
                .map_err(|e| {
                    IngestError::SchemaConfig(format!("{} failed to compile: {}", event_type.schema_file(), e))
                })?;
            resolve_references_eagerly(event_type, &schema)?;
            debug!(event_type = %event_type, "Compiled event schema");
            compiled.insert(event_type, schema);
        }
        Ok(Self { compiled })
    }

    pub fn event_types(&self) -> impl Iterator<Item = &EventType> {
        self.compiled.keys()
    }

    /// Validates a built event; any violation is an error carrying all of them.
    pub fn validate(&self, event: &IngestEvent) -> Result<()> {
        let instance = serde_json::to_value(event)?;
        match self.validate_value(event.event_type, &instance)? {
            violations if violations.is_empty() => Ok(()),
            violations => {
                crate::metrics::validation::rejected(event.event_type.as_str(), violations.len());
                Err(IngestError::Validation(violations))
            }
        }
    }

    /// Returns every violation sorted by field path; empty means valid.
    pub fn validate_value(&self, event_type: EventType, instance: &Value) -> Result<Vec<Violation>> {
        let schema = self.compiled.get(&event_type).ok_or_else(|| {
            IngestError::SchemaConfig(format!("no schema registered for {}", event_type))
        })?;
        let mut violations = Vec::new();
        if let Err(errors) = schema.validate(instance) {
            for error in errors {
                if let ValidationErrorKind::Resolver { url, error } = &error.kind {
                    return Err(IngestError::SchemaConfig(format!(
                        "unresolved schema reference {}: {}",
                        url, error
                    )));
                }
                let message = error.to_string();
                violations.push(Violation::new(error.instance_path.into_vec(), message));
            }
        }
        violations.sort();
        Ok(violations)
    }
}

fn load_document(store: &mut DocumentStore, dir: &Path, file_name: &str) -> Result<Arc<Value>> {
    let path = dir.join(file_name);
    let text = fs::read_to_string(&path).map_err(|e| {
        IngestError::SchemaConfig(format!("schema file {} not found: {}", path.display(), e))
    })?;
    let doc: Value = serde_json::from_str(&text).map_err(|e| {
        IngestError::SchemaConfig(format!("schema file {} is not valid JSON: {}", path.display(), e))
    })?;
    let location = Url::from_file_path(&path).ok();
    Ok(store.insert(file_name, location.as_ref(), doc))
}

// References are resolved lazily by the validator, so run one validation up
// front to surface resolver failures at startup instead of on the first event.
fn resolve_references_eagerly(event_type: EventType, schema: &JSONSchema) -> Result<()> {
    if let Err(errors) = schema.validate(&json!({})) {
        for error in errors {
            if let ValidationErrorKind::Resolver { url, error } = &error.kind {
                return Err(IngestError::SchemaConfig(format!(
                    "{}: unresolved schema reference {}: {}",
                    event_type.schema_file(),
                    url,
                    error
                )));
            }
        }
    }
    Ok(())
}
