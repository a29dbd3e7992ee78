//! Unstructured documents produced by the manifest builder.
//!
//! A [`Document`] is an arbitrary K8s-style object held as a JSON value so the
//! transform stage can reach into any field without a typed schema.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::resource::{ObjectReference, OwnerReference};

/// Namespace assigned to documents that do not declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document is not a mapping")]
    NotAnObject,

    #[error("Document is missing '{0}'")]
    MissingField(&'static str),

    #[error("Failed to parse YAML document: {0}")]
    ParseYaml(String),

    #[error("Failed to serialize documents: {0}")]
    SerializeYaml(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document(Value);

impl Document {
    /// Wraps a JSON value, requiring a `kind` and a `metadata.name`.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let obj = value.as_object().ok_or(DocumentError::NotAnObject)?;
        if obj.get("kind").and_then(Value::as_str).is_none() {
            return Err(DocumentError::MissingField("kind"));
        }
        if obj
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .is_none()
        {
            return Err(DocumentError::MissingField("metadata.name"));
        }
        Ok(Self(value))
    }

    /// Builds a minimal document with `apiVersion`, `kind` and `metadata.name`.
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        Self(serde_json::json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": { "name": name },
        }))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn api_version(&self) -> &str {
        self.0.get("apiVersion").and_then(Value::as_str).unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(Value::as_str).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.metadata_str("name")
    }

    pub fn namespace(&self) -> &str {
        self.metadata_str("namespace")
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.metadata_mut()
            .insert("name".to_string(), Value::String(name.into()));
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.metadata_mut()
            .insert("namespace".to_string(), Value::String(namespace.into()));
    }

    pub fn uid(&self) -> &str {
        self.metadata_str("uid")
    }

    pub fn set_uid(&mut self, uid: impl Into<String>) {
        self.metadata_mut()
            .insert("uid".to_string(), Value::String(uid.into()));
    }

    /// Replaces all owner references with a single controlling owner.
    pub fn set_controller(&mut self, owner: &OwnerReference) {
        let value = serde_json::to_value(vec![owner]).unwrap_or(Value::Array(Vec::new()));
        self.metadata_mut().insert("ownerReferences".to_string(), value);
    }

    pub fn owner_references(&self) -> Vec<OwnerReference> {
        self.0
            .get("metadata")
            .and_then(|m| m.get("ownerReferences"))
            .and_then(|v| Vec::<OwnerReference>::deserialize(v).ok())
            .unwrap_or_default()
    }

    /// Returns the controlling owner, if any.
    pub fn controller(&self) -> Option<OwnerReference> {
        self.owner_references().into_iter().find(|o| o.controller)
    }

    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            name: self.name().to_string(),
            namespace: self.namespace().to_string(),
            uid: self.uid().to_string(),
        }
    }

    /// Mutable access to `metadata`, created if absent or not a mapping.
    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        object_entry(&mut self.0, "metadata")
    }

    fn metadata_str(&self, field: &str) -> &str {
        self.0
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// Coerces `value` into a mapping, replacing anything else.
pub(crate) fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with a mapping"),
    }
}

/// Returns `parent[key]` as a mapping, creating or replacing it as needed.
pub(crate) fn object_entry<'a>(parent: &'a mut Value, key: &str) -> &'a mut Map<String, Value> {
    let entry = ensure_object(parent)
        .entry(key.to_string())
        .or_insert(Value::Null);
    ensure_object(entry)
}

/// Ordered collection of documents built from one operation path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSet {
    docs: Vec<Document>,
}

impl DocumentSet {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    /// Parses a multi-document YAML stream, skipping empty documents.
    pub fn from_yaml(input: &str) -> Result<Self, DocumentError> {
        let mut docs = Vec::new();
        for de in serde_yaml::Deserializer::from_str(input) {
            let value =
                Value::deserialize(de).map_err(|e| DocumentError::ParseYaml(e.to_string()))?;
            if value.is_null() {
                continue;
            }
            docs.push(Document::from_value(value)?);
        }
        Ok(Self { docs })
    }

    /// Renders the set as a multi-document YAML stream.
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        let mut parts = Vec::with_capacity(self.docs.len());
        for doc in &self.docs {
            parts.push(
                serde_yaml::to_string(doc.value())
                    .map_err(|e| DocumentError::SerializeYaml(e.to_string()))?,
            );
        }
        Ok(parts.join("---\n"))
    }

    pub fn push(&mut self, doc: Document) {
        self.docs.push(doc);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.docs.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Document> {
        self.docs.iter_mut()
    }
}

impl IntoIterator for DocumentSet {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.into_iter()
    }
}

impl<'a> IntoIterator for &'a DocumentSet {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter()
    }
}

impl FromIterator<Document> for DocumentSet {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        Self {
            docs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  ports:
    - port: 80
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: shop
"#;

    #[test]
    fn test_from_yaml_skips_empty_documents() {
        let set = DocumentSet::from_yaml(STREAM).unwrap();
        assert_eq!(set.len(), 2);
        let kinds: Vec<&str> = set.iter().map(Document::kind).collect();
        assert_eq!(kinds, vec!["Service", "Deployment"]);
        assert_eq!(set.iter().nth(1).unwrap().namespace(), "shop");
    }

    #[test]
    fn test_from_yaml_rejects_nameless_document() {
        let err = DocumentSet::from_yaml("kind: Service\nmetadata: {}\n").unwrap_err();
        assert!(matches!(err, DocumentError::MissingField("metadata.name")));
    }

    #[test]
    fn test_to_yaml_separates_documents() {
        let set = DocumentSet::from_yaml(STREAM).unwrap();
        let yaml = set.to_yaml().unwrap();
        assert_eq!(yaml.matches("---").count(), 1);
        assert_eq!(DocumentSet::from_yaml(&yaml).unwrap(), set);
    }

    #[test]
    fn test_set_controller_replaces_owners() {
        let mut doc = Document::new("v1", "ConfigMap", "cfg");
        let owner = OwnerReference {
            api_version: "git.gitops.slipway.org/v1".to_string(),
            kind: "Hash".to_string(),
            name: "abc123".to_string(),
            uid: "u1".to_string(),
            controller: true,
        };
        doc.set_controller(&owner);
        doc.set_controller(&owner);
        assert_eq!(doc.owner_references(), vec![owner.clone()]);
        assert_eq!(doc.controller(), Some(owner));
    }

    #[test]
    fn test_object_reference_uses_metadata() {
        let mut doc = Document::new("v1", "ConfigMap", "cfg");
        doc.set_namespace("default");
        let r = doc.object_reference();
        assert_eq!(r.kind, "ConfigMap");
        assert_eq!(r.name, "cfg");
        assert_eq!(r.namespace, "default");
        assert_eq!(r.api_version, "v1");
    }

    #[test]
    fn test_metadata_mut_repairs_scalar_metadata() {
        let mut doc = Document(serde_json::json!({"kind": "X", "metadata": "oops"}));
        doc.set_name("fixed");
        assert_eq!(doc.name(), "fixed");
    }
}
