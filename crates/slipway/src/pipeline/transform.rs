//! Field transformers applied to a built document set.
//!
//! Every function here is pure: it takes the documents and the resolved value
//! and mutates nothing else. The pipeline is responsible for side effects such
//! as creating the namespace objects reported by [`apply_transformers`].

use serde_json::Value;
use thiserror::Error;

use crate::document::{ensure_object, object_entry, DocumentSet};
use crate::resource::{Transformer, TransformerType};

/// Transformer values replaced by the operation's reference title.
const TITLE_SENTINELS: [&str; 3] = ["branch", "pull", "tag"];
/// Transformer value replaced by the build unit's name.
const HASH_SENTINEL: &str = "hash";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Transformer '{0}' requires a key")]
    MissingKey(TransformerType),

    #[error("Transformer '{0}' resolved to an empty value")]
    EmptyValue(TransformerType),
}

pub type Result<T> = std::result::Result<T, TransformError>;

/// What a transformer run produced besides the mutated documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    /// Namespaces the documents were moved into, in transformer order.
    pub namespaces: Vec<String>,
}

/// Resolves sentinel values against the reference title and build unit name.
pub fn resolve_value(value: &str, title: &str, hash: &str) -> String {
    if TITLE_SENTINELS.contains(&value) {
        title.to_string()
    } else if value == HASH_SENTINEL {
        hash.to_string()
    } else {
        value.to_string()
    }
}

/// Applies `transformers` to `docs` in order.
pub fn apply_transformers(
    docs: &mut DocumentSet,
    transformers: &[Transformer],
    title: &str,
    hash: &str,
) -> Result<TransformOutcome> {
    let mut outcome = TransformOutcome::default();

    for transformer in transformers {
        if transformer.kind.requires_key() && transformer.key.is_empty() {
            return Err(TransformError::MissingKey(transformer.kind));
        }
        let value = resolve_value(&transformer.value, title, hash);

        match transformer.kind {
            TransformerType::Annotations => set_annotation(docs, &transformer.key, &value),
            TransformerType::Labels => set_label(docs, &transformer.key, &value),
            TransformerType::Images => set_image_tag(docs, &transformer.key, &value),
            TransformerType::Namespace => {
                if value.is_empty() {
                    return Err(TransformError::EmptyValue(transformer.kind));
                }
                set_namespace(docs, &value);
                outcome.namespaces.push(value);
            }
            TransformerType::Prefix => add_prefix(docs, &value),
            TransformerType::Suffix => add_suffix(docs, &value),
        }
        log::debug!("Applied {} transformer to {} documents", transformer.kind, docs.len());
    }

    Ok(outcome)
}

pub fn set_annotation(docs: &mut DocumentSet, key: &str, value: &str) {
    set_metadata_entry(docs, "annotations", key, value);
}

pub fn set_label(docs: &mut DocumentSet, key: &str, value: &str) {
    set_metadata_entry(docs, "labels", key, value);
}

/// Sets `metadata.<field>.<key>` and, where a pod template exists,
/// `spec.template.metadata.<field>.<key>`.
fn set_metadata_entry(docs: &mut DocumentSet, field: &str, key: &str, value: &str) {
    for doc in docs.iter_mut() {
        let entries = ensure_object(
            doc.metadata_mut()
                .entry(field.to_string())
                .or_insert(Value::Null),
        );
        entries.insert(key.to_string(), Value::String(value.to_string()));

        if let Some(template) = doc
            .value_mut()
            .get_mut("spec")
            .and_then(|s| s.get_mut("template"))
            .filter(|t| t.is_object())
        {
            let template_meta = object_entry(template, "metadata");
            let entries = ensure_object(
                template_meta
                    .entry(field.to_string())
                    .or_insert(Value::Null),
            );
            entries.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
}

/// Retags every container image named `name` in `spec.containers` and
/// `spec.template.spec.containers`.
pub fn set_image_tag(docs: &mut DocumentSet, name: &str, tag: &str) {
    for doc in docs.iter_mut() {
        let Some(spec) = doc.value_mut().get_mut("spec") else {
            continue;
        };
        retag_containers(spec.get_mut("containers"), name, tag);
        let template_containers = spec
            .get_mut("template")
            .and_then(|t| t.get_mut("spec"))
            .and_then(|s| s.get_mut("containers"));
        retag_containers(template_containers, name, tag);
    }
}

fn retag_containers(containers: Option<&mut Value>, name: &str, tag: &str) {
    let Some(Value::Array(containers)) = containers else {
        return;
    };
    for container in containers {
        let Some(image) = container.get_mut("image") else {
            continue;
        };
        let Some(current) = image.as_str() else {
            continue;
        };
        if image_name(current) == name {
            *image = Value::String(format!("{}:{}", name, tag));
        }
    }
}

/// Image reference without its tag or digest. A colon before the last `/`
/// belongs to a registry port, e.g. `registry:5000/app:1.0` is `registry:5000/app`.
pub fn image_name(image: &str) -> &str {
    let without_digest = image.split_once('@').map_or(image, |(name, _)| name);
    let last_slash = without_digest.rfind('/').map_or(0, |i| i + 1);
    match without_digest[last_slash..].rfind(':') {
        Some(colon) => &without_digest[..last_slash + colon],
        None => without_digest,
    }
}

pub fn set_namespace(docs: &mut DocumentSet, namespace: &str) {
    for doc in docs.iter_mut() {
        doc.set_namespace(namespace);
    }
}

pub fn add_prefix(docs: &mut DocumentSet, prefix: &str) {
    for doc in docs.iter_mut() {
        let name = format!("{}-{}", prefix, doc.name());
        doc.set_name(name);
    }
}

pub fn add_suffix(docs: &mut DocumentSet, suffix: &str) {
    for doc in docs.iter_mut() {
        let name = format!("{}-{}", doc.name(), suffix);
        doc.set_name(name);
    }
}
