//! K8s-style resource types for repository declarations and build units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The API version for all slipway resources.
pub const API_VERSION: &str = "git.gitops.slipway.org/v1";

/// Matcher convention used when a declaration leaves `gitpath` empty.
pub const DEFAULT_GITPATH: &str = "github";

/// The kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    GitRepo,
    Hash,
}

impl ResourceKind {
    /// Returns all resource kinds.
    pub fn all() -> &'static [ResourceKind] {
        &[ResourceKind::GitRepo, ResourceKind::Hash]
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::GitRepo => write!(f, "GitRepo"),
            ResourceKind::Hash => write!(f, "Hash"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gitrepo" => Ok(ResourceKind::GitRepo),
            "hash" => Ok(ResourceKind::Hash),
            _ => Err(format!("Unknown resource kind: {}", s)),
        }
    }
}

/// Points from an owned record to the record that controls its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

/// Metadata for a resource, following K8s conventions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// The unique name of the resource within its kind.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Assigned by the store on creation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// Bumped by the store whenever the spec changes.
    #[serde(default)]
    pub generation: i64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Creates a new ObjectMeta with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a label to the metadata.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Returns the controlling owner, if any.
    pub fn controller(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }
}

/// A generic K8s-style resource wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<T, S> {
    /// API version, should always be `git.gitops.slipway.org/v1`.
    pub api_version: String,

    /// The kind of resource.
    pub kind: ResourceKind,

    /// Resource metadata.
    pub metadata: ObjectMeta,

    /// The desired state.
    pub spec: T,

    /// The observed state, written only by reconcilers.
    #[serde(default)]
    pub status: S,
}

impl<T, S: Default> Resource<T, S> {
    /// Creates a new resource with the given kind and spec.
    pub fn new(kind: ResourceKind, name: impl Into<String>, spec: T) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind,
            metadata: ObjectMeta::new(name),
            spec,
            status: S::default(),
        }
    }
}

impl<T, S> Resource<T, S> {
    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Builds a controlling owner reference pointing at this resource.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
        }
    }

    /// Builds an object reference suitable for a status list.
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: self.api_version.clone(),
            kind: self.kind.to_string(),
            name: self.metadata.name.clone(),
            namespace: self.metadata.namespace.clone().unwrap_or_default(),
            uid: self.metadata.uid.clone(),
        }
    }
}

/// Reference to a stored object, as recorded in status lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

impl ObjectReference {
    /// Two references name the same object when kind, name and namespace agree.
    pub fn same_object(&self, other: &ObjectReference) -> bool {
        self.kind == other.kind && self.name == other.name && self.namespace == other.namespace
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Which family of git references an operation tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Branch,
    Tag,
    Pull,
    #[serde(rename = "highesttag")]
    HighestTag,
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpType::Branch => write!(f, "branch"),
            OpType::Tag => write!(f, "tag"),
            OpType::Pull => write!(f, "pull"),
            OpType::HighestTag => write!(f, "highesttag"),
        }
    }
}

/// Named field mutation applied to produced documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformerType {
    Annotations,
    Images,
    Labels,
    Namespace,
    Prefix,
    Suffix,
}

impl TransformerType {
    /// Whether the transformer needs a `key`.
    pub fn requires_key(&self) -> bool {
        matches!(
            self,
            TransformerType::Annotations | TransformerType::Images | TransformerType::Labels
        )
    }
}

impl std::fmt::Display for TransformerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransformerType::Annotations => "annotations",
            TransformerType::Images => "images",
            TransformerType::Labels => "labels",
            TransformerType::Namespace => "namespace",
            TransformerType::Prefix => "prefix",
            TransformerType::Suffix => "suffix",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformer {
    #[serde(rename = "type")]
    pub kind: TransformerType,

    /// Literal value, or one of `branch`, `pull`, `tag`, `hash`.
    pub value: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

impl Transformer {
    pub fn new(kind: TransformerType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            key: String::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

/// A declared trigger plus the build it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "operation")]
    pub name: String,

    #[serde(default)]
    pub path: String,

    /// Append `?ref=<hash>` to the build path.
    #[serde(default, rename = "hashpath")]
    pub hash_path: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,

    #[serde(rename = "optype")]
    pub op_type: OpType,

    /// Reference pattern, ignored by `pull` operations.
    #[serde(default)]
    pub reference: String,

    /// Populated during matching; empty in declarations.
    #[serde(default, rename = "referencetitle", skip_serializing_if = "String::is_empty")]
    pub reference_title: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<Transformer>,
}

impl Operation {
    pub fn new(
        name: impl Into<String>,
        op_type: OpType,
        reference: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            hash_path: false,
            weight: None,
            op_type,
            reference: reference.into(),
            reference_title: String::new(),
            transformers: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_hash_path(mut self) -> Self {
        self.hash_path = true;
        self
    }

    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Copy of this operation carrying a resolved reference title.
    pub fn resolved(&self, title: impl Into<String>) -> Self {
        let mut op = self.clone();
        op.reference_title = title.into();
        op
    }
}

/// Artifact sink selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub bucket: String,
}

// ============================================================================
// GitRepo Resource
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoSpec {
    pub uri: String,

    /// Reference matcher convention; empty selects the default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gitpath: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl GitRepoSpec {
    /// The effective matcher selector.
    pub fn gitpath(&self) -> &str {
        if self.gitpath.is_empty() {
            DEFAULT_GITPATH
        } else {
            &self.gitpath
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,

    /// Build units currently materialized for this repository.
    #[serde(default)]
    pub hashes: Vec<ObjectReference>,
}

pub type GitRepo = Resource<GitRepoSpec, GitRepoStatus>;

// ============================================================================
// Hash Resource
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashSpec {
    /// Name of the owning GitRepo.
    pub gitrepo: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashStatus {
    /// Objects produced by the last pipeline run.
    #[serde(default)]
    pub objects: Vec<ObjectReference>,
}

pub type Hash = Resource<HashSpec, HashStatus>;

// ============================================================================
// Any Resource (for generic handling)
// ============================================================================

/// A resource that can be any of the supported types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyResource {
    GitRepo(GitRepo),
    Hash(Hash),
}

impl AnyResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            AnyResource::GitRepo(_) => ResourceKind::GitRepo,
            AnyResource::Hash(_) => ResourceKind::Hash,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AnyResource::GitRepo(r) => &r.metadata.name,
            AnyResource::Hash(r) => &r.metadata.name,
        }
    }

    pub fn api_version(&self) -> &str {
        match self {
            AnyResource::GitRepo(r) => &r.api_version,
            AnyResource::Hash(r) => &r.api_version,
        }
    }
}

/// Intermediate struct for parsing resources before determining their type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHeader {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
}

/// A resource along with its file path.
#[derive(Debug, Clone)]
pub struct ResourceWithPath<T> {
    pub resource: T,
    /// The file path relative to the declarations directory.
    pub path: std::path::PathBuf,
}

impl<T> ResourceWithPath<T> {
    pub fn new(resource: T, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            resource,
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_from_str() {
        assert_eq!("GitRepo".parse::<ResourceKind>().unwrap(), ResourceKind::GitRepo);
        assert_eq!("hash".parse::<ResourceKind>().unwrap(), ResourceKind::Hash);
        assert!("Rule".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_deserialize_gitrepo() {
        let yaml = r#"
apiVersion: git.gitops.slipway.org/v1
kind: GitRepo
metadata:
  name: podinfo
spec:
  uri: https://github.com/example/podinfo.git
  store:
    type: filesystem
    bucket: manifests
  operations:
    - operation: prod
      optype: highesttag
      reference: "v1.[0-9]+.[0-9]+"
      path: https://github.com/example/podinfo//kustomize
      hashpath: true
      weight: 2
      transformers:
        - type: namespace
          value: tag
        - type: images
          key: ghcr.io/example/podinfo
          value: tag
"#;
        let repo: GitRepo = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(repo.api_version, API_VERSION);
        assert_eq!(repo.kind, ResourceKind::GitRepo);
        assert_eq!(repo.spec.gitpath(), DEFAULT_GITPATH);
        assert_eq!(repo.spec.store.as_ref().unwrap().kind, "filesystem");

        let op = &repo.spec.operations[0];
        assert_eq!(op.name, "prod");
        assert_eq!(op.op_type, OpType::HighestTag);
        assert!(op.hash_path);
        assert_eq!(op.weight, Some(2));
        assert!(op.reference_title.is_empty());
        assert_eq!(op.transformers[1].kind, TransformerType::Images);
        assert_eq!(op.transformers[1].key, "ghcr.io/example/podinfo");
        assert_eq!(repo.status, GitRepoStatus::default());
    }

    #[test]
    fn test_serialize_hash_keeps_reference_title() {
        let mut hash: Hash = Resource::new(
            ResourceKind::Hash,
            "abc123",
            HashSpec {
                gitrepo: "podinfo".to_string(),
                store: None,
                operations: vec![
                    Operation::new("dev", OpType::Branch, "master", "./deploy").resolved("master")
                ],
            },
        );
        hash.status.objects.push(ObjectReference {
            kind: "Service".to_string(),
            name: "web".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        });

        let yaml = serde_yaml::to_string(&hash).unwrap();
        assert!(yaml.contains("kind: Hash"));
        assert!(yaml.contains("referencetitle: master"));
        assert!(yaml.contains("optype: branch"));

        let back: Hash = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_declaration_omits_empty_reference_title() {
        let op = Operation::new("dev", OpType::Pull, "", "./deploy");
        let yaml = serde_yaml::to_string(&op).unwrap();
        assert!(!yaml.contains("referencetitle"));
        assert!(yaml.contains("optype: pull"));
    }

    #[test]
    fn test_same_object_ignores_uid_and_version() {
        let a = ObjectReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "cfg".to_string(),
            namespace: "default".to_string(),
            uid: "1".to_string(),
        };
        let mut b = a.clone();
        b.uid = "2".to_string();
        b.api_version = "v2".to_string();
        assert!(a.same_object(&b));

        b.namespace = "other".to_string();
        assert!(!a.same_object(&b));
    }

    #[test]
    fn test_owner_reference_is_controller() {
        let mut repo: GitRepo = Resource::new(ResourceKind::GitRepo, "podinfo", GitRepoSpec::default());
        repo.metadata.uid = "uid-1".to_string();
        let owner = repo.owner_reference();
        assert!(owner.controller);
        assert_eq!(owner.kind, "GitRepo");
        assert_eq!(owner.uid, "uid-1");
    }
}
