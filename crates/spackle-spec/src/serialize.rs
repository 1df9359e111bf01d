// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Reading and writing spec graphs as json or yaml documents.
//!
//! A document lists every node once, keyed by its dag hash, with
//! dependencies referring to other nodes by key:
//!
//! ```yaml
//! spec:
//!   _meta:
//!     version: 5
//!   nodes:
//!     - name: zlib
//!       version: =1.3
//!       hash: ...
//!       dependencies: []
//! ```
//!
//! Documents written before version 5 describe the compiler as an
//! attribute of each node instead of as a dependency. They are still
//! read, and are migrated on the way in.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spackle_foundation::arch::ArchSpec;
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::digest::SpecHash;
use spackle_foundation::flags::{FlagList, FlagMap, FlagType};
use spackle_foundation::name::PkgName;
use spackle_foundation::variant::{Variant, VariantMap, VariantValue};
use spackle_foundation::version::parse_version;
use spackle_foundation::version_range::{VersionList, parse_version_list};

use crate::edge::EdgeAttributes;
use crate::error::{Error, Result};
use crate::hash::{DAG_HASH, HashDescriptor};
use crate::node::{ExternalSpec, NodeId, SpecNode};
use crate::spec::Spec;

#[cfg(test)]
#[path = "./serialize_test.rs"]
mod serialize_test;

/// The document format written by this version of spackle
pub const SPEC_FORMAT_VERSION: u64 = 5;
/// The last format that described compilers as node attributes
pub const LEGACY_FORMAT_VERSION: u64 = 4;

/// The virtual packages a migrated compiler dependency provides
const LEGACY_COMPILER_VIRTUALS: [&str; 2] = ["c", "cxx"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub version: u64,
}

/// A whole spec graph as written to disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpecDocument {
    pub spec: DocumentBody,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentBody {
    #[serde(rename = "_meta")]
    pub meta: Meta,
    pub nodes: Vec<NodeRecord>,
}

/// One node of a document.
///
/// The field order here is the order of the serialized form, which
/// also feeds the node hashes, so it must not change.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<PkgName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub version: VersionList,
    #[serde(default, skip_serializing_if = "ArchSpec::is_empty")]
    pub arch: ArchSpec,
    /// Variants and compiler flags, by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    /// Variants in parameters whose kind is not known yet
    #[serde(default, rename = "abstract", skip_serializing_if = "Vec::is_empty")]
    pub abstract_variants: Vec<String>,
    /// Variants and flags in parameters that propagate to dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub propagate: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<SpecHash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<EdgeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_spec: Option<NodeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// A dependency of a node, referring to the child by key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub name: String,
    pub hash: String,
    pub parameters: EdgeParameters,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EdgeParameters {
    pub deptypes: DepFlag,
    #[serde(default)]
    pub virtuals: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub direct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl From<&EdgeAttributes> for EdgeParameters {
    fn from(attributes: &EdgeAttributes) -> Self {
        Self {
            deptypes: attributes.depflag,
            virtuals: attributes.virtuals.iter().cloned().collect(),
            direct: attributes.direct,
            when: attributes.when.clone(),
        }
    }
}

impl From<EdgeParameters> for EdgeAttributes {
    fn from(parameters: EdgeParameters) -> Self {
        Self {
            depflag: parameters.deptypes,
            virtuals: parameters.virtuals.into_iter().collect(),
            when: parameters.when,
            direct: parameters.direct,
        }
    }
}

/// A reference to another node of the same document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    pub name: String,
    pub hash: String,
}

impl NodeRecord {
    /// The attributes of a node, without any of its relationships.
    pub fn from_node(node: &SpecNode) -> Self {
        let mut parameters = BTreeMap::new();
        let mut abstract_variants = Vec::new();
        let mut propagate = Vec::new();
        for (name, variant) in node.variants.iter() {
            let value = match &variant.value {
                VariantValue::Bool(b) => Value::Bool(*b),
                VariantValue::Single(v) => Value::String(v.clone()),
                VariantValue::Multi(values) => string_array(values),
                VariantValue::Abstract(values) => {
                    abstract_variants.push(name.clone());
                    string_array(values)
                }
            };
            if variant.propagate {
                propagate.push(name.clone());
            }
            parameters.insert(name.clone(), value);
        }
        for (flag_type, list) in node.flags.iter() {
            let name = flag_type.to_string();
            if list.propagate {
                propagate.push(name.clone());
            }
            parameters.insert(name, string_array(&list.flags));
        }
        propagate.sort();
        Self {
            name: node.name.clone(),
            namespace: node.namespace.clone(),
            version: node.versions.clone(),
            arch: node.arch.clone(),
            parameters,
            abstract_variants,
            propagate,
            external: node.external.clone(),
            abstract_hash: node.abstract_hash.clone(),
            package_hash: node.package_hash.clone(),
            ..Default::default()
        }
    }

    /// The data hashed for a node under the given descriptor.
    ///
    /// Dependencies are included as the hashes of their own subgraphs
    /// under the same descriptor, sorted so that edge order and arena
    /// layout never change the result.
    pub(crate) fn for_hash(spec: &Spec, id: NodeId, descriptor: &HashDescriptor) -> Self {
        let node = spec.node(id);
        let mut record = Self::from_node(node);
        if !descriptor.package_hash {
            record.package_hash = None;
        }
        if !descriptor.depflag.is_empty() {
            record.dependencies = spec
                .edges_from(id)
                .filter(|(_, e)| e.matches(descriptor.depflag))
                .map(|(_, e)| EdgeRecord {
                    name: spec.node(e.child).display_name().to_owned(),
                    hash: spec.node_hash(e.child, descriptor).to_string(),
                    parameters: EdgeParameters {
                        when: None,
                        ..EdgeParameters::from(&e.attributes)
                    },
                })
                .collect();
            sort_edges(&mut record.dependencies);
        }
        record.build_spec = node.build_spec.map(|original| NodeRef {
            name: spec.node(original).display_name().to_owned(),
            hash: spec.node_hash(original, descriptor).to_string(),
        });
        record
    }

    /// Rebuild the node described by this record.
    pub fn to_node(&self) -> Result<SpecNode> {
        let mut variants = VariantMap::default();
        let mut flags = FlagMap::default();
        for (name, value) in self.parameters.iter() {
            let propagate = self.propagate.contains(name);
            if let Ok(flag_type) = FlagType::from_str(name) {
                let list = FlagList {
                    flags: strings(name, value)?,
                    propagate,
                };
                flags.insert(flag_type, list);
                continue;
            }
            let value = match value {
                Value::Bool(b) => VariantValue::Bool(*b),
                Value::String(s) => VariantValue::Single(s.clone()),
                Value::Array(_) => {
                    let values = strings(name, value)?.into_iter().collect();
                    if self.abstract_variants.contains(name) {
                        VariantValue::Abstract(values)
                    } else {
                        VariantValue::Multi(values)
                    }
                }
                other => {
                    return Err(Error::InvalidDocument(format!(
                        "unsupported value for variant '{name}': {other}"
                    )));
                }
            };
            variants.insert(name.clone(), Variant { value, propagate });
        }
        Ok(SpecNode {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            versions: self.version.clone(),
            variants,
            flags,
            arch: self.arch.clone(),
            external: self.external.clone(),
            abstract_hash: self.abstract_hash.clone(),
            package_hash: self.package_hash.clone(),
            ..Default::default()
        })
    }
}

fn string_array<'a, I>(values: I) -> Value
where
    I: IntoIterator<Item = &'a String>,
{
    Value::Array(values.into_iter().cloned().map(Value::String).collect())
}

fn strings(name: &str, value: &Value) -> Result<Vec<String>> {
    let invalid = || Error::InvalidDocument(format!("expected a list of strings for '{name}'"));
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_owned).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn sort_edges(edges: &mut [EdgeRecord]) {
    edges.sort_by(|a, b| (&a.name, &a.hash).cmp(&(&b.name, &b.hash)));
}

/// Lay out a spec as a document, keyed by dag hash.
///
/// Nodes appear in depth-first order from the roots, followed by the
/// original nodes of any splices.
pub fn to_document(spec: &Spec) -> SpecDocument {
    let key = |id: NodeId| spec.node_hash(id, &DAG_HASH).to_string();
    let mut order: Vec<NodeId> = Vec::new();
    let mut listed = BTreeSet::new();
    let mut pending: Vec<NodeId> = spec.roots().to_vec();
    while !pending.is_empty() {
        let start = order.len();
        for root in std::mem::take(&mut pending) {
            for item in spec.traverse_from(root) {
                if listed.insert(item.node) {
                    order.push(item.node);
                }
            }
        }
        pending = order[start..]
            .iter()
            .filter_map(|id| spec.node(*id).build_spec)
            .filter(|id| !listed.contains(id))
            .collect();
    }

    let nodes = order
        .into_iter()
        .map(|id| {
            let node = spec.node(id);
            let mut record = NodeRecord::from_node(node);
            record.dependencies = spec
                .edges_from(id)
                .map(|(_, e)| EdgeRecord {
                    name: spec.node(e.child).display_name().to_owned(),
                    hash: key(e.child),
                    parameters: EdgeParameters::from(&e.attributes),
                })
                .collect();
            sort_edges(&mut record.dependencies);
            record.build_spec = node.build_spec.map(|original| NodeRef {
                name: spec.node(original).display_name().to_owned(),
                hash: key(original),
            });
            record.hash = Some(key(id));
            record
        })
        .collect();
    SpecDocument {
        spec: DocumentBody {
            meta: Meta {
                version: SPEC_FORMAT_VERSION,
            },
            nodes,
        },
    }
}

/// Rebuild a spec from a current document.
///
/// The first node is the primary root, any later node that is not
/// reachable from an earlier root becomes a root of its own.
pub fn from_document(document: SpecDocument) -> Result<Spec> {
    read_document(document, true)
}

fn read_document(document: SpecDocument, verify: bool) -> Result<Spec> {
    let body = document.spec;
    if body.meta.version != SPEC_FORMAT_VERSION {
        return Err(Error::InvalidDocument(format!(
            "expected format version {SPEC_FORMAT_VERSION}, found {}",
            body.meta.version
        )));
    }
    if body.nodes.is_empty() {
        return Err(Error::InvalidDocument("document has no nodes".into()));
    }

    let mut spec = Spec::empty();
    let mut keys = HashMap::new();
    for (index, record) in body.nodes.iter().enumerate() {
        let id = spec.add_node(record.to_node()?);
        let key = record
            .hash
            .clone()
            .unwrap_or_else(|| format!("node-{index}"));
        if keys.insert(key.clone(), id).is_some() {
            return Err(Error::InvalidDocument(format!("duplicate node key '{key}'")));
        }
    }
    let lookup = |key: &str| {
        keys.get(key)
            .copied()
            .ok_or_else(|| Error::InvalidDocument(format!("no node with key '{key}'")))
    };

    for (index, record) in body.nodes.iter().enumerate() {
        let parent = NodeId(index);
        for dep in record.dependencies.iter() {
            let child = lookup(&dep.hash)?;
            spec.add_edge(parent, child, dep.parameters.clone().into())?;
        }
        if let Some(original) = &record.build_spec {
            let original = lookup(&original.hash)?;
            spec.node_mut(parent).build_spec = Some(original);
        }
    }

    for index in 0..spec.len() {
        let id = NodeId(index);
        let covered = {
            let mut covered = spec.reachable(spec.roots());
            let originals: Vec<_> = covered
                .iter()
                .filter_map(|n| spec.node(*n).build_spec)
                .collect();
            covered.extend(spec.reachable(&originals));
            covered
        };
        if !covered.contains(&id) {
            spec.add_root(id);
        }
    }

    if spec.node_ids().all(|id| spec.node(id).unresolved().is_none()) {
        if let Err(err) = spec.mark_concrete() {
            tracing::debug!(%err, "document describes an abstract spec");
        }
    }

    if verify && spec.is_concrete() {
        for (index, record) in body.nodes.iter().enumerate() {
            let Some(expected) = &record.hash else {
                continue;
            };
            let actual = spec.node_hash(NodeId(index), &DAG_HASH);
            if actual.as_str() != expected {
                tracing::warn!(
                    pkg = %spec.node(NodeId(index)).display_name(),
                    %expected,
                    %actual,
                    "stored hash does not match the node contents"
                );
            }
        }
    }
    Ok(spec)
}

/// One node of a version 4 document.
#[derive(Clone, Debug, Deserialize)]
pub struct LegacyNodeRecord {
    pub name: PkgName,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub arch: ArchSpec,
    #[serde(default)]
    pub compiler: Option<LegacyCompiler>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub external: Option<ExternalSpec>,
    #[serde(default)]
    pub package_hash: Option<SpecHash>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub full_hash: Option<String>,
    #[serde(default)]
    pub build_hash: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<LegacyEdgeRecord>,
}

impl LegacyNodeRecord {
    fn key(&self) -> Option<&String> {
        self.hash
            .as_ref()
            .or(self.full_hash.as_ref())
            .or(self.build_hash.as_ref())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LegacyCompiler {
    pub name: PkgName,
    pub version: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LegacyEdgeRecord {
    pub name: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub full_hash: Option<String>,
    #[serde(default)]
    pub build_hash: Option<String>,
    #[serde(default, rename = "type")]
    pub deptypes: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LegacyDocument {
    pub spec: LegacyBody,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LegacyBody {
    #[serde(rename = "_meta", default)]
    pub meta: Option<Meta>,
    pub nodes: Vec<LegacyNodeRecord>,
}

/// Versions in old documents were written bare when exact.
fn legacy_versions(text: Option<&str>) -> Result<VersionList> {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(VersionList::any());
    };
    if let Ok(version) = parse_version(text) {
        return Ok(VersionList::exact(version));
    }
    Ok(parse_version_list(text)?)
}

/// Rewrite a version 4 document in the current layout.
///
/// The compiler of each node becomes a direct build dependency on a
/// node of its own that provides the `c` and `cxx` virtuals. Nodes
/// using the same compiler share one compiler node.
pub fn migrate_v4_to_v5(legacy: LegacyDocument) -> Result<SpecDocument> {
    let mut nodes = Vec::new();
    let mut compilers: Vec<NodeRecord> = Vec::new();
    for old in legacy.spec.nodes {
        let key = old.key().cloned().ok_or_else(|| {
            Error::InvalidDocument(format!("node '{}' has no hash", old.name))
        })?;
        let mut dependencies = old
            .dependencies
            .iter()
            .map(|dep| {
                let hash = dep
                    .hash
                    .as_ref()
                    .or(dep.full_hash.as_ref())
                    .or(dep.build_hash.as_ref())
                    .cloned()
                    .ok_or_else(|| {
                        Error::InvalidDocument(format!("dependency '{}' has no hash", dep.name))
                    })?;
                let deptypes = DepFlag::from_names(dep.deptypes.iter().map(String::as_str))
                    .map_err(Error::InvalidDocument)?;
                Ok(EdgeRecord {
                    name: dep.name.clone(),
                    hash,
                    parameters: EdgeParameters {
                        deptypes,
                        ..Default::default()
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(compiler) = &old.compiler {
            let compiler_key = format!("compiler-{}-{}", compiler.name, compiler.version);
            if !compilers.iter().any(|c| c.hash.as_ref() == Some(&compiler_key)) {
                tracing::debug!(compiler = %compiler_key, "migrating compiler attribute to a node");
                compilers.push(NodeRecord {
                    name: Some(compiler.name.clone()),
                    version: legacy_versions(Some(&compiler.version))?,
                    arch: old.arch.clone(),
                    hash: Some(compiler_key.clone()),
                    ..Default::default()
                });
            }
            dependencies.push(EdgeRecord {
                name: compiler.name.to_string(),
                hash: compiler_key,
                parameters: EdgeParameters {
                    deptypes: DepFlag::BUILD,
                    virtuals: LEGACY_COMPILER_VIRTUALS.map(String::from).to_vec(),
                    direct: true,
                    when: None,
                },
            });
        }
        sort_edges(&mut dependencies);

        let mut parameters = old.parameters;
        // flags were always written, even when empty
        parameters.retain(|name, value| {
            FlagType::from_str(name).is_err() || value.as_array().is_none_or(|a| !a.is_empty())
        });
        nodes.push(NodeRecord {
            name: Some(old.name),
            namespace: old.namespace,
            version: legacy_versions(old.version.as_deref())?,
            arch: old.arch,
            parameters,
            external: old.external,
            package_hash: old.package_hash,
            dependencies,
            hash: Some(key),
            ..Default::default()
        });
    }
    nodes.extend(compilers);
    Ok(SpecDocument {
        spec: DocumentBody {
            meta: Meta {
                version: SPEC_FORMAT_VERSION,
            },
            nodes,
        },
    })
}

/// Read a document of any supported version.
pub fn from_value(value: Value) -> Result<Spec> {
    let version = value
        .pointer("/spec/_meta/version")
        .and_then(Value::as_u64)
        .unwrap_or(LEGACY_FORMAT_VERSION);
    match version {
        LEGACY_FORMAT_VERSION => {
            let legacy: LegacyDocument = serde_json::from_value(value)?;
            read_document(migrate_v4_to_v5(legacy)?, false)
        }
        SPEC_FORMAT_VERSION => read_document(serde_json::from_value(value)?, true),
        other => Err(Error::InvalidDocument(format!(
            "unsupported format version {other}"
        ))),
    }
}

impl Spec {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&to_document(self))?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&to_document(self))?)
    }

    pub fn from_json(text: &str) -> Result<Spec> {
        from_value(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> Result<Spec> {
        from_value(serde_yaml::from_str(text)?)
    }
}
