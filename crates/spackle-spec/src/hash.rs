// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Content hashes of spec graphs.
//!
//! A [`HashDescriptor`] selects which dependency edges and which extra
//! data take part in a hash. The hash of a node covers its own
//! attributes and, recursively, the hashes of the selected
//! dependencies, sorted so that edge order never matters.

use std::collections::BTreeMap;

use spackle_foundation::depflag::DepFlag;
use spackle_foundation::digest::{Hasher, SpecHash};

use crate::error::{Error, Result};
use crate::node::{NodeId, SpecNode};
use crate::serialize::NodeRecord;
use crate::spec::Spec;

#[cfg(test)]
#[path = "./hash_test.rs"]
mod hash_test;

/// Replaces the computed hash of a node, if it returns a value.
pub type HashOverride = fn(&SpecNode) -> Option<SpecHash>;

/// A named policy for computing a hash.
#[derive(Clone, Copy, Debug)]
pub struct HashDescriptor {
    pub name: &'static str,
    /// Dependencies along these edge types are included
    pub depflag: DepFlag,
    /// Include the hash of the package recipe
    pub package_hash: bool,
    pub override_fn: Option<HashOverride>,
    /// Only kept to read old documents, never used to write new ones
    pub legacy: bool,
}

impl PartialEq for HashDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for HashDescriptor {}

/// The identity of a concrete spec.
pub const DAG_HASH: HashDescriptor = HashDescriptor {
    name: "dag_hash",
    depflag: DepFlag::ALL,
    package_hash: true,
    override_fn: None,
    legacy: false,
};

fn recipe_hash(node: &SpecNode) -> Option<SpecHash> {
    node.package_hash.clone()
}

/// The hash of the package recipe alone.
pub const PACKAGE_HASH: HashDescriptor = HashDescriptor {
    name: "package_hash",
    depflag: DepFlag::NONE,
    package_hash: false,
    override_fn: Some(recipe_hash),
    legacy: false,
};

/// Deployment identity used before build dependencies were hashed.
pub const FULL_HASH: HashDescriptor = HashDescriptor {
    name: "full_hash",
    depflag: DepFlag::LINK_RUN,
    package_hash: true,
    override_fn: None,
    legacy: true,
};

/// Build identity used before the package recipe was hashed.
pub const BUILD_HASH: HashDescriptor = HashDescriptor {
    name: "build_hash",
    depflag: DepFlag::BUILD_LINK_RUN,
    package_hash: false,
    override_fn: None,
    legacy: true,
};

/// The set of hash descriptors known by name.
#[derive(Clone, Debug)]
pub struct HashRegistry {
    descriptors: BTreeMap<&'static str, HashDescriptor>,
}

impl Default for HashRegistry {
    fn default() -> Self {
        let mut registry = Self {
            descriptors: BTreeMap::new(),
        };
        for descriptor in [DAG_HASH, PACKAGE_HASH, FULL_HASH, BUILD_HASH] {
            registry.register(descriptor);
        }
        registry
    }
}

impl HashRegistry {
    /// Add a descriptor, replacing any existing one of the same name
    pub fn register(&mut self, descriptor: HashDescriptor) {
        self.descriptors.insert(descriptor.name, descriptor);
    }

    /// Look up a descriptor for computing or reading a hash.
    pub fn get(&self, name: &str) -> Result<&HashDescriptor> {
        self.descriptors
            .get(name)
            .ok_or_else(|| Error::UnknownHashDescriptor(name.to_owned()))
    }

    /// Look up a descriptor for producing new identifiers.
    ///
    /// Legacy descriptors are refused.
    pub fn for_writing(&self, name: &str) -> Result<&HashDescriptor> {
        let descriptor = self.get(name)?;
        if descriptor.legacy {
            return Err(Error::LegacyHashDescriptor(name.to_owned()));
        }
        Ok(descriptor)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }
}

impl Spec {
    /// The dag hash of the primary root.
    pub fn dag_hash(&self) -> SpecHash {
        self.node_hash(self.root(), &DAG_HASH)
    }

    /// The hash of the primary root under the given descriptor.
    pub fn hash_with(&self, descriptor: &HashDescriptor) -> SpecHash {
        self.node_hash(self.root(), descriptor)
    }

    /// The hash of one node under the given descriptor.
    ///
    /// Results are cached on the spec until the node or anything it
    /// depends on is modified.
    pub fn node_hash(&self, id: NodeId, descriptor: &HashDescriptor) -> SpecHash {
        if let Some(hash) = self.hashes.get(&(id, descriptor.name)) {
            return hash.clone();
        }
        let hash = self.compute_hash(id, descriptor);
        self.hashes.insert((id, descriptor.name), hash.clone());
        hash
    }

    fn compute_hash(&self, id: NodeId, descriptor: &HashDescriptor) -> SpecHash {
        let node = self.node(id);
        if let Some(hash) = descriptor.override_fn.and_then(|f| f(node)) {
            return hash;
        }
        let record = NodeRecord::for_hash(self, id, descriptor);
        let mut hasher = Hasher::new();
        // records only hold strings, lists and maps, so serializing
        // them can not fail
        match serde_json::to_vec(&record) {
            Ok(data) => hasher.update(&data),
            Err(err) => {
                tracing::error!(
                    ?err,
                    pkg = %node.display_name(),
                    "failed to serialize node for hashing"
                );
                hasher.update(format!("{record:?}").as_bytes());
            }
        }
        hasher.finish()
    }
}
