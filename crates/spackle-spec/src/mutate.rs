// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use spackle_foundation::variant::{Variant, VariantValue};

use crate::error::{Result, SpecMutationError};
use crate::node::{NodeId, SpecNode};
use crate::spec::Spec;

#[cfg(test)]
#[path = "./mutate_test.rs"]
mod mutate_test;

/// Checks that the variants of a rewritten node are valid for its package.
pub trait VariantValidator {
    /// Return a reason if the node can not exist as given
    fn validate(&self, node: &SpecNode) -> std::result::Result<(), String>;
}

/// Accepts any node, for when no package recipes are at hand.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissiveValidator;

impl VariantValidator for PermissiveValidator {
    fn validate(&self, _node: &SpecNode) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl<F> VariantValidator for F
where
    F: Fn(&SpecNode) -> std::result::Result<(), String>,
{
    fn validate(&self, node: &SpecNode) -> std::result::Result<(), String> {
        self(node)
    }
}

impl Spec {
    /// Rewrite every node that satisfies selector with the attributes of mutator.
    ///
    /// Unlike [`Spec::constrain`], values in mutator replace those of the
    /// node, so a concrete spec can be moved to a different version or
    /// variant value. Dependencies named in mutator rewrite the node of
    /// that name below each selected node. Names, namespaces and the
    /// shape of the graph can not be changed.
    ///
    /// Nothing is changed if an error is returned. Returns the nodes
    /// that were rewritten, whose hashes are recomputed on next use.
    pub fn mutate(
        &mut self,
        selector: &Spec,
        mutator: &Spec,
        validator: &dyn VariantValidator,
    ) -> Result<Vec<NodeId>> {
        let fail = |pkg: &str, reason: String| SpecMutationError {
            pkg: pkg.to_owned(),
            reason,
        };
        if !self.is_concrete() {
            let pkg = self.root_node().display_name().to_owned();
            return Err(fail(&pkg, "only concrete specs can be mutated".into()).into());
        }

        let selected: Vec<NodeId> = self
            .reachable(self.roots())
            .into_iter()
            .filter(|id| self.extract(*id).satisfies(selector))
            .collect();

        let mut candidate = self.clone();
        let mut rewritten = Vec::new();
        for id in selected {
            let mut targets = vec![(id, mutator.root())];
            for item in mutator.traverse_from(mutator.root()).skip(1) {
                let wanted = mutator.node(item.node);
                let Some(name) = &wanted.name else {
                    return Err(fail(
                        self.node(id).display_name(),
                        "dependencies in a mutator must be named".into(),
                    )
                    .into());
                };
                let below = candidate
                    .reachable(&[id])
                    .into_iter()
                    .find(|n| *n != id && candidate.node(*n).name.as_ref() == Some(name));
                let Some(dep) = below else {
                    return Err(fail(
                        self.node(id).display_name(),
                        format!("it has no dependency named {name}"),
                    )
                    .into());
                };
                targets.push((dep, item.node));
            }

            for (target, source) in targets {
                let mut node = candidate.node(target).clone();
                let changed = rewrite(&mut node, mutator.node(source))
                    .map_err(|reason| fail(node.display_name(), reason))?;
                if !changed {
                    continue;
                }
                validator
                    .validate(&node)
                    .map_err(|reason| fail(node.display_name(), reason))?;
                tracing::debug!(pkg = %node.display_name(), %node, "mutated node");
                *candidate.node_mut(target) = node;
                if !rewritten.contains(&target) {
                    rewritten.push(target);
                }
            }
        }
        *self = candidate;
        Ok(rewritten)
    }
}

/// Replace the attributes of node with those set on mutator.
fn rewrite(node: &mut SpecNode, mutator: &SpecNode) -> std::result::Result<bool, String> {
    if mutator.name.is_some() && mutator.name != node.name {
        return Err(format!(
            "the name can not be changed to {}",
            mutator.display_name()
        ));
    }
    if mutator.namespace.is_some() && mutator.namespace != node.namespace {
        return Err("the namespace can not be changed".into());
    }
    if mutator.abstract_hash.is_some() || mutator.external.is_some() {
        return Err("the hash and external prefix can not be changed".into());
    }
    let before = node.clone();

    if !mutator.versions.is_any() {
        if mutator.versions.concrete().is_none() {
            return Err(format!(
                "version '{}' is not a single version",
                mutator.versions
            ));
        }
        node.versions = mutator.versions.clone();
    }

    for (name, wanted) in mutator.variants.iter() {
        let value = match (node.variants.get(name).map(|v| &v.value), &wanted.value) {
            (_, VariantValue::Abstract(values)) => match node.variants.get(name) {
                Some(Variant {
                    value: VariantValue::Single(_),
                    ..
                }) if values.len() == 1 => {
                    VariantValue::Single(values.iter().next().cloned().unwrap_or_default())
                }
                Some(Variant {
                    value: VariantValue::Multi(_),
                    ..
                }) => VariantValue::Multi(values.clone()),
                Some(Variant { value, .. }) => {
                    return Err(format!(
                        "variant '{name}' takes a {} value, not '{}'",
                        value.kind(),
                        wanted.value
                    ));
                }
                None => {
                    return Err(format!(
                        "variant '{name}' is not set, its kind can not be inferred"
                    ));
                }
            },
            (Some(existing), value) if existing.kind() != value.kind() => {
                return Err(format!(
                    "variant '{name}' takes a {} value, not '{value}'",
                    existing.kind()
                ));
            }
            (_, value) => value.clone(),
        };
        node.variants.insert(
            name.clone(),
            Variant {
                value,
                propagate: wanted.propagate,
            },
        );
    }

    for (flag_type, list) in mutator.flags.iter() {
        node.flags.insert(*flag_type, list.clone());
    }

    if mutator.arch.platform.is_some() {
        node.arch.platform.clone_from(&mutator.arch.platform);
    }
    if mutator.arch.os.is_some() {
        node.arch.os.clone_from(&mutator.arch.os);
    }
    if mutator.arch.target.is_some() {
        node.arch.target.clone_from(&mutator.arch.target);
    }
    Ok(*node != before)
}
