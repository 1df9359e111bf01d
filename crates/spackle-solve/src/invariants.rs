// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeMap;

use spackle_foundation::depflag::DepFlag;
use spackle_spec::Spec;
use spackle_spec::traverse::topological_order;

use crate::{ConcretizationError, RuleSet};

#[cfg(test)]
#[path = "./invariants_test.rs"]
mod invariants_test;

/// Check that a spec is a valid concrete spec under the given rules.
///
/// This holds for the output of any concretizer and for anything
/// read back from an install database.
pub fn check_invariants(spec: &Spec, rules: &RuleSet) -> Result<(), ConcretizationError> {
    let root_name = spec.root_node().display_name().to_owned();
    let violated = |pkg: &str, reason: String| ConcretizationError::InvariantViolated {
        pkg: pkg.to_owned(),
        reason,
    };

    if let Some(conflict) = spec.deferred_conflicts().first() {
        return Err(violated(&root_name, conflict.to_string()));
    }
    if let Err(err) = topological_order(spec, spec.roots(), DepFlag::ALL) {
        return Err(violated(&root_name, err.to_string()));
    }

    let mut names = BTreeMap::new();
    for id in spec.reachable(spec.roots()) {
        let node = spec.node(id);
        let name = node.display_name();
        if let Some(reason) = node.unresolved() {
            return Err(violated(name, reason));
        }
        if !node.is_concrete() {
            return Err(violated(name, "node is not marked concrete".into()));
        }
        if let Some(other) = names.insert(name.to_owned(), id) {
            if spec.node_hash(other, &spackle_spec::hash::DAG_HASH)
                != spec.node_hash(id, &spackle_spec::hash::DAG_HASH)
            {
                return Err(violated(
                    name,
                    "the package appears more than once with different configurations".into(),
                ));
            }
        }
        if node.is_external() && spec.edges_from(id).next().is_some() {
            return Err(violated(name, "an external has dependencies".into()));
        }
        for (_, edge) in spec.edges_from(id) {
            let child = spec.node(edge.child).display_name();
            if edge.depflag().is_empty() {
                return Err(violated(name, format!("dependency on {child} has no type")));
            }
            let Some(recipe) = rules.recipe(child) else {
                continue;
            };
            if let Some(v) = edge.virtuals().iter().find(|v| !recipe.can_provide(v)) {
                return Err(violated(
                    name,
                    format!("{child} is used as {v}, which it does not provide"),
                ));
            }
        }
    }
    Ok(())
}
