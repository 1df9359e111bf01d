// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Spec graphs for use in tests.

use std::collections::HashMap;

use rstest::fixture;
use spackle_foundation::arch::ArchSpec;
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::name::PkgName;
use spackle_foundation::version::parse_version;
use spackle_foundation::version_range::VersionList;

use crate::{EdgeAttributes, NodeId, Spec, SpecNode};

/// The architecture given to every node built here
pub fn test_arch() -> ArchSpec {
    ArchSpec::new("linux", "ubuntu22_04", "x86_64")
}

/// A fully determined node that is not yet part of any spec.
pub fn concrete_node(name: &str, version: &str) -> SpecNode {
    let mut node = SpecNode::new(PkgName::new(name).expect("valid test package name"));
    node.versions = VersionList::exact(parse_version(version).expect("valid test version"));
    node.arch = test_arch();
    node
}

/// Build and mark concrete a graph of `name@version` nodes.
///
/// The first node is the root. Edges are `(parent, child, depflag)`
/// and are added in the order given.
pub fn concrete_graph(nodes: &[(&str, &str)], edges: &[(&str, &str, DepFlag)]) -> Spec {
    let mut ids: HashMap<&str, NodeId> = HashMap::new();
    let mut spec: Option<Spec> = None;
    for (name, version) in nodes {
        let node = concrete_node(name, version);
        let id = match spec.as_mut() {
            None => {
                let created = Spec::new(node);
                let root = created.root();
                spec = Some(created);
                root
            }
            Some(spec) => spec.add_node(node),
        };
        ids.insert(*name, id);
    }
    let mut spec = spec.expect("at least one test node");
    for (parent, child, depflag) in edges {
        spec.add_edge(ids[parent], ids[child], EdgeAttributes::new(*depflag))
            .expect("test graph is acyclic");
    }
    spec.mark_concrete().expect("test graph is concrete");
    spec
}

/// `a` depends on `b` and `c`, which both depend on `d`.
#[fixture]
pub fn diamond() -> Spec {
    concrete_graph(
        &[("a", "1.0"), ("b", "1.0"), ("c", "1.0"), ("d", "1.0")],
        &[
            ("a", "b", DepFlag::LINK_RUN),
            ("a", "c", DepFlag::BUILD),
            ("b", "d", DepFlag::LINK),
            ("c", "d", DepFlag::RUN),
        ],
    )
}

/// An application using an mpi provider and zlib, with a build tool.
#[fixture]
pub fn mpi_app() -> Spec {
    let mut spec = concrete_graph(
        &[
            ("app", "2.1"),
            ("mpich", "4.1"),
            ("zlib", "1.3"),
            ("cmake", "3.27"),
        ],
        &[
            ("app", "mpich", DepFlag::BUILD | DepFlag::LINK),
            ("app", "zlib", DepFlag::LINK),
            ("app", "cmake", DepFlag::BUILD),
            ("mpich", "zlib", DepFlag::LINK),
        ],
    );
    let root = spec.root();
    let mpich = spec.find("mpich").expect("mpich is in the graph");
    spec.add_edge(
        root,
        mpich,
        EdgeAttributes::default().with_virtuals(["mpi"]),
    )
    .expect("test graph is acyclic");
    spec
}
