// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::digest::{Hasher, SpecHash};
use spackle_foundation::name::PkgName;
use spackle_foundation::variant::VariantValue;
use spackle_foundation::version::Version;
use spackle_foundation::version_range::VersionList;
use spackle_spec::{Spec, SpecNode, parse_one_or_raise};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./recipe_test.rs"]
mod recipe_test;

/// The closed set of ways a package can be built.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildSystem {
    #[default]
    Generic,
    Autotools,
    CMake,
    Makefile,
    Meson,
    Python,
    /// Installs nothing itself, only groups its dependencies
    Bundle,
}

/// One version that a recipe knows how to build.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VersionDecl {
    pub version: Version,
    /// Chosen over newer versions when nothing else decides
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preferred: bool,
    /// Only used when requested exactly
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

impl VersionDecl {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            preferred: false,
            deprecated: false,
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VariantKind {
    #[default]
    Bool,
    Single,
    Multi,
}

/// The default of a declared variant, as written in a recipe
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VariantDefault {
    Bool(bool),
    List(Vec<String>),
    Text(String),
}

/// A variant that a package accepts.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VariantDecl {
    pub name: String,
    #[serde(default)]
    pub kind: VariantKind,
    /// The allowed values, any value is allowed if empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<VariantDefault>,
    /// An anonymous spec the package must satisfy for the variant to exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl VariantDecl {
    /// The value used when nothing else asks for one
    pub fn default_value(&self) -> VariantValue {
        let texts: Vec<String> = match &self.default {
            Some(VariantDefault::Bool(b)) => vec![b.to_string()],
            Some(VariantDefault::List(values)) => values.clone(),
            Some(VariantDefault::Text(text)) => text
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .collect(),
            None => Vec::new(),
        };
        match self.kind {
            VariantKind::Bool => VariantValue::Bool(texts.first().is_some_and(|t| t == "true")),
            VariantKind::Single => VariantValue::Single(
                texts
                    .into_iter()
                    .next()
                    .or_else(|| self.values.first().cloned())
                    .unwrap_or_default(),
            ),
            VariantKind::Multi => VariantValue::Multi(texts.into_iter().collect()),
        }
    }

    /// Convert a requested value to the kind of this variant.
    ///
    /// Returns a reason if the value can not be used.
    pub fn coerce(&self, value: &VariantValue) -> std::result::Result<VariantValue, String> {
        let name = &self.name;
        let coerced = match (self.kind, value) {
            (VariantKind::Bool, VariantValue::Bool(_)) => value.clone(),
            (VariantKind::Single, VariantValue::Single(_)) => value.clone(),
            (VariantKind::Single, VariantValue::Abstract(values)) if values.len() == 1 => {
                VariantValue::Single(values.iter().next().cloned().unwrap_or_default())
            }
            (VariantKind::Multi, VariantValue::Multi(_)) => value.clone(),
            (VariantKind::Multi, VariantValue::Single(v)) => {
                VariantValue::Multi(BTreeSet::from([v.clone()]))
            }
            (VariantKind::Multi, VariantValue::Abstract(values)) => {
                VariantValue::Multi(values.clone())
            }
            (kind, value) => {
                return Err(format!(
                    "variant '{name}' is a {kind} variant, not {}={value}",
                    value.kind()
                ));
            }
        };
        if self.kind != VariantKind::Bool && !self.values.is_empty() {
            if let Some(bad) = coerced
                .values()
                .into_iter()
                .find(|v| !self.values.contains(v))
            {
                return Err(format!(
                    "'{bad}' is not a valid value for variant '{name}', expected one of {}",
                    self.values.join(", ")
                ));
            }
        }
        Ok(coerced)
    }
}

fn default_deptypes() -> DepFlag {
    DepFlag::BUILD | DepFlag::LINK
}

/// A dependency declared by a recipe.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DependencyDecl {
    /// A single named node, possibly naming a virtual package
    pub spec: String,
    #[serde(default = "default_deptypes")]
    pub deptypes: DepFlag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// A virtual package that a recipe can stand in for.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProvidesDecl {
    /// The virtual name, optionally with the versions provided
    pub spec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// A combination that a recipe can not be built with.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConflictDecl {
    /// An anonymous spec, checked against the package and its dependencies
    pub spec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// The declared metadata of one package.
///
/// Recipes are data only, nothing in them is ever executed. The
/// source text is kept so that the package hash changes whenever the
/// build instructions do.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageRecipe {
    pub name: PkgName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub build_system: BuildSystem,
    pub versions: Vec<VersionDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<VariantDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<ProvidesDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictDecl>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// The parts of a recipe covered by its hash besides the source
#[derive(Serialize)]
struct HashedMetadata<'a> {
    name: &'a PkgName,
    namespace: &'a Option<String>,
    build_system: BuildSystem,
    versions: &'a [VersionDecl],
    variants: &'a [VariantDecl],
    dependencies: &'a [DependencyDecl],
    provides: &'a [ProvidesDecl],
    conflicts: &'a [ConflictDecl],
}

impl PackageRecipe {
    pub fn new(name: PkgName) -> Self {
        Self {
            name,
            namespace: None,
            build_system: BuildSystem::default(),
            versions: Vec::new(),
            variants: Vec::new(),
            dependencies: Vec::new(),
            provides: Vec::new(),
            conflicts: Vec::new(),
            source: String::new(),
        }
    }

    /// Read and validate a recipe from yaml.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let recipe: PackageRecipe = serde_yaml::from_str(text)?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Check that every spec string in this recipe can be used.
    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(self.invalid("no versions are declared"));
        }
        for decl in self.dependencies.iter() {
            let spec = self.parse(&decl.spec)?;
            if spec.root_node().name.is_none() || spec.len() > 1 {
                return Err(self.invalid(format!(
                    "dependency '{}' must name exactly one package",
                    decl.spec
                )));
            }
            if decl.deptypes.is_empty() {
                return Err(self.invalid(format!("dependency '{}' has no type", decl.spec)));
            }
        }
        for decl in self.provides.iter() {
            if self.parse(&decl.spec)?.root_node().name.is_none() {
                return Err(self.invalid(format!("provided '{}' has no name", decl.spec)));
            }
        }
        for decl in self.conflicts.iter() {
            self.parse(&decl.spec)?;
        }
        let whens = self
            .variants
            .iter()
            .filter_map(|d| d.when.as_ref())
            .chain(self.dependencies.iter().filter_map(|d| d.when.as_ref()))
            .chain(self.provides.iter().filter_map(|d| d.when.as_ref()))
            .chain(self.conflicts.iter().filter_map(|d| d.when.as_ref()));
        for when in whens {
            self.condition(when)?;
        }
        Ok(())
    }

    fn invalid(&self, reason: impl ToString) -> Error {
        Error::invalid_recipe(&self.name, reason)
    }

    fn parse(&self, text: &str) -> Result<Spec> {
        parse_one_or_raise(text).map_err(|err| self.invalid(format!("'{text}': {err}")))
    }

    /// Parse a `when` condition, which may only constrain the package itself
    fn condition(&self, when: &str) -> Result<SpecNode> {
        let spec = self.parse(when)?;
        if spec.len() > 1 {
            return Err(self.invalid(format!(
                "condition '{when}' can only constrain {} itself",
                self.name
            )));
        }
        Ok(spec.root_node().clone())
    }

    /// True if the node satisfies the given condition, or there is none
    pub fn condition_holds(&self, when: Option<&str>, node: &SpecNode) -> Result<bool> {
        let Some(when) = when else {
            return Ok(true);
        };
        let mut condition = self.condition(when)?;
        if condition.name.take().is_some_and(|n| n != self.name) {
            return Ok(false);
        }
        Ok(node.satisfies(&condition))
    }

    pub fn version(&self, version: &Version) -> Option<&VersionDecl> {
        self.versions.iter().find(|v| &v.version == version)
    }

    pub fn variant(&self, name: &str) -> Option<&VariantDecl> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// True if any version of this recipe can stand in for the virtual
    pub fn can_provide(&self, virtual_name: &str) -> bool {
        self.provides.iter().any(|decl| {
            self.parse(&decl.spec)
                .is_ok_and(|s| s.name().is_some_and(|n| n == virtual_name))
        })
    }

    /// The versions of a virtual that the node provides, if any.
    pub fn provided_versions(
        &self,
        virtual_name: &str,
        node: &SpecNode,
    ) -> Result<Option<VersionList>> {
        let mut provided: Option<VersionList> = None;
        for decl in self.provides.iter() {
            let spec = self.parse(&decl.spec)?;
            if !spec.name().is_some_and(|n| n == virtual_name)
                || !self.condition_holds(decl.when.as_deref(), node)?
            {
                continue;
            }
            let versions = spec.root_node().versions.clone();
            provided = Some(match provided {
                None => versions,
                Some(existing) => {
                    let items = existing.items().iter().chain(versions.items()).cloned();
                    VersionList::new(items).unwrap_or(existing)
                }
            });
        }
        Ok(provided)
    }

    /// The declared dependencies that apply to the node, as parsed nodes.
    pub fn active_dependencies(&self, node: &SpecNode) -> Result<Vec<(SpecNode, &DependencyDecl)>> {
        let mut active = Vec::new();
        for decl in self.dependencies.iter() {
            if self.condition_holds(decl.when.as_deref(), node)? {
                active.push((self.parse(&decl.spec)?.root_node().clone(), decl));
            }
        }
        Ok(active)
    }

    /// The declared conflicts whose condition holds for the node.
    pub fn active_conflicts(&self, node: &SpecNode) -> Result<Vec<(Spec, &ConflictDecl)>> {
        let mut active = Vec::new();
        for decl in self.conflicts.iter() {
            if self.condition_holds(decl.when.as_deref(), node)? {
                active.push((self.parse(&decl.spec)?, decl));
            }
        }
        Ok(active)
    }

    /// The canonical hash of this recipe.
    ///
    /// Formatting-only changes to the source do not change it.
    pub fn package_hash(&self) -> Result<SpecHash> {
        let metadata = HashedMetadata {
            name: &self.name,
            namespace: &self.namespace,
            build_system: self.build_system,
            versions: &self.versions,
            variants: &self.variants,
            dependencies: &self.dependencies,
            provides: &self.provides,
            conflicts: &self.conflicts,
        };
        let mut hasher = Hasher::new();
        hasher.update(canonical_source(&self.source).as_bytes());
        hasher.update(b"\0");
        hasher.update(&serde_json::to_vec(&metadata)?);
        Ok(hasher.finish())
    }
}

static DOCSTRING_DOUBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?ms)^[ \t]*""".*?"""[ \t]*$"#).expect("docstring pattern is valid")
});
static DOCSTRING_SINGLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ms)^[ \t]*'''.*?'''[ \t]*$").expect("docstring pattern is valid")
});

/// Reduce recipe source text to the form that is hashed.
///
/// Docstrings, comments and blank lines are dropped, runs of
/// whitespace are collapsed, indentation is kept as a width.
pub fn canonical_source(source: &str) -> String {
    let source = DOCSTRING_DOUBLE.replace_all(source, "");
    let source = DOCSTRING_SINGLE.replace_all(&source, "");
    let mut out = String::new();
    for line in source.lines() {
        let code = strip_comment(line);
        let body = collapse_whitespace(code);
        if body.is_empty() {
            continue;
        }
        let indent: usize = code
            .chars()
            .take_while(|c| c.is_whitespace())
            .map(|c| if c == '\t' { 4 } else { 1 })
            .sum();
        out.push_str(&" ".repeat(indent));
        out.push_str(&body);
        out.push('\n');
    }
    out
}

/// Trim a line and squeeze runs of whitespace to one space, leaving
/// string literals untouched.
fn collapse_whitespace(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut pending_space = false;
    for c in code.trim().chars() {
        if quote.is_none() && c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
        match (quote, c) {
            (Some(_), '\\') if !escaped => {
                escaped = true;
                continue;
            }
            (Some(q), c) if c == q && !escaped => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            _ => {}
        }
        escaped = false;
    }
    out
}

/// The part of a line before any `#` that is not inside a string
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (Some(_), '\\') if !escaped => {
                escaped = true;
                continue;
            }
            (Some(q), c) if c == q && !escaped => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, '#') => return &line[..i],
            _ => {}
        }
        escaped = false;
    }
    line
}
