// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Parsing of spec strings into [`Spec`] graphs.
//!
//! The grammar, over the tokens of [`crate::token`], is roughly
//!
//! ```text
//! specs      := spec*
//! spec       := node (dependency)*
//! node       := name? attribute*
//! attribute  := version | variant | key=value | /hash
//! dependency := '^' node
//!             | '^[' edge-attrs ']' node
//!             | '%' node
//!             | '%[' edge-attrs ']' node
//! ```
//!
//! `^` attaches its node below the root of the current spec, `%`
//! attaches below the node named most recently with `^` (or the root)
//! as a direct build dependency. A name that follows a complete node
//! starts a new spec.
//!
//! Conflicting constraints within one string are not errors here. The
//! first value is kept and the conflict is recorded on the spec, see
//! [`Spec::deferred_conflicts`].

use std::str::FromStr;

use spackle_foundation::arch::ArchSpec;
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::flags::{FlagList, FlagMergePolicy, FlagType};
use spackle_foundation::name::PkgName;
use spackle_foundation::variant::{Variant, VariantValue};
use spackle_foundation::version_range::parse_version_list;

use crate::context::Context;
use crate::edge::EdgeAttributes;
use crate::error::{Error, ParseError, Result, UnsatisfiableSpecError};
use crate::node::{NodeId, SpecNode};
use crate::spec::Spec;
use crate::token::{Token, TokenKind, tokenize};

#[cfg(test)]
#[path = "./parser_test.rs"]
mod parser_test;

/// Parse all of the specs in the given text.
pub fn parse(text: &str) -> Result<Vec<Spec>> {
    SpecParser::default().parse(text)
}

/// Parse text that must hold exactly one spec.
pub fn parse_one_or_raise(text: &str) -> Result<Spec> {
    SpecParser::default().parse_one_or_raise(text)
}

/// Parses spec strings under the flag policy of a [`Context`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SpecParser {
    flag_merge: FlagMergePolicy,
}

impl SpecParser {
    pub fn new(context: &Context) -> Self {
        Self {
            flag_merge: context.flag_merge(),
        }
    }

    pub fn parse(&self, text: &str) -> Result<Vec<Spec>> {
        let tokens = tokenize(text)
            .filter(|t| !matches!(t, Ok(t) if t.kind == TokenKind::Ws))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut state = State {
            text,
            tokens,
            pos: 0,
            policy: self.flag_merge,
            pending: Vec::new(),
        };
        let mut specs = Vec::new();
        while let Some(token) = state.peek() {
            if token.kind == TokenKind::EndEdgeProperties {
                return Err(state.error(&token, "unmatched ']'"));
            }
            specs.push(state.parse_spec()?);
        }
        Ok(specs)
    }

    pub fn parse_one_or_raise(&self, text: &str) -> Result<Spec> {
        let mut specs = self.parse(text)?;
        if specs.len() != 1 {
            return Err(Error::SpecCount {
                text: text.to_owned(),
                count: specs.len(),
            });
        }
        Ok(specs.remove(0))
    }
}

struct State<'a> {
    text: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
    policy: FlagMergePolicy,
    /// Conflicts seen before the spec that owns them exists
    pending: Vec<UnsatisfiableSpecError>,
}

impl<'a> State<'a> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).cloned()
    }

    fn advance(&mut self) -> Option<Token<'a>> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    fn error(&self, token: &Token<'_>, message: impl Into<String>) -> Error {
        self.error_at(token.start, message)
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> Error {
        ParseError {
            offset,
            message: message.into(),
            text: self.text.to_owned(),
        }
        .into()
    }

    fn parse_spec(&mut self) -> Result<Spec> {
        let root = self.parse_node(true)?.unwrap_or_default();
        let mut spec = Spec::new(root);
        self.flush(&mut spec);
        let mut current = spec.root();
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Dependency
                | TokenKind::StartEdgeProperties
                | TokenKind::Compiler
                | TokenKind::CompilerAndVersion => {
                    self.parse_dependency(&mut spec, &mut current)?;
                }
                _ => break,
            }
        }
        Ok(spec)
    }

    fn flush(&mut self, spec: &mut Spec) {
        for err in self.pending.drain(..) {
            spec.defer(err);
        }
    }

    fn parse_dependency(&mut self, spec: &mut Spec, current: &mut NodeId) -> Result<()> {
        let Some(token) = self.advance() else {
            return Ok(());
        };
        let (sigil, attributes, node) = match token.kind {
            TokenKind::Dependency => {
                let node = self.expect_node(&token)?;
                ('^', EdgeAttributes::default(), node)
            }
            TokenKind::StartEdgeProperties => {
                let sigil = if token.subvalue("sigil") == Some("%") {
                    '%'
                } else {
                    '^'
                };
                let mut attributes = self.parse_edge_properties(&token, sigil)?;
                attributes.direct = sigil == '%';
                let node = self.expect_node(&token)?;
                (sigil, attributes, node)
            }
            TokenKind::Compiler | TokenKind::CompilerAndVersion => {
                let mut node = SpecNode::new(self.pkg_name(&token)?);
                if let Some(version) = token.subvalue("version") {
                    node.versions = self.versions(&token, version)?;
                }
                self.parse_attributes(&mut node)?;
                ('%', EdgeAttributes::direct_build(), node)
            }
            _ => return Err(self.error(&token, format!("unexpected {token}"))),
        };
        self.flush(spec);
        let parent = if sigil == '%' { *current } else { spec.root() };
        let id = self.attach(spec, parent, node, attributes)?;
        if sigil == '^' {
            *current = id;
        }
        Ok(())
    }

    /// Add a dependency below parent, merging with any node of the same name.
    fn attach(
        &mut self,
        spec: &mut Spec,
        parent: NodeId,
        node: SpecNode,
        attributes: EdgeAttributes,
    ) -> Result<NodeId> {
        let existing = node.name.as_ref().and_then(|n| spec.find(n.as_str()));
        let id = match existing {
            Some(id) => {
                if let Err(err) = spec.constrain_node(id, &node, self.policy) {
                    spec.defer(err);
                }
                id
            }
            None => spec.add_node(node),
        };
        spec.add_edge(parent, id, attributes)?;
        Ok(id)
    }

    /// Parse a named node following a dependency sigil.
    fn expect_node(&mut self, sigil: &Token<'_>) -> Result<SpecNode> {
        let next_is_name = self.peek().is_some_and(|t| t.kind.is_name());
        if !next_is_name {
            return Err(self.error(sigil, "expected a package name"));
        }
        self.parse_node(false)?
            .ok_or_else(|| self.error(sigil, "expected a package name"))
    }

    /// Parse an optional name followed by any number of attributes.
    ///
    /// Returns nothing if there was neither.
    fn parse_node(&mut self, allow_anonymous: bool) -> Result<Option<SpecNode>> {
        let mut node = SpecNode::default();
        let mut found = false;
        match self.peek() {
            Some(token) if token.kind.is_name() => {
                self.advance();
                node.name = Some(self.pkg_name(&token)?);
                node.namespace = token.subvalue("namespace").map(str::to_owned);
                found = true;
            }
            Some(token) if !allow_anonymous => {
                return Err(self.error(&token, "expected a package name"));
            }
            _ => {}
        }
        found |= self.parse_attributes(&mut node)?;
        Ok(found.then_some(node))
    }

    /// Consume attribute tokens into node, returning true if there were any.
    fn parse_attributes(&mut self, node: &mut SpecNode) -> Result<bool> {
        let mut found = false;
        while let Some(token) = self.peek() {
            let Some(fragment) = self.parse_attribute(&token)? else {
                break;
            };
            self.advance();
            found = true;
            if let Err(err) = node.constrain(&fragment, self.policy) {
                self.pending.push(err);
            }
        }
        Ok(found)
    }

    /// A node carrying only the constraint of one attribute token.
    fn parse_attribute(&self, token: &Token<'a>) -> Result<Option<SpecNode>> {
        let mut fragment = SpecNode::default();
        match token.kind {
            TokenKind::Version | TokenKind::GitVersion | TokenKind::VersionHashPair => {
                let text = token.subvalue("version").unwrap_or_default();
                fragment.versions = self.versions(token, text)?;
            }
            TokenKind::BoolVariant | TokenKind::PropagatedBoolVariant => {
                let name = token.subvalue("name").unwrap_or_default();
                let enabled = token.subvalue("sigil").is_some_and(|s| s.starts_with('+'));
                let variant = Variant {
                    value: VariantValue::Bool(enabled),
                    propagate: token.kind == TokenKind::PropagatedBoolVariant,
                };
                fragment.variants.insert(name.to_owned(), variant);
            }
            TokenKind::KeyValuePair | TokenKind::PropagatedKeyValuePair => {
                let propagate = token.kind == TokenKind::PropagatedKeyValuePair;
                let key = token.subvalue("key").unwrap_or_default();
                let value = unquote(token.subvalue("value").unwrap_or_default());
                self.key_value(token, &mut fragment, key, value, propagate)?;
            }
            TokenKind::DagHash => {
                let hash = token.subvalue("hash").unwrap_or_default();
                fragment.abstract_hash = Some(hash.to_ascii_lowercase());
            }
            _ => return Ok(None),
        }
        Ok(Some(fragment))
    }

    fn key_value(
        &self,
        token: &Token<'_>,
        fragment: &mut SpecNode,
        key: &str,
        value: &str,
        propagate: bool,
    ) -> Result<()> {
        if let Ok(flag_type) = FlagType::from_str(key) {
            fragment
                .flags
                .insert(flag_type, FlagList::from_text(value, propagate));
            return Ok(());
        }
        let part = || (!value.is_empty() && value != "None").then(|| value.to_owned());
        match key {
            "arch" | "architecture" => {
                fragment.arch = ArchSpec::parse_triple(value)
                    .map_err(|err| self.error(token, err.to_string()))?;
            }
            "platform" => fragment.arch.platform = part(),
            "os" => fragment.arch.os = part(),
            "target" => fragment.arch.target = part(),
            "namespace" => fragment.namespace = part(),
            _ => {
                let variant = Variant {
                    value: VariantValue::from_text(value),
                    propagate,
                };
                fragment.variants.insert(key.to_owned(), variant);
            }
        }
        Ok(())
    }

    fn parse_edge_properties(&mut self, start: &Token<'_>, sigil: char) -> Result<EdgeAttributes> {
        let mut attributes = EdgeAttributes::new(if sigil == '%' {
            DepFlag::BUILD
        } else {
            DepFlag::NONE
        });
        loop {
            let Some(token) = self.advance() else {
                return Err(self.error(start, "unterminated edge attributes"));
            };
            match token.kind {
                TokenKind::EndEdgeProperties => return Ok(attributes),
                TokenKind::KeyValuePair => {
                    let key = token.subvalue("key").unwrap_or_default();
                    let value = unquote(token.subvalue("value").unwrap_or_default());
                    match key {
                        "deptypes" => {
                            attributes.depflag = DepFlag::from_str(value)
                                .map_err(|err| self.error(&token, err))?;
                        }
                        "virtuals" => {
                            attributes.virtuals.extend(
                                value
                                    .split(',')
                                    .map(str::trim)
                                    .filter(|v| !v.is_empty())
                                    .map(str::to_owned),
                            );
                        }
                        "when" => attributes.when = Some(value.to_owned()),
                        _ => {
                            return Err(self.error(
                                &token,
                                format!("unknown edge attribute '{key}'"),
                            ));
                        }
                    }
                }
                _ => {
                    return Err(self.error(
                        &token,
                        format!("unexpected {token} in edge attributes"),
                    ));
                }
            }
        }
    }

    fn pkg_name(&self, token: &Token<'_>) -> Result<PkgName> {
        let name = token.subvalue("name").unwrap_or(token.value);
        PkgName::new(name).map_err(|err| self.error(token, err.to_string()))
    }

    fn versions(
        &self,
        token: &Token<'_>,
        text: &str,
    ) -> Result<spackle_foundation::version_range::VersionList> {
        parse_version_list(text)
            .map_err(|err| self.error(token, format!("invalid version '{text}': {err}")))
    }
}

/// Strip one level of matching quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
