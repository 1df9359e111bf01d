// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Lexing of spec strings.
//!
//! Every [`TokenKind`] owns a regex fragment. The fragments are joined
//! into one alternation in declaration order, so a kind listed earlier
//! wins over a later one at the same position. Within a kind, the
//! regex repetition operators are greedy, which means `+debug-qt_4` is
//! a single boolean variant named `debug-qt_4` and never `+debug`
//! followed by `-qt_4`. Whitespace is required to separate the two.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TokenizeError;

#[cfg(test)]
#[path = "./token_test.rs"]
mod token_test;

const NAME: &str = r"[A-Za-z0-9_][A-Za-z0-9_\-]*";
const DOTTED_NAME: &str = r"[A-Za-z0-9_][A-Za-z0-9_.\-]*";
const VALUE: &str = r#"(?:'[^']*'|"[^"]*"|[A-Za-z0-9_\-+*.,:=~/\\]+)"#;
const VERSION: &str = r"=?[A-Za-z0-9_][A-Za-z0-9_.\-]*";
const GIT_REF: &str = r"(?:git\.[A-Za-z0-9_][A-Za-z0-9_./\-]*|[0-9a-fA-F]{40})";
const HASH: &str = r"[a-zA-Z0-9]+";

fn version_list() -> String {
    let range = format!(r"(?:{VERSION})?\s*:(?:{VERSION}|\s+[0-9][A-Za-z0-9_.\-]*)?");
    let item = format!(r"(?:{range}|{VERSION})");
    format!(r"{item}(?:\s*,\s*{item})*")
}

/// The kinds of token in a spec string, in match priority order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumIter, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum TokenKind {
    /// `^[` or `%[`
    StartEdgeProperties,
    EndEdgeProperties,
    /// `^`
    Dependency,
    /// `@git.ref=1.2` or `@<sha>=1.2`
    VersionHashPair,
    /// `@git.ref` or `@<sha>`
    GitVersion,
    /// `@1.2:1.4,1.6`
    Version,
    /// `++name`, `~~name` or `--name`
    PropagatedBoolVariant,
    /// `+name`, `~name` or `-name`
    BoolVariant,
    /// `key==value`
    PropagatedKeyValuePair,
    /// `key=value`
    KeyValuePair,
    /// `%name@1.2`
    CompilerAndVersion,
    /// `%name`
    Compiler,
    /// `namespace.name`
    FullyQualifiedName,
    UnqualifiedName,
    /// `/hash`
    DagHash,
    Ws,
}

impl TokenKind {
    fn pattern(&self) -> String {
        match self {
            Self::StartEdgeProperties => r"(?P<sigil>[\^%])\[".to_owned(),
            Self::EndEdgeProperties => r"\]".to_owned(),
            Self::Dependency => r"\^".to_owned(),
            Self::VersionHashPair => {
                format!(r"@\s*(?P<version>{GIT_REF}\s*=\s*{VERSION})")
            }
            Self::GitVersion => format!(r"@\s*(?P<version>{GIT_REF})"),
            Self::Version => format!(r"@\s*(?P<version>{})", version_list()),
            Self::PropagatedBoolVariant => {
                format!(r"(?P<sigil>\+\+|~~|--)\s*(?P<name>{DOTTED_NAME})")
            }
            Self::BoolVariant => format!(r"(?P<sigil>[~+\-])\s*(?P<name>{DOTTED_NAME})"),
            Self::PropagatedKeyValuePair => {
                format!(r"(?P<key>{DOTTED_NAME})\s*==\s*(?P<value>{VALUE})")
            }
            Self::KeyValuePair => format!(r"(?P<key>{DOTTED_NAME})\s*=\s*(?P<value>{VALUE})"),
            Self::CompilerAndVersion => format!(
                r"%\s*(?P<name>{DOTTED_NAME})\s*@\s*(?P<version>{})",
                version_list()
            ),
            Self::Compiler => format!(r"%\s*(?P<name>{DOTTED_NAME})"),
            Self::FullyQualifiedName => {
                format!(r"(?P<namespace>{NAME}(?:\.{NAME})*)\.(?P<name>{NAME})")
            }
            Self::UnqualifiedName => format!(r"(?P<name>{NAME})"),
            Self::DagHash => format!(r"/\s*(?P<hash>{HASH})"),
            Self::Ws => r"\s+".to_owned(),
        }
    }

    /// True for the kinds that carry a package name
    pub fn is_name(&self) -> bool {
        matches!(self, Self::FullyQualifiedName | Self::UnqualifiedName)
    }
}

struct Grammar {
    regex: Regex,
    kinds: Vec<KindGroups>,
}

struct KindGroups {
    kind: TokenKind,
    group: String,
    /// (subvalue name, prefixed group name)
    subvalues: Vec<(&'static str, String)>,
}

const SUBVALUES: &[&str] = &["sigil", "version", "name", "key", "value", "namespace", "hash"];

static GRAMMAR: Lazy<Grammar> = Lazy::new(|| {
    use strum::IntoEnumIterator;

    let mut alternatives = Vec::new();
    let mut kinds = Vec::new();
    for kind in TokenKind::iter() {
        let group = kind.as_ref().to_owned();
        let mut pattern = kind.pattern();
        let mut subvalues = Vec::new();
        for sub in SUBVALUES {
            let original = format!("(?P<{sub}>");
            if pattern.contains(&original) {
                let prefixed = format!("{group}_{sub}");
                pattern = pattern.replace(&original, &format!("(?P<{prefixed}>"));
                subvalues.push((*sub, prefixed));
            }
        }
        alternatives.push(format!("(?P<{group}>{pattern})"));
        kinds.push(KindGroups {
            kind,
            group,
            subvalues,
        });
    }
    let combined = format!("^(?:{})", alternatives.join("|"));
    Grammar {
        regex: Regex::new(&combined).expect("spec token grammar is a valid regex"),
        kinds,
    }
});

/// One lexed piece of a spec string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub value: &'a str,
    /// Byte offset of the token in the input
    pub start: usize,
    pub end: usize,
    subvalues: Vec<(&'static str, &'a str)>,
}

impl<'a> Token<'a> {
    /// A named part of the token, such as the `name` of a variant
    pub fn subvalue(&self, name: &str) -> Option<&'a str> {
        self.subvalues
            .iter()
            .find_map(|(n, v)| (*n == name).then_some(*v))
    }
}

impl std::fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:?})", self.kind, self.value)
    }
}

/// A lazy stream of tokens over a spec string.
///
/// The stream stops after the first error. Cloning it gives an
/// independent cursor at the same position.
#[derive(Clone, Debug)]
pub struct Tokenizer<'a> {
    text: &'a str,
    pos: usize,
    failed: bool,
}

/// Lex the given text.
pub fn tokenize(text: &str) -> Tokenizer<'_> {
    Tokenizer {
        text,
        pos: 0,
        failed: false,
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token<'a>, TokenizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.text.len() {
            return None;
        }
        let text: &'a str = self.text;
        let rest = &text[self.pos..];
        let grammar = &*GRAMMAR;
        let Some(captures) = grammar.regex.captures(rest) else {
            self.failed = true;
            return Some(Err(TokenizeError {
                offset: self.pos,
                text: self.text.to_owned(),
            }));
        };
        let Some((groups, whole)) = grammar
            .kinds
            .iter()
            .find_map(|k| captures.name(&k.group).map(|m| (k, m)))
        else {
            self.failed = true;
            return Some(Err(TokenizeError {
                offset: self.pos,
                text: self.text.to_owned(),
            }));
        };
        let subvalues = groups
            .subvalues
            .iter()
            .filter_map(|(sub, group)| captures.name(group).map(|m| (*sub, m.as_str())))
            .collect();
        let token = Token {
            kind: groups.kind,
            value: whole.as_str(),
            start: self.pos + whole.start(),
            end: self.pos + whole.end(),
            subvalues,
        };
        self.pos = token.end;
        Some(Ok(token))
    }
}
