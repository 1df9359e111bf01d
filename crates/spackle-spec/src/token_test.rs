// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use rstest::rstest;

use super::{TokenKind, tokenize};

fn kinds(text: &str) -> Vec<(TokenKind, String)> {
    tokenize(text)
        .map(|t| t.unwrap())
        .filter(|t| t.kind != TokenKind::Ws)
        .map(|t| (t.kind, t.value.to_owned()))
        .collect()
}

#[rstest]
fn test_tokenize_benchmark_string() {
    let text = "mvapich_foo ^_openmpi@1.2:1.4,1.6+debug~qt_4 %intel@12.1 ^stackwalker@8.1_1e";
    let expected = vec![
        (TokenKind::UnqualifiedName, "mvapich_foo"),
        (TokenKind::Dependency, "^"),
        (TokenKind::UnqualifiedName, "_openmpi"),
        (TokenKind::Version, "@1.2:1.4,1.6"),
        (TokenKind::BoolVariant, "+debug"),
        (TokenKind::BoolVariant, "~qt_4"),
        (TokenKind::CompilerAndVersion, "%intel@12.1"),
        (TokenKind::Dependency, "^"),
        (TokenKind::UnqualifiedName, "stackwalker"),
        (TokenKind::Version, "@8.1_1e"),
    ];
    let expected: Vec<_> = expected
        .into_iter()
        .map(|(k, v)| (k, v.to_owned()))
        .collect();
    assert_eq!(kinds(text), expected);
}

#[rstest]
#[case("+debug-qt_4", &[(TokenKind::BoolVariant, "+debug-qt_4")])]
#[case("+debug -qt_4", &[(TokenKind::BoolVariant, "+debug"), (TokenKind::BoolVariant, "-qt_4")])]
#[case("+debug~qt_4", &[(TokenKind::BoolVariant, "+debug"), (TokenKind::BoolVariant, "~qt_4")])]
#[case("++debug", &[(TokenKind::PropagatedBoolVariant, "++debug")])]
#[case("--debug", &[(TokenKind::PropagatedBoolVariant, "--debug")])]
#[case("+ debug", &[(TokenKind::BoolVariant, "+ debug")])]
fn test_adjacent_variant_operators_are_greedy(
    #[case] text: &str,
    #[case] expected: &[(TokenKind, &str)],
) {
    let expected: Vec<_> = expected
        .iter()
        .map(|(k, v)| (*k, (*v).to_owned()))
        .collect();
    assert_eq!(kinds(text), expected);
}

#[rstest]
#[case("@1.2", TokenKind::Version, "1.2")]
#[case("@ 1.2 : 1.4", TokenKind::Version, "1.2 : 1.4")]
#[case("@:1.4", TokenKind::Version, ":1.4")]
#[case("@1.2:", TokenKind::Version, "1.2:")]
#[case("@=1.2", TokenKind::Version, "=1.2")]
#[case("@git.main", TokenKind::GitVersion, "git.main")]
#[case("@git.feature/x=1.0", TokenKind::VersionHashPair, "git.feature/x=1.0")]
#[case(
    "@0123456789abcdef0123456789abcdef01234567=2.1",
    TokenKind::VersionHashPair,
    "0123456789abcdef0123456789abcdef01234567=2.1"
)]
fn test_version_tokens(#[case] text: &str, #[case] kind: TokenKind, #[case] version: &str) {
    let tokens: Vec<_> = tokenize(text).map(|t| t.unwrap()).collect();
    assert_eq!(tokens.len(), 1, "{tokens:?}");
    assert_eq!(tokens[0].kind, kind);
    assert_eq!(tokens[0].subvalue("version"), Some(version));
}

#[rstest]
fn test_key_value_subvalues() {
    let tokens: Vec<_> = tokenize("cflags==\"-O3 -g\" build_type = Release")
        .map(|t| t.unwrap())
        .filter(|t| t.kind != TokenKind::Ws)
        .collect();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].kind, TokenKind::PropagatedKeyValuePair);
    assert_eq!(tokens[0].subvalue("key"), Some("cflags"));
    assert_eq!(tokens[0].subvalue("value"), Some("\"-O3 -g\""));
    assert_eq!(tokens[1].kind, TokenKind::KeyValuePair);
    assert_eq!(tokens[1].subvalue("value"), Some("Release"));
}

#[rstest]
fn test_whitespace_around_operators() {
    let found = kinds("% intel @ 12.1");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0, TokenKind::CompilerAndVersion);
}

#[rstest]
fn test_namespaced_name() {
    let tokens: Vec<_> = tokenize("builtin.zlib").map(|t| t.unwrap()).collect();
    assert_eq!(tokens[0].kind, TokenKind::FullyQualifiedName);
    assert_eq!(tokens[0].subvalue("namespace"), Some("builtin"));
    assert_eq!(tokens[0].subvalue("name"), Some("zlib"));
}

#[rstest]
fn test_edge_properties() {
    let found = kinds("^[virtuals=mpi deptypes=build,link] openmpi");
    let found: Vec<_> = found.into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        found,
        vec![
            TokenKind::StartEdgeProperties,
            TokenKind::KeyValuePair,
            TokenKind::KeyValuePair,
            TokenKind::EndEdgeProperties,
            TokenKind::UnqualifiedName,
        ]
    );
}

#[rstest]
fn test_offsets_are_absolute() {
    let tokens: Vec<_> = tokenize("x ^y").map(|t| t.unwrap()).collect();
    let y = tokens.last().unwrap();
    assert_eq!((y.start, y.end), (3, 4));
}

#[rstest]
#[case("x ! y", 2)]
#[case("x@1.2 $", 6)]
fn test_unrecognized_input_reports_offset(#[case] text: &str, #[case] offset: usize) {
    let err = tokenize(text)
        .find_map(|t| t.err())
        .expect("expected a tokenize error");
    assert_eq!(err.offset, offset);
}

#[rstest]
fn test_stream_is_lazy_and_restartable() {
    let stream = tokenize("a b c ! d");
    let first: Vec<_> = stream.clone().take(3).map(|t| t.unwrap().value).collect();
    assert_eq!(first, vec!["a", " ", "b"]);
    // the error is only produced once the scanner reaches it
    assert_eq!(stream.clone().filter(|t| t.is_err()).count(), 1);
    assert_eq!(stream.count(), 7);
}
