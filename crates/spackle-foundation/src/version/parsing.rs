// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1, take_while_m_n};
use nom::character::complete::{alpha1, char, digit1, one_of, satisfy};
use nom::combinator::{map, map_res, not, opt, peek, recognize};
use nom::error::{ContextError, FromExternalError, ParseError, context};
use nom::multi::many0;
use nom::sequence::{pair, preceded, terminated};

use super::{GitVersion, Version, VersionPart};

/// Characters that separate the components of a version.
pub const VERSION_SEPARATORS: &str = ".-_";

fn part<'a, E>(input: &'a str) -> IResult<&'a str, VersionPart, E>
where
    E: ParseError<&'a str> + FromExternalError<&'a str, std::num::ParseIntError>,
{
    alt((
        map_res(digit1, |n: &str| n.parse::<u64>().map(VersionPart::Number)),
        map(alpha1, |s: &str| VersionPart::Alpha(s.to_owned())),
    ))(input)
}

/// Parse a version string into a [`Version`].
///
/// A version is a sequence of numeric and alphabetic components.
/// Components are split at any of `.`, `-` or `_` as well as at
/// every transition between digits and letters.
///
/// Examples:
/// - `"1.2.3"`
/// - `"8.1_1e"`
/// - `"2024-01-15"`
/// - `"develop"`
/// - `"1.0rc1"`
pub fn version<'a, E>(input: &'a str) -> IResult<&'a str, Version, E>
where
    E: ParseError<&'a str>
        + ContextError<&'a str>
        + FromExternalError<&'a str, std::num::ParseIntError>,
{
    let (rest, parsed) = context("version", recognize(version_str))(input)?;
    let (_, (first, others)) = pair(
        part::<E>,
        many0(preceded(opt(one_of(VERSION_SEPARATORS)), part)),
    )(parsed)?;
    let mut parts = Vec::with_capacity(others.len() + 1);
    parts.push(first);
    parts.extend(others);
    Ok((
        rest,
        Version {
            string: parsed.to_owned(),
            parts,
        },
    ))
}

/// Recognize a version string without interpreting it.
pub fn version_str<'a, E>(input: &'a str) -> IResult<&'a str, &'a str, E>
where
    E: ParseError<&'a str>,
{
    recognize(pair(
        alt((digit1, alpha1)),
        many0(pair(opt(one_of(VERSION_SEPARATORS)), alt((digit1, alpha1)))),
    ))(input)
}

fn is_git_ref_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

/// Recognize a full 40 character commit sha.
pub fn commit_sha<'a, E>(input: &'a str) -> IResult<&'a str, &'a str, E>
where
    E: ParseError<&'a str>,
{
    terminated(
        take_while_m_n(40, 40, |c: char| c.is_ascii_hexdigit()),
        not(peek(satisfy(is_git_ref_char))),
    )(input)
}

/// Parse a git version reference.
///
/// Either `git.<ref>` for any branch, tag or commit, or a bare
/// 40 character commit sha, followed by an optional `=<version>`
/// that declares which standard version the reference corresponds to.
///
/// Examples:
/// - `"git.develop"`
/// - `"git.v1.2.3=1.2.3"`
/// - `"0123456789abcdef0123456789abcdef01234567=2.1"`
pub fn git_version<'a, E>(input: &'a str) -> IResult<&'a str, GitVersion, E>
where
    E: ParseError<&'a str>
        + ContextError<&'a str>
        + FromExternalError<&'a str, std::num::ParseIntError>,
{
    let git_ref = alt((
        preceded(
            tag("git."),
            recognize(pair(
                satisfy(|c: char| c.is_ascii_alphanumeric() || c == '_'),
                opt(take_while1(is_git_ref_char)),
            )),
        ),
        commit_sha,
    ));
    context(
        "git version",
        map(
            pair(git_ref, opt(preceded(char('='), version))),
            |(git_ref, ref_version): (&str, Option<Version>)| GitVersion {
                git_ref: git_ref.to_owned(),
                ref_version,
            },
        ),
    )(input)
}
