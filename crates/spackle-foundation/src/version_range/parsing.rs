// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use nom::branch::alt;
use nom::character::complete::char;
use nom::combinator::{map, opt};
use nom::error::{ContextError, FromExternalError, ParseError, context};
use nom::sequence::{pair, preceded};
use nom::{IResult, InputLength, Parser};

use super::{ExactVersion, VersionConstraint, VersionRange};
use crate::version::parsing::{git_version, version};

/// A clone of `separated_list1` but uses `cut` on the 2nd and later elements.
pub(crate) fn separated_list1_with_cut<I, O, O2, E, F, G>(
    mut sep: G,
    mut f: F,
) -> impl FnMut(I) -> IResult<I, Vec<O>, E>
where
    I: Clone + InputLength,
    F: Parser<I, O, E>,
    G: Parser<I, O2, E>,
    E: ParseError<I>,
{
    use nom::Err;
    use nom::error::ErrorKind;

    move |mut i: I| {
        let mut res = Vec::new();

        match f.parse(i.clone()) {
            Err(e) => return Err(e),
            Ok((i1, o)) => {
                res.push(o);
                i = i1;
            }
        }

        loop {
            let len = i.input_len();
            match sep.parse(i.clone()) {
                Err(Err::Error(_)) => return Ok((i, res)),
                Err(e) => return Err(e),
                Ok((i1, _)) => {
                    // infinite loop check: the parser must always consume
                    if i1.input_len() == len {
                        return Err(Err::Error(E::from_error_kind(i1, ErrorKind::SeparatedList)));
                    }

                    match f.parse(i1.clone()) {
                        // a dangling separator is a failure, not the end of the list
                        Err(Err::Error(e)) => return Err(Err::Failure(e)),
                        Err(e) => return Err(e),
                        Ok((i2, o)) => {
                            res.push(o);
                            i = i2;
                        }
                    }
                }
            }
        }
    }
}

/// Parse one element of a version list.
///
/// Examples:
/// - `"=1.2"` an exact version
/// - `"git.main=1.2"` a git reference
/// - `"1.2:1.4"`, `"1.2:"`, `":1.4"`, `":"` a range
/// - `"1.2"` shorthand for `1.2:1.2`
pub fn version_constraint<'a, E>(input: &'a str) -> IResult<&'a str, VersionConstraint, E>
where
    E: ParseError<&'a str>
        + ContextError<&'a str>
        + FromExternalError<&'a str, std::num::ParseIntError>,
{
    context(
        "version constraint",
        alt((
            map(preceded(char('='), version), |version| {
                VersionConstraint::Exact(ExactVersion { version })
            }),
            map(git_version, VersionConstraint::Git),
            map(
                pair(opt(version), preceded(char(':'), opt(version))),
                |(lo, hi)| VersionConstraint::Range(VersionRange { lo, hi }),
            ),
            map(version, |v| {
                VersionConstraint::Range(VersionRange {
                    lo: Some(v.clone()),
                    hi: Some(v),
                })
            }),
        )),
    )(input)
}

/// Parse a comma-separated list of version constraints.
pub fn version_list<'a, E>(input: &'a str) -> IResult<&'a str, Vec<VersionConstraint>, E>
where
    E: ParseError<&'a str>
        + ContextError<&'a str>
        + FromExternalError<&'a str, std::num::ParseIntError>,
{
    separated_list1_with_cut(char(','), version_constraint)(input)
}
