//! Splitting of caller-supplied argument strings
//!
//! Extra iocage arguments and `pkg` commands arrive as one string. Words are
//! separated by whitespace; single or double quotes group a word.

use crate::error::{Error, Result};
use nom::{
    branch::alt,
    bytes::complete::{take_till, take_while1},
    character::complete::{char, multispace0},
    combinator::all_consuming,
    multi::many0,
    sequence::{delimited, terminated},
    Parser,
};

fn quoted(input: &str) -> nom::IResult<&str, &str> {
    alt((
        delimited(char('"'), take_till(|c| c == '"'), char('"')),
        delimited(char('\''), take_till(|c| c == '\''), char('\'')),
    ))
    .parse(input)
}

fn bare(input: &str) -> nom::IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != '"' && c != '\'').parse(input)
}

/// One word: adjacent bare and quoted pieces join, as in a shell
fn word(input: &str) -> nom::IResult<&str, String> {
    let (input, pieces) = nom::multi::many1(alt((quoted, bare))).parse(input)?;
    Ok((input, pieces.concat()))
}

/// Split `s` into words
pub fn split_words(s: &str) -> Result<Vec<String>> {
    let parsed = all_consuming(delimited(
        multispace0,
        many0(terminated(word, multispace0)),
        multispace0,
    ))
    .parse(s);

    match parsed {
        Ok((_, words)) => Ok(words),
        Err(_) => Err(Error::Configuration(format!(
            "Unbalanced quotes in arguments: {}",
            s
        ))),
    }
}
