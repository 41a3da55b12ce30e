//! Pattern extraction for embedded binding expressions.
//!
//! Sax adapters declare their variables as `;`-separated function-call-like
//! tokens: `name(rate)` for sensed variables, `name(staticLimit,dynamicLimit)`
//! for actuated ones. Plink bindings are `,`-separated variable names. This
//! module is the single tokenizer for both the semantic checker and the
//! simulation compiler, so the two can never drift apart.
//!
//! Extraction is total: a malformed token is never silently dropped, it
//! produces an [`ExprError`] that callers surface as a diagnostic.

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit0, digit1},
    combinator::{all_consuming, opt, recognize},
    sequence::{delimited, pair, preceded, separated_pair},
    IResult,
};
use thiserror::Error;

/// Static and dynamic actuation limits declared on a Sax variable.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Limits {
    pub static_limit: f64,
    pub dynamic_limit: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("the token [{0}] is not a valid sensed variable, expected name(rate)")]
    MalformedSensor(String),
    #[error("the sensor rate for binding [{name}] = [{value}] is not valid, it must be an int")]
    InvalidRate { name: String, value: String },
    #[error("the token [{0}] is not a valid actuated variable, expected name(staticLimit,dynamicLimit)")]
    MalformedActuator(String),
    #[error("the actuator static limit for binding [{name}] = [{value}] is not valid, it must be a float")]
    InvalidStaticLimit { name: String, value: String },
    #[error("the actuator dynamic limit for binding [{name}] = [{value}] is not valid, it must be a float")]
    InvalidDynamicLimit { name: String, value: String },
}

/// A parsed `name(rate)` token. The rate text is kept verbatim so generated
/// source reproduces the user's spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorToken {
    pub name: String,
    pub rate_text: String,
    pub rate: u32,
}

/// A parsed `name(staticLimit,dynamicLimit)` token.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorToken {
    pub name: String,
    pub static_text: String,
    pub dynamic_text: String,
    pub limits: Limits,
}

// ---------------------------------------------------------------------------
// Token grammar
// ---------------------------------------------------------------------------

/// Identifier: starts with alpha/underscore, continues with alphanumeric/underscore.
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Unsigned decimal literal: `10`, `0.4`.
fn decimal(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, opt(preceded(char('.'), digit1))))(input)
}

fn sensor_pattern(input: &str) -> IResult<&str, (&str, &str)> {
    all_consuming(pair(identifier, delimited(char('('), digit0, char(')'))))(input)
}

fn actuator_pattern(input: &str) -> IResult<&str, (&str, (&str, &str))> {
    all_consuming(pair(
        identifier,
        delimited(
            char('('),
            separated_pair(decimal, char(','), decimal),
            char(')'),
        ),
    ))(input)
}

// ---------------------------------------------------------------------------
// Token parsing
// ---------------------------------------------------------------------------

/// Parse one sensed-variable token. Expects whitespace already removed.
pub fn parse_sensor_token(token: &str) -> Result<SensorToken, ExprError> {
    let (_, (name, rate_text)) =
        sensor_pattern(token).map_err(|_| ExprError::MalformedSensor(token.to_string()))?;

    let rate = rate_text.parse::<u32>().map_err(|_| ExprError::InvalidRate {
        name: name.to_string(),
        value: rate_text.to_string(),
    })?;

    Ok(SensorToken {
        name: name.to_string(),
        rate_text: rate_text.to_string(),
        rate,
    })
}

/// Parse one actuated-variable token. Expects whitespace already removed.
pub fn parse_actuator_token(token: &str) -> Result<ActuatorToken, ExprError> {
    let (_, (name, (st, dt))) =
        actuator_pattern(token).map_err(|_| ExprError::MalformedActuator(token.to_string()))?;

    let static_limit = st.parse::<f64>().map_err(|_| ExprError::InvalidStaticLimit {
        name: name.to_string(),
        value: st.to_string(),
    })?;
    let dynamic_limit = dt.parse::<f64>().map_err(|_| ExprError::InvalidDynamicLimit {
        name: name.to_string(),
        value: dt.to_string(),
    })?;

    Ok(ActuatorToken {
        name: name.to_string(),
        static_text: st.to_string(),
        dynamic_text: dt.to_string(),
        limits: Limits { static_limit, dynamic_limit },
    })
}

// ---------------------------------------------------------------------------
// List splitting
// ---------------------------------------------------------------------------

/// Split a `;`-separated declaration list into whitespace-free tokens.
/// Empty entries are dropped, so an empty declaration yields no tokens.
pub fn split_tokens(s: &str) -> Vec<String> {
    s.split(';')
        .map(|t| t.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Split a `,`-separated binding list: whitespace removed, one trailing comma
/// tolerated, empty entries dropped.
pub fn split_bindings(s: &str) -> Vec<String> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    cleaned
        .trim_end_matches(',')
        .split(',')
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Whole-declaration extraction
// ---------------------------------------------------------------------------

/// Extract the sensed-variable set of a `sense` declaration.
///
/// A token with an invalid rate still claims its name (with rate 0) so that
/// binding-membership checks don't cascade a second error for the same token.
pub fn sensor_vars(sense: &str) -> (std::collections::BTreeMap<String, u32>, Vec<ExprError>) {
    let mut vars = std::collections::BTreeMap::new();
    let mut errors = Vec::new();

    for token in split_tokens(sense) {
        match parse_sensor_token(&token) {
            Ok(t) => {
                vars.insert(t.name, t.rate);
            }
            Err(e) => {
                if let ExprError::InvalidRate { name, .. } = &e {
                    vars.insert(name.clone(), 0);
                }
                errors.push(e);
            }
        }
    }

    (vars, errors)
}

/// Extract the actuated-variable set of an `actuate` declaration.
pub fn actuator_vars(
    actuate: &str,
) -> (std::collections::BTreeMap<String, Limits>, Vec<ExprError>) {
    let mut vars = std::collections::BTreeMap::new();
    let mut errors = Vec::new();

    for token in split_tokens(actuate) {
        match parse_actuator_token(&token) {
            Ok(t) => {
                vars.insert(t.name, t.limits);
            }
            Err(e) => errors.push(e),
        }
    }

    (vars, errors)
}
