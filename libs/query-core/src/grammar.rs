//! Condition-key grammar.
//!
//! A condition key has the shape `path[__path2]__operator`, where the second
//! path segment may also be written dotted (`dept.city__eq`). Several keys may
//! be joined with `|` to form a disjunction that shares one raw value:
//! `name__like|nickname__like`.

use std::fmt;

use crate::error::{QueryError, Result};
use crate::operator::{OperandShape, Operator};

/// Separates path segments from each other and from the operator.
pub const SEPARATOR: &str = "__";
/// Separates the alternatives of a disjunction.
pub const ALTERNATIVE: char = '|';
/// Separates the elements of an `in` / `notIn` value.
pub const LIST_DELIMITER: char = ',';
pub const MAX_PATH_DEPTH: usize = 2;

/// A validated property path of one or two segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Build a path from a dotted string (`name` or `dept.city`).
    pub fn parse(dotted: &str) -> Result<Self> {
        Self::from_parts(dotted, [dotted])
    }

    /// Build a path from already-split parts; each part may itself be dotted.
    /// `origin` is the text reported in errors.
    pub(crate) fn from_parts<'a>(
        origin: &str,
        parts: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut segments = Vec::with_capacity(MAX_PATH_DEPTH);
        for part in parts {
            for seg in part.split('.') {
                let seg = seg.trim();
                if seg.is_empty() {
                    return Err(QueryError::MalformedKey {
                        key: origin.to_owned(),
                        reason: "empty path segment",
                    });
                }
                segments.push(seg.to_owned());
            }
        }
        if segments.is_empty() {
            return Err(QueryError::MalformedKey {
                key: origin.to_owned(),
                reason: "missing field path",
            });
        }
        if segments.len() > MAX_PATH_DEPTH {
            return Err(QueryError::PathTooDeep {
                key: origin.to_owned(),
            });
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The segment that names a relation when the path is nested.
    pub fn first(&self) -> &str {
        &self.segments[0]
    }

    pub fn leaf(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// One `path__operator` alternative.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementaryKey {
    pub path: FieldPath,
    pub op: Operator,
}

/// A parsed condition key: one alternative, or several joined by `|`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionKey {
    pub raw: String,
    pub alternatives: Vec<ElementaryKey>,
}

impl ConditionKey {
    pub fn is_disjunction(&self) -> bool {
        self.raw.contains(ALTERNATIVE)
    }
}

/// Parse a raw condition key into its alternatives.
pub fn parse_condition_key(key: &str) -> Result<ConditionKey> {
    let alternatives = key
        .split(ALTERNATIVE)
        .map(|alt| parse_elementary(key, alt))
        .collect::<Result<Vec<_>>>()?;
    Ok(ConditionKey {
        raw: key.to_owned(),
        alternatives,
    })
}

fn parse_elementary(key: &str, alt: &str) -> Result<ElementaryKey> {
    let alt = alt.trim();
    if alt.is_empty() {
        return Err(QueryError::MalformedKey {
            key: key.to_owned(),
            reason: "empty alternative",
        });
    }
    let (path_part, op_token) = alt
        .rsplit_once(SEPARATOR)
        .ok_or_else(|| QueryError::MalformedKey {
            key: key.to_owned(),
            reason: "missing '__operator' suffix",
        })?;
    if op_token.is_empty() {
        return Err(QueryError::MalformedKey {
            key: key.to_owned(),
            reason: "missing operator",
        });
    }
    let op = op_token
        .parse::<Operator>()
        .map_err(|_| QueryError::UnknownOperator {
            key: key.to_owned(),
            op: op_token.to_owned(),
        })?;
    let path = FieldPath::from_parts(key, path_part.split(SEPARATOR))?;
    Ok(ElementaryKey { path, op })
}

/// The raw value of a condition split according to its operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand<'a> {
    Single(&'a str),
    List(Vec<&'a str>),
    /// `None` when the text is not a recognizable boolean.
    Flag(Option<bool>),
}

/// Pre-process a raw value for `op`. The value is trimmed; list elements are
/// trimmed individually and keep their order and duplicates. A blank flag
/// value requests nothing and reads as `false`, like `isNull=false`.
pub fn split_operand(op: Operator, raw: &str) -> Operand<'_> {
    let raw = raw.trim();
    match op.operand_shape() {
        OperandShape::Single => Operand::Single(raw),
        OperandShape::List => Operand::List(raw.split(LIST_DELIMITER).map(str::trim).collect()),
        OperandShape::Flag => Operand::Flag(parse_flag(raw)),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    if raw.is_empty() {
        return Some(false);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
