//! The polymorphic annotation meta-value: a small tagged variant rather than
//! a class hierarchy, per Luna's design note on avoiding deep inheritance.

use crate::error::LunaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of an annotation variable.
///
/// `Mask` is semantically a boolean whose `true` marks an epoch to exclude.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ValueType {
    Flag,
    Mask,
    Bool,
    Int,
    Num,
    Text,
    BoolVec,
    IntVec,
    NumVec,
    TextVec,
}

impl ValueType {
    /// Parse a header type token (`flag`, `mask`, `bool`, `int`, `num`,
    /// `txt`, `boolvec`, `intvec`, `numvec`, `txtvec`).
    pub fn parse(token: &str) -> Result<Self, LunaError> {
        Ok(match token.to_ascii_lowercase().as_str() {
            "flag" => Self::Flag,
            "mask" => Self::Mask,
            "bool" => Self::Bool,
            "int" => Self::Int,
            "num" => Self::Num,
            "txt" | "text" => Self::Text,
            "boolvec" => Self::BoolVec,
            "intvec" => Self::IntVec,
            "numvec" => Self::NumVec,
            "txtvec" => Self::TextVec,
            other => {
                return Err(LunaError::malformed(
                    "value-type token",
                    format!("unrecognized type '{other}'"),
                ))
            }
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Flag => "flag",
            Self::Mask => "mask",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Num => "num",
            Self::Text => "txt",
            Self::BoolVec => "boolvec",
            Self::IntVec => "intvec",
            Self::NumVec => "numvec",
            Self::TextVec => "txtvec",
        };
        write!(f, "{s}")
    }
}

/// A meta-value conforming to one of the [`ValueType`] variants.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Flag,
    Mask(bool),
    Bool(bool),
    Int(i64),
    Num(f64),
    Text(String),
    BoolVec(Vec<bool>),
    IntVec(Vec<i64>),
    NumVec(Vec<f64>),
    TextVec(Vec<String>),
}

impl Value {
    /// The [`ValueType`] this value conforms to.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Flag => ValueType::Flag,
            Self::Mask(_) => ValueType::Mask,
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Num(_) => ValueType::Num,
            Self::Text(_) => ValueType::Text,
            Self::BoolVec(_) => ValueType::BoolVec,
            Self::IntVec(_) => ValueType::IntVec,
            Self::NumVec(_) => ValueType::NumVec,
            Self::TextVec(_) => ValueType::TextVec,
        }
    }

    /// Parse a raw tabular-format token against a declared [`ValueType`].
    pub fn parse(declared: ValueType, token: &str) -> Result<Self, LunaError> {
        let bad = |detail: String| LunaError::malformed(format!("value '{token}'"), detail);
        Ok(match declared {
            ValueType::Flag => Self::Flag,
            ValueType::Mask => Self::Mask(parse_bool(token).map_err(bad)?),
            ValueType::Bool => Self::Bool(parse_bool(token).map_err(bad)?),
            ValueType::Int => Self::Int(
                token
                    .parse::<i64>()
                    .map_err(|e| bad(format!("not an int: {e}")))?,
            ),
            ValueType::Num => Self::Num(
                token
                    .parse::<f64>()
                    .map_err(|e| bad(format!("not a number: {e}")))?,
            ),
            ValueType::Text => Self::Text(token.to_string()),
            ValueType::BoolVec => Self::BoolVec(
                split_vec(token)
                    .map(|t| parse_bool(t).map_err(bad))
                    .collect::<Result<_, _>>()?,
            ),
            ValueType::IntVec => Self::IntVec(
                split_vec(token)
                    .map(|t| t.parse::<i64>().map_err(|e| bad(format!("{e}"))))
                    .collect::<Result<_, _>>()?,
            ),
            ValueType::NumVec => Self::NumVec(
                split_vec(token)
                    .map(|t| t.parse::<f64>().map_err(|e| bad(format!("{e}"))))
                    .collect::<Result<_, _>>()?,
            ),
            ValueType::TextVec => {
                Self::TextVec(split_vec(token).map(ToString::to_string).collect())
            }
        })
    }

    /// Format the value the way the tabular writer renders it — one place
    /// for every variant, per the design note.
    #[must_use]
    pub fn to_tabular(&self) -> String {
        match self {
            Self::Flag => String::new(),
            Self::Mask(b) | Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Num(n) => format!("{n}"),
            Self::Text(s) => s.clone(),
            Self::BoolVec(v) => join_vec(v.iter().map(|b| if *b { "1" } else { "0" })),
            Self::IntVec(v) => join_vec(v.iter().map(ToString::to_string)),
            Self::NumVec(v) => join_vec(v.iter().map(ToString::to_string)),
            Self::TextVec(v) => join_vec(v.iter().cloned()),
        }
    }
}

fn parse_bool(token: &str) -> Result<bool, String> {
    match token {
        "1" | "true" | "T" | "Y" | "y" => Ok(true),
        "0" | "false" | "F" | "N" | "n" => Ok(false),
        other => Err(format!("not a bool: {other}")),
    }
}

fn split_vec(token: &str) -> impl Iterator<Item = &str> {
    token.split(',').map(str::trim)
}

fn join_vec<I: IntoIterator<Item = S>, S: AsRef<str>>(items: I) -> String {
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_roundtrips() {
        let v = Value::parse(ValueType::Mask, "1").unwrap();
        assert_eq!(v, Value::Mask(true));
        assert_eq!(v.to_tabular(), "1");
    }

    #[test]
    fn numvec_roundtrips() {
        let v = Value::parse(ValueType::NumVec, "1.5,2.5,3").unwrap();
        assert_eq!(v, Value::NumVec(vec![1.5, 2.5, 3.0]));
        assert_eq!(v.to_tabular(), "1.5,2.5,3");
    }
}
