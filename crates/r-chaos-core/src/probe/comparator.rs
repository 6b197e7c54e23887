//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Typed comparison of probe outcomes against expectations."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::fmt;

use serde::Serialize;

use crate::error::ChaosError;

/// Value domain of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparatorKind {
    Int,
    Float,
    String,
}

impl std::str::FromStr for ComparatorKind {
    type Err = ChaosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "int" => Ok(ComparatorKind::Int),
            "float" => Ok(ComparatorKind::Float),
            "string" => Ok(ComparatorKind::String),
            other => Err(ChaosError::Config(format!(
                "comparator type '{}' is not supported",
                other
            ))),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Criteria {
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    OneOf,
    Between,
    Contains,
    NotContains,
}

impl Criteria {
    fn parse(kind: ComparatorKind, raw: &str) -> Result<Self, ChaosError> {
        let criteria = match (kind, raw.trim()) {
            (ComparatorKind::String, "equal" | "==") => Criteria::Equal,
            (ComparatorKind::String, "notEqual" | "!=") => Criteria::NotEqual,
            (ComparatorKind::String, "contains") => Criteria::Contains,
            (ComparatorKind::String, "notContains") => Criteria::NotContains,
            (_, "oneOf") => Criteria::OneOf,
            (ComparatorKind::Int | ComparatorKind::Float, "==") => Criteria::Equal,
            (ComparatorKind::Int | ComparatorKind::Float, "!=") => Criteria::NotEqual,
            (ComparatorKind::Int | ComparatorKind::Float, ">") => Criteria::Greater,
            (ComparatorKind::Int | ComparatorKind::Float, "<") => Criteria::Less,
            (ComparatorKind::Int | ComparatorKind::Float, ">=") => Criteria::GreaterOrEqual,
            (ComparatorKind::Int | ComparatorKind::Float, "<=") => Criteria::LessOrEqual,
            (ComparatorKind::Int | ComparatorKind::Float, "between") => Criteria::Between,
            (kind, other) => {
                return Err(ChaosError::Config(format!(
                    "criteria '{}' is not supported for {:?} comparisons",
                    other, kind
                )))
            }
        };
        Ok(criteria)
    }

    fn symbol(&self) -> &'static str {
        match self {
            Criteria::Equal => "==",
            Criteria::NotEqual => "!=",
            Criteria::Greater => ">",
            Criteria::Less => "<",
            Criteria::GreaterOrEqual => ">=",
            Criteria::LessOrEqual => "<=",
            Criteria::OneOf => "oneOf",
            Criteria::Between => "between",
            Criteria::Contains => "contains",
            Criteria::NotContains => "notContains",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
enum Expected {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

/// Parsed, validated comparison. Built once when the probe is declared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparator {
    kind: ComparatorKind,
    criteria: Criteria,
    raw: String,
    #[serde(skip)]
    expected: Expected,
}

/// `[a,b,c]` or `a,b,c` → items.
fn split_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

impl Comparator {
    pub fn new(kind: ComparatorKind, criteria: &str, expected: &str) -> Result<Self, ChaosError> {
        let criteria = Criteria::parse(kind, criteria)?;
        let items = match criteria {
            Criteria::OneOf | Criteria::Between => split_list(expected),
            _ => vec![expected.trim().to_string()],
        };
        if criteria == Criteria::Between && items.len() != 2 {
            return Err(ChaosError::Config(format!(
                "'between' expects exactly two bounds, got '{}'",
                expected
            )));
        }
        if criteria == Criteria::OneOf && items.is_empty() {
            return Err(ChaosError::Config("'oneOf' expects at least one value".into()));
        }
        let invalid = |item: &str| {
            ChaosError::Config(format!("'{}' is not a valid {:?} value", item, kind))
        };
        let expected_values = match kind {
            ComparatorKind::Int => Expected::Int(
                items
                    .iter()
                    .map(|item| item.parse::<i64>().map_err(|_| invalid(item)))
                    .collect::<Result<_, _>>()?,
            ),
            ComparatorKind::Float => Expected::Float(
                items
                    .iter()
                    .map(|item| item.parse::<f64>().map_err(|_| invalid(item)))
                    .collect::<Result<_, _>>()?,
            ),
            ComparatorKind::String => Expected::Text(items),
        };
        Ok(Self {
            kind,
            criteria,
            raw: expected.trim().to_string(),
            expected: expected_values,
        })
    }

    /// Integer equality, used for HTTP status codes.
    pub fn int_equal(expected: i64) -> Self {
        Self {
            kind: ComparatorKind::Int,
            criteria: Criteria::Equal,
            raw: expected.to_string(),
            expected: Expected::Int(vec![expected]),
        }
    }

    /// Exact string match.
    pub fn string_equal(expected: impl Into<String>) -> Self {
        let expected = expected.into();
        Self {
            kind: ComparatorKind::String,
            criteria: Criteria::Equal,
            raw: expected.clone(),
            expected: Expected::Text(vec![expected]),
        }
    }

    pub fn kind(&self) -> ComparatorKind {
        self.kind
    }

    pub fn criteria(&self) -> Criteria {
        self.criteria
    }

    /// Compare an observed outcome. The error is a human readable mismatch.
    pub fn compare(&self, actual: &str) -> Result<(), String> {
        let actual = actual.trim();
        let matched = match &self.expected {
            Expected::Int(expected) => {
                let value = actual
                    .parse::<i64>()
                    .map_err(|_| format!("actual value '{}' is not an integer", actual))?;
                ordered(self.criteria, &value, expected)
            }
            Expected::Float(expected) => {
                let value = actual
                    .parse::<f64>()
                    .map_err(|_| format!("actual value '{}' is not a float", actual))?;
                ordered(self.criteria, &value, expected)
            }
            Expected::Text(expected) => match self.criteria {
                Criteria::Equal => expected.first().is_some_and(|e| e == actual),
                Criteria::NotEqual => expected.first().is_some_and(|e| e != actual),
                Criteria::Contains => expected.first().is_some_and(|e| actual.contains(e.as_str())),
                Criteria::NotContains => {
                    expected.first().is_some_and(|e| !actual.contains(e.as_str()))
                }
                Criteria::OneOf => expected.iter().any(|e| e == actual),
                _ => false,
            },
        };
        if matched {
            Ok(())
        } else {
            Err(format!(
                "actual value '{}' does not satisfy {} {}",
                actual,
                self.criteria.symbol(),
                self.raw
            ))
        }
    }
}

fn ordered<T: PartialOrd>(criteria: Criteria, actual: &T, expected: &[T]) -> bool {
    let Some(first) = expected.first() else {
        return false;
    };
    match criteria {
        Criteria::Equal => actual == first,
        Criteria::NotEqual => actual != first,
        Criteria::Greater => actual > first,
        Criteria::Less => actual < first,
        Criteria::GreaterOrEqual => actual >= first,
        Criteria::LessOrEqual => actual <= first,
        Criteria::OneOf => expected.iter().any(|e| e == actual),
        Criteria::Between => expected
            .get(1)
            .is_some_and(|upper| actual >= first && actual <= upper),
        Criteria::Contains | Criteria::NotContains => false,
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.criteria.symbol(), self.raw)
    }
}
