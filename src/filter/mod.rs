//! Metadata filter expressions.
//!
//! A filter string is one or more `field[pattern]` groups, each optionally
//! prefixed with `+` (include, the default) or `-` (exclude):
//!
//! ```text
//! artist[Beatles]-album[Help]
//! ```
//!
//! Conditions inside one string form a [`FilterExpression`]. Several strings
//! given on one invocation form a [`FilterSet`]; a record is kept when it
//! satisfies at least one expression of the set.

pub mod engine;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::record::Field;

pub use engine::filter_records;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("'{0}' is not a valid filter (expected field[pattern])")]
    Syntax(String),
    #[error("unknown field '{field}' in filter '{filter}'")]
    UnknownField { field: String, filter: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Include,
    Exclude,
}

impl Op {
    /// Interpret a run of `+`/`-` characters. Only the leading sign counts.
    fn from_run(run: &str) -> Self {
        if run.starts_with('-') {
            Self::Exclude
        } else {
            Self::Include
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub op: Op,
    pub field: Field,
    pub pattern: String,
}

/// How several conditions on one side of an expression are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// One matching field is enough.
    Any,
    /// Every field must match.
    All,
}

impl MatchPolicy {
    pub fn complement(self) -> Self {
        match self {
            Self::Any => Self::All,
            Self::All => Self::Any,
        }
    }
}

/// Conditions on one side of an expression, grouped by field.
pub type FieldPatterns = BTreeMap<Field, Vec<String>>;

/// The parsed form of one filter string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpression {
    conditions: Vec<FilterCondition>,
}

// ([+-]+)? then a lazily matched field name, then a bracketed pattern
static FILTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<op>[+-]+)?(?P<field>.*?)\[(?P<pattern>.*?)\]").unwrap());

impl FilterExpression {
    /// Parse a filter string. Fails if it holds no `field[pattern]` group or
    /// names a field outside [`Field::ALL`].
    pub fn parse(value: &str) -> Result<Self, FilterError> {
        let mut conditions = Vec::new();

        for caps in FILTER_RE.captures_iter(value) {
            let op = Op::from_run(caps.name("op").map_or("", |m| m.as_str()));
            let raw_field = caps["field"].trim();
            let field = raw_field.parse::<Field>().map_err(|_| FilterError::UnknownField {
                field: raw_field.to_string(),
                filter: value.to_string(),
            })?;
            conditions.push(FilterCondition {
                op,
                field,
                pattern: caps["pattern"].to_string(),
            });
        }

        if conditions.is_empty() {
            return Err(FilterError::Syntax(value.to_string()));
        }

        Ok(Self { conditions })
    }

    pub fn conditions(&self) -> &[FilterCondition] {
        &self.conditions
    }

    /// Split the conditions into (include, exclude) groups keyed by field.
    pub fn partition(&self) -> (FieldPatterns, FieldPatterns) {
        let mut include = FieldPatterns::new();
        let mut exclude = FieldPatterns::new();
        for c in &self.conditions {
            let side = match c.op {
                Op::Include => &mut include,
                Op::Exclude => &mut exclude,
            };
            side.entry(c.field).or_default().push(c.pattern.clone());
        }
        (include, exclude)
    }

    /// Policies for the (include, exclude) sides.
    ///
    /// Include uses `All` once the expression names more than one include
    /// field or more than one pattern for a field, `Any` otherwise. Exclude
    /// always takes the complement of the include policy.
    pub fn policies(&self) -> (MatchPolicy, MatchPolicy) {
        let (include, _) = self.partition();
        let include_policy = if is_compound(&include) {
            MatchPolicy::All
        } else {
            MatchPolicy::Any
        };
        (include_policy, include_policy.complement())
    }
}

fn is_compound(groups: &FieldPatterns) -> bool {
    groups.len() > 1 || groups.values().any(|patterns| patterns.len() > 1)
}

/// All filter expressions supplied on one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    expressions: Vec<FilterExpression>,
}

impl FilterSet {
    pub fn new(expressions: Vec<FilterExpression>) -> Self {
        Self { expressions }
    }

    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, FilterError> {
        let expressions = values
            .iter()
            .map(|v| FilterExpression::parse(v.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { expressions })
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn expressions(&self) -> &[FilterExpression] {
        &self.expressions
    }
}
