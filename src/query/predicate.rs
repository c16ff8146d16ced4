//! Operator dispatch: every filter rule becomes exactly one column predicate,
//! and a rule list folds into a single conjunction.

use serde_json::Value;

use super::error::QueryError;
use super::types::{FilterOp, FilterRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn to_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// Right-hand side of an IS test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsValue {
    Null,
    True,
    False,
}

impl IsValue {
    pub fn to_sql(&self) -> &'static str {
        match self {
            IsValue::Null => "NULL",
            IsValue::True => "TRUE",
            IsValue::False => "FALSE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateKind {
    Compare(CompareOp, Value),
    Pattern { pattern: String, case_insensitive: bool },
    In(Vec<Value>),
    Is(IsValue),
    Contains(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub kind: PredicateKind,
}

type BuildFn = fn(&str, &Value) -> Result<Predicate, QueryError>;

impl FilterOp {
    /// Lookup table from operator tag to predicate constructor
    fn builder(self) -> BuildFn {
        match self {
            FilterOp::Eq => |c, v| compare(c, CompareOp::Eq, v),
            FilterOp::Neq => |c, v| compare(c, CompareOp::Neq, v),
            FilterOp::Gt => |c, v| ordered(c, CompareOp::Gt, v),
            FilterOp::Gte => |c, v| ordered(c, CompareOp::Gte, v),
            FilterOp::Lt => |c, v| ordered(c, CompareOp::Lt, v),
            FilterOp::Lte => |c, v| ordered(c, CompareOp::Lte, v),
            FilterOp::Like => |c, v| pattern(c, v, false),
            FilterOp::ILike => |c, v| pattern(c, v, true),
            FilterOp::In => membership,
            FilterOp::Is => is_test,
            FilterOp::Contains => containment,
        }
    }
}

impl Predicate {
    pub fn from_rule(rule: &FilterRule) -> Result<Self, QueryError> {
        (rule.operator.builder())(&rule.column, &rule.value)
    }
}

fn predicate(column: &str, kind: PredicateKind) -> Predicate {
    Predicate { column: column.to_string(), kind }
}

// `eq null` is kept as plain equality; it matches nothing, use `is` for NULL tests
fn compare(column: &str, op: CompareOp, value: &Value) -> Result<Predicate, QueryError> {
    if matches!(value, Value::Array(_) | Value::Object(_)) {
        return Err(QueryError::validation(format!(
            "Operator on column '{}' expects a scalar value",
            column
        )));
    }
    Ok(predicate(column, PredicateKind::Compare(op, value.clone())))
}

fn ordered(column: &str, op: CompareOp, value: &Value) -> Result<Predicate, QueryError> {
    match value {
        Value::Number(_) | Value::String(_) => Ok(predicate(column, PredicateKind::Compare(op, value.clone()))),
        _ => Err(QueryError::validation(format!(
            "Ordering comparison on column '{}' expects a number or string",
            column
        ))),
    }
}

fn pattern(column: &str, value: &Value, case_insensitive: bool) -> Result<Predicate, QueryError> {
    let pattern = value.as_str().ok_or_else(|| {
        QueryError::validation(format!("Pattern match on column '{}' expects a string", column))
    })?;
    Ok(predicate(
        column,
        PredicateKind::Pattern { pattern: pattern.to_string(), case_insensitive },
    ))
}

fn membership(column: &str, value: &Value) -> Result<Predicate, QueryError> {
    let values = value.as_array().ok_or_else(|| {
        QueryError::validation(format!("Operator 'in' on column '{}' expects an array", column))
    })?;
    Ok(predicate(column, PredicateKind::In(values.clone())))
}

fn is_test(column: &str, value: &Value) -> Result<Predicate, QueryError> {
    let is = match value {
        Value::Null => IsValue::Null,
        Value::Bool(true) => IsValue::True,
        Value::Bool(false) => IsValue::False,
        _ => {
            return Err(QueryError::validation(format!(
                "Operator 'is' on column '{}' expects null, true or false",
                column
            )))
        }
    };
    Ok(predicate(column, PredicateKind::Is(is)))
}

fn containment(column: &str, value: &Value) -> Result<Predicate, QueryError> {
    if value.is_null() {
        return Err(QueryError::validation(format!(
            "Operator 'contains' on column '{}' expects a value",
            column
        )));
    }
    Ok(predicate(column, PredicateKind::Contains(value.clone())))
}

/// AND of predicates, kept in the order the rules were supplied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conjunction {
    predicates: Vec<Predicate>,
}

impl Conjunction {
    pub fn fold(rules: &[FilterRule]) -> Result<Self, QueryError> {
        rules.iter().try_fold(Conjunction::default(), |acc, rule| {
            Ok(acc.and(Predicate::from_rule(rule)?))
        })
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.predicates.iter().map(|p| p.column.as_str())
    }
}
