//! Structured filter expressions.
//!
//! A filter is a flat JSON object. Each key names a field; the value is
//! either a literal (equality), an array (membership) or an object of
//! operators (`$gte`, `$lte`, `$in`, `$ne`). All fields are ANDed.
//!
//! ```text
//! {"State_UT_Code": 36, "Age": {"$gte": 25, "$lte": 35}, "Sex": {"$ne": 1}}
//! ```

use std::cmp::Ordering;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filters must be valid JSON ({0})")]
    Json(String),

    #[error("filters must be a JSON object")]
    NotAnObject,

    #[error("unknown operator '{op}' on field '{field}'")]
    UnknownOperator { field: String, op: String },

    #[error("operator object for field '{0}' is empty")]
    EmptyOperators(String),

    #[error("'$in' on field '{0}' expects an array")]
    InExpectsArray(String),

    #[error("unsupported value for field '{0}'")]
    UnsupportedValue(String),

    #[error("invalid value for '{param}': {value}")]
    InvalidAlias { param: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Gte(Value),
    Lte(Value),
    In(Vec<Value>),
    Ne(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpr {
    fields: Vec<FieldFilter>,
}

fn is_scalar(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}

fn is_orderable(v: &Value) -> bool {
    matches!(v, Value::Number(_) | Value::String(_))
}

fn parse_field(field: &str, raw: &Value) -> Result<FieldFilter, FilterError> {
    let unsupported = || FilterError::UnsupportedValue(field.to_string());

    let in_list = |v: &Value| -> Result<Condition, FilterError> {
        let items = v
            .as_array()
            .ok_or_else(|| FilterError::InExpectsArray(field.to_string()))?;
        if items.iter().any(|i| !is_scalar(i) || i.is_null()) {
            return Err(unsupported());
        }
        Ok(Condition::In(items.clone()))
    };

    let conditions = match raw {
        Value::Array(_) => vec![in_list(raw)?],
        Value::Object(ops) => {
            if ops.is_empty() {
                return Err(FilterError::EmptyOperators(field.to_string()));
            }
            let mut out = Vec::with_capacity(ops.len());
            for (op, v) in ops {
                let cond = match op.as_str() {
                    "$gte" | "$lte" => {
                        if !is_orderable(v) {
                            return Err(unsupported());
                        }
                        if op == "$gte" {
                            Condition::Gte(v.clone())
                        } else {
                            Condition::Lte(v.clone())
                        }
                    }
                    "$in" => in_list(v)?,
                    "$ne" => {
                        if !is_scalar(v) {
                            return Err(unsupported());
                        }
                        Condition::Ne(v.clone())
                    }
                    _ => {
                        return Err(FilterError::UnknownOperator {
                            field: field.to_string(),
                            op: op.clone(),
                        })
                    }
                };
                out.push(cond);
            }
            out
        }
        scalar => vec![Condition::Eq(scalar.clone())],
    };

    Ok(FieldFilter {
        field: field.to_string(),
        conditions,
    })
}

impl FilterExpr {
    /// Parses the URL-decoded `filters` parameter. Blank input is an empty filter.
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value =
            serde_json::from_str(raw).map_err(|e| FilterError::Json(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Self::from_map(map),
            _ => Err(FilterError::NotAnObject),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self, FilterError> {
        let fields = map
            .iter()
            .map(|(k, v)| parse_field(k, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldFilter] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields of `other` replace same-named fields of `self`.
    pub fn merge(mut self, other: FilterExpr) -> FilterExpr {
        for incoming in other.fields {
            match self.fields.iter_mut().find(|f| f.field == incoming.field) {
                Some(existing) => *existing = incoming,
                None => self.fields.push(incoming),
            }
        }
        self
    }

    /// Evaluates against one generic record. A field missing from the
    /// record fails every condition on it, and a null value fails `$ne`.
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        self.fields.iter().all(|f| match record.get(&f.field) {
            None => false,
            Some(actual) => f.conditions.iter().all(|c| condition_holds(c, actual)),
        })
    }

    /// Equality conditions that a JSONB containment test (`data @> doc`)
    /// evaluates exactly like [`FilterExpr::matches`]. Only non-numeric
    /// strings and booleans qualify; numbers compare loosely in memory.
    pub fn containment_document(&self) -> Option<Value> {
        let mut doc = Map::new();
        for f in &self.fields {
            for c in &f.conditions {
                if let Condition::Eq(v) = c {
                    let exact = match v {
                        Value::Bool(_) => true,
                        Value::String(s) => s.trim().parse::<f64>().is_err(),
                        _ => false,
                    };
                    if exact {
                        doc.insert(f.field.clone(), v.clone());
                    }
                }
            }
        }
        (!doc.is_empty()).then_some(Value::Object(doc))
    }

    /// Canonical JSON form, used for usage logs.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for f in &self.fields {
            let value = match f.conditions.as_slice() {
                [Condition::Eq(v)] => v.clone(),
                conds => {
                    let mut ops = Map::new();
                    for c in conds {
                        let (k, v) = match c {
                            Condition::Eq(v) => ("$eq", v.clone()),
                            Condition::Gte(v) => ("$gte", v.clone()),
                            Condition::Lte(v) => ("$lte", v.clone()),
                            Condition::In(vs) => ("$in", Value::Array(vs.clone())),
                            Condition::Ne(v) => ("$ne", v.clone()),
                        };
                        ops.insert(k.to_string(), v);
                    }
                    Value::Object(ops)
                }
            };
            out.insert(f.field.clone(), value);
        }
        Value::Object(out)
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Equality with numeric coercion: `28`, `28.0` and `"28"` are equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => a == b,
    }
}

/// Ordering for range operators and sorting. Numbers (and numeric strings)
/// compare numerically, other strings lexically; anything else is unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn condition_holds(cond: &Condition, actual: &Value) -> bool {
    match cond {
        Condition::Eq(v) => values_equal(actual, v),
        Condition::Ne(v) => !actual.is_null() && !values_equal(actual, v),
        Condition::In(vs) => vs.iter().any(|v| values_equal(actual, v)),
        Condition::Gte(v) => matches!(
            compare_values(actual, v),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Condition::Lte(v) => matches!(
            compare_values(actual, v),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}
