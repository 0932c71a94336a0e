// Lobby listing filters: a MongoDB-style query object translated to SQL
// for the Postgres backend and evaluated directly for the memory backend.
//
// Filterable fields are whitelisted: `code`, `playerCount`, `createdAt`,
// `updatedAt`, and nested values under `customData.`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use std::cmp::Ordering;

use crate::domain::{Lobby, StoreError};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 50;

const MAX_DEPTH: usize = 4;
const MAX_CONDITIONS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Code,
    PlayerCount,
    CreatedAt,
    UpdatedAt,
    Custom(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    fn sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }

    fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Gte => ordering != Ordering::Less,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Lte => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Time(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Cmp {
        field: Field,
        op: CmpOp,
        value: FilterValue,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: Field,
    pub descending: bool,
}

fn invalid(reason: impl Into<String>) -> StoreError {
    StoreError::InvalidFilter(reason.into())
}

fn parse_field(name: &str) -> Result<Field, StoreError> {
    match name {
        "code" => return Ok(Field::Code),
        "playerCount" => return Ok(Field::PlayerCount),
        "createdAt" => return Ok(Field::CreatedAt),
        "updatedAt" => return Ok(Field::UpdatedAt),
        _ => {}
    }
    if let Some(path) = name.strip_prefix("customData.") {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.is_empty() {
            return Err(invalid("empty customData path"));
        }
        for segment in &segments {
            if segment.is_empty()
                || segment.len() > 64
                || !segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid(format!("bad customData path segment: {segment:?}")));
            }
        }
        return Ok(Field::Custom(segments));
    }
    Err(invalid(format!("field not filterable: {name}")))
}

fn parse_value(field: &Field, raw: &Value) -> Result<FilterValue, StoreError> {
    match field {
        Field::Code => match raw.as_str() {
            Some(s) => Ok(FilterValue::Str(s.to_string())),
            None => Err(invalid("code expects a string")),
        },
        Field::PlayerCount => match raw.as_f64() {
            Some(n) => Ok(FilterValue::Num(n)),
            None => Err(invalid("playerCount expects a number")),
        },
        Field::CreatedAt | Field::UpdatedAt => match raw.as_str() {
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| FilterValue::Time(t.with_timezone(&Utc)))
                .map_err(|_| invalid("timestamps expect an RFC 3339 string")),
            None => Err(invalid("timestamps expect an RFC 3339 string")),
        },
        Field::Custom(_) => match raw {
            Value::String(s) => Ok(FilterValue::Str(s.clone())),
            Value::Number(n) => n
                .as_f64()
                .map(FilterValue::Num)
                .ok_or_else(|| invalid("number out of range")),
            Value::Bool(b) => Ok(FilterValue::Bool(*b)),
            _ => Err(invalid("customData values must be string, number or bool")),
        },
    }
}

fn parse_op(name: &str) -> Result<CmpOp, StoreError> {
    match name {
        "$eq" => Ok(CmpOp::Eq),
        "$ne" => Ok(CmpOp::Ne),
        "$gt" => Ok(CmpOp::Gt),
        "$gte" => Ok(CmpOp::Gte),
        "$lt" => Ok(CmpOp::Lt),
        "$lte" => Ok(CmpOp::Lte),
        _ => Err(invalid(format!("unsupported operator: {name}"))),
    }
}

/// Parses a client filter object into an expression tree, rejecting
/// unknown fields, unknown operators, and oversized queries.
pub fn parse_filter(raw: &Value) -> Result<FilterExpr, StoreError> {
    let mut conditions = 0;
    parse_object(raw, 0, &mut conditions)
}

fn parse_object(raw: &Value, depth: usize, conditions: &mut usize) -> Result<FilterExpr, StoreError> {
    if depth > MAX_DEPTH {
        return Err(invalid("filter nests too deeply"));
    }
    let object = raw.as_object().ok_or_else(|| invalid("filter must be an object"))?;

    let mut clauses = Vec::with_capacity(object.len());
    for (key, value) in object {
        *conditions += 1;
        if *conditions > MAX_CONDITIONS {
            return Err(invalid("filter has too many conditions"));
        }
        match key.as_str() {
            "$and" | "$or" => {
                let list = value
                    .as_array()
                    .ok_or_else(|| invalid(format!("{key} expects an array")))?;
                if list.is_empty() {
                    return Err(invalid(format!("{key} expects at least one clause")));
                }
                let mut parsed = Vec::with_capacity(list.len());
                for entry in list {
                    parsed.push(parse_object(entry, depth + 1, conditions)?);
                }
                clauses.push(if key == "$and" {
                    FilterExpr::And(parsed)
                } else {
                    FilterExpr::Or(parsed)
                });
            }
            name => {
                let field = parse_field(name)?;
                match value {
                    Value::Object(ops) => {
                        if ops.is_empty() {
                            return Err(invalid(format!("no operator for field {name}")));
                        }
                        for (op_name, op_value) in ops {
                            *conditions += 1;
                            if *conditions > MAX_CONDITIONS {
                                return Err(invalid("filter has too many conditions"));
                            }
                            clauses.push(FilterExpr::Cmp {
                                field: field.clone(),
                                op: parse_op(op_name)?,
                                value: parse_value(&field, op_value)?,
                            });
                        }
                    }
                    scalar => clauses.push(FilterExpr::Cmp {
                        field: field.clone(),
                        op: CmpOp::Eq,
                        value: parse_value(&field, scalar)?,
                    }),
                }
            }
        }
    }

    match clauses.len() {
        0 => Err(invalid("empty filter object")),
        1 => Ok(clauses.remove(0)),
        _ => Ok(FilterExpr::And(clauses)),
    }
}

/// Parses sort keys like `["-createdAt", "code"]` over the same
/// whitelist as the filter.
pub fn parse_sort(raw: &[String]) -> Result<Vec<SortKey>, StoreError> {
    let mut keys = Vec::with_capacity(raw.len());
    for entry in raw {
        let (name, descending) = match entry.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (entry.as_str(), false),
        };
        keys.push(SortKey {
            field: parse_field(name)?,
            descending,
        });
    }
    Ok(keys)
}

fn push_json_path(sql: &mut String, path: &[String]) {
    // Segments are validated in parse_field, so building the literal
    // text path is safe.
    sql.push_str("custom_data #> '{");
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(segment);
    }
    sql.push_str("}'");
}

/// Appends `expr` as a parenthesized SQL predicate with bound parameters.
pub fn push_filter_sql(expr: &FilterExpr, qb: &mut QueryBuilder<'_, Postgres>) {
    match expr {
        FilterExpr::And(clauses) | FilterExpr::Or(clauses) => {
            let joiner = if matches!(expr, FilterExpr::And(_)) {
                " AND "
            } else {
                " OR "
            };
            qb.push("(");
            for (i, clause) in clauses.iter().enumerate() {
                if i > 0 {
                    qb.push(joiner);
                }
                push_filter_sql(clause, qb);
            }
            qb.push(")");
        }
        FilterExpr::Cmp { field, op, value } => {
            qb.push("(");
            match field {
                Field::Code => {
                    qb.push("code ").push(op.sql()).push(" ");
                    if let FilterValue::Str(s) = value {
                        qb.push_bind(s.clone());
                    }
                }
                Field::PlayerCount => {
                    qb.push("cardinality(peers) ").push(op.sql()).push(" ");
                    if let FilterValue::Num(n) = value {
                        qb.push_bind(*n);
                    }
                }
                Field::CreatedAt | Field::UpdatedAt => {
                    let column = if matches!(field, Field::CreatedAt) {
                        "created_at "
                    } else {
                        "updated_at "
                    };
                    qb.push(column).push(op.sql()).push(" ");
                    if let FilterValue::Time(t) = value {
                        qb.push_bind(*t);
                    }
                }
                Field::Custom(path) => {
                    let mut lhs = String::new();
                    push_json_path(&mut lhs, path);
                    qb.push(lhs).push(" ").push(op.sql()).push(" ");
                    match value {
                        FilterValue::Str(s) => {
                            qb.push("to_jsonb(").push_bind(s.clone()).push("::text)");
                        }
                        FilterValue::Num(n) => {
                            qb.push("to_jsonb(").push_bind(*n).push("::float8)");
                        }
                        FilterValue::Bool(b) => {
                            qb.push("to_jsonb(").push_bind(*b).push("::boolean)");
                        }
                        FilterValue::Time(_) => {}
                    }
                }
            }
            qb.push(")");
        }
    }
}

/// Appends the ORDER BY clause; the default ordering is newest first with
/// the code as tie breaker.
pub fn push_order_by(keys: &[SortKey], qb: &mut QueryBuilder<'_, Postgres>) {
    if keys.is_empty() {
        qb.push(" ORDER BY created_at DESC, code ASC");
        return;
    }
    qb.push(" ORDER BY ");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        match &key.field {
            Field::Code => qb.push("code"),
            Field::PlayerCount => qb.push("cardinality(peers)"),
            Field::CreatedAt => qb.push("created_at"),
            Field::UpdatedAt => qb.push("updated_at"),
            Field::Custom(path) => {
                let mut lhs = String::new();
                push_json_path(&mut lhs, path);
                qb.push(lhs)
            }
        };
        qb.push(if key.descending { " DESC" } else { " ASC" });
    }
}

fn lookup_custom<'a>(lobby: &'a Lobby, path: &[String]) -> Option<&'a Value> {
    let mut current = lobby.custom_data.as_ref()?;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

fn compare_values(field: &Field, lobby: &Lobby, value: &FilterValue) -> Option<Ordering> {
    match (field, value) {
        (Field::Code, FilterValue::Str(s)) => Some(lobby.code.as_str().cmp(s.as_str())),
        (Field::PlayerCount, FilterValue::Num(n)) => {
            (lobby.player_count as f64).partial_cmp(n)
        }
        (Field::CreatedAt, FilterValue::Time(t)) => Some(lobby.created_at.cmp(t)),
        (Field::UpdatedAt, FilterValue::Time(t)) => Some(lobby.updated_at.cmp(t)),
        (Field::Custom(path), expected) => {
            let actual = lookup_custom(lobby, path)?;
            match (actual, expected) {
                (Value::String(a), FilterValue::Str(b)) => Some(a.as_str().cmp(b.as_str())),
                (Value::Number(a), FilterValue::Num(b)) => a.as_f64()?.partial_cmp(b),
                (Value::Bool(a), FilterValue::Bool(b)) => Some(a.cmp(b)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Evaluates the expression against an in-memory lobby, mirroring the
/// SQL the Postgres backend generates.
pub fn matches(expr: &FilterExpr, lobby: &Lobby) -> bool {
    match expr {
        FilterExpr::And(clauses) => clauses.iter().all(|clause| matches(clause, lobby)),
        FilterExpr::Or(clauses) => clauses.iter().any(|clause| matches(clause, lobby)),
        FilterExpr::Cmp { field, op, value } => match compare_values(field, lobby, value) {
            Some(ordering) => op.matches(ordering),
            // A missing or mismatched value only satisfies $ne.
            None => *op == CmpOp::Ne,
        },
    }
}

/// Sort comparator for the memory backend; equal keys fall through to
/// the default ordering.
pub fn compare_lobbies(keys: &[SortKey], a: &Lobby, b: &Lobby) -> Ordering {
    for key in keys {
        let ordering = match &key.field {
            Field::Code => a.code.cmp(&b.code),
            Field::PlayerCount => a.player_count.cmp(&b.player_count),
            Field::CreatedAt => a.created_at.cmp(&b.created_at),
            Field::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            Field::Custom(path) => {
                let left = lookup_custom(a, path);
                let right = lookup_custom(b, path);
                compare_json(left, right)
            }
        };
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.code.cmp(&b.code))
}

fn compare_json(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}
