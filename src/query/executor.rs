use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use super::filter::{compare_values, Condition, FilterExpr};
use crate::datasets::repo_types::{DatasetDescriptor, StorageMode};
use crate::db::{self, quote_ident, ColumnInfo};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: Option<&str>) -> ApiResult<Self> {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("asc") => Ok(SortDirection::Asc),
            Some("desc") => Ok(SortDirection::Desc),
            Some(other) => Err(ApiError::BadRequest(format!(
                "order_direction must be 'asc' or 'desc', got '{other}'"
            ))),
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A fully validated read against one dataset.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub filter: FilterExpr,
    pub fields: Option<Vec<String>>,
    pub limit: i64,
    pub offset: i64,
    pub order_by: Option<String>,
    pub direction: SortDirection,
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub total: i64,
    pub rows: Vec<Value>,
    pub elapsed_ms: f64,
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}

pub async fn execute(
    db: &PgPool,
    descriptor: &DatasetDescriptor,
    req: &QueryRequest,
) -> ApiResult<QueryOutcome> {
    match (descriptor.storage_mode, descriptor.dataset_id) {
        (StorageMode::DedicatedTable, _) => {
            execute_table_query(db, &descriptor.physical_name, req).await
        }
        (StorageMode::GenericRecords, Some(id)) => execute_generic_query(db, id, req).await,
        (StorageMode::GenericRecords, None) => {
            Err(ApiError::not_found("dataset", &descriptor.name))
        }
    }
}

// ---- generic records ----

/// Filters the full candidate set, sorts, then pages. Paging before
/// filtering would drop matches that sit outside the first raw page.
pub fn filter_and_paginate(records: Vec<Map<String, Value>>, req: &QueryRequest) -> (i64, Vec<Value>) {
    let mut matched: Vec<Map<String, Value>> =
        records.into_iter().filter(|r| req.filter.matches(r)).collect();
    let total = matched.len() as i64;

    if let Some(key) = req.order_by.as_deref() {
        // Stable sort keeps insertion order among ties; missing values sort last.
        matched.sort_by(|a, b| match (a.get(key), b.get(key)) {
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y).unwrap_or(Ordering::Equal);
                match req.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }

    let page = matched
        .into_iter()
        .skip(req.offset.max(0) as usize)
        .take(req.limit.max(0) as usize)
        .map(|mut r| {
            if let Some(fields) = &req.fields {
                r.retain(|k, _| fields.iter().any(|f| f == k));
            }
            Value::Object(r)
        })
        .collect();
    (total, page)
}

#[instrument(skip(db, req), fields(filters = req.filter.fields().len()))]
pub async fn execute_generic_query(
    db: &PgPool,
    dataset_id: i64,
    req: &QueryRequest,
) -> ApiResult<QueryOutcome> {
    let started = Instant::now();

    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT data FROM data_records WHERE dataset_id = ");
    qb.push_bind(dataset_id);
    if let Some(doc) = req.filter.containment_document() {
        qb.push(" AND data @> ");
        qb.push_bind(doc);
    }
    qb.push(" ORDER BY id");

    let candidates: Vec<Value> = qb.build_query_scalar().fetch_all(db).await?;
    let scanned = candidates.len();
    let records = candidates
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(m) => Some(m),
            _ => None,
        })
        .collect();

    let (total, rows) = filter_and_paginate(records, req);
    debug!(dataset_id, scanned, total, returned = rows.len(), "generic query");
    Ok(QueryOutcome {
        total,
        rows,
        elapsed_ms: elapsed_ms(started),
    })
}

// ---- dedicated tables ----

/// Declared types that accept a text literal through `CAST`.
const CASTABLE_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "numeric",
    "real",
    "double precision",
    "boolean",
    "text",
    "character varying",
    "character",
    "date",
    "timestamp without time zone",
    "timestamp with time zone",
];

/// Case-insensitive view of a table's columns.
pub struct ColumnSet {
    table: String,
    by_lower: HashMap<String, ColumnInfo>,
}

impl ColumnSet {
    pub fn new(table: &str, columns: Vec<ColumnInfo>) -> Self {
        let by_lower = columns
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c))
            .collect();
        Self {
            table: table.to_string(),
            by_lower,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnInfo> {
        self.by_lower.get(&name.trim().to_lowercase())
    }

    pub fn require(&self, name: &str) -> ApiResult<&ColumnInfo> {
        self.get(name).ok_or_else(|| ApiError::InvalidField {
            field: name.to_string(),
            table: self.table.clone(),
        })
    }
}

fn literal(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, col: &ColumnInfo, v: &Value) {
    if CASTABLE_TYPES.contains(&col.data_type.as_str()) {
        qb.push("CAST(");
        qb.push_bind(literal(v));
        qb.push(format!(" AS {})", col.data_type));
    } else {
        qb.push_bind(literal(v));
    }
}

fn push_column(qb: &mut QueryBuilder<'_, Postgres>, col: &ColumnInfo) {
    qb.push(quote_ident(&col.name));
    if !CASTABLE_TYPES.contains(&col.data_type.as_str()) {
        qb.push("::text");
    }
}

/// Appends ` AND <predicate>` for every filter field that names a real
/// column. Unknown fields are skipped.
pub fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &FilterExpr, columns: &ColumnSet) {
    for f in filter.fields() {
        let Some(col) = columns.get(&f.field) else {
            debug!(field = %f.field, "filter on unknown column ignored");
            continue;
        };
        for cond in &f.conditions {
            qb.push(" AND ");
            match cond {
                Condition::Eq(Value::Null) => {
                    qb.push(quote_ident(&col.name));
                    qb.push(" IS NULL");
                }
                Condition::Ne(Value::Null) => {
                    qb.push(quote_ident(&col.name));
                    qb.push(" IS NOT NULL");
                }
                Condition::Eq(v) | Condition::Gte(v) | Condition::Lte(v) | Condition::Ne(v) => {
                    let op = match cond {
                        Condition::Gte(_) => " >= ",
                        Condition::Lte(_) => " <= ",
                        // NULL never satisfies `<>`, matching the record evaluator.
                        Condition::Ne(_) => " <> ",
                        _ => " = ",
                    };
                    push_column(qb, col);
                    qb.push(op);
                    push_value(qb, col, v);
                }
                Condition::In(vs) if vs.is_empty() => {
                    qb.push("FALSE");
                }
                Condition::In(vs) => {
                    push_column(qb, col);
                    qb.push(" IN (");
                    for (i, v) in vs.iter().enumerate() {
                        if i > 0 {
                            qb.push(", ");
                        }
                        push_value(qb, col, v);
                    }
                    qb.push(")");
                }
            }
        }
    }
}

/// Bad literals for a typed column (`"abc"` against an integer) are client errors.
fn classify(e: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db_err) = &e {
        if let Some(code) = db_err.code() {
            if code.starts_with("22") {
                return ApiError::InvalidFilterSyntax(db_err.message().to_string());
            }
        }
    }
    e.into()
}

#[instrument(skip(db, req), fields(filters = req.filter.fields().len()))]
pub async fn execute_table_query(
    db: &PgPool,
    table: &str,
    req: &QueryRequest,
) -> ApiResult<QueryOutcome> {
    let started = Instant::now();

    let columns = db::table_columns(db, table).await?;
    if columns.is_empty() {
        return Err(ApiError::not_found("table", table));
    }
    let columns = ColumnSet::new(table, columns);

    let projection = match &req.fields {
        Some(fields) if !fields.is_empty() => Some(
            fields
                .iter()
                .map(|f| columns.require(f).map(|c| c.name.clone()))
                .collect::<ApiResult<Vec<_>>>()?,
        ),
        _ => None,
    };
    let order_col = match req.order_by.as_deref() {
        Some(name) => Some(columns.require(name)?.name.clone()),
        None => None,
    };
    let tie_break = match db::primary_key(db, table).await? {
        Some(pk) => quote_ident(&pk),
        None => match columns.get("id") {
            Some(c) => quote_ident(&c.name),
            None => "ctid".to_string(),
        },
    };
    let from = format!(" FROM {} x WHERE TRUE", quote_ident(table));

    let mut count_q: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*)");
    count_q.push(&from);
    push_filters(&mut count_q, &req.filter, &columns);
    let total: i64 = count_q
        .build_query_scalar()
        .fetch_one(db)
        .await
        .map_err(classify)?;

    let select = match &projection {
        Some(cols) => {
            let list = cols
                .iter()
                .map(|c| format!("x.{}", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("SELECT row_to_json((SELECT r FROM (SELECT {list}) r))")
        }
        None => "SELECT row_to_json(x)".to_string(),
    };
    let mut rows_q: QueryBuilder<Postgres> = QueryBuilder::new(select);
    rows_q.push(&from);
    push_filters(&mut rows_q, &req.filter, &columns);
    rows_q.push(" ORDER BY ");
    if let Some(col) = &order_col {
        rows_q.push(format!("{} {}, ", quote_ident(col), req.direction.sql()));
    }
    rows_q.push(format!("{tie_break} ASC LIMIT "));
    rows_q.push_bind(req.limit);
    rows_q.push(" OFFSET ");
    rows_q.push_bind(req.offset);

    let rows: Vec<Value> = rows_q
        .build_query_scalar()
        .fetch_all(db)
        .await
        .map_err(classify)?;

    debug!(table, total, returned = rows.len(), "table query");
    Ok(QueryOutcome {
        total,
        rows,
        elapsed_ms: elapsed_ms(started),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(filter: &str, limit: i64, offset: i64) -> QueryRequest {
        QueryRequest {
            filter: FilterExpr::parse(filter).unwrap(),
            fields: None,
            limit,
            offset,
            order_by: None,
            direction: SortDirection::Asc,
        }
    }

    /// 695 district rows; TELANGANA's 33 districts start at position 120.
    fn district_codes() -> Vec<Map<String, Value>> {
        (0..695)
            .map(|i| {
                let state = if (120..153).contains(&i) { "TELANGANA" } else { "OTHER" };
                json!({"district_code": i + 1, "state": state, "district": format!("D{i}")})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn matches_beyond_the_first_raw_page_are_returned() {
        let req = request(r#"{"state": "TELANGANA"}"#, 100, 0);
        let (total, rows) = filter_and_paginate(district_codes(), &req);
        assert_eq!(total, 33);
        assert_eq!(rows.len(), 33);
        assert_eq!(rows[0]["district_code"], 121);
        assert!(rows.iter().all(|r| r["state"] == "TELANGANA"));
    }

    #[test]
    fn page_equals_slice_of_filtered_set() {
        let all = district_codes();
        let f = FilterExpr::parse(r#"{"state": "TELANGANA"}"#).unwrap();
        let expected: Vec<Value> = all
            .iter()
            .filter(|r| f.matches(r))
            .cloned()
            .map(Value::Object)
            .collect();
        for (limit, offset) in [(10, 0), (10, 25), (5, 30), (100, 40)] {
            let (_, rows) = filter_and_paginate(all.clone(), &request(r#"{"state": "TELANGANA"}"#, limit, offset));
            let end = (offset + limit).min(expected.len() as i64) as usize;
            let start = (offset as usize).min(end);
            assert_eq!(rows, expected[start..end].to_vec(), "limit={limit} offset={offset}");
        }
    }

    #[test]
    fn ordering_and_projection() {
        let records = vec![
            json!({"id": 1, "Age": 40, "Sex": 1}),
            json!({"id": 2, "Age": 25, "Sex": 2}),
            json!({"id": 3, "Age": 40, "Sex": 2}),
            json!({"id": 4, "Sex": 1}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect::<Vec<_>>();

        let mut req = request("", 10, 0);
        req.order_by = Some("Age".into());
        req.direction = SortDirection::Desc;
        req.fields = Some(vec!["id".into()]);
        let (total, rows) = filter_and_paginate(records, &req);
        assert_eq!(total, 4);
        assert_eq!(
            rows,
            vec![json!({"id": 1}), json!({"id": 3}), json!({"id": 2}), json!({"id": 4})]
        );
    }

    #[test]
    fn sort_direction_parsing() {
        assert_eq!(SortDirection::parse(None).unwrap(), SortDirection::Asc);
        assert_eq!(SortDirection::parse(Some("DESC")).unwrap(), SortDirection::Desc);
        assert!(SortDirection::parse(Some("sideways")).is_err());
    }

    fn column(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default: None,
        }
    }

    #[test]
    fn columns_resolve_case_insensitively() {
        let cols = ColumnSet::new(
            "household_survey",
            vec![column("State_UT_Code", "integer"), column("Sector", "integer")],
        );
        assert_eq!(cols.get("state_ut_code").unwrap().name, "State_UT_Code");
        assert_eq!(cols.get("State_Ut_Code").unwrap().name, "State_UT_Code");
        let err = cols.require("Nope").unwrap_err();
        assert_eq!(err.kind(), "invalid_field");
    }

    #[test]
    fn sql_predicates_cast_to_column_types() {
        let cols = ColumnSet::new(
            "person_survey",
            vec![
                column("Age", "integer"),
                column("Sex", "smallint"),
                column("State_UT_Code", "integer"),
                column("Tags", "ARRAY"),
            ],
        );
        let filter = FilterExpr::parse(
            r#"{"age": {"$gte": 25, "$lte": 35}, "Sex": {"$ne": 1}, "State_UT_Code": [28, 29], "Tags": "x", "Unknown": 3}"#,
        )
        .unwrap();
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT 1 FROM t WHERE TRUE");
        push_filters(&mut qb, &filter, &cols);
        let sql = qb.sql();
        assert!(sql.contains(r#""Age" >= CAST($"#), "{sql}");
        assert!(sql.contains(r#""Age" <= CAST($"#), "{sql}");
        assert!(sql.contains(" AS integer)"), "{sql}");
        assert!(sql.contains(r#""Sex" <> CAST($"#), "{sql}");
        assert!(!sql.contains("DISTINCT"), "{sql}");
        assert!(sql.contains(r#""State_UT_Code" IN (CAST($"#), "{sql}");
        assert!(sql.contains(r#""Tags"::text = $"#), "{sql}");
        assert!(!sql.contains("Unknown"), "{sql}");
    }
}
