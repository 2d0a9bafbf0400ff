//! Alternate renderings of a query page: a CSV download and a
//! header-plus-rows table for display clients.

use std::collections::BTreeSet;

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Table,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Csv => "text/csv; charset=utf-8",
            OutputFormat::Json | OutputFormat::Table => "application/json",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TableView {
    pub dataset: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_records: i64,
    pub displayed: usize,
}

/// Column order for a page: the requested projection when there is one,
/// otherwise every key seen in any row, sorted.
pub fn columns(rows: &[Value], fields: Option<&[String]>) -> Vec<String> {
    if let Some(fields) = fields {
        return fields.to_vec();
    }
    rows.iter()
        .filter_map(Value::as_object)
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Nulls and missing keys become empty cells; nested values stay JSON text.
pub fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn row_cells<'a>(row: &'a Value, headers: &'a [String]) -> impl Iterator<Item = String> + 'a {
    headers.iter().map(move |h| cell(row.get(h)))
}

/// RFC 4180 document with one header line. An empty page still carries
/// the header when the columns are known.
pub fn to_csv(rows: &[Value], fields: Option<&[String]>) -> anyhow::Result<Vec<u8>> {
    let headers = columns(rows, fields);
    let mut writer = csv::Writer::from_writer(Vec::new());
    if !headers.is_empty() {
        writer.write_record(&headers).context("write csv header")?;
    }
    for row in rows {
        writer
            .write_record(row_cells(row, &headers))
            .context("write csv row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush csv: {}", e.error()))
}

pub fn to_table(
    dataset: &str,
    total_records: i64,
    rows: &[Value],
    fields: Option<&[String]>,
) -> TableView {
    let headers = columns(rows, fields);
    let rows: Vec<Vec<String>> = rows.iter().map(|r| row_cells(r, &headers).collect()).collect();
    TableView {
        dataset: dataset.to_string(),
        displayed: rows.len(),
        headers,
        rows,
        total_records,
    }
}
