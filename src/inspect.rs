use anyhow::{Context, Result};
use futures::future::try_join_all;
use std::fmt::Write;

use crate::catalog::Catalog;
use crate::data_models::ColumnDescriptor;

const SAMPLE_ROWS: i64 = 5;

/// Everything the inspector prints for one table.
#[derive(Debug)]
pub struct TableReport {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub sample: Vec<serde_json::Value>,
}

/// Reads every table's schema and sample rows concurrently. Reports come
/// back in catalog order.
pub async fn collect(catalog: &Catalog) -> Result<Vec<TableReport>> {
    let tables = catalog.list_tables().await.context("failed to list tables")?;

    let reports = tables.into_iter().map(|table| async move {
        let columns = catalog
            .table_schema(&table.name)
            .await
            .with_context(|| format!("failed to read schema for {}", table.name))?;
        let sample = catalog
            .sample_rows(&table.name, SAMPLE_ROWS)
            .await
            .with_context(|| format!("failed to read rows from {}", table.name))?;
        anyhow::Ok(TableReport {
            name: table.name,
            columns,
            sample,
        })
    });

    try_join_all(reports).await
}

pub fn describe_column(column: &ColumnDescriptor) -> String {
    let mut line = format!("{} ({})", column.name, column.data_type);
    if column.pk {
        line.push_str(" PRIMARY KEY");
    }
    if column.notnull {
        line.push_str(" NOT NULL");
    }
    line
}

pub fn render(reports: &[TableReport]) -> Result<String> {
    let mut out = String::new();
    if reports.is_empty() {
        writeln!(out, "No tables found.")?;
        return Ok(out);
    }

    writeln!(out, "Tables in the database:")?;
    for report in reports {
        writeln!(out, "- {}", report.name)?;
    }

    for report in reports {
        writeln!(out, "\nSchema for table {}:", report.name)?;
        for column in &report.columns {
            writeln!(out, "  {}", describe_column(column))?;
        }
        writeln!(
            out,
            "\nSample data from table {} (up to {SAMPLE_ROWS} rows):",
            report.name
        )?;
        if report.sample.is_empty() {
            writeln!(out, "  No data found.")?;
        } else {
            writeln!(out, "{}", serde_json::to_string_pretty(&report.sample)?)?;
        }
    }
    Ok(out)
}
