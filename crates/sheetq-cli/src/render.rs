use std::io::{self, Write};

use serde::Serialize;
use sheetq_engine::{RowStore, ROW_NUMBER_HEADER};

#[derive(Debug, Serialize)]
struct JsonRow {
    row: u32,
    cells: Vec<String>,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    sheet: &'a str,
    query: &'a str,
    total: usize,
    columns: Vec<&'a str>,
    rows: Vec<JsonRow>,
}

/// Tab-separated rows, led by a header line. `limit` caps the printed rows.
pub fn write_text(out: &mut impl Write, view: &RowStore, limit: Option<usize>) -> io::Result<()> {
    let mut header = vec![ROW_NUMBER_HEADER];
    header.extend(view.columns().iter().map(|c| c.header.as_str()));
    writeln!(out, "{}", header.join("\t"))?;

    for record in view.rows().iter().take(limit.unwrap_or(usize::MAX)) {
        write!(out, "{}", record.display_row)?;
        for cell in &record.cells {
            write!(out, "\t{}", cell_text(&cell.to_string()))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_json(
    out: &mut impl Write,
    sheet: &str,
    query: &str,
    view: &RowStore,
    limit: Option<usize>,
) -> io::Result<()> {
    let report = JsonReport {
        sheet,
        query,
        total: view.len(),
        columns: view.columns().iter().map(|c| c.header.as_str()).collect(),
        rows: view
            .rows()
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|record| JsonRow {
                row: record.display_row,
                cells: record.cells.iter().map(ToString::to_string).collect(),
            })
            .collect(),
    };
    serde_json::to_writer(&mut *out, &report)?;
    writeln!(out)
}

/// Keep one record per line.
fn cell_text(text: &str) -> String {
    text.replace(['\t', '\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sheetq_engine::{CellValue, ColumnKind, RowRecord, StoreColumn};

    use super::*;

    fn store() -> RowStore {
        let mut store = RowStore::new(vec![
            StoreColumn {
                header: "Name".into(),
                kind: ColumnKind::Text,
            },
            StoreColumn {
                header: "Note".into(),
                kind: ColumnKind::Text,
            },
        ]);
        store
            .append_batch(vec![
                RowRecord::new(1, vec![CellValue::text("Alice"), CellValue::text("a\tb")]),
                RowRecord::new(2, vec![CellValue::text("Bob"), CellValue::Empty]),
            ])
            .unwrap();
        store
    }

    #[test]
    fn text_is_tab_separated_with_a_row_number_column() {
        let mut out = Vec::new();
        write_text(&mut out, &store(), None).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "#\tName\tNote\n1\tAlice\ta b\n2\tBob\t\n"
        );
    }

    #[test]
    fn json_reports_the_total_even_when_limited() {
        let mut out = Vec::new();
        write_json(&mut out, "People", "alice", &store(), Some(1)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["total"], 2);
        assert_eq!(value["rows"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["rows"][0]["cells"][0], "Alice");
        assert_eq!(value["columns"][1], "Note");
    }
}
