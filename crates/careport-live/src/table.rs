//! Table rendering for live lists.
//!
//! Column keys come from the bound table's header cells (one attribute per
//! `<th>`) and are captured once. Every refresh then rebuilds the whole body
//! and swaps it in.

use std::sync::Arc;

use parking_lot::Mutex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::warn;

use crate::error::TableError;
use crate::payload::Record;

/// Header attribute naming the record field of each column.
pub const DEFAULT_COLUMN_ATTRIBUTE: &str = "atag";
/// Cell text for absent or empty fields.
pub const EMPTY_CELL: &str = "<empty>";
pub const ROW_CLASSES: [&str; 2] = ["even", "odd"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRow {
    pub class: String,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableBody {
    pub rows: Vec<TableRow>,
}

impl TableBody {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Where rendered bodies go.
pub trait TableView: Send {
    /// Value of attribute `name` on each header cell, in column order.
    fn header_attributes(&self, name: &str) -> Vec<Option<String>>;

    /// Replaces the whole body at once.
    fn replace_body(&mut self, body: TableBody);
}

impl<T: TableView> TableView for Arc<Mutex<T>> {
    fn header_attributes(&self, name: &str) -> Vec<Option<String>> {
        self.lock().header_attributes(name)
    }

    fn replace_body(&mut self, body: TableBody) {
        self.lock().replace_body(body)
    }
}

#[derive(Debug, Clone)]
pub struct TableRenderer {
    attribute: String,
    columns: Option<Vec<String>>,
}

impl TableRenderer {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            columns: None,
        }
    }

    /// Column keys, once the first render has captured them.
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn render<V: TableView + ?Sized>(&mut self, view: &mut V, records: &[Record]) {
        let columns = self
            .columns
            .get_or_insert_with(|| capture_columns(&*view, &self.attribute));
        view.replace_body(build_body(columns, records));
    }
}

impl Default for TableRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_COLUMN_ATTRIBUTE)
    }
}

fn capture_columns<V: TableView + ?Sized>(view: &V, attribute: &str) -> Vec<String> {
    let attributes = view.header_attributes(attribute);
    if attributes.is_empty() {
        warn!(target: "careport::table", attribute, "table contains no column keys");
    }
    attributes
        .into_iter()
        .enumerate()
        .map(|(column, key)| {
            key.unwrap_or_else(|| {
                warn!(
                    target: "careport::table",
                    column,
                    attribute,
                    "header cell has no column key"
                );
                String::new()
            })
        })
        .collect()
}

pub fn build_body(columns: &[String], records: &[Record]) -> TableBody {
    let classes = cycle_classes(records.len(), &ROW_CLASSES);
    let rows = records
        .iter()
        .zip(classes)
        .map(|(record, class)| TableRow {
            class: class.to_string(),
            cells: columns
                .iter()
                .map(|column| cell_text(record.get(column)))
                .collect(),
        })
        .collect();
    TableBody { rows }
}

/// Assigns `classes` to `count` positions round-robin.
pub fn cycle_classes<'a>(count: usize, classes: &[&'a str]) -> Vec<&'a str> {
    if classes.is_empty() {
        return vec![""; count];
    }
    (0..count).map(|idx| classes[idx % classes.len()]).collect()
}

pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => EMPTY_CELL.to_string(),
        Some(Value::String(text)) if text.is_empty() => EMPTY_CELL.to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCell {
    pub label: String,
    attributes: Vec<(String, String)>,
}

impl HeaderCell {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// In-memory table bound from HTML markup.
#[derive(Debug, Clone, Default)]
pub struct HtmlTable {
    headers: Vec<HeaderCell>,
    body: TableBody,
    replacements: u64,
}

impl HtmlTable {
    /// Reads the header cells (`thead th`) out of a table's markup.
    pub fn parse(markup: &str) -> Result<Self, TableError> {
        let selector =
            Selector::parse("thead th").map_err(|err| TableError::Selector(err.to_string()))?;
        let document = Html::parse_fragment(markup);
        let headers = document
            .select(&selector)
            .map(|cell| HeaderCell {
                label: cell.text().collect::<String>().trim().to_string(),
                attributes: cell
                    .value()
                    .attrs()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            })
            .collect();
        Ok(Self {
            headers,
            ..Self::default()
        })
    }

    /// Header row built directly from `(key, label)` pairs, each key stored
    /// under `attribute`.
    pub fn from_columns<K, L>(attribute: &str, columns: impl IntoIterator<Item = (K, L)>) -> Self
    where
        K: Into<String>,
        L: Into<String>,
    {
        let headers = columns
            .into_iter()
            .map(|(key, label)| HeaderCell {
                label: label.into(),
                attributes: vec![(attribute.to_string(), key.into())],
            })
            .collect();
        Self {
            headers,
            ..Self::default()
        }
    }

    pub fn headers(&self) -> &[HeaderCell] {
        &self.headers
    }

    pub fn body(&self) -> &TableBody {
        &self.body
    }

    /// Number of bodies swapped in so far.
    pub fn replacements(&self) -> u64 {
        self.replacements
    }

    pub fn tbody_html(&self) -> String {
        let mut out = String::from("<tbody>");
        for row in &self.body.rows {
            out.push_str("<tr class=\"");
            out.push_str(&escape_html(&row.class));
            out.push_str("\">");
            for cell in &row.cells {
                out.push_str("<td>");
                out.push_str(&escape_html(cell));
                out.push_str("</td>");
            }
            out.push_str("</tr>");
        }
        out.push_str("</tbody>");
        out
    }
}

impl TableView for HtmlTable {
    fn header_attributes(&self, name: &str) -> Vec<Option<String>> {
        self.headers
            .iter()
            .map(|cell| cell.attribute(name).map(str::to_string))
            .collect()
    }

    fn replace_body(&mut self, body: TableBody) {
        self.body = body;
        self.replacements += 1;
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BEACON_TABLE: &str = r#"
        <table class="table">
          <thead><tr>
            <th atag="source">Server</th>
            <th atag="age">Last seen</th>
            <th>Notes</th>
          </tr></thead>
          <tbody><tr><td>stale</td></tr></tbody>
        </table>"#;

    fn rows(values: Value) -> Vec<Record> {
        serde_json::from_value(values).expect("records")
    }

    #[test]
    fn parses_header_cells() {
        let table = HtmlTable::parse(BEACON_TABLE).expect("table");
        let labels: Vec<_> = table.headers().iter().map(|h| h.label.as_str()).collect();
        assert_eq!(labels, ["Server", "Last seen", "Notes"]);
        assert_eq!(
            table.header_attributes("atag"),
            [Some("source".to_string()), Some("age".to_string()), None]
        );
    }

    #[test]
    fn captures_columns_once_and_fills_placeholders() {
        let mut table = HtmlTable::parse(BEACON_TABLE).expect("table");
        let mut renderer = TableRenderer::default();
        renderer.render(
            &mut table,
            &rows(json!([
                {"source": "10.0.0.1:5064", "age": " 0:00:05.0"},
                {"source": "10.0.0.2:5064", "age": ""},
                {"source": "10.0.0.3:5064", "age": null},
            ])),
        );

        assert_eq!(renderer.columns().unwrap(), ["source", "age", ""]);
        let body = table.body();
        assert_eq!(body.len(), 3);
        assert_eq!(body.rows[0].cells, ["10.0.0.1:5064", " 0:00:05.0", EMPTY_CELL]);
        assert_eq!(body.rows[1].cells[1], EMPTY_CELL);
        assert_eq!(body.rows[2].cells[1], EMPTY_CELL);
        let classes: Vec<_> = body.rows.iter().map(|r| r.class.as_str()).collect();
        assert_eq!(classes, ["even", "odd", "even"]);
    }

    #[test]
    fn every_render_replaces_the_body() {
        let mut table = HtmlTable::parse(BEACON_TABLE).expect("table");
        let mut renderer = TableRenderer::default();
        renderer.render(&mut table, &rows(json!([{"source": "a"}, {"source": "b"}])));
        renderer.render(&mut table, &rows(json!([{"source": "c"}])));
        assert_eq!(table.replacements(), 2);
        assert_eq!(table.body().len(), 1);
        assert_eq!(table.body().rows[0].cells[0], "c");
    }

    #[test]
    fn table_without_headers_renders_empty_rows() {
        let mut table = HtmlTable::parse("<table><tbody></tbody></table>").expect("table");
        let mut renderer = TableRenderer::default();
        renderer.render(&mut table, &rows(json!([{"source": "a"}])));
        assert_eq!(renderer.columns().unwrap().len(), 0);
        assert_eq!(table.body().rows[0].cells.len(), 0);
    }

    #[test]
    fn columns_without_markup() {
        let mut table = HtmlTable::from_columns("atag", [("pv", "PV"), ("client", "Client")]);
        assert_eq!(table.headers()[1].label, "Client");
        let mut renderer = TableRenderer::default();
        renderer.render(&mut table, &rows(json!([{"client": "opi3:40122"}])));
        assert_eq!(table.body().rows[0].cells, [EMPTY_CELL, "opi3:40122"]);
    }

    #[test]
    fn numbers_render_as_text() {
        assert_eq!(cell_text(Some(&json!(5064))), "5064");
        assert_eq!(cell_text(Some(&json!(0))), "0");
        assert_eq!(cell_text(None), EMPTY_CELL);
    }

    #[test]
    fn cycle_classes_wraps_around() {
        assert_eq!(cycle_classes(5, &["a", "b", "c"]), ["a", "b", "c", "a", "b"]);
        assert_eq!(cycle_classes(2, &[]), ["", ""]);
    }

    #[test]
    fn tbody_html_escapes_text() {
        let mut table = HtmlTable::default();
        table.replace_body(TableBody {
            rows: vec![TableRow {
                class: "even".into(),
                cells: vec!["<empty>".into(), "a&b".into()],
            }],
        });
        assert_eq!(
            table.tbody_html(),
            "<tbody><tr class=\"even\"><td>&lt;empty&gt;</td><td>a&amp;b</td></tr></tbody>"
        );
    }
}
