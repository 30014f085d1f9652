#![deny(unsafe_code)]

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// A single raw or transformed cell.
///
/// Pattern matchers and transforms operate over this closed set of kinds;
/// there is no untyped fallback.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
}

/// Discriminant of a [`CellValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Text,
    Number,
    Bool,
}

static NULL_VALUE: CellValue = CellValue::Null;

impl CellValue {
    /// Builds a cell from raw upload text. Empty and whitespace-only strings become null.
    pub fn from_raw(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Self::Null
        } else {
            Self::Text(raw.to_string())
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Text(_) => ValueKind::Text,
            Self::Number(_) => ValueKind::Number,
            Self::Bool(_) => ValueKind::Bool,
        }
    }

    /// Null cells and blank text both count as missing.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.trim().is_empty(),
            Self::Number(value) => value.is_nan(),
            Self::Bool(_) => false,
        }
    }

    /// Renders the value as trimmed text, or `None` when missing.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        if self.is_null() {
            return None;
        }
        match self {
            Self::Null => None,
            Self::Text(text) => Some(Cow::Borrowed(text.trim())),
            Self::Number(value) => Some(Cow::Owned(format!("{value}"))),
            Self::Bool(value) => Some(Cow::Borrowed(if *value { "true" } else { "false" })),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => Ok(()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::from_raw(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A row as stored in a target table: column name to value.
pub type Record = BTreeMap<String, CellValue>;

/// A target table's contents keyed by record id.
pub type TableData = BTreeMap<String, Record>;

/// One uploaded row. `number` is 1-based and excludes any header line.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SourceRow {
    pub number: u64,
    pub cells: BTreeMap<String, CellValue>,
}

impl SourceRow {
    /// Returns the cell for `column`, or null when the row does not carry it.
    pub fn get(&self, column: &str) -> &CellValue {
        self.cells.get(column).unwrap_or(&NULL_VALUE)
    }
}

/// An uploaded dataset as handed over by the parsing collaborator.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Dataset {
    /// File name (or other stable identifier) of the upload.
    pub source_file: String,
    /// Decoder that produced the rows, e.g. "csv" or "json".
    pub source_type: String,
    /// Declared legacy system name, when the uploader supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_system: Option<String>,
    /// Column names in upload order.
    pub columns: Vec<String>,
    pub rows: Vec<SourceRow>,
}

impl Dataset {
    pub fn new(
        source_file: impl Into<String>,
        source_type: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            source_type: source_type.into(),
            source_system: None,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_source_system(mut self, system: impl Into<String>) -> Self {
        self.source_system = Some(system.into());
        self
    }

    /// Appends a row, assigning the next row number. Unknown columns are
    /// appended to the column list in first-seen order.
    pub fn push_row(&mut self, cells: BTreeMap<String, CellValue>) -> u64 {
        for name in cells.keys() {
            if !self.columns.iter().any(|c| c == name) {
                self.columns.push(name.clone());
            }
        }
        let number = self.rows.len() as u64 + 1;
        self.rows.push(SourceRow { number, cells });
        number
    }

    /// Builds a dataset from ordered `(column, raw text)` pairs per row.
    pub fn from_text_rows<'a, I, R>(source_file: &str, source_type: &str, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut dataset = Self::new(source_file, source_type, Vec::new());
        for row in rows {
            let mut cells = BTreeMap::new();
            let mut order = Vec::new();
            for (column, raw) in row {
                order.push(column.to_string());
                cells.insert(column.to_string(), CellValue::from_raw(raw));
            }
            for column in order {
                if !dataset.columns.contains(&column) {
                    dataset.columns.push(column);
                }
            }
            dataset.push_row(cells);
        }
        dataset
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Iterates the values of one column in row order.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a CellValue> {
        self.rows.iter().map(move |row| row.get(column))
    }
}
