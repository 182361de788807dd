//! Whitespace-separated dictionary tables.
//!
//! ```text
//! @INSTRUMENT MEGACAM
//! @BAND r
//! #Date : modified julian date
//! #Flux :
//! #end
//! 53612.3 1204.5
//! ```
//!
//! `@KEY value` lines are globals, `#name : description` lines declare the
//! columns in order and every other non-empty line is a row. Rows are parsed
//! and written with the `csv` crate (space delimiter).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::StringRecord;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Column {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct DictTable {
    globals: Vec<(String, String)>,
    columns: Vec<Column>,
    rows: Vec<StringRecord>,
}

impl DictTable {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            globals: Vec::new(),
            columns: columns
                .iter()
                .map(|c| Column {
                    name: c.as_ref().to_string(),
                    description: String::new(),
                })
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Attach a description to an existing column.
    pub fn describe(&mut self, column: &str, description: impl Into<String>) {
        if let Some(c) = self.columns.iter_mut().find(|c| c.name == column) {
            c.description = description.into();
        }
    }

    /// Set (or replace) a global.
    pub fn set_global(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.globals.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.globals.push((key, value)),
        }
    }

    pub fn global(&self, key: &str) -> Option<&str> {
        self.globals.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn globals(&self) -> &[(String, String)] {
        &self.globals
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row; it must have one field per declared column.
    pub fn push_row<I, S>(&mut self, fields: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let record: StringRecord = fields.into_iter().map(|f| f.as_ref().to_string()).collect();
        if record.len() != self.columns.len() {
            return Err(AppError::input(format!(
                "Row has {} fields, table has {} columns.",
                record.len(),
                self.columns.len()
            )));
        }
        self.rows.push(record);
        Ok(())
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let c = self.column_index(column)?;
        self.rows.get(row)?.get(c)
    }

    pub fn number(&self, row: usize, column: &str) -> Result<f64, AppError> {
        let raw = self
            .value(row, column)
            .ok_or_else(|| AppError::input(format!("Missing column '{column}' in row {row}.")))?;
        raw.parse::<f64>().map_err(|_| {
            AppError::input(format!("Invalid number '{raw}' in column '{column}', row {row}."))
        })
    }

    /// Whole numeric column.
    pub fn numbers(&self, column: &str) -> Result<Vec<f64>, AppError> {
        if self.column_index(column).is_none() {
            return Err(AppError::input(format!("Missing column '{column}'.")));
        }
        (0..self.rows.len()).map(|r| self.number(r, column)).collect()
    }

    pub fn read(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path)
            .map_err(|e| AppError::input(format!("Failed to read '{}': {e}", path.display())))?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse table text; `source` only labels error messages.
    pub fn parse(text: &str, source: &str) -> Result<Self, AppError> {
        let mut table = DictTable::default();
        let mut body = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(global) = line.strip_prefix('@') {
                let (key, value) = global.split_once(char::is_whitespace).unwrap_or((global, ""));
                table.set_global(key, value.trim());
                continue;
            }
            if let Some(decl) = line.strip_prefix('#') {
                if let Some((name, description)) = decl.split_once(':') {
                    let name = name.trim();
                    if !name.is_empty() {
                        table.columns.push(Column {
                            name: name.to_string(),
                            description: description.trim().to_string(),
                        });
                    }
                }
                continue;
            }
            body.push_str(&line.split_whitespace().collect::<Vec<_>>().join(" "));
            body.push('\n');
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b' ')
            .flexible(true)
            .from_reader(body.as_bytes());

        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                AppError::input(format!("Invalid row {} in '{source}': {e}", i + 1))
            })?;
            if record.len() != table.columns.len() {
                return Err(AppError::input(format!(
                    "Row {} in '{source}' has {} fields, {} columns are declared.",
                    i + 1,
                    record.len(),
                    table.columns.len()
                )));
            }
            table.rows.push(record);
        }
        Ok(table)
    }

    pub fn write(&self, path: &Path) -> Result<(), AppError> {
        let file = File::create(path)
            .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
        let write_err = |e: std::io::Error| {
            AppError::input(format!("Failed to write '{}': {e}", path.display()))
        };

        let mut out = BufWriter::new(file);
        for (key, value) in &self.globals {
            writeln!(out, "@{key} {value}").map_err(write_err)?;
        }
        for c in &self.columns {
            writeln!(out, "#{} : {}", c.name, c.description).map_err(write_err)?;
        }
        writeln!(out, "#end").map_err(write_err)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .delimiter(b' ')
            .from_writer(out);
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|e| {
                    AppError::input(format!("Failed to write '{}': {e}", path.display()))
                })?;
        }
        writer.flush().map_err(write_err)?;
        Ok(())
    }
}
