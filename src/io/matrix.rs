//! Matrix and vector artifacts.
//!
//! Matrices are stored as JSON (`MatrixFile`, row-major) and, for reading by
//! eye, as a text dump: a `rows cols` line then one line per row.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixFile {
    pub rows: usize,
    pub cols: usize,
    /// Row-major values.
    pub data: Vec<f64>,
}

impl MatrixFile {
    pub fn from_matrix(m: &DMatrix<f64>) -> Self {
        let data = (0..m.nrows())
            .flat_map(|i| (0..m.ncols()).map(move |j| (i, j)))
            .map(|(i, j)| m[(i, j)])
            .collect();
        Self {
            rows: m.nrows(),
            cols: m.ncols(),
            data,
        }
    }

    /// A vector is stored as a single column.
    pub fn from_vector(v: &DVector<f64>) -> Self {
        Self {
            rows: v.len(),
            cols: 1,
            data: v.iter().copied().collect(),
        }
    }

    pub fn to_matrix(&self) -> Result<DMatrix<f64>, AppError> {
        if self.rows * self.cols != self.data.len() {
            return Err(AppError::input(format!(
                "Matrix declares {}x{} but holds {} values.",
                self.rows,
                self.cols,
                self.data.len()
            )));
        }
        Ok(DMatrix::from_row_slice(self.rows, self.cols, &self.data))
    }

    /// Accepts a single row or a single column.
    pub fn to_vector(&self) -> Result<DVector<f64>, AppError> {
        let m = self.to_matrix()?;
        if m.ncols() == 1 || m.nrows() == 1 {
            Ok(DVector::from_iterator(m.len(), m.iter().copied()))
        } else {
            Err(AppError::input(format!(
                "Expected a vector, got a {}x{} matrix.",
                m.nrows(),
                m.ncols()
            )))
        }
    }
}

pub fn write_matrix_json(path: &Path, m: &DMatrix<f64>) -> Result<(), AppError> {
    write_json(path, &MatrixFile::from_matrix(m))
}

pub fn write_vector_json(path: &Path, v: &DVector<f64>) -> Result<(), AppError> {
    write_json(path, &MatrixFile::from_vector(v))
}

pub fn read_matrix_json(path: &Path) -> Result<DMatrix<f64>, AppError> {
    read_json(path)?.to_matrix()
}

pub fn read_vector_json(path: &Path) -> Result<DVector<f64>, AppError> {
    read_json(path)?.to_vector()
}

fn write_json(path: &Path, m: &MatrixFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
    serde_json::to_writer(BufWriter::new(file), m)
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
}

fn read_json(path: &Path) -> Result<MatrixFile, AppError> {
    let file =
        File::open(path).map_err(|e| {
            AppError::input(format!("Failed to open '{}': {e}", path.display()))
        })?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::input(format!("Invalid matrix JSON '{}': {e}", path.display())))
}

/// Text dump of a matrix.
pub fn write_matrix_dat(path: &Path, m: &DMatrix<f64>) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
    let write_err =
        |e: std::io::Error| AppError::input(format!("Failed to write '{}': {e}", path.display()));

    let mut out = BufWriter::new(file);
    writeln!(out, "{} {}", m.nrows(), m.ncols()).map_err(write_err)?;
    for row in m.row_iter() {
        let line: Vec<String> = row.iter().map(|v| format!("{v:.10e}")).collect();
        writeln!(out, "{}", line.join(" ")).map_err(write_err)?;
    }
    out.flush().map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_keeps_row_major_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        write_matrix_json(&path, &m).unwrap();

        let raw: MatrixFile = serde_json::from_str(&std::fs::read_to_string(&path).unwrap())
            .unwrap();
        assert_eq!(raw.data[..3], [1.0, 2.0, 3.0]);
        assert_eq!(read_matrix_json(&path).unwrap(), m);
    }

    #[test]
    fn inconsistent_matrix_is_rejected() {
        let bad = MatrixFile {
            rows: 2,
            cols: 2,
            data: vec![1.0],
        };
        assert!(bad.to_matrix().is_err());
        let m = MatrixFile {
            rows: 2,
            cols: 2,
            data: vec![1.0; 4],
        };
        assert!(m.to_vector().is_err());
    }

    #[test]
    fn dat_dump_has_shape_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.dat");
        write_matrix_dat(&path, &DMatrix::identity(2, 2)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "2 2");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1.0000000000e0"));
    }
}
