//! Execution engine: transports, result types and output table parsing.

use std::{collections::BTreeMap, fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{CambError, Result},
    params::Params,
    plan::OutputFileSet,
};

pub mod disk;
#[cfg(unix)]
pub mod fifo;
#[cfg(unix)]
pub mod pipe;

/// Rectangular, row-major numeric table as written by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "Vec<Vec<f64>>", try_from = "Vec<Vec<f64>>")]
pub struct Table {
    ncols: usize,
    data: Vec<f64>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TableError {
    #[error("line {line}: '{token}' is not a number")]
    BadNumber { line: usize, token: String },
    #[error("line {line}: expected {expected} columns, found {found}")]
    Ragged { line: usize, expected: usize, found: usize },
    #[error("no data")]
    Empty,
}

impl Table {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, TableError> {
        let ncols = rows.first().map(Vec::len).ok_or(TableError::Empty)?;
        let mut data = Vec::with_capacity(ncols * rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != ncols {
                return Err(TableError::Ragged {
                    line: i + 1,
                    expected: ncols,
                    found: row.len(),
                });
            }
            data.extend(row);
        }
        Ok(Self { ncols, data })
    }

    /// Whitespace separated columns, one row per line. Blank lines and `#`
    /// comments are skipped. Fortran `D` exponents are accepted.
    pub fn parse(text: &str) -> Result<Self, TableError> {
        let mut ncols = 0;
        let mut data = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let before = data.len();
            for token in line.split_whitespace() {
                data.push(parse_number(token).ok_or_else(|| TableError::BadNumber {
                    line: idx + 1,
                    token: token.to_string(),
                })?);
            }
            let found = data.len() - before;
            if ncols == 0 {
                ncols = found;
            } else if found != ncols {
                return Err(TableError::Ragged {
                    line: idx + 1,
                    expected: ncols,
                    found,
                });
            }
        }
        if data.is_empty() {
            return Err(TableError::Empty);
        }
        Ok(Self { ncols, data })
    }

    pub fn nrows(&self) -> usize {
        if self.ncols == 0 {
            0
        } else {
            self.data.len() / self.ncols
        }
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if col >= self.ncols {
            return None;
        }
        self.data.get(row * self.ncols + col).copied()
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        let start = row * self.ncols;
        self.data.get(start..start + self.ncols)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.ncols.max(1))
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        self.rows().filter_map(|r| r.get(col).copied()).collect()
    }

    /// Combine two equally shaped tables cell by cell, except column 0 which
    /// is copied from `self`.
    pub fn zip_with_index(&self, other: &Table, f: impl Fn(f64, f64) -> f64) -> Option<Table> {
        if self.shape() != other.shape() {
            return None;
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .enumerate()
            .map(|(i, (a, b))| if i % self.ncols == 0 { *a } else { f(*a, *b) })
            .collect();
        Some(Table { ncols: self.ncols, data })
    }
}

impl From<Table> for Vec<Vec<f64>> {
    fn from(t: Table) -> Self {
        t.rows().map(<[f64]>::to_vec).collect()
    }
}

impl TryFrom<Vec<Vec<f64>>> for Table {
    type Error = TableError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, TableError> {
        Table::from_rows(rows)
    }
}

fn parse_number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().or_else(|| {
        if token.contains(['d', 'D']) {
            token.replace(['d', 'D'], "e").parse::<f64>().ok()
        } else {
            None
        }
    })
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:.10e}")).collect();
            writeln!(f, "{}", cells.join(" "))?;
        }
        Ok(())
    }
}

/// Tables produced by one engine run plus its log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub tables: BTreeMap<String, Table>,
    pub log: String,
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    pub fn get(&self, key: &str) -> Option<&Table> {
        self.tables.get(key)
    }
}

/// Strategy used to hand parameters to the engine and collect its outputs.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// `params` are already merged with the defaults.
    async fn execute(&self, params: &Params) -> Result<ExecutionResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Disk,
    Pipe,
}

impl FromStr for Protocol {
    type Err = CambError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(Protocol::Disk),
            "pipe" => Ok(Protocol::Pipe),
            other => Err(CambError::UnknownProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Disk => "disk",
            Protocol::Pipe => "pipe",
        })
    }
}

/// Transport selected at construction time.
#[derive(Debug, Clone)]
pub enum Backend {
    Disk(disk::DiskTransport),
    #[cfg(unix)]
    Pipe(pipe::PipeTransport),
}

impl Backend {
    pub fn protocol(&self) -> Protocol {
        match self {
            Backend::Disk(_) => Protocol::Disk,
            #[cfg(unix)]
            Backend::Pipe(_) => Protocol::Pipe,
        }
    }
}

impl Transport for Backend {
    async fn execute(&self, params: &Params) -> Result<ExecutionResult> {
        match self {
            Backend::Disk(t) => t.execute(params).await,
            #[cfg(unix)]
            Backend::Pipe(t) => t.execute(params).await,
        }
    }
}

/// Plans outputs and returns the parameters with output paths filled in.
pub(crate) fn prepare(plan: &crate::plan::OutputPlan, params: &Params) -> Result<(OutputFileSet, Params)> {
    let files = plan.plan(params)?;
    let mut params = params.clone();
    files.inject(&mut params);
    Ok((files, params))
}

/// Read one output file; any failure just means no table.
pub(crate) fn read_table(path: &Path) -> Option<Table> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            debug!("no output at {}: {}", path.display(), e);
            return None;
        }
    };
    match Table::parse(&text) {
        Ok(t) => Some(t),
        Err(e) => {
            debug!("discarding {}: {}", path.display(), e);
            None
        }
    }
}
