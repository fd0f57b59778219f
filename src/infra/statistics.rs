// ============================================================
// Layer 6 — Statistics Table
// ============================================================
// Append-only CSV table: a fixed header of column names, then
// one row per epoch (training summary), per test pass, or per
// image (detection tables).
//
//   curr_epoch,train_loss,val_loss
//   0,0.812345,0.790001
//   1,0.701200,0.688800
//
// Opening a table either starts it fresh (truncates and writes
// the header) or continues an existing one, in which case the
// header on disk must match the requested columns. Rows are
// given keyed by column name and written in header order.
// Undefined values are written as NaN.

use anyhow::{bail, Context, Result};
use std::{
    collections::HashMap,
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

use crate::domain::agreement::Agreement;

/// Whether opening a table keeps what is already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Continuation {
    #[default]
    Fresh,
    Append,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Index(usize),
    Float(f64),
    Agreement(Agreement),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i)              => write!(f, "{i}"),
            Self::Float(v) if v.is_nan() => f.write_str("NaN"),
            Self::Float(v)              => write!(f, "{v:.6}"),
            Self::Agreement(a)          => write!(f, "{a}"),
            Self::Text(s)               => f.write_str(s),
        }
    }
}

/// One table row, keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct Row {
    cells: HashMap<String, Cell>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, cell: Cell) -> Self {
        self.cells.insert(column.into(), cell);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, cell: Cell) {
        self.cells.insert(column.into(), cell);
    }
}

pub struct StatisticsTable {
    path:    PathBuf,
    columns: Vec<String>,
}

impl StatisticsTable {
    pub fn open(path: impl Into<PathBuf>, columns: Vec<String>, mode: Continuation) -> Result<Self> {
        let path   = path.into();
        let header = columns.join(",");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
        }

        let existing = match mode {
            Continuation::Fresh => None,
            Continuation::Append if path.exists() => Some(
                fs::read_to_string(&path)
                    .with_context(|| format!("Cannot read statistics file '{}'", path.display()))?,
            ),
            Continuation::Append => None,
        };

        match existing.as_deref().and_then(|text| text.lines().next()) {
            Some(found) if found.trim_end() == header => {
                tracing::debug!("Continuing statistics table '{}'", path.display());
            }
            Some(found) => bail!(
                "Statistics file '{}' has header '{}' but '{}' was expected",
                path.display(),
                found,
                header
            ),
            None => {
                let mut f = fs::File::create(&path)
                    .with_context(|| format!("Cannot create statistics file '{}'", path.display()))?;
                writeln!(f, "{header}")?;
                tracing::debug!("Created statistics table '{}'", path.display());
            }
        }

        Ok(Self { path, columns })
    }

    /// Append one row; every column must be present and no others.
    pub fn append(&self, row: &Row) -> Result<()> {
        if let Some(extra) = row.cells.keys().find(|k| !self.columns.contains(k)) {
            bail!("Column '{extra}' is not part of '{}'", self.path.display());
        }
        let values = self
            .columns
            .iter()
            .map(|column| {
                row.cells
                    .get(column)
                    .map(Cell::to_string)
                    .with_context(|| format!("Row is missing column '{column}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Cannot open statistics file '{}'", self.path.display()))?;
        writeln!(f, "{}", values.join(","))?;
        Ok(())
    }
}

/// Read a statistics file back as (header, rows).
#[cfg(test)]
pub fn load_table(path: impl AsRef<std::path::Path>) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read statistics file '{}'", path.display()))?;
    let mut lines = text.lines();
    let header = lines
        .next()
        .map(|line| line.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    let rows = lines
        .filter(|line| !line.is_empty())
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect();
    Ok((header, rows))
}
