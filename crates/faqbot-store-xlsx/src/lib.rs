use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use calamine::{open_workbook_auto_from_rs, Data, ExcelDateTime, Reader};
use chrono::Timelike;
use faqbot_core::{FaqTable, Rule};
use parking_lot::RwLock;
use thiserror::Error;

pub mod workbook;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Excel parse error: {0}")]
    Calamine(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("missing required column `{0}`")]
    MissingColumn(&'static str),
}

#[derive(Debug, Error)]
pub enum ReplaceError {
    #[error("failed to move {} onto {}: {source}", .staged.display(), .canonical.display())]
    Move {
        staged: PathBuf,
        canonical: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load the rule table, logging and degrading to an empty table on any failure.
#[must_use]
pub fn load(path: &Path) -> FaqTable {
    match try_load(path) {
        Ok(table) => {
            tracing::info!(path = %path.display(), rows = table.len(), "loaded faq table");
            table
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to load faq, using empty table"
            );
            FaqTable::empty()
        }
    }
}

/// Read the first worksheet of `path` into a rule table.
///
/// The workbook format is detected from the file content, so an `.xls`
/// payload stored under an `.xlsx` name still loads.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed, has no worksheet,
/// or its header row lacks one of `role`, `keywords`, `answer`.
pub fn try_load(path: &Path) -> Result<FaqTable, LoadError> {
    let bytes = fs::read(path)?;
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook.worksheet_range_at(0).ok_or(LoadError::NoWorksheet)??;
    // the range starts at the first used row, which is not always sheet row 1
    let header_row = range.start().map_or(0, |(row, _)| usize::try_from(row).unwrap_or(0)) + 1;

    let mut rows = range.rows();
    let header: Vec<String> =
        rows.next().map(|row| row.iter().map(cell_to_string).collect()).unwrap_or_default();
    let role_col = column_index(&header, "role")?;
    let keywords_col = column_index(&header, "keywords")?;
    let answer_col = column_index(&header, "answer")?;

    let rules = rows.enumerate().filter_map(|(offset, row)| {
        let cell = |index: usize| row.get(index).map(cell_to_string).unwrap_or_default();
        let (role, keywords, answer) = (cell(role_col), cell(keywords_col), cell(answer_col));
        if role.is_empty() && keywords.is_empty() && answer.is_empty() {
            return None;
        }
        Some((header_row + 1 + offset, Rule::new(role, keywords, answer)))
    });
    Ok(FaqTable::from_sheet_rows(rules))
}

fn column_index(header: &[String], name: &'static str) -> Result<usize, LoadError> {
    header.iter().position(|column| column == name).ok_or(LoadError::MissingColumn(name))
}

/// Text of one cell as the matcher sees it.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        // whole numbers drop the fraction so a `2024` keyword reads back as "2024"
        Data::Float(number) if number.fract() == 0.0 => format!("{number:.0}"),
        Data::Float(number) => number.to_string(),
        Data::Int(number) => number.to_string(),
        Data::Bool(true) => "TRUE".to_string(),
        Data::Bool(false) => "FALSE".to_string(),
        Data::Error(err) => format!("#ERROR: {err:?}"),
        Data::DateTime(stamp) => excel_datetime_to_string(stamp),
    }
}

/// `YYYY-MM-DD`, with ` HH:MM:SS` appended when the time of day is not midnight.
/// Durations and out-of-range serials fall back to the raw serial number.
fn excel_datetime_to_string(stamp: &ExcelDateTime) -> String {
    if stamp.is_duration() {
        return stamp.to_string();
    }
    match stamp.as_datetime() {
        Some(datetime) if datetime.num_seconds_from_midnight() == 0 => {
            datetime.format("%Y-%m-%d").to_string()
        }
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => stamp.to_string(),
    }
}

/// Owner of the active rule table and of the canonical spreadsheet it is loaded from.
///
/// Readers take an [`Arc`] snapshot; a reload builds a complete new table and
/// swaps the pointer, so no reader ever sees a partially replaced table.
#[derive(Debug)]
pub struct FaqStore {
    canonical_path: PathBuf,
    active: RwLock<Arc<FaqTable>>,
}

impl FaqStore {
    /// Create the store and load the canonical file once.
    #[must_use]
    pub fn open(canonical_path: impl Into<PathBuf>) -> Self {
        let canonical_path = canonical_path.into();
        let table = load(&canonical_path);
        Self::with_table(canonical_path, table)
    }

    #[must_use]
    pub fn with_table(canonical_path: impl Into<PathBuf>, table: FaqTable) -> Self {
        Self { canonical_path: canonical_path.into(), active: RwLock::new(Arc::new(table)) }
    }

    #[must_use]
    pub fn canonical_path(&self) -> &Path {
        &self.canonical_path
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<FaqTable> {
        Arc::clone(&*self.active.read())
    }

    /// Re-read the canonical file and make the result active.
    pub fn reload(&self) -> Arc<FaqTable> {
        self.swap(load(&self.canonical_path))
    }

    /// Move `staged` over the canonical file, then reload.
    ///
    /// The staged file is renamed, not copied, so it no longer exists at its
    /// original path on success. A workbook that fails to parse after the move
    /// still replaces the active table, with an empty one.
    ///
    /// # Errors
    /// Returns [`ReplaceError::Move`] when the rename fails; the active table is
    /// left untouched in that case.
    pub fn replace(&self, staged: &Path) -> Result<Arc<FaqTable>, ReplaceError> {
        fs::rename(staged, &self.canonical_path).map_err(|source| ReplaceError::Move {
            staged: staged.to_path_buf(),
            canonical: self.canonical_path.clone(),
            source,
        })?;
        let table = self.reload();
        tracing::info!(
            path = %self.canonical_path.display(),
            rows = table.len(),
            "faq table replaced"
        );
        Ok(table)
    }

    fn swap(&self, table: FaqTable) -> Arc<FaqTable> {
        let table = Arc::new(table);
        *self.active.write() = Arc::clone(&table);
        table
    }
}
