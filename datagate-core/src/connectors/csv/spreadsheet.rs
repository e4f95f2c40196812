//! Excel workbook reading. Only the first worksheet is used.

use crate::error::DataGateError;
use crate::Result;
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use std::io::Cursor;

/// Reads the first worksheet of an `xlsx`/`xls`/`xlsb`/`ods` workbook as
/// text records.
///
/// # Errors
/// Returns a materialization error if the workbook cannot be opened or has
/// no worksheet
pub fn read_first_sheet(bytes: Vec<u8>) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| DataGateError::materialization_failed("Failed to open workbook", e))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DataGateError::materialization("Workbook has no worksheets"))?
        .map_err(|e| DataGateError::materialization_failed("Failed to read worksheet", e))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_datetime().map_or_else(
            || dt.as_f64().to_string(),
            |t| t.format(super::inference::DATETIME_FORMAT).to_string(),
        ),
    }
}
