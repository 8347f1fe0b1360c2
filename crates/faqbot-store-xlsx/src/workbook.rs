//! Minimal single-sheet XLSX writer for rule tables.
//!
//! Emits only the parts a spreadsheet reader needs: content types, package
//! relationships, the workbook and one worksheet with inline strings.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use faqbot_core::{FaqTable, REQUIRED_COLUMNS};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const SHEET_NAME: &str = "FAQ";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const PACKAGE_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

#[derive(Debug, thiserror::Error)]
pub enum WorkbookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Empty,
}

/// Write `table` as a workbook with the `role`, `keywords`, `answer` header.
///
/// # Errors
/// Returns an error when the file cannot be created or the archive cannot be written.
pub fn write_table(path: &Path, table: &FaqTable) -> Result<usize, WorkbookError> {
    let rows: Vec<Vec<CellValue>> = table
        .rules()
        .iter()
        .map(|rule| {
            vec![
                CellValue::Text(rule.role().to_string()),
                CellValue::Text(rule.keywords().to_string()),
                CellValue::Text(rule.answer().to_string()),
            ]
        })
        .collect();
    write_rows(path, &REQUIRED_COLUMNS, &rows)?;
    Ok(rows.len())
}

/// Write one worksheet: `header` as row 1, then `rows`.
///
/// # Errors
/// Returns an error when the file cannot be created or the archive cannot be written.
pub fn write_rows(
    path: &Path,
    header: &[&str],
    rows: &[Vec<CellValue>],
) -> Result<(), WorkbookError> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES_XML.as_bytes())?;
    zip.start_file("_rels/.rels", options)?;
    zip.write_all(PACKAGE_RELS_XML.as_bytes())?;
    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(workbook_xml().as_bytes())?;
    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(WORKBOOK_RELS_XML.as_bytes())?;
    zip.start_file("xl/worksheets/sheet1.xml", options)?;
    zip.write_all(sheet_xml(header, rows).as_bytes())?;

    zip.finish()?;
    Ok(())
}

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{SHEET_NAME}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
    )
}

fn sheet_xml(header: &[&str], rows: &[Vec<CellValue>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    let header_row: Vec<CellValue> =
        header.iter().map(|name| CellValue::Text((*name).to_string())).collect();
    push_row(&mut xml, 1, &header_row);
    for (index, row) in rows.iter().enumerate() {
        push_row(&mut xml, index + 2, row);
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

fn push_row(xml: &mut String, row_number: usize, cells: &[CellValue]) {
    xml.push_str(&format!(r#"<row r="{row_number}">"#));
    for (column, cell) in cells.iter().enumerate() {
        let reference = format!("{}{row_number}", column_name(column));
        match cell {
            CellValue::Text(value) => xml.push_str(&format!(
                r#"<c r="{reference}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                escape_xml(value)
            )),
            CellValue::Number(value) => {
                xml.push_str(&format!(r#"<c r="{reference}"><v>{value}</v></c>"#));
            }
            CellValue::Empty => {}
        }
    }
    xml.push_str("</row>");
}

/// Zero-based column index to spreadsheet letters (`0` -> `A`, `26` -> `AA`).
fn column_name(index: usize) -> String {
    let mut name = Vec::new();
    let mut remaining = index + 1;
    while remaining > 0 {
        let offset = (remaining - 1) % 26;
        // offset < 26, always fits in a u8
        name.push(b'A' + u8::try_from(offset).unwrap_or(0));
        remaining = (remaining - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use faqbot_core::Rule;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn column_names_roll_over() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(2), "C");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
    }

    #[test]
    fn sheet_xml_escapes_markup() {
        let rows = vec![vec![CellValue::Text("fees < 5 & \"due\"".to_string())]];
        let xml = sheet_xml(&["answer"], &rows);
        assert!(xml.contains("fees &lt; 5 &amp; &quot;due&quot;"));
        assert!(xml.contains(r#"<c r="A2" t="inlineStr">"#));
    }

    #[test]
    fn exported_table_loads_back_in_order() {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
        let path = dir.path().join("export.xlsx");
        let table = FaqTable::new(vec![
            Rule::new("parent", "fee, fees", "Fees are due on the 5th & 20th."),
            Rule::new("common", "hello", "hi <there>"),
        ]);

        let written = match write_table(&path, &table) {
            Ok(written) => written,
            Err(err) => panic!("export failed: {err}"),
        };
        assert_eq!(written, 2);
        assert_eq!(crate::load(&path), table);
    }
}
