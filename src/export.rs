#![cfg(not(tarpaulin_include))]

use crate::error::EngineError;
use crate::store::Analysis;

/// Column order shared by every export format
///
/// CSV headers, XLSX headers and JSON keys all follow this order, so a
/// consumer can switch formats without re-mapping columns.
pub const FIELD_ORDER: [&str; 11] = [
    "id",
    "user_id",
    "sample_name",
    "method",
    "value1",
    "value2",
    "value3",
    "mean",
    "std_dev",
    "coef_var",
    "recorded_at",
];

/// Convert analysis rows to CSV format
///
/// This function exports recorded analyses to CSV (Comma-Separated Values)
/// format. It creates a string with the result data where:
/// - The header row lists the fields in [`FIELD_ORDER`]
/// - Values are comma-separated, one analysis per line
/// - Special characters (commas, quotes, newlines) are properly escaped
///
/// # Arguments
/// * `rows` - The analyses to convert
///
/// # Returns
/// * `String` - CSV content, header row included even when `rows` is empty
///
/// # Examples
/// ```
/// use centesimal::export::to_csv;
///
/// let csv = to_csv(&[]);
/// assert!(csv.starts_with("id,user_id,sample_name"));
/// ```
pub fn to_csv(rows: &[Analysis]) -> String {
    let mut csv_content = String::new();

    // Header row with the stable field order
    csv_content.push_str(&FIELD_ORDER.join(","));
    csv_content.push('\n');

    // Add data rows
    for row in rows {
        for (i, value) in rendered_fields(row).iter().enumerate() {
            if i > 0 {
                csv_content.push(',');
            }

            // Handle value - escape commas, quotes, newlines as needed
            if value.contains(',') || value.contains('"') || value.contains('\n') {
                let escaped = value.replace("\"", "\"\"");
                csv_content.push_str(&format!("\"{}\"", escaped));
            } else {
                csv_content.push_str(value);
            }
        }
        csv_content.push('\n');
    }

    csv_content
}

/// Convert analysis rows to XLSX format
///
/// This function exports recorded analyses to XLSX (Excel) format using the
/// rust_xlsxwriter library. Numeric fields are written as numbers so the
/// resulting sheet can be used for further calculation, not just display.
///
/// # Arguments
/// * `rows` - The analyses to convert
///
/// # Returns
/// * `Result<Vec<u8>, EngineError>` - XLSX file content as bytes or an error
///
/// # Errors
/// * Returns [`EngineError::Workbook`] if the workbook cannot be assembled
pub fn to_xlsx(rows: &[Analysis]) -> Result<Vec<u8>, EngineError> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    // Create a new workbook and worksheet
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    // Header row
    for (col, field) in FIELD_ORDER.iter().enumerate() {
        worksheet.write_string(0, col as u16, *field)?;
    }

    // Data rows, typed per column
    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        worksheet.write_number(r, 0, row.id as f64)?;
        worksheet.write_number(r, 1, row.user_id as f64)?;
        worksheet.write_string(r, 2, &row.sample_name)?;
        worksheet.write_string(r, 3, row.method.name())?;
        worksheet.write_number(r, 4, row.value1)?;
        worksheet.write_number(r, 5, row.value2)?;
        worksheet.write_number(r, 6, row.value3)?;
        worksheet.write_number(r, 7, row.mean)?;
        worksheet.write_number(r, 8, row.std_dev)?;
        worksheet.write_number(r, 9, row.coef_var)?;
        worksheet.write_string(r, 10, &row.recorded_at)?;
    }

    workbook.push_worksheet(worksheet);

    // Save to memory buffer
    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

/// Convert analysis rows to pretty-printed JSON
///
/// Field order inside each object follows [`FIELD_ORDER`], matching the
/// CSV and XLSX exports.
///
/// # Arguments
/// * `rows` - The analyses to convert
///
/// # Returns
/// * `Result<String, EngineError>` - JSON array as a string or an error
///
/// # Errors
/// * Returns [`EngineError::Serialization`] if serialization fails
pub fn to_json(rows: &[Analysis]) -> Result<String, EngineError> {
    Ok(serde_json::to_string_pretty(rows)?)
}

/// Render analysis rows as a plain-text report
///
/// Produces a human-readable listing with one block per analysis: a
/// heading with the sample, method and timestamp, then the replicate
/// values and aggregates on a detail line.
///
/// # Arguments
/// * `rows` - The analyses to render
///
/// # Returns
/// * `String` - The report text
pub fn to_report(rows: &[Analysis]) -> String {
    let mut report = String::new();
    report.push_str("Proximate composition results\n");
    report.push_str("=============================\n\n");

    if rows.is_empty() {
        report.push_str("No results recorded.\n");
        return report;
    }

    for row in rows {
        report.push_str(&format!(
            "{} - {} ({})\n",
            row.sample_name, row.method, row.recorded_at
        ));
        report.push_str(&format!(
            "  replicates {:.2}, {:.2}, {:.2} | mean {:.2}% | sd {:.2} | cv {:.2}%\n\n",
            row.value1, row.value2, row.value3, row.mean, row.std_dev, row.coef_var
        ));
    }

    report
}

/// Render one analysis as text fields in [`FIELD_ORDER`]
///
/// Percent values keep two decimals so CSV output matches what users see
/// on screen.
fn rendered_fields(row: &Analysis) -> [String; 11] {
    [
        row.id.to_string(),
        row.user_id.to_string(),
        row.sample_name.clone(),
        row.method.name().to_string(),
        format!("{:.2}", row.value1),
        format!("{:.2}", row.value2),
        format!("{:.2}", row.value3),
        format!("{:.2}", row.mean),
        format!("{:.2}", row.std_dev),
        format!("{:.2}", row.coef_var),
        row.recorded_at.clone(),
    ]
}
