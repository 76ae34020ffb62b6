//! Per-extension conversion to markdown. Each converter takes
//! raw bytes plus the extension that selected it and returns a markdown
//! string, or a `TextError` that the caller downgrades to "no text" for
//! this entity (spec: "A failed conversion sets the text to `None`").

use std::io::Cursor as IoCursor;

use calamine::{open_workbook_from_rs, Reader, Xlsx};

use crate::error::{Result, TextError};
use crate::ocr::OcrAdapter;

/// `.html` / `.htm` via the `spider_transformations` readability stack.
pub fn html_to_markdown(html: &[u8], source_url: Option<&str>) -> Result<String> {
    use spider_transformations::transformation::content::{
        transform_content_input, ReturnFormat, TransformConfig, TransformInput,
    };
    let parsed_url = source_url.and_then(|u| url::Url::parse(u).ok());
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html,
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };
    Ok(transform_content_input(input, &config))
}

/// `.xlsx` via `calamine`: one markdown table per sheet.
pub fn xlsx_to_markdown(bytes: &[u8]) -> Result<String> {
    let mut workbook: Xlsx<_> =
        open_workbook_from_rs(IoCursor::new(bytes)).map_err(|e| TextError::Spreadsheet(e.to_string()))?;
    let mut out = String::new();
    for sheet_name in workbook.sheet_names().to_owned() {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| TextError::Spreadsheet(e.to_string()))?;
        out.push_str(&format!("## {sheet_name}\n\n"));
        let mut rows = range.rows();
        if let Some(header) = rows.next() {
            let header_cells: Vec<String> = header.iter().map(|c| c.to_string()).collect();
            out.push_str(&format!("| {} |\n", header_cells.join(" | ")));
            out.push_str(&format!("|{}|\n", "---|".repeat(header_cells.len())));
        }
        for row in rows {
            let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        out.push('\n');
    }
    Ok(out)
}

/// `.docx` via `docx-rs`: paragraph text, in document order.
pub fn docx_to_markdown(bytes: &[u8]) -> Result<String> {
    use docx_rs::read_docx;
    let docx = read_docx(bytes).map_err(|e| TextError::Docx(e.to_string()))?;
    let json = serde_json::to_value(&docx.document)
        .map_err(|e| TextError::Docx(e.to_string()))?;
    let mut out = String::new();
    collect_docx_text(&json, &mut out);
    Ok(out.trim().to_string())
}

/// `docx-rs`'s document tree serializes to JSON; walking it for every
/// `"text"` string field is more robust across its run/paragraph variants
/// than matching the typed AST by hand.
fn collect_docx_text(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(s)) = map.get("text") {
                out.push_str(s);
            }
            for v in map.values() {
                collect_docx_text(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_docx_text(item, out);
            }
        }
        _ => {}
    }
}

/// `.csv` rendered as a markdown table.
pub fn csv_to_markdown(bytes: &[u8]) -> Result<String> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| TextError::Csv { path: "<csv>".into(), source: e })?
        .clone();
    let mut out = format!("| {} |\n", headers.iter().collect::<Vec<_>>().join(" | "));
    out.push_str(&format!("|{}|\n", "---|".repeat(headers.len())));
    for record in reader.records() {
        let record = record.map_err(|e| TextError::Csv { path: "<csv>".into(), source: e })?;
        out.push_str(&format!("| {} |\n", record.iter().collect::<Vec<_>>().join(" | ")));
    }
    Ok(out)
}

/// `.json` pretty-printed inside a fenced block; invalid JSON is a hard
/// `EntityProcessingError`, not a silent best-effort render.
pub fn json_to_markdown(bytes: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(bytes);
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| TextError::InvalidJson { path: "<json>".into(), source: e })?;
    let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string());
    Ok(format!("```json\n{pretty}\n```"))
}

/// `.xml` pretty-printed inside a fenced block (best-effort; XML isn't
/// re-parsed/validated, only fenced for display like the original).
pub fn xml_to_markdown(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    format!("```xml\n{text}\n```")
}

/// `.txt` / `.md`: passed through unchanged.
pub fn plain_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// `.yaml` / `.toml`: fenced for readability, not reparsed.
pub fn fenced(bytes: &[u8], lang: &str) -> String {
    let text = String::from_utf8_lossy(bytes);
    format!("```{lang}\n{text}\n```")
}

/// PDF / PPTX / images: delegated to whichever `OcrAdapter` the caller
/// configured.
pub async fn ocr_to_markdown(adapter: &dyn OcrAdapter, bytes: &[u8], mime_type: &str) -> Result<String> {
    adapter
        .extract_markdown(bytes, mime_type)
        .await
        .map_err(|e| TextError::Ocr(e.to_string()))
}
