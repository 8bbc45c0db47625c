//! Text extraction for office formats.
//!
//! DOCX and XLSX are zip containers of XML parts; the parts are scanned with
//! regexes rather than a full XML parser since only text runs and cell values
//! are needed.

use crate::content::ContentReader;
use crate::error::ExtractionError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Display;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

static DOCX_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>|<w:br/>").expect("valid docx run regex")
});
static EMPTY_PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<w:p\b[^>]*/>").expect("valid empty paragraph regex"));
static TEXT_NODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<t(?:\s[^>]*)?>([^<]*)</t>").expect("valid text node regex"));
static PHONETIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<rPh\b.*?</rPh>").expect("valid phonetic regex"));
static SHARED_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<si>(.*?)</si>|<si/>").expect("valid shared string regex"));
static ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<row\b[^>]*?(?:/>|>(.*?)</row>)").expect("valid row regex"));
static CELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)").expect("valid cell regex")
});
static CELL_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\br="([A-Z]+)[0-9]+""#).expect("valid cell ref regex"));
static CELL_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bt="([^"]*)""#).expect("valid cell type regex"));
static CELL_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<v>([^<]*)</v>").expect("valid cell value regex"));
static FIRST_SHEET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<sheet\b[^>]*\br:id="([^"]+)""#).expect("valid sheet regex"));
static RELATIONSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Relationship\b[^>]*>").expect("valid relationship regex"));
static REL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bId="([^"]+)""#).expect("valid relationship id regex"));
static REL_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bTarget="([^"]+)""#).expect("valid relationship target regex"));
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x[0-9A-Fa-f]+|#[0-9]+|[a-z]+);").expect("valid entity regex"));

const DEFAULT_SHEET: &str = "xl/worksheets/sheet1.xml";

fn failure(path: &Path, reason: impl Display) -> ExtractionError {
    ExtractionError::ReadFailure {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Text of every page
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfReader;

impl ContentReader for PdfReader {
    fn read(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = std::fs::read(path).map_err(|e| failure(path, e))?;
        // the parser panics on some malformed files
        match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes)) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(err)) => Err(failure(path, err)),
            Err(_) => Err(failure(path, "PDF parser panicked")),
        }
    }
}

/// Paragraph text of a Word document, one paragraph per line
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxReader;

impl ContentReader for DocxReader {
    fn read(&self, path: &Path) -> Result<String, ExtractionError> {
        let mut archive = open_archive(path)?;
        let xml = read_entry(&mut archive, "word/document.xml", path)?
            .ok_or_else(|| failure(path, "word/document.xml is missing"))?;
        Ok(docx_text(&xml))
    }
}

fn docx_text(xml: &str) -> String {
    let xml = EMPTY_PARAGRAPH.replace_all(xml, "</w:p>");
    let mut paragraphs: Vec<String> = xml
        .split("</w:p>")
        .map(|segment| {
            let mut text = String::new();
            for run in DOCX_RUN.captures_iter(segment) {
                match run.get(1) {
                    Some(body) => text.push_str(&unescape(body.as_str())),
                    None if run[0].starts_with("<w:tab") => text.push('\t'),
                    None => text.push('\n'),
                }
            }
            text
        })
        .collect();
    // whatever follows the last paragraph (section properties)
    if paragraphs.last().is_some_and(String::is_empty) {
        paragraphs.pop();
    }
    paragraphs.join("\n")
}

/// First worksheet of a workbook rendered as CSV, header row included
#[derive(Debug, Default, Clone, Copy)]
pub struct XlsxReader;

impl ContentReader for XlsxReader {
    fn read(&self, path: &Path) -> Result<String, ExtractionError> {
        let mut archive = open_archive(path)?;
        let shared = read_entry(&mut archive, "xl/sharedStrings.xml", path)?
            .map(|xml| shared_strings(&xml))
            .unwrap_or_default();
        let sheet_path = first_sheet_path(&mut archive, path)?;
        let sheet = read_entry(&mut archive, &sheet_path, path)?
            .ok_or_else(|| failure(path, format!("{sheet_path} is missing")))?;
        Ok(sheet_csv(&sheet, &shared))
    }
}

fn shared_strings(xml: &str) -> Vec<String> {
    SHARED_STRING
        .captures_iter(xml)
        .map(|item| match item.get(1) {
            Some(body) => {
                let body = PHONETIC.replace_all(body.as_str(), "");
                TEXT_NODE
                    .captures_iter(&body)
                    .map(|t| unescape(&t[1]))
                    .collect()
            }
            None => String::new(),
        })
        .collect()
}

/// Resolve the first `<sheet>` of the workbook through its relationships
fn first_sheet_path(archive: &mut ZipArchive<File>, path: &Path) -> Result<String, ExtractionError> {
    let Some(workbook) = read_entry(archive, "xl/workbook.xml", path)? else {
        return Ok(DEFAULT_SHEET.to_string());
    };
    let Some(rel_id) = FIRST_SHEET.captures(&workbook).map(|c| c[1].to_string()) else {
        return Ok(DEFAULT_SHEET.to_string());
    };
    let Some(rels) = read_entry(archive, "xl/_rels/workbook.xml.rels", path)? else {
        return Ok(DEFAULT_SHEET.to_string());
    };

    let target = RELATIONSHIP.find_iter(&rels).find_map(|tag| {
        let tag = tag.as_str();
        let id = REL_ID.captures(tag)?;
        if id[1] != rel_id {
            return None;
        }
        REL_TARGET.captures(tag).map(|t| t[1].to_string())
    });
    Ok(match target {
        Some(target) => match target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("xl/{target}"),
        },
        None => DEFAULT_SHEET.to_string(),
    })
}

fn sheet_csv(xml: &str, shared: &[String]) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for row in ROW.captures_iter(xml) {
        let Some(body) = row.get(1) else {
            rows.push(Vec::new());
            continue;
        };
        let mut cells: Vec<String> = Vec::new();
        for cell in CELL.captures_iter(body.as_str()) {
            let attrs = cell.get(1).map_or("", |m| m.as_str());
            let inner = cell.get(2).map_or("", |m| m.as_str());
            let column = CELL_REF
                .captures(attrs)
                .map_or(cells.len(), |c| column_index(&c[1]));
            if column >= cells.len() {
                cells.resize(column + 1, String::new());
            }
            cells[column] = cell_value(attrs, inner, shared);
        }
        rows.push(cells);
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut csv = String::new();
    for mut row in rows {
        row.resize(width, String::new());
        let line: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        csv.push_str(&line.join(","));
        csv.push('\n');
    }
    csv
}

fn cell_value(attrs: &str, inner: &str, shared: &[String]) -> String {
    let kind = CELL_TYPE.captures(attrs).map(|c| c[1].to_string());
    let raw = CELL_VALUE.captures(inner).map(|c| unescape(&c[1]));
    match kind.as_deref() {
        Some("s") => raw
            .and_then(|index| index.trim().parse::<usize>().ok())
            .and_then(|index| shared.get(index).cloned())
            .unwrap_or_default(),
        Some("inlineStr") => TEXT_NODE
            .captures_iter(inner)
            .map(|t| unescape(&t[1]))
            .collect(),
        Some("b") => match raw.as_deref() {
            Some("1") => "TRUE".to_string(),
            Some("0") => "FALSE".to_string(),
            _ => String::new(),
        },
        _ => raw.unwrap_or_default(),
    }
}

/// `A` is 0, `Z` is 25, `AA` is 26
fn column_index(letters: &str) -> usize {
    letters
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + usize::from(b - b'A') + 1)
        .saturating_sub(1)
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => name
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| name.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(|code| code.ok())
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>, ExtractionError> {
    let file = File::open(path).map_err(|e| failure(path, e))?;
    ZipArchive::new(file).map_err(|e| failure(path, e))
}

/// `Ok(None)` when the archive has no entry called `name`
fn read_entry(
    archive: &mut ZipArchive<File>,
    name: &str,
    path: &Path,
) -> Result<Option<String>, ExtractionError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(failure(path, err)),
    };
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| failure(path, format!("{name}: {e}")))?;
    Ok(Some(xml))
}
