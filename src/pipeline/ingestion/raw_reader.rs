//! Raw extract reading: byte decoding with encoding fallback, CSV/JSON parsing into
//! a string table, and lenient numeric coercion.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, warn};

use super::registry::RawFormat;
use crate::constants::MISSING_TOKENS;
use crate::error::{EtlError, Result};

static DOTTED_THOUSANDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d{1,3}(\.\d{3})+$").expect("valid regex"));

/// A raw extract as a header row plus string cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column position; exact match first, then trimmed and case-insensitive
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name).or_else(|| {
            self.headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
        })
    }

    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| self.column(c).is_none())
            .map(|c| c.to_string())
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = RawRow<'_>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(index, cells)| RawRow { index, cells })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RawRow<'a> {
    pub index: usize,
    cells: &'a [Option<String>],
}

impl<'a> RawRow<'a> {
    /// Trimmed cell value; empty cells read as `None`
    pub fn get(&self, column: usize) -> Option<&'a str> {
        self.cells
            .get(column)
            .and_then(|c| c.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A decoded and parsed raw file
#[derive(Debug, Clone)]
pub struct RawFile {
    pub table: RawTable,
    pub encoding: String,
    /// Hex SHA-256 of the bytes on disk
    pub sha256: String,
}

/// Read, decode and parse one raw extract
pub fn read_raw_file(
    path: &Path,
    format: RawFormat,
    delimiter: Option<char>,
    encodings: &[String],
) -> Result<RawFile> {
    let bytes = std::fs::read(path)?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let (text, encoding) = decode(&bytes, encodings, path)?;
    let table = match format {
        RawFormat::Csv => parse_csv(&text, delimiter)?,
        RawFormat::Json => parse_json(&text)?,
    };
    debug!(
        path = %path.display(),
        encoding = %encoding,
        rows = table.len(),
        "Raw file parsed"
    );
    Ok(RawFile {
        table,
        encoding,
        sha256,
    })
}

/// Decode bytes with the first encoding in `encodings` that accepts them
pub fn decode(bytes: &[u8], encodings: &[String], path: &Path) -> Result<(String, String)> {
    for encoding in encodings {
        match try_decode(bytes, encoding) {
            Some(text) => return Ok((text, encoding.clone())),
            None => debug!(path = %path.display(), encoding = %encoding, "Decoding attempt failed"),
        }
    }
    Err(EtlError::Encoding {
        path: path.to_path_buf(),
        tried: encodings.to_vec(),
    })
}

fn try_decode(bytes: &[u8], encoding: &str) -> Option<String> {
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => {
            let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
            std::str::from_utf8(body).ok().map(str::to_string)
        }
        "utf-16" | "utf16" => decode_utf16_with_bom(bytes),
        "latin-1" | "latin1" | "iso-8859-1" => Some(bytes.iter().map(|&b| b as char).collect()),
        other => {
            warn!(encoding = other, "Unsupported encoding in fallback list");
            None
        }
    }
}

fn decode_utf16_with_bom(bytes: &[u8]) -> Option<String> {
    let (little_endian, body) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => return None,
    };
    if body.len() % 2 != 0 {
        return None;
    }
    let units = body.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });
    char::decode_utf16(units).collect::<std::result::Result<String, _>>().ok()
}

/// Pick the delimiter that occurs most often in the header line; ties go to comma
pub fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    [b'\t', b';', b',']
        .into_iter()
        .max_by_key(|d| header.bytes().filter(|b| b == d).count())
        .unwrap_or(b',')
}

pub fn parse_csv(text: &str, delimiter: Option<char>) -> Result<RawTable> {
    let delimiter = match delimiter {
        Some(d) if d.is_ascii() => d as u8,
        Some(d) => {
            return Err(EtlError::Config(format!(
                "CSV delimiter {:?} is not a single-byte character",
                d
            )))
        }
        None => sniff_delimiter(text),
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|v| Some(v.to_string())).collect());
    }
    Ok(RawTable::new(headers, rows))
}

/// Parse a top-level array of objects, or an object holding one under
/// `records` / `data`. Scalars are stringified; nested values are ignored.
pub fn parse_json(text: &str) -> Result<RawTable> {
    let value: Value = serde_json::from_str(text)?;
    let records = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj
            .remove("records")
            .or_else(|| obj.remove("data"))
        {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(EtlError::Config(
                    "JSON extract must be an array or carry a 'records'/'data' array".into(),
                ))
            }
        },
        _ => {
            return Err(EtlError::Config(
                "JSON extract must be an array of objects".into(),
            ))
        }
    };

    let mut headers: Vec<String> = Vec::new();
    for record in &records {
        if let Value::Object(obj) = record {
            for key in obj.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
    }

    let rows = records
        .iter()
        .filter_map(|record| record.as_object())
        .map(|obj| {
            headers
                .iter()
                .map(|h| obj.get(h).and_then(scalar_to_string))
                .collect()
        })
        .collect();

    Ok(RawTable::new(headers, rows))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Lenient numeric coercion for statistical extracts.
///
/// Accepts decimal comma ("1.234,5"), thousands separators ("1,234.5", "1 234"),
/// and treats the usual missing markers as `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if MISSING_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return None;
    }
    let compact: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '€' && *c != '%')
        .collect();

    let last_comma = compact.rfind(',');
    let last_dot = compact.rfind('.');
    let normalized = match (last_comma, last_dot) {
        // Both present: the later one is the decimal separator
        (Some(c), Some(d)) if c > d => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(_), None) => {
            // A single comma is decimal; only repeated three-digit groups are thousands
            let groups: Vec<&str> = compact.split(',').collect();
            let thousands = groups.len() > 2 && groups[1..].iter().all(|g| g.len() == 3);
            if thousands {
                compact.replace(',', "")
            } else {
                compact.replace(',', ".")
            }
        }
        (None, Some(_)) => {
            if compact.matches('.').count() > 1 {
                compact.replace('.', "")
            } else {
                compact
            }
        }
        (None, None) => compact,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integer coercion; fractional values are rejected.
///
/// Counts never carry decimals, so "47.986" reads as a dotted thousands group here.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let value = if DOTTED_THOUSANDS.is_match(trimmed) {
        trimmed.replace('.', "").parse::<f64>().ok()?
    } else {
        parse_number(trimmed)?
    };
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn encodings() -> Vec<String> {
        vec!["utf-8".into(), "utf-16".into(), "latin-1".into()]
    }

    #[test]
    fn test_decode_fallback_chain() {
        let path = PathBuf::from("x.csv");

        let (text, enc) = decode("\u{feff}Gràcia".as_bytes(), &encodings(), &path).unwrap();
        assert_eq!((text.as_str(), enc.as_str()), ("Gràcia", "utf-8"));

        // "Gràcia" in latin-1: 0xE0 is not valid UTF-8 on its own
        let latin1 = [b'G', b'r', 0xE0, b'c', b'i', b'a'];
        let (text, enc) = decode(&latin1, &encodings(), &path).unwrap();
        assert_eq!((text.as_str(), enc.as_str()), ("Gràcia", "latin-1"));

        let mut utf16 = vec![0xFF, 0xFE];
        for unit in "Sants".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        let (text, enc) = decode(&utf16, &encodings(), &path).unwrap();
        assert_eq!((text.as_str(), enc.as_str()), ("Sants", "utf-16"));
    }

    #[test]
    fn test_decode_exhausted_is_encoding_error() {
        let err = decode(&[0xE0, 0x80], &["utf-8".to_string()], Path::new("bad.csv")).unwrap_err();
        assert!(matches!(err, EtlError::Encoding { ref tried, .. } if tried == &["utf-8"]));
    }

    #[test]
    fn test_parse_csv_sniffs_semicolon() {
        let table = parse_csv("Any;Nom_Barri;Preu\n2020;la Vila de Gràcia;15,2\n2021; el Raval ;\n", None).unwrap();
        assert_eq!(table.headers(), &["Any", "Nom_Barri", "Preu"]);
        assert_eq!(table.len(), 2);
        let rows: Vec<RawRow> = table.rows().collect();
        assert_eq!(rows[0].get(2), Some("15,2"));
        assert_eq!(rows[1].get(1), Some("el Raval"));
        assert_eq!(rows[1].get(2), None);
        assert_eq!(table.column("nom_barri"), Some(1));
        assert_eq!(table.missing_columns(&["Any", "Trimestre"]), vec!["Trimestre"]);
    }

    #[test]
    fn test_parse_json_shapes() {
        let table = parse_json(r#"{"records":[{"barri":"Sants","any":2020,"poblacio":41000},{"barri":"el Raval","any":2020,"extra":true}]}"#).unwrap();
        assert_eq!(table.headers(), &["any", "barri", "poblacio", "extra"]);
        let rows: Vec<RawRow> = table.rows().collect();
        assert_eq!(rows[0].get(2), Some("41000"));
        assert_eq!(rows[1].get(2), None);

        let table = parse_json(r#"[{"a":"1"}]"#).unwrap();
        assert_eq!(table.len(), 1);

        assert!(parse_json(r#"{"rows":[]}"#).is_err());
    }

    #[test]
    fn test_parse_number_locales() {
        assert_eq!(parse_number("15,2"), Some(15.2));
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("1.234.567"), Some(1234567.0));
        assert_eq!(parse_number("1 234"), Some(1234.0));
        assert_eq!(parse_number("3.5"), Some(3.5));
        assert_eq!(parse_number("12 %"), Some(12.0));
        assert_eq!(parse_number("-4"), Some(-4.0));
    }

    #[test]
    fn test_parse_number_missing_tokens() {
        for token in ["", " ", "-", "..", "n.d.", "NA", "null", "abc"] {
            assert_eq!(parse_number(token), None, "{:?}", token);
        }
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("41.000,0"), Some(41000));
        assert_eq!(parse_integer("2020"), Some(2020));
        assert_eq!(parse_integer("47.986"), Some(47986));
        assert_eq!(parse_integer("12,5"), None);
    }
}
