//! Text decoding and the JSON, YAML and CSV codecs used by the file action.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

/// On-disk format, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    Json,
    Yaml,
    Csv,
    Text,
}

impl Format {
    pub(crate) fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Self::Json,
            Some("yaml" | "yml") => Self::Yaml,
            Some("csv") => Self::Csv,
            _ => Self::Text,
        }
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Csv => "csv",
            Self::Text => "text",
        }
    }

    pub(crate) const fn is_structured(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Decode file bytes to text, honouring and stripping a UTF-8 or UTF-16
/// byte order mark. Without a BOM the bytes must be UTF-8.
pub(crate) fn decode_text(bytes: Vec<u8>) -> Result<String, String> {
    match bytes.as_slice() {
        [0xEF, 0xBB, 0xBF, rest @ ..] => {
            String::from_utf8(rest.to_vec()).map_err(|_| "file is not valid UTF-8".to_owned())
        }
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        _ => String::from_utf8(bytes).map_err(|_| "file is not valid UTF-8".to_owned()),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, String> {
    if bytes.len() % 2 != 0 {
        return Err("UTF-16 file has an odd number of bytes".to_owned());
    }
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| "file is not valid UTF-16".to_owned())
}

pub(crate) fn parse(format: Format, text: &str) -> Result<Value, String> {
    match format {
        Format::Json => parse_json(text),
        Format::Yaml => parse_yaml(text),
        Format::Csv => parse_csv(text),
        Format::Text => Ok(Value::String(text.to_owned())),
    }
}

pub(crate) fn parse_json(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))
}

/// A single document parses to its value; several documents parse to a list.
pub(crate) fn parse_yaml(text: &str) -> Result<Value, String> {
    let mut docs = serde_yaml::Deserializer::from_str(text)
        .map(|doc| Value::deserialize(doc).map_err(|e| format!("invalid YAML: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match docs.len() {
        0 => Value::Null,
        1 => docs.swap_remove(0),
        _ => Value::Array(docs),
    })
}

/// First row is the header. Repeated header names become `name_2`, `name_3`, …
pub(crate) fn parse_csv(text: &str) -> Result<Value, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| format!("invalid CSV header: {e}"))?
        .iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    let headers = dedupe_headers(headers);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("invalid CSV: {e}"))?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), Value::String(v.to_owned())))
            .collect();
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(headers.len());
    for header in headers {
        let count = seen.entry(header.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            out.push(header);
            continue;
        }
        let mut n = *count;
        let mut candidate = format!("{header}_{n}");
        while seen.contains_key(&candidate) {
            n += 1;
            candidate = format!("{header}_{n}");
        }
        seen.insert(candidate.clone(), 1);
        out.push(candidate);
    }
    out
}

pub(crate) fn to_json(value: &Value) -> Result<Vec<u8>, String> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| e.to_string())?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub(crate) fn to_yaml(value: &Value) -> Result<Vec<u8>, String> {
    serde_yaml::to_string(value)
        .map(String::into_bytes)
        .map_err(|e| e.to_string())
}

/// A list of flat objects becomes a CSV table. Columns follow first
/// appearance across rows.
pub(crate) fn to_csv(value: &Value) -> Result<Vec<u8>, String> {
    let Value::Array(rows) = value else {
        return Err("CSV content must be a list of objects".to_owned());
    };
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        let Value::Object(map) = row else {
            return Err("CSV content must be a list of objects".to_owned());
        };
        for key in map.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns).map_err(|e| e.to_string())?;
    for row in rows {
        let record = columns.iter().map(|c| match row.get(*c) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        });
        writer.write_record(record).map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.to_string())
}

/// Follow a `$.a.b.0` path. Numeric segments index into lists.
pub(crate) fn extract<'a>(value: &'a Value, path: &str) -> Result<&'a Value, String> {
    let rest = path
        .strip_prefix('$')
        .ok_or_else(|| format!("extract path must start with `$`: {path}"))?;
    if rest.is_empty() {
        return Ok(value);
    }
    let rest = rest
        .strip_prefix('.')
        .ok_or_else(|| format!("extract path must use `$.a.b` form: {path}"))?;

    let mut current = value;
    for segment in rest.split('.') {
        if segment.is_empty() {
            return Err(format!("empty segment in extract path: {path}"));
        }
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| format!("extract path segment `{segment}` not found"))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("a.json", Format::Json)]
    #[case("a.YAML", Format::Yaml)]
    #[case("a.yml", Format::Yaml)]
    #[case("a.csv", Format::Csv)]
    #[case("a.txt", Format::Text)]
    #[case("noext", Format::Text)]
    fn format_by_extension(#[case] path: &str, #[case] expected: Format) {
        assert_eq!(Format::from_path(Path::new(path)), expected);
    }

    #[rstest]
    #[case(b"\xEF\xBB\xBFhi".to_vec(), "hi")]
    #[case(b"\xFF\xFEh\0i\0".to_vec(), "hi")]
    #[case(b"\xFE\xFF\0h\0i".to_vec(), "hi")]
    #[case(b"plain".to_vec(), "plain")]
    fn boms_are_stripped(#[case] bytes: Vec<u8>, #[case] expected: &str) {
        assert_eq!(decode_text(bytes).unwrap(), expected);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert!(decode_text(vec![0xC3, 0x28]).is_err());
    }

    #[test]
    fn csv_duplicate_headers_are_suffixed() {
        let rows = parse_csv("name,age,name\nA,1,B\n").unwrap();
        assert_eq!(rows, json!([{"name": "A", "age": "1", "name_2": "B"}]));
    }

    #[test]
    fn csv_suffix_skips_taken_names() {
        let headers = dedupe_headers(vec!["a".into(), "a_2".into(), "a".into()]);
        assert_eq!(headers, vec!["a", "a_2", "a_3"]);
    }

    #[test]
    fn yaml_multi_document_becomes_list() {
        assert_eq!(parse_yaml("a: 1\n---\nb: 2\n").unwrap(), json!([{"a": 1}, {"b": 2}]));
        assert_eq!(parse_yaml("a: 1\n").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn csv_writer_uses_first_seen_columns() {
        let bytes = to_csv(&json!([{"a": "1", "b": 2}, {"c": true}])).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "a,b,c\n1,2,\n,,true\n");
    }

    #[rstest]
    #[case("$", json!({"a": {"b": [10, 20]}}))]
    #[case("$.a.b", json!([10, 20]))]
    #[case("$.a.b.1", json!(20))]
    fn extract_follows_path(#[case] path: &str, #[case] expected: Value) {
        let doc = json!({"a": {"b": [10, 20]}});
        assert_eq!(extract(&doc, path).unwrap(), &expected);
    }

    #[rstest]
    #[case("$.a.missing")]
    #[case("$.a.b.5")]
    #[case("a.b")]
    #[case("$..a")]
    fn extract_rejects_bad_paths(#[case] path: &str) {
        let doc = json!({"a": {"b": [10, 20]}});
        assert!(extract(&doc, path).is_err());
    }
}
