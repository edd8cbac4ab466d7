//! Row/column view of a payload, the common ground for format conversion.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Number, Value};

use super::DataFormat;
use crate::error::PipelineError;

const FLATTEN_SEPARATOR: &str = "_";

/// Rectangular data with scalar cells (`Null`, `Bool`, `Number` or `String`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build from flattened records; columns appear in first-seen order and
    /// missing cells become `Null`.
    pub fn from_records(records: Vec<Vec<(String, Value)>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for (name, _) in record {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|record| {
                let mut row = vec![Value::Null; columns.len()];
                for (name, value) in record {
                    if let Some(idx) = columns.iter().position(|c| *c == name) {
                        row[idx] = value;
                    }
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Records as JSON objects, column order preserved
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(object)
            })
            .collect()
    }

    /// Parse a payload of the given format into rows and columns.
    pub fn decode(body: &[u8], format: DataFormat) -> Result<Self, PipelineError> {
        let table = match format {
            DataFormat::Json => Self::from_json(body)?,
            DataFormat::Csv => Self::from_delimited(body, b',')?,
            DataFormat::Tsv => Self::from_delimited(body, b'\t')?,
            DataFormat::Xml => Self::from_xml(body)?,
            other => {
                return Err(PipelineError::serialization(format!(
                    "{other} payloads cannot be read as a table"
                )));
            }
        };

        if table.columns.is_empty() {
            return Err(PipelineError::serialization(format!(
                "{format} payload contains no tabular records"
            )));
        }

        Ok(table)
    }

    pub fn from_json(body: &[u8]) -> Result<Self, PipelineError> {
        let document: Value = serde_json::from_slice(body)
            .map_err(|e| PipelineError::serialization(format!("invalid JSON: {e}")))?;

        let records = match find_records(&document) {
            Some(items) => items.iter().map(flatten_record).collect(),
            None => vec![flatten_record(&document)],
        };

        Ok(Self::from_records(records))
    }

    pub fn from_delimited(body: &[u8], delimiter: u8) -> Result<Self, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(body);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::serialization(format!("invalid header row: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| PipelineError::serialization(format!("invalid row: {e}")))?;
            let mut row: Vec<Value> = record.iter().map(infer_scalar).collect();
            row.resize(columns.len(), Value::Null);
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    pub fn from_xml(body: &[u8]) -> Result<Self, PipelineError> {
        let root = parse_xml(body)?;

        let records: Vec<Vec<(String, Value)>> = match root.repeated_children() {
            Some(items) => items.into_iter().map(flatten_record_element).collect(),
            // a lone record wrapped in a container, e.g. <records><record>..</record></records>
            None if root.children.len() == 1 && !root.children[0].children.is_empty() => {
                vec![flatten_record_element(&root.children[0])]
            }
            None => {
                let mut out = Vec::new();
                for child in &root.children {
                    flatten_element(child, "", &mut out);
                }
                for (name, value) in &root.attributes {
                    out.push((name.clone(), infer_scalar(value)));
                }
                vec![out]
            }
        };

        let records = records.into_iter().filter(|r| !r.is_empty()).collect();
        Ok(Self::from_records(records))
    }
}

/// Depth-first search for the first array holding objects
fn find_records(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) if items.iter().any(Value::is_object) => Some(items),
        Value::Array(items) if !items.is_empty() && value_is_scalar_list(items) => Some(items),
        Value::Object(map) => map.values().find_map(|v| match v {
            Value::Array(items) if items.iter().any(Value::is_object) => Some(items),
            Value::Object(_) => find_records(v),
            _ => None,
        }),
        _ => None,
    }
}

fn value_is_scalar_list(items: &[Value]) -> bool {
    items.iter().all(|v| !v.is_array() && !v.is_object())
}

fn flatten_record(value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_value(value, String::new(), &mut out);
    out
}

fn flatten_value(value: &Value, prefix: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_value(nested, join_key(&prefix, key), out);
            }
        }
        Value::Array(items) => {
            for (idx, nested) in items.iter().enumerate() {
                flatten_value(nested, join_key(&prefix, &idx.to_string()), out);
            }
        }
        scalar => {
            let name = if prefix.is_empty() {
                "value".to_string()
            } else {
                prefix
            };
            out.push((name, scalar.clone()));
        }
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{FLATTEN_SEPARATOR}{key}")
    }
}

/// Typed cell from delimited or markup text. Numbers with leading zeros
/// (identifiers, zip codes) stay strings.
pub(crate) fn infer_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match trimmed {
        "true" | "TRUE" | "True" => return Value::Bool(true),
        "false" | "FALSE" | "False" => return Value::Bool(false),
        _ => {}
    }

    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    if leading_zero || trimmed.starts_with('+') {
        return Value::String(raw.to_string());
    }

    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if let Some(number) = Number::from_f64(float).filter(|_| float.is_finite()) {
            return Value::Number(number);
        }
    }

    Value::String(raw.to_string())
}

#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, PipelineError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| PipelineError::serialization(format!("invalid XML attribute: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| PipelineError::serialization(format!("invalid XML attribute: {e}")))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    /// First element (depth-first) with two or more same-named children
    fn repeated_children(&self) -> Option<Vec<&XmlElement>> {
        for (idx, child) in self.children.iter().enumerate() {
            let same = self.children[idx + 1..]
                .iter()
                .any(|other| other.name == child.name);
            if same {
                return Some(
                    self.children
                        .iter()
                        .filter(|c| c.name == child.name)
                        .collect(),
                );
            }
        }
        self.children.iter().find_map(XmlElement::repeated_children)
    }
}

fn parse_xml(body: &[u8]) -> Result<XmlElement, PipelineError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| PipelineError::serialization(format!("invalid XML: {e}")))?;

        match event {
            Event::Start(start) => stack.push(XmlElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| PipelineError::serialization("unbalanced XML end tag"))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| PipelineError::serialization(format!("invalid XML text: {e}")))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(PipelineError::serialization("XML document has unclosed elements"));
    }
    root.ok_or_else(|| PipelineError::serialization("XML document has no root element"))
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn flatten_element(element: &XmlElement, prefix: &str, out: &mut Vec<(String, Value)>) {
    let path = join_key(prefix, &element.name);

    for (name, value) in &element.attributes {
        push_unique(out, join_key(&path, name), infer_scalar(value));
    }

    if element.children.is_empty() {
        if !element.text.is_empty() || element.attributes.is_empty() {
            push_unique(out, path, infer_scalar(&element.text));
        }
        return;
    }

    for child in &element.children {
        flatten_element(child, &path, out);
    }
}

/// Like [`flatten_element`], but the record's own name only prefixes its
/// attributes and leaf text; child columns are named relative to it.
fn flatten_record_element(record: &XmlElement) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    if record.children.is_empty() {
        flatten_element(record, "", &mut out);
        return out;
    }
    for (name, value) in &record.attributes {
        push_unique(&mut out, join_key(&record.name, name), infer_scalar(value));
    }
    for child in &record.children {
        flatten_element(child, "", &mut out);
    }
    out
}

fn push_unique(out: &mut Vec<(String, Value)>, name: String, value: Value) {
    if !out.iter().any(|(existing, _)| *existing == name) {
        out.push((name, value));
        return;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{name}{FLATTEN_SEPARATOR}{n}");
        if !out.iter().any(|(existing, _)| *existing == candidate) {
            out.push((candidate, value));
            return;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_finds_nested_record_array() {
        let body = br#"{"GenFuelMixes":{"GenFuelMix":[
            {"BeginDate":"2025-06-24T10:00:00","FuelCategory":"Natural Gas","GenMw":5120.5},
            {"BeginDate":"2025-06-24T10:00:00","FuelCategory":"Nuclear","GenMw":3300}
        ]}}"#;

        let table = Table::from_json(body).unwrap();
        assert_eq!(table.columns(), ["BeginDate", "FuelCategory", "GenMw"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[1][2], json!(3300));
    }

    #[test]
    fn test_json_flattens_nested_objects() {
        let body = br#"[{"zone":{"id":4001,"name":"Maine"},"load":[1,2]},{"zone":{"id":4002}}]"#;

        let table = Table::from_json(body).unwrap();
        assert_eq!(
            table.columns(),
            ["zone_id", "zone_name", "load_0", "load_1"]
        );
        assert_eq!(table.rows()[1], vec![json!(4002), Value::Null, Value::Null, Value::Null]);
    }

    #[test]
    fn test_json_scalar_object_is_single_row() {
        let table = Table::from_json(br#"{"status":"ok","count":3}"#).unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.columns(), ["status", "count"]);
    }

    #[test]
    fn test_delimited_infers_scalars() {
        let body = b"zone,load,active,code\nME,1250.5,true,007\nNH,,false,12\n";

        let table = Table::from_delimited(body, b',').unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[0], vec![json!("ME"), json!(1250.5), json!(true), json!("007")]);
        assert_eq!(table.rows()[1][1], Value::Null);
        assert_eq!(table.rows()[1][3], json!(12));
    }

    #[test]
    fn test_xml_repeated_elements_become_rows() {
        let body = br#"<?xml version="1.0"?>
            <FiveMinLmps>
              <FiveMinLmp id="1"><Location LocId="4001">.Z.MAINE</Location><LmpTotal>31.25</LmpTotal></FiveMinLmp>
              <FiveMinLmp id="2"><Location LocId="4002">.Z.NEWHAMPSHIRE</Location><LmpTotal>30.80</LmpTotal></FiveMinLmp>
            </FiveMinLmps>"#;

        let table = Table::from_xml(body).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(
            table.columns(),
            ["FiveMinLmp_id", "Location_LocId", "Location", "LmpTotal"]
        );
        assert_eq!(table.rows()[1][2], json!(".Z.NEWHAMPSHIRE"));
        assert_eq!(table.rows()[0][3], json!(31.25));
    }

    #[test]
    fn test_decode_rejects_non_tabular() {
        assert!(matches!(
            Table::decode(b"hello", DataFormat::Text),
            Err(PipelineError::Serialization { .. })
        ));
        assert!(matches!(
            Table::decode(b"[]", DataFormat::Json),
            Err(PipelineError::Serialization { .. })
        ));
        assert!(matches!(
            Table::decode(b"<a><b>", DataFormat::Xml),
            Err(PipelineError::Serialization { .. })
        ));
    }
}
