//! Conversion between payload formats through [`Table`].

use bytes::Bytes;
use quick_xml::Writer;
use quick_xml::escape::escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::Value;

use super::{DataFormat, Table, columnar};
use crate::error::PipelineError;

/// Payload after conversion
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub bytes: Bytes,
    pub format: DataFormat,
    /// Number of rows, when the payload was interpreted as a table
    pub record_count: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FormatConverter;

impl FormatConverter {
    pub fn new() -> Self {
        Self
    }

    /// Re-encode `payload` from `detected` to `target`.
    ///
    /// Identical formats pass through untouched. Anything else goes through a
    /// [`Table`], so only tabular sources can become tabular targets.
    pub fn convert(
        &self,
        payload: &Bytes,
        detected: DataFormat,
        target: DataFormat,
    ) -> Result<Converted, PipelineError> {
        if target == DataFormat::Unknown {
            return Err(PipelineError::serialization(
                "UNKNOWN is not a valid target format",
            ));
        }

        if detected == target {
            let record_count = Table::decode(payload, detected)
                .ok()
                .map(|table| table.row_count());
            return Ok(Converted {
                bytes: payload.clone(),
                format: target,
                record_count,
            });
        }

        if target == DataFormat::Text {
            return std::str::from_utf8(payload)
                .map(|_| Converted {
                    bytes: payload.clone(),
                    format: DataFormat::Text,
                    record_count: None,
                })
                .map_err(|_| {
                    PipelineError::serialization(format!(
                        "{detected} payload is not valid UTF-8 text"
                    ))
                });
        }

        if !detected.is_tabular() {
            return Err(PipelineError::serialization(format!(
                "{detected} payload has no tabular structure to convert to {target}"
            )));
        }

        let table = Table::decode(payload, detected)?;
        let bytes = encode(&table, target)?;

        tracing::debug!(
            from = %detected,
            to = %target,
            rows = table.row_count(),
            bytes = bytes.len(),
            "Payload converted"
        );

        Ok(Converted {
            bytes: Bytes::from(bytes),
            format: target,
            record_count: Some(table.row_count()),
        })
    }
}

/// Serialize a table in one of the tabular or presentation formats.
pub fn encode(table: &Table, target: DataFormat) -> Result<Vec<u8>, PipelineError> {
    match target {
        DataFormat::Csv => encode_delimited(table, b','),
        DataFormat::Tsv => encode_delimited(table, b'\t'),
        DataFormat::Json => serde_json::to_vec_pretty(&table.to_records())
            .map_err(|e| PipelineError::serialization(format!("encoding JSON: {e}"))),
        DataFormat::Xml => encode_xml(table),
        DataFormat::Html => Ok(encode_html(table).into_bytes()),
        DataFormat::Parquet => columnar::encode_parquet(table),
        DataFormat::Yaml => serde_yaml::to_string(&table.to_records())
            .map(String::into_bytes)
            .map_err(|e| PipelineError::serialization(format!("encoding YAML: {e}"))),
        DataFormat::Text | DataFormat::Unknown => Err(PipelineError::serialization(format!(
            "cannot encode a table as {target}"
        ))),
    }
}

fn encode_delimited(table: &Table, delimiter: u8) -> Result<Vec<u8>, PipelineError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());

    writer
        .write_record(table.columns())
        .map_err(|e| PipelineError::serialization(format!("writing header: {e}")))?;
    for row in table.rows() {
        writer
            .write_record(row.iter().map(cell_text))
            .map_err(|e| PipelineError::serialization(format!("writing row: {e}")))?;
    }

    writer
        .into_inner()
        .map_err(|e| PipelineError::serialization(format!("flushing rows: {e}")))
}

fn encode_xml(table: &Table) -> Result<Vec<u8>, PipelineError> {
    let map_err = |e: std::io::Error| PipelineError::serialization(format!("writing XML: {e}"));
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(map_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("records")))
        .map_err(map_err)?;

    let names: Vec<String> = table.columns().iter().map(|c| element_name(c)).collect();
    for row in table.rows() {
        writer
            .write_event(Event::Start(BytesStart::new("record")))
            .map_err(map_err)?;
        for (name, cell) in names.iter().zip(row) {
            if cell.is_null() {
                writer
                    .write_event(Event::Empty(BytesStart::new(name.as_str())))
                    .map_err(map_err)?;
                continue;
            }
            writer
                .write_event(Event::Start(BytesStart::new(name.as_str())))
                .map_err(map_err)?;
            writer
                .write_event(Event::Text(BytesText::new(&cell_text(cell))))
                .map_err(map_err)?;
            writer
                .write_event(Event::End(BytesEnd::new(name.as_str())))
                .map_err(map_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("record")))
            .map_err(map_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("records")))
        .map_err(map_err)?;
    Ok(writer.into_inner())
}

fn encode_html(table: &Table) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html>\n<body>\n<table>\n<thead><tr>");
    for column in table.columns() {
        html.push_str(&format!("<th>{}</th>", escape(column.as_str())));
    }
    html.push_str("</tr></thead>\n<tbody>\n");
    for row in table.rows() {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", escape(cell_text(cell).as_str())));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}

/// Textual form of a scalar cell; nulls are empty
fn cell_text(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn a column name into a valid XML element name
fn element_name(column: &str) -> String {
    let mut name: String = column
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let valid_start = name
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    if !valid_start {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fuel_mix() -> Bytes {
        Bytes::from_static(
            br#"{"mix":[{"fuel":"Natural Gas","mw":5120.5},{"fuel":"Nuclear","mw":3300},{"fuel":"Hydro, run-of-river","mw":410}]}"#,
        )
    }

    #[test]
    fn test_same_format_passes_through() {
        let payload = fuel_mix();
        let converted = FormatConverter::new()
            .convert(&payload, DataFormat::Json, DataFormat::Json)
            .unwrap();

        assert_eq!(converted.bytes, payload);
        assert_eq!(converted.record_count, Some(3));
    }

    #[test]
    fn test_json_to_csv_keeps_rows_and_values() {
        let converted = FormatConverter::new()
            .convert(&fuel_mix(), DataFormat::Json, DataFormat::Csv)
            .unwrap();
        assert_eq!(converted.format, DataFormat::Csv);
        assert_eq!(converted.record_count, Some(3));

        let parsed = Table::from_delimited(&converted.bytes, b',').unwrap();
        let original = Table::from_json(&fuel_mix()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_csv_to_json_and_tsv() {
        let payload = Bytes::from_static(b"hour,load\n1,1250.5\n2,1180\n");
        let converter = FormatConverter::new();

        let json_out = converter
            .convert(&payload, DataFormat::Csv, DataFormat::Json)
            .unwrap();
        let value: Value = serde_json::from_slice(&json_out.bytes).unwrap();
        assert_eq!(value, json!([{"hour":1,"load":1250.5},{"hour":2,"load":1180}]));

        let tsv_out = converter
            .convert(&payload, DataFormat::Csv, DataFormat::Tsv)
            .unwrap();
        assert_eq!(&tsv_out.bytes[..], b"hour\tload\n1\t1250.5\n2\t1180\n");
    }

    #[test]
    fn test_xml_output_uses_record_elements() {
        let payload = Bytes::from_static(br#"[{"zone id":"ME","1h":5}]"#);
        let converted = FormatConverter::new()
            .convert(&payload, DataFormat::Json, DataFormat::Xml)
            .unwrap();
        let text = String::from_utf8(converted.bytes.to_vec()).unwrap();

        assert!(text.contains("<records>"));
        assert!(text.contains("<zone_id>ME</zone_id>"));
        assert!(text.contains("<_1h>5</_1h>"));

        let back = Table::from_xml(&converted.bytes).unwrap();
        assert_eq!(back.row_count(), 1);
    }

    #[test]
    fn test_yaml_output_is_a_record_sequence() {
        let converted = FormatConverter::new()
            .convert(&fuel_mix(), DataFormat::Json, DataFormat::Yaml)
            .unwrap();
        assert_eq!(converted.format, DataFormat::Yaml);
        assert_eq!(converted.record_count, Some(3));

        let text = std::str::from_utf8(&converted.bytes).unwrap();
        assert!(text.starts_with("- fuel: Natural Gas\n"), "{text}");

        let back: Vec<Value> = serde_yaml::from_slice(&converted.bytes).unwrap();
        assert_eq!(back, Table::from_json(&fuel_mix()).unwrap().to_records());
    }

    #[test]
    fn test_html_escapes_cells() {
        let payload = Bytes::from_static(br#"[{"note":"<b>peak</b> & more"}]"#);
        let converted = FormatConverter::new()
            .convert(&payload, DataFormat::Json, DataFormat::Html)
            .unwrap();
        let text = String::from_utf8(converted.bytes.to_vec()).unwrap();

        assert!(text.contains("<td>&lt;b&gt;peak&lt;/b&gt; &amp; more</td>"));
    }

    #[test]
    fn test_non_tabular_source_cannot_become_table() {
        let payload = Bytes::from_static(b"Total consumption: 2430.8 kWh");
        let err = FormatConverter::new()
            .convert(&payload, DataFormat::Text, DataFormat::Csv)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Serialization { .. }));
    }

    #[test]
    fn test_text_target_accepts_utf8() {
        let converted = FormatConverter::new()
            .convert(&fuel_mix(), DataFormat::Json, DataFormat::Text)
            .unwrap();
        assert_eq!(converted.format, DataFormat::Text);
        assert_eq!(converted.bytes, fuel_mix());
    }
}
