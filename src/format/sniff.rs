//! Payload format detection.
//!
//! Detection is an ordered list of [`Sniffer`]s evaluated in priority order:
//! the declared content type first, then structural heuristics. The first
//! sniffer that recognises the payload wins; if none do, the payload is
//! tagged [`DataFormat::Unknown`].

use quick_xml::Reader;
use quick_xml::events::Event;

use super::DataFormat;

/// Number of leading lines inspected for delimiter consistency
const DELIMITED_SAMPLE_LINES: usize = 10;

/// A single yes/no classification rule
pub trait Sniffer: Send + Sync {
    fn name(&self) -> &'static str;

    fn sniff(&self, body: &[u8], content_type: Option<&str>) -> Option<DataFormat>;
}

/// Ordered chain of sniffers
pub struct FormatSniffer {
    sniffers: Vec<Box<dyn Sniffer>>,
}

impl FormatSniffer {
    pub fn new(sniffers: Vec<Box<dyn Sniffer>>) -> Self {
        Self { sniffers }
    }

    /// Classify `body`, consulting `content_type` first when present.
    pub fn detect(&self, body: &[u8], content_type: Option<&str>) -> DataFormat {
        if body.is_empty() {
            return DataFormat::Unknown;
        }

        for sniffer in &self.sniffers {
            if let Some(format) = sniffer.sniff(body, content_type) {
                tracing::debug!(sniffer = sniffer.name(), format = %format, "Payload format detected");
                return format;
            }
        }

        DataFormat::Unknown
    }
}

impl Default for FormatSniffer {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ContentTypeSniffer),
            Box::new(JsonSniffer),
            Box::new(MarkupSniffer),
            Box::new(DelimitedSniffer),
            Box::new(TextSniffer),
        ])
    }
}

/// Trust the response's declared media type when it is one we recognise
pub struct ContentTypeSniffer;

impl Sniffer for ContentTypeSniffer {
    fn name(&self) -> &'static str {
        "content-type"
    }

    fn sniff(&self, _body: &[u8], content_type: Option<&str>) -> Option<DataFormat> {
        let media_type: mime::Mime = content_type?.parse().ok()?;
        let suffix = media_type.suffix().map(|s| s.as_str());

        match (media_type.type_().as_str(), media_type.subtype().as_str()) {
            ("application", "json") => Some(DataFormat::Json),
            ("text", "csv") => Some(DataFormat::Csv),
            ("text", "tab-separated-values") => Some(DataFormat::Tsv),
            ("text", "html") => Some(DataFormat::Html),
            ("application" | "text", "xml") => Some(DataFormat::Xml),
            _ if suffix == Some("json") => Some(DataFormat::Json),
            _ if suffix == Some("xml") => Some(DataFormat::Xml),
            _ => None,
        }
    }
}

pub struct JsonSniffer;

impl Sniffer for JsonSniffer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn sniff(&self, body: &[u8], _content_type: Option<&str>) -> Option<DataFormat> {
        match significant(body).first() {
            Some(b'{') | Some(b'[') => Some(DataFormat::Json),
            _ => None,
        }
    }
}

/// `<`-led payloads: HTML when an `<html` marker is present, XML when the
/// tags balance
pub struct MarkupSniffer;

impl Sniffer for MarkupSniffer {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn sniff(&self, body: &[u8], _content_type: Option<&str>) -> Option<DataFormat> {
        let body = significant(body);
        if body.first() != Some(&b'<') {
            return None;
        }

        let head = &body[..body.len().min(2048)];
        let head = String::from_utf8_lossy(head).to_ascii_lowercase();
        if head.contains("<html") || head.contains("<!doctype html") {
            return Some(DataFormat::Html);
        }

        tags_balanced(body).then_some(DataFormat::Xml)
    }
}

fn tags_balanced(body: &[u8]) -> bool {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut elements = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                depth += 1;
                elements += 1;
            }
            Ok(Event::Empty(_)) => elements += 1,
            Ok(Event::End(_)) => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Ok(Event::Eof) => return depth == 0 && elements > 0,
            Ok(_) => {}
            Err(_) => return false,
        }
        buf.clear();
    }
}

/// Consistent delimiter count over the first lines means CSV or TSV
pub struct DelimitedSniffer;

impl Sniffer for DelimitedSniffer {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn sniff(&self, body: &[u8], _content_type: Option<&str>) -> Option<DataFormat> {
        let text = std::str::from_utf8(significant(body)).ok()?;
        let lines: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(DELIMITED_SAMPLE_LINES)
            .collect();

        if lines.len() < 2 {
            return None;
        }

        [(b'\t', DataFormat::Tsv), (b',', DataFormat::Csv)]
            .into_iter()
            .find(|(delimiter, _)| consistent_delimiter(&lines, *delimiter))
            .map(|(_, format)| format)
    }
}

fn consistent_delimiter(lines: &[&str], delimiter: u8) -> bool {
    let first = count_unquoted(lines[0], delimiter);
    first > 0 && lines.iter().all(|line| count_unquoted(line, delimiter) == first)
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if byte == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Printable UTF-8 that nothing more specific claimed
pub struct TextSniffer;

impl Sniffer for TextSniffer {
    fn name(&self) -> &'static str {
        "text"
    }

    fn sniff(&self, body: &[u8], _content_type: Option<&str>) -> Option<DataFormat> {
        let text = std::str::from_utf8(body).ok()?;
        let printable = text
            .chars()
            .all(|c| !c.is_control() || c.is_whitespace());
        printable.then_some(DataFormat::Text)
    }
}

/// Strip a UTF-8 BOM and leading whitespace
fn significant(body: &[u8]) -> &[u8] {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    &body[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(body: &str, content_type: Option<&str>) -> DataFormat {
        FormatSniffer::default().detect(body.as_bytes(), content_type)
    }

    #[test]
    fn test_content_type_takes_priority() {
        assert_eq!(detect("a,b\n1,2\n", Some("application/json")), DataFormat::Json);
        assert_eq!(
            detect("{}", Some("text/csv; charset=utf-8")),
            DataFormat::Csv
        );
        assert_eq!(
            detect("x", Some("application/vnd.api+json")),
            DataFormat::Json
        );
        assert_eq!(detect("x", Some("text/xml")), DataFormat::Xml);
    }

    #[test]
    fn test_unrecognized_content_type_falls_back_to_structure() {
        assert_eq!(
            detect("  {\"mix\": []}", Some("text/plain")),
            DataFormat::Json
        );
        assert_eq!(
            detect("[1,2]", Some("application/octet-stream")),
            DataFormat::Json
        );
    }

    #[test]
    fn test_markup() {
        assert_eq!(
            detect("<rows><row a=\"1\"/><row a=\"2\"/></rows>", None),
            DataFormat::Xml
        );
        assert_eq!(
            detect("<!DOCTYPE html><html><body><p>hi</body></html>", None),
            DataFormat::Html
        );
        // unbalanced markup without an html marker is just text
        assert_eq!(detect("<rows><row></rows>", None), DataFormat::Text);
    }

    #[test]
    fn test_delimited() {
        assert_eq!(
            detect("time,load\n2025-06-24,1250.5\n2025-06-25,1180.3\n", None),
            DataFormat::Csv
        );
        assert_eq!(
            detect("time\tload\n2025-06-24\t1250.5\n", None),
            DataFormat::Tsv
        );
        assert_eq!(
            detect("name,desc\n\"a, b\",c\n", None),
            DataFormat::Csv
        );
        // inconsistent counts
        assert_eq!(detect("a,b\n1,2,3\n", None), DataFormat::Text);
    }

    #[test]
    fn test_text_and_unknown() {
        assert_eq!(detect("Total consumption: 2430.8 kWh", None), DataFormat::Text);
        assert_eq!(
            FormatSniffer::default().detect(&[0x00, 0x9f, 0x92, 0x96], None),
            DataFormat::Unknown
        );
        assert_eq!(FormatSniffer::default().detect(b"", None), DataFormat::Unknown);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let sniffer = FormatSniffer::default();
        let samples: [&[u8]; 4] = [
            b"{\"a\":1}",
            b"<a><b/></a>",
            b"x,y\n1,2\n",
            b"\xff\xfe\x00",
        ];
        for body in samples {
            assert_eq!(sniffer.detect(body, None), sniffer.detect(body, None));
        }
    }
}
