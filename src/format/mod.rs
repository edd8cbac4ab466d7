//! Payload formats: detection, tabular decoding and re-encoding.

mod columnar;
mod convert;
mod sniff;
mod table;

pub use convert::{Converted, FormatConverter};
pub use sniff::{FormatSniffer, Sniffer};
pub use table::Table;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Serialization formats known to the pipeline.
///
/// `Unknown` is only ever produced by detection; it is never a valid target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Json,
    Xml,
    Tsv,
    Html,
    Text,
    Parquet,
    /// Output only; never detected
    Yaml,
    Unknown,
}

impl DataFormat {
    /// File extension used in storage keys
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
            DataFormat::Xml => "xml",
            DataFormat::Tsv => "tsv",
            DataFormat::Html => "html",
            DataFormat::Text => "txt",
            DataFormat::Parquet => "parquet",
            DataFormat::Yaml => "yaml",
            DataFormat::Unknown => "bin",
        }
    }

    /// Label written into object metadata
    pub fn label(&self) -> &'static str {
        match self {
            DataFormat::Csv => "CSV",
            DataFormat::Json => "JSON",
            DataFormat::Xml => "XML",
            DataFormat::Tsv => "TSV",
            DataFormat::Html => "HTML",
            DataFormat::Text => "TEXT",
            DataFormat::Parquet => "PARQUET",
            DataFormat::Yaml => "YAML",
            DataFormat::Unknown => "UNKNOWN",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DataFormat::Csv => "text/csv",
            DataFormat::Json => "application/json",
            DataFormat::Xml => "application/xml",
            DataFormat::Tsv => "text/tab-separated-values",
            DataFormat::Html => "text/html",
            DataFormat::Text => "text/plain",
            DataFormat::Yaml => "application/yaml",
            DataFormat::Parquet | DataFormat::Unknown => "application/octet-stream",
        }
    }

    /// Format implied by a key or file name's extension
    pub fn from_extension(name: &str) -> Self {
        name.rsplit_once('.')
            .filter(|(_, ext)| !ext.contains('/'))
            .and_then(|(_, ext)| ext.parse().ok())
            .unwrap_or(DataFormat::Unknown)
    }

    /// Formats a [`Table`] can be decoded from
    pub fn is_tabular(&self) -> bool {
        matches!(
            self,
            DataFormat::Csv | DataFormat::Tsv | DataFormat::Json | DataFormat::Xml
        )
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "json" => Ok(DataFormat::Json),
            "xml" => Ok(DataFormat::Xml),
            "tsv" => Ok(DataFormat::Tsv),
            "html" | "htm" => Ok(DataFormat::Html),
            "text" | "txt" => Ok(DataFormat::Text),
            "parquet" => Ok(DataFormat::Parquet),
            "yaml" | "yml" => Ok(DataFormat::Yaml),
            "unknown" | "bin" => Ok(DataFormat::Unknown),
            other => Err(format!("unknown data format: {other}")),
        }
    }
}
