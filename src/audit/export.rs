// ABOUTME: Audit export formats — pretty JSON array or CSV with a header row.
// ABOUTME: Entries are written in append order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entry::AuditEntry;
use crate::error::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(GateError::UnknownExportFormat(other.to_string())),
        }
    }
}

const CSV_HEADERS: [&str; 10] = [
    "seq",
    "timestamp",
    "session_id",
    "tool",
    "command",
    "path",
    "risk_level",
    "approved",
    "terminal",
    "reason",
];

pub fn export(entries: &[AuditEntry], format: ExportFormat) -> Result<String, GateError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        ExportFormat::Csv => to_csv(entries),
    }
}

fn to_csv(entries: &[AuditEntry]) -> Result<String, GateError> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(CSV_HEADERS)?;
    for entry in entries {
        writer.write_record([
            entry.seq.to_string(),
            entry.timestamp.to_rfc3339(),
            entry.session_id.clone(),
            entry.tool.clone(),
            entry.command.clone().unwrap_or_default(),
            entry.path.clone().unwrap_or_default(),
            entry.risk_level.to_string(),
            entry.approved.to_string(),
            entry.terminal.to_string(),
            entry.reason.clone().unwrap_or_default(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| GateError::Io(std::io::Error::other(e.to_string())))?;
    Ok(String::from_utf8(bytes)?)
}
