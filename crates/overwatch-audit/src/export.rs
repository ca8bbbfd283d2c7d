//! Export renderers: JSON, CSV, and CEF.

use chrono::SecondsFormat;

use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty-printed JSON array.
    Json,
    /// Quoted CSV with a fixed header row.
    Csv,
    /// ArcSight Common Event Format, one record per line.
    Cef,
}

impl std::str::FromStr for ExportFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "cef" => Ok(Self::Cef),
            other => Err(AuditError::UnknownFormat(other.to_string())),
        }
    }
}

/// Render entries in the requested format.
pub(crate) fn render(format: ExportFormat, entries: &[AuditEntry]) -> AuditResult<String> {
    match format {
        ExportFormat::Json => render_json(entries),
        ExportFormat::Csv => Ok(render_csv(entries)),
        ExportFormat::Cef => Ok(render_cef(entries)),
    }
}

fn render_json(entries: &[AuditEntry]) -> AuditResult<String> {
    serde_json::to_string_pretty(entries).map_err(|e| AuditError::Serialization(e.to_string()))
}

/// CSV with every value double-quoted and empty fields emitted as `""`.
fn render_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::from("id,timestamp,server,tool,risk_level,decision,duration\n");
    for entry in entries {
        let timestamp = entry
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let duration = entry
            .duration_ms
            .map(|d| d.to_string())
            .unwrap_or_default();
        let fields = [
            entry.id.as_str(),
            timestamp.as_str(),
            entry.server.as_deref().unwrap_or(""),
            entry.tool.as_str(),
            entry.risk_level.as_str(),
            entry.decision.as_str(),
            duration.as_str(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// CEF: `CEF:0|DotsetLabs|Overwatch|1.0|<risk>|MCP Tool Call|<severity>|<extension>`.
fn render_cef(entries: &[AuditEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let extension = match &entry.server {
            Some(server) => format!(
                "rt={} cs1={} cs1Label=Tool cs2={} cs2Label=Server outcome={}",
                entry.timestamp.timestamp_millis(),
                cef_ext_escape(&entry.tool),
                cef_ext_escape(server),
                entry.decision
            ),
            None => format!(
                "rt={} cs1={} cs1Label=Tool outcome={}",
                entry.timestamp.timestamp_millis(),
                cef_ext_escape(&entry.tool),
                entry.decision
            ),
        };
        out.push_str(&format!(
            "CEF:0|DotsetLabs|Overwatch|1.0|{}|MCP Tool Call|{}|{}\n",
            cef_header_escape(entry.risk_level.as_str()),
            entry.risk_level.cef_severity(),
            extension
        ));
    }
    out
}

fn cef_header_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|")
}

fn cef_ext_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('=', "\\=")
}
