//! One line of a JSONL log file

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A self-contained log record; one per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonLogEntry {
    /// RFC 3339 UTC timestamp with milliseconds
    pub ts: String,
    pub level: String,
    /// Instance label, usually the identity's nickname
    pub instance: String,
    /// Module path of the event
    pub target: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
    /// Enclosing spans, outermost first, joined by " > "
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl JsonLogEntry {
    pub fn new(
        level: impl Into<String>,
        instance: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            instance: instance.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_line_shape() {
        let entry = JsonLogEntry::new("info", "alice", "whisperboard_core::sync", "Pass finished")
            .with_fields(serde_json::json!({ "pass_seq": 3, "new_messages": 1 }));

        let line = entry.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"instance\":\"alice\""));
        assert!(line.contains("\"pass_seq\":3"));
        assert!(!line.contains("\"span\""));

        let parsed = JsonLogEntry::from_json_line(&line).unwrap();
        assert_eq!(parsed.msg, "Pass finished");
        assert_eq!(parsed.target, "whisperboard_core::sync");
    }
}
