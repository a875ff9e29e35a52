use serde::{Deserialize, Serialize};

/// The single JSON object `claude --print --output-format json` writes to
/// stdout when the run ends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliResult {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// Absent on some error subtypes.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl CliResult {
    /// Parse stdout. Some CLI versions emit a JSON array of stream messages
    /// instead of a lone object; the last `result` entry wins there.
    pub fn parse(output: &str) -> serde_json::Result<Self> {
        let trimmed = output.trim();
        if trimmed.starts_with('[') {
            let messages: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
            let last = messages
                .into_iter()
                .rev()
                .find(|m| m.get("type").and_then(|t| t.as_str()) == Some("result"))
                .unwrap_or(serde_json::Value::Null);
            return serde_json::from_value(last);
        }
        serde_json::from_str(trimmed)
    }

    pub fn text(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }

    pub fn failed(&self) -> bool {
        self.is_error || self.subtype.as_deref().is_some_and(|s| s.starts_with("error"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_object() {
        let json = r#"{
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "result": "Wrote product.md",
            "session_id": "abc-123",
            "num_turns": 4,
            "total_cost_usd": 0.12,
            "duration_ms": 5100,
            "usage": {"input_tokens": 10}
        }"#;
        let r = CliResult::parse(json).unwrap();
        assert_eq!(r.text(), "Wrote product.md");
        assert_eq!(r.num_turns, 4);
        assert!(!r.failed());
    }

    #[test]
    fn error_subtype_without_result_is_failure() {
        let json = r#"{"type":"result","subtype":"error_max_turns","is_error":true,"session_id":"x"}"#;
        let r = CliResult::parse(json).unwrap();
        assert!(r.failed());
        assert_eq!(r.text(), "");
    }

    #[test]
    fn array_form_takes_last_result() {
        let json = r#"[
            {"type":"system","subtype":"init","session_id":"x"},
            {"type":"assistant","message":{}},
            {"type":"result","subtype":"success","is_error":false,"result":"done"}
        ]"#;
        let r = CliResult::parse(json).unwrap();
        assert_eq!(r.text(), "done");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(CliResult::parse("not json").is_err());
    }
}
