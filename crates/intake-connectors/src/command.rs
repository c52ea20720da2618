//! Results returned by integration commands.

use serde::Serialize;
use serde_json::Value;

/// What a command hands back to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandOutput {
    /// Human-readable summary.
    pub readable: String,
    /// Context path the outputs are stored under, e.g. `Zoom.User`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Structured outputs.
    pub outputs: Value,
    /// Unmodified vendor response.
    pub raw: Value,
    /// Threat-intel indicators built from the response.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indicators: Vec<Value>,
}

impl CommandOutput {
    /// Output carrying only a message.
    pub fn message(readable: impl Into<String>) -> Self {
        Self {
            readable: readable.into(),
            ..Self::default()
        }
    }

    pub fn new(readable: impl Into<String>, prefix: &str, outputs: Value) -> Self {
        Self {
            readable: readable.into(),
            prefix: Some(prefix.to_string()),
            outputs,
            ..Self::default()
        }
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_indicators(mut self, indicators: Vec<Value>) -> Self {
        self.indicators = indicators;
        self
    }
}

/// Renders rows as a plain-text table under a title line.
///
/// Only the listed headers are shown, in order; missing cells render empty and
/// arrays are joined with commas.
pub fn table(title: &str, headers: &[&str], rows: &[Value]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| headers.iter().map(|h| cell(row.get(*h))).collect())
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let render = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![title.to_string()];
    if rows.is_empty() {
        out.push("No entries.".to_string());
        return out.join("\n");
    }
    out.push(render(headers.to_vec()));
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-|-"),
    );
    for row in &cells {
        out.push(render(row.iter().map(String::as_str).collect()));
    }
    out.join("\n")
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| cell(Some(v)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_layout() {
        let rows = vec![
            json!({"ID": "1", "Name": "scan finished", "Actions": ["email", "ticket"]}),
            json!({"ID": 22, "Name": "x"}),
        ];
        let out = table("Tenable.sc Alerts", &["ID", "Name", "Actions"], &rows);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Tenable.sc Alerts");
        assert_eq!(lines[1], "ID | Name          | Actions");
        assert_eq!(lines[3], "1  | scan finished | email, ticket");
        assert_eq!(lines[4], "22 | x");
    }

    #[test]
    fn test_table_empty() {
        assert_eq!(table("Users", &["id"], &[]), "Users\nNo entries.");
    }

    #[test]
    fn test_output_serialization_skips_empty() {
        let out = serde_json::to_value(CommandOutput::message("ok")).unwrap();
        assert!(out.get("prefix").is_none());
        assert!(out.get("indicators").is_none());
        assert_eq!(out["readable"], "ok");
    }
}
