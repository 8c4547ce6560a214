//! Catalog of pre-authorized, parameterized ledger analytics.
//!
//! Every tool is a function `(session, scope, arguments) -> ToolOutput` that
//! builds its SQL through [`LedgerQuery`](crate::ledger::LedgerQuery), so the
//! party filter it resolves from the scope can never be left out.

pub mod analytics;
pub mod leaderboard;
pub mod parties;
pub mod registry;

pub use registry::{ToolKind, ToolRegistry, ToolSpec};

use crate::error::{AnalyticsError, Result};
use crate::ledger::Row;
use crate::schema::{AxisFields, ChartType, SortDirection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Scalar argument value. Model output is loosely typed, so numbers may
/// still arrive as text until the registry coerces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ArgValue {
    /// Converts a JSON value, rejecting nested arrays and objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ArgValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(ArgValue::Int)
                .or_else(|| n.as_f64().map(ArgValue::Float)),
            Value::String(s) => Some(ArgValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            ArgValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            ArgValue::Text(s) if is_integer_text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

pub type ToolArguments = BTreeMap<String, ArgValue>;

/// An untrusted request to run one catalog tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: ToolArguments::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<ArgValue>) -> Self {
        self.arguments.insert(key.to_string(), value.into());
        self
    }
}

/// Whether a result is a main panel or a companion one (e.g. an employee
/// list attached to a company snapshot).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelRole {
    #[default]
    Primary,
    Auxiliary,
}

/// Normalized output of one tool. `rows` is authoritative; every other
/// field is a rendering hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub keyword: String,
    pub title: String,
    pub rows: Vec<Row>,
    pub chart_type: Option<ChartType>,
    pub x_axis: Option<String>,
    pub y_axis: Option<AxisFields>,
    pub stack_by: Option<String>,
    pub sort_direction: Option<SortDirection>,
    pub unit: Option<String>,
    #[serde(default)]
    pub panel: PanelRole,
    /// SQL that produced the rows, only set on the legacy generated-SQL path.
    #[serde(default)]
    pub sql_query: Option<String>,
}

impl ToolResult {
    pub fn new(keyword: impl Into<String>, title: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            keyword: keyword.into(),
            title: title.into(),
            rows,
            chart_type: None,
            x_axis: None,
            y_axis: None,
            stack_by: None,
            sort_direction: None,
            unit: None,
            panel: PanelRole::Primary,
            sql_query: None,
        }
    }

    pub fn chart(mut self, chart_type: ChartType) -> Self {
        self.chart_type = Some(chart_type);
        self
    }

    pub fn axes(mut self, x_axis: &str, y_axis: impl Into<AxisFields>) -> Self {
        self.x_axis = Some(x_axis.to_string());
        self.y_axis = Some(y_axis.into());
        self
    }

    pub fn sorted(mut self, direction: SortDirection) -> Self {
        self.sort_direction = Some(direction);
        self
    }

    pub fn currency(mut self) -> Self {
        self.unit = Some("currency".to_string());
        self
    }

    pub fn auxiliary(mut self) -> Self {
        self.panel = PanelRole::Auxiliary;
        self
    }

    pub fn has_data(&self) -> bool {
        !self.rows.is_empty()
    }
}

/// A tool may fill more than one panel per invocation.
pub type ToolOutput = Vec<ToolResult>;

/// Typed read access over merged, coerced arguments.
pub(crate) struct Args<'a>(pub &'a ToolArguments);

impl<'a> Args<'a> {
    pub fn int(&self, key: &str, default: i64) -> i64 {
        self.opt_int(key).unwrap_or(default)
    }

    pub fn opt_int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(ArgValue::as_i64)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(ArgValue::as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn required_text(&self, key: &str) -> Result<String> {
        self.text(key)
            .ok_or_else(|| AnalyticsError::validation(format!("Missing required argument '{}'", key)))
    }

    /// Optional party id; a present but non-numeric value is an error rather
    /// than silently widening to "no filter".
    pub fn party_id(&self) -> Result<Option<i64>> {
        match self.0.get("party_id") {
            None => Ok(None),
            Some(value) => value.as_i64().map(Some).ok_or_else(|| {
                AnalyticsError::validation(format!("party_id '{}' is not a numeric id", value))
            }),
        }
    }
}

/// Escapes LIKE wildcards for use with `ESCAPE '\'`.
pub(crate) fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Digits only, with an optional leading minus.
pub(crate) fn is_integer_text(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

pub(crate) fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Numeric column value, 0.0 when the column is absent or not numeric.
pub(crate) fn column_f64(row: &Row, key: &str) -> f64 {
    row.get(key).map(as_f64).unwrap_or(0.0)
}
