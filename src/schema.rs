use crate::ledger::Row;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[schemars(description = "Vertical bars, good for ranked categories and month-by-month comparisons")]
    Bar,
    #[schemars(description = "Line over time, good for monthly trends")]
    Line,
    #[schemars(description = "Radial share of a whole, for a handful of categories")]
    Pie,
    #[schemars(description = "Radial share of a whole with a hollow centre")]
    Doughnut,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Doughnut => "doughnut",
        }
    }

    pub fn is_radial(&self) -> bool {
        matches!(self, ChartType::Pie | ChartType::Doughnut)
    }

    /// Lenient parse of a model-suggested chart type; anything outside the
    /// fixed set (including "auto") is `None`.
    pub fn parse_loose(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bar" => Ok(ChartType::Bar),
            "line" => Ok(ChartType::Line),
            "pie" => Ok(ChartType::Pie),
            "doughnut" | "donut" => Ok(ChartType::Doughnut),
            other => Err(format!("unsupported chart type '{}'", other)),
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse_loose(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortDirection::Asc),
            "desc" | "descending" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

/// One measure column or several (multi-series charts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(untagged)]
pub enum AxisFields {
    Single(String),
    Many(Vec<String>),
}

impl AxisFields {
    pub fn fields(&self) -> Vec<&str> {
        match self {
            AxisFields::Single(f) => vec![f.as_str()],
            AxisFields::Many(fs) => fs.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for AxisFields {
    fn from(value: &str) -> Self {
        AxisFields::Single(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    Chart,
    Table,
}

/// Model-suggested rendering for one result keyword. Every field except the
/// keyword is a hint checked against the actual rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VisualizationDescriptor {
    pub keyword: String,
    pub title: Option<String>,
    pub chart_type: Option<ChartType>,
    pub x_axis: Option<String>,
    pub y_axis: Option<AxisFields>,
    pub stack_by: Option<String>,
    pub kind: Option<PanelKind>,
    pub sort: Option<SortDirection>,
}

impl VisualizationDescriptor {
    pub fn for_keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Default::default()
        }
    }
}

/// The externally visible unit: one per tool result that has data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VisualizationPayload {
    pub keyword: String,
    pub chart_config: Option<Value>,
    pub chart_title: Option<String>,
    pub table_data: Vec<Row>,
    pub sql_query: Option<String>,
    pub chart_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Visualization,
    Conversational,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub reply_text: String,
    pub chart_config: Option<Value>,
    pub chart_title: Option<String>,
    pub table_data: Option<Vec<Row>>,
    pub sql_query: Option<String>,
    pub visualizations: Vec<VisualizationPayload>,
    pub mode: ResponseMode,
}

impl ChatResponse {
    pub fn text(reply: impl Into<String>, mode: ResponseMode) -> Self {
        Self {
            reply_text: reply.into(),
            chart_config: None,
            chart_title: None,
            table_data: None,
            sql_query: None,
            visualizations: Vec::new(),
            mode,
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self::text(
            format!("Sorry, I encountered an error: {}", message),
            ResponseMode::Error,
        )
    }

    /// Visualization reply whose top-level chart fields mirror the first payload.
    pub fn with_visualizations(reply: impl Into<String>, visualizations: Vec<VisualizationPayload>) -> Self {
        let mut response = Self::text(reply, ResponseMode::Visualization);
        if let Some(primary) = visualizations.first() {
            response.chart_config = primary.chart_config.clone();
            response.chart_title = primary.chart_title.clone();
            response.table_data = Some(primary.table_data.clone());
            response.sql_query = primary.sql_query.clone();
        }
        response.visualizations = visualizations;
        response
    }
}

/// Contract the model is asked to follow. Only used to render the JSON schema
/// in the instruction text; parsing is lenient and goes through `plan`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanContract {
    #[schemars(description = "Plain-text reply for the chat window. No markdown.")]
    pub reply: String,

    #[schemars(
        description = "Up to 3 analytics tool calls. `tool` must be one of the allowed tool names; `arguments` holds scalar values only."
    )]
    pub tool_calls: Vec<ToolCallContract>,

    #[schemars(
        description = "Up to 3 visualizations. `keyword` must be one of the allowed keywords. Return an empty list for a purely conversational reply."
    )]
    pub visualizations: Vec<DescriptorContract>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolCallContract {
    #[schemars(description = "Tool name from the catalog")]
    pub tool: String,

    #[schemars(description = "Named scalar arguments, e.g. {\"days\": 90, \"limit\": 5}")]
    pub arguments: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DescriptorContract {
    #[schemars(description = "One of the allowed keywords")]
    pub keyword: String,
    #[schemars(description = "Short chart or table title")]
    pub title: Option<String>,
    pub chart_type: Option<ChartType>,
    #[schemars(description = "Column used for labels; must exist in the rows")]
    pub x_axis: Option<String>,
    #[schemars(description = "Column or columns used for values; must exist in the rows")]
    pub y_axis: Option<AxisFields>,
    #[schemars(description = "Column used to split stacked series (bar/line only)")]
    pub stack_by: Option<String>,
    pub kind: Option<PanelKind>,
    pub sort: Option<SortDirection>,
}

impl PlanContract {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PlanContract)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
