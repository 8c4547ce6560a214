//! Binding of tool results to Chart.js-style chart configs and tables.

use crate::error::{AnalyticsError, Result};
use crate::ledger::Row;
use crate::schema::{ChartType, PanelKind, SortDirection, VisualizationDescriptor, VisualizationPayload};
use crate::tools::{column_f64, ToolResult};
use log::{debug, warn};
use serde_json::{json, Value};
use std::cmp::Ordering;

pub const DEFAULT_PALETTE: [&str; 5] = ["#5f6afc", "#60a5fa", "#3b82f6", "#a7b4ff", "#93c5fd"];

pub const CURRENCY_CALLBACK: &str = "##CURRENCY_CALLBACK##";
pub const CURRENCY_TOOLTIP: &str = "##CURRENCY_TOOLTIP##";

const LABEL_CANDIDATES: [&str; 8] = [
    "category", "month", "year", "name", "party_name", "metric", "type", "channel",
];
const VALUE_CANDIDATES: [&str; 6] = ["total", "amount", "value", "sum", "count", "monthly_total"];
const TIME_COLUMNS: [&str; 4] = ["month", "year", "date", "day"];
const CURRENCY_WORDS: [&str; 8] = [
    "amount", "total", "sum", "income", "expense", "revenue", "cost", "price",
];
const MAX_RADIAL_AUTO_ROWS: usize = 7;

const CURRENCY_CALLBACK_JS: &str = r#"function(value) {
                return '€' + value.toLocaleString('de-DE', {minimumFractionDigits: 2, maximumFractionDigits: 2});
            }"#;

const CURRENCY_TOOLTIP_JS: &str = r#"function(context) {
                let label = context.dataset.label || '';
                if (label) label += ': ';
                label += '€' + context.parsed.y.toLocaleString('de-DE', {minimumFractionDigits: 2, maximumFractionDigits: 2});
                return label;
            }"#;

/// Fully resolved rendering decision for one result.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartBinding {
    pub chart_type: ChartType,
    pub x_field: String,
    pub y_fields: Vec<String>,
    pub stack_by: Option<String>,
    pub sort: Option<SortDirection>,
    pub title: String,
    pub currency: bool,
    pub kind: PanelKind,
}

#[derive(Debug, Clone)]
pub struct VisualizationBinder {
    palette: Vec<String>,
}

impl Default for VisualizationBinder {
    fn default() -> Self {
        Self::new(DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect())
    }
}

impl VisualizationBinder {
    pub fn new(palette: Vec<String>) -> Self {
        let palette = if palette.is_empty() {
            DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
        } else {
            palette
        };
        Self { palette }
    }

    /// Builds the payload for one result. Chart problems are reported in
    /// `chart_error`; the table data is always kept.
    pub fn bind(&self, result: &ToolResult, descriptor: Option<&VisualizationDescriptor>) -> VisualizationPayload {
        let mut payload = VisualizationPayload {
            keyword: result.keyword.clone(),
            chart_title: Some(
                descriptor
                    .and_then(|d| d.title.clone())
                    .unwrap_or_else(|| result.title.clone()),
            ),
            table_data: result.rows.clone(),
            sql_query: result.sql_query.clone(),
            ..Default::default()
        };

        let outcome = self
            .resolve(result, descriptor)
            .and_then(|binding| match binding.kind {
                PanelKind::Table => Ok(None),
                PanelKind::Chart => self.chart_config(&result.rows, &binding).map(Some),
            });

        match outcome {
            Ok(config) => payload.chart_config = config,
            Err(err) => {
                warn!("Chart for '{}' not rendered: {}", result.keyword, err);
                payload.chart_error = Some(err.to_string());
            }
        }

        payload
    }

    /// Resolves fields and chart type: a suggested field only counts when it
    /// is a column of the first row, then the tool hint, then a default.
    pub fn resolve(&self, result: &ToolResult, descriptor: Option<&VisualizationDescriptor>) -> Result<ChartBinding> {
        let first = result
            .rows
            .first()
            .ok_or_else(|| AnalyticsError::validation("No rows to chart"))?;
        let has = |field: &str| first.contains_key(field);

        let x_field = descriptor
            .and_then(|d| d.x_axis.as_deref())
            .filter(|f| has(*f))
            .or_else(|| result.x_axis.as_deref().filter(|f| has(*f)))
            .map(str::to_string)
            .unwrap_or_else(|| default_label_field(first));

        let existing = |fields: Option<Vec<&str>>| -> Option<Vec<String>> {
            let fields: Vec<String> = fields?
                .into_iter()
                .filter(|f| has(*f))
                .map(str::to_string)
                .collect();
            (!fields.is_empty()).then_some(fields)
        };
        let y_fields = existing(descriptor.and_then(|d| d.y_axis.as_ref()).map(|y| y.fields()))
            .or_else(|| existing(result.y_axis.as_ref().map(|y| y.fields())))
            .unwrap_or_else(|| vec![default_value_field(first)]);

        let stack_by = descriptor
            .and_then(|d| d.stack_by.as_deref())
            .or(result.stack_by.as_deref())
            .filter(|f| has(*f))
            .map(str::to_string);

        let time_like = first
            .keys()
            .any(|k| TIME_COLUMNS.iter().any(|t| k.to_ascii_lowercase().contains(t)));

        let suggested = descriptor.and_then(|d| d.chart_type).or(result.chart_type);
        let chart_type = match suggested {
            Some(chart_type) => chart_type,
            None if y_fields.len() > 1 || stack_by.is_some() => {
                if time_like {
                    ChartType::Line
                } else {
                    ChartType::Bar
                }
            }
            None if result.rows.len() <= MAX_RADIAL_AUTO_ROWS => ChartType::Doughnut,
            None if time_like => ChartType::Line,
            None => ChartType::Bar,
        };

        let sort = descriptor.and_then(|d| d.sort).or(result.sort_direction);
        let currency = result.unit.as_deref() == Some("currency")
            || y_fields.iter().any(|f| is_currency_field(f));

        let binding = ChartBinding {
            chart_type,
            x_field,
            y_fields,
            stack_by,
            sort,
            title: descriptor
                .and_then(|d| d.title.clone())
                .unwrap_or_else(|| result.title.clone()),
            currency,
            kind: descriptor.and_then(|d| d.kind).unwrap_or(PanelKind::Chart),
        };
        debug!("Resolved chart binding for '{}': {:?}", result.keyword, binding);
        Ok(binding)
    }

    pub fn chart_config(&self, rows: &[Row], binding: &ChartBinding) -> Result<Value> {
        if rows.is_empty() {
            return Err(AnalyticsError::validation("No rows to chart"));
        }
        if binding.chart_type.is_radial() {
            if binding.stack_by.is_some() {
                return Err(AnalyticsError::validation(
                    "stack_by is not supported for pie/doughnut charts",
                ));
            }
            if binding.y_fields.len() != 1 {
                return Err(AnalyticsError::validation(
                    "pie/doughnut charts require a single y_axis value",
                ));
            }
        }

        if let Some(stack_by) = &binding.stack_by {
            return Ok(self.stacked_config(rows, binding, stack_by));
        }

        let mut rows: Vec<&Row> = rows.iter().collect();
        if let ([field], Some(direction)) = (binding.y_fields.as_slice(), binding.sort) {
            rows.sort_by(|a, b| {
                let (a, b) = (value_of(a, field), value_of(b, field));
                let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
                match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let labels: Vec<String> = rows.iter().map(|row| label_of(row, &binding.x_field)).collect();
        let chart_type = binding.chart_type;

        let datasets: Vec<Value> = if chart_type.is_radial() {
            let field = &binding.y_fields[0];
            let values: Vec<f64> = rows.iter().map(|row| value_of(row, field)).collect();
            let colors: Vec<&String> = self.palette.iter().cycle().take(values.len()).collect();
            vec![json!({
                "data": values,
                "backgroundColor": colors,
                "borderColor": "#ffffff",
                "borderWidth": 2
            })]
        } else {
            binding
                .y_fields
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    let values: Vec<f64> = rows.iter().map(|row| value_of(row, field)).collect();
                    self.series(humanize(field), values, i, chart_type, false)
                })
                .collect()
        };

        Ok(json!({
            "type": chart_type.as_str(),
            "data": {"labels": labels, "datasets": datasets},
            "options": build_options(chart_type, binding.currency, &binding.title, false),
        }))
    }

    fn stacked_config(&self, rows: &[Row], binding: &ChartBinding, stack_by: &str) -> Value {
        let field = &binding.y_fields[0];
        let mut labels: Vec<String> = Vec::new();
        let mut stacks: Vec<(String, Vec<(String, f64)>)> = Vec::new();

        for row in rows {
            let label = label_of(row, &binding.x_field);
            if !labels.contains(&label) {
                labels.push(label.clone());
            }
            let stack = label_of(row, stack_by);
            let value = value_of(row, field);
            match stacks.iter_mut().find(|(name, _)| *name == stack) {
                Some((_, points)) => points.push((label, value)),
                None => stacks.push((stack, vec![(label, value)])),
            }
        }

        let datasets: Vec<Value> = stacks
            .into_iter()
            .enumerate()
            .map(|(i, (name, points))| {
                let values: Vec<f64> = labels
                    .iter()
                    .map(|label| {
                        points
                            .iter()
                            .filter(|(l, _)| l == label)
                            .map(|(_, v)| *v)
                            .last()
                            .unwrap_or(0.0)
                    })
                    .collect();
                self.series(humanize(&name), values, i, binding.chart_type, true)
            })
            .collect();

        json!({
            "type": binding.chart_type.as_str(),
            "data": {"labels": labels, "datasets": datasets},
            "options": build_options(binding.chart_type, binding.currency, &binding.title, true),
        })
    }

    fn series(&self, label: String, values: Vec<f64>, index: usize, chart_type: ChartType, stacked: bool) -> Value {
        let color = &self.palette[index % self.palette.len()];
        let tension = if chart_type == ChartType::Line { 0.4 } else { 0.0 };
        let mut dataset = json!({
            "label": label,
            "data": values,
            "backgroundColor": color,
            "borderColor": color,
            "borderWidth": 2,
            "tension": tension,
        });
        if stacked {
            dataset["stack"] = json!("stacked");
        }
        dataset
    }
}

fn build_options(chart_type: ChartType, currency: bool, title: &str, stacked: bool) -> Value {
    let mut options = json!({
        "responsive": true,
        "maintainAspectRatio": true,
        "plugins": {"legend": {"display": true, "position": "top"}},
    });

    if !title.is_empty() {
        options["plugins"]["title"] = json!({"display": true, "text": title, "font": {"size": 16}});
    }

    if !chart_type.is_radial() {
        let mut y_axis = json!({"beginAtZero": true, "ticks": {}});
        if stacked {
            y_axis["stacked"] = json!(true);
        }
        if currency {
            y_axis["ticks"]["callback"] = json!(CURRENCY_CALLBACK);
        }
        options["scales"] = json!({"y": y_axis});
        if stacked {
            options["scales"]["x"] = json!({"stacked": true});
        }
    }

    if currency {
        options["plugins"]["tooltip"] = json!({"callbacks": {"label": CURRENCY_TOOLTIP}});
    }

    options
}

/// Serializes a config and swaps the currency markers for JS formatter functions.
pub fn format_for_frontend(config: &Value) -> Result<String> {
    let text = serde_json::to_string_pretty(config)?;
    Ok(text
        .replace(&format!("\"{}\"", CURRENCY_CALLBACK), CURRENCY_CALLBACK_JS)
        .replace(&format!("\"{}\"", CURRENCY_TOOLTIP), CURRENCY_TOOLTIP_JS))
}

fn default_label_field(row: &Row) -> String {
    row.keys()
        .find(|k| LABEL_CANDIDATES.contains(&k.to_ascii_lowercase().as_str()))
        .or_else(|| row.keys().next())
        .cloned()
        .unwrap_or_default()
}

fn default_value_field(row: &Row) -> String {
    row.keys()
        .find(|k| VALUE_CANDIDATES.contains(&k.to_ascii_lowercase().as_str()))
        .or_else(|| row.keys().last())
        .cloned()
        .unwrap_or_default()
}

fn is_currency_field(field: &str) -> bool {
    let field = field.to_ascii_lowercase();
    CURRENCY_WORDS.iter().any(|word| field.contains(word))
}

fn label_of(row: &Row, field: &str) -> String {
    match row.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn value_of(row: &Row, field: &str) -> f64 {
    column_f64(row, field)
}

/// `monthly_total` becomes `Monthly Total`.
fn humanize(field: &str) -> String {
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AxisFields;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn category_result(count: usize) -> ToolResult {
        let rows = (0..count)
            .map(|i| row(&[("category", json!(format!("C{}", i))), ("total", json!((i + 1) as f64 * 10.0))]))
            .collect();
        ToolResult::new("expenses_by_category", "Expenses", rows)
    }

    #[test]
    fn test_bogus_descriptor_field_falls_back() {
        let result = category_result(3);
        let descriptor = VisualizationDescriptor {
            keyword: "expenses_by_category".to_string(),
            x_axis: Some("nope".to_string()),
            y_axis: Some(AxisFields::from("bogus")),
            ..Default::default()
        };

        let binding = VisualizationBinder::default().resolve(&result, Some(&descriptor)).unwrap();
        assert_eq!(binding.x_field, "category");
        assert_eq!(binding.y_fields, vec!["total".to_string()]);
    }

    #[test]
    fn test_tool_hint_used_before_defaults() {
        let rows = vec![row(&[("label", json!("a")), ("x", json!(1)), ("y", json!(2))])];
        let result = ToolResult::new("k", "t", rows).axes("x", "y");
        let binding = VisualizationBinder::default().resolve(&result, None).unwrap();
        assert_eq!(binding.x_field, "x");
        assert_eq!(binding.y_fields, vec!["y".to_string()]);

        let plain = ToolResult::new("k", "t", vec![row(&[("label", json!("a")), ("n", json!(1))])]);
        let binding = VisualizationBinder::default().resolve(&plain, None).unwrap();
        assert_eq!(binding.x_field, "label");
        assert_eq!(binding.y_fields, vec!["n".to_string()]);
    }

    #[test]
    fn test_auto_chart_type() {
        let binder = VisualizationBinder::default();
        assert_eq!(binder.resolve(&category_result(7), None).unwrap().chart_type, ChartType::Doughnut);
        assert_eq!(binder.resolve(&category_result(8), None).unwrap().chart_type, ChartType::Bar);

        let months = (1..=9)
            .map(|m| row(&[("month", json!(format!("2024-{:02}", m))), ("monthly_total", json!(m))]))
            .collect();
        let trend = ToolResult::new("monthly_expense_trend", "t", months);
        assert_eq!(binder.resolve(&trend, None).unwrap().chart_type, ChartType::Line);

        let hinted = category_result(3).chart(ChartType::Bar);
        assert_eq!(binder.resolve(&hinted, None).unwrap().chart_type, ChartType::Bar);
    }

    #[test]
    fn test_descending_sort_and_currency_markers() {
        let result = category_result(3).chart(ChartType::Bar).sorted(SortDirection::Desc).currency();
        let payload = VisualizationBinder::default().bind(&result, None);
        let config = payload.chart_config.unwrap();

        assert_eq!(config["type"], json!("bar"));
        assert_eq!(config["data"]["labels"], json!(["C2", "C1", "C0"]));
        assert_eq!(config["data"]["datasets"][0]["label"], json!("Total"));
        assert_eq!(config["options"]["scales"]["y"]["ticks"]["callback"], json!(CURRENCY_CALLBACK));
        assert_eq!(config["options"]["plugins"]["title"]["text"], json!("Expenses"));
        assert_eq!(payload.table_data[0]["category"], json!("C0"));
    }

    #[test]
    fn test_multi_series_line() {
        let rows = vec![
            row(&[("month", json!("2024-01")), ("income_total", json!(5.0)), ("expenses", json!(3.0))]),
            row(&[("month", json!("2024-02")), ("income_total", json!(6.0)), ("expenses", json!(4.0))]),
        ];
        let result = ToolResult::new("monthly_comparison", "Cash flow", rows).axes(
            "month",
            AxisFields::Many(vec!["income_total".to_string(), "expenses".to_string()]),
        );
        let payload = VisualizationBinder::default().bind(&result, None);
        let config = payload.chart_config.unwrap();

        assert_eq!(config["type"], json!("line"));
        let datasets = config["data"]["datasets"].as_array().unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[1]["label"], json!("Expenses"));
        assert_eq!(datasets[1]["backgroundColor"], json!(DEFAULT_PALETTE[1]));
        assert_eq!(datasets[0]["tension"], json!(0.4));
    }

    #[test]
    fn test_stacked_bar() {
        let rows = vec![
            row(&[("month", json!("2024-01")), ("category", json!("rent")), ("total", json!(10.0))]),
            row(&[("month", json!("2024-01")), ("category", json!("food")), ("total", json!(4.0))]),
            row(&[("month", json!("2024-02")), ("category", json!("rent")), ("total", json!(11.0))]),
        ];
        let result = ToolResult::new("k", "t", rows);
        let descriptor = VisualizationDescriptor {
            keyword: "k".to_string(),
            chart_type: Some(ChartType::Bar),
            x_axis: Some("month".to_string()),
            y_axis: Some(AxisFields::from("total")),
            stack_by: Some("category".to_string()),
            ..Default::default()
        };
        let config = VisualizationBinder::default()
            .bind(&result, Some(&descriptor))
            .chart_config
            .unwrap();

        assert_eq!(config["data"]["labels"], json!(["2024-01", "2024-02"]));
        assert_eq!(config["data"]["datasets"][0]["label"], json!("Rent"));
        assert_eq!(config["data"]["datasets"][1]["data"], json!([4.0, 0.0]));
        assert_eq!(config["options"]["scales"]["x"]["stacked"], json!(true));
    }

    #[test]
    fn test_stacking_on_radial_is_soft_error() {
        let rows = vec![row(&[("category", json!("rent")), ("channel", json!("card")), ("total", json!(1.0))])];
        let result = ToolResult::new("k", "Mix", rows);
        let descriptor = VisualizationDescriptor {
            keyword: "k".to_string(),
            chart_type: Some(ChartType::Pie),
            stack_by: Some("channel".to_string()),
            ..Default::default()
        };
        let payload = VisualizationBinder::default().bind(&result, Some(&descriptor));

        assert!(payload.chart_config.is_none());
        assert!(payload.chart_error.unwrap().contains("stack_by"));
        assert_eq!(payload.table_data.len(), 1);
    }

    #[test]
    fn test_table_kind_has_no_chart() {
        let descriptor = VisualizationDescriptor {
            keyword: "expenses_by_category".to_string(),
            kind: Some(PanelKind::Table),
            title: Some("Table view".to_string()),
            ..Default::default()
        };
        let payload = VisualizationBinder::default().bind(&category_result(2), Some(&descriptor));
        assert!(payload.chart_config.is_none());
        assert!(payload.chart_error.is_none());
        assert_eq!(payload.chart_title.as_deref(), Some("Table view"));
    }

    #[test]
    fn test_empty_rows_soft_error() {
        let payload = VisualizationBinder::default().bind(&ToolResult::new("k", "t", vec![]), None);
        assert!(payload.chart_error.is_some());
    }

    #[test]
    fn test_format_for_frontend_swaps_markers() {
        let config = VisualizationBinder::default()
            .bind(&category_result(2).currency(), None)
            .chart_config
            .unwrap();
        let text = format_for_frontend(&config).unwrap();
        assert!(!text.contains(CURRENCY_TOOLTIP));
        assert!(text.contains("function(context)"));
    }
}
