//! Recovery of a structured plan from raw model text.
//!
//! Model output is treated as untrusted: anything that does not parse, names
//! an unknown tool or references a disallowed keyword is dropped, never
//! surfaced as an error.

use crate::schema::{AxisFields, ChartType, PanelKind, SortDirection, VisualizationDescriptor};
use crate::tools::{ArgValue, ToolArguments, ToolCall, ToolRegistry};
use log::{debug, warn};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

pub const MAX_PLAN_ITEMS: usize = 3;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").unwrap());

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub reply_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub visualizations: Vec<VisualizationDescriptor>,
}

impl Plan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.reply_text.is_empty() && self.tool_calls.is_empty() && self.visualizations.is_empty()
    }

    pub fn descriptor_for(&self, keyword: &str) -> Option<&VisualizationDescriptor> {
        self.visualizations.iter().find(|d| d.keyword == keyword)
    }
}

/// Finds the first JSON object in `content` and turns it into a [`Plan`].
///
/// Candidates are tried in order: a fenced code block, the whole trimmed
/// text, then the first balanced `{...}` span. No candidate gives an empty plan.
pub fn parse_plan(content: &str, registry: &ToolRegistry) -> Plan {
    match parse_json_object(content) {
        Some(object) => plan_from_object(&object, registry),
        None => {
            warn!("Model response did not contain a JSON object; using an empty plan");
            Plan::empty()
        }
    }
}

pub fn parse_json_object(content: &str) -> Option<Map<String, Value>> {
    let trimmed = content.trim();
    let mut candidates: Vec<&str> = Vec::new();

    if let Some(caps) = FENCED_BLOCK.captures(trimmed) {
        if let Some(inner) = caps.get(1) {
            candidates.push(inner.as_str());
        }
    }
    candidates.push(trimmed);
    if let Some(span) = first_balanced_object(trimmed) {
        candidates.push(span);
    }

    candidates.into_iter().find_map(|candidate| {
        match serde_json::from_str::<Value>(candidate.trim()) {
            Ok(Value::Object(object)) => Some(object),
            _ => None,
        }
    })
}

/// First `{...}` span by depth, with quoted strings (and their escapes) skipped.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    None
}

fn plan_from_object(object: &Map<String, Value>, registry: &ToolRegistry) -> Plan {
    let reply_text = ["reply", "message"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .unwrap_or("")
        .trim()
        .to_string();

    let tool_calls: Vec<ToolCall> = object
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| tool_call_from_value(call, registry))
                .take(MAX_PLAN_ITEMS)
                .collect()
        })
        .unwrap_or_default();

    let visualizations: Vec<VisualizationDescriptor> = object
        .get("visualizations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| descriptor_from_value(item, registry))
                .take(MAX_PLAN_ITEMS)
                .collect()
        })
        .unwrap_or_default();

    debug!(
        "Parsed plan with {} tool call(s) and {} visualization(s)",
        tool_calls.len(),
        visualizations.len()
    );

    Plan {
        reply_text,
        tool_calls,
        visualizations,
    }
}

fn tool_call_from_value(value: &Value, registry: &ToolRegistry) -> Option<ToolCall> {
    let object = value.as_object()?;
    let name = ["tool", "tool_name", "name"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))?
        .trim();

    if !registry.is_known(name) {
        warn!("Dropping plan call to unknown tool '{}'", name);
        return None;
    }

    let arguments: ToolArguments = ["arguments", "args"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_object))
        .map(|args| {
            args.iter()
                .filter_map(|(key, value)| ArgValue::from_json(value).map(|v| (key.clone(), v)))
                .collect()
        })
        .unwrap_or_default();

    Some(ToolCall {
        tool_name: name.to_string(),
        arguments,
    })
}

fn descriptor_from_value(value: &Value, registry: &ToolRegistry) -> Option<VisualizationDescriptor> {
    let object = value.as_object()?;
    let keyword = object.get("keyword").and_then(Value::as_str)?.trim();

    if !registry.is_allowed_keyword(keyword) {
        warn!("Dropping visualization with disallowed keyword '{}'", keyword);
        return None;
    }

    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let y_axis = match object.get("y_axis") {
        Some(Value::String(field)) if !field.trim().is_empty() => {
            Some(AxisFields::Single(field.trim().to_string()))
        }
        Some(Value::Array(fields)) => {
            let fields: Vec<String> = fields
                .iter()
                .filter_map(Value::as_str)
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
            match fields.len() {
                0 => None,
                1 => fields.into_iter().next().map(AxisFields::Single),
                _ => Some(AxisFields::Many(fields)),
            }
        }
        _ => None,
    };

    let kind = text("kind").and_then(|k| match k.to_ascii_lowercase().as_str() {
        "chart" => Some(PanelKind::Chart),
        "table" => Some(PanelKind::Table),
        _ => None,
    });

    Some(VisualizationDescriptor {
        keyword: keyword.to_string(),
        title: text("title"),
        chart_type: text("chart_type").as_deref().and_then(ChartType::parse_loose),
        x_axis: text("x_axis"),
        y_axis,
        stack_by: text("stack_by"),
        kind,
        sort: text("sort").as_deref().and_then(SortDirection::parse_loose),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_JSON: &str = r#"{"reply": "Here you go.", "tool_calls": [{"tool": "expenses_by_category", "arguments": {"days": 90}}], "visualizations": [{"keyword": "expenses_by_category", "chart_type": "doughnut"}]}"#;

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
    }

    fn assert_recovered(plan: &Plan) {
        assert_eq!(plan.reply_text, "Here you go.");
        assert_eq!(plan.tool_calls.len(), 1);
        assert_eq!(plan.tool_calls[0].arguments["days"], ArgValue::Int(90));
        assert_eq!(plan.visualizations[0].chart_type, Some(ChartType::Doughnut));
    }

    #[test]
    fn test_raw_json() {
        assert_recovered(&parse_plan(PLAN_JSON, &registry()));
    }

    #[test]
    fn test_fenced_block() {
        let content = format!("Sure! Here's the plan:\n```json\n{}\n```\nLet me know.", PLAN_JSON);
        assert_recovered(&parse_plan(&content, &registry()));
    }

    #[test]
    fn test_prose_wrapped_object() {
        let content = format!("I think this works: {} Hope that helps {{not json}}", PLAN_JSON);
        assert_recovered(&parse_plan(&content, &registry()));
    }

    #[test]
    fn test_unparsable_gives_empty_plan() {
        assert!(parse_plan("I cannot help with that.", &registry()).is_empty());
        assert!(parse_plan("{\"reply\": \"unterminated", &registry()).is_empty());
        assert!(parse_plan("[1, 2, 3]", &registry()).is_empty());
    }

    #[test]
    fn test_braces_inside_strings_are_skipped() {
        let text = r#"prefix {"reply": "use {braces} and \"quotes\" }", "tool_calls": []} trailing }"#;
        let span = first_balanced_object(text).unwrap();
        assert!(span.ends_with("\"tool_calls\": []}"));
        let plan = parse_plan(text, &registry());
        assert_eq!(plan.reply_text, "use {braces} and \"quotes\" }");
    }

    #[test]
    fn test_message_alias_and_filtering() {
        let content = r#"{
            "message": "Filtered.",
            "tool_calls": [
                {"tool": "drop_everything"},
                {"tool": "thirty_day_summary"},
                {"tool": "monthly_comparison", "arguments": {"months": "4", "nested": {"x": 1}}},
                {"tool": "quarter_to_date_summary"},
                {"tool": "monthly_expense_trend"}
            ],
            "visualizations": [
                {"keyword": "salary_history"},
                {"keyword": "company_employees", "kind": "table"},
                {"keyword": "monthly_comparison", "y_axis": ["income_total", "expenses"], "chart_type": "scatter", "sort": "ASC"}
            ]
        }"#;
        let plan = parse_plan(content, &registry());

        assert_eq!(plan.reply_text, "Filtered.");
        let names: Vec<&str> = plan.tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["thirty_day_summary", "monthly_comparison", "quarter_to_date_summary"]
        );
        assert_eq!(plan.tool_calls[1].arguments.len(), 1);
        assert_eq!(plan.tool_calls[1].arguments["months"], ArgValue::from("4"));

        assert_eq!(plan.visualizations.len(), 2);
        assert_eq!(plan.visualizations[0].kind, Some(PanelKind::Table));
        let comparison = plan.descriptor_for("monthly_comparison").unwrap();
        assert_eq!(comparison.chart_type, None);
        assert_eq!(comparison.sort, Some(SortDirection::Asc));
        assert_eq!(
            comparison.y_axis,
            Some(AxisFields::Many(vec!["income_total".to_string(), "expenses".to_string()]))
        );
    }
}
