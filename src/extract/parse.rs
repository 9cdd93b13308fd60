use serde_json::Value;

use crate::error::ExtractionError;
use crate::model::ExtractedTheme;

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Drops a surrounding Markdown code fence (with or without a language tag).
pub(super) fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parses a completion into at most `max_themes` themes. Elements without a
/// usable name are skipped; anything that is not an array of objects fails.
pub(super) fn parse_themes(
    raw: &str,
    max_themes: usize,
) -> Result<Vec<ExtractedTheme>, ExtractionError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    let value = serde_json::from_str::<Value>(body).map_err(ExtractionError::InvalidJson)?;
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(ExtractionError::UnexpectedShape(format!(
                "expected an array, found {}",
                json_kind(&other)
            )));
        }
    };

    let mut themes = Vec::<ExtractedTheme>::new();
    for (position, item) in items.iter().enumerate() {
        if themes.len() >= max_themes {
            break;
        }
        let Value::Object(fields) = item else {
            return Err(ExtractionError::UnexpectedShape(format!(
                "element {position} is {}, not an object",
                json_kind(item)
            )));
        };

        let Some(name) = fields
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
        else {
            continue;
        };

        let mut theme = ExtractedTheme::new(name, confidence_of(fields.get("confidence")));
        theme.summary = fields
            .get("summary")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        theme.keywords = keywords_of(fields.get("keywords"));
        theme.mapped_topic = ["mapped_topic", "mappedTopic"]
            .iter()
            .find_map(|key| fields.get(*key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string);
        themes.push(theme);
    }
    Ok(themes)
}

fn confidence_of(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(confidence) if confidence.is_finite() => confidence.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

fn keywords_of(value: Option<&Value>) -> Vec<String> {
    let raw = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect::<Vec<String>>(),
        Some(Value::String(text)) => text.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|keyword| keyword.trim().to_string())
        .filter(|keyword| !keyword.is_empty())
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
