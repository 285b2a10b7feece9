//! # Model Response Normalization
//!
//! The identification model answers with free text that is usually, but not always, a JSON
//! object. Different model versions also drift in how they spell keys and type values. This
//! module is the only place that knows about that drift: it turns raw text into a fully
//! populated [`IdentificationResult`] or a parse error.
//!
//! ## Rules
//!
//! - Markdown code fences (```` ```json ... ``` ````) are stripped, even after leading prose.
//!   Unfenced prose around a single object is cut away.
//! - A top-level array is accepted when its first element is an object.
//! - Every field has a list of accepted key spellings (see [`FIELD_KEYS`]); the first
//!   present, non-empty scalar value wins.
//! - Missing or empty text fields fall back to the sentinel defaults in [`crate::models`].
//! - `price` accepts numbers or currency strings such as `"$12.50"` or `"1,299 USD"`. Only the
//!   first number in a string counts (`"$10-$15"` is 10). Anything negative, non-finite or
//!   unparseable becomes `0`.
//!
//! Only text that is not JSON at all (or JSON that holds no object) is a parse error.

use serde_json::{Map, Value};

use crate::error::IdentifyError;
use crate::models::{
    DEFAULT_RARITY, IdentificationResult, NO_DESCRIPTION, UNKNOWN_CODE, UNKNOWN_NAME, UNKNOWN_SET,
};

/// Field of [`IdentificationResult`] paired with the key spellings accepted for it
pub const FIELD_KEYS: [(&str, &[&str]); 7] = [
    ("name", &["name", "Name", "card_name", "cardName"]),
    ("set", &["set", "Set", "set_name", "setName"]),
    ("code", &["code", "Code", "card_code", "cardCode"]),
    ("rarity", &["rarity", "Rarity"]),
    ("price", &["price", "Price", "market_price", "marketPrice"]),
    ("image", &["image", "Image", "image_url", "imageUrl"]),
    ("description", &["description", "Description"]),
];

/// Parses raw model text into a normalized result
pub fn parse_identification(raw: &str) -> Result<IdentificationResult, IdentifyError> {
    let body = strip_code_fence(raw);

    let value: Value = serde_json::from_str(body).map_err(|e| IdentifyError::Parse {
        message: format!("response is not valid JSON ({})", preview(body)),
        source: Some(e),
    })?;

    let object = match value {
        Value::Object(map) => map,
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(IdentifyError::Parse {
                    message: "response array holds no object".to_string(),
                    source: None,
                });
            }
        },
        other => {
            return Err(IdentifyError::Parse {
                message: format!("expected a JSON object, got {}", json_kind(&other)),
                source: None,
            });
        }
    };

    Ok(normalize_fields(&object))
}

/// Maps a loosely typed object onto the strict result shape
pub fn normalize_fields(object: &Map<String, Value>) -> IdentificationResult {
    IdentificationResult {
        name: text_field(object, "name").unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        set: text_field(object, "set").unwrap_or_else(|| UNKNOWN_SET.to_string()),
        code: text_field(object, "code").unwrap_or_else(|| UNKNOWN_CODE.to_string()),
        rarity: text_field(object, "rarity").unwrap_or_else(|| DEFAULT_RARITY.to_string()),
        price: field(object, "price").map_or(0.0, parse_price),
        image: text_field(object, "image").unwrap_or_default(),
        description: text_field(object, "description")
            .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
    }
}

/// Cuts the JSON payload out of the model text.
///
/// The first markdown code fence wins, wherever it starts, with or without a language tag.
/// Without a fence, text that does not already start as JSON is narrowed to its outermost
/// `{ ... }` span.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(open) = trimmed.find("```") {
        // Drop the info string (`json`, `JSON`, ...)
        let rest = trimmed[open + 3..].trim_start_matches(|c: char| c.is_ascii_alphabetic());
        let body = match rest.find("```") {
            Some(close) => &rest[..close],
            None => rest,
        };
        return body.trim();
    }

    if trimmed.starts_with(['{', '[']) {
        return trimmed;
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Coerces a JSON price into a non-negative number
pub fn parse_price(value: &Value) -> f64 {
    let price = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_price_text(s),
        _ => 0.0,
    };

    if price.is_finite() && price > 0.0 { price } else { 0.0 }
}

/// Reads the first number in the text, so ranges and trailing words are ignored
fn parse_price_text(text: &str) -> f64 {
    let Some(start) = text.find(|c: char| c.is_ascii_digit()) else {
        return 0.0;
    };

    let prefix = &text[..start];
    let mut number = String::new();
    let mut seen_dot = false;
    if prefix.ends_with('.') {
        number.push_str("0.");
        seen_dot = true;
    }

    let mut chars = text[start..].chars().peekable();
    while let Some(c) = chars.next() {
        let digit_follows = chars.peek().is_some_and(char::is_ascii_digit);
        match c {
            '0'..='9' => number.push(c),
            ',' if digit_follows => {}
            '.' if digit_follows && !seen_dot => {
                seen_dot = true;
                number.push('.');
            }
            _ => break,
        }
    }

    let negative = prefix
        .trim_end_matches('.')
        .trim_end_matches(|c: char| c != '-' && !c.is_alphanumeric())
        .ends_with('-');

    let price = number.parse::<f64>().unwrap_or(0.0);
    if negative { -price } else { price }
}

fn field<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    let (_, keys) = FIELD_KEYS.iter().find(|(field, _)| *field == name)?;

    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| is_usable(value))
}

fn text_field(object: &Map<String, Value>, name: &str) -> Option<String> {
    match field(object, name)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Non-blank scalars; nulls, objects and arrays fall through to the next spelling
fn is_usable(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Number(_) | Value::Bool(_) => true,
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
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

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
