use gridmarket_models::{Action, Decision};

use crate::error::DecisionError;

/// Locate the JSON payload in free-form provider output.
///
/// Accepts, in order of preference:
/// - the whole text as a JSON object or array
/// - the body of a fenced block (```json or bare ```)
/// - the first balanced `{ ... }` or `[ ... ]` in the text
pub fn extract_json(text: &str) -> Result<&str, DecisionError> {
    let trimmed = text.trim();

    let candidates = [
        Some(trimmed),
        fenced_block(trimmed),
        first_balanced(trimmed),
    ];
    for candidate in candidates.into_iter().flatten() {
        let starts_like_json = candidate.starts_with('{') || candidate.starts_with('[');
        if starts_like_json && serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
            return Ok(candidate);
        }
    }

    Err(DecisionError::Parse(format!(
        "no JSON object or array in output (length={})",
        text.len()
    )))
}

fn fenced_block(text: &str) -> Option<&str> {
    const OPENERS: [&str; 4] = ["```json\n", "```json\r\n", "```\n", "```\r\n"];
    OPENERS.iter().find_map(|opener| {
        let body_start = text.find(opener)? + opener.len();
        let body_len = text[body_start..].find("```")?;
        Some(text[body_start..body_start + body_len].trim())
    })
}

fn first_balanced(text: &str) -> Option<&str> {
    let mut stack: Vec<char> = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
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
            '"' if !stack.is_empty() => in_string = true,
            '{' | '[' => {
                if stack.is_empty() {
                    start = i;
                }
                stack.push(if ch == '{' { '}' } else { ']' });
            }
            '}' | ']' if !stack.is_empty() => {
                if stack.pop() != Some(ch) {
                    stack.clear();
                    continue;
                }
                if stack.is_empty() {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a [`Decision`] from raw provider output.
///
/// Either a decision object or a bare array of actions is accepted.
pub fn parse_decision(raw: &str) -> Result<Decision, DecisionError> {
    let json = extract_json(raw)?;
    if json.starts_with('[') {
        let actions: Vec<Action> = serde_json::from_str(json)
            .map_err(|e| DecisionError::Parse(format!("invalid action list: {e}")))?;
        return Ok(Decision::new(actions));
    }
    serde_json::from_str(json)
        .map_err(|e| DecisionError::Parse(format!("invalid decision: {e}\nJSON: {json}")))
}
