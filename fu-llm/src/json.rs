use crate::error::{LlmError, Result};

/// Pull the first balanced `{...}` object out of a model reply.
///
/// Models asked for strict JSON still wrap it in code fences or prose now and then.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let start = trimmed
        .find('{')
        .ok_or_else(|| LlmError::ResponseFormat("no json object in reply".into()))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in trimmed[start..].char_indices() {
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
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let candidate = &trimmed[start..start + offset + 1];
                    let value: serde_json::Value = serde_json::from_str(candidate)?;
                    return Ok(value);
                }
            }
            _ => {}
        }
    }

    Err(LlmError::ResponseFormat("unterminated json object".into()))
}
