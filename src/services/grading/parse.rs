use serde_json::Value;

use super::errors::GradingError;

/// Parses model output that is supposed to be JSON but may arrive wrapped in prose or
/// markdown fences, or carry trailing commas.
pub(crate) fn parse_model_json(raw: &str) -> Result<Value, GradingError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GradingError::schema_invalid("Empty LLM response"));
    }

    for candidate in candidates(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Ok(value);
        }
        let repaired = strip_trailing_commas(&candidate);
        if repaired != candidate {
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                return Ok(value);
            }
        }
    }

    Err(GradingError::schema_invalid("Invalid JSON output"))
}

fn candidates(input: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !candidates.iter().any(|existing| existing == candidate) {
            candidates.push(candidate.to_string());
        }
    };

    push(input);
    if let Some(fenced) = first_fenced_block(input) {
        push(fenced);
    }
    if let Some(stripped) = strip_outer_fences(input) {
        push(stripped);
    }
    if let Some(sliced) = outer_brace_slice(input) {
        push(sliced);
    }
    for segment in balanced_segments(input) {
        push(segment);
    }

    candidates
}

fn first_fenced_block(input: &str) -> Option<&str> {
    let start = input.find("```")? + 3;
    let rest = &input[start..];
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

fn strip_outer_fences(input: &str) -> Option<&str> {
    let rest = input.strip_prefix("```")?;
    let tag_len = rest.chars().take_while(|ch| ch.is_ascii_alphabetic()).count();
    let rest = &rest[tag_len..];
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let rest = rest.trim_end();
    Some(rest.strip_suffix("```").unwrap_or(rest).trim())
}

fn outer_brace_slice(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let end = input.rfind('}')?;
    (end > start).then(|| &input[start..=end])
}

fn balanced_segments(input: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (index, ch) in input.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    start = Some(index);
                }
                depth += 1;
            }
            '}' | ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        segments.push(&input[begin..=index]);
                    }
                }
            }
            _ => {}
        }
    }

    segments
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut output = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape = false;

    for (index, &ch) in chars.iter().enumerate() {
        if escape {
            output.push(ch);
            escape = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            output.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
            output.push(ch);
            continue;
        }
        if ch == ',' {
            let next = chars[index + 1..].iter().find(|next| !next.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        output.push(ch);
    }

    output
}
