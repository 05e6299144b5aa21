use serde_json::{Map, Value};

/// Section payload recovered from a model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub data: Value,
    pub assumptions: Vec<String>,
    pub limitations: Vec<String>,
}

/// Locates the JSON object in a model reply: a ```json fence, a bare fence
/// holding an object, or the outermost braces.
pub fn extract_json(content: &str) -> &str {
    if let Some(start) = content.find("```json") {
        let body = &content[start + 7..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    if let Some(start) = content.find("```") {
        let body = &content[start + 3..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return inner;
            }
        }
    }
    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}'))
        && start < end
    {
        return &content[start..=end];
    }
    content.trim()
}

/// Parses a reply into a section payload. Replies that already carry the
/// envelope (a `data` object next to envelope keys) are unwrapped.
pub fn parse_reply(content: &str) -> Result<ParsedReply, serde_json::Error> {
    let value: Value = serde_json::from_str(extract_json(content))?;

    let Value::Object(mut map) = value else {
        return Ok(ParsedReply {
            data: value,
            assumptions: Vec::new(),
            limitations: Vec::new(),
        });
    };

    if !is_envelope(&map) {
        return Ok(ParsedReply {
            data: Value::Object(map),
            assumptions: Vec::new(),
            limitations: Vec::new(),
        });
    }

    let assumptions = string_list(map.get("assumptions"));
    let limitations = string_list(map.get("limitations"));
    let data = map.remove("data").unwrap_or(Value::Null);

    Ok(ParsedReply {
        data,
        assumptions,
        limitations,
    })
}

fn is_envelope(map: &Map<String, Value>) -> bool {
    const ENVELOPE_KEYS: [&str; 6] = [
        "section_id",
        "section_name",
        "version",
        "model",
        "provenance",
        "assumptions",
    ];
    matches!(map.get("data"), Some(Value::Object(_)))
        && (map.len() == 1 || ENVELOPE_KEYS.iter().any(|key| map.contains_key(*key)))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_raw() {
        let input = r#"{"paragraphs": ["A"]}"#;
        assert_eq!(extract_json(input), input);
    }

    #[test]
    fn test_extract_json_fenced() {
        let input = "Here you go:\n```json\n{\"headline\": \"Flat\"}\n```\nThanks.";
        assert_eq!(extract_json(input), "{\"headline\": \"Flat\"}");
    }

    #[test]
    fn test_extract_json_generic_fence() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(extract_json(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_extract_json_embedded() {
        let input = "The result is {\"a\": 1} and that's it.";
        assert_eq!(extract_json(input), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_no_json() {
        assert_eq!(extract_json("  no json here "), "no json here");
    }

    #[test]
    fn test_parse_reply_plain_payload() {
        let parsed = parse_reply(r#"{"paragraphs": ["One."]}"#).unwrap();
        assert_eq!(parsed.data, json!({"paragraphs": ["One."]}));
        assert!(parsed.assumptions.is_empty());
    }

    #[test]
    fn test_parse_reply_unwraps_envelope() {
        let reply = r#"```json
{
  "section_name": "market_commentary",
  "version": "v1",
  "data": {"headline": "Stable", "subsections": []},
  "assumptions": ["Data as of January 2026"],
  "limitations": []
}
```"#;
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.data["headline"], "Stable");
        assert_eq!(parsed.assumptions, vec!["Data as of January 2026".to_string()]);
    }

    #[test]
    fn test_parse_reply_keeps_payload_with_data_field() {
        // A payload that merely has a `data` key alongside its own fields stays intact.
        let parsed = parse_reply(r#"{"data": {"x": 1}, "headline": "Busy"}"#).unwrap();
        assert_eq!(parsed.data["headline"], "Busy");
    }

    #[test]
    fn test_parse_reply_invalid_json() {
        assert!(parse_reply("The market was calm.").is_err());
    }
}
