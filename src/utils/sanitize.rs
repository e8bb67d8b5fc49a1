use serde_json::Value;

/// Masks credentials and signatures in JSON payloads before they are logged.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_field(key: &str) -> bool {
    let key = key.to_lowercase();
    matches!(
        key.as_str(),
        "password" | "secret" | "token" | "api_key" | "authorization" | "signature" | "card_number"
    ) || key.ends_with("_secret")
        || key.ends_with("_token")
        || key.ends_with("_signature")
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > 8 => {
            let chars: Vec<char> = s.chars().collect();
            let start: String = chars[..4].iter().collect();
            let end: String = chars[chars.len() - 4..].iter().collect();
            Value::String(format!("{}****{}", start, end))
        }
        _ => Value::String("****".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_signature_and_secrets() {
        let input = json!({
            "payment_signature": "9f86d081884c7d659a2feaa0c55ad015",
            "signing_secret": "short",
            "donation_number": "DON-20250101-ABCDEF12"
        });

        let sanitized = sanitize_json(&input);

        assert_eq!(sanitized["payment_signature"], "9f86****d015");
        assert_eq!(sanitized["signing_secret"], "****");
        assert_eq!(sanitized["donation_number"], "DON-20250101-ABCDEF12");
    }

    #[test]
    fn test_sanitize_nested() {
        let input = json!({
            "gateway": {
                "api_key": 12345,
                "name": "acme"
            },
            "items": [{"token": "tok_abcdefghijkl"}]
        });

        let sanitized = sanitize_json(&input);
        assert_eq!(sanitized["gateway"]["api_key"], "****");
        assert_eq!(sanitized["gateway"]["name"], "acme");
        assert_eq!(sanitized["items"][0]["token"], "tok_****ijkl");
    }
}
