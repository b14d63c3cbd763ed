//! `${name}` placeholder substitution for action payloads.
//!
//! Unknown placeholders are left untouched so a missing variable surfaces in the
//! downstream tool rather than silently becoming an empty string.

use serde_json::Value;
use std::collections::HashMap;

/// Replace `${name}` placeholders in a single string
pub fn substitute_str(input: &str, variables: &HashMap<String, String>) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find('}') {
            Some(end) => {
                let name = &after_open[..end];
                match variables.get(name.trim()) {
                    Some(value) => output.push_str(value),
                    None => {
                        output.push_str("${");
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after_open[end + 1..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}

/// Replace placeholders in every string of a JSON payload, keys included
pub fn substitute_value(value: &Value, variables: &HashMap<String, String>) -> Value {
    if variables.is_empty() {
        return value.clone();
    }
    match value {
        Value::String(s) => Value::String(substitute_str(s, variables)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, variables))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    (
                        substitute_str(key, variables),
                        substitute_value(val, variables),
                    )
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Placeholder names referenced anywhere in a payload
pub fn referenced_variables(value: &Value) -> Vec<String> {
    fn collect(s: &str, names: &mut Vec<String>) {
        let mut rest = s;
        while let Some(start) = rest.find("${") {
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find('}') else {
                return;
            };
            let name = after_open[..end].trim().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
            rest = &after_open[end + 1..];
        }
    }

    fn walk(value: &Value, names: &mut Vec<String>) {
        match value {
            Value::String(s) => collect(s, names),
            Value::Array(items) => items.iter().for_each(|item| walk(item, names)),
            Value::Object(map) => map.iter().for_each(|(key, val)| {
                collect(key, names);
                walk(val, names);
            }),
            _ => {}
        }
    }

    let mut names = Vec::new();
    walk(value, &mut names);
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("period".to_string(), "2026-09".to_string()),
            ("region".to_string(), "emea".to_string()),
        ])
    }

    #[test]
    fn test_substitute_str() {
        assert_eq!(
            substitute_str("report_${period}_${region}.xlsx", &vars()),
            "report_2026-09_emea.xlsx"
        );
        assert_eq!(substitute_str("${ period }", &vars()), "2026-09");
        assert_eq!(substitute_str("keep ${unknown}", &vars()), "keep ${unknown}");
        assert_eq!(substitute_str("open ${period", &vars()), "open ${period");
    }

    #[test]
    fn test_substitute_nested_payload() {
        let payload = json!({
            "url": "https://portal/${region}",
            "steps": [{"fill": {"#period": "${period}"}}],
            "retries": 2
        });
        let result = substitute_value(&payload, &vars());
        assert_eq!(result["url"], "https://portal/emea");
        assert_eq!(result["steps"][0]["fill"]["#period"], "2026-09");
        assert_eq!(result["retries"], 2);
    }

    #[test]
    fn test_referenced_variables() {
        let payload = json!({"a": "${period}", "b": ["${region}", "${period}"]});
        assert_eq!(referenced_variables(&payload), vec!["period", "region"]);
    }
}
