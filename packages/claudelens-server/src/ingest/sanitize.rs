//! Payload sanitization (§4.4 Validation): script-tag fragments stripped
//! case-insensitively before a record's content hash is computed.

use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("static pattern compiles")
});

/// Strips `<script>...</script>` fragments from a text payload,
/// case-insensitively, leaving everything else untouched.
#[must_use]
pub fn strip_script_tags(input: &str) -> String {
    SCRIPT_TAG.replace_all(input, "").into_owned()
}

/// Recursively sanitizes every string leaf of a JSON value.
#[must_use]
pub fn sanitize_json(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(strip_script_tags(&s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sanitize_json).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().map(|(k, v)| (k, sanitize_json(v))).collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tag_case_insensitively() {
        let input = "hello <ScRiPt>alert(1)</sCrIpT> world";
        assert_eq!(strip_script_tags(input), "hello  world");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let input = "no markup here";
        assert_eq!(strip_script_tags(input), input);
    }

    #[test]
    fn sanitize_json_recurses_into_nested_objects() {
        let value = serde_json::json!({
            "a": "<script>bad()</script>safe",
            "b": ["<script>x</script>ok", 5],
        });
        let sanitized = sanitize_json(value);
        assert_eq!(sanitized["a"], "safe");
        assert_eq!(sanitized["b"][0], "ok");
        assert_eq!(sanitized["b"][1], 5);
    }
}
