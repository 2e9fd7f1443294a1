//! Placeholder rendering for mail templates.
//!
//! Templates use `<%= name %>` tags. Names may be dotted paths into nested
//! objects (`<%= user.name %>`). A tag whose name has no value is an error;
//! rendering never silently drops a placeholder.

use thiserror::Error;

const TAG_OPEN: &str = "<%=";
const TAG_CLOSE: &str = "%>";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("No value for template variable '{0}'")]
    MissingVariable(String),

    #[error("Unterminated template tag at byte {0}")]
    UnterminatedTag(usize),
}

/// Render `template`, replacing every tag with its value from `data`.
pub fn render_template(
    template: &str,
    data: &serde_json::Map<String, serde_json::Value>,
) -> Result<String, RenderError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(TAG_OPEN) {
        output.push_str(&rest[..start]);

        let offset = template.len() - rest.len() + start;
        let inner = &rest[start + TAG_OPEN.len()..];
        let end = inner
            .find(TAG_CLOSE)
            .ok_or(RenderError::UnterminatedTag(offset))?;

        let name = inner[..end].trim();
        let value =
            lookup(data, name).ok_or_else(|| RenderError::MissingVariable(name.to_string()))?;
        output.push_str(&display_value(value));

        rest = &inner[end + TAG_CLOSE.len()..];
    }

    output.push_str(rest);
    Ok(output)
}

fn lookup<'a>(
    data: &'a serde_json::Map<String, serde_json::Value>,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let root = data.get(segments.next()?)?;
    segments.try_fold(root, |value, key| value.get(key))
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        // Arrays and objects render as JSON
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_simple() {
        let rendered = render_template(
            "Testing 123 <%= username %> tut\n",
            &data(json!({"username": "Bosse"})),
        )
        .unwrap();
        assert_eq!(rendered, "Testing 123 Bosse tut\n");
    }

    #[test]
    fn test_render_without_spaces_and_repeated() {
        let rendered = render_template(
            "<%=a%>-<%= a %>-<%= b %>",
            &data(json!({"a": 1, "b": true})),
        )
        .unwrap();
        assert_eq!(rendered, "1-1-true");
    }

    #[test]
    fn test_render_dotted_path() {
        let rendered = render_template(
            "Order <%= order.id %> for <%= order.customer.name %>",
            &data(json!({"order": {"id": "ORD-1", "customer": {"name": "Nisse"}}})),
        )
        .unwrap();
        assert_eq!(rendered, "Order ORD-1 for Nisse");
    }

    #[test]
    fn test_render_missing_variable() {
        let result = render_template("Hi <%= name %>", &serde_json::Map::new());
        assert_eq!(result, Err(RenderError::MissingVariable("name".to_string())));
    }

    #[test]
    fn test_render_unterminated_tag() {
        let result = render_template("abc <%= name", &data(json!({"name": "x"})));
        assert_eq!(result, Err(RenderError::UnterminatedTag(4)));
    }

    #[test]
    fn test_render_plain_text() {
        let rendered = render_template("No tags here", &serde_json::Map::new()).unwrap();
        assert_eq!(rendered, "No tags here");
    }
}
