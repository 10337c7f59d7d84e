use query_core::Value;

use crate::binding::SqlParams;
use crate::error::{SqlError, SqlResult};

/// Turns template text plus a parameter model into SQL text.
pub trait TemplateResolver: Send + Sync {
    fn render(&self, id: &str, template: &str, model: &SqlParams) -> SqlResult<String>;
}

/// `${name}` interpolation.
///
/// Values are inserted as text, lists comma-joined. This is text
/// substitution: values that come from callers belong in `:name` bind
/// parameters, which pass through rendering untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleResolver;

fn interpolate(v: &Value) -> String {
    match v {
        Value::List(items) => items.iter().map(interpolate).collect::<Vec<_>>().join(","),
        Value::Null => "NULL".to_owned(),
        other => other.to_string(),
    }
}

impl TemplateResolver for SimpleResolver {
    fn render(&self, id: &str, template: &str, model: &SqlParams) -> SqlResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| SqlError::render(id, format!("unterminated '${{' at byte {}", template.len() - rest.len() + start)))?;
            let name = after[..end].trim();
            let value = model
                .get(name)
                .ok_or_else(|| SqlError::render(id, format!("unknown model value '{name}'")))?;
            out.push_str(&interpolate(&value.value));
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
