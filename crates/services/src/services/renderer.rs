use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Everything the renderer needs to turn a template source into a concrete
/// email. `variables` are the caller-supplied bindings; display names are
/// resolved by the worker right before rendering.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub template_source: String,
    pub theme_id: Option<uuid::Uuid>,
    pub variables: Value,
    pub user_display_name: Option<String>,
    pub project_display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: Option<String>,
    pub html: String,
    pub text: String,
    /// Category name declared by the template, e.g. "Transactional".
    pub notification_category: Option<String>,
}

/// Rendering failure. `external_message` is safe to show to API consumers;
/// `details` carries the underlying error for the row's error payload.
#[derive(Debug, Clone, Error)]
#[error("{external_message}")]
pub struct RenderError {
    pub external_message: String,
    pub details: Value,
}

impl RenderError {
    fn new(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            external_message:
                "An error occurred while rendering the email. Make sure the template is valid \
                 and the theme is set correctly."
                    .to_string(),
            details: serde_json::json!({ "error": detail }),
        }
    }
}

/// Seam to the template engine. Rendering failures surface as a distinct
/// error with a details payload, never as a silent fallback.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedEmail, RenderError>;
}

/// Built-in renderer.
///
/// Templates are HTML fragments with two optional self-closing directives,
/// which are consumed rather than emitted:
///
/// ```text
/// <Subject value="Welcome, {{userDisplayName}}" />
/// <NotificationCategory value="Marketing" />
/// ```
///
/// `{{name}}` placeholders are substituted from the request variables plus
/// the built-ins `userDisplayName` and `projectDisplayName`. Unknown
/// placeholders are left untouched. The plain-text part is the HTML with
/// tags stripped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    fn bindings(request: &RenderRequest) -> Map<String, Value> {
        let mut bindings = Map::new();
        bindings.insert(
            "projectDisplayName".to_string(),
            Value::String(request.project_display_name.clone()),
        );
        bindings.insert(
            "userDisplayName".to_string(),
            Value::String(request.user_display_name.clone().unwrap_or_default()),
        );
        if let Value::Object(vars) = &request.variables {
            for (key, value) in vars {
                bindings.insert(key.clone(), value.clone());
            }
        }
        bindings
    }

    fn substitute(input: &str, bindings: &Map<String, Value>) -> Result<String, RenderError> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("{{") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(RenderError::new(format!(
                    "unterminated placeholder starting at: {}",
                    &rest[start..rest.len().min(start + 30)]
                )));
            };
            let name = after[..end].trim();
            match bindings.get(name) {
                Some(Value::String(s)) => output.push_str(s),
                Some(Value::Null) | None => {
                    output.push_str(&rest[start..start + 2 + end + 2]);
                }
                Some(other) => output.push_str(&other.to_string()),
            }
            rest = &after[end + 2..];
        }
        output.push_str(rest);
        Ok(output)
    }

    /// Extracts `<Name value="..." />` and returns (value, source without the
    /// directive). A directive present but malformed is a render error.
    fn extract_directive(source: &str, name: &str) -> Result<(Option<String>, String), RenderError> {
        let open = format!("<{name}");
        let Some(start) = source.find(&open) else {
            return Ok((None, source.to_string()));
        };
        let after_tag = &source[start..];
        let Some(close) = after_tag.find("/>") else {
            return Err(RenderError::new(format!("unclosed <{name}> directive")));
        };
        let directive = &after_tag[..close + 2];
        let Some(value_start) = directive.find("value=\"") else {
            return Err(RenderError::new(format!(
                "<{name}> directive is missing a value attribute"
            )));
        };
        let value_rest = &directive[value_start + 7..];
        let Some(value_end) = value_rest.find('"') else {
            return Err(RenderError::new(format!(
                "<{name}> directive has an unterminated value"
            )));
        };
        let value = value_rest[..value_end].to_string();
        let mut remaining = String::with_capacity(source.len());
        remaining.push_str(&source[..start]);
        remaining.push_str(&after_tag[close + 2..]);
        Ok((Some(value), remaining))
    }

    fn strip_tags(html: &str) -> String {
        let mut text = String::with_capacity(html.len());
        let mut in_tag = false;
        for ch in html.chars() {
            match ch {
                '<' => in_tag = true,
                '>' => in_tag = false,
                _ if !in_tag => text.push(ch),
                _ => {}
            }
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[async_trait]
impl TemplateRenderer for TemplateEngine {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedEmail, RenderError> {
        if request.template_source.trim().is_empty() {
            return Err(RenderError::new("template source is empty"));
        }

        let bindings = Self::bindings(request);
        let (subject, source) =
            Self::extract_directive(&request.template_source, "Subject")?;
        let (category, source) = Self::extract_directive(&source, "NotificationCategory")?;

        let subject = subject
            .map(|raw| Self::substitute(&raw, &bindings))
            .transpose()?;
        let html = Self::substitute(source.trim(), &bindings)?;
        let text = Self::strip_tags(&html);

        Ok(RenderedEmail {
            subject,
            html,
            text,
            notification_category: category,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(source: &str) -> RenderRequest {
        RenderRequest {
            template_source: source.to_string(),
            theme_id: None,
            variables: serde_json::json!({}),
            user_display_name: None,
            project_display_name: "Acme".to_string(),
        }
    }

    #[tokio::test]
    async fn extracts_subject_and_category_directives() {
        let rendered = TemplateEngine::new()
            .render(&request(
                "<Subject value=\"Hello\" />\n<NotificationCategory value=\"Marketing\" />\n<p>Body</p>",
            ))
            .await
            .unwrap();
        assert_eq!(rendered.subject.as_deref(), Some("Hello"));
        assert_eq!(rendered.notification_category.as_deref(), Some("Marketing"));
        assert_eq!(rendered.html, "<p>Body</p>");
        assert_eq!(rendered.text, "Body");
    }

    #[tokio::test]
    async fn substitutes_variables_of_various_types() {
        let mut req = request("<p>{{name}} has {{count}} items, active: {{active}}</p>");
        req.variables = serde_json::json!({ "name": "Ada", "count": 3, "active": true });
        let rendered = TemplateEngine::new().render(&req).await.unwrap();
        assert_eq!(rendered.html, "<p>Ada has 3 items, active: true</p>");
    }

    #[tokio::test]
    async fn builtin_display_name_bindings_are_available() {
        let mut req = request("<p>Hi {{userDisplayName}} from {{projectDisplayName}}</p>");
        req.user_display_name = Some("Grace".to_string());
        let rendered = TemplateEngine::new().render(&req).await.unwrap();
        assert_eq!(rendered.html, "<p>Hi Grace from Acme</p>");
    }

    #[tokio::test]
    async fn unknown_placeholders_pass_through() {
        let rendered = TemplateEngine::new()
            .render(&request("<p>{{mystery}}</p>"))
            .await
            .unwrap();
        assert_eq!(rendered.html, "<p>{{mystery}}</p>");
    }

    #[tokio::test]
    async fn malformed_templates_surface_render_errors() {
        let engine = TemplateEngine::new();
        let err = engine
            .render(&request("<Subject value=\"broken />"))
            .await
            .unwrap_err();
        assert!(err.details["error"].as_str().is_some());

        let err = engine.render(&request("<p>{{oops</p>")).await.unwrap_err();
        assert!(
            err.details["error"]
                .as_str()
                .unwrap()
                .contains("unterminated placeholder")
        );

        assert!(engine.render(&request("   ")).await.is_err());
    }
}
