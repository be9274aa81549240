//! Prompt templates with named `{{placeholder}}` slots.
//!
//! Templates are Handlebars documents restricted to plain variable
//! expressions.  Rendering runs in strict mode with HTML escaping off, so
//! every placeholder a template references must be bound when it is
//! formatted; an unbound placeholder is a configuration error, never a
//! silently empty string.

use handlebars::Handlebars;
use handlebars::template::{Template, TemplateElement};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Template that answers strictly from retrieved context.
pub const CONTEXT_TEMPLATE: &str = "
        Answer the question only based on the following context:
            {{context}} Question: {{question}}
    ";

/// Template that binds only the user's question.
pub const QUESTION_TEMPLATE: &str = "
        Answer the question:
            Question: {{question}}
    ";

/// Name of the placeholder holding the user's question.
pub const QUESTION: &str = "question";

/// Name of the placeholder holding retrieved context.
pub const CONTEXT: &str = "context";

/// A compiled prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    placeholders: Vec<String>,
}

impl PromptTemplate {
    /// Compiles a template string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the template does not compile, or if
    /// it uses blocks, helpers, or partials rather than plain placeholders.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let source = template.into();
        let placeholders = placeholders_of(&Template::compile(&source)?)?;
        Ok(Self {
            source,
            placeholders,
        })
    }

    /// The template that binds only `question`.
    pub fn question_only() -> Self {
        Self::builtin(QUESTION_TEMPLATE, &[QUESTION])
    }

    /// The template that binds `context` and `question`.
    pub fn with_context() -> Self {
        Self::builtin(CONTEXT_TEMPLATE, &[CONTEXT, QUESTION])
    }

    // Built-in sources always compile; see the tests below.
    fn builtin(source: &'static str, placeholders: &[&str]) -> Self {
        Self {
            source: source.to_string(),
            placeholders: placeholders.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// The raw template text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        self.placeholders.iter().map(String::as_str).collect()
    }

    /// Returns true if the template references the named placeholder.
    pub fn references(&self, name: &str) -> bool {
        self.placeholders.iter().any(|p| p == name)
    }

    /// Fills the template.
    ///
    /// Bindings the template does not reference are ignored.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first placeholder that has
    /// no binding.
    pub fn format(&self, bindings: &[(&str, &str)]) -> Result<String> {
        if let Some(unbound) = self
            .placeholders
            .iter()
            .find(|name| !bindings.iter().any(|(key, _)| key == name))
        {
            return Err(Error::configuration(
                format!("prompt template placeholder {{{{{unbound}}}}} is not bound"),
                Some(unbound.clone()),
            ));
        }
        let data: Map<String, Value> = bindings
            .iter()
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();

        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        Ok(handlebars.render_template(&self.source, &data)?)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::question_only()
    }
}

fn placeholders_of(template: &Template) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for element in &template.elements {
        match element {
            TemplateElement::RawString(_) | TemplateElement::Comment(_) => {}
            TemplateElement::Expression(expr) | TemplateElement::HtmlExpression(expr)
                if expr.params.is_empty() && expr.hash.is_empty() && !expr.block =>
            {
                let name = expr.name.as_name().ok_or_else(|| {
                    Error::configuration("prompt template placeholder must be a name", None)
                })?;
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            _ => {
                return Err(Error::configuration(
                    "prompt templates support only {{name}} placeholders",
                    None,
                ));
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_compile_to_their_placeholders() {
        for template in [PromptTemplate::question_only(), PromptTemplate::with_context()] {
            let compiled = PromptTemplate::new(template.as_str()).unwrap();
            assert_eq!(compiled, template);
        }
    }

    #[test]
    fn question_template_binds_question() {
        let template = PromptTemplate::question_only();
        assert_eq!(template.placeholders(), vec!["question"]);
        let prompt = template
            .format(&[(QUESTION, "What is an incident?")])
            .unwrap();
        assert!(prompt.contains("Question: What is an incident?"));
        assert!(prompt.contains("Answer the question:"));
    }

    #[test]
    fn context_template_lists_both_placeholders() {
        let template = PromptTemplate::with_context();
        assert_eq!(template.placeholders(), vec!["context", "question"]);
        assert!(template.references(CONTEXT));
    }

    #[test]
    fn unbound_placeholder_fails() {
        let template = PromptTemplate::with_context();
        let err = template.format(&[(QUESTION, "why?")]).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err,
            Error::Configuration { param: Some(ref p), .. } if p == "context"
        ));
    }

    #[test]
    fn extra_bindings_are_ignored() {
        let template = PromptTemplate::new("Q: {{question}}").unwrap();
        let prompt = template
            .format(&[(CONTEXT, "unused"), (QUESTION, "hi")])
            .unwrap();
        assert_eq!(prompt, "Q: hi");
    }

    #[test]
    fn values_are_not_html_escaped() {
        let template = PromptTemplate::new("Q: {{question}}").unwrap();
        let prompt = template
            .format(&[(QUESTION, "is <disk> & \"net\" down?")])
            .unwrap();
        assert_eq!(prompt, "Q: is <disk> & \"net\" down?");
    }

    #[test]
    fn single_braces_are_literal() {
        let template = PromptTemplate::new("{json} {{question}}").unwrap();
        assert_eq!(template.placeholders(), vec!["question"]);
        assert_eq!(template.format(&[(QUESTION, "x")]).unwrap(), "{json} x");
    }

    #[test]
    fn repeated_placeholder_listed_once() {
        let template = PromptTemplate::new("{{question}} and again {{question}}").unwrap();
        assert_eq!(template.placeholders(), vec!["question"]);
        assert_eq!(
            template.format(&[(QUESTION, "q")]).unwrap(),
            "q and again q"
        );
    }

    #[test]
    fn malformed_templates_rejected() {
        assert!(PromptTemplate::new("{{question").unwrap_err().is_configuration());
        assert!(
            PromptTemplate::new("{{#each items}}x")
                .unwrap_err()
                .is_configuration()
        );
    }

    #[test]
    fn helpers_and_blocks_rejected() {
        assert!(
            PromptTemplate::new("{{upper question}}")
                .unwrap_err()
                .is_configuration()
        );
        assert!(
            PromptTemplate::new("{{#if context}}{{context}}{{/if}}")
                .unwrap_err()
                .is_configuration()
        );
    }
}
