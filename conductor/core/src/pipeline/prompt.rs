//! Domain prompt templates

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder replaced with the user's query
pub const QUERY_PLACEHOLDER: &str = "{query}";
/// Placeholder replaced with serialized retrieval context
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Prompt text with `{query}` and optional `{context}` placeholders
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    /// Wrap template text
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Raw template text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the template places context itself
    #[must_use]
    pub fn has_context_slot(&self) -> bool {
        self.0.contains(CONTEXT_PLACEHOLDER)
    }

    /// Reject templates that would drop the query
    ///
    /// # Errors
    ///
    /// Returns a description of the problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.0.trim().is_empty() {
            return Err("template is empty".to_string());
        }
        if !self.0.contains(QUERY_PLACEHOLDER) {
            return Err(format!("template has no {QUERY_PLACEHOLDER} placeholder"));
        }
        Ok(())
    }

    /// Substitute placeholders in a single pass
    ///
    /// Substituted text is never rescanned, so a query containing `{context}`
    /// stays literal. Without a `{context}` slot, non-empty context is prepended.
    #[must_use]
    pub fn render(&self, query: &str, context: &str) -> String {
        let vars = [(QUERY_PLACEHOLDER, query), (CONTEXT_PLACEHOLDER, context)];
        let body = substitute(&self.0, &vars);

        if self.has_context_slot() || context.is_empty() {
            body
        } else {
            format!("Context:\n{context}\n\n{body}")
        }
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PromptTemplate {
    fn from(template: &str) -> Self {
        Self::new(template)
    }
}

fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some((name, value)) = vars.iter().find(|(name, _)| tail.starts_with(name)) {
            out.push_str(value);
            rest = &tail[name.len()..];
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
