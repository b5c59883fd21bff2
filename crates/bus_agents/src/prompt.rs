//! Prompt templates with `{{variable}}` placeholders.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{AgentError, AgentResult};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// A prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in placeholder_pattern().captures_iter(&self.source) {
            let name = &caps[1];
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Substitute every placeholder.
    ///
    /// Fails with [`AgentError::Prompt`] naming the first placeholder that
    /// has no value.
    pub fn render(&self, variables: &HashMap<String, String>) -> AgentResult<String> {
        if let Some(missing) = self
            .variables()
            .into_iter()
            .find(|name| !variables.contains_key(name))
        {
            return Err(AgentError::Prompt(format!(
                "missing template variable '{}'",
                missing
            )));
        }

        let rendered = placeholder_pattern().replace_all(&self.source, |caps: &Captures| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

impl From<&str> for PromptTemplate {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}
