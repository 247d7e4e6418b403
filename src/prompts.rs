use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{AnalysisError, Result};

/// Looks up and renders a named prompt template. Template loading, caching,
/// and the template language itself belong to the embedding application; this
/// crate only needs the rendered string for a given agent.
#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn render(&self, name: &str, vars: &HashMap<String, String>) -> Result<String>;
}

/// A fixed, in-memory prompt set. Useful for tests and for embedders who keep
/// prompts as plain constants rather than a template store.
#[derive(Debug, Default, Clone)]
pub struct StaticPromptProvider {
    templates: HashMap<String, String>,
}

impl StaticPromptProvider {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    pub fn with(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(name.into(), template.into());
        self
    }
}

#[async_trait]
impl PromptProvider for StaticPromptProvider {
    async fn render(&self, name: &str, vars: &HashMap<String, String>) -> Result<String> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| AnalysisError::Prompt(format!("no template registered for '{name}'")))?;

        let mut rendered = template.clone();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
        }
        if rendered.contains("{{") {
            return Err(AnalysisError::Prompt(format!(
                "template '{name}' has unresolved variables after render"
            )));
        }
        Ok(rendered)
    }
}
