//! Prompt templates for the completion service.

use anyhow::Result;
use minijinja::{Environment, context};

const ANALYSIS_TEMPLATE: &str = include_str!("prompts/analysis.md");
const GENERATION_TEMPLATE: &str = include_str!("prompts/generation.md");

pub const ANALYSIS_SYSTEM: &str =
    "You are a senior software engineer who breaks development tasks down into requirements.";
pub const GENERATION_SYSTEM: &str =
    "You are a senior software engineer who writes high-quality code from task descriptions.";

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("analysis", ANALYSIS_TEMPLATE)
            .expect("analysis template should be valid");
        env.add_template("generation", GENERATION_TEMPLATE)
            .expect("generation template should be valid");
        Self { env }
    }

    pub fn render_analysis(&self, description: &str) -> Result<String> {
        let template = self.env.get_template("analysis")?;
        Ok(template.render(context! {
            description => description.trim(),
        })?)
    }

    pub fn render_generation(&self, description: &str, project_context: Option<&str>) -> Result<String> {
        let template = self.env.get_template("generation")?;
        Ok(template.render(context! {
            description => description.trim(),
            context => project_context.map(str::trim).filter(|s| !s.is_empty()),
        })?)
    }
}
