use crate::recipe::Recipe;
use crate::validation::rules::{
    BuilderInstallsDependenciesRule, EntrypointDeclaredRule, NoInstallerInRuntimeRule,
    PathPrecedenceRule, RequiredFieldsRule, SingleInstallChannelRule, ValidationRule,
    WorkdirParityRule,
};
use anyhow::Result;

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    /// Stops at the first violated rule
    pub fn validate(&self, recipe: &Recipe) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(recipe) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }

    /// Runs every rule and collects all violations
    pub fn violations(&self, recipe: &Recipe) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.validate(recipe)
                    .err()
                    .map(|e| format!("[{}] {}", rule.name(), e))
            })
            .collect()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(WorkdirParityRule),
                Box::new(BuilderInstallsDependenciesRule),
                Box::new(NoInstallerInRuntimeRule),
                Box::new(SingleInstallChannelRule),
                Box::new(PathPrecedenceRule),
                Box::new(EntrypointDeclaredRule),
            ],
        }
    }
}
