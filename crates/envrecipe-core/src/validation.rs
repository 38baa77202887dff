//! Stack validation.
//!
//! Problems are collected as human-readable messages instead of stopping at
//! the first one. Only input that is not JSON at all is an error.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Error;
use crate::manager::EnvironmentRegistry;
use crate::model::Environment;
use crate::recipe_type::RecipeType;

const STACK_KEYS: [&str; 2] = ["name", "workspaceConfig"];
const WORKSPACE_KEYS: [&str; 3] = ["name", "defaultEnv", "environments"];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Validation {
    pub errors: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

pub struct Validator<'a> {
    registry: &'a EnvironmentRegistry,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a EnvironmentRegistry) -> Self {
        Self { registry }
    }

    pub fn validate_stack_json(&self, input: &str) -> Result<Validation, Error> {
        let stack: Value = serde_json::from_str(input)?;
        Ok(self.validate_stack(&stack))
    }

    pub fn validate_stack(&self, stack: &Value) -> Validation {
        let mut validation = Validation::default();
        let Some(stack) = stack.as_object() else {
            validation.push("stack must be a JSON object");
            return validation;
        };
        for key in STACK_KEYS {
            if !stack.contains_key(key) {
                validation.push(format!("stack is missing mandatory key '{key}'"));
            }
        }

        match stack.get("workspaceConfig") {
            Some(Value::Object(workspace)) => self.validate_workspace(workspace, &mut validation),
            Some(_) => validation.push("'workspaceConfig' must be an object"),
            None => {}
        }
        debug!(errors = validation.errors.len(), "validated stack");
        validation
    }

    fn validate_workspace(&self, workspace: &Map<String, Value>, validation: &mut Validation) {
        for key in WORKSPACE_KEYS {
            if !workspace.contains_key(key) {
                validation.push(format!("workspace config is missing mandatory key '{key}'"));
            }
        }

        let environments = match workspace.get("environments") {
            Some(Value::Object(environments)) => environments,
            Some(_) => {
                validation.push("'environments' must be an object");
                return;
            }
            None => return,
        };

        if let Some(default_env) = workspace.get("defaultEnv") {
            match default_env.as_str() {
                Some(name) if environments.contains_key(name) => {}
                Some(name) => validation.push(format!(
                    "default environment '{name}' is not defined in 'environments'"
                )),
                None => validation.push("'defaultEnv' must be a string"),
            }
        }

        for (name, environment) in environments {
            self.validate_environment(name, environment, validation);
        }
    }

    fn validate_environment(&self, name: &str, environment: &Value, validation: &mut Validation) {
        let Some(recipe) = environment.get("recipe").and_then(Value::as_object) else {
            validation.push(format!("environment '{name}' has no recipe"));
            return;
        };
        let Some(tag) = recipe.get("type").and_then(Value::as_str) else {
            validation.push(format!("environment '{name}': recipe has no type"));
            return;
        };
        let Ok(recipe_type) = tag.parse::<RecipeType>() else {
            validation.push(format!("environment '{name}': unknown recipe type '{tag}'"));
            return;
        };
        let has = |key: &str| recipe.get(key).and_then(Value::as_str).is_some_and(|v| !v.trim().is_empty());
        if !has("content") && !has("location") {
            validation.push(format!(
                "environment '{name}': recipe must have content or location"
            ));
            return;
        }

        let environment: Environment = match serde_json::from_value(environment.clone()) {
            Ok(environment) => environment,
            Err(err) => {
                validation.push(format!("environment '{name}': {err}"));
                return;
            }
        };
        let Some(manager) = self.registry.get(recipe_type) else {
            validation.push(format!("environment '{name}': unsupported recipe type '{tag}'"));
            return;
        };

        if let Some(content) = environment.recipe.content() {
            if let Err(err) = manager.check_recipe(content) {
                validation.push(format!("environment '{name}': {err}"));
                return;
            }
            for machine in manager.unresolved_machines(&environment) {
                validation.push(format!(
                    "environment '{name}': machine '{machine}' is not declared in the recipe"
                ));
            }
        }

        let dev_machines = manager
            .get_machines(&environment, None)
            .into_iter()
            .filter(|machine| manager.is_dev(machine))
            .map(|machine| machine.name)
            .collect::<Vec<_>>();
        let agent = &manager.config().workspace_agent;
        match dev_machines.len() {
            1 => {}
            0 => validation.push(format!(
                "environment '{name}' has no dev machine: exactly one machine must include the '{agent}' installer"
            )),
            count => validation.push(format!(
                "environment '{name}' has {count} dev machines ({}): exactly one machine must include the '{agent}' installer",
                dev_machines.join(", ")
            )),
        }
    }
}

pub fn validate_stack_json(registry: &EnvironmentRegistry, input: &str) -> Result<Validation, Error> {
    Validator::new(registry).validate_stack_json(input)
}
