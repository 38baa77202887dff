use indexmap::IndexMap;
use tracing::debug;

use crate::error::Error;
use crate::manager::EnvironmentRegistry;
use crate::model::{Environment, MachineConfig, Recipe, Stack, WorkspaceConfig};
use crate::parser::dockerfile::{dump_dockerfile, parse_dockerfile};
use crate::parser::dockerimage::{dump_docker_image, parse_docker_image};
use crate::recipe_type::RecipeType;

pub const NEW_STACK_NAME: &str = "new-stack";
pub const NEW_WORKSPACE_NAME: &str = "new-workspace";
pub const DEFAULT_ENVIRONMENT_NAME: &str = "default";
pub const NEW_MACHINE_NAME: &str = "new-machine";

/// Builds a new stack around a single recipe.
pub struct StackBuilder<'a> {
    registry: &'a EnvironmentRegistry,
}

impl<'a> StackBuilder<'a> {
    pub fn new(registry: &'a EnvironmentRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, recipe_type: RecipeType, content: &str) -> Result<Stack, Error> {
        let environment = self.environment(recipe_type, content)?;
        let mut environments = IndexMap::new();
        environments.insert(DEFAULT_ENVIRONMENT_NAME.to_string(), environment);

        Ok(Stack {
            name: NEW_STACK_NAME.to_string(),
            workspace_config: WorkspaceConfig {
                name: NEW_WORKSPACE_NAME.to_string(),
                default_env: DEFAULT_ENVIRONMENT_NAME.to_string(),
                environments,
                commands: Vec::new(),
                projects: Vec::new(),
                extra: IndexMap::new(),
            },
            extra: IndexMap::new(),
        })
    }

    /// Environment for `content`, with one stored config per machine.
    ///
    /// Multi-machine content is kept verbatim once it parses; a Dockerfile is
    /// normalized through its AST and an image reference is trimmed.
    pub fn environment(&self, recipe_type: RecipeType, content: &str) -> Result<Environment, Error> {
        let manager = self
            .registry
            .get(recipe_type)
            .ok_or_else(|| Error::unknown_recipe_type(recipe_type.as_str()))?;
        let content = match recipe_type {
            RecipeType::DockerImage => dump_docker_image(&parse_docker_image(content)?),
            RecipeType::Dockerfile => dump_dockerfile(&parse_dockerfile(content)?),
            _ => {
                manager.check_recipe(content)?;
                content.to_string()
            }
        };

        let mut environment = Environment::new(Recipe::with_content(recipe_type, content));
        if recipe_type.is_single_machine() {
            let mut config = MachineConfig {
                installers: Some(Vec::new()),
                ..MachineConfig::default()
            };
            config.attributes.memory_limit_bytes = Some(manager.config().default_memory_limit);
            environment
                .machines
                .insert(NEW_MACHINE_NAME.to_string(), config);
        } else {
            for machine in manager.get_machines(&environment, None) {
                environment.machines.insert(machine.name, machine.config);
            }
        }
        debug!(%recipe_type, machines = environment.machines.len(), "built stack environment");
        Ok(environment)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::manager::EnvironmentRegistry;
    use crate::recipe_type::RecipeType;
    use crate::stack::StackBuilder;

    #[test]
    fn dockerfile_stack() {
        let registry = EnvironmentRegistry::default();
        let stack = StackBuilder::new(&registry)
            .build(RecipeType::Dockerfile, "FROM repository:tag")
            .expect("stack should build");
        let json = serde_json::to_value(&stack).expect("stack should serialize");

        assert_eq!(json["name"], "new-stack");
        assert_eq!(json["workspaceConfig"]["defaultEnv"], "default");
        let environment = &json["workspaceConfig"]["environments"]["default"];
        assert_eq!(
            environment["recipe"],
            json!({
                "type": "dockerfile",
                "contentType": "text/x-dockerfile",
                "content": "FROM repository:tag\n"
            })
        );
        assert_eq!(
            environment["machines"],
            json!({
                "new-machine": {
                    "attributes": {"memoryLimitBytes": 2147483648u64},
                    "installers": []
                }
            })
        );
    }

    #[test]
    fn compose_stack_echoes_content() {
        let content = "services:\n machine-1:\n  image: repository-1\n machine-2:\n  image: repository-2\n";
        let registry = EnvironmentRegistry::default();
        let stack = StackBuilder::new(&registry)
            .build(RecipeType::Compose, content)
            .expect("stack should build");
        let json = serde_json::to_value(&stack).expect("stack should serialize");
        let environment = &json["workspaceConfig"]["environments"]["default"];

        assert_eq!(
            environment["recipe"],
            json!({"type": "compose", "contentType": "text/x-yaml", "content": content})
        );
        assert_eq!(
            environment["machines"],
            json!({
                "machine-1": {"attributes": {"memoryLimitBytes": 2147483648u64}},
                "machine-2": {"attributes": {"memoryLimitBytes": 2147483648u64}}
            })
        );
    }

    #[test]
    fn docker_image_stack() {
        let registry = EnvironmentRegistry::default();
        let stack = StackBuilder::new(&registry)
            .build(RecipeType::DockerImage, " repository:tag\n")
            .expect("stack should build");
        let environment = &stack.workspace_config.environments["default"];

        assert_eq!(environment.recipe.content.as_deref(), Some("repository:tag"));
        assert_eq!(environment.recipe.content_type.as_deref(), Some(""));
        let names = environment.machines.keys().cloned().collect::<Vec<_>>();
        assert_eq!(names, vec!["new-machine"]);
        assert!(stack.workspace_config.commands.is_empty());
        assert!(stack.workspace_config.projects.is_empty());
    }

    #[test]
    fn kubernetes_stack_takes_limits_from_containers() {
        let content = "kind: List\nitems:\n- apiVersion: v1\n  kind: Pod\n  metadata:\n    name: ws\n  spec:\n    containers:\n    - name: dev\n      image: nginx\n      resources:\n        limits:\n          memory: 1Gi\n";
        let registry = EnvironmentRegistry::default();
        let environment = StackBuilder::new(&registry)
            .environment(RecipeType::Kubernetes, content)
            .expect("environment should build");
        assert_eq!(environment.recipe.content.as_deref(), Some(content));
        assert_eq!(
            environment.machines["ws/dev"].attributes.memory_limit_bytes,
            Some(1073741824)
        );
    }

    #[test]
    fn invalid_content_is_an_error() {
        let registry = EnvironmentRegistry::default();
        let builder = StackBuilder::new(&registry);
        assert!(builder.build(RecipeType::Dockerfile, "RUN true").is_err());
        assert!(builder.build(RecipeType::Compose, "services: {}\nother: [").is_err());
        assert!(builder.build(RecipeType::DockerImage, "a b").is_err());
    }
}
