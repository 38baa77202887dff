use indexmap::IndexMap;
use tracing::{error, warn};

use crate::config::ManagerConfig;
use crate::error::Error;
use crate::manager::{
    Capabilities, EnvironmentManager, base_machines, fold_machine_configs, machine_entry,
    rename_config_key,
};
use crate::model::{Environment, Machine, MachineRecipe, MachineSource, Runtime};
use crate::parser::dockerfile::{check_grammar, dump_dockerfile, parse_dockerfile};
use crate::recipe_type::RecipeType;

/// Recipe is a Dockerfile building the environment's only machine.
#[derive(Debug, Clone)]
pub struct DockerfileManager {
    config: ManagerConfig,
}

impl DockerfileManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self { config }
    }
}

impl EnvironmentManager for DockerfileManager {
    fn recipe_type(&self) -> RecipeType {
        RecipeType::Dockerfile
    }

    fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            add_machine: false,
            ..Capabilities::ALL
        }
    }

    fn check_recipe(&self, content: &str) -> Result<(), Error> {
        let dockerfile = parse_dockerfile(content)?;
        check_grammar(content, &dockerfile)
    }

    fn unresolved_machines(&self, environment: &Environment) -> Vec<String> {
        environment.machines.keys().skip(1).cloned().collect()
    }

    fn get_machines(&self, environment: &Environment, runtime: Option<&Runtime>) -> Vec<Machine> {
        let mut machines = base_machines(environment, runtime);
        let Some(content) = environment.recipe.content() else {
            return machines;
        };
        let dockerfile = match parse_dockerfile(content) {
            Ok(dockerfile) => dockerfile,
            Err(err) => {
                error!(error = %err, "cannot parse recipe");
                return machines;
            }
        };

        let name = environment
            .machines
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| self.config.default_machine_name.clone());
        let machine = machine_entry(&mut machines, &name);
        machine.recipe = Some(MachineRecipe::Dockerfile(dockerfile));
        if self.get_memory_limit(machine).is_none() {
            self.set_memory_limit(machine, self.config.default_memory_limit);
        }
        machines
    }

    fn get_environment(&self, environment: &Environment, machines: &[Machine]) -> Environment {
        let mut updated = fold_machine_configs(environment, machines, self.config.default_memory_limit);
        if let Some(dockerfile) = machines.iter().find_map(Machine::dockerfile) {
            updated.recipe.content = Some(dump_dockerfile(dockerfile));
        }
        updated
    }

    fn get_source(&self, machine: &Machine) -> Option<MachineSource> {
        machine
            .dockerfile()?
            .from_image()
            .map(|image| MachineSource::Image(image.to_string()))
    }

    fn set_source(&self, machine: &mut Machine, image: &str) {
        let name = machine.name.clone();
        match machine.dockerfile_mut() {
            Some(dockerfile) => {
                if !dockerfile.set_from_image(image) {
                    error!(machine = %name, "cannot set machine source: recipe has no FROM instruction");
                }
            }
            None => error!(machine = %name, "cannot set machine source: machine has no recipe"),
        }
    }

    fn get_env_variables(&self, machine: &Machine) -> IndexMap<String, String> {
        machine
            .dockerfile()
            .map(|dockerfile| dockerfile.env_variables())
            .unwrap_or_default()
    }

    fn set_env_variables(&self, machine: &mut Machine, env: IndexMap<String, String>) {
        match machine.dockerfile_mut() {
            Some(dockerfile) => dockerfile.set_env_variables(&env),
            None => warn!(machine = %machine.name, "cannot set environment variables: machine has no recipe"),
        }
    }

    /// The recipe does not name its machine, so only the stored config moves.
    fn rename_machine(&self, environment: &Environment, old_name: &str, new_name: &str) -> Environment {
        if !environment.machines.contains_key(old_name) {
            error!(machine = old_name, "cannot rename machine: unknown machine");
            return environment.clone();
        }
        let mut updated = environment.clone();
        rename_config_key(&mut updated.machines, old_name, new_name);
        updated
    }

    fn delete_machine(&self, environment: &Environment, name: &str) -> Environment {
        let mut updated = environment.clone();
        updated.machines.shift_remove(name);
        updated
    }
}
