use tracing::error;

use crate::config::ManagerConfig;
use crate::error::Error;
use crate::manager::{Capabilities, EnvironmentManager, base_machines, fold_machine_configs, machine_entry};
use crate::model::{Environment, Machine, MachineRecipe, MachineSource, Runtime};
use crate::parser::dockerimage::{dump_docker_image, parse_docker_image};
use crate::recipe_type::RecipeType;

/// Recipe is a bare `REPOSITORY[:TAG]` reference describing one machine.
#[derive(Debug, Clone)]
pub struct DockerImageManager {
    config: ManagerConfig,
}

impl DockerImageManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self { config }
    }

    fn machine_name(&self, environment: &Environment) -> String {
        environment
            .machines
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| self.config.default_machine_name.clone())
    }
}

fn reference(environment: &Environment) -> Option<&str> {
    environment
        .recipe
        .content()
        .or(environment.recipe.location.as_deref())
}

impl EnvironmentManager for DockerImageManager {
    fn recipe_type(&self) -> RecipeType {
        RecipeType::DockerImage
    }

    fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn check_recipe(&self, content: &str) -> Result<(), Error> {
        parse_docker_image(content).map(|_| ())
    }

    fn unresolved_machines(&self, environment: &Environment) -> Vec<String> {
        environment.machines.keys().skip(1).cloned().collect()
    }

    fn get_machines(&self, environment: &Environment, runtime: Option<&Runtime>) -> Vec<Machine> {
        let mut machines = base_machines(environment, runtime);
        let Some(reference) = reference(environment) else {
            return machines;
        };
        let image = match parse_docker_image(reference) {
            Ok(image) => image,
            Err(err) => {
                error!(error = %err, "cannot parse recipe");
                return machines;
            }
        };

        let name = self.machine_name(environment);
        let machine = machine_entry(&mut machines, &name);
        machine.recipe = Some(MachineRecipe::DockerImage(image));
        if self.get_memory_limit(machine).is_none() {
            self.set_memory_limit(machine, self.config.default_memory_limit);
        }
        machines
    }

    fn get_environment(&self, environment: &Environment, machines: &[Machine]) -> Environment {
        let mut updated = fold_machine_configs(environment, machines, self.config.default_memory_limit);
        let image = machines.iter().find_map(|machine| match &machine.recipe {
            Some(MachineRecipe::DockerImage(image)) => Some(dump_docker_image(image)),
            _ => None,
        });
        if let Some(image) = image {
            if updated.recipe.content.is_none() && updated.recipe.location.is_some() {
                updated.recipe.location = Some(image);
            } else {
                updated.recipe.content = Some(image);
            }
        }
        updated
    }

    fn get_source(&self, machine: &Machine) -> Option<MachineSource> {
        match &machine.recipe {
            Some(MachineRecipe::DockerImage(image)) => {
                Some(MachineSource::Image(dump_docker_image(image)))
            }
            _ => None,
        }
    }

    fn set_source(&self, machine: &mut Machine, image: &str) {
        match parse_docker_image(image) {
            Ok(image) => machine.recipe = Some(MachineRecipe::DockerImage(image)),
            Err(err) => error!(machine = %machine.name, error = %err, "cannot set machine source"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ManagerConfig;
    use crate::manager::{DockerImageManager, EnvironmentManager};
    use crate::model::{Environment, MachineSource, Recipe};
    use crate::recipe_type::RecipeType;

    fn environment(content: &str) -> Environment {
        Environment::new(Recipe::with_content(RecipeType::DockerImage, content))
    }

    #[test]
    fn derives_single_machine_with_default_limit() {
        let manager = DockerImageManager::new(ManagerConfig::default());
        let machines = manager.get_machines(&environment("repository:tag"), None);
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].name, "dev-machine");
        assert_eq!(manager.get_memory_limit(&machines[0]), Some(2147483648));
        assert_eq!(
            manager.get_source(&machines[0]),
            Some(MachineSource::Image("repository:tag".to_string()))
        );
    }

    #[test]
    fn set_source_rewrites_whole_recipe() {
        let manager = DockerImageManager::new(ManagerConfig::default());
        let environment = environment("repository:tag");
        let mut machines = manager.get_machines(&environment, None);
        manager.set_source(&mut machines[0], "eclipse/ubuntu_jdk8:latest");

        let updated = manager.get_environment(&environment, &machines);
        assert_eq!(
            updated.recipe.content.as_deref(),
            Some("eclipse/ubuntu_jdk8:latest")
        );
        assert_eq!(
            updated.machines["dev-machine"].attributes.memory_limit_bytes,
            Some(2147483648)
        );
    }

    #[test]
    fn structural_edits_are_unsupported() {
        let manager = DockerImageManager::new(ManagerConfig::default());
        let environment = environment("repository:tag");
        let machines = manager.get_machines(&environment, None);

        assert_eq!(manager.rename_machine(&environment, "dev-machine", "x"), environment);
        assert_eq!(manager.delete_machine(&environment, "dev-machine"), environment);
        assert_eq!(manager.add_machine(&environment, &machines[0]), environment);
        assert!(manager.create_machine(&environment, None).is_none());
        assert!(!manager.capabilities().add_machine);
    }

    #[test]
    fn unparsable_reference_degrades_to_stored_machines() {
        let manager = DockerImageManager::new(ManagerConfig::default());
        let machines = manager.get_machines(&environment("not an image"), None);
        assert!(machines.is_empty());
    }
}
