use indexmap::IndexMap;

use crate::config::ManagerConfig;
use crate::error::Error;
use crate::manager::{
    ComposeManager, DockerImageManager, DockerfileManager, EnvironmentManager, PodManager,
};
use crate::model::Environment;
use crate::recipe_type::RecipeType;

/// One manager per recipe type, all sharing the same config.
pub struct EnvironmentRegistry {
    config: ManagerConfig,
    managers: IndexMap<RecipeType, Box<dyn EnvironmentManager>>,
}

impl EnvironmentRegistry {
    pub fn new(config: ManagerConfig) -> Self {
        let mut managers: IndexMap<RecipeType, Box<dyn EnvironmentManager>> = IndexMap::new();
        managers.insert(
            RecipeType::DockerImage,
            Box::new(DockerImageManager::new(config.clone())),
        );
        managers.insert(
            RecipeType::Dockerfile,
            Box::new(DockerfileManager::new(config.clone())),
        );
        managers.insert(
            RecipeType::Compose,
            Box::new(ComposeManager::new(config.clone())),
        );
        managers.insert(
            RecipeType::Kubernetes,
            Box::new(PodManager::kubernetes(config.clone())),
        );
        managers.insert(
            RecipeType::OpenShift,
            Box::new(PodManager::openshift(config.clone())),
        );
        Self { config, managers }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn get(&self, recipe_type: RecipeType) -> Option<&dyn EnvironmentManager> {
        self.managers.get(&recipe_type).map(|manager| &**manager)
    }

    /// Looks a manager up by its type tag, e.g. `"compose"`.
    pub fn lookup(&self, tag: &str) -> Result<&dyn EnvironmentManager, Error> {
        let recipe_type: RecipeType = tag.parse()?;
        self.get(recipe_type)
            .ok_or_else(|| Error::unknown_recipe_type(tag))
    }

    pub fn for_environment(&self, environment: &Environment) -> Option<&dyn EnvironmentManager> {
        self.get(environment.recipe.recipe_type)
    }

    pub fn recipe_types(&self) -> impl Iterator<Item = RecipeType> + '_ {
        self.managers.keys().copied()
    }
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}
