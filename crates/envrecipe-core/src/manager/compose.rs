use indexmap::IndexMap;
use serde_yaml::Value;
use tracing::{debug, error, warn};

use crate::config::ManagerConfig;
use crate::error::Error;
use crate::manager::{
    Capabilities, EnvironmentManager, base_machines, fold_machine_configs, machine_entry,
    rename_config_key,
};
use crate::model::{Environment, Machine, MachineRecipe, MachineSource, Runtime};
use crate::parser::cache::ParseCache;
use crate::parser::compose::{ComposeParser, ComposeRecipe, ComposeService};
use crate::recipe_type::RecipeType;

/// Recipe is a compose document; each service is a machine of the same name.
#[derive(Debug)]
pub struct ComposeManager {
    config: ManagerConfig,
    parser: ComposeParser,
}

impl ComposeManager {
    pub fn new(config: ManagerConfig) -> Self {
        let parser = ComposeParser::new(ParseCache::new(config.parse_cache_capacity));
        Self { config, parser }
    }

    pub fn parser(&self) -> &ComposeParser {
        &self.parser
    }

    fn parse_recipe(&self, environment: &Environment) -> Option<ComposeRecipe> {
        let content = environment.recipe.content()?;
        match self.parser.parse(content) {
            Ok(recipe) => Some(recipe),
            Err(err) => {
                error!(error = %err, "cannot parse recipe");
                None
            }
        }
    }

    fn with_recipe(&self, environment: &Environment, recipe: &ComposeRecipe) -> Option<Environment> {
        match self.parser.dump(recipe) {
            Ok(content) => {
                let mut updated = environment.clone();
                updated.recipe.content = Some(content);
                Some(updated)
            }
            Err(err) => {
                error!(error = %err, "cannot stringify recipe");
                None
            }
        }
    }
}

/// `links` entries may carry an alias as `service:alias`.
fn link_target(link: &str) -> &str {
    link.split_once(':').map_or(link, |(service, _)| service)
}

fn rename_references(service: &mut ComposeService, old: &str, new: &str) {
    if let Some(depends_on) = &mut service.depends_on {
        depends_on.rename(old, new);
    }
    if let Some(links) = &mut service.links {
        for link in links.iter_mut() {
            if link_target(link) == old {
                *link = match link.split_once(':') {
                    Some((_, alias)) => format!("{new}:{alias}"),
                    None => new.to_string(),
                };
            }
        }
    }
}

fn drop_references(service: &mut ComposeService, name: &str) {
    if let Some(depends_on) = &mut service.depends_on {
        depends_on.remove(name);
        if depends_on.is_empty() {
            service.depends_on = None;
        }
    }
    if let Some(links) = &mut service.links {
        links.retain(|link| link_target(link) != name);
        if links.is_empty() {
            service.links = None;
        }
    }
}

impl EnvironmentManager for ComposeManager {
    fn recipe_type(&self) -> RecipeType {
        RecipeType::Compose
    }

    fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn check_recipe(&self, content: &str) -> Result<(), Error> {
        self.parser.parse(content).map(|_| ())
    }

    fn unresolved_machines(&self, environment: &Environment) -> Vec<String> {
        let services = self
            .parse_recipe(environment)
            .map(|recipe| recipe.services)
            .unwrap_or_default();
        environment
            .machines
            .keys()
            .filter(|name| !services.contains_key(*name))
            .cloned()
            .collect()
    }

    fn get_machines(&self, environment: &Environment, runtime: Option<&Runtime>) -> Vec<Machine> {
        let mut machines = base_machines(environment, runtime);
        let Some(recipe) = self.parse_recipe(environment) else {
            return machines;
        };

        for (name, service) in recipe.services {
            let machine = machine_entry(&mut machines, &name);
            machine.recipe = Some(MachineRecipe::Compose(service));
            // Only the attribute is pinned; the service keeps its own
            // `mem_limit` spelling until the limit is set explicitly.
            let limit = self
                .get_memory_limit(machine)
                .unwrap_or(self.config.default_memory_limit);
            machine.config.attributes.memory_limit_bytes = Some(limit);
        }
        machines
    }

    fn get_environment(&self, environment: &Environment, machines: &[Machine]) -> Environment {
        let updated = fold_machine_configs(environment, machines, self.config.default_memory_limit);
        let Some(mut recipe) = self.parse_recipe(&updated) else {
            return updated;
        };
        for machine in machines {
            if let Some(service) = machine.compose_service() {
                recipe.services.insert(machine.name.clone(), service.clone());
            }
        }
        self.with_recipe(&updated, &recipe).unwrap_or(updated)
    }

    fn get_source(&self, machine: &Machine) -> Option<MachineSource> {
        let service = machine.compose_service()?;
        if let Some(image) = &service.image {
            return Some(MachineSource::Image(image.clone()));
        }
        match service.build.as_ref()? {
            Value::String(context) => Some(MachineSource::Build {
                context: Some(context.clone()),
                dockerfile: None,
            }),
            build => Some(MachineSource::Build {
                context: build.get("context").and_then(Value::as_str).map(str::to_string),
                dockerfile: build
                    .get("dockerfile")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
        }
    }

    /// Points the service at `image`, replacing any build section.
    fn set_source(&self, machine: &mut Machine, image: &str) {
        let name = machine.name.clone();
        match machine.compose_service_mut() {
            Some(service) => {
                service.image = Some(image.to_string());
                service.build = None;
            }
            None => error!(machine = %name, "cannot set machine source: machine has no recipe"),
        }
    }

    fn get_memory_limit(&self, machine: &Machine) -> Option<u64> {
        machine
            .config
            .attributes
            .memory_limit_bytes
            .or_else(|| machine.compose_service()?.mem_limit_bytes())
    }

    fn set_memory_limit(&self, machine: &mut Machine, bytes: u64) {
        machine.config.attributes.memory_limit_bytes = Some(bytes);
        if let Some(service) = machine.compose_service_mut()
            && service.mem_limit.is_some()
        {
            service.mem_limit = Some(Value::from(bytes));
        }
    }

    fn get_env_variables(&self, machine: &Machine) -> IndexMap<String, String> {
        machine
            .compose_service()
            .map(ComposeService::environment_map)
            .unwrap_or_default()
    }

    fn set_env_variables(&self, machine: &mut Machine, env: IndexMap<String, String>) {
        match machine.compose_service_mut() {
            Some(service) => service.set_environment_map(&env),
            None => warn!(machine = %machine.name, "cannot set environment variables: machine has no recipe"),
        }
    }

    fn create_machine(&self, environment: &Environment, image: Option<&str>) -> Option<Machine> {
        let name = self.get_unique_machine_name(environment);
        let image = image.unwrap_or(self.config.default_machine_image.as_str());
        let mut machine = Machine::with_recipe(name, MachineRecipe::Compose(ComposeService::from_image(image)));
        self.set_memory_limit(&mut machine, self.config.default_memory_limit);
        Some(machine)
    }

    fn add_machine(&self, environment: &Environment, machine: &Machine) -> Environment {
        let Some(service) = machine.compose_service() else {
            error!(machine = %machine.name, "cannot add machine: machine has no compose recipe");
            return environment.clone();
        };
        let Some(mut recipe) = self.parse_recipe(environment) else {
            error!(machine = %machine.name, "cannot add machine");
            return environment.clone();
        };
        if recipe.services.contains_key(&machine.name) {
            error!(machine = %machine.name, "cannot add machine: service already exists");
            return environment.clone();
        }

        recipe.services.insert(machine.name.clone(), service.clone());
        let Some(mut updated) = self.with_recipe(environment, &recipe) else {
            return environment.clone();
        };
        updated
            .machines
            .insert(machine.name.clone(), machine.config.clone());
        debug!(machine = %machine.name, "added compose service");
        updated
    }

    /// Renames the service and every `depends_on` and `links` reference to it.
    fn rename_machine(&self, environment: &Environment, old_name: &str, new_name: &str) -> Environment {
        let Some(recipe) = self.parse_recipe(environment) else {
            error!(machine = old_name, "cannot rename machine");
            return environment.clone();
        };
        if !recipe.services.contains_key(old_name) {
            error!(machine = old_name, "cannot rename machine: unknown service");
            return environment.clone();
        }
        if old_name != new_name && recipe.services.contains_key(new_name) {
            error!(machine = old_name, new_name, "cannot rename machine: name already taken");
            return environment.clone();
        }

        let services = recipe
            .services
            .into_iter()
            .map(|(name, mut service)| {
                rename_references(&mut service, old_name, new_name);
                let name = if name == old_name { new_name.to_string() } else { name };
                (name, service)
            })
            .collect::<IndexMap<_, _>>();
        let recipe = ComposeRecipe { services, ..recipe };

        let Some(mut updated) = self.with_recipe(environment, &recipe) else {
            return environment.clone();
        };
        rename_config_key(&mut updated.machines, old_name, new_name);
        updated
    }

    fn delete_machine(&self, environment: &Environment, name: &str) -> Environment {
        let Some(mut recipe) = self.parse_recipe(environment) else {
            error!(machine = name, "cannot delete machine");
            return environment.clone();
        };
        if recipe.services.shift_remove(name).is_none() {
            warn!(machine = name, "deleting machine without a compose service");
        }
        for service in recipe.services.values_mut() {
            drop_references(service, name);
        }

        let Some(mut updated) = self.with_recipe(environment, &recipe) else {
            return environment.clone();
        };
        updated.machines.shift_remove(name);
        updated
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use crate::config::{GIB, ManagerConfig};
    use crate::manager::{ComposeManager, EnvironmentManager};
    use crate::model::{Environment, MachineConfig, MachineSource, Recipe};
    use crate::parser::compose::{ComposeParser, DependsOn};
    use crate::recipe_type::RecipeType;

    const RECIPE: &str = "services:
  db:
    image: mysql
    mem_limit: 1073741824
  web:
    build:
      context: .
      dockerfile: Dockerfile.web
    depends_on:
    - db
    links:
    - db:database
    environment:
    - MODE=dev
";

    fn environment() -> Environment {
        Environment::new(Recipe::with_content(RecipeType::Compose, RECIPE))
    }

    fn manager() -> ComposeManager {
        ComposeManager::new(ManagerConfig::default())
    }

    #[test]
    fn derives_one_machine_per_service() {
        let manager = manager();
        let machines = manager.get_machines(&environment(), None);
        let names = machines.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["db", "web"]);
        assert_eq!(manager.get_memory_limit(&machines[0]), Some(GIB));
        assert_eq!(manager.get_memory_limit(&machines[1]), Some(2 * GIB));
        assert_eq!(
            manager.get_source(&machines[1]),
            Some(MachineSource::Build {
                context: Some(".".to_string()),
                dockerfile: Some("Dockerfile.web".to_string()),
            })
        );
    }

    #[test]
    fn get_environment_then_get_machines_is_identity() {
        let manager = manager();
        let environment = environment();
        let machines = manager.get_machines(&environment, None);
        let updated = manager.get_environment(&environment, &machines);
        assert_eq!(manager.get_machines(&updated, None), machines);
    }

    #[test]
    fn identity_holds_without_cache() {
        let manager = ComposeManager::new(ManagerConfig {
            parse_cache_capacity: 0,
            ..ManagerConfig::default()
        });
        let environment = environment();
        let machines = manager.get_machines(&environment, None);
        let updated = manager.get_environment(&environment, &machines);
        assert_eq!(manager.get_machines(&updated, None), machines);
        assert!(manager.parser().cache().is_empty());
    }

    #[test]
    fn attribute_limit_wins_and_writes_through() {
        let manager = manager();
        let mut environment = environment();
        let mut config = MachineConfig::default();
        config.attributes.memory_limit_bytes = Some(512 * 1024 * 1024);
        environment.machines.insert("db".to_string(), config);

        let mut machines = manager.get_machines(&environment, None);
        assert_eq!(manager.get_memory_limit(&machines[0]), Some(512 * 1024 * 1024));

        manager.set_memory_limit(&mut machines[0], 3 * GIB);
        manager.set_memory_limit(&mut machines[1], GIB);
        let updated = manager.get_environment(&environment, &machines);
        let recipe = ComposeParser::default()
            .parse(updated.recipe.content.as_deref().unwrap_or_default())
            .expect("updated recipe should parse");
        assert_eq!(recipe.services["db"].mem_limit_bytes(), Some(3 * GIB));
        assert_eq!(recipe.services["web"].mem_limit, None);
        assert_eq!(updated.machines["web"].attributes.memory_limit_bytes, Some(GIB));
    }

    #[test]
    fn rename_fixes_dependants() {
        let manager = manager();
        let mut environment = environment();
        environment
            .machines
            .insert("db".to_string(), MachineConfig::default());

        let renamed = manager.rename_machine(&environment, "db", "mysql");
        let recipe = ComposeParser::default()
            .parse(renamed.recipe.content.as_deref().unwrap_or_default())
            .expect("renamed recipe should parse");
        let names = recipe.services.keys().cloned().collect::<Vec<_>>();
        assert_eq!(names, vec!["mysql", "web"]);
        assert_eq!(
            recipe.services["web"].depends_on,
            Some(DependsOn::List(vec!["mysql".to_string()]))
        );
        assert_eq!(recipe.services["web"].links, Some(vec!["mysql:database".to_string()]));
        assert!(renamed.machines.contains_key("mysql"));
        assert!(!renamed.machines.contains_key("db"));

        assert_eq!(manager.rename_machine(&renamed, "web", "mysql"), renamed);
    }

    #[test]
    fn delete_drops_service_and_references() {
        let manager = manager();
        let deleted = manager.delete_machine(&environment(), "db");
        let recipe = ComposeParser::default()
            .parse(deleted.recipe.content.as_deref().unwrap_or_default())
            .expect("recipe should parse");
        assert!(!recipe.services.contains_key("db"));
        assert_eq!(recipe.services["web"].depends_on, None);
        assert_eq!(recipe.services["web"].links, None);
    }

    #[test]
    fn create_and_add_machine() {
        let manager = manager();
        let environment = environment();
        assert_eq!(manager.get_unique_machine_name(&environment), "machine1");

        let machine = manager
            .create_machine(&environment, Some("redis"))
            .expect("compose supports new machines");
        assert_eq!(machine.name, "machine1");
        assert_eq!(manager.get_memory_limit(&machine), Some(2 * GIB));

        let updated = manager.add_machine(&environment, &machine);
        let machines = manager.get_machines(&updated, None);
        let added = machines
            .iter()
            .find(|m| m.name == "machine1")
            .expect("added machine should be listed");
        assert_eq!(
            manager.get_source(added),
            Some(MachineSource::Image("redis".to_string()))
        );
        assert_eq!(manager.get_unique_machine_name(&updated), "machine2");

        assert_eq!(manager.add_machine(&updated, &machine), updated);
    }

    #[test]
    fn env_variables_live_in_the_service() {
        let manager = manager();
        let environment = environment();
        let mut machines = manager.get_machines(&environment, None);
        assert_eq!(
            manager.get_env_variables(&machines[1]).get("MODE").map(String::as_str),
            Some("dev")
        );

        let mut env = IndexMap::new();
        env.insert("MODE".to_string(), "prod".to_string());
        manager.set_env_variables(&mut machines[1], env.clone());
        let updated = manager.get_environment(&environment, &machines);
        let reread = manager.get_machines(&updated, None);
        assert_eq!(manager.get_env_variables(&reread[1]), env);
        assert!(reread[1].config.env.is_empty());
    }

    #[test]
    fn unparsable_recipe_degrades() {
        let manager = manager();
        let environment = Environment::new(Recipe::with_content(RecipeType::Compose, "services: [\n"));
        assert!(manager.get_machines(&environment, None).is_empty());
        assert_eq!(manager.delete_machine(&environment, "db"), environment);
    }

    #[test]
    fn unit_suffixed_limit_survives_a_write_back() {
        let manager = manager();
        let environment = Environment::new(Recipe::with_content(
            RecipeType::Compose,
            "services:\n  db:\n    image: mysql\n    mem_limit: 1g\n",
        ));
        let machines = manager.get_machines(&environment, None);
        assert_eq!(manager.get_memory_limit(&machines[0]), Some(GIB));

        let updated = manager.get_environment(&environment, &machines);
        let recipe = ComposeParser::default()
            .parse(updated.recipe.content.as_deref().unwrap_or_default())
            .expect("updated recipe should parse");
        assert_eq!(
            recipe.services["db"].mem_limit,
            Some(serde_yaml::Value::String("1g".to_string()))
        );
        assert_eq!(updated.machines["db"].attributes.memory_limit_bytes, Some(GIB));
        assert_eq!(manager.get_machines(&updated, None), machines);
    }

    #[test]
    fn mapping_dependencies_follow_rename_and_delete() {
        let manager = manager();
        let environment = Environment::new(Recipe::with_content(
            RecipeType::Compose,
            "services:\n  db:\n    image: mysql\n  cache:\n    image: redis\n  web:\n    image: app\n    depends_on:\n      db:\n        condition: service_healthy\n      cache:\n        condition: service_started\n",
        ));
        let parse = |environment: &Environment| {
            ComposeParser::default()
                .parse(environment.recipe.content.as_deref().unwrap_or_default())
                .expect("recipe should parse")
        };

        let renamed = manager.rename_machine(&environment, "db", "mysql");
        let recipe = parse(&renamed);
        let Some(DependsOn::Map(entries)) = &recipe.services["web"].depends_on else {
            panic!("depends_on should stay a mapping");
        };
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["mysql", "cache"]);
        assert_eq!(
            entries["mysql"]["condition"],
            serde_yaml::Value::String("service_healthy".to_string())
        );

        let deleted = manager.delete_machine(&renamed, "mysql");
        let deleted = manager.delete_machine(&deleted, "cache");
        assert_eq!(parse(&deleted).services["web"].depends_on, None);
    }
}
