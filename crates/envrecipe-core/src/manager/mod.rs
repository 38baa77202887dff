//! Environment managers.
//!
//! One manager per recipe type translates between an [`Environment`] and the
//! editable [`Machine`] list. Every operation takes its input by reference and
//! returns a new value; a recipe that cannot be parsed or written makes the
//! operation log an error and hand back its input unchanged.

pub mod compose;
pub mod docker_image;
pub mod dockerfile;
pub mod kubernetes;
pub mod registry;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::error;

use crate::config::ManagerConfig;
use crate::error::Error;
use crate::model::{
    Environment, Machine, MachineConfig, MachineSource, Runtime, ServerConfig, ServerView,
};
use crate::recipe_type::RecipeType;

pub use crate::manager::compose::ComposeManager;
pub use crate::manager::docker_image::DockerImageManager;
pub use crate::manager::dockerfile::DockerfileManager;
pub use crate::manager::kubernetes::PodManager;
pub use crate::manager::registry::EnvironmentRegistry;

/// Structural edits a manager supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub add_machine: bool,
    pub rename_machine: bool,
    pub delete_machine: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        add_machine: true,
        rename_machine: true,
        delete_machine: true,
    };
}

pub trait EnvironmentManager: Send + Sync {
    fn recipe_type(&self) -> RecipeType;

    fn config(&self) -> &ManagerConfig;

    fn capabilities(&self) -> Capabilities;

    fn editor_mode(&self) -> &'static str {
        self.recipe_type().editor_mode()
    }

    /// Parses recipe content strictly, surfacing the typed error.
    fn check_recipe(&self, content: &str) -> Result<(), Error>;

    /// Keys of `environment.machines` that name no unit of the recipe.
    fn unresolved_machines(&self, environment: &Environment) -> Vec<String>;

    fn get_machines(&self, environment: &Environment, runtime: Option<&Runtime>) -> Vec<Machine>;

    fn get_environment(&self, environment: &Environment, machines: &[Machine]) -> Environment;

    fn get_source(&self, machine: &Machine) -> Option<MachineSource>;

    fn set_source(&self, machine: &mut Machine, image: &str);

    fn is_dev(&self, machine: &Machine) -> bool {
        machine
            .config
            .installers
            .as_ref()
            .is_some_and(|installers| installers.contains(&self.config().workspace_agent))
    }

    /// Marks or unmarks the dev machine. Marking also adds the terminal agent.
    fn set_dev(&self, machine: &mut Machine, dev: bool) {
        let config = self.config();
        let installers = machine.config.installers.get_or_insert_with(Vec::new);
        if dev {
            for agent in [&config.workspace_agent, &config.terminal_agent] {
                if !installers.contains(agent) {
                    installers.push(agent.clone());
                }
            }
        } else {
            installers.retain(|installer| installer != &config.workspace_agent);
        }
    }

    fn get_memory_limit(&self, machine: &Machine) -> Option<u64> {
        machine.config.attributes.memory_limit_bytes
    }

    fn set_memory_limit(&self, machine: &mut Machine, bytes: u64) {
        machine.config.attributes.memory_limit_bytes = Some(bytes);
    }

    fn get_servers(&self, machine: &Machine) -> IndexMap<String, ServerView> {
        merge_servers(machine)
    }

    /// Stores user-scoped servers; runtime-only entries are dropped.
    fn set_servers(&self, machine: &mut Machine, servers: IndexMap<String, ServerView>) {
        machine.config.servers = servers
            .into_iter()
            .filter(|(_, server)| server.user_scope)
            .map(|(reference, server)| (reference, server.config))
            .collect();
    }

    fn get_env_variables(&self, machine: &Machine) -> IndexMap<String, String> {
        machine.config.env.clone()
    }

    fn set_env_variables(&self, machine: &mut Machine, env: IndexMap<String, String>) {
        machine.config.env = env;
    }

    fn get_machine_name(&self, machine: &Machine) -> String {
        machine.name.clone()
    }

    fn get_unique_machine_name(&self, environment: &Environment) -> String {
        let used = self.used_machine_names(environment);
        unique_name(|n| format!("machine{n}"), &used)
    }

    fn create_machine(&self, _environment: &Environment, _image: Option<&str>) -> Option<Machine> {
        error!(recipe_type = %self.recipe_type(), "cannot create machine: recipe holds a single machine");
        None
    }

    fn add_machine(&self, environment: &Environment, _machine: &Machine) -> Environment {
        error!(recipe_type = %self.recipe_type(), "cannot add machine: operation not supported");
        environment.clone()
    }

    fn rename_machine(&self, environment: &Environment, old_name: &str, _new_name: &str) -> Environment {
        error!(recipe_type = %self.recipe_type(), machine = old_name, "cannot rename machine: operation not supported");
        environment.clone()
    }

    fn delete_machine(&self, environment: &Environment, name: &str) -> Environment {
        error!(recipe_type = %self.recipe_type(), machine = name, "cannot delete machine: operation not supported");
        environment.clone()
    }

    fn used_machine_names(&self, environment: &Environment) -> Vec<String> {
        let mut names = environment.machines.keys().cloned().collect::<Vec<_>>();
        for machine in self.get_machines(environment, None) {
            if !names.contains(&machine.name) {
                names.push(machine.name);
            }
        }
        names
    }
}

/// Machines known from stored configs, or from the runtime alone when the
/// environment stores none. Runtime state is attached by name.
pub(crate) fn base_machines(environment: &Environment, runtime: Option<&Runtime>) -> Vec<Machine> {
    let mut machines = if environment.machines.is_empty() {
        runtime
            .map(|runtime| runtime.machines.keys().map(Machine::new).collect())
            .unwrap_or_default()
    } else {
        environment
            .machines
            .iter()
            .map(|(name, config)| Machine {
                config: config.clone(),
                ..Machine::new(name.clone())
            })
            .collect::<Vec<_>>()
    };
    if let Some(runtime) = runtime {
        for machine in &mut machines {
            machine.runtime = runtime.machines.get(&machine.name).cloned();
        }
    }
    machines
}

/// Finds the machine called `name`, appending a fresh one when missing.
pub(crate) fn machine_entry<'a>(machines: &'a mut Vec<Machine>, name: &str) -> &'a mut Machine {
    let index = match machines.iter().position(|machine| machine.name == name) {
        Some(index) => index,
        None => {
            machines.push(Machine::new(name));
            machines.len() - 1
        }
    };
    &mut machines[index]
}

/// Copies each machine's config into `environment.machines`, defaulting a
/// missing memory limit.
pub(crate) fn fold_machine_configs(
    environment: &Environment,
    machines: &[Machine],
    default_memory_limit: u64,
) -> Environment {
    let mut updated = environment.clone();
    for machine in machines {
        let mut config: MachineConfig = machine.config.clone();
        config
            .attributes
            .memory_limit_bytes
            .get_or_insert(default_memory_limit);
        updated.machines.insert(machine.name.clone(), config);
    }
    updated
}

/// Moves the config stored under `old` to `new`, keeping its position.
pub(crate) fn rename_config_key(machines: &mut IndexMap<String, MachineConfig>, old: &str, new: &str) {
    if let Some(index) = machines.get_index_of(old)
        && let Some((_, config)) = machines.shift_remove_index(index)
    {
        machines.shift_insert(index.min(machines.len()), new.to_string(), config);
    }
}

pub(crate) fn unique_name(candidate: impl Fn(usize) -> String, used: &[String]) -> String {
    let mut n = 1;
    loop {
        let name = candidate(n);
        if !used.contains(&name) {
            return name;
        }
        n += 1;
    }
}

fn merge_servers(machine: &Machine) -> IndexMap<String, ServerView> {
    let runtime_servers = machine.runtime.as_ref().map(|runtime| &runtime.servers);
    let mut servers = machine
        .config
        .servers
        .iter()
        .map(|(reference, config)| {
            let view = ServerView {
                config: config.clone(),
                user_scope: true,
                runtime: runtime_servers.and_then(|servers| servers.get(reference)).cloned(),
            };
            (reference.clone(), view)
        })
        .collect::<IndexMap<_, _>>();

    for (reference, server) in runtime_servers.into_iter().flatten() {
        if servers.contains_key(reference) {
            continue;
        }
        let protocol = server
            .url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_string());
        let view = ServerView {
            config: ServerConfig {
                protocol,
                ..ServerConfig::default()
            },
            user_scope: false,
            runtime: Some(server.clone()),
        };
        servers.insert(reference.clone(), view);
    }
    servers
}
