//! Kubernetes and OpenShift object lists.
//!
//! Every container of every pod (or deployment pod template) is a machine.
//! A machine is named `pod/container` unless the pod carries an
//! `org.eclipse.che.container.<container>.machine_name` annotation, whose
//! value then is the machine name. Lookups try annotations across all pods
//! before falling back to splitting the composite name.

use indexmap::IndexMap;
use tracing::{error, warn};

use crate::config::ManagerConfig;
use crate::error::Error;
use crate::manager::{
    Capabilities, EnvironmentManager, base_machines, fold_machine_configs, machine_entry,
    rename_config_key, unique_name,
};
use crate::model::{Environment, Machine, MachineRecipe, MachineSource, Runtime};
use crate::parser::cache::ParseCache;
use crate::parser::kubernetes::{
    Container, ListItem, ObjectList, ObjectMeta, Pod, PodRecipeParser, PodSpec,
    format_memory_quantity, is_valid_container_name, parse_memory_quantity,
};
use crate::recipe_type::RecipeType;

pub const NAME_ANNOTATION_PREFIX: &str = "org.eclipse.che.container";

pub fn name_annotation(container: &str) -> String {
    format!("{NAME_ANNOTATION_PREFIX}.{container}.machine_name")
}

/// Machine name of `container` in a pod with the given metadata.
pub fn machine_name_of(metadata: &ObjectMeta, pod_name: &str, container: &str) -> String {
    metadata
        .annotation(&name_annotation(container))
        .map_or_else(|| format!("{pod_name}/{container}"), str::to_string)
}

/// Position of a container inside an object list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerLocation {
    pub item: usize,
    pub container: usize,
}

fn pod_items(list: &ObjectList) -> impl Iterator<Item = (usize, &ListItem, &ObjectMeta, &PodSpec)> {
    list.items().iter().enumerate().filter_map(|(index, item)| {
        let (metadata, spec) = item.pod_parts()?;
        Some((index, item, metadata, spec))
    })
}

/// Finds the container a machine name refers to: an annotation alias
/// anywhere in the list first, then the `pod/container` composite.
pub fn resolve_container(list: &ObjectList, machine_name: &str) -> Option<ContainerLocation> {
    for (item, _, metadata, spec) in pod_items(list) {
        let aliased = spec.containers.iter().position(|container| {
            metadata.annotation(&name_annotation(&container.name)) == Some(machine_name)
        });
        if let Some(container) = aliased {
            return Some(ContainerLocation { item, container });
        }
    }

    let (pod_name, container_name) = machine_name.split_once('/')?;
    pod_items(list).find_map(|(item, pod, _, spec)| {
        if pod.pod_name() != Some(pod_name) {
            return None;
        }
        spec.containers
            .iter()
            .position(|container| container.name == container_name)
            .map(|container| ContainerLocation { item, container })
    })
}

fn container_mut(list: &mut ObjectList, location: ContainerLocation) -> Option<&mut Container> {
    let (_, spec) = list.items_mut().get_mut(location.item)?.pod_parts_mut()?;
    spec.containers.get_mut(location.container)
}

/// Serves both pod-based recipe types; they differ in parsing only.
#[derive(Debug)]
pub struct PodManager {
    config: ManagerConfig,
    parser: PodRecipeParser,
}

impl PodManager {
    pub fn new(flavor: RecipeType, config: ManagerConfig) -> Self {
        let parser = PodRecipeParser::new(flavor, ParseCache::new(config.parse_cache_capacity));
        Self { config, parser }
    }

    pub fn kubernetes(config: ManagerConfig) -> Self {
        Self::new(RecipeType::Kubernetes, config)
    }

    pub fn openshift(config: ManagerConfig) -> Self {
        Self::new(RecipeType::OpenShift, config)
    }

    pub fn parser(&self) -> &PodRecipeParser {
        &self.parser
    }

    fn parse_recipe(&self, environment: &Environment) -> Option<ObjectList> {
        let content = environment.recipe.content()?;
        match self.parser.parse(content) {
            Ok(list) => Some(list),
            Err(err) => {
                error!(error = %err, "cannot parse recipe");
                None
            }
        }
    }

    fn with_recipe(&self, environment: &Environment, list: &ObjectList) -> Option<Environment> {
        match self.parser.dump(list) {
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

fn machine_container(machine: &Machine) -> Option<&Container> {
    machine.pod().and_then(Pod::container)
}

impl EnvironmentManager for PodManager {
    fn recipe_type(&self) -> RecipeType {
        self.parser.flavor()
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
        let Some(list) = self.parse_recipe(environment) else {
            return Vec::new();
        };
        environment
            .machines
            .keys()
            .filter(|name| resolve_container(&list, name).is_none())
            .cloned()
            .collect()
    }

    fn get_machines(&self, environment: &Environment, runtime: Option<&Runtime>) -> Vec<Machine> {
        let mut machines = base_machines(environment, runtime);
        let Some(list) = self.parse_recipe(environment) else {
            return machines;
        };

        for (_, item, metadata, spec) in pod_items(&list) {
            let Some(pod_name) = item.pod_name() else {
                continue;
            };
            for (index, container) in spec.containers.iter().enumerate() {
                let Some(pod) = item.single_container_pod(index) else {
                    continue;
                };
                let name = machine_name_of(metadata, pod_name, &container.name);
                let machine = machine_entry(&mut machines, &name);
                machine.recipe = Some(MachineRecipe::Pod(pod));
                if machine.config.attributes.memory_limit_bytes.is_none() {
                    let limit = container
                        .memory_limit()
                        .and_then(parse_memory_quantity)
                        .unwrap_or(self.config.default_memory_limit);
                    machine.config.attributes.memory_limit_bytes = Some(limit);
                }
            }
        }
        machines
    }

    fn get_environment(&self, environment: &Environment, machines: &[Machine]) -> Environment {
        let updated = fold_machine_configs(environment, machines, self.config.default_memory_limit);
        let Some(mut list) = self.parse_recipe(&updated) else {
            return updated;
        };
        for machine in machines {
            let Some(container) = machine_container(machine) else {
                continue;
            };
            let Some(location) = resolve_container(&list, &machine.name) else {
                warn!(machine = %machine.name, "machine has no container in recipe");
                continue;
            };
            if let Some(slot) = container_mut(&mut list, location) {
                *slot = container.clone();
            }
        }
        self.with_recipe(&updated, &list).unwrap_or(updated)
    }

    fn get_source(&self, machine: &Machine) -> Option<MachineSource> {
        machine_container(machine)?
            .image
            .clone()
            .map(MachineSource::Image)
    }

    fn set_source(&self, machine: &mut Machine, image: &str) {
        match machine.pod_mut().and_then(Pod::container_mut) {
            Some(container) => container.image = Some(image.to_string()),
            None => error!(machine = %machine.name, "cannot set machine source: machine has no container"),
        }
    }

    fn get_memory_limit(&self, machine: &Machine) -> Option<u64> {
        machine.config.attributes.memory_limit_bytes.or_else(|| {
            machine_container(machine)?
                .memory_limit()
                .and_then(parse_memory_quantity)
        })
    }

    fn set_memory_limit(&self, machine: &mut Machine, bytes: u64) {
        machine.config.attributes.memory_limit_bytes = Some(bytes);
        if let Some(container) = machine.pod_mut().and_then(Pod::container_mut)
            && container.memory_limit().is_some()
        {
            container.set_memory_limit(format_memory_quantity(bytes));
        }
    }

    /// The alias when one is set, otherwise the container name.
    fn get_machine_name(&self, machine: &Machine) -> String {
        if let Some(pod) = machine.pod()
            && let Some(container) = pod.container()
        {
            return pod
                .metadata
                .annotation(&name_annotation(&container.name))
                .unwrap_or(container.name.as_str())
                .to_string();
        }
        machine
            .name
            .split_once('/')
            .map_or(machine.name.as_str(), |(_, container)| container)
            .to_string()
    }

    fn get_unique_machine_name(&self, environment: &Environment) -> String {
        let used = self.used_machine_names(environment);
        let first_pod = self.parse_recipe(environment).and_then(|list| {
            list.items()
                .iter()
                .find_map(|item| item.pod_name().map(str::to_string))
        });
        match first_pod {
            Some(pod) => unique_name(|n| format!("{pod}/machine{n}"), &used),
            None => unique_name(|n| format!("pod{n}/machine"), &used),
        }
    }

    fn create_machine(&self, environment: &Environment, image: Option<&str>) -> Option<Machine> {
        let name = self.get_unique_machine_name(environment);
        let (pod_name, container_name) = name.split_once('/').unwrap_or(("pod", name.as_str()));
        let image = image.unwrap_or(self.config.default_machine_image.as_str());
        let pod = Pod::new(pod_name, Container::new(container_name, image));
        let mut machine = Machine::with_recipe(name.clone(), MachineRecipe::Pod(pod));
        machine.config.attributes.memory_limit_bytes = Some(self.config.default_memory_limit);
        Some(machine)
    }

    /// Adds the machine's container to the pod of the same name, or its
    /// whole pod when the list has no such pod.
    fn add_machine(&self, environment: &Environment, machine: &Machine) -> Environment {
        let Some(pod) = machine.pod() else {
            error!(machine = %machine.name, "cannot add machine: machine has no pod recipe");
            return environment.clone();
        };
        let (Some(container), Some(pod_name)) = (pod.container(), pod.metadata.display_name()) else {
            error!(machine = %machine.name, "cannot add machine: pod needs a name and a container");
            return environment.clone();
        };
        let Some(mut list) = self.parse_recipe(environment) else {
            error!(machine = %machine.name, "cannot add machine");
            return environment.clone();
        };

        let key = name_annotation(&container.name);
        let alias = pod.metadata.annotation(&key).map(str::to_string);
        let machine_name = alias
            .clone()
            .unwrap_or_else(|| format!("{pod_name}/{}", container.name));
        if resolve_container(&list, &machine_name).is_some() {
            error!(machine = %machine_name, "cannot add machine: machine already exists");
            return environment.clone();
        }

        let existing = list
            .items_mut()
            .iter_mut()
            .find(|item| item.pod_name() == Some(pod_name));
        match existing.and_then(ListItem::pod_parts_mut) {
            Some((metadata, spec)) => {
                if spec.containers.iter().any(|c| c.name == container.name) {
                    error!(machine = %machine_name, "cannot add machine: container name already taken");
                    return environment.clone();
                }
                spec.containers.push(container.clone());
                if let Some(alias) = alias {
                    metadata
                        .annotations
                        .get_or_insert_with(IndexMap::new)
                        .insert(key, alias);
                }
            }
            None => list.items_mut().push(ListItem::Pod(pod.clone())),
        }

        let Some(mut updated) = self.with_recipe(environment, &list) else {
            return environment.clone();
        };
        updated.machines.insert(machine_name, machine.config.clone());
        updated
    }

    /// An aliased machine gets a new alias; otherwise the container is renamed.
    fn rename_machine(&self, environment: &Environment, old_name: &str, new_name: &str) -> Environment {
        let new_short = new_name
            .split_once('/')
            .map_or(new_name, |(_, container)| container);
        let Some(mut list) = self.parse_recipe(environment) else {
            error!(machine = old_name, "cannot rename machine");
            return environment.clone();
        };
        let Some(location) = resolve_container(&list, old_name) else {
            error!(machine = old_name, "cannot rename machine: no matching container");
            return environment.clone();
        };
        let alias_taken = resolve_container(&list, new_short).is_some_and(|other| other != location);
        let Some(pod_name) = list.items()[location.item].pod_name().map(str::to_string) else {
            error!(machine = old_name, "cannot rename machine: pod has no name");
            return environment.clone();
        };
        let Some((metadata, spec)) = list.items_mut()[location.item].pod_parts_mut() else {
            return environment.clone();
        };

        let key = name_annotation(&spec.containers[location.container].name);
        let renamed = match metadata.annotations.as_mut() {
            Some(annotations) if annotations.get(&key).is_some_and(|alias| !alias.is_empty()) => {
                if alias_taken {
                    error!(machine = old_name, new_name = new_short, "cannot rename machine: name already taken");
                    return environment.clone();
                }
                annotations.insert(key, new_short.to_string());
                new_short.to_string()
            }
            _ => {
                if !is_valid_container_name(new_short) {
                    error!(machine = old_name, new_name = new_short, "cannot rename machine: invalid container name");
                    return environment.clone();
                }
                if spec.containers.iter().any(|c| c.name == new_short) {
                    error!(machine = old_name, new_name = new_short, "cannot rename machine: container name already taken");
                    return environment.clone();
                }
                spec.containers[location.container].name = new_short.to_string();
                format!("{pod_name}/{new_short}")
            }
        };

        let Some(mut updated) = self.with_recipe(environment, &list) else {
            return environment.clone();
        };
        rename_config_key(&mut updated.machines, old_name, &renamed);
        updated
    }

    /// Removes the container, and its pod once no container is left.
    fn delete_machine(&self, environment: &Environment, name: &str) -> Environment {
        let mut updated = environment.clone();
        updated.machines.shift_remove(name);
        let Some(mut list) = self.parse_recipe(environment) else {
            error!(machine = name, "cannot delete machine");
            return updated;
        };
        let Some(location) = resolve_container(&list, name) else {
            error!(machine = name, "cannot delete machine: no matching container");
            return updated;
        };

        let items = list.items_mut();
        let emptied = match items[location.item].pod_parts_mut() {
            Some((metadata, spec)) => {
                let removed = spec.containers.remove(location.container);
                if let Some(annotations) = &mut metadata.annotations {
                    annotations.shift_remove(&name_annotation(&removed.name));
                    if annotations.is_empty() {
                        metadata.annotations = None;
                    }
                }
                spec.containers.is_empty()
            }
            None => false,
        };
        if emptied {
            items.remove(location.item);
        }
        self.with_recipe(&updated, &list).unwrap_or(updated)
    }
}
