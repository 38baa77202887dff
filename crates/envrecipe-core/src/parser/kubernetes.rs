//! Kubernetes and OpenShift object lists.
//!
//! Both flavors share one document model. They differ in validation only:
//! OpenShift also accepts `Template` documents and `Route` items, and rejects
//! any kind it does not know, while a Kubernetes list skips unknown kinds.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::Error;
use crate::parser::cache::ParseCache;
use crate::recipe_type::RecipeType;

pub const LIST: &str = "List";
pub const TEMPLATE: &str = "Template";

static CONTAINER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("container name pattern is valid")
});

static MEMORY_QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)([a-zA-Z]{1,3})$").expect("memory quantity pattern is valid")
});

const MEMORY_UNITS: [&str; 4] = ["B", "Ki", "Mi", "Gi"];

pub fn is_valid_container_name(name: &str) -> bool {
    CONTAINER_NAME.is_match(name)
}

/// Bytes in a `<number><unit>` quantity. Only `B`, `Ki`, `Mi` and `Gi` are
/// known; anything else yields `None`.
pub fn parse_memory_quantity(quantity: &str) -> Option<u64> {
    let captures = MEMORY_QUANTITY.captures(quantity.trim())?;
    let number: u64 = captures[1].parse().ok()?;
    let power = MEMORY_UNITS.iter().position(|unit| *unit == &captures[2])?;
    number.checked_mul(1024u64.pow(power as u32))
}

/// Largest unit that divides `bytes` exactly, preferring `Mi`.
pub fn format_memory_quantity(bytes: u64) -> String {
    for power in [2, 1] {
        let unit = 1024u64.pow(power as u32);
        if bytes % unit == 0 {
            return format!("{}{}", bytes / unit, MEMORY_UNITS[power]);
        }
    }
    format!("{bytes}B")
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectList {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ListItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<ListItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<TemplateParameter>>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ObjectList {
    pub fn is_template(&self) -> bool {
        self.kind.eq_ignore_ascii_case(TEMPLATE)
    }

    pub fn items(&self) -> &[ListItem] {
        let items = if self.is_template() {
            &self.objects
        } else {
            &self.items
        };
        items.as_deref().unwrap_or_default()
    }

    pub fn items_mut(&mut self) -> &mut Vec<ListItem> {
        if self.is_template() {
            self.objects.get_or_insert_with(Vec::new)
        } else {
            self.items.get_or_insert_with(Vec::new)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListItem {
    Pod(Pod),
    Deployment(Deployment),
    ConfigMap(Resource),
    Secret(Resource),
    Route(Resource),
    Other(Value),
}

impl ListItem {
    pub fn from_value(value: Value) -> Result<Self, serde_yaml::Error> {
        let kind = item_kind(&value).unwrap_or_default().to_ascii_lowercase();
        Ok(match kind.as_str() {
            "pod" => Self::Pod(serde_yaml::from_value(value)?),
            "deployment" => Self::Deployment(serde_yaml::from_value(value)?),
            "configmap" => Self::ConfigMap(serde_yaml::from_value(value)?),
            "secret" => Self::Secret(serde_yaml::from_value(value)?),
            "route" => Self::Route(serde_yaml::from_value(value)?),
            _ => Self::Other(value),
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Pod(pod) => &pod.kind,
            Self::Deployment(deployment) => &deployment.kind,
            Self::ConfigMap(resource) | Self::Secret(resource) | Self::Route(resource) => {
                &resource.kind
            }
            Self::Other(value) => item_kind(value).unwrap_or_default(),
        }
    }

    /// Metadata and spec of the pod an item runs: the item itself for a
    /// `Pod`, the pod template for a `Deployment`.
    pub fn pod_parts(&self) -> Option<(&ObjectMeta, &PodSpec)> {
        match self {
            Self::Pod(pod) => Some((&pod.metadata, &pod.spec)),
            Self::Deployment(deployment) => Some((
                &deployment.spec.template.metadata,
                &deployment.spec.template.spec,
            )),
            _ => None,
        }
    }

    pub fn pod_parts_mut(&mut self) -> Option<(&mut ObjectMeta, &mut PodSpec)> {
        match self {
            Self::Pod(pod) => Some((&mut pod.metadata, &mut pod.spec)),
            Self::Deployment(deployment) => Some((
                &mut deployment.spec.template.metadata,
                &mut deployment.spec.template.spec,
            )),
            _ => None,
        }
    }

    /// Pod name used in composite machine names. A deployment template
    /// without a name borrows the deployment's name.
    pub fn pod_name(&self) -> Option<&str> {
        match self {
            Self::Pod(pod) => pod.metadata.display_name(),
            Self::Deployment(deployment) => deployment
                .spec
                .template
                .metadata
                .display_name()
                .or_else(|| deployment.metadata.display_name()),
            _ => None,
        }
    }

    /// A copy of the item's pod holding only the container at `index`.
    pub fn single_container_pod(&self, index: usize) -> Option<Pod> {
        let (metadata, spec) = self.pod_parts()?;
        let container = spec.containers.get(index)?.clone();
        let mut metadata = metadata.clone();
        if metadata.display_name().is_none() {
            metadata.name = self.pod_name().map(str::to_string);
        }
        let api_version = match self {
            Self::Pod(pod) => pod.api_version.clone(),
            _ => Some("v1".to_string()),
        };
        Some(Pod {
            api_version,
            kind: "Pod".to_string(),
            metadata,
            spec: PodSpec {
                containers: vec![container],
                extra: spec.extra.clone(),
            },
            extra: IndexMap::new(),
        })
    }
}

impl<'de> Deserialize<'de> for ListItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

impl Serialize for ListItem {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Pod(pod) => pod.serialize(serializer),
            Self::Deployment(deployment) => deployment.serialize(serializer),
            Self::ConfigMap(resource) | Self::Secret(resource) | Self::Route(resource) => {
                resource.serialize(serializer)
            }
            Self::Other(value) => value.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "generateName", default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<IndexMap<String, String>>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// `name`, or `generateName` when the name is left to the server.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| self.generate_name.as_deref().filter(|name| !name.is_empty()))
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()?
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pod {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Pod {
    pub fn new(name: &str, container: Container) -> Self {
        Self {
            api_version: Some("v1".to_string()),
            kind: "Pod".to_string(),
            metadata: ObjectMeta::named(name),
            spec: PodSpec {
                containers: vec![container],
                extra: IndexMap::new(),
            },
            extra: IndexMap::new(),
        }
    }

    pub fn container(&self) -> Option<&Container> {
        self.spec.containers.first()
    }

    pub fn container_mut(&mut self) -> Option<&mut Container> {
        self.spec.containers.first_mut()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: Some(image.into()),
            ..Self::default()
        }
    }

    pub fn memory_limit(&self) -> Option<&str> {
        self.resources.as_ref()?.limits.as_ref()?.memory.as_deref()
    }

    pub fn set_memory_limit(&mut self, quantity: String) {
        self.resources
            .get_or_insert_with(ResourceRequirements::default)
            .limits
            .get_or_insert_with(ResourceList::default)
            .memory = Some(quantity);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceList {
    #[serde(
        default,
        deserialize_with = "quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

fn quantity<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeploymentSpec,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default)]
    pub template: PodTemplateSpec,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(rename = "matchLabels", default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<IndexMap<String, String>>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// ConfigMap, Secret and Route items: only identity is modelled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug)]
pub struct PodRecipeParser {
    flavor: RecipeType,
    cache: ParseCache<ObjectList>,
}

impl PodRecipeParser {
    pub fn new(flavor: RecipeType, cache: ParseCache<ObjectList>) -> Self {
        Self { flavor, cache }
    }

    pub fn kubernetes() -> Self {
        Self::new(RecipeType::Kubernetes, ParseCache::new(5))
    }

    pub fn openshift() -> Self {
        Self::new(RecipeType::OpenShift, ParseCache::new(5))
    }

    pub fn flavor(&self) -> RecipeType {
        self.flavor
    }

    pub fn cache(&self) -> &ParseCache<ObjectList> {
        &self.cache
    }

    pub fn parse(&self, content: &str) -> Result<ObjectList, Error> {
        if let Some(list) = self.cache.get(content) {
            debug!(flavor = %self.flavor, "object list served from parse cache");
            return Ok(list);
        }

        let document: Value = serde_yaml::from_str(content)?;
        validate_object_list(&document, self.flavor)?;
        let list: ObjectList = serde_yaml::from_value(document)?;
        self.cache.insert(content, list.clone());
        Ok(list)
    }

    /// Parses a single item, as found in a machine recipe.
    pub fn parse_item(&self, content: &str) -> Result<ListItem, Error> {
        let document: Value = serde_yaml::from_str(content)?;
        validate_item(&document, self.flavor)?;
        Ok(ListItem::from_value(document)?)
    }

    pub fn dump(&self, list: &ObjectList) -> Result<String, Error> {
        Ok(serde_yaml::to_string(list)?)
    }
}

fn item_kind(value: &Value) -> Option<&str> {
    value.get("kind")?.as_str()
}

fn is_supported_kind(kind: &str, flavor: RecipeType) -> bool {
    match kind.to_ascii_lowercase().as_str() {
        "pod" | "deployment" | "configmap" | "secret" => true,
        "route" => flavor.is_openshift(),
        _ => false,
    }
}

pub fn validate_object_list(document: &Value, flavor: RecipeType) -> Result<(), Error> {
    let fail = |msg: String| Error::pod_recipe(flavor, msg);

    let Value::Mapping(root) = document else {
        return Err(fail("recipe must be a YAML mapping".to_string()));
    };
    let kind = root
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| fail("recipe must declare 'kind'".to_string()))?;

    let section = if kind == LIST {
        "items"
    } else if kind == TEMPLATE && flavor.is_openshift() {
        validate_template_parameters(root, flavor)?;
        "objects"
    } else {
        let expected = if flavor.is_openshift() {
            "List or Template"
        } else {
            "List"
        };
        return Err(fail(format!(
            "unsupported recipe kind '{kind}', expected {expected}"
        )));
    };

    let items = match root.get(section) {
        Some(Value::Sequence(items)) => items,
        Some(_) => return Err(fail(format!("'{section}' must be a list"))),
        None => return Err(fail(format!("recipe must contain an '{section}' section"))),
    };

    for (index, item) in items.iter().enumerate() {
        if flavor.is_kubernetes() {
            let kind = item_kind(item).unwrap_or_default();
            if !kind.is_empty() && !is_supported_kind(kind, flavor) && !kind.eq_ignore_ascii_case("service") {
                debug!(kind, index, "skipping validation of unrecognized item kind");
                continue;
            }
        }
        validate_item(item, flavor).map_err(|err| match err {
            Error::PodRecipe { flavor, msg } => {
                Error::pod_recipe(flavor, format!("{section}[{index}]: {msg}"))
            }
            other => other,
        })?;
    }
    Ok(())
}

fn validate_template_parameters(root: &Mapping, flavor: RecipeType) -> Result<(), Error> {
    let Some(parameters) = root.get("parameters") else {
        return Ok(());
    };
    let Value::Sequence(parameters) = parameters else {
        return Err(Error::pod_recipe(flavor, "'parameters' must be a list"));
    };
    for parameter in parameters {
        let name = parameter
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>");
        if parameter.get("generate").is_some() || parameter.get("value").is_none() {
            return Err(Error::pod_recipe(
                flavor,
                format!(
                    "template parameter '{name}' must define a 'value'; generated parameters are not supported"
                ),
            ));
        }
    }
    Ok(())
}

pub fn validate_item(item: &Value, flavor: RecipeType) -> Result<(), Error> {
    let fail = |msg: String| Error::pod_recipe(flavor, msg);

    let Value::Mapping(item) = item else {
        return Err(fail("item must be a YAML mapping".to_string()));
    };
    let kind = item
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| fail("item must declare 'kind'".to_string()))?;
    if item.get("apiVersion").and_then(Value::as_str).is_none() {
        return Err(fail(format!("{kind} must declare 'apiVersion'")));
    }

    match kind.to_ascii_lowercase().as_str() {
        "service" => Ok(()),
        "pod" => {
            let name = validate_metadata(item.get("metadata"), kind, flavor)?;
            validate_pod_spec(item.get("spec"), &name, flavor)
        }
        "deployment" => validate_deployment(item, kind, flavor),
        "configmap" => {
            let name = validate_metadata(item.get("metadata"), kind, flavor)?;
            validate_string_map(item.get("data"), &format!("ConfigMap '{name}' data"), flavor)
        }
        "secret" => {
            let name = validate_metadata(item.get("metadata"), kind, flavor)?;
            validate_string_map(item.get("data"), &format!("Secret '{name}' data"), flavor)?;
            match item.get("type") {
                None | Some(Value::String(_)) => Ok(()),
                Some(_) => Err(fail(format!("Secret '{name}': 'type' must be a string"))),
            }
        }
        "route" if flavor.is_openshift() => {
            let name = validate_metadata(item.get("metadata"), kind, flavor)?;
            let target = item
                .get("spec")
                .and_then(|spec| spec.get("to"))
                .and_then(|to| to.get("name"))
                .and_then(Value::as_str);
            if target.is_none() {
                return Err(fail(format!("Route '{name}' must declare 'spec.to.name'")));
            }
            Ok(())
        }
        _ => Err(fail(format!("unsupported item kind '{kind}'"))),
    }
}

fn validate_metadata(metadata: Option<&Value>, kind: &str, flavor: RecipeType) -> Result<String, Error> {
    let fail = |msg: String| Error::pod_recipe(flavor, msg);
    let Some(Value::Mapping(metadata)) = metadata else {
        return Err(fail(format!("{kind} must contain a 'metadata' section")));
    };
    let name = ["name", "generateName"]
        .iter()
        .find_map(|key| metadata.get(*key).and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| fail(format!("{kind} must declare 'metadata.name' or 'metadata.generateName'")))?;

    validate_string_map(metadata.get("labels"), &format!("{kind} '{name}' labels"), flavor)?;
    validate_string_map(
        metadata.get("annotations"),
        &format!("{kind} '{name}' annotations"),
        flavor,
    )?;
    Ok(name.to_string())
}

fn validate_string_map(value: Option<&Value>, what: &str, flavor: RecipeType) -> Result<(), Error> {
    match value {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Mapping(entries)) => {
            if entries.values().all(|value| value.is_string()) {
                Ok(())
            } else {
                Err(Error::pod_recipe(flavor, format!("{what} must be strings")))
            }
        }
        Some(_) => Err(Error::pod_recipe(flavor, format!("{what} must be a mapping"))),
    }
}

fn validate_pod_spec(spec: Option<&Value>, pod_name: &str, flavor: RecipeType) -> Result<(), Error> {
    let fail = |msg: String| Error::pod_recipe(flavor, msg);
    let containers = match spec.and_then(|spec| spec.get("containers")) {
        Some(Value::Sequence(containers)) if !containers.is_empty() => containers,
        _ => {
            return Err(fail(format!(
                "pod '{pod_name}' must declare a non-empty 'spec.containers' list"
            )));
        }
    };

    for container in containers {
        let name = container
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| fail(format!("pod '{pod_name}': every container must have a name")))?;
        if !is_valid_container_name(name) {
            return Err(fail(format!(
                "pod '{pod_name}': container name '{name}' must match {}",
                CONTAINER_NAME.as_str()
            )));
        }
        if container.get("image").and_then(Value::as_str).is_none() {
            return Err(fail(format!(
                "pod '{pod_name}': container '{name}' must declare an 'image'"
            )));
        }
    }
    Ok(())
}

fn validate_deployment(item: &Mapping, kind: &str, flavor: RecipeType) -> Result<(), Error> {
    let fail = |msg: String| Error::pod_recipe(flavor, msg);
    let name = validate_metadata(item.get("metadata"), kind, flavor)?;
    let template = item
        .get("spec")
        .and_then(|spec| spec.get("template"))
        .ok_or_else(|| fail(format!("Deployment '{name}' must declare 'spec.template'")))?;

    if let Some(metadata) = template.get("metadata") {
        validate_string_map(metadata.get("labels"), &format!("Deployment '{name}' template labels"), flavor)?;
        validate_string_map(
            metadata.get("annotations"),
            &format!("Deployment '{name}' template annotations"),
            flavor,
        )?;
    }
    validate_pod_spec(template.get("spec"), &name, flavor)?;

    let match_labels = item
        .get("spec")
        .and_then(|spec| spec.get("selector"))
        .and_then(|selector| selector.get("matchLabels"));
    let template_labels = template
        .get("metadata")
        .and_then(|metadata| metadata.get("labels"));
    if match_labels != template_labels {
        return Err(fail(format!(
            "Deployment '{name}': spec.selector.matchLabels must match spec.template.metadata.labels"
        )));
    }
    Ok(())
}
