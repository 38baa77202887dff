//! Environment, machine and stack documents.
//!
//! Environment and stack documents are JSON with camelCase keys. Maps are
//! `IndexMap`s so a document written back keeps the key order it was read with.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::parser::compose::ComposeService;
use crate::parser::dockerfile::Dockerfile;
use crate::parser::dockerimage::DockerImage;
use crate::parser::kubernetes::Pod;
use crate::recipe_type::RecipeType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub recipe: Recipe,
    #[serde(default)]
    pub machines: IndexMap<String, MachineConfig>,
}

impl Environment {
    pub fn new(recipe: Recipe) -> Self {
        Self {
            recipe,
            machines: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(rename = "type")]
    pub recipe_type: RecipeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Recipe {
    pub fn with_content(recipe_type: RecipeType, content: impl Into<String>) -> Self {
        Self {
            recipe_type,
            content: Some(content.into()),
            location: None,
            content_type: Some(recipe_type.content_type().to_string()),
        }
    }

    /// Inline content, ignoring an empty string.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref().filter(|content| !content.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    #[serde(default)]
    pub attributes: MachineAttributes,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub servers: IndexMap<String, ServerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub volumes: IndexMap<String, Volume>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineAttributes {
    #[serde(
        default,
        deserialize_with = "memory_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory_limit_bytes: Option<u64>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

// Stored documents carry the limit either as a number or as a numeric string.
fn memory_bytes<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64)),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port with optional transport, e.g. `8080/tcp`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Volume {
    pub path: String,
}

/// Live state of a running environment. Never persisted by the managers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Runtime {
    #[serde(default)]
    pub machines: IndexMap<String, RuntimeMachine>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeMachine {
    #[serde(default)]
    pub servers: IndexMap<String, RuntimeServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeServer {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Format-specific part of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum MachineRecipe {
    DockerImage(DockerImage),
    Dockerfile(Dockerfile),
    Compose(ComposeService),
    /// A copy of the machine's pod holding only the machine's container.
    Pod(Pod),
}

/// Editable machine derived from an environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<MachineRecipe>,
    #[serde(flatten)]
    pub config: MachineConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeMachine>,
}

impl Machine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_recipe(name: impl Into<String>, recipe: MachineRecipe) -> Self {
        Self {
            recipe: Some(recipe),
            ..Self::new(name)
        }
    }

    pub fn compose_service(&self) -> Option<&ComposeService> {
        match &self.recipe {
            Some(MachineRecipe::Compose(service)) => Some(service),
            _ => None,
        }
    }

    pub fn compose_service_mut(&mut self) -> Option<&mut ComposeService> {
        match &mut self.recipe {
            Some(MachineRecipe::Compose(service)) => Some(service),
            _ => None,
        }
    }

    pub fn dockerfile(&self) -> Option<&Dockerfile> {
        match &self.recipe {
            Some(MachineRecipe::Dockerfile(dockerfile)) => Some(dockerfile),
            _ => None,
        }
    }

    pub fn dockerfile_mut(&mut self) -> Option<&mut Dockerfile> {
        match &mut self.recipe {
            Some(MachineRecipe::Dockerfile(dockerfile)) => Some(dockerfile),
            _ => None,
        }
    }

    pub fn pod(&self) -> Option<&Pod> {
        match &self.recipe {
            Some(MachineRecipe::Pod(pod)) => Some(pod),
            _ => None,
        }
    }

    pub fn pod_mut(&mut self) -> Option<&mut Pod> {
        match &mut self.recipe {
            Some(MachineRecipe::Pod(pod)) => Some(pod),
            _ => None,
        }
    }
}

/// Where a machine's image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum MachineSource {
    Image(String),
    Build {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dockerfile: Option<String>,
    },
}

/// A server as shown to the user: declared servers are user scoped,
/// servers only reported by the runtime are not.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerView {
    #[serde(flatten)]
    pub config: ServerConfig,
    pub user_scope: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeServer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub name: String,
    pub workspace_config: WorkspaceConfig,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub name: String,
    pub default_env: String,
    pub environments: IndexMap<String, Environment>,
    #[serde(default)]
    pub commands: Vec<Value>,
    #[serde(default)]
    pub projects: Vec<Value>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}
