use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeType {
    DockerImage,
    Dockerfile,
    Compose,
    Kubernetes,
    #[serde(rename = "openshift")]
    OpenShift,
}

impl RecipeType {
    pub const ALL: [Self; 5] = [
        Self::DockerImage,
        Self::Dockerfile,
        Self::Compose,
        Self::Kubernetes,
        Self::OpenShift,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DockerImage => "dockerimage",
            Self::Dockerfile => "dockerfile",
            Self::Compose => "compose",
            Self::Kubernetes => "kubernetes",
            Self::OpenShift => "openshift",
        }
    }

    /// Value stored in `recipe.contentType` for newly built recipes.
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::DockerImage => "",
            Self::Dockerfile => "text/x-dockerfile",
            Self::Compose => "text/x-yaml",
            Self::Kubernetes | Self::OpenShift => "application/x-yaml",
        }
    }

    /// Syntax mode for an editor showing the recipe content.
    pub const fn editor_mode(self) -> &'static str {
        match self {
            Self::DockerImage => "text/x-text",
            Self::Dockerfile => "text/x-dockerfile",
            Self::Compose | Self::Kubernetes | Self::OpenShift => "text/x-yaml",
        }
    }

    pub const fn is_docker_image(self) -> bool {
        matches!(self, Self::DockerImage)
    }

    pub const fn is_dockerfile(self) -> bool {
        matches!(self, Self::Dockerfile)
    }

    pub const fn is_compose(self) -> bool {
        matches!(self, Self::Compose)
    }

    pub const fn is_kubernetes(self) -> bool {
        matches!(self, Self::Kubernetes)
    }

    pub const fn is_openshift(self) -> bool {
        matches!(self, Self::OpenShift)
    }

    /// Formats whose machines are containers inside pods.
    pub const fn is_pod_based(self) -> bool {
        matches!(self, Self::Kubernetes | Self::OpenShift)
    }

    /// Formats that describe exactly one implicit machine.
    pub const fn is_single_machine(self) -> bool {
        matches!(self, Self::DockerImage | Self::Dockerfile)
    }
}

impl fmt::Display for RecipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipeType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|recipe_type| recipe_type.as_str() == normalized)
            .ok_or_else(|| Error::unknown_recipe_type(value))
    }
}
