use thiserror::Error;

use crate::recipe_type::RecipeType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("docker image parse error: {msg}")]
    DockerImageParse { msg: String },

    #[error("dockerfile parse error: {msg}")]
    DockerfileParse { msg: String },

    #[error("compose recipe error: {msg}")]
    ComposeRecipe { msg: String },

    #[error("{flavor} recipe error: {msg}")]
    PodRecipe { flavor: RecipeType, msg: String },

    #[error("unknown recipe type: {value}")]
    UnknownRecipeType { value: String },

    #[error("yaml error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("config error: {msg}")]
    Config { msg: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    pub fn docker_image_parse(msg: impl Into<String>) -> Self {
        Self::DockerImageParse { msg: msg.into() }
    }

    pub fn dockerfile_parse(msg: impl Into<String>) -> Self {
        Self::DockerfileParse { msg: msg.into() }
    }

    pub fn compose_recipe(msg: impl Into<String>) -> Self {
        Self::ComposeRecipe { msg: msg.into() }
    }

    pub fn pod_recipe(flavor: RecipeType, msg: impl Into<String>) -> Self {
        Self::PodRecipe {
            flavor,
            msg: msg.into(),
        }
    }

    pub fn unknown_recipe_type(value: impl Into<String>) -> Self {
        Self::UnknownRecipeType {
            value: value.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { msg: msg.into() }
    }

    /// True for failures caused by the recipe text itself rather than the
    /// surrounding document or environment.
    pub const fn is_recipe_error(&self) -> bool {
        matches!(
            self,
            Self::DockerImageParse { .. }
                | Self::DockerfileParse { .. }
                | Self::ComposeRecipe { .. }
                | Self::PodRecipe { .. }
                | Self::Yaml { .. }
        )
    }
}
