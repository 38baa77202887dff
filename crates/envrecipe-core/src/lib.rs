pub mod config;
pub mod error;
pub mod exit_code;
pub mod manager;
pub mod model;
pub mod parser;
pub mod recipe_type;
pub mod stack;
pub mod validation;

pub use crate::config::ManagerConfig;
pub use crate::error::Error;
pub use crate::exit_code::ExitCode;
pub use crate::manager::{Capabilities, EnvironmentManager, EnvironmentRegistry};
pub use crate::model::{Environment, Machine, MachineConfig, MachineRecipe, Recipe, Runtime, Stack};
pub use crate::recipe_type::RecipeType;
pub use crate::stack::StackBuilder;
pub use crate::validation::{Validation, Validator};
