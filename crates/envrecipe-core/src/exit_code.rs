use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    RecipeParse = 2,
    Document = 3,
    Invalid = 4,
    Config = 5,
    Io = 6,
    Usage = 64,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(value: &Error) -> Self {
        match value {
            Error::DockerImageParse { .. }
            | Error::DockerfileParse { .. }
            | Error::ComposeRecipe { .. }
            | Error::PodRecipe { .. }
            | Error::Yaml { .. } => Self::RecipeParse,
            Error::UnknownRecipeType { .. } | Error::Json { .. } => Self::Document,
            Error::Config { .. } => Self::Config,
            Error::Io { .. } => Self::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::exit_code::ExitCode;

    #[test]
    fn maps_error_variants_to_exit_codes() {
        assert_eq!(
            ExitCode::from(&Error::dockerfile_parse("bad dockerfile")),
            ExitCode::RecipeParse
        );
        assert_eq!(
            ExitCode::from(&Error::compose_recipe("no services")),
            ExitCode::RecipeParse
        );
        assert_eq!(
            ExitCode::from(&Error::unknown_recipe_type("helm")),
            ExitCode::Document
        );
        assert_eq!(ExitCode::from(&Error::config("bad")), ExitCode::Config);
        assert_eq!(
            ExitCode::from(&Error::from(std::io::Error::from(
                std::io::ErrorKind::Other
            ))),
            ExitCode::Io
        );
    }
}
