use std::io::{Read, Write};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum, error::ErrorKind};
use clap_complete::{
    generate,
    shells::{Bash, Fish, Zsh},
};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use envrecipe_core::exit_code::ExitCode;
use envrecipe_core::{Environment, EnvironmentRegistry, Error, ManagerConfig, RecipeType, StackBuilder, Validator};

const LONG_ABOUT: &str = "Inspect and build workspace environments from container recipes.\n\nRecipes can be a Docker image reference, a Dockerfile, a Compose file, or a Kubernetes/OpenShift object list. Documents are read from a file or stdin and results are printed as JSON on stdout; logs go to stderr.";

const AFTER_HELP: &str = "Examples:\n  envrecipe machines -f environment.json\n  envrecipe stack --type dockerfile -f Dockerfile\n  cat compose.yaml | envrecipe stack --type compose --stdin\n  envrecipe validate -f stack.json\n  envrecipe --memory-limit 4294967296 machines --stdin < environment.json";

fn main() {
    let code = match run() {
        Ok(()) => ExitCode::Success,
        Err(app_error) => {
            if !app_error.message.is_empty() {
                eprintln!("{}", app_error.message);
            }
            app_error.code
        }
    };
    std::process::exit(code.as_i32());
}

#[derive(Debug)]
struct AppError {
    code: ExitCode,
    message: String,
}

impl AppError {
    fn usage(message: impl Into<String>) -> Self {
        Self {
            code: ExitCode::Usage,
            message: message.into(),
        }
    }

    fn invalid() -> Self {
        Self {
            code: ExitCode::Invalid,
            message: String::new(),
        }
    }
}

impl From<Error> for AppError {
    fn from(value: Error) -> Self {
        Self {
            code: ExitCode::from(&value),
            message: value.to_string(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "List the machines of an environment")]
    Machines {
        #[command(flatten)]
        input: InputArgs,
    },
    #[command(about = "Build a new stack around a recipe")]
    Stack {
        #[arg(
            short = 't',
            long = "type",
            value_name = "TYPE",
            help = "Recipe type of the input",
            long_help = "Recipe type of the input: dockerimage, dockerfile, compose, kubernetes or openshift."
        )]
        recipe_type: String,

        #[command(flatten)]
        input: InputArgs,
    },
    #[command(about = "Validate a stack document")]
    Validate {
        #[command(flatten)]
        input: InputArgs,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum, value_name = "SHELL")]
        shell: CompletionShell,
    },
}

#[derive(Debug, Args)]
struct InputArgs {
    #[arg(
        short = 'f',
        long = "file",
        value_name = "PATH",
        help = "Read the document from a file path",
        long_help = "Read the input document from PATH. Either --file or --stdin is required."
    )]
    file: Option<String>,

    #[arg(
        long = "stdin",
        help = "Read the document from stdin",
        long_help = "Read the input document from stdin. This conflicts with --file."
    )]
    stdin: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Debug, Parser)]
#[command(
    name = "envrecipe",
    about = "Workspace environments from container recipes",
    long_about = LONG_ABOUT,
    after_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long = "config",
        value_name = "PATH",
        env = "ENVRECIPE_CONFIG",
        global = true,
        help = "Load manager defaults from a TOML file",
        long_help = "Load manager defaults (memory limit, machine image, agent ids, cache capacity) from a TOML file. Keys that are not set keep their built-in defaults."
    )]
    config: Option<String>,

    #[arg(
        long = "memory-limit",
        value_name = "BYTES",
        env = "ENVRECIPE_MEMORY_LIMIT",
        global = true,
        help = "Override the default machine memory limit",
        long_help = "Override the memory limit in bytes given to machines that carry none. Takes precedence over --config."
    )]
    memory_limit: Option<u64>,

    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        help = "Print debug logs to stderr",
        long_help = "Print debug logs to stderr while keeping stdout clean for result output. Without it the log level comes from RUST_LOG and defaults to warn."
    )]
    verbose: bool,
}

fn run() -> Result<(), AppError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) {
                print!("{err}");
                return Ok(());
            }
            return Err(AppError::usage(err.to_string()));
        }
    };

    init_tracing(cli.verbose);
    execute(cli)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn execute(cli: Cli) -> Result<(), AppError> {
    if let Commands::Completion { shell } = cli.command {
        return write_completion(shell);
    }

    let registry = EnvironmentRegistry::new(load_config(&cli)?);
    match &cli.command {
        Commands::Machines { input } => list_machines(&registry, input),
        Commands::Stack { recipe_type, input } => build_stack(&registry, recipe_type, input),
        Commands::Validate { input } => validate_stack(&registry, input),
        Commands::Completion { .. } => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<ManagerConfig, AppError> {
    let mut config = match cli.config.as_deref() {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    if let Some(limit) = cli.memory_limit {
        if limit == 0 {
            return Err(AppError::usage("--memory-limit must be positive"));
        }
        config.default_memory_limit = limit;
    }
    debug!(memory_limit = config.default_memory_limit, "loaded manager config");
    Ok(config)
}

fn list_machines(registry: &EnvironmentRegistry, input: &InputArgs) -> Result<(), AppError> {
    let document = read_input(input)?;
    let environment: Environment = serde_json::from_str(&document).map_err(Error::from)?;
    let manager = registry
        .for_environment(&environment)
        .ok_or_else(|| Error::unknown_recipe_type(environment.recipe.recipe_type.as_str()))?;

    // Managers degrade silently on bad recipes, the CLI reports them instead.
    if let Some(content) = environment.recipe.content() {
        manager.check_recipe(content)?;
    }
    let machines = manager.get_machines(&environment, None);
    write_json(&machines)
}

fn build_stack(
    registry: &EnvironmentRegistry,
    recipe_type: &str,
    input: &InputArgs,
) -> Result<(), AppError> {
    let content = read_input(input)?;
    let recipe_type: RecipeType = recipe_type
        .parse()
        .map_err(|err: Error| AppError::usage(err.to_string()))?;
    let stack = StackBuilder::new(registry).build(recipe_type, &content)?;
    write_json(&stack)
}

fn validate_stack(registry: &EnvironmentRegistry, input: &InputArgs) -> Result<(), AppError> {
    let document = read_input(input)?;
    let validation = Validator::new(registry).validate_stack_json(&document)?;
    if validation.is_valid() {
        return Ok(());
    }

    let mut stdout = std::io::stdout().lock();
    for message in &validation.errors {
        stdout.write_all(message.as_bytes()).map_err(Error::from)?;
        stdout.write_all(b"\n").map_err(Error::from)?;
    }
    Err(AppError::invalid())
}

fn write_completion(shell: CompletionShell) -> Result<(), AppError> {
    let mut command = Cli::command();
    let mut stdout = std::io::stdout().lock();
    match shell {
        CompletionShell::Bash => generate(Bash, &mut command, "envrecipe", &mut stdout),
        CompletionShell::Zsh => generate(Zsh, &mut command, "envrecipe", &mut stdout),
        CompletionShell::Fish => generate(Fish, &mut command, "envrecipe", &mut stdout),
    }
    stdout.flush().map_err(Error::from).map_err(AppError::from)
}

fn write_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let payload = serde_json::to_string_pretty(value).map_err(Error::from)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(payload.as_bytes()).map_err(Error::from)?;
    stdout.write_all(b"\n").map_err(Error::from)?;
    Ok(())
}

fn validate_input(input: &InputArgs) -> Result<(), AppError> {
    if input.stdin && input.file.is_some() {
        return Err(AppError::usage("--stdin is mutually exclusive with --file"));
    }
    if !input.stdin && input.file.is_none() {
        return Err(AppError::usage("no input given: pass --file PATH or --stdin"));
    }
    Ok(())
}

fn read_input(input: &InputArgs) -> Result<String, AppError> {
    validate_input(input)?;
    if input.stdin {
        let mut document = String::new();
        std::io::stdin()
            .read_to_string(&mut document)
            .map_err(Error::from)?;
        return Ok(document);
    }

    let path = input.file.as_deref().unwrap_or_default();
    std::fs::read_to_string(path)
        .map_err(Error::from)
        .map_err(AppError::from)
}
