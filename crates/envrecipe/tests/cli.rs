use std::io::Write;
use std::process::{Command, Output, Stdio};

use serde_json::{Value, json};
use tempfile::NamedTempFile;

const WS_AGENT: &str = "org.eclipse.che.ws-agent";

const COMPOSE_RECIPE: &str = "services:\n  dev:\n    image: eclipse/ubuntu_jdk8\n  db:\n    image: mysql\n";

struct Fixture {
    file: NamedTempFile,
}

impl Fixture {
    fn new(contents: &str) -> Self {
        let mut file = NamedTempFile::new().expect("fixture file should be created");
        file.write_all(contents.as_bytes())
            .expect("fixture write should succeed");
        Self { file }
    }

    fn json(value: &Value) -> Self {
        Self::new(&value.to_string())
    }

    fn path_str(&self) -> &str {
        self.file
            .path()
            .to_str()
            .expect("fixture path should be valid utf-8")
    }
}

fn command() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_envrecipe"));
    command
        .env_remove("ENVRECIPE_CONFIG")
        .env_remove("ENVRECIPE_MEMORY_LIMIT")
        .env_remove("RUST_LOG");
    command
}

fn run(args: &[&str]) -> Output {
    command().args(args).output().expect("command should run")
}

fn run_with_stdin(args: &[&str], input: &str) -> Output {
    let mut child = command()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("command should spawn");

    {
        let mut stdin = child.stdin.take().expect("stdin should be piped");
        stdin
            .write_all(input.as_bytes())
            .expect("stdin write should succeed");
    }

    child
        .wait_with_output()
        .expect("command output should be available")
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("stdout should be utf-8")
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8(output.stderr.clone()).expect("stderr should be utf-8")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn compose_environment() -> Value {
    json!({
        "recipe": {"type": "compose", "content": COMPOSE_RECIPE},
        "machines": {"dev": {"installers": [WS_AGENT]}}
    })
}

fn stack_document(environment: Value) -> Value {
    json!({
        "name": "java",
        "workspaceConfig": {
            "name": "ws",
            "defaultEnv": "default",
            "environments": {"default": environment}
        }
    })
}

#[test]
fn dockerfile_stack_from_file() {
    let fixture = Fixture::new("FROM repository:tag");

    let output = run(&["stack", "--type", "dockerfile", "--file", fixture.path_str()]);
    assert!(output.status.success(), "{}", stderr_text(&output));

    let stack = stdout_json(&output);
    assert_eq!(stack["name"], "new-stack");
    let environment = &stack["workspaceConfig"]["environments"]["default"];
    assert_eq!(
        environment["recipe"],
        json!({
            "type": "dockerfile",
            "contentType": "text/x-dockerfile",
            "content": "FROM repository:tag\n"
        })
    );
    assert_eq!(
        environment["machines"]["new-machine"],
        json!({"attributes": {"memoryLimitBytes": 2147483648u64}, "installers": []})
    );
}

#[test]
fn compose_stack_from_stdin() {
    let content = "services:\n machine-1:\n  image: repository-1\n machine-2:\n  image: repository-2\n";

    let output = run_with_stdin(&["stack", "-t", "compose", "--stdin"], content);
    assert!(output.status.success(), "{}", stderr_text(&output));

    let stack = stdout_json(&output);
    let environment = &stack["workspaceConfig"]["environments"]["default"];
    assert_eq!(environment["recipe"]["content"], content);
    assert_eq!(environment["recipe"]["contentType"], "text/x-yaml");
    let names = environment["machines"]
        .as_object()
        .expect("machines should be an object")
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["machine-1", "machine-2"]);
}

#[test]
fn memory_limit_override_applies_to_new_machines() {
    let output = run_with_stdin(
        &["--memory-limit", "1073741824", "stack", "--type", "dockerimage", "--stdin"],
        "repository:tag\n",
    );
    assert!(output.status.success(), "{}", stderr_text(&output));

    let stack = stdout_json(&output);
    let environment = &stack["workspaceConfig"]["environments"]["default"];
    assert_eq!(environment["recipe"]["content"], "repository:tag");
    assert_eq!(
        environment["machines"]["new-machine"]["attributes"]["memoryLimitBytes"],
        1073741824u64
    );
}

#[test]
fn memory_limit_from_env() {
    let output = command()
        .args(["stack", "--type", "compose", "--stdin"])
        .env("ENVRECIPE_MEMORY_LIMIT", "536870912")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            child
                .stdin
                .take()
                .expect("stdin should be piped")
                .write_all(COMPOSE_RECIPE.as_bytes())?;
            child.wait_with_output()
        })
        .expect("command should run");
    assert!(output.status.success(), "{}", stderr_text(&output));

    let stack = stdout_json(&output);
    let machines = &stack["workspaceConfig"]["environments"]["default"]["machines"];
    assert_eq!(machines["dev"]["attributes"]["memoryLimitBytes"], 536870912u64);
    assert_eq!(machines["db"]["attributes"]["memoryLimitBytes"], 536870912u64);
}

#[test]
fn unknown_recipe_type_is_usage_error() {
    let output = run_with_stdin(&["stack", "--type", "helm", "--stdin"], "chart");
    assert_eq!(output.status.code(), Some(64));
    assert_eq!(stdout_text(&output), "");
    assert!(stderr_text(&output).contains("helm"));
}

#[test]
fn unparsable_recipe_returns_recipe_error() {
    let output = run_with_stdin(&["stack", "--type", "dockerfile", "--stdin"], "RUN true\n");
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_text(&output), "");
}

#[test]
fn lists_compose_machines() {
    let fixture = Fixture::json(&compose_environment());

    let output = run(&["machines", "-f", fixture.path_str()]);
    assert!(output.status.success(), "{}", stderr_text(&output));

    let machines = stdout_json(&output);
    let machines = machines.as_array().expect("machines should be an array");
    let names = machines
        .iter()
        .map(|machine| machine["name"].as_str().expect("name should be a string"))
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["dev", "db"]);
    assert_eq!(machines[0]["installers"], json!([WS_AGENT]));
    assert_eq!(machines[0]["recipe"]["type"], "compose");
    assert_eq!(machines[1]["recipe"]["content"]["image"], "mysql");
    assert_eq!(machines[1]["attributes"]["memoryLimitBytes"], 2147483648u64);
}

#[test]
fn lists_kubernetes_machines_by_alias() {
    let content = "kind: List\nitems:\n- apiVersion: v1\n  kind: Pod\n  metadata:\n    name: ws\n    annotations:\n      org.eclipse.che.container.dev.machine_name: main\n  spec:\n    containers:\n    - name: dev\n      image: nginx\n";
    let environment = json!({"recipe": {"type": "kubernetes", "content": content}});

    let output = run_with_stdin(&["machines", "--stdin"], &environment.to_string());
    assert!(output.status.success(), "{}", stderr_text(&output));

    let machines = stdout_json(&output);
    assert_eq!(machines[0]["name"], "main");
    assert_eq!(machines[0]["recipe"]["type"], "pod");
}

#[test]
fn invalid_environment_json_returns_document_error() {
    let output = run_with_stdin(&["machines", "--stdin"], "{not json");
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout_text(&output), "");
}

#[test]
fn broken_recipe_in_environment_returns_recipe_error() {
    let environment = json!({
        "recipe": {"type": "compose", "content": "services:\n  db: {}\n"}
    });

    let output = run_with_stdin(&["machines", "--stdin"], &environment.to_string());
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr_text(&output).contains("'image' or 'build'"));
}

#[test]
fn valid_stack_passes_validation() {
    let fixture = Fixture::json(&stack_document(compose_environment()));

    let output = run(&["validate", "--file", fixture.path_str()]);
    assert!(output.status.success(), "{}", stderr_text(&output));
    assert_eq!(stdout_text(&output), "");
}

#[test]
fn invalid_stack_lists_errors() {
    let output = run_with_stdin(&["validate", "--stdin"], r#"{"name": "java"}"#);
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(
        stdout_text(&output),
        "stack is missing mandatory key 'workspaceConfig'\n"
    );
}

#[test]
fn stack_without_dev_machine_is_invalid() {
    let environment = json!({
        "recipe": {"type": "compose", "content": COMPOSE_RECIPE}
    });

    let output = run_with_stdin(
        &["validate", "--stdin"],
        &stack_document(environment).to_string(),
    );
    assert_eq!(output.status.code(), Some(4));
    assert!(stdout_text(&output).contains("has no dev machine"));
}

#[test]
fn config_file_sets_defaults() {
    let config = Fixture::new("default_memory_limit = 3221225472\n");

    let output = run_with_stdin(
        &["--config", config.path_str(), "stack", "--type", "dockerfile", "--stdin"],
        "FROM alpine\n",
    );
    assert!(output.status.success(), "{}", stderr_text(&output));

    let stack = stdout_json(&output);
    assert_eq!(
        stack["workspaceConfig"]["environments"]["default"]["machines"]["new-machine"]["attributes"]
            ["memoryLimitBytes"],
        3221225472u64
    );
}

#[test]
fn bad_config_returns_config_error() {
    let config = Fixture::new("no_such_key = 1\n");
    let stack = Fixture::json(&stack_document(compose_environment()));

    let output = run(&["--config", config.path_str(), "validate", "-f", stack.path_str()]);
    assert_eq!(output.status.code(), Some(5));
}

#[test]
fn input_flag_conflict_returns_usage_error() {
    let fixture = Fixture::json(&compose_environment());

    let output = run(&["machines", "--file", fixture.path_str(), "--stdin"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(stderr_text(&output).contains("--stdin is mutually exclusive with --file"));
}

#[test]
fn missing_input_returns_usage_error() {
    let output = run(&["validate"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(stderr_text(&output).contains("pass --file PATH or --stdin"));
}

#[test]
fn missing_file_returns_io_error() {
    let output = run(&["machines", "--file", "/nonexistent/environment.json"]);
    assert_eq!(output.status.code(), Some(6));
}

#[test]
fn missing_subcommand_returns_usage_error() {
    let output = run(&[]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn help_exits_successfully() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    assert!(stdout_text(&output).contains("envrecipe stack --type dockerfile"));
}

#[test]
fn completion_generates_script() {
    let output = run(&["completion", "bash"]);
    assert!(output.status.success());
    assert!(stdout_text(&output).contains("envrecipe"));
}
