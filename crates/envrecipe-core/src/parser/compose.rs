use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::error::Error;
use crate::parser::cache::ParseCache;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComposeRecipe {
    #[serde(default)]
    pub services: IndexMap<String, ComposeService>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComposeService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Either a context path or a `{ context, dockerfile }` mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Value>,
    /// Either a `NAME=value` list or a mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<Value>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// `depends_on` as a list of service names, or as a mapping from service
/// name to options such as `condition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    List(Vec<String>),
    Map(IndexMap<String, Value>),
}

impl DependsOn {
    pub fn services(&self) -> Vec<&str> {
        match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Map(entries) => entries.keys().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::List(names) => names.is_empty(),
            Self::Map(entries) => entries.is_empty(),
        }
    }

    /// Renames a dependency in place, keeping its options and position.
    pub fn rename(&mut self, old: &str, new: &str) {
        match self {
            Self::List(names) => {
                for name in names.iter_mut().filter(|name| name.as_str() == old) {
                    *name = new.to_string();
                }
            }
            Self::Map(entries) => {
                if let Some(index) = entries.get_index_of(old)
                    && let Some((_, options)) = entries.shift_remove_index(index)
                {
                    entries.shift_insert(index, new.to_string(), options);
                }
            }
        }
    }

    pub fn remove(&mut self, service: &str) {
        match self {
            Self::List(names) => names.retain(|name| name != service),
            Self::Map(entries) => {
                entries.shift_remove(service);
            }
        }
    }
}

impl ComposeService {
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Self::default()
        }
    }

    /// `mem_limit` in bytes, accepting integers and byte strings such as
    /// `512m` or `1gb`.
    pub fn mem_limit_bytes(&self) -> Option<u64> {
        match self.mem_limit.as_ref()? {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => parse_byte_value(text),
            _ => None,
        }
    }

    pub fn environment_map(&self) -> IndexMap<String, String> {
        let mut env = IndexMap::new();
        match &self.environment {
            Some(Value::Sequence(items)) => {
                for item in items {
                    let Some(entry) = scalar_to_string(item) else {
                        continue;
                    };
                    match entry.split_once('=') {
                        Some((name, value)) => env.insert(name.to_string(), value.to_string()),
                        None => env.insert(entry, String::new()),
                    };
                }
            }
            Some(Value::Mapping(mapping)) => {
                for (name, value) in mapping {
                    if let Some(name) = scalar_to_string(name) {
                        env.insert(name, scalar_to_string(value).unwrap_or_default());
                    }
                }
            }
            _ => {}
        }
        env
    }

    /// Stores variables in the form the service already uses; a new
    /// `environment` section is written as a mapping.
    pub fn set_environment_map(&mut self, env: &IndexMap<String, String>) {
        if env.is_empty() {
            self.environment = None;
            return;
        }
        let as_list = matches!(self.environment, Some(Value::Sequence(_)));
        self.environment = Some(if as_list {
            Value::Sequence(
                env.iter()
                    .map(|(name, value)| Value::String(format!("{name}={value}")))
                    .collect(),
            )
        } else {
            Value::Mapping(
                env.iter()
                    .map(|(name, value)| (Value::String(name.clone()), Value::String(value.clone())))
                    .collect(),
            )
        });
    }
}

/// Compose byte value: an integer with an optional `b`, `k`, `m` or `g`
/// suffix, optionally followed by `b`. Multiples are binary.
pub fn parse_byte_value(text: &str) -> Option<u64> {
    let text = text.trim().to_ascii_lowercase();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    let factor: u64 = match unit {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        _ => return None,
    };
    amount.checked_mul(factor)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

#[derive(Debug)]
pub struct ComposeParser {
    cache: ParseCache<ComposeRecipe>,
}

impl Default for ComposeParser {
    fn default() -> Self {
        Self::new(ParseCache::new(5))
    }
}

impl ComposeParser {
    pub fn new(cache: ParseCache<ComposeRecipe>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &ParseCache<ComposeRecipe> {
        &self.cache
    }

    pub fn parse(&self, content: &str) -> Result<ComposeRecipe, Error> {
        if let Some(recipe) = self.cache.get(content) {
            debug!("compose recipe served from parse cache");
            return Ok(recipe);
        }

        let document: Value = serde_yaml::from_str(content)?;
        validate_compose(&document)?;
        let recipe: ComposeRecipe = serde_yaml::from_value(document)?;
        self.cache.insert(content, recipe.clone());
        Ok(recipe)
    }

    pub fn dump(&self, recipe: &ComposeRecipe) -> Result<String, Error> {
        Ok(serde_yaml::to_string(recipe)?)
    }
}

pub fn validate_compose(document: &Value) -> Result<(), Error> {
    let Value::Mapping(root) = document else {
        return Err(Error::compose_recipe("recipe must be a YAML mapping"));
    };
    let services = match root.get("services") {
        Some(Value::Mapping(services)) => services,
        Some(_) => return Err(Error::compose_recipe("'services' must be a mapping")),
        None => {
            return Err(Error::compose_recipe(
                "recipe must contain a 'services' section",
            ));
        }
    };

    for (name, service) in services {
        let name = scalar_to_string(name).unwrap_or_default();
        let Value::Mapping(service) = service else {
            return Err(Error::compose_recipe(format!(
                "service '{name}' must be a mapping"
            )));
        };
        if !service.contains_key("image") && !service.contains_key("build") {
            return Err(Error::compose_recipe(format!(
                "service '{name}' must declare 'image' or 'build'"
            )));
        }
        if let Some(value) = service.get("depends_on")
            && !matches!(value, Value::Sequence(_) | Value::Mapping(_))
        {
            return Err(Error::compose_recipe(format!(
                "service '{name}': 'depends_on' must be a list or a mapping"
            )));
        }
        if let Some(value) = service.get("links")
            && !matches!(value, Value::Sequence(_))
        {
            return Err(Error::compose_recipe(format!(
                "service '{name}': 'links' must be a list"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use crate::parser::cache::ParseCache;
    use crate::parser::compose::{ComposeParser, ComposeService, DependsOn, parse_byte_value};

    const TWO_SERVICES: &str = "services:\n machine-1:\n  image: repository-1\n machine-2:\n  image: repository-2\n";

    #[test]
    fn parses_services_in_order() {
        let parser = ComposeParser::default();
        let recipe = parser.parse(TWO_SERVICES).expect("compose should parse");
        let names = recipe.services.keys().cloned().collect::<Vec<_>>();
        assert_eq!(names, vec!["machine-1", "machine-2"]);
        assert_eq!(
            recipe.services["machine-2"].image.as_deref(),
            Some("repository-2")
        );
    }

    #[test]
    fn requires_services_with_image_or_build() {
        let parser = ComposeParser::default();
        let error = parser
            .parse("version: '2'\n")
            .expect_err("missing services should fail");
        assert!(error.to_string().contains("'services'"));

        let error = parser
            .parse("services:\n db:\n  environment:\n   A: b\n")
            .expect_err("service without image should fail");
        assert!(error.to_string().contains("service 'db' must declare 'image' or 'build'"));

        parser
            .parse("services:\n app:\n  build:\n   context: .\n")
            .expect("build-only service should parse");
    }

    #[test]
    fn keeps_unknown_keys_through_dump() {
        let parser = ComposeParser::default();
        let source = "version: '2'\nservices:\n db:\n  image: mysql\n  ports:\n  - 3306\n  mem_limit: 1073741824\n";
        let recipe = parser.parse(source).expect("compose should parse");
        assert!(recipe.extra.contains_key("version"));
        assert!(recipe.services["db"].extra.contains_key("ports"));
        assert_eq!(recipe.services["db"].mem_limit_bytes(), Some(1073741824));

        let dumped = parser.dump(&recipe).expect("compose should dump");
        let reparsed = parser.parse(&dumped).expect("dumped compose should parse");
        assert_eq!(reparsed, recipe);
    }

    #[test]
    fn cache_does_not_change_results() {
        let cached = ComposeParser::new(ParseCache::new(3));
        let uncached = ComposeParser::new(ParseCache::disabled());

        let first = cached.parse(TWO_SERVICES).expect("compose should parse");
        let second = cached.parse(TWO_SERVICES).expect("compose should parse");
        assert_eq!(cached.cache().len(), 1);
        assert_eq!(first, second);
        assert_eq!(uncached.parse(TWO_SERVICES).expect("compose should parse"), first);

        cached.cache().clear();
        assert_eq!(cached.parse(TWO_SERVICES).expect("compose should parse"), first);
    }

    #[test]
    fn reads_and_writes_environment_in_both_forms() {
        let parser = ComposeParser::default();
        let recipe = parser
            .parse("services:\n a:\n  image: x\n  environment:\n  - A=1\n  - B\n b:\n  image: y\n  environment:\n   C: 3\n")
            .expect("compose should parse");

        let mut list_form = recipe.services["a"].clone();
        let env = list_form.environment_map();
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some(""));

        let mut replacement = IndexMap::new();
        replacement.insert("Z".to_string(), "26".to_string());
        list_form.set_environment_map(&replacement);
        assert!(matches!(list_form.environment, Some(serde_yaml::Value::Sequence(_))));
        assert_eq!(list_form.environment_map(), replacement);

        let map_form = &recipe.services["b"];
        assert_eq!(
            map_form.environment_map().get("C").map(String::as_str),
            Some("3")
        );

        let mut fresh = ComposeService::from_image("x");
        fresh.set_environment_map(&replacement);
        assert!(matches!(fresh.environment, Some(serde_yaml::Value::Mapping(_))));
    }

    #[test]
    fn reads_byte_values_with_units() {
        assert_eq!(parse_byte_value("1g"), Some(1073741824));
        assert_eq!(parse_byte_value("512M"), Some(536870912));
        assert_eq!(parse_byte_value("64kb"), Some(65536));
        assert_eq!(parse_byte_value(" 100b "), Some(100));
        assert_eq!(parse_byte_value("2048"), Some(2048));
        assert_eq!(parse_byte_value("1.5g"), None);
        assert_eq!(parse_byte_value("g"), None);
        assert_eq!(parse_byte_value("1t"), None);
    }

    #[test]
    fn depends_on_accepts_both_forms() {
        let parser = ComposeParser::default();
        let recipe = parser
            .parse("services:\n db:\n  image: mysql\n web:\n  image: app\n  depends_on:\n   db:\n    condition: service_healthy\n cli:\n  image: app\n  depends_on:\n  - db\n")
            .expect("compose should parse");
        let web = recipe.services["web"].depends_on.as_ref().expect("web has dependencies");
        assert!(matches!(web, DependsOn::Map(_)));
        assert_eq!(web.services(), vec!["db"]);
        let cli = recipe.services["cli"].depends_on.as_ref().expect("cli has dependencies");
        assert_eq!(cli, &DependsOn::List(vec!["db".to_string()]));

        let dumped = parser.dump(&recipe).expect("compose should dump");
        assert_eq!(parser.parse(&dumped).expect("dumped compose should parse"), recipe);

        let error = parser
            .parse("services:\n web:\n  image: app\n  depends_on: db\n")
            .expect_err("scalar depends_on should fail");
        assert!(error.to_string().contains("'depends_on' must be a list or a mapping"));
    }
}
