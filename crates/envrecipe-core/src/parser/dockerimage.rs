use core::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

// An optional `host:port/` prefix may carry a colon that is not a tag separator.
static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<repository>(?:[^\s:/]+(?::[0-9]+)?/)?[^\s:]+)(?::(?P<tag>[^\s:/]+))?$")
        .expect("image reference pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl DockerImage {
    pub fn new(repository: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            repository: repository.into(),
            tag,
        }
    }
}

impl fmt::Display for DockerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{tag}", self.repository),
            None => f.write_str(&self.repository),
        }
    }
}

pub fn parse_docker_image(input: &str) -> Result<DockerImage, Error> {
    let reference = input.trim();
    if reference.is_empty() {
        return Err(Error::docker_image_parse("image reference is empty"));
    }

    let captures = IMAGE_REFERENCE.captures(reference).ok_or_else(|| {
        Error::docker_image_parse(format!(
            "'{reference}' does not match REPOSITORY[:TAG]"
        ))
    })?;

    Ok(DockerImage {
        repository: captures["repository"].to_string(),
        tag: captures.name("tag").map(|tag| tag.as_str().to_string()),
    })
}

pub fn dump_docker_image(image: &DockerImage) -> String {
    image.to_string()
}

#[cfg(test)]
mod tests {
    use crate::parser::dockerimage::{DockerImage, dump_docker_image, parse_docker_image};

    #[test]
    fn parses_repository_and_tag() {
        let image = parse_docker_image("repository:tag").expect("image should parse");
        assert_eq!(image, DockerImage::new("repository", Some("tag".to_string())));
        assert_eq!(dump_docker_image(&image), "repository:tag");
    }

    #[test]
    fn tag_is_optional() {
        let image = parse_docker_image("eclipse/ubuntu_jdk8").expect("image should parse");
        assert_eq!(image.repository, "eclipse/ubuntu_jdk8");
        assert_eq!(image.tag, None);
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let image = parse_docker_image("localhost:5000/team/app").expect("image should parse");
        assert_eq!(image.repository, "localhost:5000/team/app");
        assert_eq!(image.tag, None);

        let tagged = parse_docker_image("localhost:5000/team/app:1.2").expect("image should parse");
        assert_eq!(tagged.repository, "localhost:5000/team/app");
        assert_eq!(tagged.tag.as_deref(), Some("1.2"));
    }

    #[test]
    fn rejects_embedded_whitespace() {
        let error = parse_docker_image("repo sitory:tag").expect_err("whitespace should fail");
        assert!(error.to_string().contains("docker image parse error"));
        assert!(parse_docker_image("   ").is_err());
    }
}
