//! Line-preserving Dockerfile codec.
//!
//! The AST keeps comments, parser directives and empty lines in source order
//! so that `dump_dockerfile(parse_dockerfile(text)?)` parses back to the same
//! AST. Instruction arguments other than `ENV` are kept verbatim, including
//! escaped line breaks.

use core::iter::Peekable;
use core::str::Chars;
use std::sync::LazyLock;

use dockerfile_parser::Dockerfile as GrammarDockerfile;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const DEFAULT_ESCAPE: char = '\\';

pub const INSTRUCTIONS: [&str; 18] = [
    "FROM",
    "MAINTAINER",
    "RUN",
    "CMD",
    "LABEL",
    "EXPOSE",
    "ENV",
    "ADD",
    "COPY",
    "ENTRYPOINT",
    "VOLUME",
    "USER",
    "WORKDIR",
    "ARG",
    "ONBUILD",
    "STOPSIGNAL",
    "HEALTHCHECK",
    "SHELL",
];

const DIRECTIVES: [&str; 3] = ["escape", "syntax", "check"];

static DIRECTIVE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*(?P<name>[A-Za-z][A-Za-z0-9]*)\s*=\s*(?P<value>\S.*?)\s*$")
        .expect("directive pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    Env(Vec<(String, String)>),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Line {
    Instruction {
        instruction: String,
        argument: Argument,
    },
    Comment {
        comment: String,
    },
    Directive {
        name: String,
        value: String,
    },
    EmptyLine,
}

impl Line {
    pub fn instruction(keyword: &str, argument: impl Into<String>) -> Self {
        Self::Instruction {
            instruction: keyword.to_ascii_uppercase(),
            argument: Argument::Raw(argument.into()),
        }
    }

    fn is_instruction(&self, keyword: &str) -> bool {
        matches!(self, Self::Instruction { instruction, .. } if instruction == keyword)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dockerfile {
    pub lines: Vec<Line>,
}

impl Dockerfile {
    pub fn escape(&self) -> char {
        self.lines
            .iter()
            .find_map(|line| match line {
                Line::Directive { name, value } if name == "escape" => value.chars().next(),
                _ => None,
            })
            .unwrap_or(DEFAULT_ESCAPE)
    }

    /// Image named by the first `FROM` instruction, skipping `--flag` options.
    pub fn from_image(&self) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Instruction {
                instruction,
                argument: Argument::Raw(argument),
            } if instruction == "FROM" => argument
                .split_whitespace()
                .find(|token| !token.starts_with("--")),
            _ => None,
        })
    }

    /// Replaces the image of the first `FROM` instruction, keeping flags and
    /// any `AS name` suffix. Returns false when there is no `FROM`.
    pub fn set_from_image(&mut self, image: &str) -> bool {
        for line in &mut self.lines {
            let Line::Instruction {
                instruction,
                argument,
            } = line
            else {
                continue;
            };
            if instruction != "FROM" {
                continue;
            }

            let current = match argument {
                Argument::Raw(raw) => raw.clone(),
                Argument::Env(_) => return false,
            };
            let mut replaced = false;
            let tokens = current
                .split_whitespace()
                .map(|token| {
                    if !replaced && !token.starts_with("--") {
                        replaced = true;
                        image.to_string()
                    } else {
                        token.to_string()
                    }
                })
                .collect::<Vec<_>>();
            let mut rebuilt = tokens.join(" ");
            if !replaced {
                if !rebuilt.is_empty() {
                    rebuilt.push(' ');
                }
                rebuilt.push_str(image);
            }
            *argument = Argument::Raw(rebuilt);
            return true;
        }
        false
    }

    /// All `ENV` variables in declaration order; later declarations win.
    pub fn env_variables(&self) -> IndexMap<String, String> {
        let mut env = IndexMap::new();
        for line in &self.lines {
            if let Line::Instruction {
                argument: Argument::Env(pairs),
                ..
            } = line
            {
                for (name, value) in pairs {
                    env.insert(name.clone(), value.clone());
                }
            }
        }
        env
    }

    /// Replaces every `ENV` instruction with a single one placed right after
    /// the first `FROM`.
    pub fn set_env_variables(&mut self, env: &IndexMap<String, String>) {
        self.lines.retain(|line| !line.is_instruction("ENV"));
        if env.is_empty() {
            return;
        }

        let pairs = env
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let position = self
            .lines
            .iter()
            .position(|line| line.is_instruction("FROM"))
            .map_or(self.lines.len(), |index| index + 1);
        self.lines.insert(
            position,
            Line::Instruction {
                instruction: "ENV".to_string(),
                argument: Argument::Env(pairs),
            },
        );
    }
}

pub fn parse_dockerfile(input: &str) -> Result<Dockerfile, Error> {
    let mut scanner = Scanner::new(input);
    scanner.scan()?;
    if !scanner.seen_instruction {
        return Err(Error::dockerfile_parse("dockerfile contains no instructions"));
    }
    Ok(Dockerfile {
        lines: scanner.lines,
    })
}

pub fn dump_dockerfile(dockerfile: &Dockerfile) -> String {
    let escape = dockerfile.escape();
    let mut out = String::new();
    for line in &dockerfile.lines {
        match line {
            Line::Instruction {
                instruction,
                argument: Argument::Raw(argument),
            } => {
                out.push_str(instruction);
                out.push(' ');
                out.push_str(argument);
            }
            Line::Instruction {
                instruction,
                argument: Argument::Env(pairs),
            } => {
                out.push_str(instruction);
                for (name, value) in pairs {
                    out.push(' ');
                    out.push_str(name);
                    out.push('=');
                    out.push_str(&quote_env_value(value, escape));
                }
            }
            Line::Comment { comment } => {
                out.push('#');
                out.push_str(comment);
            }
            Line::Directive { name, value } => {
                out.push_str("# ");
                out.push_str(name);
                out.push('=');
                out.push_str(value);
            }
            Line::EmptyLine => {}
        }
        out.push('\n');
    }
    out
}

/// Runs the stricter `dockerfile-parser` grammar over the text.
///
/// That grammar only knows the default escape character, so files that
/// switch it with a directive are accepted without this check.
pub fn check_grammar(input: &str, dockerfile: &Dockerfile) -> Result<(), Error> {
    if dockerfile.escape() != DEFAULT_ESCAPE {
        return Ok(());
    }
    GrammarDockerfile::parse(input)
        .map(|_| ())
        .map_err(|err| Error::dockerfile_parse(format!("{err}")))
}

struct Scanner<'a> {
    physical: Vec<&'a str>,
    next: usize,
    escape: char,
    scanning_directives: bool,
    seen_directives: Vec<String>,
    seen_instruction: bool,
    lines: Vec<Line>,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        let mut physical = input
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect::<Vec<_>>();
        if input.is_empty() || input.ends_with('\n') {
            physical.pop();
        }

        Self {
            physical,
            next: 0,
            escape: DEFAULT_ESCAPE,
            scanning_directives: true,
            seen_directives: Vec::new(),
            seen_instruction: false,
            lines: Vec::new(),
        }
    }

    fn scan(&mut self) -> Result<(), Error> {
        while let Some(line) = self.physical.get(self.next).copied() {
            self.next += 1;
            let line_no = self.next;

            if self.scanning_directives {
                if let Some((name, value)) = parse_directive(line) {
                    self.apply_directive(name, value, line_no)?;
                    continue;
                }
                if !line.trim().is_empty() {
                    self.scanning_directives = false;
                }
            }

            let trimmed = line.trim_start();
            if trimmed.is_empty() {
                self.lines.push(Line::EmptyLine);
                continue;
            }
            if let Some(comment) = trimmed.strip_prefix('#') {
                self.lines.push(Line::Comment {
                    comment: comment.to_string(),
                });
                continue;
            }

            let logical = self.join_continuations(line);
            let instruction = self.parse_instruction(&logical, line_no)?;
            self.lines.push(instruction);
        }
        Ok(())
    }

    fn apply_directive(&mut self, name: String, value: String, line_no: usize) -> Result<(), Error> {
        if self.seen_directives.contains(&name) {
            return Err(Error::dockerfile_parse(format!(
                "line {line_no}: only one '{name}' parser directive can be used"
            )));
        }
        if name == "escape" {
            self.escape = match value.as_str() {
                "\\" => '\\',
                "`" => '`',
                _ => {
                    return Err(Error::dockerfile_parse(format!(
                        "line {line_no}: invalid escape token '{value}', expected '\\' or '`'"
                    )));
                }
            };
        }
        self.seen_directives.push(name.clone());
        self.lines.push(Line::Directive { name, value });
        Ok(())
    }

    fn join_continuations(&mut self, first: &str) -> String {
        let mut logical = first.to_string();
        while logical.trim_end().ends_with(self.escape) {
            let Some(next) = self.physical.get(self.next).copied() else {
                break;
            };
            self.next += 1;
            let trimmed = next.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            logical.push('\n');
            logical.push_str(next);
        }
        logical
    }

    fn parse_instruction(&mut self, logical: &str, line_no: usize) -> Result<Line, Error> {
        let trimmed = logical.trim_start();
        let keyword_end = trimmed
            .find(|ch: char| ch.is_whitespace())
            .unwrap_or(trimmed.len());
        let keyword = trimmed[..keyword_end].to_ascii_uppercase();
        if !INSTRUCTIONS.contains(&keyword.as_str()) {
            return Err(Error::dockerfile_parse(format!(
                "line {line_no}: unknown instruction '{}'",
                &trimmed[..keyword_end]
            )));
        }

        let argument = trimmed[keyword_end..].trim();
        if argument.is_empty() {
            return Err(Error::dockerfile_parse(format!(
                "line {line_no}: {keyword} requires an argument"
            )));
        }

        if !self.seen_instruction {
            if keyword != "FROM" {
                return Err(Error::dockerfile_parse(format!(
                    "line {line_no}: the first instruction must be FROM, found {keyword}"
                )));
            }
            self.seen_instruction = true;
        }

        let argument = if keyword == "ENV" {
            let pairs = parse_env_argument(argument, self.escape).map_err(|msg| {
                Error::dockerfile_parse(format!("line {line_no}: {msg}"))
            })?;
            Argument::Env(pairs)
        } else {
            Argument::Raw(argument.to_string())
        };

        Ok(Line::Instruction {
            instruction: keyword,
            argument,
        })
    }
}

fn parse_directive(line: &str) -> Option<(String, String)> {
    let captures = DIRECTIVE_LINE.captures(line.trim())?;
    let name = captures["name"].to_ascii_lowercase();
    if !DIRECTIVES.contains(&name.as_str()) {
        return None;
    }
    Some((name, captures["value"].to_string()))
}

/// Splits an `ENV` argument into `(name, value)` pairs.
///
/// `ENV name value` yields one pair with the rest of the line as value;
/// `ENV a=1 b="two words"` yields one pair per assignment.
pub fn parse_env_argument(argument: &str, escape: char) -> Result<Vec<(String, String)>, String> {
    let first = argument.split_whitespace().next().unwrap_or_default();
    if first.contains('=') {
        return EnvTokenizer::new(argument, escape).pairs();
    }

    let name = first.to_string();
    let value = unescape_single_value(&argument[first.len()..], escape);
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("ENV {name} requires a value"));
    }
    Ok(vec![(name, value.to_string())])
}

fn unescape_single_value(input: &str, escape: char) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != escape {
            out.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('\n') => {
                chars.next();
            }
            Some(next) if next.is_whitespace() || next == escape => {
                chars.next();
                out.push(next);
            }
            _ => out.push(ch),
        }
    }
    out
}

struct EnvTokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    escape: char,
}

impl<'a> EnvTokenizer<'a> {
    fn new(input: &'a str, escape: char) -> Self {
        Self {
            chars: input.chars().peekable(),
            escape,
        }
    }

    fn pairs(mut self) -> Result<Vec<(String, String)>, String> {
        let mut pairs = Vec::new();
        loop {
            self.skip_separators();
            if self.chars.peek().is_none() {
                break;
            }
            let name = self.parse_name()?;
            let value = self.parse_value()?;
            pairs.push((name, value));
        }
        Ok(pairs)
    }

    fn skip_separators(&mut self) {
        loop {
            match self.chars.peek().copied() {
                Some(ch) if ch.is_whitespace() => {
                    self.chars.next();
                }
                Some(ch) if ch == self.escape => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'\n') {
                        self.chars.next();
                        self.chars.next();
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn parse_name(&mut self) -> Result<String, String> {
        let mut name = String::new();
        loop {
            match self.chars.peek().copied() {
                Some('=') => {
                    self.chars.next();
                    break;
                }
                Some(ch) if !ch.is_whitespace() => {
                    self.chars.next();
                    name.push(ch);
                }
                _ => {
                    return Err(format!(
                        "ENV expects NAME=VALUE pairs, found '{name}' without a value"
                    ));
                }
            }
        }
        if name.is_empty() {
            return Err("ENV variable name cannot be empty".to_string());
        }
        Ok(name)
    }

    fn parse_value(&mut self) -> Result<String, String> {
        let mut value = String::new();
        while let Some(ch) = self.chars.peek().copied() {
            if ch.is_whitespace() {
                break;
            }
            self.chars.next();
            match ch {
                '"' => self.parse_double_quoted(&mut value)?,
                '\'' => self.parse_single_quoted(&mut value)?,
                ch if ch == self.escape => match self.chars.next() {
                    Some('\n') => {}
                    Some(next) => value.push(next),
                    None => value.push(ch),
                },
                ch => value.push(ch),
            }
        }
        Ok(value)
    }

    fn parse_double_quoted(&mut self, value: &mut String) -> Result<(), String> {
        loop {
            let Some(ch) = self.chars.next() else {
                return Err("unterminated double-quoted ENV value".to_string());
            };
            if ch == '"' {
                return Ok(());
            }
            if ch != self.escape {
                value.push(ch);
                continue;
            }
            match self.chars.next() {
                Some('\n') => {}
                Some(next) if next == '"' || next == '$' || next == self.escape => value.push(next),
                Some(next) => {
                    value.push(ch);
                    value.push(next);
                }
                None => return Err("unterminated double-quoted ENV value".to_string()),
            }
        }
    }

    /// Continuations are joined before quoting applies, so an escaped
    /// newline vanishes even inside single quotes.
    fn parse_single_quoted(&mut self, value: &mut String) -> Result<(), String> {
        loop {
            let Some(ch) = self.chars.next() else {
                return Err("unterminated single-quoted ENV value".to_string());
            };
            if ch == '\'' {
                return Ok(());
            }
            if ch == self.escape && self.chars.peek() == Some(&'\n') {
                self.chars.next();
                continue;
            }
            value.push(ch);
        }
    }
}

fn quote_env_value(value: &str, escape: char) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|ch| !ch.is_whitespace() && ch != '"' && ch != '\'' && ch != escape);
    if plain {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == escape {
            out.push(escape);
        } else if ch == '\n' {
            out.push(escape);
        }
        out.push(ch);
    }
    out.push('"');
    out
}
