use anyhow::{Context, Result};
use regex::Regex;

use crate::config::{
    BridgeConfig, DEFAULT_ECHO_REGEX, DEFAULT_ERROR_PREFIX, DEFAULT_ERROR_REGEX,
    DEFAULT_PROMPT_LINE_REGEX, DEFAULT_PROMPT_REGEX,
};

/// Line the program prints in place of an empty value; never worth reporting.
const NULL_PLACEHOLDER: &str = "(null)";

/// Compiled pattern set shared by the prompt detector and the output classifier.
#[derive(Debug, Clone)]
pub struct PromptPatterns {
    /// Marks the end of a turn; searched across the whole de-escaped output.
    pub prompt: Regex,
    /// Prompt or continuation prefix at the start of a line.
    pub prompt_line: Regex,
    /// Echoed input somewhere in a line.
    pub echo: Regex,
    /// Switches the rest of a turn into error mode.
    pub error: Regex,
    /// Informational prefix dropped from error lines.
    pub error_prefix: String,
}

impl PromptPatterns {
    pub fn compile(
        prompt: &str,
        prompt_line: &str,
        echo: &str,
        error: &str,
        error_prefix: &str,
    ) -> Result<Self> {
        Ok(Self {
            prompt: compile_one("prompt", prompt)?,
            prompt_line: compile_one("prompt line", prompt_line)?,
            echo: compile_one("echo", echo)?,
            error: compile_one("error", error)?,
            error_prefix: error_prefix.to_string(),
        })
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Self::compile(
            &config.prompt_regex,
            &config.prompt_line_regex,
            &config.echo_regex,
            &config.error_regex,
            &config.error_prefix,
        )
    }

    /// Pure prompt/echo lines carry nothing worth reporting.
    pub fn is_prompt_line(&self, line: &str) -> bool {
        self.prompt_line.is_match(line) || self.echo.is_match(line)
    }

    /// Content that follows a leading prompt prefix, or the whole line when there is none.
    pub fn strip_prompt_prefix<'a>(&self, line: &'a str) -> &'a str {
        match self.prompt_line.find(line) {
            Some(found) if found.start() == 0 => line[found.end()..].trim_start(),
            _ => line,
        }
    }

    pub fn is_error_line(&self, line: &str) -> bool {
        self.error.is_match(line)
    }

    /// Normalize an error-mode line: trim it, drop the informational prefix, and drop an
    /// error marker that leads the line. `None` when nothing reportable is left.
    pub fn error_text<'a>(&self, line: &'a str) -> Option<&'a str> {
        let mut text = line.trim();
        if !self.error_prefix.is_empty() {
            if let Some(rest) = text.strip_prefix(self.error_prefix.as_str()) {
                text = rest.trim_start();
            }
        }
        if let Some(found) = self.error.find(text) {
            if found.start() == 0 && !found.is_empty() {
                text = text[found.end()..].trim_start();
            }
        }
        if text.is_empty() || text == NULL_PLACEHOLDER {
            return None;
        }
        Some(text)
    }
}

impl Default for PromptPatterns {
    fn default() -> Self {
        Self::compile(
            DEFAULT_PROMPT_REGEX,
            DEFAULT_PROMPT_LINE_REGEX,
            DEFAULT_ECHO_REGEX,
            DEFAULT_ERROR_REGEX,
            DEFAULT_ERROR_PREFIX,
        )
        .expect("built-in prompt patterns compile")
    }
}

fn compile_one(name: &str, raw: &str) -> Result<Regex> {
    if raw.is_empty() {
        anyhow::bail!("{name} regex cannot be empty");
    }
    Regex::new(raw).with_context(|| format!("invalid {name} regex: {raw}"))
}
