//! Splits one turn's de-escaped output into program output and error text.

use super::patterns::PromptPatterns;

/// Lines of a single turn, sorted into the two streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedOutput {
    pub stdout: Vec<String>,
    pub errors: Vec<String>,
}

/// What a turn evaluated to, ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Success {
        stdout: String,
        value: String,
    },
    Failure {
        stdout: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl Evaluation {
    pub fn is_failure(&self) -> bool {
        matches!(self, Evaluation::Failure { .. })
    }
}

impl ClassifiedOutput {
    /// Joined stdout; every kept line is newline-terminated.
    pub fn stdout_text(&self) -> String {
        let mut out = String::with_capacity(self.stdout.iter().map(|l| l.len() + 1).sum());
        for line in &self.stdout {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn into_evaluation(self) -> Evaluation {
        let stdout = self.stdout_text();
        match self.errors.first() {
            None => Evaluation::Success {
                stdout,
                value: String::new(),
            },
            Some(first) => Evaluation::Failure {
                stdout,
                evalue: first.clone(),
                traceback: self.errors,
            },
        }
    }
}

/// Walk the turn line by line. Once a line (after its prompt prefix is removed) matches
/// the error pattern, every later non-prompt line of the turn is error text as well.
pub fn classify_output(text: &str, patterns: &PromptPatterns) -> ClassifiedOutput {
    let mut classified = ClassifiedOutput::default();
    let mut in_error = false;

    for raw in text.split('\n') {
        let line: String = raw.chars().filter(|c| *c != '\r').collect();
        if line.trim().is_empty() {
            continue;
        }
        let content = patterns.strip_prompt_prefix(&line);
        if patterns.is_error_line(content) {
            in_error = true;
            push_error(&mut classified, patterns, content);
            continue;
        }
        if patterns.is_prompt_line(&line) {
            continue;
        }
        if in_error {
            push_error(&mut classified, patterns, &line);
            continue;
        }
        classified.stdout.push(line);
    }
    classified
}

fn push_error(classified: &mut ClassifiedOutput, patterns: &PromptPatterns, line: &str) {
    if let Some(text) = patterns.error_text(line) {
        classified.errors.push(text.to_string());
    }
}
