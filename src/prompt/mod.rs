//! Turning raw terminal output into turns: escape stripping, end-of-turn detection, and
//! classification of a finished turn into output and error text.

mod classify;
mod detector;
mod patterns;
mod strip;

#[cfg(test)]
mod tests;

pub use classify::{classify_output, ClassifiedOutput, Evaluation};
pub use detector::{CompletedTurn, DetectError, OutputSource, PromptDetector};
pub use patterns::PromptPatterns;
pub use strip::{strip_terminal_sequences, TerminalText};
