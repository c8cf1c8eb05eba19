//! The human-in-the-loop gate in front of destructive operations.

use std::collections::VecDeque;
use tracing::info;

/// Literal text the operator must type as the second hard-reset confirmation.
pub const HARD_RESET_PHRASE: &str = "DELETE";

/// Capability the orchestrator calls for confirmations and notices.
///
/// Implementations may block indefinitely waiting for an answer; there is no
/// timeout. Any answer that cannot be obtained must count as a decline.
pub trait Operator {
    /// Ask a yes/no question.
    fn confirm(&mut self, prompt: &str) -> bool;

    /// Ask the operator to type `expected` exactly.
    fn confirm_typed(&mut self, prompt: &str, expected: &str) -> bool;

    /// Tell the operator something they must see before the next step runs.
    fn notify(&mut self, message: &str) {
        info!("{message}");
    }
}

/// Approves everything. For automation that has confirmed out of band.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Operator for AcceptAll {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }

    fn confirm_typed(&mut self, _prompt: &str, _expected: &str) -> bool {
        true
    }
}

/// Answers prompts from a fixed script and records what it was asked.
///
/// Yes/no prompts accept `y` or `yes` (any case); typed prompts compare the
/// answer verbatim. Once the script runs out every prompt is declined.
#[derive(Debug, Default, Clone)]
pub struct ScriptedOperator {
    answers: VecDeque<String>,
    pub prompts: Vec<String>,
    pub notices: Vec<String>,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
            notices: Vec::new(),
        }
    }

    fn next_answer(&mut self, prompt: &str) -> Option<String> {
        self.prompts.push(prompt.to_owned());
        self.answers.pop_front()
    }
}

pub(crate) fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

impl Operator for ScriptedOperator {
    fn confirm(&mut self, prompt: &str) -> bool {
        self.next_answer(prompt).is_some_and(|a| is_affirmative(&a))
    }

    fn confirm_typed(&mut self, prompt: &str, expected: &str) -> bool {
        self.next_answer(prompt).is_some_and(|a| a.trim() == expected)
    }

    fn notify(&mut self, message: &str) {
        self.notices.push(message.to_owned());
    }
}
