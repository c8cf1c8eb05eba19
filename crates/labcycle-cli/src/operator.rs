use console::Style;
use dialoguer::{Confirm, Input};
use labcycle_core::Operator;
use std::io::{stderr, stdin, BufRead, IsTerminal, Write};

/// Asks the person at the terminal.
///
/// With a TTY the prompts go through dialoguer. Without one, answers are read
/// line by line from stdin; end of input declines.
pub struct TerminalOperator {
    interactive: bool,
}

impl TerminalOperator {
    pub fn new() -> Self {
        Self {
            interactive: stdin().is_terminal() && stderr().is_terminal(),
        }
    }

    fn read_line(prompt: &str) -> Option<String> {
        eprint!("{prompt} ");
        let _ = stderr().flush();
        let mut line = String::new();
        match stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_owned()),
        }
    }
}

impl Operator for TerminalOperator {
    fn confirm(&mut self, prompt: &str) -> bool {
        if self.interactive {
            return Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .unwrap_or(false);
        }
        Self::read_line(&format!("{prompt} [y/N]"))
            .is_some_and(|a| matches!(a.to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn confirm_typed(&mut self, prompt: &str, expected: &str) -> bool {
        if self.interactive {
            return Input::<String>::new()
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
                .is_ok_and(|a| a.trim() == expected);
        }
        Self::read_line(&format!("{prompt}:")).is_some_and(|a| a == expected)
    }

    fn notify(&mut self, message: &str) {
        eprintln!("{}", Style::new().bold().apply_to(message));
    }
}

/// Answers yes/no prompts with yes and forwards everything else.
pub struct PreApproved<O>(pub O);

impl<O: Operator> Operator for PreApproved<O> {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }

    fn confirm_typed(&mut self, prompt: &str, expected: &str) -> bool {
        self.0.confirm_typed(prompt, expected)
    }

    fn notify(&mut self, message: &str) {
        self.0.notify(message);
    }
}
