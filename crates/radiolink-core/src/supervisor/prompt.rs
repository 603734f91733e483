//! Operator decision points.
//!
//! Terminating another process and picking between several radios are
//! never decided silently; they go through an [`OperatorPrompt`].

use std::io::{BufRead, Write};

use crate::BoxFuture;

/// Asks the operator to decide.
pub trait OperatorPrompt: Send + Sync {
    /// Yes/no question. Only an explicit yes may return `true`.
    fn confirm(&self, question: String) -> BoxFuture<'_, bool>;

    /// Pick one of `options` by index; `None` aborts the selection.
    fn choose(&self, question: String, options: Vec<String>) -> BoxFuture<'_, Option<usize>>;
}

/// Interactive prompt on the controlling terminal.
pub struct StdinPrompt;

impl StdinPrompt {
    fn ask(question: String) -> BoxFuture<'static, Option<String>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut stdout = std::io::stdout().lock();
                write!(stdout, "{question} ").ok()?;
                stdout.flush().ok()?;
                let mut line = String::new();
                std::io::stdin().lock().read_line(&mut line).ok()?;
                Some(line.trim().to_string())
            })
            .await
            .ok()
            .flatten()
        })
    }
}

impl OperatorPrompt for StdinPrompt {
    fn confirm(&self, question: String) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let answer = Self::ask(format!("{question} [y/N]")).await;
            answer.as_deref().is_some_and(is_yes)
        })
    }

    fn choose(&self, question: String, options: Vec<String>) -> BoxFuture<'_, Option<usize>> {
        Box::pin(async move {
            let mut listing = String::new();
            for (i, option) in options.iter().enumerate() {
                listing.push_str(&format!("{i}: {option}\n"));
            }
            let answer = Self::ask(format!("{listing}{question}")).await?;
            answer.parse::<usize>().ok().filter(|i| *i < options.len())
        })
    }
}

/// Declines every question; for unattended runs.
pub struct DenyAll;

impl OperatorPrompt for DenyAll {
    fn confirm(&self, _question: String) -> BoxFuture<'_, bool> {
        Box::pin(async { false })
    }

    fn choose(&self, _question: String, _options: Vec<String>) -> BoxFuture<'_, Option<usize>> {
        Box::pin(async { None })
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}
