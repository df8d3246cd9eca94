//! Human-in-the-loop gate
//!
//! Each calibration step waits on an [`Operator`] before it runs.

use async_trait::async_trait;
use colored::*;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, warn};

/// Operator's answer to a gate prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Proceed,
    Abort,
}

#[async_trait]
pub trait Operator: Send {
    /// Block until the operator confirms physical readiness or aborts
    async fn acknowledge(&mut self, prompt: &str) -> Acknowledgement;
}

/// Interactive operator on the controlling terminal
#[derive(Debug, Default)]
pub struct ConsoleOperator;

#[async_trait]
impl Operator for ConsoleOperator {
    async fn acknowledge(&mut self, prompt: &str) -> Acknowledgement {
        println!("\n{} {}", "▶".cyan(), prompt);
        let line_prompt = format!("{} ", "Press ENTER when ready (q to abort):".bold());

        let answer = tokio::task::spawn_blocking(move || {
            let mut editor = DefaultEditor::new()?;
            editor.readline(&line_prompt)
        })
        .await;

        match answer {
            Ok(Ok(line)) if line.trim().eq_ignore_ascii_case("q") => {
                debug!("ConsoleOperator::acknowledge: operator aborted");
                Acknowledgement::Abort
            }
            Ok(Ok(_)) => Acknowledgement::Proceed,
            Ok(Err(ReadlineError::Interrupted | ReadlineError::Eof)) => {
                debug!("ConsoleOperator::acknowledge: input closed");
                Acknowledgement::Abort
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read operator input");
                Acknowledgement::Abort
            }
            Err(e) => {
                warn!(error = %e, "Operator prompt task failed");
                Acknowledgement::Abort
            }
        }
    }
}

/// Confirms every prompt immediately, keeping a transcript
#[derive(Debug, Default)]
pub struct AutoConfirm {
    prompts: Vec<String>,
}

impl AutoConfirm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

#[async_trait]
impl Operator for AutoConfirm {
    async fn acknowledge(&mut self, prompt: &str) -> Acknowledgement {
        debug!(%prompt, "AutoConfirm::acknowledge: called");
        self.prompts.push(prompt.to_string());
        Acknowledgement::Proceed
    }
}

/// Lets the given operator handle the first `remaining` prompts, then aborts
#[derive(Debug)]
pub struct AbortAfter<O> {
    inner: O,
    remaining: usize,
}

impl<O: Operator> AbortAfter<O> {
    pub fn new(inner: O, remaining: usize) -> Self {
        Self { inner, remaining }
    }
}

#[async_trait]
impl<O: Operator> Operator for AbortAfter<O> {
    async fn acknowledge(&mut self, prompt: &str) -> Acknowledgement {
        if self.remaining == 0 {
            return Acknowledgement::Abort;
        }
        self.remaining -= 1;
        self.inner.acknowledge(prompt).await
    }
}
