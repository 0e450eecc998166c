//! Prompt construction and answer cleanup.

use crate::context::ContextBundle;
use crate::executor::ExitKind;
use crate::truncate::truncate_middle;
use std::fmt::Write;

/// Builds the system and user prompts for each kind of model call.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    shell: String,
}

impl PromptBuilder {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }

    /// System prompt for generating a command. Declined commands of the
    /// current request are listed so the model avoids them.
    pub fn generation_system_prompt(&self, context: &ContextBundle, declined: &[String]) -> String {
        let mut prompt = format!(
            "You translate natural language requests into shell commands.\n\
             Produce one command, or a short one-line script, that does what the user asks.\n\
             Target the `{}` shell only.\n\
             Never include explanations or commentary.\n\
             Prefer safe commands that do not destroy data or weaken security.\n",
            self.shell
        );
        push_context(&mut prompt, context);
        if !declined.is_empty() {
            prompt.push_str("\nThe user rejected these commands. Do not generate these commands:\n");
            for command in declined {
                let _ = writeln!(prompt, "{command}");
            }
        }
        prompt.push_str("\nRespond with the command and nothing else.");
        prompt
    }

    /// System prompt for repairing a command that failed.
    pub fn fix_system_prompt(&self, context: &ContextBundle) -> String {
        let mut prompt = format!(
            "You repair shell commands that failed.\n\
             Study the failed command, its exit code and its output, then produce a corrected command.\n\
             Target the `{}` shell only.\n\
             Never include explanations or commentary.\n\
             Prefer safe commands that do not destroy data or weaken security.\n",
            self.shell
        );
        push_context(&mut prompt, context);
        prompt.push_str(
            "\nRespond with the corrected command and nothing else. If the failed command cannot be \
             salvaged, write a new one that achieves the original request.",
        );
        prompt
    }

    /// System prompt for explaining a suggested command in plain text.
    pub fn explanation_system_prompt(&self, context: &ContextBundle) -> String {
        let mut prompt = format!(
            "You explain `{}` shell commands in plain text.\n\
             For the command the user gives you, write these sections:\n\
             PURPOSE: what the command is for, in one or two sentences.\n\
             WORKFLOW: how it runs step by step, covering pipes, redirections and control flow.\n\
             BREAKDOWN: every flag, argument and operator with its role.\n\
             RISKS: what could go wrong (data loss, permissions, network effects), or \"No significant risks.\"\n\
             IMPROVEMENTS: safer or faster alternatives, when there are any.\n",
            self.shell
        );
        push_context(&mut prompt, context);
        prompt.push_str(
            "\nDo not use Markdown. Write headings in uppercase followed by a colon and separate \
             sections with a blank line.",
        );
        prompt
    }

    /// User prompt for a fix turn. The command output is bounded to
    /// `max_output_chars`, keeping its head and tail.
    pub fn fix_user_prompt(
        &self,
        intent: &str,
        failed_command: &str,
        exit: &ExitKind,
        output: &str,
        max_output_chars: usize,
    ) -> String {
        let mut prompt = String::from("A command I ran failed and needs fixing.\n");
        let _ = writeln!(prompt, "What I wanted: {intent}");
        let _ = writeln!(prompt, "Command: {failed_command}");
        let _ = writeln!(prompt, "Exit code: {}", exit.code());
        if let ExitKind::Signal(signal) = exit {
            let _ = writeln!(prompt, "The command was killed by signal {signal}.");
        }
        let output = output.trim();
        if output.is_empty() {
            prompt.push_str("The command produced no output.\n");
        } else {
            let _ = writeln!(prompt, "Output:\n{}", truncate_middle(output, max_output_chars));
        }
        prompt.push_str("Give me a command that works.");
        prompt
    }
}

fn push_context(prompt: &mut String, context: &ContextBundle) {
    if context.is_empty() {
        return;
    }
    prompt.push_str("\nSystem context gathered from the user's machine:\n");
    prompt.push_str(&context.render());
}

/// Reduces a model answer to a runnable command.
///
/// Takes the body of the first fenced code block if there is one, strips
/// wrapping backticks and a leading `$ ` prompt marker, and trims
/// surrounding whitespace.
pub fn strip_markdown(answer: &str) -> String {
    let mut text = answer.trim();

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        // Skip the info string (```bash).
        let body = match after.find('\n') {
            Some(nl) => &after[nl + 1..],
            None => after,
        };
        text = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        text = text.trim();
    }

    if text.len() >= 2 && text.starts_with('`') && text.ends_with('`') && !text[1..text.len() - 1].contains('`') {
        text = text[1..text.len() - 1].trim();
    }
    if let Some(rest) = text.strip_prefix("$ ") {
        text = rest.trim_start();
    }
    text.to_string()
}
