//! External process invocation for `InvokeProcess` rules

use crate::error::{Result, SinkError};
use crate::rules::types::InvokeProcessRule;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Token replaced by the stored message path
pub const MESSAGE_PATH_TOKEN: &str = "%e";

/// Split a command line into arguments, honouring single and double quotes
pub fn split_arguments(command_line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in command_line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        args.push(current);
    }
    args
}

/// Arguments for one invocation, with `%e` substituted in every argument
///
/// Substitution happens after splitting, so paths containing spaces stay a
/// single argument.
pub fn expand_arguments(command_line: &str, message_path: &Path) -> Vec<String> {
    let path = message_path.to_string_lossy();
    split_arguments(command_line)
        .into_iter()
        .map(|arg| arg.replace(MESSAGE_PATH_TOKEN, &path))
        .collect()
}

/// Run the rule's process for one message and wait for it to exit
pub async fn invoke(rule: &InvokeProcessRule, message_path: &Path) -> Result<()> {
    let args = expand_arguments(&rule.command_line, message_path);
    debug!("Invoking {} {:?}", rule.process_path.display(), args);

    let status = Command::new(&rule.process_path)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| {
            SinkError::Process(format!(
                "failed to start {}: {}",
                rule.process_path.display(),
                e
            ))
        })?;

    if !status.success() {
        return Err(SinkError::Process(format!(
            "{} exited with {}",
            rule.process_path.display(),
            status
        )));
    }

    info!(
        "Process {} completed for {}",
        rule.process_path.display(),
        message_path.display()
    );
    Ok(())
}
