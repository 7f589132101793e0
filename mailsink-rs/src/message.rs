//! Received messages and the parsed view rules are matched against

use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A message accepted over SMTP and persisted by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub path: PathBuf,
    pub mail_from: String,
    pub recipients: Vec<String>,
    pub size: u64,
}

/// Parsed view of a stored message
///
/// `headers` holds each header's raw text (`Name: value`) with folded
/// continuation lines joined; `text_body` is the decoded text body.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub text_body: String,
}

impl MessageContext {
    pub fn parse(path: &Path, raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let (header_block, body) = split_headers_body(&text);

        let text_body = MessageParser::default()
            .parse(raw)
            .and_then(|message| message.body_text(0).map(|body| body.into_owned()))
            .unwrap_or_else(|| body.to_string());

        Self {
            path: path.to_path_buf(),
            headers: unfold_headers(header_block),
            text_body,
        }
    }

    /// First header with the given name (case-insensitive), value only
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|header| {
            let (field, value) = header.split_once(':')?;
            field
                .trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

fn split_headers_body(message: &str) -> (&str, &str) {
    if let Some(pos) = message.find("\r\n\r\n") {
        (&message[..pos], &message[pos + 4..])
    } else if let Some(pos) = message.find("\n\n") {
        (&message[..pos], &message[pos + 2..])
    } else {
        (message, "")
    }
}

fn unfold_headers(block: &str) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for line in block.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(current) = headers.last_mut() {
                current.push(' ');
                current.push_str(line.trim());
            }
        } else if !line.is_empty() {
            headers.push(line.to_string());
        }
    }
    headers
}
