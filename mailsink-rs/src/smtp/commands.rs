//! SMTP command dispatch chain
//!
//! Each logical line is split into `VERB [args]` and offered to the handlers
//! in registration order; the first handler that claims the verb produces the
//! reply and every later handler is skipped.
//!
//! Ordering policy is strict: `RCPT` needs an open `MAIL` transaction,
//! `DATA` needs at least one recipient and a second `MAIL` inside an open
//! transaction is refused. `HELO`/`EHLO` is not required before `MAIL`.

use crate::smtp::reply::SmtpReply;
use crate::smtp::session::SmtpSession;
use tracing::{debug, info};

/// Maximum number of recipients per message
pub const MAX_RECIPIENTS: usize = 100;

/// The closed set of command handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// HELO / EHLO
    Greeting,
    MailFrom,
    RcptTo,
    Data,
    Reset,
    Noop,
    Verify,
    Help,
    Quit,
}

impl CommandKind {
    pub fn default_verbs(&self) -> &'static [&'static str] {
        match self {
            CommandKind::Greeting => &["HELO", "EHLO"],
            CommandKind::MailFrom => &["MAIL"],
            CommandKind::RcptTo => &["RCPT"],
            CommandKind::Data => &["DATA"],
            CommandKind::Reset => &["RSET"],
            CommandKind::Noop => &["NOOP"],
            CommandKind::Verify => &["VRFY"],
            CommandKind::Help => &["HELP"],
            CommandKind::Quit => &["QUIT"],
        }
    }
}

/// What the protocol should do once the reply has been sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    /// Switch to raw DATA capture until the `.` line
    CaptureData,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: SmtpReply,
    pub next: Next,
}

impl CommandOutcome {
    fn reply(reply: SmtpReply) -> Self {
        Self {
            reply,
            next: Next::Continue,
        }
    }
}

/// Result of offering a line to one handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// The handler claimed and processed the line
    Done(CommandOutcome),
    /// Not this handler's verb; try the next one
    Continue,
}

/// Everything a handler may read or mutate
pub struct CommandContext<'a> {
    pub session: &'a mut SmtpSession,
    pub hostname: &'a str,
    pub max_message_size: usize,
}

#[derive(Debug, Clone)]
pub struct CommandHandler {
    kind: CommandKind,
    verbs: Vec<&'static str>,
}

impl CommandHandler {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            verbs: kind.default_verbs().to_vec(),
        }
    }

    /// Handler for `kind` answering to a custom verb list
    pub fn with_verbs(kind: CommandKind, verbs: &[&'static str]) -> Self {
        Self {
            kind,
            verbs: verbs.to_vec(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn matches(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v.eq_ignore_ascii_case(verb))
    }

    pub fn execute(&self, verb: &str, args: &str, ctx: &mut CommandContext<'_>) -> Execution {
        if !self.matches(verb) {
            return Execution::Continue;
        }

        let outcome = match self.kind {
            CommandKind::Greeting => greeting(verb, args, ctx),
            CommandKind::MailFrom => mail_from(args, ctx),
            CommandKind::RcptTo => rcpt_to(args, ctx),
            CommandKind::Data => data(ctx),
            CommandKind::Reset => {
                ctx.session.reset();
                CommandOutcome::reply(SmtpReply::ok())
            }
            CommandKind::Noop => CommandOutcome::reply(SmtpReply::ok()),
            CommandKind::Verify => CommandOutcome::reply(SmtpReply::new(
                252,
                "Cannot VRFY user, but will accept message and attempt delivery",
            )),
            CommandKind::Help => CommandOutcome::reply(SmtpReply::new(
                214,
                "Commands: HELO EHLO MAIL RCPT DATA RSET NOOP VRFY HELP QUIT",
            )),
            CommandKind::Quit => CommandOutcome {
                reply: SmtpReply::closing(ctx.hostname),
                next: Next::Quit,
            },
        };

        Execution::Done(outcome)
    }
}

/// Which handler (if any) claimed a line, and its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub handler: Option<usize>,
    pub outcome: CommandOutcome,
}

/// Ordered handler table
#[derive(Debug, Clone)]
pub struct CommandChain {
    handlers: Vec<CommandHandler>,
}

impl Default for CommandChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl CommandChain {
    pub fn new(handlers: Vec<CommandHandler>) -> Self {
        Self { handlers }
    }

    /// The full SMTP verb set
    pub fn standard() -> Self {
        Self::new(
            [
                CommandKind::Greeting,
                CommandKind::MailFrom,
                CommandKind::RcptTo,
                CommandKind::Data,
                CommandKind::Reset,
                CommandKind::Noop,
                CommandKind::Verify,
                CommandKind::Help,
                CommandKind::Quit,
            ]
            .into_iter()
            .map(CommandHandler::new)
            .collect(),
        )
    }

    pub fn handlers(&self) -> &[CommandHandler] {
        &self.handlers
    }

    pub fn dispatch(&self, line: &str, ctx: &mut CommandContext<'_>) -> Dispatched {
        let (verb, args) = split_verb(line);

        for (index, handler) in self.handlers.iter().enumerate() {
            if let Execution::Done(outcome) = handler.execute(verb, args, ctx) {
                debug!("{} -> {}", verb, outcome.reply.code);
                return Dispatched {
                    handler: Some(index),
                    outcome,
                };
            }
        }

        debug!("Unrecognized command: {}", verb);
        Dispatched {
            handler: None,
            outcome: CommandOutcome::reply(SmtpReply::unrecognized()),
        }
    }
}

/// Split a line into its verb and the (trimmed) remainder
pub fn split_verb(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    match line.split_once(' ') {
        Some((verb, args)) => (verb, args.trim()),
        None => (line.trim_end(), ""),
    }
}

fn greeting(verb: &str, args: &str, ctx: &mut CommandContext<'_>) -> CommandOutcome {
    let domain = args.split_whitespace().next().unwrap_or("");
    if domain.is_empty() {
        return CommandOutcome::reply(SmtpReply::syntax_error("domain required"));
    }

    info!("{} from {}", verb.to_ascii_uppercase(), domain);
    ctx.session.helo = Some(domain.to_string());
    ctx.session.reset();

    let banner = format!("{} Hello {}", ctx.hostname, domain);
    let reply = if verb.eq_ignore_ascii_case("EHLO") {
        SmtpReply::multiline(
            250,
            vec![
                banner,
                "8BITMIME".to_string(),
                "SMTPUTF8".to_string(),
                format!("SIZE {}", ctx.max_message_size),
                "HELP".to_string(),
            ],
        )
    } else {
        SmtpReply::new(250, banner)
    };

    CommandOutcome::reply(reply)
}

fn mail_from(args: &str, ctx: &mut CommandContext<'_>) -> CommandOutcome {
    if ctx.session.has_sender() {
        return CommandOutcome::reply(SmtpReply::bad_sequence());
    }

    let Some(rest) = strip_prefix_ignore_case(args, "FROM:") else {
        return CommandOutcome::reply(SmtpReply::syntax_error("expected FROM:<address>"));
    };
    let Some((address, params)) = parse_path(rest) else {
        return CommandOutcome::reply(SmtpReply::syntax_error("malformed reverse-path"));
    };

    let mut use_utf8 = false;
    for param in params.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        if key.eq_ignore_ascii_case("SMTPUTF8")
            || (key.eq_ignore_ascii_case("BODY") && value.eq_ignore_ascii_case("8BITMIME"))
        {
            use_utf8 = true;
        } else if key.eq_ignore_ascii_case("SIZE") {
            match value.parse::<usize>() {
                Ok(size) if size > ctx.max_message_size => {
                    return CommandOutcome::reply(SmtpReply::new(
                        552,
                        format!("Message size exceeds limit of {} bytes", ctx.max_message_size),
                    ));
                }
                Ok(_) => {}
                Err(_) => return CommandOutcome::reply(SmtpReply::syntax_error("invalid SIZE")),
            }
        }
    }

    info!("MAIL FROM: <{}>", address);
    ctx.session.mail_from = Some(address.to_string());
    ctx.session.use_utf8 = use_utf8;
    CommandOutcome::reply(SmtpReply::ok())
}

fn rcpt_to(args: &str, ctx: &mut CommandContext<'_>) -> CommandOutcome {
    if !ctx.session.has_sender() {
        return CommandOutcome::reply(SmtpReply::bad_sequence());
    }

    let Some(rest) = strip_prefix_ignore_case(args, "TO:") else {
        return CommandOutcome::reply(SmtpReply::syntax_error("expected TO:<address>"));
    };
    let address = match parse_path(rest) {
        Some((address, _)) if !address.is_empty() => address,
        _ => return CommandOutcome::reply(SmtpReply::syntax_error("malformed forward-path")),
    };

    if ctx.session.recipients.len() >= MAX_RECIPIENTS {
        return CommandOutcome::reply(SmtpReply::new(
            452,
            format!("Too many recipients (max {})", MAX_RECIPIENTS),
        ));
    }

    info!("RCPT TO: <{}>", address);
    ctx.session.recipients.push(address.to_string());
    CommandOutcome::reply(SmtpReply::ok())
}

fn data(ctx: &mut CommandContext<'_>) -> CommandOutcome {
    if !ctx.session.has_sender() || !ctx.session.has_recipients() {
        return CommandOutcome::reply(SmtpReply::bad_sequence());
    }

    ctx.session.message.clear();
    CommandOutcome {
        reply: SmtpReply::start_data(),
        next: Next::CaptureData,
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| text[prefix.len()..].trim_start())
}

/// Parse `<address> params...` (angle brackets optional)
fn parse_path(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('<') {
        let end = inner.find('>')?;
        Some((inner[..end].trim(), inner[end + 1..].trim()))
    } else {
        let mut parts = text.splitn(2, char::is_whitespace);
        let address = parts.next().filter(|a| !a.is_empty())?;
        Some((address, parts.next().unwrap_or("").trim()))
    }
}
