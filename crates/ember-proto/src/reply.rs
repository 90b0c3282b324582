//! IRCv3 standard replies.
//!
//! `FAIL`, `NOTE` and `WARN` carry a command name, a machine-readable code,
//! optional context parameters and a human description. Only clients that
//! negotiated the `standard-replies` capability receive them; everyone else
//! gets a plain NOTICE fallback carrying the description.

use crate::message::Message;

/// The three standard-reply severities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    Fail,
    Note,
    Warn,
}

impl ReplyKind {
    pub fn as_command(self) -> &'static str {
        match self {
            Self::Fail => "FAIL",
            Self::Note => "NOTE",
            Self::Warn => "WARN",
        }
    }
}

/// A structured standard reply, not yet bound to a recipient.
#[derive(Clone, Debug)]
pub struct StandardReply {
    pub kind: ReplyKind,
    /// The command this reply concerns, or `*` for no command.
    pub command: String,
    /// Machine-readable code, e.g. `ACCOUNT_REQUIRED`.
    pub code: String,
    /// Context parameters between the code and the description.
    pub context: Vec<String>,
    /// Human-readable description.
    pub description: String,
}

impl StandardReply {
    pub fn new(
        kind: ReplyKind,
        command: impl Into<String>,
        code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            command: command.into(),
            code: code.into(),
            context: Vec::new(),
            description: description.into(),
        }
    }

    /// Add a context parameter.
    #[must_use]
    pub fn context(mut self, p: impl Into<String>) -> Self {
        self.context.push(p.into());
        self
    }

    /// The structured form, for `standard-replies` clients.
    pub fn message(&self, server: &str) -> Message {
        let mut msg = Message::cmd(self.kind.as_command())
            .with_source(server)
            .param(&self.command)
            .param(&self.code);
        for p in &self.context {
            msg = msg.param(p);
        }
        msg.trailing_param(&self.description)
    }

    /// The NOTICE fallback, for everyone else.
    pub fn fallback(&self, server: &str, target: &str) -> Message {
        Message::cmd("NOTICE")
            .with_source(server)
            .param(target)
            .trailing_param(format!("*** {}: {}", self.command, self.description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_shape() {
        let reply = StandardReply::new(
            ReplyKind::Fail,
            "JOIN",
            "CHANNEL_BANNED",
            "This channel is closed",
        )
        .context("#bad");
        assert_eq!(
            reply.message("irc.example.net").to_wire(512),
            ":irc.example.net FAIL JOIN CHANNEL_BANNED #bad :This channel is closed\r\n"
        );
    }

    #[test]
    fn fallback_is_notice() {
        let reply = StandardReply::new(ReplyKind::Warn, "REHASH", "CONFIG_STALE", "reload pending");
        let wire = reply.fallback("irc.example.net", "alice").to_wire(512);
        assert!(wire.starts_with(":irc.example.net NOTICE alice :*** REHASH:"));
    }
}
