//! The owned IRC message type.
//!
//! A [`Message`] is the parsed form of one protocol line: optional IRCv3
//! tags, an optional source, the command, and its parameters. Handlers and
//! the router build messages with the constructors here; only the
//! serializer ever produces wire text.

use std::fmt;

use crate::serialize;

/// An IRCv3 message tag. Duplicate keys are resolved at parse time
/// (first occurrence wins).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// Tag key, including any `+` client-only prefix.
    pub key: String,
    /// Unescaped value, if present.
    pub value: Option<String>,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Client-only tags are prefixed with `+` and relayed, never interpreted.
    pub fn is_client_only(&self) -> bool {
        self.key.starts_with('+')
    }
}

/// An owned IRC message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 tags, in wire order.
    pub tags: Vec<Tag>,
    /// Source prefix without the leading `:` (`nick!user@host` or a server name).
    pub source: Option<String>,
    /// Command name, uppercased.
    pub command: String,
    /// Middle parameters followed by the optional trailing parameter.
    pub params: Vec<String>,
    /// Whether the final parameter was (or must be) sent in `:`-trailing form.
    pub trailing: bool,
}

impl Message {
    /// Start a message with no source.
    pub fn cmd(command: impl Into<String>) -> Self {
        Self {
            tags: Vec::new(),
            source: None,
            command: command.into(),
            params: Vec::new(),
            trailing: false,
        }
    }

    /// Set the source prefix.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Append a middle parameter.
    #[must_use]
    pub fn param(mut self, p: impl Into<String>) -> Self {
        self.params.push(p.into());
        self
    }

    /// Append the final parameter in trailing form. Must be last.
    #[must_use]
    pub fn trailing_param(mut self, p: impl Into<String>) -> Self {
        self.params.push(p.into());
        self.trailing = true;
        self
    }

    /// Attach a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// Look up a tag value by key.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .and_then(|t| t.value.as_deref())
    }

    /// The final parameter, if any.
    pub fn last_param(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Wire form including tags, truncation and CRLF; see [`serialize`].
    pub fn to_wire(&self, max_line: usize) -> String {
        serialize::to_wire(self, max_line)
    }
}

impl fmt::Display for Message {
    /// Log-friendly form: the wire line without truncation or CRLF.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize::to_line(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_shape() {
        let msg = Message::cmd("PRIVMSG")
            .with_source("alice!a@host")
            .param("#test")
            .trailing_param("hello there");
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#test", "hello there"]);
        assert!(msg.trailing);
    }

    #[test]
    fn tag_lookup() {
        let msg = Message::cmd("PING").with_tag("time", Some("x".into()));
        assert_eq!(msg.tag_value("time"), Some("x"));
        assert_eq!(msg.tag_value("msgid"), None);
    }

    #[test]
    fn client_only_tags() {
        assert!(Tag::new("+typing", None).is_client_only());
        assert!(!Tag::new("time", None).is_client_only());
    }
}
