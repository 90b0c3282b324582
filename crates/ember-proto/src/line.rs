//! Inbound line parsing.
//!
//! Turns one terminator-stripped line into a [`Message`], enforcing the two
//! separate budgets: the configured maximum for the RFC portion (source,
//! command and params) and a fixed 4096-byte budget that applies strictly to
//! the tags segment. Parameter count is not capped; the RFC 1459 limit of 13
//! parameters is deliberately not enforced on input.

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::char,
    sequence::preceded,
    IResult,
};

use crate::message::{Message, Tag};
use crate::tags::unescape_tag_value;

/// Inbound tag-segment budget, bytes, excluding the leading `@`.
pub const MAX_IN_TAG_LENGTH: usize = 4096;

/// Parse-time limits. `max_line` covers the RFC portion including the CRLF
/// the client sent (512 by default, so 510 bytes of content).
#[derive(Clone, Copy, Debug)]
pub struct ParseLimits {
    pub max_line: usize,
    pub max_tags: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_line: 512,
            max_tags: MAX_IN_TAG_LENGTH,
        }
    }
}

/// Why a line could not be parsed. Each variant carries its own penalty and
/// reply policy at the dispatch layer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    /// Nothing but whitespace.
    #[error("empty line")]
    Empty,
    /// The tags segment exceeded its budget.
    #[error("message tags were too long")]
    TagsTooLong,
    /// The RFC portion exceeded the configured line budget.
    #[error("input line was too long")]
    LineTooLong,
    /// Tags or a source prefix with nothing after them.
    #[error("missing command")]
    MissingCommand,
}

fn tags_segment(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_until(" "))(input)
}

fn source_segment(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Split a raw tags segment into [`Tag`]s. Duplicate keys keep the first
/// occurrence; later ones are silently dropped.
fn parse_tags(raw: &str) -> Vec<Tag> {
    let mut tags: Vec<Tag> = Vec::new();
    for item in raw.split(';').filter(|s| !s.is_empty()) {
        let (key, value) = match item.split_once('=') {
            Some((k, v)) => (k, Some(unescape_tag_value(v))),
            None => (item, None),
        };
        if key.is_empty() || tags.iter().any(|t| t.key == key) {
            continue;
        }
        tags.push(Tag::new(key, value));
    }
    tags
}

/// Parse one line into a [`Message`].
///
/// The caller strips the CRLF terminator; stray `\r`/`\n` are tolerated.
pub fn parse_line(input: &str, limits: &ParseLimits) -> Result<Message, LineError> {
    let line = input.trim_end_matches(['\r', '\n']);
    let rest = line.trim_start_matches(' ');
    if rest.is_empty() {
        return Err(LineError::Empty);
    }

    // Tags segment, with its own budget.
    let (rest, raw_tags) = if rest.starts_with('@') {
        let (rest, raw) = tags_segment(rest).map_err(|_| LineError::MissingCommand)?;
        if raw.len() > limits.max_tags {
            return Err(LineError::TagsTooLong);
        }
        (rest.trim_start_matches(' '), Some(raw))
    } else {
        (rest, None)
    };

    // Everything from here on is the RFC portion.
    if rest.len() + 2 > limits.max_line {
        return Err(LineError::LineTooLong);
    }
    if rest.is_empty() {
        return Err(LineError::MissingCommand);
    }

    // Optional source prefix; accepted from anyone, required from no one.
    let (rest, source) = match source_segment(rest) {
        Ok((rest, src)) => (rest.trim_start_matches(' '), Some(src)),
        Err(_) => (rest, None),
    };

    // Command token.
    let (rest, command) =
        take_while1::<_, _, nom::error::Error<&str>>(|c| c != ' ')(rest)
            .map_err(|_| LineError::MissingCommand)?;

    // Middles until a `:` token, which consumes the rest verbatim.
    let mut params = Vec::new();
    let mut trailing = false;
    let mut rest = rest;
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(t) = rest.strip_prefix(':') {
            params.push(t.to_string());
            trailing = true;
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(rest[..end].to_string());
        rest = &rest[end..];
    }

    Ok(Message {
        tags: raw_tags.map(parse_tags).unwrap_or_default(),
        source: source.map(str::to_string),
        command: command.to_ascii_uppercase(),
        params,
        trailing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Message {
        parse_line(s, &ParseLimits::default()).unwrap()
    }

    #[test]
    fn basic_privmsg() {
        let msg = parse(":nick!user@host PRIVMSG #channel :Hello, world!\r\n");
        assert_eq!(msg.source.as_deref(), Some("nick!user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello, world!"]);
        assert!(msg.trailing);
    }

    #[test]
    fn command_is_uppercased() {
        assert_eq!(parse("privmsg #t hi").command, "PRIVMSG");
    }

    #[test]
    fn leading_spaces_skipped() {
        let msg = parse("   PING token");
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["token"]);
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(
            parse_line("   \r\n", &ParseLimits::default()),
            Err(LineError::Empty)
        );
    }

    #[test]
    fn tags_parsed_and_deduplicated() {
        let msg = parse("@time=now;dup=first;dup=second;flag PING :x");
        assert_eq!(msg.tag_value("time"), Some("now"));
        assert_eq!(msg.tag_value("dup"), Some("first"));
        let flag = msg.tags.iter().find(|t| t.key == "flag").unwrap();
        assert!(flag.value.is_none());
        assert_eq!(msg.tags.len(), 3);
    }

    #[test]
    fn tag_values_unescaped() {
        let msg = parse("@key=a\\sb\\:c PING x");
        assert_eq!(msg.tag_value("key"), Some("a b;c"));
    }

    #[test]
    fn tags_without_command_rejected() {
        assert_eq!(
            parse_line("@only=tags", &ParseLimits::default()),
            Err(LineError::MissingCommand)
        );
        assert_eq!(
            parse_line("@only=tags ", &ParseLimits::default()),
            Err(LineError::MissingCommand)
        );
    }

    #[test]
    fn tag_budget_is_separate_from_line_budget() {
        // Tags just under 4096 with a short RFC portion: fine.
        let tags = format!("@k={}", "v".repeat(4000));
        let line = format!("{tags} PING x");
        assert!(parse_line(&line, &ParseLimits::default()).is_ok());

        // Over 4096: rejected no matter how short the rest is.
        let tags = format!("@k={}", "v".repeat(5000));
        let line = format!("{tags} PING x");
        assert_eq!(
            parse_line(&line, &ParseLimits::default()),
            Err(LineError::TagsTooLong)
        );
    }

    #[test]
    fn rfc_budget_excludes_tags() {
        let long = format!("PRIVMSG #t :{}", "x".repeat(600));
        assert_eq!(
            parse_line(&long, &ParseLimits::default()),
            Err(LineError::LineTooLong)
        );
        // The same oversized text is fine if the budget allows it.
        let limits = ParseLimits {
            max_line: 1024,
            ..Default::default()
        };
        assert!(parse_line(&long, &limits).is_ok());
    }

    #[test]
    fn no_param_count_cap() {
        let line = format!("CMD {}", (0..30).map(|i| i.to_string()).collect::<Vec<_>>().join(" "));
        assert_eq!(parse(&line).params.len(), 30);
    }

    #[test]
    fn trailing_may_be_empty_or_contain_colons() {
        let msg = parse("TOPIC #t :");
        assert_eq!(msg.params, vec!["#t", ""]);
        let msg = parse("PRIVMSG #t ::)");
        assert_eq!(msg.params[1], ":)");
    }

    #[test]
    fn round_trip_modulo_normalization() {
        for raw in [
            "PING irc.example.net",
            ":srv 001 alice :Welcome to the Ember IRC Network alice!a@host",
            "@time=2020-01-01T00:00:00Z :a!b@c PRIVMSG #t :hello world",
            "JOIN #a,#b key",
            "TOPIC #t :",
        ] {
            let msg = parse(raw);
            let wire = msg.to_wire(512);
            assert_eq!(wire.strip_suffix("\r\n").unwrap(), raw);
        }
    }
}
