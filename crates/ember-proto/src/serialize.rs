//! Wire serialization.
//!
//! One place assembles tags, source, command and parameters according to the
//! RFC grammar; nothing else in the tree concatenates protocol text. The
//! tags segment has its own budget (whole tags that do not fit are dropped);
//! the RFC segment is truncated to `max_line - 2` bytes before CRLF is
//! appended, so a line never exceeds `max_line` bytes past the tags.

use crate::message::Message;
use crate::tags::escape_tag_value;

/// Maximum size of the serialized tags segment, including the `@` and the
/// trailing space.
pub const MAX_OUT_TAG_LENGTH: usize = 512;

/// Serialize the tags segment. Tags that would push the segment over budget
/// are dropped whole.
fn serialize_tags(msg: &Message, line: &mut String) {
    let mut prefix = '@';
    for tag in &msg.tags {
        let prev = line.len();
        line.push(prefix);
        line.push_str(&tag.key);
        if let Some(value) = &tag.value {
            if !value.is_empty() {
                line.push('=');
                line.push_str(&escape_tag_value(value));
            }
        }
        // One byte is reserved for the space after the last tag.
        if line.len() > MAX_OUT_TAG_LENGTH - 1 {
            line.truncate(prev);
            break;
        }
        prefix = ';';
    }
    if !line.is_empty() {
        line.push(' ');
    }
}

/// Does this parameter require trailing form?
fn needs_trailing(param: &str) -> bool {
    param.is_empty() || param.starts_with(':') || param.contains(' ')
}

/// Append the RFC portion (source, command, params) to `line`.
fn serialize_rfc(msg: &Message, line: &mut String) {
    if let Some(source) = &msg.source {
        line.push(':');
        line.push_str(source);
        line.push(' ');
    }
    line.push_str(&msg.command);
    if let Some((last, middles)) = msg.params.split_last() {
        for param in middles {
            line.push(' ');
            line.push_str(param);
        }
        if msg.trailing || needs_trailing(last) {
            line.push_str(" :");
        } else {
            line.push(' ');
        }
        line.push_str(last);
    }
}

/// The full line without truncation or CRLF, for logging.
pub fn to_line(msg: &Message) -> String {
    let mut line = String::new();
    serialize_tags(msg, &mut line);
    serialize_rfc(msg, &mut line);
    line
}

/// The wire form: tags, truncated RFC segment, CRLF.
pub fn to_wire(msg: &Message, max_line: usize) -> String {
    let mut line = String::new();
    serialize_tags(msg, &mut line);
    let rfc_begin = line.len();
    serialize_rfc(msg, &mut line);

    let max_rfc = max_line.saturating_sub(2);
    if line.len() - rfc_begin > max_rfc {
        let mut cut = rfc_begin + max_rfc;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
    }
    line.push_str("\r\n");
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn simple_line() {
        let msg = Message::cmd("PING").param("irc.example.net");
        assert_eq!(to_wire(&msg, 512), "PING irc.example.net\r\n");
    }

    #[test]
    fn trailing_forms() {
        let msg = Message::cmd("PRIVMSG")
            .with_source("alice!a@h")
            .param("#test")
            .trailing_param("hi");
        assert_eq!(to_wire(&msg, 512), ":alice!a@h PRIVMSG #test :hi\r\n");

        // Spaces force trailing even without the flag.
        let msg = Message::cmd("TOPIC").param("#test").param("two words");
        assert_eq!(to_wire(&msg, 512), "TOPIC #test :two words\r\n");

        // Empty final params must be trailing to survive the round trip.
        let msg = Message::cmd("TOPIC").param("#test").param("");
        assert_eq!(to_wire(&msg, 512), "TOPIC #test :\r\n");
    }

    #[test]
    fn tags_before_source() {
        let msg = Message::cmd("PRIVMSG")
            .with_tag("time", Some("2020-01-01T00:00:00Z".into()))
            .with_source("srv")
            .param("#t")
            .trailing_param("x");
        assert_eq!(
            to_wire(&msg, 512),
            "@time=2020-01-01T00:00:00Z :srv PRIVMSG #t :x\r\n"
        );
    }

    #[test]
    fn tag_values_escaped() {
        let msg = Message::cmd("TAGMSG")
            .with_tag("+draft/reply", Some("a b;c".into()))
            .param("#t");
        assert_eq!(to_wire(&msg, 512), "@+draft/reply=a\\sb\\:c TAGMSG #t\r\n");
    }

    #[test]
    fn rfc_truncation_excludes_tags() {
        let long = "x".repeat(600);
        let msg = Message::cmd("PRIVMSG")
            .with_tag("time", Some("t".into()))
            .param("#t")
            .trailing_param(long);
        let wire = to_wire(&msg, 512);
        let rfc = wire.strip_prefix("@time=t ").unwrap();
        assert_eq!(rfc.len(), 512); // 510 + CRLF
        assert!(rfc.ends_with("\r\n"));
    }

    #[test]
    fn oversize_tags_dropped_whole() {
        let mut msg = Message::cmd("PING").param("x");
        msg = msg.with_tag("small", Some("1".into()));
        msg = msg.with_tag("big", Some("v".repeat(600)));
        msg = msg.with_tag("after", Some("2".into()));
        let wire = to_wire(&msg, 512);
        assert!(wire.starts_with("@small=1 PING"));
        assert!(!wire.contains("big"));
        // Dropping a tag stops serialization of the remainder.
        assert!(!wire.contains("after"));
    }
}
