//! Token streams over IRC-style text.
//!
//! Three small cursors used throughout the daemon:
//!
//! - [`SepStream`]: substrings separated by a single character, with or
//!   without empty tokens (`a,,b`).
//! - [`TokenStream`]: IRC "middle" parameters followed by an optional
//!   trailing parameter introduced by ` :`.
//! - [`PortRange`]: `6660,6665-6669,7000` into individual ports.

/// Yields substrings of `source` separated by `sep`.
#[derive(Debug, Clone)]
pub struct SepStream<'a> {
    rest: Option<&'a str>,
    sep: char,
    allow_empty: bool,
}

impl<'a> SepStream<'a> {
    /// Create a stream over `source` split on `sep`.
    ///
    /// When `allow_empty` is false, consecutive separators collapse and
    /// empty tokens are skipped.
    pub fn new(source: &'a str, sep: char, allow_empty: bool) -> Self {
        Self {
            rest: Some(source),
            sep,
            allow_empty,
        }
    }
}

impl<'a> Iterator for SepStream<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            let rest = self.rest?;
            let (tok, next) = match rest.find(self.sep) {
                Some(idx) => (&rest[..idx], Some(&rest[idx + self.sep.len_utf8()..])),
                None => (rest, None),
            };
            self.rest = next;
            if tok.is_empty() && !self.allow_empty {
                if next.is_none() {
                    return None;
                }
                continue;
            }
            return Some(tok);
        }
    }
}

/// Yields IRC middle parameters, then a trailing parameter.
///
/// A token beginning with `:` consumes the rest of the input verbatim.
#[derive(Debug, Clone)]
pub struct TokenStream<'a> {
    rest: &'a str,
}

impl<'a> TokenStream<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { rest: source }
    }

    /// Whatever input has not been consumed yet.
    pub fn remainder(&self) -> &'a str {
        self.rest
    }
}

impl<'a> Iterator for TokenStream<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start_matches(' ');
        if self.rest.is_empty() {
            return None;
        }
        if let Some(trailing) = self.rest.strip_prefix(':') {
            self.rest = "";
            return Some(trailing);
        }
        let end = self.rest.find(' ').unwrap_or(self.rest.len());
        let tok = &self.rest[..end];
        self.rest = &self.rest[end..];
        Some(tok)
    }
}

/// Errors from [`PortRange`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortRangeError {
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("inverted range {0}-{1}")]
    InvertedRange(u16, u16),
    #[error("port {0} listed more than once")]
    Overlap(u16),
}

/// Parse a port list such as `6660,6665-6669,7000`.
///
/// With `reject_overlaps`, a port mentioned twice is an error.
pub fn parse_ports(spec: &str, reject_overlaps: bool) -> Result<Vec<u16>, PortRangeError> {
    let mut out = Vec::new();
    let mut seen = [false; 65536];
    for item in SepStream::new(spec, ',', false) {
        let (lo, hi) = match item.split_once('-') {
            Some((a, b)) => {
                let lo = a
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| PortRangeError::InvalidPort(a.to_string()))?;
                let hi = b
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| PortRangeError::InvalidPort(b.to_string()))?;
                if lo > hi {
                    return Err(PortRangeError::InvertedRange(lo, hi));
                }
                (lo, hi)
            }
            None => {
                let p = item
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| PortRangeError::InvalidPort(item.to_string()))?;
                (p, p)
            }
        };
        for port in lo..=hi {
            if seen[port as usize] {
                if reject_overlaps {
                    return Err(PortRangeError::Overlap(port));
                }
                continue;
            }
            seen[port as usize] = true;
            out.push(port);
        }
    }
    Ok(out)
}

/// Alias kept for symmetry with the other streams.
pub type PortRange = Vec<u16>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sepstream_skips_empty_by_default() {
        let toks: Vec<_> = SepStream::new("a,,b,c,", ',', false).collect();
        assert_eq!(toks, vec!["a", "b", "c"]);
    }

    #[test]
    fn sepstream_keeps_empty_when_asked() {
        let toks: Vec<_> = SepStream::new("a,,b,", ',', true).collect();
        assert_eq!(toks, vec!["a", "", "b", ""]);
    }

    #[test]
    fn sepstream_empty_input() {
        assert_eq!(SepStream::new("", ',', false).count(), 0);
        let toks: Vec<_> = SepStream::new("", ',', true).collect();
        assert_eq!(toks, vec![""]);
    }

    #[test]
    fn tokenstream_middles_then_trailing() {
        let toks: Vec<_> = TokenStream::new("KICK #chan nick :go away now").collect();
        assert_eq!(toks, vec!["KICK", "#chan", "nick", "go away now"]);
    }

    #[test]
    fn tokenstream_collapses_spaces() {
        let toks: Vec<_> = TokenStream::new("  a   b  :c  d ").collect();
        assert_eq!(toks, vec!["a", "b", "c  d "]);
    }

    #[test]
    fn tokenstream_trailing_may_be_empty() {
        let toks: Vec<_> = TokenStream::new("TOPIC #chan :").collect();
        assert_eq!(toks, vec!["TOPIC", "#chan", ""]);
    }

    #[test]
    fn ports_singles_and_ranges() {
        assert_eq!(
            parse_ports("6660,6665-6667,7000", false).unwrap(),
            vec![6660, 6665, 6666, 6667, 7000]
        );
    }

    #[test]
    fn ports_overlap_detection() {
        assert_eq!(
            parse_ports("6660,6660", true),
            Err(PortRangeError::Overlap(6660))
        );
        // Without rejection the duplicate is simply dropped.
        assert_eq!(parse_ports("6660,6660", false).unwrap(), vec![6660]);
    }

    #[test]
    fn ports_bad_input() {
        assert!(matches!(
            parse_ports("666x", false),
            Err(PortRangeError::InvalidPort(_))
        ));
        assert_eq!(
            parse_ports("7000-6000", false),
            Err(PortRangeError::InvertedRange(7000, 6000))
        );
    }
}
