//! UID allocation.
//!
//! A UID is the server id followed by six alphanumeric characters
//! (`[A-Z][A-Z0-9]{5}` after the SID, incremented with carry), unique across
//! the federation because the SID prefix is unique per server.

/// Sequential UID generator.
#[derive(Debug, Clone)]
pub struct UidGenerator {
    sid: String,
    current: [u8; 6],
}

impl UidGenerator {
    pub fn new(sid: &str) -> Self {
        Self {
            sid: sid.to_string(),
            current: [b'A'; 6],
        }
    }

    /// Allocate the next UID.
    pub fn next_uid(&mut self) -> String {
        let uid = format!(
            "{}{}",
            self.sid,
            std::str::from_utf8(&self.current).unwrap_or("AAAAAA")
        );
        self.increment();
        uid
    }

    /// Increment the suffix with carry; digits follow letters so the first
    /// UID is `AAAAAA` and the last is `99999Z`-style wraparound.
    fn increment(&mut self) {
        for i in (0..6).rev() {
            match self.current[i] {
                b'Z' => {
                    self.current[i] = b'0';
                    return;
                }
                b'9' => {
                    // Carry into the next position.
                    self.current[i] = b'A';
                }
                c => {
                    self.current[i] = c + 1;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_uids_are_sequential() {
        let mut gen = UidGenerator::new("001");
        assert_eq!(gen.next_uid(), "001AAAAAA");
        assert_eq!(gen.next_uid(), "001AAAAAB");
        assert_eq!(gen.next_uid(), "001AAAAAC");
    }

    #[test]
    fn letters_roll_into_digits() {
        let mut gen = UidGenerator::new("001");
        gen.current = *b"AAAAAZ";
        assert_eq!(gen.next_uid(), "001AAAAAZ");
        assert_eq!(gen.next_uid(), "001AAAAA0");
        assert_eq!(gen.next_uid(), "001AAAAA1");
    }

    #[test]
    fn digit_overflow_carries() {
        let mut gen = UidGenerator::new("001");
        gen.current = *b"AAAAA9";
        gen.next_uid();
        assert_eq!(gen.next_uid(), "001AAAABA");
    }

    #[test]
    fn uid_shape() {
        let mut gen = UidGenerator::new("42X");
        let uid = gen.next_uid();
        assert_eq!(uid.len(), 9);
        assert!(uid.starts_with("42X"));
        assert!(uid[3..].bytes().all(|b| b.is_ascii_alphanumeric()));
    }
}
