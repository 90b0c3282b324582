//! Channel state.
//!
//! Channels own their memberships; users hold non-owning channel keys. Both
//! sides are updated together by the `World` mutators so membership stays
//! bidirectional. A channel with no members is queued for destruction at the
//! end of the loop iteration unless it is marked permanent (+P).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::ext::Extensions;

/// One entry of a list mode (+b/+e/+I).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListModeEntry {
    pub mask: String,
    /// Nick or nick!user@host of whoever set it.
    pub setter: String,
    pub set_at: i64,
}

/// The channel topic with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// The user↔channel relation, owned by the channel.
#[derive(Debug)]
pub struct Membership {
    pub uid: String,
    /// Prefix-mode letters held ('v', 'h', 'o', 'a', 'q').
    pub ranks: BTreeSet<char>,
    pub joined_at: i64,
    pub ext: Extensions,
}

impl Membership {
    pub fn new(uid: impl Into<String>, joined_at: i64) -> Self {
        Self {
            uid: uid.into(),
            ranks: BTreeSet::new(),
            joined_at,
            ext: Extensions::new(),
        }
    }

    pub fn has_rank(&self, letter: char) -> bool {
        self.ranks.contains(&letter)
    }
}

/// A channel.
#[derive(Debug)]
pub struct Channel {
    /// Display name, original case preserved.
    pub name: String,
    /// Creation timestamp, the merge authority.
    pub ts: i64,
    pub topic: Option<Topic>,
    /// Simple mode letters currently set.
    pub modes: BTreeSet<char>,
    /// Parameter-mode values (e.g. 'k' → key, 'l' → limit text).
    pub mode_params: BTreeMap<char, String>,
    /// List-mode entries keyed by mode letter, insertion-ordered.
    pub lists: BTreeMap<char, Vec<ListModeEntry>>,
    /// Members keyed by UID.
    pub members: HashMap<String, Membership>,
    pub ext: Extensions,
}

impl Channel {
    pub fn new(name: impl Into<String>, ts: i64) -> Self {
        Self {
            name: name.into(),
            ts,
            topic: None,
            modes: BTreeSet::new(),
            mode_params: BTreeMap::new(),
            lists: BTreeMap::new(),
            members: HashMap::new(),
            ext: Extensions::new(),
        }
    }

    pub fn has_mode(&self, letter: char) -> bool {
        self.modes.contains(&letter)
    }

    pub fn mode_param(&self, letter: char) -> Option<&str> {
        self.mode_params.get(&letter).map(String::as_str)
    }

    /// The +l limit, when set and numeric.
    pub fn user_limit(&self) -> Option<usize> {
        self.mode_param('l').and_then(|v| v.parse().ok())
    }

    pub fn list(&self, letter: char) -> &[ListModeEntry] {
        self.lists.get(&letter).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn member(&self, uid: &str) -> Option<&Membership> {
        self.members.get(uid)
    }

    pub fn member_mut(&mut self, uid: &str) -> Option<&mut Membership> {
        self.members.get_mut(uid)
    }

    /// Permanent channels survive becoming empty.
    pub fn is_permanent(&self) -> bool {
        self.has_mode('P')
    }

    /// Render current modes for 324, hiding secret parameters from
    /// non-members by substituting `<name>`.
    pub fn mode_string(&self, for_member: bool, secret_params: &[char]) -> String {
        let mut letters = String::from("+");
        let mut params: Vec<String> = Vec::new();
        for &m in &self.modes {
            letters.push(m);
        }
        for (&m, value) in &self.mode_params {
            letters.push(m);
            if !for_member && secret_params.contains(&m) {
                params.push(format!("<{}>", mode_param_name(m)));
            } else {
                params.push(value.clone());
            }
        }
        if params.is_empty() {
            letters
        } else {
            format!("{} {}", letters, params.join(" "))
        }
    }
}

/// Human name of a parameter mode, used for `<name>` substitution.
fn mode_param_name(letter: char) -> &'static str {
    match letter {
        'k' => "key",
        'l' => "limit",
        _ => "param",
    }
}
