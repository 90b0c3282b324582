//! The mode system.
//!
//! Every mode is one of four kinds: a simple flag, a parameterized value, a
//! per-membership prefix rank, or a list of masks. Mode letters are looked
//! up in two tables (channel and user); the mode's name string is its
//! canonical identity, the letter is UI.

mod builtin;
pub mod merge;
pub mod stack;

pub use builtin::install_builtin_modes;
pub use merge::{merge_channel, IncomingChannel, IncomingMember};
pub use stack::{apply_channel_batch, parse_channel_changes, AppliedBatch, ModeChange};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::state::channel::Membership;

/// Prefix rank constants. Higher outranks lower.
pub const RANK_VOICE: u32 = 10_000;
pub const RANK_HALFOP: u32 = 20_000;
pub const RANK_OP: u32 = 30_000;
pub const RANK_ADMIN: u32 = 40_000;
pub const RANK_FOUNDER: u32 = 50_000;

/// Validation callback for parameter modes: returns the normalized parameter
/// or a denial reason.
pub type ParamCheck = fn(adding: bool, param: &str) -> Result<String, String>;

/// What kind of mode this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeKind {
    /// A flag with no parameter.
    Simple,
    /// A flag whose value is stored on the channel. `secret` parameters are
    /// shown to non-members as `<name>`.
    Param { secret: bool },
    /// A per-membership rank with a display prefix.
    Prefix { prefix: char, rank: u32 },
    /// A multi-valued mask list.
    List,
}

/// One registered mode.
#[derive(Debug)]
pub struct ModeDef {
    /// Canonical name ("ban", "key", "op", ...).
    pub name: &'static str,
    pub letter: char,
    pub kind: ModeKind,
    /// Minimum source rank required to change this mode on a channel.
    pub set_rank: u32,
    /// Only IRC operators may change it.
    pub oper_only: bool,
    /// Parameter validation for `Param` modes.
    pub param_check: Option<ParamCheck>,
}

impl ModeDef {
    /// Does a change of this mode consume a parameter?
    pub fn takes_param(&self, adding: bool) -> bool {
        match self.kind {
            ModeKind::Simple => false,
            ModeKind::Param { .. } => adding,
            ModeKind::Prefix { .. } | ModeKind::List => true,
        }
    }

    pub fn rank(&self) -> Option<u32> {
        match self.kind {
            ModeKind::Prefix { rank, .. } => Some(rank),
            _ => None,
        }
    }

    pub fn prefix_char(&self) -> Option<char> {
        match self.kind {
            ModeKind::Prefix { prefix, .. } => Some(prefix),
            _ => None,
        }
    }
}

/// The two mode tables.
#[derive(Default)]
pub struct ModeRegistry {
    channel: BTreeMap<char, Arc<ModeDef>>,
    user: BTreeMap<char, Arc<ModeDef>>,
}

impl ModeRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        install_builtin_modes(&mut registry);
        registry
    }

    /// An empty registry, for tests that install their own modes.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register_channel_mode(&mut self, def: ModeDef) {
        self.channel.insert(def.letter, Arc::new(def));
    }

    pub fn register_user_mode(&mut self, def: ModeDef) {
        self.user.insert(def.letter, Arc::new(def));
    }

    pub fn channel_mode(&self, letter: char) -> Option<Arc<ModeDef>> {
        self.channel.get(&letter).cloned()
    }

    pub fn user_mode(&self, letter: char) -> Option<Arc<ModeDef>> {
        self.user.get(&letter).cloned()
    }

    /// Prefix modes ordered by descending rank.
    pub fn prefixes_desc(&self) -> Vec<Arc<ModeDef>> {
        let mut prefixes: Vec<_> = self
            .channel
            .values()
            .filter(|d| matches!(d.kind, ModeKind::Prefix { .. }))
            .cloned()
            .collect();
        prefixes.sort_by_key(|d| std::cmp::Reverse(d.rank().unwrap_or(0)));
        prefixes
    }

    /// The rank conferred by a prefix-mode letter, 0 if unknown.
    pub fn rank_of_letter(&self, letter: char) -> u32 {
        self.channel_mode(letter).and_then(|d| d.rank()).unwrap_or(0)
    }

    /// Map a display prefix ('@', '+') back to its mode.
    pub fn prefix_to_mode(&self, prefix: char) -> Option<Arc<ModeDef>> {
        self.channel
            .values()
            .find(|d| d.prefix_char() == Some(prefix))
            .cloned()
    }

    /// Highest rank held by a membership.
    pub fn max_rank(&self, membership: &Membership) -> u32 {
        membership
            .ranks
            .iter()
            .map(|&l| self.rank_of_letter(l))
            .max()
            .unwrap_or(0)
    }

    /// The display prefix string for a membership, highest rank first.
    /// With `multi_prefix`, all held prefixes; otherwise just the top one.
    pub fn prefix_string(&self, membership: &Membership, multi_prefix: bool) -> String {
        let mut out = String::new();
        for def in self.prefixes_desc() {
            if membership.has_rank(def.letter) {
                if let Some(p) = def.prefix_char() {
                    out.push(p);
                    if !multi_prefix {
                        break;
                    }
                }
            }
        }
        out
    }

    /// The ISUPPORT `PREFIX=(...)...` token value.
    pub fn isupport_prefix(&self) -> String {
        let prefixes = self.prefixes_desc();
        let letters: String = prefixes.iter().map(|d| d.letter).collect();
        let chars: String = prefixes.iter().filter_map(|d| d.prefix_char()).collect();
        format!("({letters}){chars}")
    }

    /// The ISUPPORT `CHANMODES=A,B,C,D` token value.
    pub fn isupport_chanmodes(&self) -> String {
        let mut lists = String::new();
        let mut params = String::new();
        let mut simple = String::new();
        for def in self.channel.values() {
            match def.kind {
                ModeKind::List => lists.push(def.letter),
                ModeKind::Param { .. } => params.push(def.letter),
                ModeKind::Simple => simple.push(def.letter),
                ModeKind::Prefix { .. } => {}
            }
        }
        // Type B (param on set and unset) is empty: our param modes only
        // take a parameter when setting.
        format!("{lists},,{params},{simple}")
    }

    /// Letters of secret parameter modes, for `<name>` substitution.
    pub fn secret_param_letters(&self) -> Vec<char> {
        self.channel
            .values()
            .filter(|d| matches!(d.kind, ModeKind::Param { secret: true }))
            .map(|d| d.letter)
            .collect()
    }
}
