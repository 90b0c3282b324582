//! The X-line (ban) registry.
//!
//! Bans are partitioned by a one-letter type tag; each type supplies a
//! factory that normalizes patterns, decides whether new entries apply to
//! already-connected users, and implements the match predicate. At most one
//! entry exists per (type, pattern); duplicate adds fail. Entries are kept
//! sorted by expiry so the periodic sweep stops at the first survivor.

pub mod store;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::error::XLineError;
use crate::state::user::User;
use ember_proto::{cidr, wildcard, Casemap};

/// One ban entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLine {
    /// Type tag: "K", "G", "Z", "Q", "R" or "CBAN".
    pub kind: &'static str,
    /// Normalized pattern.
    pub pattern: String,
    pub reason: String,
    pub setter: String,
    pub set_at: i64,
    /// Seconds; 0 is permanent.
    pub duration_secs: u64,
}

impl XLine {
    /// Absolute expiry, `None` for permanent entries.
    pub fn expires_at(&self) -> Option<i64> {
        if self.duration_secs == 0 {
            None
        } else {
            Some(self.set_at + self.duration_secs as i64)
        }
    }

    pub fn expired(&self, now: i64) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

/// Per-type behavior.
pub trait XLineFactory: Send + Sync {
    fn tag(&self) -> &'static str;

    /// Whether adding an entry should walk and disconnect existing users.
    fn applies_to_existing(&self) -> bool {
        true
    }

    /// Validate and canonicalize a pattern.
    fn normalize(&self, pattern: &str, casemap: Casemap) -> Result<String, XLineError>;

    /// Does this entry match a connected user?
    fn matches_user(&self, line: &XLine, user: &User, casemap: Casemap) -> bool;

    /// Does this entry match a bare subject string (nick, channel name)?
    fn matches_text(&self, _line: &XLine, _subject: &str, _casemap: Casemap) -> bool {
        false
    }
}

fn normalize_usermask(pattern: &str, casemap: Casemap) -> Result<String, XLineError> {
    let mask = if pattern.contains('@') {
        pattern.to_string()
    } else {
        format!("*@{pattern}")
    };
    if mask.contains(' ') {
        return Err(XLineError::BadPattern {
            pattern: pattern.to_string(),
            reason: "mask cannot contain spaces".to_string(),
        });
    }
    Ok(casemap.key(&mask))
}

fn usermask_matches(line: &XLine, user: &User, casemap: Casemap) -> bool {
    let ident = if user.ident.is_empty() { "*" } else { &user.ident };
    let by_host = format!("{}@{}", ident, user.real_host);
    let by_ip = format!("{}@{}", ident, user.ip);
    wildcard::matches(&line.pattern, &by_host, casemap)
        || wildcard::matches(&line.pattern, &by_ip, casemap)
}

/// K-line: local user@host ban.
struct KLineFactory;

impl XLineFactory for KLineFactory {
    fn tag(&self) -> &'static str {
        "K"
    }
    fn normalize(&self, pattern: &str, casemap: Casemap) -> Result<String, XLineError> {
        normalize_usermask(pattern, casemap)
    }
    fn matches_user(&self, line: &XLine, user: &User, casemap: Casemap) -> bool {
        usermask_matches(line, user, casemap)
    }
}

/// G-line: network-wide user@host ban; locally identical to K, but carried
/// to peers by the federation layer.
struct GLineFactory;

impl XLineFactory for GLineFactory {
    fn tag(&self) -> &'static str {
        "G"
    }
    fn normalize(&self, pattern: &str, casemap: Casemap) -> Result<String, XLineError> {
        normalize_usermask(pattern, casemap)
    }
    fn matches_user(&self, line: &XLine, user: &User, casemap: Casemap) -> bool {
        usermask_matches(line, user, casemap)
    }
}

/// Z-line: IP or CIDR ban, checked before any data is read.
struct ZLineFactory;

impl XLineFactory for ZLineFactory {
    fn tag(&self) -> &'static str {
        "Z"
    }
    fn normalize(&self, pattern: &str, _casemap: Casemap) -> Result<String, XLineError> {
        let ok = cidr::is_cidr_pattern(pattern)
            || pattern
                .bytes()
                .all(|b| b.is_ascii_hexdigit() || b"*?.:/".contains(&b));
        if ok {
            Ok(pattern.to_ascii_lowercase())
        } else {
            Err(XLineError::BadPattern {
                pattern: pattern.to_string(),
                reason: "not an IP, CIDR or IP glob".to_string(),
            })
        }
    }
    fn matches_user(&self, line: &XLine, user: &User, casemap: Casemap) -> bool {
        self.matches_text(line, &user.ip.to_string(), casemap)
    }
    fn matches_text(&self, line: &XLine, subject: &str, _casemap: Casemap) -> bool {
        if let Ok(ip) = subject.parse::<IpAddr>() {
            if cidr::matches(&line.pattern, ip) {
                return true;
            }
        }
        wildcard::matches(&line.pattern, subject, Casemap::Ascii)
    }
}

/// Q-line: forbidden nick glob.
struct QLineFactory;

impl XLineFactory for QLineFactory {
    fn tag(&self) -> &'static str {
        "Q"
    }
    fn normalize(&self, pattern: &str, casemap: Casemap) -> Result<String, XLineError> {
        if pattern.contains(' ') || pattern.is_empty() {
            return Err(XLineError::BadPattern {
                pattern: pattern.to_string(),
                reason: "not a nick pattern".to_string(),
            });
        }
        Ok(casemap.key(pattern))
    }
    fn matches_user(&self, line: &XLine, user: &User, casemap: Casemap) -> bool {
        user.nick
            .as_deref()
            .is_some_and(|nick| wildcard::matches(&line.pattern, nick, casemap))
    }
    fn matches_text(&self, line: &XLine, subject: &str, casemap: Casemap) -> bool {
        wildcard::matches(&line.pattern, subject, casemap)
    }
}

/// R-line: regular expression over `nick!user@host realname`.
struct RLineFactory {
    cache: Mutex<BTreeMap<String, Regex>>,
}

impl RLineFactory {
    fn new() -> Self {
        Self {
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    fn compiled(&self, pattern: &str) -> Option<Regex> {
        let mut cache = self.cache.lock();
        if let Some(re) = cache.get(pattern) {
            return Some(re.clone());
        }
        let re = Regex::new(pattern).ok()?;
        cache.insert(pattern.to_string(), re.clone());
        Some(re)
    }
}

impl XLineFactory for RLineFactory {
    fn tag(&self) -> &'static str {
        "R"
    }
    fn normalize(&self, pattern: &str, _casemap: Casemap) -> Result<String, XLineError> {
        Regex::new(pattern).map_err(|e| XLineError::BadPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(pattern.to_string())
    }
    fn matches_user(&self, line: &XLine, user: &User, _casemap: Casemap) -> bool {
        self.compiled(&line.pattern)
            .is_some_and(|re| re.is_match(&user.rline_subject()))
    }
    fn matches_text(&self, line: &XLine, subject: &str, _casemap: Casemap) -> bool {
        self.compiled(&line.pattern)
            .is_some_and(|re| re.is_match(subject))
    }
}

/// CBAN: closed channel pattern, consulted on JOIN.
struct CBanFactory;

impl XLineFactory for CBanFactory {
    fn tag(&self) -> &'static str {
        "CBAN"
    }
    fn applies_to_existing(&self) -> bool {
        false
    }
    fn normalize(&self, pattern: &str, casemap: Casemap) -> Result<String, XLineError> {
        if !pattern.starts_with('#') || pattern.contains(' ') {
            return Err(XLineError::BadPattern {
                pattern: pattern.to_string(),
                reason: "not a channel pattern".to_string(),
            });
        }
        Ok(casemap.key(pattern))
    }
    fn matches_user(&self, _line: &XLine, _user: &User, _casemap: Casemap) -> bool {
        false
    }
    fn matches_text(&self, line: &XLine, subject: &str, casemap: Casemap) -> bool {
        wildcard::matches(&line.pattern, subject, casemap)
    }
}

struct TypeTable {
    factory: Arc<dyn XLineFactory>,
    entries: Vec<XLine>,
}

/// The registry: entries partitioned by type, dirty-tracked for the
/// persistence timer.
pub struct XLineRegistry {
    /// Type tables in registration order; connect-time checks walk them in
    /// this order and the first match wins.
    types: Vec<TypeTable>,
    dirty: bool,
}

impl Default for XLineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl XLineRegistry {
    pub fn new() -> Self {
        let factories: Vec<Arc<dyn XLineFactory>> = vec![
            Arc::new(KLineFactory),
            Arc::new(GLineFactory),
            Arc::new(ZLineFactory),
            Arc::new(QLineFactory),
            Arc::new(RLineFactory::new()),
            Arc::new(CBanFactory),
        ];
        Self {
            types: factories
                .into_iter()
                .map(|factory| TypeTable {
                    factory,
                    entries: Vec::new(),
                })
                .collect(),
            dirty: false,
        }
    }

    fn table(&self, kind: &str) -> Option<&TypeTable> {
        self.types.iter().find(|t| t.factory.tag() == kind)
    }

    fn table_mut(&mut self, kind: &str) -> Option<&mut TypeTable> {
        self.types.iter_mut().find(|t| t.factory.tag() == kind)
    }

    pub fn known_types(&self) -> Vec<&'static str> {
        self.types.iter().map(|t| t.factory.tag()).collect()
    }

    /// Add a ban. Returns the stored entry. The caller is responsible for
    /// walking existing users when [`applies_to_existing`] says so.
    ///
    /// [`applies_to_existing`]: XLineFactory::applies_to_existing
    pub fn add(
        &mut self,
        kind: &str,
        pattern: &str,
        duration_secs: u64,
        reason: &str,
        setter: &str,
        now: i64,
        casemap: Casemap,
    ) -> Result<XLine, XLineError> {
        let table = self
            .table_mut(kind)
            .ok_or_else(|| XLineError::UnknownType(kind.to_string()))?;
        let tag = table.factory.tag();
        let pattern = table.factory.normalize(pattern, casemap)?;
        if table.entries.iter().any(|e| e.pattern == pattern) {
            return Err(XLineError::Duplicate(tag.to_string(), pattern));
        }
        let line = XLine {
            kind: tag,
            pattern,
            reason: reason.to_string(),
            setter: setter.to_string(),
            set_at: now,
            duration_secs,
        };
        // Keep the table sorted by expiry; permanent entries sort last.
        let sort_key = |l: &XLine| l.expires_at().unwrap_or(i64::MAX);
        let at = table
            .entries
            .partition_point(|e| sort_key(e) <= sort_key(&line));
        table.entries.insert(at, line.clone());
        self.dirty = true;
        Ok(line)
    }

    /// Whether new entries of `kind` disconnect matching existing users.
    pub fn applies_to_existing(&self, kind: &str) -> bool {
        self.table(kind)
            .is_some_and(|t| t.factory.applies_to_existing())
    }

    /// Remove by pattern. The pattern is normalized first so `/UNKLINE`
    /// accepts the same spelling `/KLINE` did.
    pub fn remove(&mut self, kind: &str, pattern: &str, casemap: Casemap) -> bool {
        let Some(table) = self.table_mut(kind) else {
            return false;
        };
        let Ok(pattern) = table.factory.normalize(pattern, casemap) else {
            return false;
        };
        let before = table.entries.len();
        table.entries.retain(|e| e.pattern != pattern);
        let removed = table.entries.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn entries(&self, kind: &str) -> &[XLine] {
        self.table(kind).map(|t| t.entries.as_slice()).unwrap_or(&[])
    }

    pub fn all_entries(&self) -> Vec<XLine> {
        self.types
            .iter()
            .flat_map(|t| t.entries.iter().cloned())
            .collect()
    }

    /// Drop expired entries. Returns what was removed, for server notices.
    pub fn sweep(&mut self, now: i64) -> Vec<XLine> {
        let mut removed = Vec::new();
        for table in &mut self.types {
            // Sorted by expiry, so split at the first survivor.
            let split = table.entries.partition_point(|e| e.expired(now));
            removed.extend(table.entries.drain(..split));
        }
        if !removed.is_empty() {
            self.dirty = true;
        }
        removed
    }

    /// Evaluate every user-applicable ban type against a finalized identity.
    /// First match wins.
    pub fn check_user(&self, user: &User, now: i64, casemap: Casemap) -> Option<XLine> {
        for table in &self.types {
            for entry in &table.entries {
                if !entry.expired(now) && table.factory.matches_user(entry, user, casemap) {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    /// Z-line check on the bare address, before any data is read.
    pub fn check_ip(&self, ip: IpAddr, now: i64) -> Option<XLine> {
        let subject = ip.to_string();
        let table = self.table("Z")?;
        table
            .entries
            .iter()
            .find(|e| !e.expired(now) && table.factory.matches_text(e, &subject, Casemap::Ascii))
            .cloned()
    }

    /// Q-line check against a proposed nick.
    pub fn check_nick(&self, nick: &str, now: i64, casemap: Casemap) -> Option<XLine> {
        let table = self.table("Q")?;
        table
            .entries
            .iter()
            .find(|e| !e.expired(now) && table.factory.matches_text(e, nick, casemap))
            .cloned()
    }

    /// CBAN check against a channel name on JOIN.
    pub fn check_channel(&self, channel: &str, now: i64, casemap: Casemap) -> Option<XLine> {
        let table = self.table("CBAN")?;
        table
            .entries
            .iter()
            .find(|e| !e.expired(now) && table.factory.matches_text(e, channel, casemap))
            .cloned()
    }

    /// Replay stored entries from the database file, preserving their
    /// original setter and set-time. Unknown types and duplicates are
    /// skipped with a log line. Does not mark the registry dirty.
    pub fn restore(&mut self, stored: Vec<store::StoredLine>, casemap: Casemap) -> usize {
        let mut restored = 0;
        for entry in stored {
            let Some(table) = self.table_mut(&entry.kind) else {
                tracing::warn!(kind = %entry.kind, "Unknown X-line type in database; skipped");
                continue;
            };
            let tag = table.factory.tag();
            let Ok(pattern) = table.factory.normalize(&entry.pattern, casemap) else {
                tracing::warn!(pattern = %entry.pattern, "Bad X-line pattern in database; skipped");
                continue;
            };
            if table.entries.iter().any(|e| e.pattern == pattern) {
                continue;
            }
            let line = XLine {
                kind: tag,
                pattern,
                reason: entry.reason,
                setter: entry.setter,
                set_at: entry.set_at,
                duration_secs: entry.duration_secs,
            };
            let sort_key = |l: &XLine| l.expires_at().unwrap_or(i64::MAX);
            let at = table
                .entries
                .partition_point(|e| sort_key(e) <= sort_key(&line));
            table.entries.insert(at, line);
            restored += 1;
        }
        restored
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Parse a ban duration: bare digits are seconds, otherwise `1y2w3d4h5m6s`
/// components. `0` is permanent. Returns `None` for garbage.
pub fn parse_duration(text: &str) -> Option<u64> {
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().ok();
    }
    let mut total: u64 = 0;
    let mut value: u64 = 0;
    let mut has_digit = false;
    for c in text.chars() {
        if let Some(d) = c.to_digit(10) {
            value = value.checked_mul(10)?.checked_add(d as u64)?;
            has_digit = true;
            continue;
        }
        if !has_digit {
            return None;
        }
        let unit: u64 = match c.to_ascii_lowercase() {
            'y' => 31_536_000,
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(unit)?)?;
        value = 0;
        has_digit = false;
    }
    if has_digit {
        // Trailing bare number counts as seconds.
        total = total.checked_add(value)?;
    }
    Some(total)
}
