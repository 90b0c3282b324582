//! User state.
//!
//! A `User` is created at accept time in `Unregistered` state and indexed by
//! UID immediately; the nick index entry appears only once a NICK has been
//! validated. All mutation happens on the engine task.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::ClassConfig;
use crate::ext::Extensions;

/// Registration progress flags. The user becomes registered when all three
/// are satisfied and the pre-connect hook chain allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegProgress {
    pub nick_seen: bool,
    pub user_seen: bool,
    /// True unless the client opened CAP negotiation and has not sent
    /// `CAP END` yet.
    pub cap_done: bool,
}

impl Default for RegProgress {
    fn default() -> Self {
        Self {
            nick_seen: false,
            user_seen: false,
            cap_done: true,
        }
    }
}

impl RegProgress {
    pub fn complete(&self) -> bool {
        self.nick_seen && self.user_seen && self.cap_done
    }
}

/// User modes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserModes {
    pub invisible: bool,    // +i
    pub wallops: bool,      // +w
    pub oper: bool,         // +o
    pub snotices: bool,     // +s
}

impl UserModes {
    /// Render as "+iw" style. Always starts with '+'.
    pub fn as_mode_string(&self) -> String {
        let mut s = String::from("+");
        if self.invisible {
            s.push('i');
        }
        if self.wallops {
            s.push('w');
        }
        if self.oper {
            s.push('o');
        }
        if self.snotices {
            s.push('s');
        }
        s
    }
}

/// A connected (or peer-introduced) user.
#[derive(Debug)]
pub struct User {
    pub uid: String,
    /// Current nick; `None` until the first valid NICK.
    pub nick: Option<String>,
    /// Ident/user-part; `~`-prefixed when the ident lookup failed.
    pub ident: String,
    pub realname: String,
    /// DNS name or IP text.
    pub real_host: String,
    /// What other users see; bounded by `limits.host_len`.
    pub shown_host: String,
    pub ip: IpAddr,
    /// Name of the server this user is attached to.
    pub server: String,
    pub connected_at: i64,
    pub last_activity: i64,
    /// Timestamp of the last PING we sent without an answering PONG.
    pub ping_sent_at: Option<i64>,
    pub away: Option<String>,
    /// Services account, when some extension has identified the user.
    pub account: Option<String>,
    /// Connected through a TLS listener.
    pub secure: bool,
    pub modes: UserModes,
    pub progress: RegProgress,
    /// Outstanding host/ident lookups blocking registration.
    pub lookups_pending: u8,
    pub registered: bool,
    /// Set once QUIT processing has begun; the object lives until the cull.
    pub quitting: bool,
    pub class: Arc<ClassConfig>,
    /// PASS argument, held until registration checks it.
    pub password: Option<String>,
    /// Enabled IRCv3 capabilities.
    pub caps: HashSet<String>,
    /// 301 or 302, from `CAP LS`.
    pub cap_version: u16,
    /// True between `CAP LS`/`CAP REQ` and `CAP END`.
    pub cap_negotiating: bool,
    /// Accumulated command-flood penalty, pseudo-milliseconds.
    pub penalty_ms: u64,
    /// Last wall-clock ms at which the penalty decayed.
    pub penalty_clock_ms: u64,
    /// Casemapped keys of the channels this user is in.
    pub channels: HashSet<String>,
    /// Broadcast de-duplication marker.
    pub sent_serial: u64,
    pub ext: Extensions,
}

impl User {
    pub fn new(
        uid: String,
        ip: IpAddr,
        server: String,
        class: Arc<ClassConfig>,
        now: i64,
    ) -> Self {
        let host = ip.to_string();
        Self {
            uid,
            nick: None,
            ident: String::new(),
            realname: String::new(),
            real_host: host.clone(),
            shown_host: host,
            ip,
            server,
            connected_at: now,
            last_activity: now,
            ping_sent_at: None,
            away: None,
            account: None,
            secure: false,
            modes: UserModes::default(),
            progress: RegProgress::default(),
            lookups_pending: 0,
            registered: false,
            quitting: false,
            class,
            password: None,
            caps: HashSet::new(),
            cap_version: 301,
            cap_negotiating: false,
            penalty_ms: 0,
            penalty_clock_ms: 0,
            channels: HashSet::new(),
            sent_serial: 0,
            ext: Extensions::new(),
        }
    }

    /// Nick for replies: the real nick or `*` pre-registration.
    pub fn reply_nick(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }

    /// `nick!ident@shown-host`, the source prefix for user-originated events.
    pub fn hostmask(&self) -> String {
        format!(
            "{}!{}@{}",
            self.reply_nick(),
            if self.ident.is_empty() { "*" } else { &self.ident },
            self.shown_host
        )
    }

    /// The full identity string R-lines match against.
    pub fn rline_subject(&self) -> String {
        format!("{} {}", self.hostmask(), self.realname)
    }

    pub fn has_cap(&self, name: &str) -> bool {
        self.caps.contains(name)
    }

    /// Decay the penalty counter at wall-clock rate, then add `add` ms.
    /// Returns the new value.
    pub fn account_penalty(&mut self, now_ms: u64, add: u64) -> u64 {
        if self.penalty_clock_ms != 0 && now_ms > self.penalty_clock_ms {
            let decay = now_ms - self.penalty_clock_ms;
            self.penalty_ms = self.penalty_ms.saturating_sub(decay);
        }
        self.penalty_clock_ms = now_ms;
        self.penalty_ms = self.penalty_ms.saturating_add(add);
        self.penalty_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new(
            "001AAAAAA".into(),
            "127.0.0.1".parse().unwrap(),
            "irc.example.net".into(),
            Arc::new(ClassConfig::default()),
            1_700_000_000,
        )
    }

    #[test]
    fn reply_nick_star_until_named() {
        let mut u = user();
        assert_eq!(u.reply_nick(), "*");
        u.nick = Some("alice".into());
        assert_eq!(u.reply_nick(), "alice");
    }

    #[test]
    fn progress_gate() {
        let mut p = RegProgress {
            cap_done: true,
            ..Default::default()
        };
        assert!(!p.complete());
        p.nick_seen = true;
        p.user_seen = true;
        assert!(p.complete());
        p.cap_done = false;
        assert!(!p.complete());
    }

    #[test]
    fn penalty_decays_at_wall_clock_rate() {
        let mut u = user();
        assert_eq!(u.account_penalty(1_000, 1_000), 1_000);
        // 500ms later, 500ms has decayed before the next 1000 is added.
        assert_eq!(u.account_penalty(1_500, 1_000), 1_500);
        // Long idle clears it entirely.
        assert_eq!(u.account_penalty(60_000, 0), 0);
    }

    #[test]
    fn mode_string() {
        let mut u = user();
        u.modes.invisible = true;
        u.modes.wallops = true;
        assert_eq!(u.modes.as_mode_string(), "+iw");
    }
}
