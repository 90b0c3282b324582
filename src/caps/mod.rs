//! IRCv3 capability registry.
//!
//! Capabilities are advertised in `CAP LS`/`CAP LIST`, toggled atomically by
//! `CAP REQ`, and may carry a per-connection value in 302 listings. A
//! capability can refuse REQ (listing-only), or be hidden from pre-302
//! clients. Availability or value changes are pushed as `CAP NEW`/`CAP DEL`
//! to clients holding `cap-notify` (implied by a 302 `CAP LS`).

/// One registered capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapDef {
    pub name: String,
    /// `name=value` in 302 listings.
    pub value: Option<String>,
    /// Whether `CAP REQ` may enable it.
    pub can_request: bool,
    /// Hidden from `CAP LS 301` clients.
    pub v302_only: bool,
    /// Advertised only on TLS connections (STS).
    pub tls_only: bool,
}

/// The registered capability set.
pub struct CapRegistry {
    defs: Vec<CapDef>,
}

impl Default for CapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapRegistry {
    /// The built-in capability set. STS is registered separately once the
    /// listener configuration is known.
    pub fn new() -> Self {
        let mut registry = Self { defs: Vec::new() };
        for name in [
            "multi-prefix",
            "echo-message",
            "message-tags",
            "server-time",
            "cap-notify",
            "standard-replies",
            "away-notify",
        ] {
            registry.register(CapDef {
                name: name.to_string(),
                value: None,
                can_request: true,
                v302_only: false,
                tls_only: false,
            });
        }
        registry
    }

    /// Register the STS policy capability. Listing-only, TLS listeners only;
    /// the daemon never re-derives TLS-ness, it trusts the listener flag.
    pub fn register_sts(&mut self, port: u16, duration_secs: u64) {
        self.register(CapDef {
            name: "sts".to_string(),
            value: Some(format!("port={port},duration={duration_secs}")),
            can_request: false,
            v302_only: true,
            tls_only: true,
        });
    }

    pub fn register(&mut self, def: CapDef) {
        self.defs.retain(|d| d.name != def.name);
        self.defs.push(def);
    }

    /// Remove a capability. Returns whether it existed (drives `CAP DEL`).
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.defs.len();
        self.defs.retain(|d| d.name != name);
        self.defs.len() != before
    }

    /// Change a capability's value. Returns whether anything changed
    /// (drives `CAP NEW` re-advertisement to cap-notify holders).
    pub fn set_value(&mut self, name: &str, value: Option<String>) -> bool {
        match self.defs.iter_mut().find(|d| d.name == name) {
            Some(def) if def.value != value => {
                def.value = value;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&CapDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    /// Can this capability be REQ'd at all?
    pub fn requestable(&self, name: &str) -> bool {
        self.get(name).is_some_and(|d| d.can_request)
    }

    /// Capabilities visible to a client with the given CAP version and
    /// transport.
    pub fn advertised(&self, version: u16, secure: bool) -> Vec<&CapDef> {
        self.defs
            .iter()
            .filter(|d| (!d.v302_only || version >= 302) && (!d.tls_only || secure))
            .collect()
    }

    /// The `CAP LS` token list: `name` or `name=value` (302 only).
    pub fn ls_tokens(&self, version: u16, secure: bool) -> String {
        self.advertised(version, secure)
            .iter()
            .map(|d| match (&d.value, version >= 302) {
                (Some(v), true) => format!("{}={}", d.name, v),
                _ => d.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_present() {
        let registry = CapRegistry::new();
        assert!(registry.get("multi-prefix").is_some());
        assert!(registry.get("echo-message").is_some());
        assert!(registry.requestable("standard-replies"));
        assert!(registry.get("sts").is_none());
    }

    #[test]
    fn sts_only_shown_on_tls_302() {
        let mut registry = CapRegistry::new();
        registry.register_sts(6697, 86400);

        assert!(!registry.ls_tokens(301, true).contains("sts"));
        assert!(!registry.ls_tokens(302, false).contains("sts"));
        let tokens = registry.ls_tokens(302, true);
        assert!(tokens.contains("sts=port=6697,duration=86400"));
        assert!(!registry.requestable("sts"));
    }

    #[test]
    fn values_only_in_302_listings() {
        let mut registry = CapRegistry::new();
        registry.register(CapDef {
            name: "ember.example/test".into(),
            value: Some("v1".into()),
            can_request: true,
            v302_only: false,
            tls_only: false,
        });
        assert!(registry.ls_tokens(302, false).contains("ember.example/test=v1"));
        let v301 = registry.ls_tokens(301, false);
        assert!(v301.contains("ember.example/test"));
        assert!(!v301.contains("=v1"));
    }

    #[test]
    fn value_change_detection() {
        let mut registry = CapRegistry::new();
        registry.register(CapDef {
            name: "x".into(),
            value: Some("1".into()),
            can_request: true,
            v302_only: false,
            tls_only: false,
        });
        assert!(registry.set_value("x", Some("2".into())));
        assert!(!registry.set_value("x", Some("2".into())));
        assert!(registry.unregister("x"));
        assert!(!registry.unregister("x"));
    }
}
