//! Configuration validation.
//!
//! Collects every problem rather than stopping at the first, so an operator
//! can fix a config in one pass.

use ember_proto::Casemap;

use super::Config;

/// Validate a parsed configuration. Returns all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() || !config.server.name.contains('.') {
        errors.push(format!(
            "server.name '{}' must be a dotted server name",
            config.server.name
        ));
    }

    let sid = &config.server.sid;
    let sid_ok = sid.len() == 3
        && sid.as_bytes()[0].is_ascii_digit()
        && sid.bytes().skip(1).all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    if !sid_ok {
        errors.push(format!(
            "server.sid '{sid}' must match [0-9][A-Z0-9][A-Z0-9]"
        ));
    }

    if Casemap::from_name(&config.server.casemap).is_none() {
        errors.push(format!(
            "server.casemap '{}' is not one of rfc1459, strict-rfc1459, ascii",
            config.server.casemap
        ));
    }

    if config.server.worker_threads == 0 {
        errors.push("server.worker_threads must be at least 1".to_string());
    }

    if config.listen.is_empty() {
        errors.push("at least one [[listen]] block is required".to_string());
    }
    for listen in &config.listen {
        if listen.tls && (listen.cert.is_none() || listen.key.is_none()) {
            errors.push(format!(
                "listener {}:{} has tls = true but no cert/key",
                listen.addr, listen.port
            ));
        }
        if listen.addr.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("listener addr '{}' is not an IP address", listen.addr));
        }
    }

    for class in &config.class {
        if class.hosts.is_empty() {
            errors.push(format!("class '{}' has no host patterns", class.name));
        }
        if class.penalty_ceiling_ms == 0 {
            errors.push(format!("class '{}' penalty ceiling cannot be 0", class.name));
        }
        if let Some(spec) = &class.ports {
            if let Err(e) = ember_proto::parse_ports(spec, true) {
                errors.push(format!("class '{}' ports: {e}", class.name));
            }
        }
    }

    if config.limits.max_line < 128 {
        errors.push("limits.max_line below 128 cannot carry real traffic".to_string());
    }

    if config.channeldb.enabled && config.channeldb.path.is_none() {
        errors.push("channeldb.enabled requires channeldb.path".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn base() -> String {
        r#"
        [server]
        name = "irc.example.net"
        sid = "001"
        network = "EmberNet"
        description = "test"

        [[listen]]
        addr = "127.0.0.1"
        port = 6667
        "#
        .to_string()
    }

    #[test]
    fn valid_config_passes() {
        let config = Config::parse(&base(), "test").unwrap();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn collects_multiple_errors() {
        let text = r#"
        [server]
        name = "bad"
        sid = "xx"
        network = "n"
        description = "d"
        casemap = "unicode"
        "#;
        let config = Config::parse(text, "test").unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.len() >= 3, "got {errors:?}");
    }

    #[test]
    fn tls_listener_needs_cert() {
        let text = base().replace("port = 6667", "port = 6697\ntls = true");
        let config = Config::parse(&text, "test").unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("cert/key")));
    }
}
