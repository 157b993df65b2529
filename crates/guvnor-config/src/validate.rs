// SPDX-License-Identifier: Apache-2.0

//! Validation and materialization of a loaded configuration.

use std::collections::BTreeSet;

use crate::types::GlobalConfig;
use crate::ConfigError;

/// First port considered when auto-assigning backend ports.
const AUTO_PORT_BASE: u16 = 3000;

/// Validates a configuration in place, materializing derived values.
///
/// Missing hostnames become `{name}.localhost`, missing ports are assigned
/// from 3000 upwards, and the `$PORT` placeholder in commands, arguments,
/// and environment values is replaced with the materialized port.
pub fn validate(config: &mut GlobalConfig) -> Result<(), ConfigError> {
    let mut issues = Vec::new();

    if config.server.http_port == 0 {
        issues.push("server.http_port must be between 1 and 65535".to_string());
    }
    if config.server.https_port == 0 {
        issues.push("server.https_port must be between 1 and 65535".to_string());
    }

    let mut names = BTreeSet::new();
    let mut hostnames = BTreeSet::new();
    let mut ports: BTreeSet<u16> = config
        .apps
        .iter()
        .filter(|app| app.port != 0)
        .map(|app| app.port)
        .collect();

    let mut next_auto = AUTO_PORT_BASE;
    for app in &mut config.apps {
        if app.name.trim().is_empty() {
            issues.push("app name must not be empty".to_string());
            continue;
        }
        if !names.insert(app.name.clone()) {
            issues.push(format!("duplicate app name: {}", app.name));
        }

        if app.command.trim().is_empty() {
            issues.push(format!("app {}: command must not be empty", app.name));
        }

        if app.hostname.trim().is_empty() {
            app.hostname = format!("{}.localhost", app.name);
        }
        app.hostname = app.hostname.to_ascii_lowercase();
        if !hostnames.insert(app.hostname.clone()) {
            issues.push(format!(
                "app {}: duplicate hostname: {}",
                app.name, app.hostname
            ));
        }

        if app.port == 0 {
            while ports.contains(&next_auto) {
                next_auto = next_auto.saturating_add(1);
            }
            app.port = next_auto;
            ports.insert(next_auto);
            next_auto = next_auto.saturating_add(1);
        }

        if app.health_check.enabled {
            if app.health_check.interval_secs == 0 {
                issues.push(format!(
                    "app {}: health_check.interval_secs must be positive",
                    app.name
                ));
            }
            if app.health_check.timeout_secs == 0 {
                issues.push(format!(
                    "app {}: health_check.timeout_secs must be positive",
                    app.name
                ));
            }
            if app.health_check.retries == 0 {
                issues.push(format!(
                    "app {}: health_check.retries must be at least 1",
                    app.name
                ));
            }
        }

        if app.tls.enabled
            && app.tls.auto_cert
            && app.tls.email.trim().is_empty()
            && config.tls.email.trim().is_empty()
        {
            issues.push(format!(
                "app {}: tls.auto_cert requires an email at app or global scope",
                app.name
            ));
        }

        substitute_port(app);
    }

    // Duplicate explicit ports are invisible to the BTreeSet pre-pass above.
    let mut seen_ports = BTreeSet::new();
    for app in &config.apps {
        if app.port != 0 && !seen_ports.insert(app.port) {
            issues.push(format!("app {}: duplicate port: {}", app.name, app.port));
        }
    }

    if config.tls.enabled && config.tls.auto_cert && config.tls.email.trim().is_empty() {
        issues.push("tls.auto_cert requires tls.email to be set".to_string());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid { issues })
    }
}

/// Replaces the `$PORT` placeholder with the materialized port value.
fn substitute_port(app: &mut crate::types::AppSpec) {
    let port = app.port.to_string();
    if app.command.contains("$PORT") {
        app.command = app.command.replace("$PORT", &port);
    }
    for arg in &mut app.args {
        if arg.contains("$PORT") {
            *arg = arg.replace("$PORT", &port);
        }
    }
    for value in app.env.values_mut() {
        if value.contains("$PORT") {
            *value = value.replace("$PORT", &port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppSpec, AppTlsConfig, GlobalConfig, HealthCheckConfig};
    use std::collections::BTreeMap;

    fn app(name: &str) -> AppSpec {
        AppSpec {
            name: name.to_string(),
            command: "sleep".to_string(),
            args: vec!["60".to_string()],
            ..AppSpec::default()
        }
    }

    #[test]
    fn materializes_hostname_and_port() {
        let mut config = GlobalConfig {
            apps: vec![app("web"), app("api")],
            ..GlobalConfig::default()
        };
        validate(&mut config).unwrap();

        assert_eq!(config.apps[0].hostname, "web.localhost");
        assert_eq!(config.apps[1].hostname, "api.localhost");
        assert_eq!(config.apps[0].port, 3000);
        assert_eq!(config.apps[1].port, 3001);
    }

    #[test]
    fn auto_assignment_skips_taken_ports() {
        let mut first = app("web");
        first.port = 3000;
        let mut config = GlobalConfig {
            apps: vec![first, app("api")],
            ..GlobalConfig::default()
        };
        validate(&mut config).unwrap();
        assert_eq!(config.apps[1].port, 3001);
    }

    #[test]
    fn rejects_duplicate_names_hostnames_and_ports() {
        let mut a = app("web");
        a.port = 4000;
        let mut b = app("web");
        b.hostname = "web.localhost".to_string();
        b.port = 4000;
        let mut config = GlobalConfig {
            apps: vec![a, b],
            ..GlobalConfig::default()
        };

        let err = validate(&mut config).unwrap_err();
        let joined = err.to_string();
        assert!(joined.contains("duplicate app name"));
        assert!(joined.contains("duplicate hostname"));
        assert!(joined.contains("duplicate port"));
    }

    #[test]
    fn auto_cert_requires_email() {
        let mut config = GlobalConfig::default();
        config.tls.enabled = true;
        config.tls.auto_cert = true;
        let err = validate(&mut config).unwrap_err();
        assert!(err.to_string().contains("tls.email"));

        config.tls.email = "ops@example.com".to_string();
        validate(&mut config).unwrap();
    }

    #[test]
    fn per_app_auto_cert_accepts_global_email() {
        let mut spec = app("web");
        spec.tls = AppTlsConfig {
            enabled: true,
            auto_cert: true,
            ..AppTlsConfig::default()
        };
        let mut config = GlobalConfig {
            apps: vec![spec],
            ..GlobalConfig::default()
        };
        assert!(validate(&mut config).is_err());

        config.tls.email = "ops@example.com".to_string();
        validate(&mut config).unwrap();
    }

    #[test]
    fn health_check_bounds_are_enforced() {
        let mut spec = app("web");
        spec.health_check = HealthCheckConfig {
            enabled: true,
            interval_secs: 0,
            timeout_secs: 0,
            retries: 0,
            ..HealthCheckConfig::default()
        };
        let mut config = GlobalConfig {
            apps: vec![spec],
            ..GlobalConfig::default()
        };

        let err = validate(&mut config).unwrap_err();
        assert_eq!(err.issues().len(), 3);
    }

    #[test]
    fn substitutes_port_placeholder_everywhere() {
        let mut spec = app("web");
        spec.port = 3123;
        spec.args = vec!["--port".to_string(), "$PORT".to_string()];
        spec.env = BTreeMap::from([("PORT".to_string(), "$PORT".to_string())]);
        let mut config = GlobalConfig {
            apps: vec![spec],
            ..GlobalConfig::default()
        };
        validate(&mut config).unwrap();

        assert_eq!(config.apps[0].args[1], "3123");
        assert_eq!(config.apps[0].env.get("PORT").unwrap(), "3123");
    }
}
