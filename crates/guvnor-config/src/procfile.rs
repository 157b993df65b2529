// SPDX-License-Identifier: Apache-2.0

//! Procfile-style process list parsing.

use crate::types::AppSpec;
use crate::ConfigError;

/// Parses `name: command args...` lines into app specs.
///
/// Hostnames and ports are left for validation to materialize. Blank
/// lines and `#` comments are skipped.
pub fn parse(content: &str) -> Result<Vec<AppSpec>, ConfigError> {
    let mut apps: Vec<AppSpec> = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, rest)) = line.split_once(':') else {
            return Err(ConfigError::Procfile {
                line: idx + 1,
                reason: "expected `name: command`".to_string(),
            });
        };

        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(ConfigError::Procfile {
                line: idx + 1,
                reason: format!("invalid process name `{name}`"),
            });
        }
        if apps.iter().any(|app| app.name == name) {
            return Err(ConfigError::Procfile {
                line: idx + 1,
                reason: format!("duplicate process name `{name}`"),
            });
        }

        let mut words = rest.split_whitespace().map(ToString::to_string);
        let Some(command) = words.next() else {
            return Err(ConfigError::Procfile {
                line: idx + 1,
                reason: format!("process `{name}` has no command"),
            });
        };

        apps.push(AppSpec {
            name: name.to_string(),
            command,
            args: words.collect(),
            ..AppSpec::default()
        });
    }

    Ok(apps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_commands_and_args() {
        let apps = parse("web: node server.js --port $PORT\napi: ./api\n").unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].name, "web");
        assert_eq!(apps[0].command, "node");
        assert_eq!(apps[0].args, vec!["server.js", "--port", "$PORT"]);
        assert_eq!(apps[1].command, "./api");
        assert!(apps[1].args.is_empty());
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let apps = parse("# frontend\n\nweb: node server.js\n").unwrap();
        assert_eq!(apps.len(), 1);
    }

    #[test]
    fn rejects_missing_separator() {
        let err = parse("web node server.js").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = parse("web: a\nweb: b\n").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_empty_command() {
        let err = parse("web:   ").unwrap_err();
        assert!(err.to_string().contains("no command"));
    }
}
