//! Credentials for the two hops, from the environment and an optional `.env`.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// Host used when `JUMP_HOST` / `DEST_HOST` is not set.
pub const DEFAULT_HOST: &str = "lxplus9.cern.ch";

/// File read from the working directory if present.
pub const ENV_FILE: &str = ".env";

/// Characters a shell would treat specially. The `ssh` command line is split
/// on whitespace locally and parsed by a shell on the jump host.
const SHELL_SPECIAL: &[char] = &[
    '\'', '"', '\\', '`', '$', ';', '&', '|', '<', '>', '(', ')', '{', '}', '*', '?', '!', '#',
    '~',
];

/// Host, user and password for one hop.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// `user@host`.
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// The command line that opens this hop.
    pub fn ssh_command(&self) -> String {
        format!("ssh -t {}", self.target())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Settings that were unset or empty, or that cannot go on a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub missing: Vec<&'static str>,
    /// Users and hosts containing whitespace, control or shell characters.
    pub invalid: Vec<&'static str>,
}

impl ConfigError {
    /// Itemized report, one setting per line.
    pub fn report<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        if !self.missing.is_empty() {
            writeln!(out, "Error: Missing configuration:")?;
            for name in &self.missing {
                writeln!(out, "  - {name}")?;
            }
        }
        if !self.invalid.is_empty() {
            writeln!(out, "Error: Invalid configuration:")?;
            for name in &self.invalid {
                writeln!(out, "  - {name} (no spaces or shell characters allowed)")?;
            }
        }
        writeln!(out, "\nPlease create a {ENV_FILE} file with your SSH credentials")
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.missing.is_empty() {
            write!(f, "missing configuration: {}", self.missing.join(", "))?;
        }
        if !self.invalid.is_empty() {
            if !self.missing.is_empty() {
                f.write_str("; ")?;
            }
            write!(f, "invalid configuration: {}", self.invalid.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub jump: Credentials,
    pub dest: Credentials,
}

impl Config {
    /// Load from the process environment, falling back to `.env` in the
    /// working directory for anything the environment does not set.
    pub fn load() -> Result<Self, ConfigError> {
        let file = read_env_file(Path::new(ENV_FILE));
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    /// Users and hosts must be usable as a single command-line word.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            get(key).unwrap_or_else(|| {
                missing.push(key);
                String::new()
            })
        };

        let jump_user = required("JUMP_USER");
        let jump_password = required("JUMP_PASSWORD");
        let dest_user = required("DEST_USER");
        let dest_password = required("DEST_PASSWORD");

        let host = |key: &str| get(key).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let jump_host = host("JUMP_HOST");
        let dest_host = host("DEST_HOST");

        let invalid: Vec<&'static str> = [
            ("JUMP_HOST", &jump_host),
            ("JUMP_USER", &jump_user),
            ("DEST_HOST", &dest_host),
            ("DEST_USER", &dest_user),
        ]
        .into_iter()
        .filter(|(_, value)| !is_command_word(value))
        .map(|(key, _)| key)
        .collect();

        if !missing.is_empty() || !invalid.is_empty() {
            return Err(ConfigError { missing, invalid });
        }

        Ok(Self {
            jump: Credentials {
                host: jump_host,
                user: jump_user,
                password: jump_password,
            },
            dest: Credentials {
                host: dest_host,
                user: dest_user,
                password: dest_password,
            },
        })
    }
}

/// Whether `value` survives both whitespace splitting and a remote shell.
fn is_command_word(value: &str) -> bool {
    !value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || SHELL_SPECIAL.contains(&c))
}

/// Parse a dotenv file without touching the process environment.
///
/// A missing file is normal; a malformed line is logged and skipped.
pub fn read_env_file(path: &Path) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) if e.not_found() => {
            log::debug!("no {} file", path.display());
            return values;
        }
        Err(e) => {
            log::warn!("could not read {}: {e}", path.display());
            return values;
        }
    };

    for item in iter {
        match item {
            Ok((key, value)) => {
                values.insert(key, value);
            }
            Err(e) => log::warn!("skipping entry in {}: {e}", path.display()),
        }
    }
    log::debug!("read {} entries from {}", values.len(), path.display());
    values
}
