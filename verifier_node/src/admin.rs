//! Administrative commands.
//!
//! Only one command exists: `/verifier reload <token>`, which rereads the
//! config file and swaps in a new policy. Callers need the `verifier.reload`
//! permission: the sender must be listed under `[admin] operators` and present
//! the `[admin] reload_token` secret. Display names are chosen by the client,
//! so the name alone never grants anything.

use crate::config::{PolicyHandle, VerifierConfig};
use crate::error::{Result, VerifierError};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Permission required to reload the policy
pub const RELOAD_PERMISSION: &str = "verifier.reload";

/// Command word
pub const COMMAND: &str = "verifier";

pub const USAGE: &str = "Usage: /verifier reload <token>";

/// A parsed `/verifier` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Reload { token: Option<String> },
    Usage,
}

impl AdminCommand {
    /// Parse a command line. Returns `None` for lines that are not
    /// `/verifier` commands at all.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.trim().strip_prefix('/')?.split_whitespace();
        if !words.next()?.eq_ignore_ascii_case(COMMAND) {
            return None;
        }
        let args: Vec<&str> = words.collect();
        match args.as_slice() {
            [arg] if arg.eq_ignore_ascii_case("reload") => {
                Some(AdminCommand::Reload { token: None })
            }
            [arg, token] if arg.eq_ignore_ascii_case("reload") => Some(AdminCommand::Reload {
                token: Some(token.to_string()),
            }),
            _ => Some(AdminCommand::Usage),
        }
    }
}

#[derive(Debug, Default)]
struct Grants {
    operators: HashSet<String>,
    reload_token: Option<String>,
}

impl Grants {
    fn from_config(config: &VerifierConfig) -> Self {
        let operators = config
            .admin
            .operators
            .iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        let reload_token = config
            .admin
            .reload_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        Self {
            operators,
            reload_token,
        }
    }
}

/// Executes admin commands against the live policy
#[derive(Debug)]
pub struct Admin {
    config_path: PathBuf,
    policy: PolicyHandle,
    grants: RwLock<Grants>,
}

impl Admin {
    pub fn new(config_path: impl Into<PathBuf>, policy: PolicyHandle, config: &VerifierConfig) -> Self {
        Self {
            config_path: config_path.into(),
            policy,
            grants: RwLock::new(Grants::from_config(config)),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// True if `sender`, presenting `token`, holds `permission`.
    pub fn has_permission(&self, sender: &str, token: Option<&str>, permission: &str) -> bool {
        if permission != RELOAD_PERMISSION {
            return false;
        }
        let grants = self.grants.read();
        let token_matches = match (grants.reload_token.as_deref(), token) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        };
        token_matches && grants.operators.contains(&sender.to_lowercase())
    }

    /// Reload the config file, swap the policy and refresh the grants.
    pub fn reload(&self) -> Result<u64> {
        let config = VerifierConfig::from_file(&self.config_path)?;
        let policy = self.policy.apply(&config)?;
        *self.grants.write() = Grants::from_config(&config);
        Ok(policy.version)
    }

    /// Run `command` on behalf of `sender` and return the reply text.
    pub fn execute(&self, sender: &str, command: AdminCommand) -> String {
        match command {
            AdminCommand::Usage => USAGE.to_string(),
            AdminCommand::Reload { token } => {
                match self
                    .authorize(sender, token.as_deref())
                    .and_then(|_| self.reload())
                {
                    Ok(version) => {
                        info!(sender, version, "Verifier reloaded");
                        "Verifier reloaded.".to_string()
                    }
                    Err(VerifierError::PermissionDenied(reason)) => {
                        warn!(sender, "Reload refused: {}", reason);
                        "No permission.".to_string()
                    }
                    Err(e) => {
                        warn!(sender, "Verifier reload failed: {}", e);
                        format!("Reload failed: {}", e)
                    }
                }
            }
        }
    }

    fn authorize(&self, sender: &str, token: Option<&str>) -> Result<()> {
        if self.has_permission(sender, token, RELOAD_PERMISSION) {
            Ok(())
        } else {
            Err(VerifierError::PermissionDenied(format!(
                "{} lacks {}",
                sender, RELOAD_PERMISSION
            )))
        }
    }
}
