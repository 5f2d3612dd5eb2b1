// Configuration module for the verifier node
//
// This module loads the on-disk configuration and turns it into the immutable
// `Policy` snapshot the verifier reads. Reloads build a fresh snapshot and
// swap it in whole.

use crate::error::{Result, VerifierError};
use crate::template::MessageTemplate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment prefix for overrides, e.g. `VERIFIER__VERIFICATION__MAX_ATTEMPTS=3`
pub const ENV_PREFIX: &str = "VERIFIER";

/// Largest accepted `timeout_secs`
pub const MAX_TIMEOUT_SECS: u64 = i32::MAX as u64;

/// Verifier node configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VerifierConfig {
    /// Verification timing and enforcement
    pub verification: VerificationConfig,
    /// Identifiers that cause a session to be rejected
    pub denylist: Vec<String>,
    /// Disconnect message templates
    pub messages: MessagesConfig,
    /// Optional separate file holding the `[messages]` table
    pub messages_file: Option<PathBuf>,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Reference TCP host configuration
    pub gateway: GatewayConfig,
    /// Administrative access
    pub admin: AdminConfig,
}

/// Verification timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Disconnect sessions that never attest
    pub require_verification: bool,
    /// Seconds a session has to produce an attestation
    pub timeout_secs: u64,
    /// Delay before the first request is sent, in milliseconds
    pub first_request_delay_ms: u64,
    /// Interval between request resends, in milliseconds
    pub resend_interval_ms: u64,
    /// Maximum number of requests sent per session
    pub max_attempts: u32,
    /// Cadence of the deadline sweep, in milliseconds
    pub sweep_interval_ms: u64,
}

/// Disconnect message templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// Sent when no attestation arrived before the deadline
    pub timeout: String,
    /// Sent when denylisted identifiers were reported
    pub denylisted_default: String,
    /// Per-identifier overrides of `denylisted_default`
    pub per_mod: BTreeMap<String, String>,
    /// Render `&` as the client colour-code escape
    pub translate_color_codes: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
    /// Emit per-request and per-report debug records
    pub debug: bool,
}

/// Reference TCP host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to accept client connections on
    pub bind_address: String,
}

/// Administrative access
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Display names allowed to run `/verifier reload`
    pub operators: Vec<String>,
    /// Secret an operator must pass as `/verifier reload <token>`. Remote
    /// reload is disabled while unset.
    pub reload_token: Option<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            require_verification: true,
            timeout_secs: 25,
            first_request_delay_ms: 2_000,
            resend_interval_ms: 2_000,
            max_attempts: 6,
            sweep_interval_ms: 1_000,
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            timeout: "&cVerification timed out. Please rejoin.".to_string(),
            denylisted_default: "&cPlease remove the blocked mod{plural} ({mods}), then rejoin."
                .to_string(),
            per_mod: BTreeMap::new(),
            translate_color_codes: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            debug: false,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:25580".to_string(),
        }
    }
}

impl VerifierConfig {
    /// Load configuration from a file, layering the optional messages file
    /// and environment overrides on top.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let base = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let mut loaded: VerifierConfig = base.try_deserialize()?;

        if let Some(messages_path) = loaded.messages_file.clone() {
            let messages_path = match path.parent() {
                Some(dir) if messages_path.is_relative() => dir.join(messages_path),
                _ => messages_path,
            };
            let layered = config::Config::builder()
                .add_source(config::File::from(path.to_path_buf()))
                .add_source(config::File::from(messages_path).required(false))
                .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
                .build()?;
            loaded = layered.try_deserialize()?;
        }

        Ok(loaded)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;

        fs::write(path, config_str)
            .map_err(|e| VerifierError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

/// Generate a default configuration file at the given path if it doesn't exist
pub fn ensure_default_config<P: AsRef<Path>>(path: P) -> Result<VerifierConfig> {
    let path = path.as_ref();
    if !path.exists() {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| {
                VerifierError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        let default_config = VerifierConfig::default();
        default_config.to_file(path)?;
        return Ok(default_config);
    }

    VerifierConfig::from_file(path)
}

/// Normalize an identifier the way the denylist and attestations are compared
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Ordered, de-duplicated set of normalized identifiers.
///
/// Iteration follows configuration order, which is the scan order used when
/// choosing a per-identifier message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Denylist {
    ordered: Vec<String>,
    index: HashSet<String>,
}

impl Denylist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let id = normalize_identifier(entry.as_ref());
            if !id.is_empty() && list.index.insert(id.clone()) {
                list.ordered.push(id);
            }
        }
        list
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Immutable verification policy for one reload epoch
#[derive(Debug, Clone)]
pub struct Policy {
    pub version: u64,
    pub require_verification: bool,
    pub timeout: Duration,
    pub first_request_delay: Duration,
    pub resend_interval: Duration,
    pub max_attempts: u32,
    pub sweep_interval: Duration,
    pub denylist: Denylist,
    pub message_templates: HashMap<String, MessageTemplate>,
    pub default_rejection_template: MessageTemplate,
    pub timeout_template: MessageTemplate,
    pub translate_color_codes: bool,
}

impl Policy {
    /// Build and validate a policy from configuration.
    ///
    /// Every template is parsed here; an unknown placeholder, a zero resend
    /// interval or an out-of-range timeout fails the whole build.
    pub fn from_config(config: &VerifierConfig, version: u64) -> Result<Self> {
        let v = &config.verification;
        if v.resend_interval_ms == 0 {
            return Err(VerifierError::Config(
                "verification.resend_interval_ms must be greater than zero".to_string(),
            ));
        }
        if v.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(VerifierError::Config(format!(
                "verification.timeout_secs must be at most {}",
                MAX_TIMEOUT_SECS
            )));
        }
        if v.sweep_interval_ms == 0 {
            return Err(VerifierError::Config(
                "verification.sweep_interval_ms must be greater than zero".to_string(),
            ));
        }

        let mut message_templates = HashMap::new();
        for (id, text) in &config.messages.per_mod {
            let id = normalize_identifier(id);
            if id.is_empty() || text.trim().is_empty() {
                continue;
            }
            message_templates.insert(id, MessageTemplate::parse(text)?);
        }

        Ok(Self {
            version,
            require_verification: v.require_verification,
            timeout: Duration::from_secs(v.timeout_secs),
            first_request_delay: Duration::from_millis(v.first_request_delay_ms),
            resend_interval: Duration::from_millis(v.resend_interval_ms),
            max_attempts: v.max_attempts,
            sweep_interval: Duration::from_millis(v.sweep_interval_ms),
            denylist: Denylist::new(&config.denylist),
            message_templates,
            default_rejection_template: MessageTemplate::parse(&config.messages.denylisted_default)?,
            timeout_template: MessageTemplate::parse(&config.messages.timeout)?,
            translate_color_codes: config.messages.translate_color_codes,
        })
    }
}

/// Shared handle to the current policy snapshot.
///
/// Readers take an `Arc<Policy>` and keep it for the duration of one action;
/// writers replace the whole snapshot.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    current: Arc<RwLock<Arc<Policy>>>,
    next_version: Arc<AtomicU64>,
}

impl PolicyHandle {
    pub fn new(policy: Policy) -> Self {
        let next_version = policy.version + 1;
        Self {
            current: Arc::new(RwLock::new(Arc::new(policy))),
            next_version: Arc::new(AtomicU64::new(next_version)),
        }
    }

    /// Build a handle from configuration
    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        Ok(Self::new(Policy::from_config(config, 1)?))
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Policy> {
        self.current.read().clone()
    }

    /// Validate `config` and swap it in. On error the active policy is kept.
    pub fn apply(&self, config: &VerifierConfig) -> Result<Arc<Policy>> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let policy = Arc::new(Policy::from_config(config, version)?);
        *self.current.write() = policy.clone();
        info!(
            version = policy.version,
            denylist = ?policy.denylist.iter().collect::<Vec<_>>(),
            "Loaded verification policy"
        );
        Ok(policy)
    }

    /// Reload the configuration file and swap in the resulting policy
    pub fn reload_from<P: AsRef<Path>>(&self, path: P) -> Result<Arc<Policy>> {
        let config = VerifierConfig::from_file(path)?;
        self.apply(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let policy = Policy::from_config(&VerifierConfig::default(), 0).unwrap();
        assert!(policy.require_verification);
        assert_eq!(policy.timeout, Duration::from_secs(25));
        assert_eq!(policy.first_request_delay, Duration::from_secs(2));
        assert_eq!(policy.resend_interval, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, 6);
        assert!(policy.denylist.is_empty());
    }

    #[test]
    fn denylist_is_normalized_and_ordered() {
        let list = Denylist::new([" FreeCam", "autototem ", "freecam", "", "  "]);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["freecam", "autototem"]);
        assert!(list.contains("autototem"));
        assert!(!list.contains("FreeCam"));
    }

    #[test]
    fn parses_toml_with_overrides() {
        let config = VerifierConfig::from_toml_str(
            r#"
            denylist = ["FreeCam", "AutoTotem"]

            [verification]
            require_verification = false
            max_attempts = 3

            [messages.per_mod]
            AutoTotem = "no totems, {player}"
            "#,
        )
        .unwrap();

        let policy = Policy::from_config(&config, 7).unwrap();
        assert_eq!(policy.version, 7);
        assert!(!policy.require_verification);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.timeout, Duration::from_secs(25));
        assert!(policy.message_templates.contains_key("autototem"));
    }

    #[test]
    fn bad_placeholder_fails_policy_build() {
        let mut config = VerifierConfig::default();
        config.messages.timeout = "bye {name}".to_string();
        assert!(matches!(
            Policy::from_config(&config, 1),
            Err(VerifierError::Template { .. })
        ));
    }

    #[test]
    fn zero_resend_interval_is_rejected() {
        let mut config = VerifierConfig::default();
        config.verification.resend_interval_ms = 0;
        assert!(matches!(
            Policy::from_config(&config, 1),
            Err(VerifierError::Config(_))
        ));
    }

    #[test]
    fn oversized_timeout_is_rejected() {
        let config = VerifierConfig::from_toml_str(
            "[verification]\ntimeout_secs = 9223372036854775807\n",
        )
        .unwrap();
        assert!(matches!(
            PolicyHandle::from_config(&config),
            Err(VerifierError::Config(_))
        ));

        let mut config = VerifierConfig::default();
        config.verification.timeout_secs = MAX_TIMEOUT_SECS;
        let policy = Policy::from_config(&config, 1).unwrap();
        assert!(tokio::time::Instant::now().checked_add(policy.timeout).is_some());
    }

    #[test]
    fn failed_apply_keeps_previous_policy() {
        let handle = PolicyHandle::from_config(&VerifierConfig::default()).unwrap();
        let before = handle.snapshot();

        let mut bad = VerifierConfig::default();
        bad.messages.denylisted_default = "{oops}".to_string();
        assert!(handle.apply(&bad).is_err());
        assert!(Arc::ptr_eq(&before, &handle.snapshot()));

        let mut good = VerifierConfig::default();
        good.denylist = vec!["xray".to_string()];
        let applied = handle.apply(&good).unwrap();
        assert!(applied.version > before.version);
        assert!(handle.snapshot().denylist.contains("xray"));
    }

    #[test]
    fn loads_from_file_with_messages_file() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("verifier.toml");
        let messages_path = dir.path().join("messages.toml");

        let mut main = fs::File::create(&main_path).unwrap();
        writeln!(
            main,
            "denylist = [\"freecam\"]\nmessages_file = \"messages.toml\"\n"
        )
        .unwrap();
        let mut messages = fs::File::create(&messages_path).unwrap();
        writeln!(
            messages,
            "[messages]\ntimeout = \"too slow {{player}}\"\n"
        )
        .unwrap();

        let config = VerifierConfig::from_file(&main_path).unwrap();
        assert_eq!(config.denylist, vec!["freecam".to_string()]);
        assert_eq!(config.messages.timeout, "too slow {player}");
        assert!(config.messages.translate_color_codes);
    }

    #[test]
    fn ensure_default_config_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("verifier.toml");

        let written = ensure_default_config(&path).unwrap();
        assert!(path.exists());

        let reread = ensure_default_config(&path).unwrap();
        assert_eq!(
            reread.verification.max_attempts,
            written.verification.max_attempts
        );
        assert_eq!(reread.messages.timeout, written.messages.timeout);
    }
}
