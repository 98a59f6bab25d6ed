use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::auth::{
    DEFAULT_CACHE_TTL_SECONDS, DEFAULT_LEEWAY_SECONDS, DEFAULT_VERIFIER_TTL_SECONDS,
    JwksCacheOptions, ResolverOptions, ValidatorOptions,
};
use crate::db::{DatabaseConfig, MigratorOptions};

pub const CONFIG_ENV_VAR: &str = "MULTITENANT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "multitenant.json";

/// Full service configuration.
///
/// Every section is optional in the config file; CLI flags are applied on
/// top by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub database: DatabaseConfig,
    /// Tenant-facing listener.
    pub public_bind: String,
    /// Admin listener. Keep this on a trusted interface.
    pub admin_bind: String,
    pub auth: AuthConfig,
    pub migration: MigrationConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            public_bind: "0.0.0.0:8080".to_string(),
            admin_bind: "127.0.0.1:8081".to_string(),
            auth: AuthConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Expected `aud` claim. Audience is not checked when unset.
    pub audience: Option<String>,
    pub leeway_seconds: u64,
    /// How long a resolved issuer-to-tenant mapping is reused.
    pub verifier_ttl_seconds: u64,
    pub key_set_ttl_seconds: u64,
    /// Keep serving a tenant's last known keys when its key set endpoint is down.
    pub allow_stale_keys: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            audience: None,
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
            verifier_ttl_seconds: DEFAULT_VERIFIER_TTL_SECONDS,
            key_set_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            allow_stale_keys: true,
        }
    }
}

impl AuthConfig {
    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            audience: self.audience.clone(),
            leeway_seconds: self.leeway_seconds,
        }
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            verifier_ttl: Duration::from_secs(self.verifier_ttl_seconds),
            jwks: JwksCacheOptions {
                cache_ttl: Duration::from_secs(self.key_set_ttl_seconds),
                allow_stale: self.allow_stale_keys,
                ..JwksCacheOptions::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationConfig {
    pub out_of_order: bool,
    pub baseline_on_migrate: bool,
    /// Start even when some tenant partitions fail to migrate. Those tenants
    /// are marked unavailable.
    pub allow_degraded: bool,
}

impl MigrationConfig {
    pub fn migrator_options(&self) -> MigratorOptions {
        MigratorOptions {
            out_of_order: self.out_of_order,
            baseline_on_migrate: self.baseline_on_migrate,
        }
    }
}

/// Locate the config file: `$MULTITENANT_CONFIG` if set, else
/// `./multitenant.json` if it exists.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(p));
    }

    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    candidate.exists().then_some(candidate)
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

/// Expand `${VAR}` in every string value, leaving keys untouched.
fn expand_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env_vars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(expand_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_value(v)))
                .collect(),
        ),
        other => other,
    }
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let value: Value = serde_json::from_str(&raw)?;
        Ok(serde_json::from_value(expand_value(value))?)
    }

    /// Load from the resolved config file, or defaults when there is none.
    pub fn load() -> anyhow::Result<Self> {
        match resolve_config_path() {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }
}
