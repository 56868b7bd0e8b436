//! Engine configuration, loaded from JSON.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context as _};
use serde::{Deserialize, Serialize};

use crate::auth::UserConfig;
use crate::subscription::{Pacing, DEFAULT_LIMIT};

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct Config {
    pub subscription: SubscriptionConfig,
    pub schema: SchemaConfig,

    /// Department names handed out to new students in rotation. When empty
    /// the deterministic fixture source is used.
    pub departments: Vec<String>,

    /// Known users and their roles.
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Milliseconds between two events of a stream.
    pub interval_ms: u64,

    /// Events per stream before it completes; `null` keeps streams open
    /// until they are cancelled.
    pub limit: Option<u64>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            limit: Some(DEFAULT_LIMIT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct SchemaConfig {
    /// Refuse to build a schema where a type used in list position resolves
    /// an object field one parent at a time.
    pub deny_unbatched_lists: bool,
}

impl Config {
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let mut config: Config = serde_json::from_str(raw).context("invalid configuration")?;
        config.validate()?;
        if config.users.is_empty() {
            config.users = default_users();
        }
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read configuration from {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Default pacing for subscription fields.
    pub fn pacing(&self) -> Pacing {
        Pacing {
            interval: Duration::from_millis(self.subscription.interval_ms),
            limit: self.subscription.limit,
        }
    }

    /// Configured users, or the built-in ones when none are configured.
    pub fn users(&self) -> Vec<UserConfig> {
        if self.users.is_empty() {
            default_users()
        } else {
            self.users.clone()
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.subscription.interval_ms == 0 {
            bail!("subscription.interval_ms must be greater than zero");
        }
        if self.departments.iter().any(|d| d.trim().is_empty()) {
            bail!("department names must not be blank");
        }
        if let Some(user) = self.users.iter().find(|u| u.name.trim().is_empty()) {
            bail!("user with roles {:?} has no name", user.roles);
        }
        Ok(())
    }
}

fn default_users() -> Vec<UserConfig> {
    [
        ("pallab", &["USER"][..]),
        ("arnold", &["ADMIN"][..]),
        ("steve", &["ADMIN", "USER"][..]),
    ]
    .into_iter()
    .map(|(name, roles)| UserConfig {
        name: name.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_json_str("{}").unwrap();

        assert_eq!(
            config.pacing(),
            Pacing::bounded(Duration::from_secs(1), 10)
        );
        assert!(!config.schema.deny_unbatched_lists);
        assert!(config.departments.is_empty());
        assert_eq!(
            config.users.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(),
            vec!["pallab", "arnold", "steve"]
        );
    }

    #[test]
    fn test_null_limit_means_unbounded() {
        let config = Config::from_json_str(
            r#"{ "subscription": { "interval_ms": 250, "limit": null } }"#,
        )
        .unwrap();

        assert_eq!(
            config.pacing(),
            Pacing::unbounded(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_users_and_departments() {
        let config = Config::from_json_str(
            r#"{
                "departments": ["Physics", "Art"],
                "users": [{ "name": "kim", "roles": ["ROLE_ADMIN"] }],
                "schema": { "deny_unbatched_lists": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.departments, vec!["Physics", "Art"]);
        assert_eq!(config.users().len(), 1);
        assert!(config.schema.deny_unbatched_lists);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_json_str(r#"{ "subscription": { "interval_ms": 0 } }"#).is_err());
        assert!(Config::from_json_str(r#"{ "departments": [" "] }"#).is_err());
        assert!(Config::from_json_str(r#"{ "unknown": 1 }"#).is_err());
        assert!(Config::from_json_str("not json").is_err());
    }

    #[test]
    fn test_from_missing_path() {
        let err = Config::from_path("/nonexistent/convoy.json").unwrap_err();
        assert!(err.to_string().contains("could not read configuration"));
    }
}
