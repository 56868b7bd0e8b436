use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ROLE_PREFIX: &str = "ROLE_";

fn normalize_role(role: &str) -> &str {
    role.strip_prefix(ROLE_PREFIX).unwrap_or(role)
}

/// An authenticated caller: an identity plus the roles it holds.
///
/// Principals are handed to the engine by the auth provider and never change
/// during a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    name: String,
    roles: BTreeSet<String>,
}

impl Principal {
    pub fn new<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            roles: roles
                .into_iter()
                .map(|r| normalize_role(r.as_ref()).to_string())
                .collect(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            roles: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(normalize_role(role))
    }
}

/// Access rule attached to a field when it is registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AccessPolicy {
    #[default]
    Public,
    Role(String),
    /// The principal must hold at least one of the listed roles.
    AnyOf(Vec<String>),
}

impl AccessPolicy {
    pub fn role(role: impl Into<String>) -> Self {
        Self::Role(role.into())
    }

    pub fn any_of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOf(roles.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, principal: &Principal) -> bool {
        match self {
            AccessPolicy::Public => true,
            AccessPolicy::Role(role) => principal.has_role(role),
            AccessPolicy::AnyOf(roles) => roles.iter().any(|r| principal.has_role(r)),
        }
    }
}

/// Checks `policy` for `principal` before anything at `coordinate` runs.
pub fn authorize(principal: &Principal, policy: &AccessPolicy, coordinate: &str) -> Result<()> {
    if policy.allows(principal) {
        return Ok(());
    }

    tracing::info!(
        principal = principal.name(),
        coordinate,
        ?policy,
        "access denied"
    );
    Err(Error::Unauthorized {
        coordinate: coordinate.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Stand-in for the auth provider: resolves already-authenticated user
/// names to principals.
#[derive(Debug, Clone, Default)]
pub struct PrincipalDirectory {
    users: HashMap<String, Principal>,
}

impl PrincipalDirectory {
    pub fn from_users(users: &[UserConfig]) -> Self {
        Self {
            users: users
                .iter()
                .map(|u| (u.name.clone(), Principal::new(u.name.clone(), &u.roles)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Principal> {
        self.users.get(name)
    }

    /// Unknown names resolve to the anonymous principal.
    pub fn resolve(&self, name: &str) -> Principal {
        self.get(name).cloned().unwrap_or_else(Principal::anonymous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_role_policies() {
        let admin = Principal::new("arnold", ["ADMIN"]);
        let user = Principal::new("pallab", ["USER"]);
        let both = Principal::new("steve", ["ADMIN", "USER"]);

        assert!(AccessPolicy::Public.allows(&Principal::anonymous()));

        let admin_only = AccessPolicy::role("ADMIN");
        assert!(admin_only.allows(&admin));
        assert!(!admin_only.allows(&user));
        assert!(admin_only.allows(&both));

        let any = AccessPolicy::any_of(["ADMIN", "USER"]);
        assert!(any.allows(&admin));
        assert!(any.allows(&user));
        assert!(!any.allows(&Principal::anonymous()));
    }

    #[test]
    fn test_role_prefix_is_ignored() {
        let principal = Principal::new("arnold", ["ROLE_ADMIN"]);
        assert!(principal.has_role("ADMIN"));
        assert!(principal.has_role("ROLE_ADMIN"));
        assert_eq!(principal.roles().collect::<Vec<_>>(), vec!["ADMIN"]);
    }

    #[test]
    fn test_authorize_denial() {
        let user = Principal::new("pallab", ["USER"]);
        let err = authorize(&user, &AccessPolicy::role("ADMIN"), "Query.customers").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(authorize(&user, &AccessPolicy::role("USER"), "Query.customerById").is_ok());
    }

    #[test]
    fn test_directory_lookup() {
        let directory = PrincipalDirectory::from_users(&[UserConfig {
            name: "arnold".to_string(),
            roles: vec!["ADMIN".to_string()],
        }]);

        assert!(directory.resolve("arnold").has_role("ADMIN"));
        let unknown = directory.resolve("mallory");
        assert_eq!(unknown, Principal::anonymous());
    }
}
