//! Role resolution
//!
//! Maps a caller's raw role-name set to exactly one policy tier. Resolution
//! is a pure function of the input set; it is recomputed per request because
//! role membership can change between requests.

use serde::{Deserialize, Serialize};

/// Policy tiers, most privileged first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleName {
    Admin,
    PowerUser,
    StandardUser,
    ReadonlyUser,
}

impl RoleName {
    /// Fixed precedence order used by the resolver
    pub const PRECEDENCE: [RoleName; 4] = [
        RoleName::Admin,
        RoleName::PowerUser,
        RoleName::StandardUser,
        RoleName::ReadonlyUser,
    ];

    /// Canonical policy-document key for this tier
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleName::Admin => "admin",
            RoleName::PowerUser => "power_user",
            RoleName::StandardUser => "standard_user",
            RoleName::ReadonlyUser => "readonly_user",
        }
    }

    /// Match a raw role name against this tier, including common aliases
    /// ("power" for power_user, "user" for standard_user).
    fn matches(&self, raw: &str) -> bool {
        if raw == self.as_str() {
            return true;
        }
        match self {
            RoleName::PowerUser => raw == "power",
            RoleName::StandardUser => raw == "user",
            _ => false,
        }
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of role resolution
#[derive(Debug, Clone)]
pub struct RoleResolution {
    /// The resolved policy tier
    pub role: RoleName,
    /// Set when no input role was recognized and the safe default applied
    pub warning: Option<String>,
}

/// Resolve a raw role-name set to the highest-precedence tier present.
///
/// An unrecognized set resolves to `standard_user` with a warning rather
/// than an error: an unknown role must never silently grant elevated
/// privilege, but it should not fail the request either.
pub fn resolve(roles: &[String]) -> RoleResolution {
    for tier in RoleName::PRECEDENCE {
        if roles.iter().any(|r| tier.matches(r)) {
            return RoleResolution {
                role: tier,
                warning: None,
            };
        }
    }

    RoleResolution {
        role: RoleName::StandardUser,
        warning: Some(format!(
            "No recognized role in {:?}, defaulting to standard_user",
            roles
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(roles: &[&str]) -> Vec<String> {
        roles.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_highest_precedence_wins() {
        let resolution = resolve(&names(&["standard_user", "admin", "readonly_user"]));
        assert_eq!(resolution.role, RoleName::Admin);
        assert!(resolution.warning.is_none());
    }

    #[test]
    fn test_power_user_over_standard() {
        let resolution = resolve(&names(&["standard_user", "power_user"]));
        assert_eq!(resolution.role, RoleName::PowerUser);
    }

    #[test]
    fn test_readonly_only() {
        let resolution = resolve(&names(&["readonly_user"]));
        assert_eq!(resolution.role, RoleName::ReadonlyUser);
    }

    #[test]
    fn test_aliases() {
        assert_eq!(resolve(&names(&["power"])).role, RoleName::PowerUser);
        assert_eq!(resolve(&names(&["user"])).role, RoleName::StandardUser);
    }

    #[test]
    fn test_unrecognized_defaults_to_standard_with_warning() {
        let resolution = resolve(&names(&["splunk_ninja"]));
        assert_eq!(resolution.role, RoleName::StandardUser);
        assert!(resolution.warning.is_some());
    }

    #[test]
    fn test_empty_set_defaults_to_standard_with_warning() {
        let resolution = resolve(&[]);
        assert_eq!(resolution.role, RoleName::StandardUser);
        assert!(resolution.warning.is_some());
    }

    #[test]
    fn test_unrecognized_never_elevates() {
        // "administrator" is not "admin" and must not resolve above the default
        let resolution = resolve(&names(&["administrator"]));
        assert_eq!(resolution.role, RoleName::StandardUser);
    }
}
