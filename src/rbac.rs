//! Role resolution from token groups
//!
//! Three ordinal roles derived from configured group names. Group entries
//! coming from the identity provider may carry a leading `/` (realm-rooted
//! paths); one leading slash is stripped before matching.
use crate::config::Config;

/// Ordinal authorization level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    NoRole = 0,
    Creator = 10,
    Operator = 30,
    Admin = 50,
}

#[derive(Clone, Debug, Default)]
pub struct RbacService {
    creators: String,
    operators: String,
    admins: String,
}

fn normalize(group: &str) -> &str {
    group.strip_prefix('/').unwrap_or(group)
}

impl RbacService {
    pub fn new(creators: Option<String>, operators: Option<String>, admins: Option<String>) -> Self {
        Self {
            creators: creators.unwrap_or_default(),
            operators: operators.unwrap_or_default(),
            admins: admins.unwrap_or_default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.group_creators.clone(),
            config.operator_group(),
            config.group_admins.clone(),
        )
    }

    fn matches(configured: &str, group: &str) -> bool {
        // An empty configured group name never matches anything.
        !configured.is_empty() && normalize(group) == configured
    }

    /// Highest role granted by any of the groups.
    pub fn resolve(&self, groups: &[String]) -> Role {
        let mut role = Role::NoRole;
        for group in groups.iter() {
            if Self::matches(&self.admins, group) {
                return Role::Admin;
            }
            if Self::matches(&self.operators, group) && role < Role::Operator {
                role = Role::Operator;
            }
            if Self::matches(&self.creators, group) && role < Role::Creator {
                role = Role::Creator;
            }
        }
        role
    }

    /// Precondition of the authorization middleware: the caller belongs to
    /// at least one of the configured groups.
    pub fn has_any_configured_group(&self, groups: &[String]) -> bool {
        groups.iter().any(|g| {
            Self::matches(&self.creators, g)
                || Self::matches(&self.operators, g)
                || Self::matches(&self.admins, g)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn service() -> RbacService {
        RbacService::new(
            Some("creators".to_string()),
            Some("operators".to_string()),
            Some("admins".to_string()),
        )
    }

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_picks_highest_role() {
        let rbac = service();
        assert_eq!(rbac.resolve(&groups(&["creators"])), Role::Creator);
        assert_eq!(rbac.resolve(&groups(&["creators", "operators"])), Role::Operator);
        assert_eq!(
            rbac.resolve(&groups(&["creators", "admins", "operators"])),
            Role::Admin
        );
        assert_eq!(rbac.resolve(&groups(&["unrelated"])), Role::NoRole);
        assert_eq!(rbac.resolve(&[]), Role::NoRole);
    }

    #[test]
    fn test_leading_slash_is_stripped_once() {
        let rbac = service();
        assert_eq!(rbac.resolve(&groups(&["/admins"])), Role::Admin);
        assert_eq!(rbac.resolve(&groups(&["//admins"])), Role::NoRole);
    }

    #[test]
    fn test_empty_configured_group_never_matches() {
        let rbac = RbacService::new(None, None, Some("admins".to_string()));
        assert!(!rbac.has_any_configured_group(&groups(&[""])));
        assert_eq!(rbac.resolve(&groups(&[""])), Role::NoRole);
        assert_eq!(rbac.resolve(&groups(&["admins"])), Role::Admin);
    }

    #[test]
    fn test_has_any_configured_group() {
        let rbac = service();
        assert!(rbac.has_any_configured_group(&groups(&["operators", "zzz"])));
        assert!(rbac.has_any_configured_group(&groups(&["/creators"])));
        assert!(!rbac.has_any_configured_group(&groups(&["zzz"])));
        assert!(!rbac.has_any_configured_group(&[]));
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::NoRole < Role::Creator);
        assert!(Role::Creator < Role::Operator);
        assert!(Role::Operator < Role::Admin);
    }
}
