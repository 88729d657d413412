//! The cached user profile and coarse role checks.

use serde::{Deserialize, Serialize};

/// Role names that grant administrative access anywhere in the suite.
const ADMIN_ROLES: [&str; 3] = ["admin", "super_admin", "superadmin"];

/// Profile returned by the identity endpoint and cached beside the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserProfile {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|held| held == role)
    }

    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_any_role(&ADMIN_ROLES)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::UserProfile;

    fn profile(roles: &[&str]) -> UserProfile {
        UserProfile {
            id: "u-7".to_string(),
            display_name: "Grace".to_string(),
            roles: roles.iter().map(|role| (*role).to_string()).collect(),
        }
    }

    #[test]
    fn role_checks_match_exact_names() {
        let user = profile(&["member", "calendar-editor"]);
        assert!(user.has_role("member"));
        assert!(!user.has_role("Member"));
        assert!(user.has_any_role(&["billing", "calendar-editor"]));
        assert!(!user.has_any_role(&["billing"]));
    }

    #[test]
    fn every_admin_spelling_is_recognized() {
        for role in ["admin", "super_admin", "superadmin"] {
            assert!(profile(&[role]).is_admin(), "{role} should be admin");
        }
        assert!(!profile(&["moderator"]).is_admin());
    }

    #[test]
    fn wire_shape_uses_camel_case() -> Result<()> {
        let user: UserProfile = serde_json::from_str(
            r#"{"id": "u-1", "displayName": "Ada", "roles": ["admin"]}"#,
        )?;
        assert_eq!(user.display_name, "Ada");
        assert!(user.is_admin());

        let missing_roles: UserProfile = serde_json::from_str(r#"{"id": "u-2", "displayName": "Joan"}"#)?;
        assert!(missing_roles.roles.is_empty());
        Ok(())
    }
}
