//! Default roles and permissions
//!
//! Seeding is idempotent: existing permissions and roles are reused as they
//! are, and the default administrator is only created when missing.

use prodtrack_core::{NewPermission, NewRole, Permission, Repositories};

use crate::auth::password::CredentialHasher;
use crate::error::ApiResult;
use crate::services::{AccountDraft, UserService};

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";

/// (name prefix, resource, plural label)
const RESOURCES: [(&str, &str, &str); 6] = [
    ("users", "user", "users"),
    ("tasks", "task", "tasks"),
    ("projects", "project", "projects"),
    ("organizations", "organization", "organizations"),
    ("departments", "department", "departments"),
    ("teams", "team", "teams"),
];

const CRUD: [(&str, &str); 4] = [
    ("create", "Create"),
    ("read", "Read"),
    ("update", "Update"),
    ("delete", "Delete"),
];

const EXTRA_PERMISSIONS: [(&str, &str, &str, &str); 3] = [
    (
        "organizations:manage_members",
        "organization",
        "manage_members",
        "Add or remove organization members",
    ),
    (
        "teams:manage_members",
        "team",
        "manage_members",
        "Add or remove team members",
    ),
    ("teams:manage_lead", "team", "manage_lead", "Set or update team lead"),
];

/// Permission catalogue in creation order
pub fn default_permissions() -> Vec<NewPermission> {
    let mut permissions = Vec::with_capacity(RESOURCES.len() * CRUD.len() + EXTRA_PERMISSIONS.len());

    for (prefix, resource, label) in RESOURCES {
        for (action, verb) in CRUD {
            permissions.push(NewPermission {
                name: format!("{prefix}:{action}"),
                resource: resource.to_string(),
                action: action.to_string(),
                description: Some(format!("{verb} {label}")),
            });
        }
        for (name, extra_resource, action, description) in EXTRA_PERMISSIONS {
            if extra_resource == resource {
                permissions.push(NewPermission {
                    name: name.to_string(),
                    resource: resource.to_string(),
                    action: action.to_string(),
                    description: Some(description.to_string()),
                });
            }
        }
    }
    permissions
}

fn is_work_item(p: &Permission) -> bool {
    matches!(p.resource.as_str(), "task" | "project")
}

fn is_contributor_action(p: &Permission) -> bool {
    matches!(p.action.as_str(), "create" | "read" | "update")
}

/// A default role and the permissions it is granted
pub struct RoleSeed {
    pub name: &'static str,
    pub description: &'static str,
    pub grants: fn(&Permission) -> bool,
}

pub const DEFAULT_ROLES: [RoleSeed; 6] = [
    RoleSeed {
        name: "admin",
        description: "Administrator with full access",
        grants: |_| true,
    },
    RoleSeed {
        name: "user",
        description: "Regular user with limited access",
        grants: |p| {
            (is_work_item(p) && is_contributor_action(p))
                || (matches!(p.resource.as_str(), "organization" | "department" | "team")
                    && p.action == "read")
        },
    },
    RoleSeed {
        name: "viewer",
        description: "Read-only access",
        grants: |p| p.action == "read",
    },
    RoleSeed {
        name: "organization_manager",
        description: "Manage organizations, departments, and teams",
        grants: |p| {
            matches!(p.resource.as_str(), "organization" | "department" | "team")
                || (is_work_item(p) && is_contributor_action(p))
        },
    },
    RoleSeed {
        name: "team_lead",
        description: "Lead a team with task and member management",
        grants: |p| {
            (p.resource == "team"
                && matches!(p.action.as_str(), "read" | "update" | "manage_members"))
                || (matches!(p.resource.as_str(), "organization" | "department")
                    && p.action == "read")
                || is_work_item(p)
        },
    },
    RoleSeed {
        name: "department_manager",
        description: "Manage departments and teams within an organization",
        grants: |p| {
            matches!(p.resource.as_str(), "department" | "team")
                || (p.resource == "organization" && p.action == "read")
                || (is_work_item(p) && is_contributor_action(p))
        },
    },
];

/// What a seeding run created
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub admin_created: bool,
}

/// Create the default permissions, roles and administrator
pub async fn seed_rbac(
    repos: &Repositories,
    hasher: &CredentialHasher,
    admin_password: &str,
) -> ApiResult<SeedReport> {
    let mut report = SeedReport::default();

    let mut permissions = Vec::new();
    for draft in default_permissions() {
        let permission = match repos.permissions.find_by_name(&draft.name).await? {
            Some(existing) => existing,
            None => {
                report.permissions_created += 1;
                repos.permissions.create(draft).await?
            }
        };
        permissions.push(permission);
    }
    tracing::info!(
        total = permissions.len(),
        created = report.permissions_created,
        "Permissions seeded"
    );

    let mut admin_role_id = None;
    for seed in &DEFAULT_ROLES {
        let role = match repos.roles.find_by_name(seed.name).await? {
            Some(existing) => existing,
            None => {
                let role = repos
                    .roles
                    .create(NewRole {
                        name: seed.name.to_string(),
                        description: Some(seed.description.to_string()),
                    })
                    .await?;
                let granted: Vec<_> = permissions
                    .iter()
                    .filter(|p| (seed.grants)(p))
                    .map(|p| p.id)
                    .collect();
                repos.roles.set_permissions(role.id, &granted).await?;
                report.roles_created += 1;
                role
            }
        };
        if seed.name == "admin" {
            admin_role_id = Some(role.id);
        }
    }
    tracing::info!(created = report.roles_created, "Roles seeded");

    if repos
        .users
        .find_by_username(DEFAULT_ADMIN_USERNAME)
        .await?
        .is_none()
    {
        let users = UserService::new(repos, hasher);
        let admin = users
            .create_user(
                AccountDraft {
                    email: DEFAULT_ADMIN_EMAIL.to_string(),
                    username: DEFAULT_ADMIN_USERNAME.to_string(),
                    password: admin_password.to_string(),
                },
                true,
            )
            .await?;
        if let Some(role_id) = admin_role_id {
            users.assign_roles(admin.id, &[role_id]).await?;
        }
        report.admin_created = true;
        tracing::warn!(
            username = DEFAULT_ADMIN_USERNAME,
            "Created default admin user; change its password"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::PasswordConfig;
    use prodtrack_core::memory::MemoryStore;
    use std::sync::Arc;

    fn setup() -> (Repositories, CredentialHasher) {
        (
            Repositories::from_store(Arc::new(MemoryStore::new())),
            CredentialHasher::new(PasswordConfig::fast()),
        )
    }

    #[test]
    fn test_catalogue() {
        let permissions = default_permissions();
        assert_eq!(permissions.len(), 27);
        assert!(permissions
            .iter()
            .any(|p| p.name == "users:read" && p.resource == "user" && p.action == "read"));
        assert!(permissions.iter().any(|p| p.name == "teams:manage_lead"));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let (repos, hasher) = setup();

        let first = seed_rbac(&repos, &hasher, "admin123").await.unwrap();
        assert_eq!(
            first,
            SeedReport {
                permissions_created: 27,
                roles_created: 6,
                admin_created: true,
            }
        );

        let second = seed_rbac(&repos, &hasher, "admin123").await.unwrap();
        assert_eq!(second, SeedReport::default());
    }

    #[tokio::test]
    async fn test_role_selections() {
        let (repos, hasher) = setup();
        seed_rbac(&repos, &hasher, "admin123").await.unwrap();

        let names = |role: prodtrack_core::Role| -> Vec<String> {
            role.permission_names().map(str::to_string).collect()
        };

        let admin = repos.roles.find_by_name("admin").await.unwrap().unwrap();
        assert_eq!(admin.permissions.len(), 27);

        let viewer = names(repos.roles.find_by_name("viewer").await.unwrap().unwrap());
        assert_eq!(viewer.len(), 6);
        assert!(viewer.iter().all(|n| n.ends_with(":read")));

        let user = names(repos.roles.find_by_name("user").await.unwrap().unwrap());
        assert!(user.contains(&"tasks:update".to_string()));
        assert!(user.contains(&"teams:read".to_string()));
        assert!(!user.contains(&"tasks:delete".to_string()));
        assert!(!user.iter().any(|n| n.starts_with("users:")));

        let lead = names(repos.roles.find_by_name("team_lead").await.unwrap().unwrap());
        assert!(lead.contains(&"tasks:delete".to_string()));
        assert!(lead.contains(&"teams:manage_members".to_string()));
        assert!(!lead.contains(&"teams:manage_lead".to_string()));
    }

    #[tokio::test]
    async fn test_default_admin_is_superuser_with_admin_role() {
        let (repos, hasher) = setup();
        seed_rbac(&repos, &hasher, "admin123").await.unwrap();

        let admin = repos
            .users
            .find_by_username(DEFAULT_ADMIN_USERNAME)
            .await
            .unwrap()
            .unwrap();
        assert!(admin.is_superuser);
        assert_eq!(admin.roles.len(), 1);
        assert_eq!(admin.roles[0].name, "admin");
    }
}
