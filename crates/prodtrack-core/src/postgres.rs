//! PostgreSQL store
//!
//! Implements the user, role and permission repositories with SQLx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

use crate::repository::{PermissionRepository, RoleRepository, UserRepository};
use crate::{
    AppError, ListQuery, NewPermission, NewRole, NewUser, Permission, PermissionUpdate, Result,
    Role, RoleUpdate, User, UserUpdate,
};

/// PostgreSQL-backed repositories
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| AppError::database("PostgreSQL connection failed", e))?;

        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::database("migration failed", e))
    }

    async fn permissions_for_roles(&self, role_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Permission>>> {
        if role_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<RolePermissionRow> = sqlx::query_as(
            r#"
            SELECT rp.role_id, p.id, p.name, p.resource, p.action, p.description,
                   p.is_deleted, p.created_at, p.updated_at
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1) AND p.is_deleted = FALSE
            ORDER BY p.name
            "#,
        )
        .bind(role_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load role permissions", e))?;

        let mut map: HashMap<Uuid, Vec<Permission>> = HashMap::new();
        for row in rows {
            let (role_id, permission) = row.split();
            map.entry(role_id).or_default().push(permission);
        }
        Ok(map)
    }

    async fn hydrate_roles(&self, rows: Vec<RoleRow>) -> Result<Vec<Role>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut permissions = self.permissions_for_roles(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let perms = permissions.remove(&row.id).unwrap_or_default();
                row.into_role(perms)
            })
            .collect())
    }

    async fn hydrate_users(&self, rows: Vec<UserRow>) -> Result<Vec<User>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let user_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let links: Vec<UserRoleRow> = sqlx::query_as(
            r#"
            SELECT ur.user_id, r.id, r.name, r.description, r.is_deleted,
                   r.created_at, r.updated_at
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = ANY($1) AND r.is_deleted = FALSE
            ORDER BY r.name
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load user roles", e))?;

        let role_ids: Vec<Uuid> = links.iter().map(|l| l.id).collect();
        let permissions = self.permissions_for_roles(&role_ids).await?;

        let mut roles_by_user: HashMap<Uuid, Vec<Role>> = HashMap::new();
        for link in links {
            let perms = permissions.get(&link.id).cloned().unwrap_or_default();
            let (user_id, role) = link.split(perms);
            roles_by_user.entry(user_id).or_default().push(role);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let roles = roles_by_user.remove(&row.id).unwrap_or_default();
                row.into_user(roles)
            })
            .collect())
    }

    async fn fetch_user(&self, row: Option<UserRow>) -> Result<Option<User>> {
        match row {
            Some(row) => Ok(self.hydrate_users(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn fetch_role(&self, row: Option<RoleRow>) -> Result<Option<Role>> {
        match row {
            Some(row) => Ok(self.hydrate_roles(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

fn search_pattern(query: &ListQuery) -> Option<String> {
    query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"))
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    username: String,
    hashed_password: String,
    is_active: bool,
    is_superuser: bool,
    is_deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, roles: Vec<Role>) -> User {
        User {
            id: self.id,
            email: self.email,
            username: self.username,
            hashed_password: self.hashed_password,
            is_active: self.is_active,
            is_superuser: self.is_superuser,
            is_deleted: self.is_deleted,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            roles,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleRow {
    fn into_role(self, permissions: Vec<Permission>) -> Role {
        Role {
            id: self.id,
            name: self.name,
            description: self.description,
            permissions,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRoleRow {
    user_id: Uuid,
    id: Uuid,
    name: String,
    description: Option<String>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRoleRow {
    fn split(self, permissions: Vec<Permission>) -> (Uuid, Role) {
        let role = RoleRow {
            id: self.id,
            name: self.name,
            description: self.description,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_role(permissions);
        (self.user_id, role)
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    id: Uuid,
    name: String,
    resource: String,
    action: String,
    description: Option<String>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: row.id,
            name: row.name,
            resource: row.resource,
            action: row.action,
            description: row.description,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RolePermissionRow {
    role_id: Uuid,
    #[sqlx(flatten)]
    permission: PermissionRow,
}

impl RolePermissionRow {
    fn split(self) -> (Uuid, Permission) {
        (self.role_id, self.permission.into())
    }
}

const USER_COLUMNS: &str = "id, email, username, hashed_password, is_active, is_superuser, \
                            is_deleted, deleted_at, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, is_deleted, created_at, updated_at";
const PERMISSION_COLUMNS: &str =
    "id, name, resource, action, description, is_deleted, created_at, updated_at";

// ============================================================================
// Users
// ============================================================================

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, user: NewUser) -> Result<User> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (id, email, username, hashed_password, is_active, is_superuser)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.hashed_password)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to insert user", e))?;

        Ok(row.into_user(Vec::new()))
    }

    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND (NOT $2 OR is_deleted = FALSE)"
        ))
        .bind(id)
        .bind(exclude_deleted)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load user", e))?;

        self.fetch_user(row).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND is_deleted = FALSE"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load user", e))?;

        self.fetch_user(row).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND is_deleted = FALSE"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load user", e))?;

        self.fetch_user(row).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE is_deleted = FALSE
              AND ($1::text IS NULL OR username ILIKE $1 OR email ILIKE $1)
            ORDER BY created_at
            OFFSET $2 LIMIT $3
            "#
        ))
        .bind(search_pattern(query))
        .bind(query.skip)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to list users", e))?;

        self.hydrate_users(rows).await
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>> {
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                username = COALESCE($3, username),
                hashed_password = COALESCE($4, hashed_password),
                is_active = COALESCE($5, is_active),
                updated_at = NOW()
            WHERE id = $1 AND is_deleted = FALSE
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(update.email)
        .bind(update.username)
        .bind(update.hashed_password)
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to update user", e))?;

        match updated {
            Some(id) => UserRepository::find_by_id(self, id, true).await,
            None => Ok(None),
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to delete user", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_roles(&self, id: Uuid, role_ids: &[Uuid]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database("Failed to begin transaction", e))?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database("Failed to clear user roles", e))?;

        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(role_ids.to_vec())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database("Failed to assign user roles", e))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database("Failed to commit role assignment", e))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| AppError::database("Health check query failed", e))
    }
}

// ============================================================================
// Roles
// ============================================================================

#[async_trait]
impl RoleRepository for PgStore {
    async fn create(&self, role: NewRole) -> Result<Role> {
        let row: RoleRow = sqlx::query_as(&format!(
            "INSERT INTO roles (id, name, description) VALUES ($1, $2, $3) RETURNING {ROLE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&role.name)
        .bind(&role.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to insert role", e))?;

        Ok(row.into_role(Vec::new()))
    }

    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<Role>> {
        let row: Option<RoleRow> = sqlx::query_as(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1 AND (NOT $2 OR is_deleted = FALSE)"
        ))
        .bind(id)
        .bind(exclude_deleted)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load role", e))?;

        self.fetch_role(row).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        let row: Option<RoleRow> = sqlx::query_as(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1 AND is_deleted = FALSE"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load role", e))?;

        self.fetch_role(row).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Role>> {
        let rows: Vec<RoleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ROLE_COLUMNS} FROM roles
            WHERE is_deleted = FALSE AND ($1::text IS NULL OR name ILIKE $1)
            ORDER BY name
            OFFSET $2 LIMIT $3
            "#
        ))
        .bind(search_pattern(query))
        .bind(query.skip)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to list roles", e))?;

        self.hydrate_roles(rows).await
    }

    async fn update(&self, id: Uuid, update: RoleUpdate) -> Result<Option<Role>> {
        let row: Option<RoleRow> = sqlx::query_as(&format!(
            r#"
            UPDATE roles SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = NOW()
            WHERE id = $1 AND is_deleted = FALSE
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.name)
        .bind(update.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to update role", e))?;

        self.fetch_role(row).await
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE roles SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to delete role", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_permissions(&self, id: Uuid, permission_ids: &[Uuid]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database("Failed to begin transaction", e))?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database("Failed to clear role permissions", e))?;

        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(permission_ids.to_vec())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database("Failed to assign role permissions", e))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database("Failed to commit permission assignment", e))
    }

    async fn add_permission(&self, id: Uuid, permission_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| AppError::database("Failed to add role permission", e))
    }

    async fn remove_permission(&self, id: Uuid, permission_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(id)
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| AppError::database("Failed to remove role permission", e))
    }
}

// ============================================================================
// Permissions
// ============================================================================

#[async_trait]
impl PermissionRepository for PgStore {
    async fn create(&self, permission: NewPermission) -> Result<Permission> {
        let row: PermissionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO permissions (id, name, resource, action, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&permission.name)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to insert permission", e))?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<Permission>> {
        let row: Option<PermissionRow> = sqlx::query_as(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1 AND (NOT $2 OR is_deleted = FALSE)"
        ))
        .bind(id)
        .bind(exclude_deleted)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load permission", e))?;

        Ok(row.map(Into::into))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Permission>> {
        let row: Option<PermissionRow> = sqlx::query_as(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE name = $1 AND is_deleted = FALSE"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load permission", e))?;

        Ok(row.map(Into::into))
    }

    async fn find_by_resource_and_action(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>> {
        let row: Option<PermissionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PERMISSION_COLUMNS} FROM permissions
            WHERE resource = $1 AND action = $2 AND is_deleted = FALSE
            "#
        ))
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to load permission", e))?;

        Ok(row.map(Into::into))
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Permission>> {
        let rows: Vec<PermissionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PERMISSION_COLUMNS} FROM permissions
            WHERE is_deleted = FALSE AND ($1::text IS NULL OR name ILIKE $1)
            ORDER BY name
            OFFSET $2 LIMIT $3
            "#
        ))
        .bind(search_pattern(query))
        .bind(query.skip)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to list permissions", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_by_resource(&self, resource: &str) -> Result<Vec<Permission>> {
        let rows: Vec<PermissionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PERMISSION_COLUMNS} FROM permissions
            WHERE resource = $1 AND is_deleted = FALSE
            ORDER BY action
            "#
        ))
        .bind(resource)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to list permissions", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update(&self, id: Uuid, update: PermissionUpdate) -> Result<Option<Permission>> {
        let row: Option<PermissionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE permissions SET
                name = COALESCE($2, name),
                resource = COALESCE($3, resource),
                action = COALESCE($4, action),
                description = COALESCE($5, description),
                updated_at = NOW()
            WHERE id = $1 AND is_deleted = FALSE
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.name)
        .bind(update.resource)
        .bind(update.action)
        .bind(update.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to update permission", e))?;

        Ok(row.map(Into::into))
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE permissions SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to delete permission", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern() {
        let mut query = ListQuery::default();
        assert_eq!(search_pattern(&query), None);

        query.search = Some("  ".to_string());
        assert_eq!(search_pattern(&query), None);

        query.search = Some("ali".to_string());
        assert_eq!(search_pattern(&query).as_deref(), Some("%ali%"));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_soft_delete_hides_user_from_authentication_lookups() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = PgStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();

        let suffix = Uuid::new_v4().simple().to_string();
        let user = UserRepository::create(
            &store,
            NewUser {
                email: format!("{suffix}@x.com"),
                username: format!("u{}", &suffix[..12]),
                hashed_password: "hash".to_string(),
                is_active: true,
                is_superuser: false,
            },
        )
        .await
        .unwrap();

        assert!(UserRepository::soft_delete(&store, user.id).await.unwrap());
        assert!(UserRepository::find_by_id(&store, user.id, true)
            .await
            .unwrap()
            .is_none());
        assert!(UserRepository::find_by_id(&store, user.id, false)
            .await
            .unwrap()
            .is_some());
        assert!(store.find_by_email(&user.email).await.unwrap().is_none());
    }
}
