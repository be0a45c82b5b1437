use crate::error::AppError;
use crate::features::auth::models::Role;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Modules only administrators may touch under the static defaults.
const ADMIN_MODULES: &[&str] = &["users", "system", "permissions", "audit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityAction {
    Read,
    Write,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RolePermission {
    pub role: String,
    pub module: String,
    pub can_read: bool,
    pub can_write: bool,
}

/// Role capability lookup backed by the `role_permissions` table. A module
/// without a row falls back to the static defaults: admin gets everything,
/// user gets read/write outside the admin modules, readonly gets read-only
/// outside the admin modules.
#[derive(Clone)]
pub struct PermissionService {
    store: Store,
}

impl PermissionService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn allows(
        &self,
        role: Role,
        module: &str,
        action: CapabilityAction,
    ) -> Result<bool, AppError> {
        let row: Option<RolePermission> = sqlx::query_as(
            "SELECT role, module, can_read, can_write FROM role_permissions
                WHERE role = ? AND module = ?",
        )
        .bind(role.as_str())
        .bind(module)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(match row {
            Some(p) => match action {
                CapabilityAction::Read => p.can_read,
                CapabilityAction::Write => p.can_write,
            },
            None => default_allows(role, module, action),
        })
    }

    pub async fn list(&self) -> Result<Vec<RolePermission>, AppError> {
        let rows = sqlx::query_as(
            "SELECT role, module, can_read, can_write FROM role_permissions
                ORDER BY role, module",
        )
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows)
    }

    pub async fn upsert(&self, permission: &RolePermission) -> Result<(), AppError> {
        if Role::parse(&permission.role).is_none() {
            return Err(AppError::field_validation("role", "unknown role"));
        }
        self.store
            .exec("INSERT INTO role_permissions", "permissions::upsert", || {
                sqlx::query(
                    "INSERT INTO role_permissions (role, module, can_read, can_write)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT (role, module)
                        DO UPDATE SET can_read = excluded.can_read,
                                      can_write = excluded.can_write",
                )
                .bind(&permission.role)
                .bind(&permission.module)
                .bind(permission.can_read)
                .bind(permission.can_write)
                .execute(self.store.pool())
            })
            .await?;
        Ok(())
    }
}

pub fn default_allows(role: Role, module: &str, action: CapabilityAction) -> bool {
    match role {
        Role::Admin => true,
        Role::User => !ADMIN_MODULES.contains(&module),
        Role::Readonly => {
            !ADMIN_MODULES.contains(&module) && action == CapabilityAction::Read
        }
    }
}
