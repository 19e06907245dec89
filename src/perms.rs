//! Permission resolution: which named applications an identity may open.

use sqlx::SqlitePool;

use crate::error::AuthError;
use crate::store::perms;
use crate::store::users::Role;

/// Pure function of `(username, role)` over the stored permission entries
/// and the configured catalog. No call site concatenates app lists by
/// hand; everything funnels through [`resolve`](Self::resolve).
#[derive(Clone)]
pub struct PermissionResolver {
    pool: SqlitePool,
    app_names: Vec<String>,
}

impl PermissionResolver {
    pub(crate) fn new(pool: SqlitePool, app_names: &[String]) -> Self {
        let mut app_names = app_names.to_vec();
        app_names.sort();
        app_names.dedup();
        Self { pool, app_names }
    }

    /// Admin holds the full configured catalog regardless of stored rows;
    /// everyone else gets exactly the rows stored for their username or
    /// role name, empty when none exist. Sorted, deduplicated, no side
    /// effects.
    pub(crate) async fn resolve(&self, username: &str, role: Role) -> Result<Vec<String>, AuthError> {
        if role == Role::Admin {
            return Ok(self.app_names.clone());
        }
        Ok(perms::list_for_user(&self.pool, username, role.as_str()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        store::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn admin_gets_catalog_not_stored_rows() {
        let pool = test_pool().await;
        perms::grant(&pool, "root", "reports").await.unwrap();
        let resolver = PermissionResolver::new(
            pool,
            &["billing".to_string(), "reports".to_string(), "billing".to_string()],
        );
        assert_eq!(
            resolver.resolve("root", Role::Admin).await.unwrap(),
            ["billing", "reports"]
        );
    }

    #[tokio::test]
    async fn user_resolution_unions_username_and_role_rows() {
        let pool = test_pool().await;
        perms::grant(&pool, "alice", "reports").await.unwrap();
        perms::grant(&pool, "user", "wiki").await.unwrap();
        perms::grant(&pool, "alice", "reports").await.unwrap(); // idempotent

        let resolver = PermissionResolver::new(pool.clone(), &[]);
        assert_eq!(
            resolver.resolve("alice", Role::User).await.unwrap(),
            ["reports", "wiki"]
        );

        // No stored mapping resolves to an empty set, not an error.
        assert!(resolver.resolve("bob", Role::User).await.unwrap().is_empty());

        perms::revoke(&pool, "alice", "reports").await.unwrap();
        assert_eq!(resolver.resolve("alice", Role::User).await.unwrap(), ["wiki"]);
    }
}
