//! Employee persistence
//!
//! Only `valid` rows are visible to lookups; deletes flip the status so a
//! username can be created again afterwards.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgRow;

use super::employee::{Employee, EmployeeStatus, Role};
use super::error::AuthError;
use crate::db::SafeRow;

#[async_trait]
pub trait EmployeeStore: Send + Sync {
    async fn find_valid(&self, username: &str) -> Result<Option<Employee>, AuthError>;

    /// Fails with `EmployeeAlreadyExists` if a valid row holds the username
    async fn insert(&self, employee: &Employee) -> Result<(), AuthError>;

    async fn update_role(
        &self,
        username: &str,
        role: Role,
        updated_by: &str,
    ) -> Result<Employee, AuthError>;

    async fn soft_delete(&self, username: &str, updated_by: &str) -> Result<(), AuthError>;

    /// Valid employees ordered by username, plus the total count
    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<Employee>, i64), AuthError>;
}

const EMPLOYEE_COLUMNS: &str =
    "id, username, password_hash, role, status, created_by, updated_by, created_at, updated_at";

pub struct PgEmployeeStore {
    pool: PgPool,
}

impl PgEmployeeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_employee(row: &PgRow) -> Option<Employee> {
        let role: String = row.try_get_log("role")?;
        let status: String = row.try_get_log("status")?;
        let role = Role::parse(&role)
            .map_err(|e| tracing::error!(error = %e, "Unknown role in employees row"))
            .ok()?;
        let status = EmployeeStatus::parse(&status).or_else(|| {
            tracing::error!(status = %status, "Unknown status in employees row");
            None
        })?;

        Some(Employee {
            id: row.try_get_log("id")?,
            username: row.try_get_log("username")?,
            password_hash: row.try_get_log("password_hash")?,
            role,
            status,
            created_by: row.try_get_log("created_by")?,
            updated_by: row.try_get_log("updated_by")?,
            created_at: row.try_get_log("created_at")?,
            updated_at: row.try_get_log("updated_at")?,
        })
    }

    fn decode(row: &PgRow) -> Result<Employee, AuthError> {
        Self::row_to_employee(row)
            .ok_or_else(|| AuthError::Database("malformed employees row".into()))
    }
}

#[async_trait]
impl EmployeeStore for PgEmployeeStore {
    async fn find_valid(&self, username: &str) -> Result<Option<Employee>, AuthError> {
        let row = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE username = $1 AND status = 'valid'"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn insert(&self, employee: &Employee) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO employees
                (id, username, password_hash, role, status, created_by, updated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(employee.id)
        .bind(&employee.username)
        .bind(&employee.password_hash)
        .bind(employee.role.as_str())
        .bind(employee.status.as_str())
        .bind(&employee.created_by)
        .bind(&employee.updated_by)
        .bind(employee.created_at)
        .bind(employee.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match AuthError::from(e) {
            AuthError::EmployeeAlreadyExists(_) => {
                AuthError::EmployeeAlreadyExists(employee.username.clone())
            }
            other => other,
        })?;
        Ok(())
    }

    async fn update_role(
        &self,
        username: &str,
        role: Role,
        updated_by: &str,
    ) -> Result<Employee, AuthError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE employees
            SET role = $2, updated_by = $3, updated_at = $4
            WHERE username = $1 AND status = 'valid'
            RETURNING {EMPLOYEE_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(role.as_str())
        .bind(updated_by)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::decode(&row),
            None => Err(AuthError::EmployeeNotFound(username.to_string())),
        }
    }

    async fn soft_delete(&self, username: &str, updated_by: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE employees
            SET status = 'invalid', updated_by = $2, updated_at = $3
            WHERE username = $1 AND status = 'valid'
            "#,
        )
        .bind(username)
        .bind(updated_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::EmployeeNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<Employee>, i64), AuthError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM employees WHERE status = 'valid'")
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE status = 'valid' \
             ORDER BY username ASC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        // Malformed rows are logged by SafeRow and left out
        let employees = rows.iter().filter_map(Self::row_to_employee).collect();
        Ok((employees, total))
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory employee store with the same visibility rules

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryEmployeeStore {
        rows: Mutex<Vec<Employee>>,
    }

    impl InMemoryEmployeeStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every row ever written, deleted ones included
        pub fn all(&self) -> Vec<Employee> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmployeeStore for InMemoryEmployeeStore {
        async fn find_valid(&self, username: &str) -> Result<Option<Employee>, AuthError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.username == username && e.status == EmployeeStatus::Valid)
                .cloned())
        }

        async fn insert(&self, employee: &Employee) -> Result<(), AuthError> {
            let mut rows = self.rows.lock().unwrap();
            if rows
                .iter()
                .any(|e| e.username == employee.username && e.status == EmployeeStatus::Valid)
            {
                return Err(AuthError::EmployeeAlreadyExists(employee.username.clone()));
            }
            rows.push(employee.clone());
            Ok(())
        }

        async fn update_role(
            &self,
            username: &str,
            role: Role,
            updated_by: &str,
        ) -> Result<Employee, AuthError> {
            let mut rows = self.rows.lock().unwrap();
            let employee = rows
                .iter_mut()
                .find(|e| e.username == username && e.status == EmployeeStatus::Valid)
                .ok_or_else(|| AuthError::EmployeeNotFound(username.to_string()))?;
            employee.role = role;
            employee.updated_by = updated_by.to_string();
            employee.updated_at = Utc::now();
            Ok(employee.clone())
        }

        async fn soft_delete(&self, username: &str, updated_by: &str) -> Result<(), AuthError> {
            let mut rows = self.rows.lock().unwrap();
            let employee = rows
                .iter_mut()
                .find(|e| e.username == username && e.status == EmployeeStatus::Valid)
                .ok_or_else(|| AuthError::EmployeeNotFound(username.to_string()))?;
            employee.status = EmployeeStatus::Invalid;
            employee.updated_by = updated_by.to_string();
            employee.updated_at = Utc::now();
            Ok(())
        }

        async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<Employee>, i64), AuthError> {
            let mut valid: Vec<_> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.status == EmployeeStatus::Valid)
                .cloned()
                .collect();
            valid.sort_by(|a, b| a.username.cmp(&b.username));
            let total = valid.len() as i64;
            let page = valid
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect();
            Ok((page, total))
        }
    }
}
