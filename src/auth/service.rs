//! Auth use cases
//!
//! Authentication plus admin-only operator management. The requester of a
//! write is the verified token's username, resolved by the RPC layer.

use std::sync::Arc;

use tracing::{info, warn};

use super::employee::{Employee, Role, validate_username};
use super::error::AuthError;
use super::hashing::DataHasher;
use super::store::EmployeeStore;
use super::token::{Claims, TokenIssuer, TokenPair};
use crate::config::UserConfig;
use crate::metrics;

pub const MAX_LIST_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub username: String,
    pub password: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmployeePage {
    pub employees: Vec<Employee>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: i64,
}

pub struct AuthService {
    store: Arc<dyn EmployeeStore>,
    hasher: DataHasher,
    tokens: TokenIssuer,
}

impl AuthService {
    pub fn new(store: Arc<dyn EmployeeStore>, hasher: DataHasher, tokens: TokenIssuer) -> Self {
        Self {
            store,
            hasher,
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Exchange credentials for an access and a refresh token.
    ///
    /// Unknown user, deleted user and wrong password are indistinguishable.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        let result = self.check_credentials(username, password).await;
        metrics::record_auth_attempt(if result.is_ok() { "success" } else { "failure" });
        result
    }

    async fn check_credentials(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        let employee = self
            .store
            .find_valid(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !self.hasher.matches(password, &employee.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        let pair = self.tokens.issue(&employee)?;
        info!(username = %employee.username, role = %employee.role, "Employee authenticated");
        Ok(pair)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.tokens.verify(token)
    }

    pub async fn create_employee(
        &self,
        new: NewEmployee,
        requester: &str,
    ) -> Result<Employee, AuthError> {
        self.require_admin(requester).await?;
        validate_username(&new.username)?;
        if new.password.is_empty() {
            return Err(AuthError::MissingRequiredData("password".into()));
        }
        let role = Role::parse(&new.role)?;

        if self.store.find_valid(&new.username).await?.is_some() {
            return Err(AuthError::EmployeeAlreadyExists(new.username));
        }

        let employee = Employee::new(&new.username, self.hasher.hash(&new.password), role, requester);
        self.store.insert(&employee).await?;
        info!(username = %employee.username, role = %role, requester, "Employee created");
        Ok(employee)
    }

    pub async fn update_role(
        &self,
        username: &str,
        role: &str,
        requester: &str,
    ) -> Result<Employee, AuthError> {
        self.require_admin(requester).await?;
        if username.is_empty() {
            return Err(AuthError::MissingRequiredData("username".into()));
        }
        let role = Role::parse(role)?;

        let employee = self.store.update_role(username, role, requester).await?;
        info!(username, role = %role, requester, "Employee role updated");
        Ok(employee)
    }

    /// Soft delete; an employee cannot delete themselves
    pub async fn delete_employee(&self, username: &str, requester: &str) -> Result<(), AuthError> {
        self.require_admin(requester).await?;
        if username.is_empty() {
            return Err(AuthError::MissingRequiredData("username".into()));
        }
        if username == requester {
            return Err(AuthError::InvalidRequest("cannot delete yourself".into()));
        }

        self.store.soft_delete(username, requester).await?;
        info!(username, requester, "Employee deleted");
        Ok(())
    }

    /// Page and size are clamped to `[1, 100]`
    pub async fn list_employees(&self, page: u32, page_size: u32) -> Result<EmployeePage, AuthError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_LIST_PAGE_SIZE);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let (employees, total_count) = self.store.list(offset, i64::from(page_size)).await?;
        Ok(EmployeePage {
            employees,
            page,
            page_size,
            total_count,
        })
    }

    /// Create the configured admin at boot if no valid row holds the name.
    ///
    /// Returns whether a row was created.
    pub async fn provision_admin(&self, user: &UserConfig) -> Result<bool, AuthError> {
        if self.store.find_valid(&user.admin_username).await?.is_some() {
            return Ok(false);
        }
        validate_username(&user.admin_username)?;
        if user.admin_password.is_empty() {
            warn!("user.admin_password is empty, admin not provisioned");
            return Ok(false);
        }

        let admin = Employee::new(
            &user.admin_username,
            self.hasher.hash(&user.admin_password),
            Role::Admin,
            "system",
        );
        match self.store.insert(&admin).await {
            Ok(()) => {
                info!(username = %admin.username, "Admin employee provisioned");
                Ok(true)
            }
            // Another instance won the race
            Err(AuthError::EmployeeAlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn require_admin(&self, requester: &str) -> Result<Employee, AuthError> {
        if requester.is_empty() {
            return Err(AuthError::MissingRequiredData("requester".into()));
        }
        match self.store.find_valid(requester).await? {
            Some(e) if e.is_admin() => Ok(e),
            _ => {
                warn!(requester, "Non-admin attempted an admin operation");
                Err(AuthError::Forbidden)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::employee::EmployeeStatus;
    use crate::auth::store::memory::InMemoryEmployeeStore;

    struct Fixture {
        store: Arc<InMemoryEmployeeStore>,
        service: AuthService,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEmployeeStore::new());
        let service = AuthService::new(
            store.clone(),
            DataHasher::new("hash-key").unwrap(),
            TokenIssuer::new("jwt-secret", 3600).unwrap(),
        );
        let provisioned = service
            .provision_admin(&UserConfig {
                admin_username: "admin_user".into(),
                admin_password: "root-pass".into(),
            })
            .await
            .unwrap();
        assert!(provisioned);
        Fixture { store, service }
    }

    fn new_employee(username: &str, role: &str) -> NewEmployee {
        NewEmployee {
            username: username.into(),
            password: "p4ss".into(),
            role: role.into(),
        }
    }

    #[tokio::test]
    async fn test_auth_lifecycle() {
        let f = fixture().await;

        f.service
            .create_employee(new_employee("valid_user", "admin"), "admin_user")
            .await
            .unwrap();

        let pair = f.service.authenticate("valid_user", "p4ss").await.unwrap();
        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());
        let claims = f.service.verify_token(&pair.access_token).unwrap();
        assert_eq!(claims.username, "valid_user");
        assert_eq!(claims.role, "admin");

        f.service
            .delete_employee("valid_user", "admin_user")
            .await
            .unwrap();

        let err = f.service.authenticate("valid_user", "p4ss").await.unwrap_err();
        assert_eq!(err.user_message(), "invalid credentials");
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_look_alike() {
        let f = fixture().await;
        let wrong = f.service.authenticate("admin_user", "nope").await.unwrap_err();
        let unknown = f.service.authenticate("ghost", "root-pass").await.unwrap_err();
        assert_eq!(wrong, AuthError::InvalidCredentials);
        assert_eq!(unknown, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_password_stored_hashed() {
        let f = fixture().await;
        let admin = f.store.all().into_iter().next().unwrap();
        assert_ne!(admin.password_hash, "root-pass");
        assert_eq!(admin.created_by, "system");
        assert_eq!(admin.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = fixture().await;

        let bad_name = f
            .service
            .create_employee(new_employee("Bad1", "viewer"), "admin_user")
            .await;
        assert!(matches!(bad_name, Err(AuthError::InvalidUsername(_))));

        let reserved = f
            .service
            .create_employee(new_employee("system", "viewer"), "admin_user")
            .await;
        assert!(matches!(reserved, Err(AuthError::InvalidUsername(_))));

        let bad_role = f
            .service
            .create_employee(new_employee("ops_lead", "root"), "admin_user")
            .await;
        assert!(matches!(bad_role, Err(AuthError::InvalidRole(_))));

        let dup = f
            .service
            .create_employee(new_employee("admin_user", "viewer"), "admin_user")
            .await;
        assert!(matches!(dup, Err(AuthError::EmployeeAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_non_admin_forbidden() {
        let f = fixture().await;
        f.service
            .create_employee(new_employee("viewer_one", "viewer"), "admin_user")
            .await
            .unwrap();

        let err = f
            .service
            .create_employee(new_employee("other_one", "viewer"), "viewer_one")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Forbidden);

        let err = f
            .service
            .delete_employee("admin_user", "viewer_one")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Forbidden);
    }

    #[tokio::test]
    async fn test_self_delete_forbidden() {
        let f = fixture().await;
        let err = f
            .service
            .delete_employee("admin_user", "admin_user")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_deleted_name_can_be_recreated() {
        let f = fixture().await;
        f.service
            .create_employee(new_employee("temp_user", "viewer"), "admin_user")
            .await
            .unwrap();
        f.service.delete_employee("temp_user", "admin_user").await.unwrap();
        f.service
            .create_employee(new_employee("temp_user", "editor"), "admin_user")
            .await
            .unwrap();

        let rows: Vec<_> = f
            .store
            .all()
            .into_iter()
            .filter(|e| e.username == "temp_user")
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, EmployeeStatus::Invalid);
        assert_eq!(rows[0].updated_by, "admin_user");
        assert_eq!(rows[1].role, Role::Editor);
    }

    #[tokio::test]
    async fn test_update_role() {
        let f = fixture().await;
        f.service
            .create_employee(new_employee("ops_lead", "viewer"), "admin_user")
            .await
            .unwrap();

        let updated = f
            .service
            .update_role("ops_lead", "editor", "admin_user")
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Editor);
        assert_eq!(updated.updated_by, "admin_user");

        let missing = f.service.update_role("ghost", "editor", "admin_user").await;
        assert!(matches!(missing, Err(AuthError::EmployeeNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_clamps_paging() {
        let f = fixture().await;
        for name in ["alpha", "bravo", "charlie"] {
            f.service
                .create_employee(new_employee(name, "viewer"), "admin_user")
                .await
                .unwrap();
        }

        let page = f.service.list_employees(0, 0).await.unwrap();
        assert_eq!((page.page, page.page_size), (1, 1));
        assert_eq!(page.total_count, 4);
        assert_eq!(page.employees[0].username, "admin_user");

        let page = f.service.list_employees(2, 500).await.unwrap();
        assert_eq!(page.page_size, 100);
        assert!(page.employees.is_empty());

        let page = f.service.list_employees(2, 2).await.unwrap();
        let names: Vec<_> = page.employees.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, vec!["bravo", "charlie"]);
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let f = fixture().await;
        let again = f
            .service
            .provision_admin(&UserConfig {
                admin_username: "admin_user".into(),
                admin_password: "other".into(),
            })
            .await
            .unwrap();
        assert!(!again);
        assert_eq!(f.store.all().len(), 1);
    }
}
