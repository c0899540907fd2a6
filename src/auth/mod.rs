//! Operator authentication
//!
//! Keyed password hashing, HS256 bearer tokens and the employee records they
//! are issued for. Both services use the token verifier; only the auth
//! service owns employees.

pub mod employee;
pub mod error;
pub mod hashing;
pub mod service;
pub mod store;
pub mod token;

pub use employee::{Employee, EmployeeStatus, Role};
pub use error::AuthError;
pub use hashing::DataHasher;
pub use service::{AuthService, EmployeePage, NewEmployee};
pub use store::{EmployeeStore, PgEmployeeStore};
pub use token::{Claims, TokenIssuer, TokenPair};
