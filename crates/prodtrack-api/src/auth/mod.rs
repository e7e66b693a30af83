//! Authentication and authorization
//!
//! - Password hashing with Argon2id
//! - Signed access/refresh tokens
//! - Best-effort session index over a key-value store
//! - Request gates for authentication, activity, superuser and permissions

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod session;

pub use jwt::{Claims, JwtError, TokenCodec, TokenType};
pub use middleware::{
    auth_middleware, authenticate, extract_token, require_active, require_any_permission,
    require_permission, require_superuser, CurrentUser,
};
pub use password::{validate_password_strength, CredentialHasher, PasswordConfig, PasswordError};
pub use session::{SessionIndex, SessionRecord};
