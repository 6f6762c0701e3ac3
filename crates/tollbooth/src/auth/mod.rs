//! Credentials: password hashing, bearer tokens, and the failure taxonomy
//! shared by the login handler and the auth middleware.

pub mod jwt;
pub mod password;

pub use jwt::{Claims, Jwt};

use thiserror::Error;

/// Authentication failures. Each verification failure is distinct so logs
/// can tell a clock problem from a key problem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("bad signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("wrong issuer")]
    WrongIssuer,

    #[error("wrong audience")]
    WrongAudience,

    #[error("malformed claims")]
    MalformedClaims,

    #[error("invalid email or password")]
    InvalidPassword,

    #[error("unknown subject")]
    UnknownSubject,

    #[error("password hashing failed")]
    Hashing,
}
