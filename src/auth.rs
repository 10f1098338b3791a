#![cfg(not(tarpaulin_include))]

use crate::error::EngineError;
use crate::store::Store;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Identity of an authenticated user, carried explicitly into every
/// engine call
///
/// The engine never reads ambient session state; whoever drives it
/// resolves a session token (or a fresh login) to a `UserContext` first
/// and passes it along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    /// Store id of the user's account row
    pub user_id: i64,

    /// Display name of the user
    pub name: String,

    /// Account role: [`ROLE_STANDARD`] or [`ROLE_ADMIN`]
    pub role: String,
}

impl UserContext {
    /// Whether this account may use the administrator listing.
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// User session data
///
/// Represents an authenticated user session.
#[derive(Debug, Clone)]
struct Session {
    /// Identity the session was created for
    context: UserContext,

    /// Time when the session expires
    expires_at: SystemTime,
}

/// Global sessions storage
///
/// Stores all active user sessions in a thread-safe map. Only this
/// module touches it; the rest of the crate sees [`UserContext`] values.
lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

// Constants
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// Default role of a newly registered account
pub const ROLE_STANDARD: &str = "standard";

/// Role that unlocks the cross-user listing
pub const ROLE_ADMIN: &str = "admin";

/// Register a new user
///
/// Creates a new user account with the provided name, email and password.
/// The password is hashed before storage.
///
/// # Arguments
/// * `store` - The persistent store holding user accounts
/// * `name` - Display name for the new account
/// * `email` - Email address, unique per account
/// * `password` - Plain text password (will be hashed)
/// * `role` - Account role, usually [`ROLE_STANDARD`]
///
/// # Returns
/// * `Result<i64, EngineError>` - Store id of the new account
///
/// # Errors
/// * [`EngineError::Validation`] when a field is empty or the email is malformed
/// * [`EngineError::EmailTaken`] when the email is already registered
/// * [`EngineError::StoreUnavailable`] when the store cannot be reached
pub fn register_user(
    store: &Store,
    name: &str,
    email: &str,
    password: &str,
    role: &str,
) -> Result<i64, EngineError> {
    let name = name.trim();
    let email = email.trim();
    for (field, value) in [("name", name), ("email", email), ("password", password)] {
        if value.is_empty() {
            return Err(EngineError::Validation {
                field: field.to_string(),
            });
        }
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err(EngineError::Validation {
            field: "email".to_string(),
        });
    }

    let password_hash = hash_password(password)?;
    store.insert_user(name, email, &password_hash, role)
}

/// Verify login credentials
///
/// Checks the provided email and password against the store and returns
/// the account's [`UserContext`] when they match.
///
/// # Arguments
/// * `store` - The persistent store holding user accounts
/// * `email` - Email address to look up
/// * `password` - Password to verify
///
/// # Returns
/// * `Result<Option<UserContext>, EngineError>` - The identity when the
///   credentials are valid, `None` when they are not
///
/// # Errors
/// * Returns an error when the store is unreachable or a stored hash
///   cannot be parsed; a wrong password is `Ok(None)`, not an error
pub fn authenticate(
    store: &Store,
    email: &str,
    password: &str,
) -> Result<Option<UserContext>, EngineError> {
    let Some(user) = store.user_by_email(email.trim())? else {
        warn!("login attempt for unknown email");
        return Ok(None);
    };

    if verify_password(password, &user.password_hash)? {
        Ok(Some(UserContext {
            user_id: user.id,
            name: user.name,
            role: user.role,
        }))
    } else {
        warn!("failed login for user {}", user.id);
        Ok(None)
    }
}

/// Hash a password using Argon2
///
/// Creates a cryptographically secure hash of a password using Argon2id.
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String, EngineError>` - The password hash or an error
///
/// # Errors
/// * Returns [`EngineError::Credential`] if the password hashing fails
fn hash_password(password: &str) -> Result<String, EngineError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(e) => Err(EngineError::Credential(e.to_string())),
    }
}

/// Verify a password against a stored hash
///
/// Checks if a plaintext password matches a stored Argon2 hash.
///
/// # Arguments
/// * `password` - The plaintext password to verify
/// * `hash` - The stored password hash to check against
///
/// # Returns
/// * `Result<bool, EngineError>` - True if the password matches, false if not
///
/// # Errors
/// * Returns [`EngineError::Credential`] if the hash is in an invalid format
fn verify_password(password: &str, hash: &str) -> Result<bool, EngineError> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(e) => return Err(EngineError::Credential(e.to_string())),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

/// Create a new user session
///
/// Creates and stores a new session for an authenticated user.
///
/// # Arguments
/// * `context` - The identity to create a session for
///
/// # Returns
/// * `String` - A unique session token
pub fn create_session(context: &UserContext) -> String {
    let session_id = Uuid::new_v4().to_string();
    let expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);

    let session = Session {
        context: context.clone(),
        expires_at,
    };

    let mut sessions = SESSIONS.write().unwrap();
    sessions.insert(session_id.clone(), session);

    session_id
}

/// Validate a session
///
/// Checks if a session is valid and not expired.
///
/// # Arguments
/// * `session_id` - The session token to validate
///
/// # Returns
/// * `Option<UserContext>` - The identity behind the session if valid,
///   `None` otherwise
pub fn validate_session(session_id: &str) -> Option<UserContext> {
    let sessions = SESSIONS.read().unwrap();

    if let Some(session) = sessions.get(session_id) {
        if session.expires_at > SystemTime::now() {
            return Some(session.context.clone());
        }
    }

    None
}

/// End a session
///
/// Removes a session from the registry, if present.
///
/// # Arguments
/// * `session_id` - The session token to end
///
/// # Returns
/// * `bool` - Whether a session was actually removed
pub fn end_session(session_id: &str) -> bool {
    let mut sessions = SESSIONS.write().unwrap();
    sessions.remove(session_id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_context() -> UserContext {
        UserContext {
            user_id: 7,
            name: "Ana".to_string(),
            role: ROLE_STANDARD.to_string(),
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("let-me-in-42").unwrap();
        assert!(verify_password("let-me-in-42", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn register_rejects_empty_and_malformed_fields() {
        let store = Store::open_in_memory().unwrap();

        let err = register_user(&store, "", "ana@lab.example", "pw", ROLE_STANDARD).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field } if field == "name"));

        let err = register_user(&store, "Ana", "not-an-email", "pw", ROLE_STANDARD).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field } if field == "email"));

        let err = register_user(&store, "Ana", "ana@lab.example", "", ROLE_STANDARD).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field } if field == "password"));
    }

    #[test]
    fn register_then_authenticate() {
        let store = Store::open_in_memory().unwrap();
        let id = register_user(&store, "Ana", "ana@lab.example", "let-me-in-42", ROLE_STANDARD)
            .unwrap();

        let ctx = authenticate(&store, "ana@lab.example", "let-me-in-42")
            .unwrap()
            .expect("credentials should match");
        assert_eq!(ctx.user_id, id);
        assert_eq!(ctx.name, "Ana");
        assert!(!ctx.is_admin());

        assert!(authenticate(&store, "ana@lab.example", "nope").unwrap().is_none());
        assert!(authenticate(&store, "ghost@lab.example", "pw").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_surfaces_as_taken() {
        let store = Store::open_in_memory().unwrap();
        register_user(&store, "Ana", "ana@lab.example", "pw-one", ROLE_STANDARD).unwrap();
        let err =
            register_user(&store, "Rui", "ana@lab.example", "pw-two", ROLE_STANDARD).unwrap_err();
        assert!(matches!(err, EngineError::EmailTaken { .. }));
    }

    #[test]
    fn session_lifecycle() {
        let ctx = standard_context();
        let token = create_session(&ctx);
        assert_eq!(validate_session(&token), Some(ctx));
        assert!(end_session(&token));
        assert_eq!(validate_session(&token), None);
        assert!(!end_session(&token));
    }

    #[test]
    fn admin_role_is_recognized() {
        let mut ctx = standard_context();
        ctx.role = ROLE_ADMIN.to_string();
        assert!(ctx.is_admin());
    }
}
