//! Organizer authorization. Creating an event mints an opaque admin token
//! which is returned exactly once; close, reopen and delete require it in the
//! `x-admin-token` header. A client that lost the token (or never had it) can
//! exchange the event password for it via the verify-password endpoint.

use nanoid::nanoid;

use crate::error::AppError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub fn new_admin_token() -> String {
    nanoid!()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizerAccess {
    /// The caller presented the admin token.
    Verified,
    /// No valid token, but the event has a password: the client should open
    /// its password dialog and retry through verify-password.
    PasswordPrompt,
    /// No valid token and no password configured. Terminal.
    Denied,
}

pub fn check_access(token_matches: bool, has_password: bool) -> OrganizerAccess {
    if token_matches {
        OrganizerAccess::Verified
    } else if has_password {
        OrganizerAccess::PasswordPrompt
    } else {
        OrganizerAccess::Denied
    }
}

/// Exact string equality against the stored plaintext password. This is a
/// usability gate for shared links, not real security; an event without a
/// password can never be verified this way.
pub fn verify_password(stored: Option<&str>, candidate: &str) -> bool {
    stored.is_some_and(|password| password == candidate)
}

/// Gate for privileged handlers.
pub fn authorize(
    admin_token: &str,
    provided: Option<&str>,
    has_password: bool,
) -> Result<(), AppError> {
    match check_access(provided == Some(admin_token), has_password) {
        OrganizerAccess::Verified => Ok(()),
        OrganizerAccess::PasswordPrompt => {
            Err(AppError::Unauthorized("password required".to_string()))
        }
        OrganizerAccess::Denied => {
            Err(AppError::Unauthorized("this action is for the organizer only".to_string()))
        }
    }
}
