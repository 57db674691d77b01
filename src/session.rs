//! Login, password hashing and the in-memory token table.

use std::collections::HashMap;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::gateway::{self, Filter, GatewayError, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Guru,
    Orangtua,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Guru => "guru",
            Role::Orangtua => "orangtua",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim() {
            "admin" => Some(Role::Admin),
            "guru" => Some(Role::Guru),
            "orangtua" => Some(Role::Orangtua),
            _ => None,
        }
    }

    /// Table holding the profile a login of this role must have.
    pub fn profile_table(self) -> Table {
        match self {
            Role::Admin => Table::Admins,
            Role::Guru => Table::Teachers,
            Role::Orangtua => Table::Parents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub profile_id: i64,
}

/// Identity a workflow runs as, resolved once per request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Principal,
}

impl RequestContext {
    pub fn role(&self) -> Role {
        self.principal.role
    }

    pub fn profile_id(&self) -> i64 {
        self.principal.profile_id
    }

    pub fn user_id(&self) -> i64 {
        self.principal.user_id
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Principal>,
}

impl SessionStore {
    pub fn open(&mut self, principal: Principal) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions.insert(token.clone(), principal);
        token
    }

    pub fn get(&self, token: &str) -> Option<&Principal> {
        self.sessions.get(token)
    }

    pub fn close(&mut self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drops every session; tokens never outlive the workspace they were issued for.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("Incorrect username or password.")]
    BadCredentials,
    #[error("Account is not valid.")]
    MissingProfile,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<Principal, LoginError> {
    let user = gateway::find_one(
        conn,
        Table::Users,
        &Filter::new().eq("username", username.trim().to_string()),
    )?
    .ok_or(LoginError::BadCredentials)?;

    if !verify_password(password, user.str("password").unwrap_or_default()) {
        return Err(LoginError::BadCredentials);
    }

    let role = user
        .str("role")
        .and_then(Role::parse)
        .ok_or(LoginError::MissingProfile)?;
    let profile_id = find_profile(conn, role, user.id())?.ok_or(LoginError::MissingProfile)?;

    Ok(Principal {
        user_id: user.id(),
        username: user.str("username").unwrap_or_default().to_string(),
        role,
        profile_id,
    })
}

/// Id of the admin/teacher/parent row owned by `user_id`, if any.
pub fn find_profile(conn: &Connection, role: Role, user_id: i64) -> Result<Option<i64>, GatewayError> {
    Ok(gateway::find_one(conn, role.profile_table(), &Filter::new().eq("user_id", user_id))?
        .map(|profile| profile.id()))
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash password: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
