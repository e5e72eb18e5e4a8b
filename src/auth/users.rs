//! Credential store: the `learntav_users` table.
//!
//! Users live as a flat JSON array in the local storage area. Every
//! mutation is a read-modify-write of the whole array.

use super::password::{
    dummy_verify, hash_password, normalize_email, validate_full_name, validate_password_strength,
    verify_password,
};
use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::storage::{keys, read_json, write_json, Storage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Account role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

/// Per-user preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserSettings {
    pub email_notifications: bool,
    pub theme: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            email_notifications: true,
            theme: "light".into(),
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub settings: UserSettings,
}

/// Storage-backed user table.
pub struct UserStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    iterations: u32,
}

impl UserStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, iterations: u32) -> Self {
        Self {
            storage,
            clock,
            iterations,
        }
    }

    fn load(&self) -> Result<Vec<User>> {
        Ok(read_json(self.storage.as_ref(), keys::USERS)?.unwrap_or_default())
    }

    fn save(&self, users: &[User]) -> Result<()> {
        write_json(self.storage.as_ref(), keys::USERS, users)
    }

    // ── Registration & login ───────────────────────────────────────

    /// Register a new user.
    pub fn register(&self, full_name: &str, email: &str, password: &str, role: Role) -> Result<User> {
        let full_name = validate_full_name(full_name)?;
        let email = normalize_email(email)
            .ok_or_else(|| AuthError::InvalidInput("Please enter a valid email address".into()))?;
        validate_password_strength(password)?;

        let mut users = self.load()?;
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&email)) {
            return Err(AuthError::EmailTaken(email));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            full_name,
            email,
            password_hash: hash_password(password, self.iterations),
            created: self.clock.now(),
            role,
            settings: UserSettings::default(),
        };
        users.push(user.clone());
        self.save(&users)?;

        tracing::info!(user_id = %user.id, role = user.role.as_str(), "User registered");
        Ok(user)
    }

    /// Check an email/password pair. Returns the user on success.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let Some(email) = normalize_email(email) else {
            dummy_verify(password, self.iterations);
            return Err(AuthError::InvalidCredentials);
        };

        match self.find_by_email(&email)? {
            Some(user) => {
                if verify_password(password, &user.password_hash) {
                    Ok(user)
                } else {
                    Err(AuthError::InvalidCredentials)
                }
            }
            None => {
                // Same work as a real check so unknown emails are not distinguishable by timing
                dummy_verify(password, self.iterations);
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    // ── Lookup ─────────────────────────────────────────────────────

    pub fn get(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.load()?.into_iter().find(|u| u.id == user_id))
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        Ok(self
            .load()?
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(&email)))
    }

    pub fn list(&self) -> Result<Vec<User>> {
        self.load()
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    // ── Mutation ───────────────────────────────────────────────────

    pub fn update_settings(&self, user_id: &str, settings: UserSettings) -> Result<User> {
        self.modify(user_id, |user| {
            user.settings = settings;
            Ok(())
        })
    }

    pub fn set_role(&self, user_id: &str, role: Role) -> Result<User> {
        self.modify(user_id, |user| {
            user.role = role;
            Ok(())
        })
    }

    /// Replace the password after checking the current one.
    pub fn change_password(&self, user_id: &str, current: &str, new_password: &str) -> Result<User> {
        validate_password_strength(new_password)?;
        let iterations = self.iterations;
        self.modify(user_id, |user| {
            if !verify_password(current, &user.password_hash) {
                return Err(AuthError::InvalidCredentials);
            }
            user.password_hash = hash_password(new_password, iterations);
            Ok(())
        })
    }

    /// Delete a user. Returns whether it existed.
    pub fn delete(&self, user_id: &str) -> Result<bool> {
        let mut users = self.load()?;
        let before = users.len();
        users.retain(|u| u.id != user_id);
        if users.len() == before {
            return Ok(false);
        }
        self.save(&users)?;
        tracing::info!(user_id = user_id, "User deleted");
        Ok(true)
    }

    fn modify<F>(&self, user_id: &str, apply: F) -> Result<User>
    where
        F: FnOnce(&mut User) -> Result<()>,
    {
        let mut users = self.load()?;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(AuthError::UserNotFound)?;
        apply(user)?;
        let updated = user.clone();
        self.save(&users)?;
        Ok(updated)
    }
}
