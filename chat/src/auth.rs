use crate::error::{is_constraint_violation, ChatError, ChatResult};
use crate::model::{User, UserId};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

const DEFAULT_ROLE: &str = "user";

/// Hash a password using argon2id with a random salt.
pub fn hash_password(pass: &str) -> ChatResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| ChatError::Hash(e.to_string()))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(pass: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(pass.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

/// Register a new user. The login handle must not be taken yet.
pub fn register(
    conn: &Connection,
    full_name: &str,
    login_handle: &str,
    password: &str,
) -> ChatResult<UserId> {
    let hash = hash_password(password)?;
    let res = conn.execute(
        "INSERT INTO users (full_name, login_handle, password_hash, role) VALUES (?1, ?2, ?3, ?4)",
        params![full_name, login_handle, hash, DEFAULT_ROLE],
    );
    match res {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_constraint_violation(&e) => Err(ChatError::DuplicateHandle),
        Err(e) => Err(e.into()),
    }
}

/// Check a login handle and password, returning the user id on success.
pub fn verify(conn: &Connection, login_handle: &str, password: &str) -> ChatResult<UserId> {
    let row: Option<(UserId, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE login_handle = ?1",
            [login_handle],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (id, hash) = row.ok_or(ChatError::UserNotFound)?;
    if !verify_password(password, &hash) {
        return Err(ChatError::AuthFailure);
    }
    Ok(id)
}

pub fn get_user(conn: &Connection, id: UserId) -> ChatResult<User> {
    conn.query_row(
        "SELECT id, full_name, login_handle, role FROM users WHERE id = ?1",
        [id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                full_name: row.get(1)?,
                login_handle: row.get(2)?,
                role: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or(ChatError::UserNotFound)
}

/// Claims stored within issued JWTs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: UserId,
    pub name: String,
    pub exp: usize,
}

/// Issue a JWT for a user valid for the provided duration.
pub fn issue_token(secret: &[u8], user: &User, valid_for: Duration) -> ChatResult<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: user.id,
        name: user.full_name.clone(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_token(secret: &[u8], token: &str) -> ChatResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}
