//! Argon2id password hashes, stored as PHC strings (`$argon2id$v=19$...`).

use argon2::{
    Argon2,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};

const SALT_LEN: usize = 16;

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let mut salt = [0u8; SALT_LEN];
    rand::fill(&mut salt);
    let salt = SaltString::encode_b64(&salt)?;

    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// False for a wrong password and for a malformed stored value.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
