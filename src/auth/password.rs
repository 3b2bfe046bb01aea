use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::Error;

const MIN_PASSWORD_LENGTH: usize = 5;

pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Internal(format!("Failed to hash password: {e}")))?;

    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> Result<bool, Error> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| Error::Internal(format!("Invalid password hash: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// At least five characters, one uppercase letter and one non-alphanumeric.
pub fn validate_password_strength(password: &str) -> Result<(), Error> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LENGTH;
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_special = password.chars().any(|c| !c.is_ascii_alphanumeric());

    if long_enough && has_upper && has_special {
        Ok(())
    } else {
        Err(Error::InvalidArgument(
            "password needs at least 5 characters, one uppercase letter and one special character"
                .into(),
        ))
    }
}

pub fn validate_email(email: &str) -> Result<(), Error> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("invalid email format: {}", email)))
    }
}
