use sha2::{Digest, Sha256, Sha512};

use rand::rngs::OsRng;
use rand::RngCore;

pub fn get_salt<const N: usize>() -> [u8; N] {
    let mut salt = [0u8; N];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn gen_salted_password(password: &str, token: &str) -> (String, String) {
    let salt = get_salt::<32>();

    let mut hasher = Sha256::new();
    hasher.update(token);
    hasher.update(password);
    hasher.update(salt);
    let calculated_hash = hasher.finalize();

    (hex::encode(salt), hex::encode(calculated_hash.as_slice()))
}

pub fn check_salted_password<'a>(
    user: &'a User,
    password_input: &str,
    token: &str,
) -> Option<&'a User> {
    let mut salt = [0u8; 32];
    hex::decode_to_slice(&user.salt, &mut salt).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(token);
    hasher.update(password_input);
    hasher.update(salt);

    let calculated_hash = hasher.finalize();

    let mut expected_hash = [0u8; 32];
    hex::decode_to_slice(&user.password, &mut expected_hash).ok()?;

    if calculated_hash.as_slice() == &expected_hash[..] {
        Some(user)
    } else {
        None
    }
}

use actix_web::cookie::Key;

use crate::models::User;
use crate::REFERRAL_CODE_LENGTH;

pub fn gen_cookie_key(cookie_token: &str) -> Key {
    let mut hasher = Sha512::new();
    hasher.update(cookie_token);
    Key::from(hasher.finalize().as_slice())
}

// 4 random bytes encoded into 8 hexadecimal digits
pub fn gen_referral_code() -> String {
    hex::encode(get_salt::<{ REFERRAL_CODE_LENGTH / 2 }>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user_with_password(password: &str, token: &str) -> User {
        let (salt, hash) = gen_salted_password(password, token);
        User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: hash,
            salt,
            balance: 0.0,
            deposit: 0.0,
            is_admin: false,
            referred_by: None,
            referral_code: gen_referral_code(),
            referral_bonus_earned: 0.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn salted_password_roundtrip() {
        let user = user_with_password("hunter2", "pepper");
        assert!(check_salted_password(&user, "hunter2", "pepper").is_some());
        assert!(check_salted_password(&user, "hunter3", "pepper").is_none());
        assert!(check_salted_password(&user, "hunter2", "other-pepper").is_none());
    }

    #[test]
    fn referral_codes_are_short_hex() {
        let code = gen_referral_code();
        assert_eq!(code.len(), REFERRAL_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
