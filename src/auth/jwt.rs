use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

use crate::{
    model::role::Role,
    models::{Claims, TokenType},
};

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

fn issue(
    user_id: u64,
    email: String,
    role: Role,
    token_type: TokenType,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    let claims = Claims {
        user_id,
        sub: email,
        role,
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn generate_access_token(
    user_id: u64,
    email: String,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    issue(user_id, email, role, TokenType::Access, secret, ttl).map(|(token, _)| token)
}

pub fn generate_refresh_token(
    user_id: u64,
    email: String,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    issue(user_id, email, role, TokenType::Refresh, secret, ttl)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trip() {
        let token = generate_access_token(5, "a@b.co".into(), Role::Approver, "k", 60).unwrap();
        let claims = verify_token(&token, "k").unwrap();
        assert_eq!(claims.user_id, 5);
        assert_eq!(claims.sub, "a@b.co");
        assert_eq!(claims.role, Role::Approver);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn refresh_tokens_get_unique_ids() {
        let (_, a) = generate_refresh_token(1, "x@y.z".into(), Role::User, "k", 60).unwrap();
        let (_, b) = generate_refresh_token(1, "x@y.z".into(), Role::User, "k", 60).unwrap();
        assert_eq!(a.token_type, TokenType::Refresh);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(1, "x@y.z".into(), Role::User, "k", 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }
}
