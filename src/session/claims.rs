//! Client-side claim decoding for UI hints.
//!
//! The signature is not checked here. Decoded claims only drive what the UI
//! shows; authorization decisions stay with the server, which verifies every
//! token it receives.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::Deserialize;

/// Who the held token says the user is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub roles: Vec<String>,
}

impl SessionUser {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|held| held == role)
    }
}

#[derive(Deserialize)]
struct PayloadClaims {
    sub: String,
    roles: Vec<String>,
}

/// Decode the payload segment of a token without verifying it.
///
/// Returns `None` unless the token has exactly three segments and the middle
/// one is URL-safe base64 (padding tolerated) of JSON holding a string `sub`
/// and a string array `roles`.
#[must_use]
pub fn decode_claims(token: &str) -> Option<SessionUser> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('=')).ok()?;
    let claims: PayloadClaims = serde_json::from_slice(&bytes).ok()?;

    Some(SessionUser {
        id: claims.sub,
        roles: claims.roles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(payload: &str) -> String {
        Base64UrlUnpadded::encode_string(payload.as_bytes())
    }

    #[test]
    fn decodes_known_token() {
        let user = decode_claims("h.eyJzdWIiOiJ1MSIsInJvbGVzIjpbIkFETUlOIl19.sig");
        assert_eq!(
            user,
            Some(SessionUser {
                id: "u1".to_string(),
                roles: vec!["ADMIN".to_string()],
            })
        );
    }

    #[test]
    fn tolerates_padding_and_extra_claims() {
        let payload = format!(
            "{}==",
            encode(r#"{"sub":"u2","roles":[],"exp":1,"iat":0}"#)
        );
        let user = decode_claims(&format!("h.{payload}.s"));
        assert_eq!(user.map(|user| user.id), Some("u2".to_string()));
    }

    #[test]
    fn wrong_segment_count_is_none() {
        for token in ["", "only", "two.parts", "a.b.c.d"] {
            assert_eq!(decode_claims(token), None, "decoded {token:?}");
        }
    }

    #[test]
    fn undecodable_payload_is_none() {
        let cases = [
            "h.!!!.s".to_string(),
            format!("h.{}.s", encode("not json")),
            format!("h.{}.s", encode(r#"{"roles":["ADMIN"]}"#)),
            format!("h.{}.s", encode(r#"{"sub":"u1"}"#)),
            format!("h.{}.s", encode(r#"{"sub":1,"roles":[]}"#)),
            format!("h.{}.s", encode(r#"{"sub":"u1","roles":[1]}"#)),
        ];
        for token in &cases {
            assert_eq!(decode_claims(token), None, "decoded {token:?}");
        }
    }

    #[test]
    fn issued_tokens_decode() -> crate::Result<()> {
        use crate::{identity::Role, keys::KeyRing, token::TokenIssuer};
        use uuid::Uuid;

        let issuer = TokenIssuer::new(KeyRing::generate().signing(), 60)?;
        let id = Uuid::now_v7();
        let issued = issuer.issue(id, &[Role::Admin, Role::User])?;

        let user = decode_claims(&issued.token);
        assert_eq!(user.as_ref().map(|user| user.id.clone()), Some(id.to_string()));
        assert!(user.is_some_and(|user| user.has_role("ADMIN") && user.has_role("USER")));
        Ok(())
    }
}
