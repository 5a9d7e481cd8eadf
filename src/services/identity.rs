use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::AppResult;

type HmacSha256 = Hmac<Sha256>;

/// External identity collaborator. The service never mints identities; it
/// only resolves proofs handed to it by clients.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_identity(&self, proof: &str) -> AppResult<Option<Uuid>>;
    async fn is_banned(&self, user_id: Uuid) -> AppResult<bool>;
}

/// Proof format: `<user_uuid>.<hex hmac-sha256(secret, uuid bytes)>`.
pub struct HmacIdentity {
    secret: Vec<u8>,
    banned: HashSet<Uuid>,
}

impl HmacIdentity {
    pub fn new(secret: &str, banned: HashSet<Uuid>) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            banned,
        }
    }

    fn expected_tag(&self, user_id: Uuid) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(user_id.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Issue a proof for `user_id`. Exists for tooling and tests; in
    /// production the auth collaborator issues proofs with the same secret.
    pub fn issue_proof(&self, user_id: Uuid) -> String {
        let tag = self.expected_tag(user_id);
        let mut hex = String::with_capacity(tag.len() * 2);
        for b in &tag {
            hex.push_str(&format!("{:02x}", b));
        }
        format!("{}.{}", user_id, hex)
    }

    fn verify(&self, proof: &str) -> Option<Uuid> {
        let (id_part, tag_hex) = proof.split_once('.')?;
        let user_id = Uuid::parse_str(id_part).ok()?;
        if tag_hex.len() != 64 {
            return None;
        }
        let mut tag = Vec::with_capacity(32);
        let bytes = tag_hex.as_bytes();
        for pair in bytes.chunks(2) {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            tag.push(((hi << 4) | lo) as u8);
        }
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(user_id.as_bytes());
        mac.verify_slice(&tag).ok()?;
        Some(user_id)
    }
}

#[async_trait]
impl IdentityProvider for HmacIdentity {
    async fn resolve_identity(&self, proof: &str) -> AppResult<Option<Uuid>> {
        Ok(self.verify(proof))
    }

    async fn is_banned(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.banned.contains(&user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> HmacIdentity {
        HmacIdentity::new("test-secret", HashSet::new())
    }

    #[tokio::test]
    async fn issued_proofs_resolve() {
        let identity = provider();
        let user = Uuid::new_v4();
        let proof = identity.issue_proof(user);
        assert_eq!(identity.resolve_identity(&proof).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn tampered_proofs_are_rejected() {
        let identity = provider();
        let user = Uuid::new_v4();
        let proof = identity.issue_proof(user);

        // Swap the claimed identity but keep the tag
        let other = Uuid::new_v4();
        let tag = proof.split_once('.').unwrap().1;
        let forged = format!("{}.{}", other, tag);
        assert_eq!(identity.resolve_identity(&forged).await.unwrap(), None);

        assert_eq!(identity.resolve_identity("garbage").await.unwrap(), None);
        assert_eq!(
            identity.resolve_identity(&format!("{}.beef", user)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn banned_set_is_consulted() {
        let user = Uuid::new_v4();
        let identity = HmacIdentity::new("test-secret", HashSet::from([user]));
        assert!(identity.is_banned(user).await.unwrap());
        assert!(!identity.is_banned(Uuid::new_v4()).await.unwrap());
    }
}
