use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};

/// The shared admin secret, held only as a SHA-256 digest.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredential {
    digest: [u8; 32],
}

/// Proof that the caller presented the admin secret. Privileged operations take one.
#[derive(Debug)]
pub struct AdminContext {
    actor: String,
}

impl AdminContext {
    pub fn actor(&self) -> &str {
        &self.actor
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            actor: "test-admin".to_string(),
        }
    }
}

impl AdminCredential {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            digest: digest(secret),
        }
    }

    pub fn from_hex_digest(hex: &str) -> PipelineResult<Self> {
        let hex = hex.trim();
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PipelineError::Unauthorized(
                "stored admin digest is malformed".to_string(),
            ));
        }

        let mut out = [0_u8; 32];
        for (index, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16).map_err(|_| {
                PipelineError::Unauthorized("stored admin digest is malformed".to_string())
            })?;
        }

        Ok(Self { digest: out })
    }

    pub fn digest_hex(&self) -> String {
        self.digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    pub fn authorize(&self, presented: Option<&str>, actor: &str) -> PipelineResult<AdminContext> {
        let Some(presented) = presented.filter(|value| !value.is_empty()) else {
            return Err(PipelineError::Unauthorized(
                "admin secret required (--admin-secret or FOUNDRY_ADMIN_SECRET)".to_string(),
            ));
        };

        let candidate = digest(presented);
        let mismatch = self
            .digest
            .iter()
            .zip(candidate.iter())
            .fold(0_u8, |acc, (left, right)| acc | (left ^ right));

        if mismatch != 0 {
            return Err(PipelineError::Unauthorized(
                "admin secret does not match".to_string(),
            ));
        }

        Ok(AdminContext {
            actor: actor.to_string(),
        })
    }
}

impl std::fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminCredential(..)")
    }
}

fn digest(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let mut out = [0_u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
