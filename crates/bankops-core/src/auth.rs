use crate::error::BankOpsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Credential presented by an operator for privileged actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorCredential {
    pub operator_id: String,
    pub token: String,
}

/// Registry of operators allowed to approve loans.
///
/// Tokens are deterministic keyed digests so credentials survive restarts
/// without a session store. Production deployments should front this with
/// the platform's identity provider.
#[derive(Debug, Clone, Default)]
pub struct OperatorAuthority {
    secrets: HashMap<String, String>,
}

impl OperatorAuthority {
    pub fn new() -> Self {
        Self {
            secrets: HashMap::new(),
        }
    }

    pub fn register(&mut self, operator_id: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(operator_id.into(), secret.into());
    }

    pub fn is_registered(&self, operator_id: &str) -> bool {
        self.secrets.contains_key(operator_id)
    }

    pub fn issue(&self, operator_id: &str) -> Result<OperatorCredential, BankOpsError> {
        let secret = self.secrets.get(operator_id).ok_or_else(|| {
            BankOpsError::Unauthorized(format!("unknown operator '{operator_id}'"))
        })?;

        Ok(OperatorCredential {
            operator_id: operator_id.to_string(),
            token: token_digest(secret, operator_id),
        })
    }

    /// Issue a credential after checking the operator's secret.
    pub fn login(&self, operator_id: &str, secret: &str) -> Result<OperatorCredential, BankOpsError> {
        match self.secrets.get(operator_id) {
            Some(expected) if expected == secret => self.issue(operator_id),
            _ => Err(BankOpsError::Unauthorized(format!(
                "invalid secret for operator '{operator_id}'"
            ))),
        }
    }

    pub fn verify(&self, credential: &OperatorCredential) -> Result<(), BankOpsError> {
        let secret = self.secrets.get(&credential.operator_id).ok_or_else(|| {
            BankOpsError::Unauthorized(format!("unknown operator '{}'", credential.operator_id))
        })?;

        if token_digest(secret, &credential.operator_id) != credential.token {
            return Err(BankOpsError::Unauthorized(
                "operator token mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

fn token_digest(secret: &str, operator_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(secret.as_bytes());
    hasher.update(&[0]);
    hasher.update(operator_id.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_credentials_verify() {
        let mut authority = OperatorAuthority::new();
        authority.register("officer-1", "local-secret");

        let credential = authority.issue("officer-1").unwrap();
        assert!(authority.verify(&credential).is_ok());
    }

    #[test]
    fn forged_or_unknown_credentials_fail() {
        let mut authority = OperatorAuthority::new();
        authority.register("officer-1", "local-secret");

        let forged = OperatorCredential {
            operator_id: "officer-1".to_string(),
            token: "deadbeef".to_string(),
        };
        assert!(matches!(
            authority.verify(&forged),
            Err(BankOpsError::Unauthorized(_))
        ));

        let mut other = OperatorAuthority::new();
        other.register("officer-1", "different-secret");
        let foreign = other.issue("officer-1").unwrap();
        assert!(authority.verify(&foreign).is_err());

        assert!(authority.issue("nobody").is_err());
    }

    #[test]
    fn login_checks_secret() {
        let mut authority = OperatorAuthority::new();
        authority.register("officer-1", "local-secret");

        let credential = authority.login("officer-1", "local-secret").unwrap();
        assert_eq!(credential, authority.issue("officer-1").unwrap());
        assert!(authority.login("officer-1", "guess").is_err());
        assert!(authority.login("nobody", "local-secret").is_err());
    }
}
