use crate::errors::GatewayError;
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Custodial user record as reported by the user/key repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub keys: Vec<KeyRecord>,
}

/// One registered signing key: an address and the KMS key ARN behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub address: String,
    pub key_arn: String,
}

/// Opaque capability referencing a remotely-held key. Never contains key
/// material; lives only for the request that resolved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub service: String,
    pub key_id: String,
}

impl KeyHandle {
    /// Derive a handle from a key ARN, e.g.
    /// `arn:aws:kms:eu-west-1:123:key/ab-cd` -> service `kms`, id `ab-cd`.
    pub fn from_arn(arn: &str) -> Result<Self, GatewayError> {
        let trimmed = arn.trim();
        let key_id = trimmed
            .rsplit_once("key/")
            .map_or(trimmed, |(_, id)| id)
            .to_owned();
        if key_id.is_empty() {
            return Err(GatewayError::SigningFailed(eyre::eyre!(
                "empty key id in key ARN"
            )));
        }
        let service = trimmed
            .split(':')
            .nth(2)
            .filter(|s| !s.is_empty())
            .unwrap_or("kms")
            .to_owned();
        Ok(Self { service, key_id })
    }
}

/// Repository boundary for user/key lookups. The storage behind it (DynamoDB,
/// SQL, flat file) is a collaborator concern.
pub trait UserDirectory: Send + Sync {
    fn get_user(&self, username: &str) -> eyre::Result<Option<User>>;
    fn get_key(&self, address: &str, chain_hint: &str, user: &User)
        -> eyre::Result<Option<KeyRecord>>;
}

/// File-backed directory: a private `users.json` listing users and their
/// registered keys.
#[derive(Debug, Clone)]
pub struct FileUserDirectory {
    path: PathBuf,
}

impl FileUserDirectory {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> eyre::Result<Vec<User>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let s = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse {}", self.path.display()))
    }
}

impl UserDirectory for FileUserDirectory {
    fn get_user(&self, username: &str) -> eyre::Result<Option<User>> {
        Ok(self.load()?.into_iter().find(|u| u.username == username))
    }

    fn get_key(
        &self,
        address: &str,
        _chain_hint: &str,
        user: &User,
    ) -> eyre::Result<Option<KeyRecord>> {
        let wanted = address.to_lowercase();
        Ok(user
            .keys
            .iter()
            .find(|k| k.address.to_lowercase() == wanted)
            .cloned())
    }
}

/// Resolves (user identity, address) -> `KeyHandle`.
#[derive(Debug, Clone)]
pub struct KeyResolver<D> {
    directory: D,
}

impl<D: UserDirectory> KeyResolver<D> {
    pub const fn new(directory: D) -> Self {
        Self { directory }
    }

    #[cfg(test)]
    pub(crate) const fn directory_ref(&self) -> &D {
        &self.directory
    }

    pub fn resolve(&self, username: &str, address: &str) -> Result<KeyHandle, GatewayError> {
        let user = self
            .directory
            .get_user(username)
            .map_err(GatewayError::SigningFailed)?
            .ok_or_else(|| GatewayError::KeyNotFound(address.to_owned()))?;
        let key = self
            .directory
            .get_key(address, "", &user)
            .map_err(GatewayError::SigningFailed)?
            .ok_or_else(|| GatewayError::KeyNotFound(address.to_owned()))?;
        KeyHandle::from_arn(&key.key_arn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_handle_from_full_arn() -> eyre::Result<()> {
        let h = KeyHandle::from_arn("arn:aws:kms:eu-west-1:111122223333:key/ab12-cd34")
            .map_err(|e| eyre::eyre!("{e}"))?;
        assert_eq!(h.key_id, "ab12-cd34", "key id");
        assert_eq!(h.service, "kms", "service");
        Ok(())
    }

    #[test]
    fn key_handle_from_bare_id() -> eyre::Result<()> {
        let h = KeyHandle::from_arn("ab12-cd34").map_err(|e| eyre::eyre!("{e}"))?;
        assert_eq!(h.key_id, "ab12-cd34", "bare ids pass through");
        Ok(())
    }

    struct OneUser;

    impl UserDirectory for OneUser {
        fn get_user(&self, username: &str) -> eyre::Result<Option<User>> {
            if username == "alice" {
                Ok(Some(User {
                    username: "alice".into(),
                    keys: vec![KeyRecord {
                        address: "0xAbCd000000000000000000000000000000000001".into(),
                        key_arn: "arn:aws:kms:us-east-1:1:key/k1".into(),
                    }],
                }))
            } else {
                Ok(None)
            }
        }

        fn get_key(
            &self,
            address: &str,
            _chain_hint: &str,
            user: &User,
        ) -> eyre::Result<Option<KeyRecord>> {
            let wanted = address.to_lowercase();
            Ok(user
                .keys
                .iter()
                .find(|k| k.address.to_lowercase() == wanted)
                .cloned())
        }
    }

    #[test]
    fn resolve_is_case_insensitive_on_address() -> eyre::Result<()> {
        let r = KeyResolver::new(OneUser);
        let h = r
            .resolve("alice", "0xabcd000000000000000000000000000000000001")
            .map_err(|e| eyre::eyre!("{e}"))?;
        assert_eq!(h.key_id, "k1", "resolved key id");
        Ok(())
    }

    #[test]
    fn missing_user_and_missing_key_both_map_to_key_not_found() {
        let r = KeyResolver::new(OneUser);
        assert!(
            matches!(
                r.resolve("bob", "0xabcd000000000000000000000000000000000001"),
                Err(GatewayError::KeyNotFound(_))
            ),
            "unknown user"
        );
        assert!(
            matches!(
                r.resolve("alice", "0x0000000000000000000000000000000000000009"),
                Err(GatewayError::KeyNotFound(_))
            ),
            "unknown address"
        );
    }
}
