//! Memory-hard key verifiers.
//!
//! The server never stores an auth key, only `argon2id(key, salt)`. Salt and
//! cost parameters are fixed per deployment: changing any of them makes every
//! stored verifier unmatchable.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::Deserialize;

use crate::{Key, KeyError, KeyHash, KEY_LEN};

/// Argon2 rejects salts shorter than this.
const MIN_SALT_LEN: usize = 8;

/// Argon2id parameters for verifier derivation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HashParams {
    /// Memory cost in KiB (default: 102400 = 100 MiB).
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    /// Number of passes (default: 3).
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Degree of parallelism (default: 4).
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Fixed salt, at least 8 bytes.
    #[serde(default = "default_salt")]
    pub salt: String,
}

fn default_memory_kib() -> u32 {
    100 * 1024
}

fn default_iterations() -> u32 {
    3
}

fn default_parallelism() -> u32 {
    4
}

fn default_salt() -> String {
    "lockbox-auth-v1".to_string()
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
            salt: default_salt(),
        }
    }
}

impl HashParams {
    /// Minimal parameters for tests. Never use these in a deployment.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
            salt: default_salt(),
        }
    }
}

/// Derives [`KeyHash`]es with a fixed set of [`HashParams`].
#[derive(Clone)]
pub struct KeyHasher {
    argon2: Argon2<'static>,
    salt: Vec<u8>,
}

impl KeyHasher {
    /// Validate parameters and build a hasher.
    pub fn new(params: &HashParams) -> Result<Self, KeyError> {
        if params.salt.len() < MIN_SALT_LEN {
            return Err(KeyError::InvalidParams(format!(
                "salt must be at least {} bytes",
                MIN_SALT_LEN
            )));
        }

        let argon2_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| KeyError::InvalidParams(e.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params),
            salt: params.salt.as_bytes().to_vec(),
        })
    }

    /// Hash a key into its verifier.
    ///
    /// Deterministic for a given hasher. CPU and memory heavy with the default
    /// parameters; async callers should run it on a blocking thread.
    pub fn hash(&self, key: &Key) -> Result<KeyHash, KeyError> {
        let mut output = [0u8; KEY_LEN];
        self.argon2
            .hash_password_into(key.as_bytes(), &self.salt, &mut output)
            .map_err(|e| KeyError::Hashing(e.to_string()))?;
        Ok(KeyHash::new(output))
    }

    /// Hash `key` and compare it against a stored verifier.
    pub fn verify(&self, key: &Key, expected: &KeyHash) -> Result<bool, KeyError> {
        Ok(self.hash(key)? == *expected)
    }
}

impl std::fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = self.argon2.params();
        f.debug_struct("KeyHasher")
            .field("m_cost", &params.m_cost())
            .field("t_cost", &params.t_cost())
            .field("p_cost", &params.p_cost())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> KeyHasher {
        KeyHasher::new(&HashParams::insecure_fast()).unwrap()
    }

    #[test]
    fn default_params_match_deployment_costs() {
        let params = HashParams::default();
        assert_eq!(params.memory_kib, 102400);
        assert_eq!(params.iterations, 3);
        assert_eq!(params.parallelism, 4);
        assert!(KeyHasher::new(&params).is_ok());
    }

    #[test]
    fn placeholder_is_not_a_real_verifier() {
        let hasher = hasher();
        for key in [Key::ZERO, Key::from(1u64)] {
            assert_ne!(hasher.hash(&key).unwrap(), KeyHash::PLACEHOLDER);
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let hasher = hasher();
        let key = Key::from(47584093698567567586u128);
        assert_eq!(hasher.hash(&key).unwrap(), hasher.hash(&key).unwrap());
    }

    #[test]
    fn hash_equal_iff_keys_equal() {
        let hasher = hasher();
        let keys: Vec<Key> = [0u64, 1, 7, 8, 42, u64::MAX]
            .into_iter()
            .map(Key::from)
            .collect();

        for a in &keys {
            for b in &keys {
                let same_hash = hasher.hash(a).unwrap() == hasher.hash(b).unwrap();
                assert_eq!(same_hash, a == b);
            }
        }
    }

    #[test]
    fn hash_is_not_the_key() {
        let hasher = hasher();
        let key = Key::from(42u64);
        assert_ne!(hasher.hash(&key).unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn different_salts_give_different_hashes() {
        let a = hasher();
        let b = KeyHasher::new(&HashParams {
            salt: "another-deployment".to_string(),
            ..HashParams::insecure_fast()
        })
        .unwrap();
        let key = Key::from(1u64);
        assert_ne!(a.hash(&key).unwrap(), b.hash(&key).unwrap());
    }

    #[test]
    fn verify_matches_only_the_right_key() {
        let hasher = hasher();
        let stored = hasher.hash(&Key::from(7u64)).unwrap();
        assert!(hasher.verify(&Key::from(7u64), &stored).unwrap());
        assert!(!hasher.verify(&Key::from(8u64), &stored).unwrap());
    }

    #[test]
    fn short_salt_rejected() {
        let params = HashParams {
            salt: "short".to_string(),
            ..HashParams::insecure_fast()
        };
        assert!(matches!(
            KeyHasher::new(&params),
            Err(KeyError::InvalidParams(_))
        ));
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let params: HashParams = serde_json::from_str(r#"{"iterations": 2}"#).unwrap();
        assert_eq!(params.iterations, 2);
        assert_eq!(params.memory_kib, 102400);
        assert_eq!(params.salt, "lockbox-auth-v1");
    }
}
