//! Key Manager - Signing Key Pair Lifecycle
//!
//! Loads or generates one Ed25519 key pair per process. The private key
//! is persisted only in passphrase-encrypted form (Argon2id derives the
//! wrapping key, ChaCha20-Poly1305 seals the seed); the public key is
//! written alongside in plain armored form. Both files are named from a
//! generation timestamp so repeated runs never overwrite old material.

use std::fs;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use crate::hashing::sha256_hex;
use crate::signing::SignatureRecord;

/// Hex characters of the public-key hash embedded in the marker text.
pub const FINGERPRINT_LEN: usize = 16;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PRIVATE_LABEL: &str = "PROVSTAMP ENCRYPTED SIGNING KEY";
const PUBLIC_LABEL: &str = "PROVSTAMP VERIFYING KEY";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key file not found: {0}")]
    NotFound(PathBuf),

    #[error("wrong passphrase for private key")]
    WrongPassphrase,

    #[error("key material corrupt: {0}")]
    Corrupt(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// File pair holding one key pair at rest.
#[derive(Debug, Clone)]
pub struct KeyPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

impl KeyPaths {
    /// Deterministic names derived from a generation timestamp.
    pub fn for_stamp(keys_dir: &Path, stamp: &str) -> Self {
        Self {
            private_key: keys_dir.join(format!("{stamp}_signing.key")),
            public_key: keys_dir.join(format!("{stamp}_verifying.key")),
        }
    }

    pub fn both_exist(&self) -> bool {
        self.private_key.exists() && self.public_key.exists()
    }
}

/// Holds the in-memory key pair for the process lifetime.
pub struct KeyManager {
    signing_key: SigningKey,
    fingerprint: String,
}

impl KeyManager {
    fn ready(signing_key: SigningKey) -> Self {
        let fingerprint =
            sha256_hex(signing_key.verifying_key().as_bytes())[..FINGERPRINT_LEN].to_string();
        Self {
            signing_key,
            fingerprint,
        }
    }

    /// Generate a fresh key pair and persist both halves.
    pub fn generate(
        paths: &KeyPaths,
        passphrase: &str,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, KeyError> {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let wrap_key = derive_wrapping_key(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&wrap_key));
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), seed.as_ref())
            .map_err(|e| KeyError::Crypto(e.to_string()))?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);

        fs::write(&paths.private_key, armor(PRIVATE_LABEL, &blob))?;
        fs::write(
            &paths.public_key,
            armor(PUBLIC_LABEL, signing_key.verifying_key().as_bytes()),
        )?;

        tracing::info!(
            private = %paths.private_key.display(),
            public = %paths.public_key.display(),
            "generated new key pair"
        );
        Ok(Self::ready(signing_key))
    }

    /// Decrypt an existing private key file.
    pub fn load(paths: &KeyPaths, passphrase: &str) -> Result<Self, KeyError> {
        let armored = match fs::read_to_string(&paths.private_key) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyError::NotFound(paths.private_key.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let blob = dearmor(PRIVATE_LABEL, &armored)?;
        if blob.len() < SALT_LEN + NONCE_LEN {
            return Err(KeyError::Corrupt("encrypted blob too short".into()));
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let wrap_key = derive_wrapping_key(passphrase, salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&wrap_key));
        // AEAD tag failure does not distinguish a bad passphrase from a
        // tampered blob; report the operator-actionable case.
        let seed = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| KeyError::WrongPassphrase)?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| KeyError::Corrupt("decrypted seed has wrong length".into()))?;

        Ok(Self::ready(SigningKey::from_bytes(&seed)))
    }

    /// Load with a bounded number of passphrase re-prompts.
    ///
    /// Only `WrongPassphrase` triggers a re-prompt; every other failure
    /// surfaces immediately.
    pub fn load_with_reprompt(
        paths: &KeyPaths,
        passphrase: &str,
        max_retries: u32,
        mut prompt: impl FnMut() -> std::io::Result<String>,
    ) -> Result<Self, KeyError> {
        let mut result = Self::load(paths, passphrase);
        for _ in 0..max_retries {
            match result {
                Err(KeyError::WrongPassphrase) => {
                    tracing::warn!("passphrase rejected, re-prompting");
                    let retry = prompt()?;
                    result = Self::load(paths, &retry);
                }
                other => return other,
            }
        }
        result
    }

    /// Existing pair if both files are present, otherwise a new one.
    pub fn load_or_generate(
        paths: &KeyPaths,
        passphrase: &str,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, KeyError> {
        if paths.both_exist() {
            Self::load(paths, passphrase)
        } else {
            Self::generate(paths, passphrase, rng)
        }
    }

    /// Like [`Self::load_or_generate`], but a rejected passphrase on
    /// the load path triggers bounded re-prompting instead of failing
    /// outright. Generation never prompts; the configured passphrase
    /// seals the new pair.
    pub fn load_or_generate_with_reprompt(
        paths: &KeyPaths,
        passphrase: &str,
        max_retries: u32,
        rng: &mut (impl RngCore + CryptoRng),
        prompt: impl FnMut() -> std::io::Result<String>,
    ) -> Result<Self, KeyError> {
        if paths.both_exist() {
            Self::load_with_reprompt(paths, passphrase, max_retries, prompt)
        } else {
            Self::generate(paths, passphrase, rng)
        }
    }

    /// First 16 hex characters of SHA-256 over the public key bytes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, payload: &[u8]) -> SignatureRecord {
        let signature = self.signing_key.sign(payload);
        SignatureRecord {
            payload_hash: sha256_hex(payload),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

/// Read an armored public key file.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, KeyError> {
    let armored = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(KeyError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let bytes = dearmor(PUBLIC_LABEL, &armored)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| KeyError::Corrupt("public key has wrong length".into()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| KeyError::Corrupt(e.to_string()))
}

fn derive_wrapping_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], KeyError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| KeyError::Crypto(e.to_string()))?;
    Ok(key)
}

fn armor(label: &str, bytes: &[u8]) -> String {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        BASE64.encode(bytes)
    )
}

fn dearmor(label: &str, text: &str) -> Result<Vec<u8>, KeyError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let mut body = String::new();
    let mut inside = false;
    for line in text.lines() {
        let line = line.trim();
        if line == begin {
            inside = true;
        } else if line == end {
            return BASE64
                .decode(body.as_bytes())
                .map_err(|e| KeyError::Corrupt(e.to_string()));
        } else if inside {
            body.push_str(line);
        }
    }
    Err(KeyError::Corrupt(format!("missing {label} armor")))
}
