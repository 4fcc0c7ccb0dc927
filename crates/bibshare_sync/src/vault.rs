//! Credential vault.
//!
//! Encrypts a secret under a key derived from another known value (the
//! username), so a password can be persisted without ever storing it in
//! clear text. AES-256-GCM provides the integrity tag that makes a wrong
//! username fail closed instead of yielding garbage plaintext.

use crate::error::{SyncError, SyncResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the derived AES-256 key in bytes.
const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
const TAG_SIZE: usize = 16;

/// HKDF salt binding derived keys to this vault.
const VAULT_SALT: &[u8] = b"bibshare-credential-vault";
/// HKDF info string; bump the suffix if the blob layout ever changes.
const VAULT_INFO: &[u8] = b"bibshare-credential-key-v1";

/// Derived key material, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct VaultKey {
    bytes: [u8; KEY_SIZE],
}

impl VaultKey {
    /// Derives the key for a username via HKDF-SHA256.
    fn derive(key_username: &str) -> SyncResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(VAULT_SALT), key_username.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(VAULT_INFO, &mut bytes)
            .map_err(|_| SyncError::internal("HKDF expand failed"))?;
        Ok(Self { bytes })
    }
}

/// Encrypts and decrypts credentials for persistence.
///
/// The blob format is `hex(nonce (12 bytes) || ciphertext || tag (16
/// bytes))`. Encryption uses a fresh random nonce, so encrypting the same
/// secret twice yields different blobs; both decrypt with the same
/// username.
#[derive(Debug, Default, Clone, Copy)]
pub struct CredentialVault;

impl CredentialVault {
    /// Creates a vault.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encrypts a secret under the key derived from `key_username`.
    pub fn encrypt(&self, secret: &str, key_username: &str) -> SyncResult<String> {
        let key = VaultKey::derive(key_username)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key.bytes));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|_| SyncError::internal("credential encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend(ciphertext);
        Ok(hex::encode(blob))
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// `DecryptionFailed` on a wrong username, a corrupted or truncated
    /// blob, or non-hex input. The GCM tag check guarantees a failure is
    /// reported rather than corrupted plaintext returned.
    pub fn decrypt(&self, blob: &str, key_username: &str) -> SyncResult<String> {
        let bytes = hex::decode(blob).map_err(|_| SyncError::DecryptionFailed)?;
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SyncError::DecryptionFailed);
        }

        let key = VaultKey::derive(key_username)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key.bytes));
        let nonce = Nonce::from_slice(&bytes[..NONCE_SIZE]);

        let plaintext = cipher
            .decrypt(nonce, &bytes[NONCE_SIZE..])
            .map_err(|_| SyncError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| SyncError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn roundtrip() {
        let vault = CredentialVault::new();
        let blob = vault.encrypt("hunter2", "alice").unwrap();
        assert_eq!(vault.decrypt(&blob, "alice").unwrap(), "hunter2");
    }

    #[test]
    fn wrong_username_fails_closed() {
        let vault = CredentialVault::new();
        let blob = vault.encrypt("hunter2", "alice").unwrap();
        assert!(matches!(
            vault.decrypt(&blob, "bob"),
            Err(SyncError::DecryptionFailed)
        ));
    }

    #[test]
    fn encryption_is_randomized() {
        let vault = CredentialVault::new();
        let a = vault.encrypt("hunter2", "alice").unwrap();
        let b = vault.encrypt("hunter2", "alice").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a, "alice").unwrap(), "hunter2");
        assert_eq!(vault.decrypt(&b, "alice").unwrap(), "hunter2");
    }

    #[test]
    fn corrupted_blob_fails() {
        let vault = CredentialVault::new();
        let blob = vault.encrypt("hunter2", "alice").unwrap();
        let mut bytes = hex::decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            vault.decrypt(&hex::encode(bytes), "alice"),
            Err(SyncError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_blob_fails() {
        let vault = CredentialVault::new();
        assert!(matches!(
            vault.decrypt("00aabb", "alice"),
            Err(SyncError::DecryptionFailed)
        ));
    }

    #[test]
    fn non_hex_blob_fails() {
        let vault = CredentialVault::new();
        assert!(matches!(
            vault.decrypt("not hex at all", "alice"),
            Err(SyncError::DecryptionFailed)
        ));
    }

    #[test]
    fn empty_secret_roundtrips() {
        let vault = CredentialVault::new();
        let blob = vault.encrypt("", "alice").unwrap();
        assert_eq!(vault.decrypt(&blob, "alice").unwrap(), "");
    }

    proptest! {
        #[test]
        fn roundtrip_for_arbitrary_inputs(secret in ".{1,64}", user in ".{1,32}") {
            let vault = CredentialVault::new();
            let blob = vault.encrypt(&secret, &user).unwrap();
            prop_assert_eq!(vault.decrypt(&blob, &user).unwrap(), secret);
        }

        #[test]
        fn distinct_usernames_never_decrypt(secret in ".{1,64}", u1 in "[a-m]{1,16}", u2 in "[n-z]{1,16}") {
            let vault = CredentialVault::new();
            let blob = vault.encrypt(&secret, &u1).unwrap();
            prop_assert!(vault.decrypt(&blob, &u2).is_err());
        }
    }
}
