use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::core::error::{CoreError, CoreResult};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// AES-256-GCM for message content at rest. The key lives in
/// `<data_dir>/keys/message.key` (0600 inside a 0700 directory), is created
/// on first use and cached for the process lifetime.
pub struct MessageCrypto {
    cipher: Aes256Gcm,
}

impl MessageCrypto {
    pub fn load_or_create(data_dir: &Path) -> CoreResult<Self> {
        let key_dir = data_dir.join("keys");
        let key_path = key_dir.join("message.key");

        let key_bytes = if key_path.exists() {
            let bytes = std::fs::read(&key_path)
                .map_err(|e| CoreError::Transient(format!("reading message key: {e}")))?;
            if bytes.len() != KEY_LEN {
                return Err(CoreError::Fatal(format!(
                    "message key at {} is {} bytes, expected {KEY_LEN}",
                    key_path.display(),
                    bytes.len()
                )));
            }
            bytes
        } else {
            std::fs::create_dir_all(&key_dir)
                .map_err(|e| CoreError::Transient(format!("creating key dir: {e}")))?;
            restrict_dir_permissions(&key_dir);

            let mut bytes = vec![0u8; KEY_LEN];
            OsRng.fill_bytes(&mut bytes);
            std::fs::write(&key_path, &bytes)
                .map_err(|e| CoreError::Transient(format!("writing message key: {e}")))?;
            restrict_file_permissions(&key_path);
            bytes
        };

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Hex string of nonce followed by ciphertext+tag.
    pub fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CoreError::Fatal(format!("message encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, stored: &str) -> CoreResult<String> {
        let raw = hex::decode(stored)
            .map_err(|_| CoreError::Fatal("stored message content is not hex".into()))?;
        if raw.len() < NONCE_LEN {
            return Err(CoreError::Fatal("stored message content too short".into()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CoreError::Fatal(format!("message decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Fatal("decrypted message content is not utf-8".into()))
    }
}

#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) {}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}
