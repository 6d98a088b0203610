// =====================================================
// CRYPTO MODULE
// Key file management and stored-password encryption
// =====================================================

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

pub const KEY_FILE_NAME: &str = "encryption.key";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub fn key_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(KEY_FILE_NAME)
}

/// Loads the key from `<data_dir>/encryption.key`, creating it on first run.
///
/// A key file that exists but cannot be decoded is an error rather than being
/// replaced, otherwise every stored password would become unreadable.
pub fn initialize_key(data_dir: &Path) -> Result<Vec<u8>, String> {
    fs::create_dir_all(data_dir)
        .map_err(|e| format!("Failed to create data directory {}: {}", data_dir.display(), e))?;

    let path = key_file_path(data_dir);
    if path.exists() {
        let encoded = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read key file {}: {}", path.display(), e))?;
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| format!("Failed to decode key file: {}", e))?;
        if key.len() != KEY_LEN {
            return Err(format!(
                "Key file {} holds {} bytes, expected {}",
                path.display(),
                key.len(),
                KEY_LEN
            ));
        }
        return Ok(key);
    }

    let key = generate_new_key();
    fs::write(&path, BASE64.encode(&key))
        .map_err(|e| format!("Failed to save key to file: {}", e))?;
    log::info!("Created new encryption key at {}", path.display());
    Ok(key)
}

pub fn generate_new_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    rand::thread_rng().fill(&mut key[..]);
    key
}

/// `base64(nonce || ciphertext)`; empty passwords stay empty.
pub fn encrypt_password_with_key(password: &str, key: &[u8]) -> Result<String, String> {
    if password.is_empty() {
        return Ok(String::new());
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| format!("Failed to create cipher: {}", e))?;
    let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), password.as_bytes())
        .map_err(|e| format!("Encryption failed: {}", e))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + sealed.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend(sealed);
    Ok(BASE64.encode(combined))
}

pub fn decrypt_password_with_key(encrypted: &str, key: &[u8]) -> Result<String, String> {
    if encrypted.is_empty() {
        return Ok(String::new());
    }

    let combined = BASE64
        .decode(encrypted)
        .map_err(|e| format!("Base64 decode failed: {}", e))?;
    if combined.len() <= NONCE_LEN {
        return Err("Invalid encrypted data".to_string());
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| format!("Failed to create cipher: {}", e))?;
    let (nonce, sealed) = combined.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|e| format!("Decryption failed: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| format!("UTF-8 conversion failed: {}", e))
}
