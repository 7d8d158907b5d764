use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use faceauth_core::matcher::MatchError;
use faceauth_core::{EncodingStore, FaceEncoding};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

/// Encrypted enrolled encoding.
pub const ENCODING_FILE: &str = "enrolled_face.enc";
/// Enrollment still with the detected face outlined.
pub const PREVIEW_FILE: &str = "enrolled_face_preview.png";
const KEY_FILE: &str = ".key";
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state directory I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preview image error: {0}")]
    Preview(#[from] image::ImageError),
    #[error("encoding encryption failed")]
    EncryptionFailed,
    #[error("encoding decryption failed: key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid encoding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid stored encoding: {0}")]
    InvalidEncoding(#[from] MatchError),
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
    #[error("encryption key has {0} bytes, expected 32")]
    KeyLength(usize),
}

/// File-backed store for the single enrolled encoding, AES-256-GCM encrypted.
///
/// Layout under the state directory:
/// - `enrolled_face.enc`: 12-byte nonce || ciphertext || 16-byte GCM tag
/// - `enrolled_face_preview.png`: optional preview
/// - `.key`: per-installation 32-byte key, mode 0600, kept across resets
pub struct FileEncodingStore {
    dir: PathBuf,
    enc_key: [u8; 32],
}

/// Snapshot of what is stored, for `faceauth status`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub state_dir: PathBuf,
    pub enrolled: bool,
    pub dimension: Option<usize>,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub preview: Option<PathBuf>,
}

impl FileEncodingStore {
    /// Open (or create) the state directory and load its key.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let enc_key = load_or_generate_key(&dir.join(KEY_FILE))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            enc_key,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn encoding_path(&self) -> PathBuf {
        self.dir.join(ENCODING_FILE)
    }

    pub fn preview_path(&self) -> PathBuf {
        self.dir.join(PREVIEW_FILE)
    }

    pub fn status(&self) -> Result<StoreStatus, StoreError> {
        let encoding = self.load()?;
        let enrolled_at = match std::fs::metadata(self.encoding_path()) {
            Ok(meta) => Some(DateTime::<Utc>::from(meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let preview = Some(self.preview_path()).filter(|p| p.exists());

        Ok(StoreStatus {
            state_dir: self.dir.clone(),
            enrolled: encoding.is_some(),
            dimension: encoding.as_ref().map(FaceEncoding::dimension),
            enrolled_at,
            preview,
        })
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt encoding values with AES-256-GCM.
    ///
    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_encoding(&self, encoding: &FaceEncoding) -> Result<Vec<u8>, StoreError> {
        encoding.validate()?;
        let plaintext = encoding_to_bytes(encoding);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt_encoding(&self, blob: &[u8]) -> Result<FaceEncoding, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        encoding_from_bytes(&plaintext)
    }
}

impl EncodingStore for FileEncodingStore {
    type Error = StoreError;

    fn load(&self) -> Result<Option<FaceEncoding>, StoreError> {
        let blob = match std::fs::read(self.encoding_path()) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.decrypt_encoding(&blob).map(Some)
    }

    fn save(&mut self, encoding: &FaceEncoding, preview: Option<&RgbImage>) -> Result<(), StoreError> {
        let blob = self.encrypt_encoding(encoding)?;

        // Never leave a truncated encoding in place.
        let path = self.encoding_path();
        let tmp = path.with_extension("enc.part");
        std::fs::write(&tmp, &blob)?;
        std::fs::rename(&tmp, &path)?;

        match preview {
            Some(image) => image.save(self.preview_path())?,
            None => remove_if_present(&self.preview_path())?,
        }

        tracing::info!(
            path = %path.display(),
            dimension = encoding.dimension(),
            "encrypted encoding written"
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        remove_if_present(&self.encoding_path())?;
        remove_if_present(&self.preview_path())?;
        tracing::debug!(dir = %self.dir.display(), "stored encoding cleared");
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// The per-installation key. Created on first use, owner-readable only, and never
/// touched by `clear`.
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    match std::fs::read(key_path) {
        Ok(bytes) => {
            let key: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::KeyLength(bytes.len()))?;
            tracing::debug!(path = %key_path.display(), "loaded encryption key");
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => create_key(key_path),
        Err(e) => Err(StoreError::KeyIo(e)),
    }
}

fn create_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(key_path)
        .and_then(|mut f| f.write_all(&key))
        .map_err(StoreError::KeyIo)?;

    tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
    Ok(key)
}

// ── Encoding bytes ────────────────────────────────────────────────────────────

fn encoding_to_bytes(encoding: &FaceEncoding) -> Vec<u8> {
    encoding.values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Little-endian f32s; the dimension is whatever the blob holds.
fn encoding_from_bytes(bytes: &[u8]) -> Result<FaceEncoding, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }
    let encoding = FaceEncoding::new(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    );
    encoding.validate()?;
    Ok(encoding)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("faceauth-store-{tag}-{nanos}"))
    }

    fn encoding() -> FaceEncoding {
        FaceEncoding::new((0..128).map(|i| i as f32 / 128.0 - 0.5).collect())
    }

    #[test]
    fn test_roundtrip() {
        let dir = temp_dir("roundtrip");
        let mut store = FileEncodingStore::open(&dir).unwrap();
        assert_eq!(store.load().unwrap(), None);

        store.save(&encoding(), Some(&RgbImage::new(4, 4))).unwrap();
        let loaded = store.load().unwrap().unwrap();
        for (orig, rec) in encoding().values.iter().zip(&loaded.values) {
            assert_eq!(orig.to_bits(), rec.to_bits());
        }
        assert!(store.preview_path().exists());

        // A fresh handle reuses the persisted key.
        let reopened = FileEncodingStore::open(&dir).unwrap();
        assert_eq!(reopened.load().unwrap(), Some(encoding()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_ciphertext_is_not_plaintext() {
        let dir = temp_dir("cipher");
        let mut store = FileEncodingStore::open(&dir).unwrap();
        store.save(&encoding(), None).unwrap();

        let blob = std::fs::read(store.encoding_path()).unwrap();
        let plaintext = encoding_to_bytes(&encoding());
        assert_eq!(blob.len(), NONCE_LEN + plaintext.len() + 16);
        assert!(!blob.windows(plaintext.len()).any(|w| w == plaintext.as_slice()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_clear_is_idempotent_and_keeps_key() {
        let dir = temp_dir("clear");
        let mut store = FileEncodingStore::open(&dir).unwrap();
        store.save(&encoding(), Some(&RgbImage::new(2, 2))).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert!(!store.preview_path().exists());
        assert!(dir.join(KEY_FILE).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_without_preview_drops_stale_preview() {
        let dir = temp_dir("stale");
        let mut store = FileEncodingStore::open(&dir).unwrap();
        store.save(&encoding(), Some(&RgbImage::new(2, 2))).unwrap();
        store.save(&encoding(), None).unwrap();
        assert!(!store.preview_path().exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_key_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir("mode");
        FileEncodingStore::open(&dir).unwrap();
        let mode = std::fs::metadata(dir.join(KEY_FILE)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir = temp_dir("wrongkey");
        std::fs::create_dir_all(&dir).unwrap();
        let mut store1 = FileEncodingStore {
            dir: dir.clone(),
            enc_key: [1u8; 32],
        };
        let store2 = FileEncodingStore {
            dir: dir.clone(),
            enc_key: [2u8; 32],
        };

        store1.save(&encoding(), None).unwrap();
        assert!(matches!(store2.load(), Err(StoreError::DecryptionFailed)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let dir = temp_dir("truncated");
        let store = FileEncodingStore::open(&dir).unwrap();
        std::fs::write(store.encoding_path(), [0u8; 8]).unwrap();
        assert!(matches!(store.load(), Err(StoreError::InvalidBlob(8))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let dir = temp_dir("keylen");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(KEY_FILE), [0u8; 16]).unwrap();
        assert!(matches!(FileEncodingStore::open(&dir), Err(StoreError::KeyLength(16))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_decoded_encoding_is_validated() {
        let mut values = vec![0.5f32; 128];
        values[42] = f32::NAN;
        let err = encoding_from_bytes(&encoding_to_bytes(&FaceEncoding::new(values))).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEncoding(MatchError::NonFiniteValue)));

        let err = encoding_from_bytes(&[]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEncoding(MatchError::EmptyEncoding)));
    }

    #[test]
    fn test_ragged_blob_rejected() {
        let err = encoding_from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidBlob(10)));
    }

    #[test]
    fn test_save_rejects_non_finite_encoding() {
        let dir = temp_dir("nonfinite");
        let mut store = FileEncodingStore::open(&dir).unwrap();
        let err = store.save(&FaceEncoding::new(vec![0.1, f32::INFINITY]), None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEncoding(MatchError::NonFiniteValue)));
        assert!(!store.encoding_path().exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_byte_fidelity() {
        let values = vec![0.0, -0.0, 1.0, -1.0, f32::MIN_POSITIVE, f32::EPSILON, std::f32::consts::PI];
        let recovered = encoding_from_bytes(&encoding_to_bytes(&FaceEncoding::new(values.clone()))).unwrap();
        assert_eq!(values.len(), recovered.dimension());
        for (orig, rec) in values.iter().zip(&recovered.values) {
            assert_eq!(orig.to_bits(), rec.to_bits(), "mismatch: {orig} vs {rec}");
        }
    }

    #[test]
    fn test_status() {
        let dir = temp_dir("status");
        let mut store = FileEncodingStore::open(&dir).unwrap();
        let empty = store.status().unwrap();
        assert!(!empty.enrolled);
        assert!(empty.enrolled_at.is_none());

        store.save(&encoding(), Some(&RgbImage::new(2, 2))).unwrap();
        let status = store.status().unwrap();
        assert!(status.enrolled);
        assert_eq!(status.dimension, Some(128));
        assert!(status.enrolled_at.is_some());
        assert_eq!(status.preview, Some(store.preview_path()));

        std::fs::remove_dir_all(&dir).ok();
    }
}
