//! Compression and encryption wrapping for files written by the managers.
//!
//! Readers never need to be told how a file was written: gzip is recognised by its magic
//! bytes and encrypted files carry their own header.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::errors::{DurabilityError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ENCRYPTED_MAGIC: &[u8; 8] = b"DTENC\x00\x00\x01";
const NONCE_LEN: usize = 12;

/// A 256-bit key for snapshot encryption.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim()).map_err(|e| {
            DurabilityError::configuration(format!("encryption key is not valid hex: {}", e))
        })?;
        let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            DurabilityError::configuration(format!(
                "encryption key must be 32 bytes (64 hex chars), got {} bytes",
                b.len()
            ))
        })?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|_| DurabilityError::configuration("invalid AES-256 key length"))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// A file writer that optionally gzips what passes through it.
pub enum FileSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FileSink {
    /// Creates `path`; `compression_level` of `None` writes plain text.
    pub fn create(path: &Path, compression_level: Option<u32>) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(match compression_level {
            Some(level) => FileSink::Gzip(GzEncoder::new(file, Compression::new(level))),
            None => FileSink::Plain(file),
        })
    }

    /// Finishes compression, flushes, and syncs the file to disk. Returns its size.
    pub fn finish(self) -> io::Result<u64> {
        let buffered = match self {
            FileSink::Plain(w) => w,
            FileSink::Gzip(enc) => enc.finish()?,
        };
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileSink::Plain(w) => w.write(buf),
            FileSink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileSink::Plain(w) => w.flush(),
            FileSink::Gzip(w) => w.flush(),
        }
    }
}

pub fn gzip(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::new(level));
    enc.write_all(data)?;
    enc.finish()
}

pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

pub fn is_encrypted(data: &[u8]) -> bool {
    data.starts_with(ENCRYPTED_MAGIC)
}

pub fn encrypt(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = key.cipher()?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, data)
        .map_err(|_| DurabilityError::validation("encryption failed"))?;

    let mut out = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_LEN + sealed.len());
    out.extend_from_slice(ENCRYPTED_MAGIC);
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn decrypt(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let body = data
        .strip_prefix(ENCRYPTED_MAGIC.as_slice())
        .ok_or_else(|| DurabilityError::validation("file is not encrypted"))?;
    if body.len() < NONCE_LEN {
        return Err(DurabilityError::validation("encrypted file is truncated"));
    }
    let (nonce, sealed) = body.split_at(NONCE_LEN);
    key.cipher()?
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| {
            DurabilityError::validation("decryption failed: wrong key or corrupted file")
        })
}

/// Encrypts a finished file in place through a temp file in the same directory.
pub fn seal_file(path: &Path, key: &EncryptionKey) -> Result<u64> {
    let plain = fs::read(path)?;
    let sealed = encrypt(&plain, key)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    write_atomically(dir, path, &sealed)?;
    Ok(sealed.len() as u64)
}

/// Writes `data` to `dest` via a synced temp file in `dir` followed by a rename.
pub fn write_atomically(dir: &Path, dest: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest)?;
    Ok(())
}

/// Reads a file and undoes encryption and compression, whichever were applied.
pub fn read_payload(path: &Path, key: Option<&EncryptionKey>) -> Result<Vec<u8>> {
    let raw = fs::read(path)?;
    let raw = if is_encrypted(&raw) {
        let key = key.ok_or_else(|| {
            DurabilityError::validation(format!(
                "{} is encrypted but no encryption key is configured",
                path.display()
            ))
        })?;
        decrypt(&raw, key)?
    } else {
        raw
    };

    if is_gzip(&raw) {
        let mut out = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| {
                DurabilityError::validation(format!(
                    "failed to decompress {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(out)
    } else {
        Ok(raw)
    }
}
