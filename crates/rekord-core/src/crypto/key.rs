use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{RekordError, Result};

const KEY_MAGIC: &[u8; 4] = b"rkKY";
const KEY_VERSION: u8 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
/// magic + version + class + salt + packed KDF params.
const HEADER_LEN: usize = 4 + 1 + 1 + SALT_LEN + 16;

const KDF_ALGO_ARGON2ID: u32 = 1;

// KDF parameter bounds to reject maliciously crafted key records.
const MAX_OPS: u32 = 10;
const MAX_MEMORY_KIB: u32 = 524_288; // 512 MiB
const MAX_PARALLELISM: u32 = 16;

/// Access class of a wrapped-key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyClass {
    Full = 0,
    Write = 1,
}

/// The master X25519 keypair. The secret half never touches disk in
/// plaintext and is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    pub secret: [u8; 32],
    #[zeroize(skip)]
    pub public: [u8; 32],
}

impl MasterKey {
    /// Generate a new random master keypair using OS entropy.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret: secret.to_bytes(),
            public: *public.as_bytes(),
        }
    }

    /// Rebuild the keypair from the secret half (the full wrapper stores
    /// only the secret key; the public key is derived).
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let sk = StaticSecret::from(secret);
        let public = *PublicKey::from(&sk).as_bytes();
        Self { secret, public }
    }
}

/// Derive the repository's object-ID key from the master public key and
/// repository ID. This is the auxiliary key carried verbatim inside the
/// write-only wrapper; full-access sessions recompute it.
pub fn derive_id_key(master_pk: &[u8; 32], repo_id: &[u8; 32]) -> [u8; 32] {
    let mut material = [0u8; 64];
    material[..32].copy_from_slice(master_pk);
    material[32..].copy_from_slice(repo_id);
    blake3::derive_key("rekord v1 object id", &material)
}

/// Argon2id tuning, stored packed alongside each wrapped key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub ops: u32,
    pub mem_kib: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            ops: 2,
            mem_kib: 262_144, // 256 MiB
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests only.
    #[cfg(test)]
    pub(crate) fn insecure_for_tests() -> Self {
        Self {
            ops: 1,
            mem_kib: 8192,
            parallelism: 1,
        }
    }
}

/// Validate KDF parameters are within safe bounds before running the KDF.
fn validate_kdf_params(algo: u32, params: &KdfParams) -> Result<()> {
    if algo != KDF_ALGO_ARGON2ID {
        return Err(RekordError::AuthenticationFailed);
    }
    if params.ops == 0 || params.ops > MAX_OPS {
        return Err(RekordError::AuthenticationFailed);
    }
    if params.mem_kib == 0 || params.mem_kib > MAX_MEMORY_KIB {
        return Err(RekordError::AuthenticationFailed);
    }
    if params.parallelism == 0 || params.parallelism > MAX_PARALLELISM {
        return Err(RekordError::AuthenticationFailed);
    }
    Ok(())
}

/// Derive the 32-byte wrapping key from a password using Argon2id.
fn derive_wrapping_key(
    password: &str,
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>> {
    let argon_params = argon2::Params::new(params.mem_kib, params.ops, params.parallelism, Some(32))
        .map_err(|e| RekordError::Config(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, output.as_mut())
        .map_err(|e| RekordError::Config(format!("argon2 hash: {e}")))?;
    Ok(output)
}

/// Assemble the fixed record header, which is also the AEAD associated
/// data (binds class and KDF tuning against substitution).
fn record_header(class: KeyClass, salt: &[u8; SALT_LEN], params: &KdfParams) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(KEY_MAGIC);
    header[4] = KEY_VERSION;
    header[5] = class as u8;
    header[6..6 + SALT_LEN].copy_from_slice(salt);
    let params_off = 6 + SALT_LEN;
    header[params_off..params_off + 4].copy_from_slice(&KDF_ALGO_ARGON2ID.to_le_bytes());
    header[params_off + 4..params_off + 8].copy_from_slice(&params.ops.to_le_bytes());
    header[params_off + 8..params_off + 12].copy_from_slice(&params.mem_kib.to_le_bytes());
    header[params_off + 12..params_off + 16].copy_from_slice(&params.parallelism.to_le_bytes());
    header
}

/// Seal a key payload into an on-disk wrapped-key record.
fn seal_record(
    class: KeyClass,
    payload: &[u8],
    password: &str,
    params: &KdfParams,
) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let wrapping_key = derive_wrapping_key(password, &salt, params)?;
    let header = record_header(class, &salt, params);

    let cipher = XChaCha20Poly1305::new_from_slice(wrapping_key.as_ref())
        .map_err(|e| RekordError::Other(format!("cipher init: {e}")))?;
    let sealed = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: payload,
                aad: &header,
            },
        )
        .map_err(|e| RekordError::Other(format!("key wrap: {e}")))?;

    let mut record = Vec::with_capacity(HEADER_LEN + NONCE_LEN + sealed.len());
    record.extend_from_slice(&header);
    record.extend_from_slice(&nonce);
    record.extend_from_slice(&sealed);
    Ok(record)
}

/// Open an on-disk wrapped-key record. Returns the sealed payload.
///
/// A structurally invalid record is `Corrupt`; a MAC failure (wrong
/// password or tampering) is `AuthenticationFailed`.
fn open_record(data: &[u8], expected_class: KeyClass, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
        return Err(RekordError::Corrupt("wrapped key record too short".into()));
    }
    if &data[..4] != KEY_MAGIC {
        return Err(RekordError::Corrupt("bad wrapped key magic".into()));
    }
    if data[4] != KEY_VERSION {
        return Err(RekordError::UnsupportedVersion(data[4]));
    }
    if data[5] != expected_class as u8 {
        return Err(RekordError::Corrupt("wrapped key class mismatch".into()));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&data[6..6 + SALT_LEN]);
    let params_off = 6 + SALT_LEN;
    let word = |i: usize| {
        u32::from_le_bytes(
            data[params_off + i * 4..params_off + i * 4 + 4]
                .try_into()
                .unwrap(),
        )
    };
    let algo = word(0);
    let params = KdfParams {
        ops: word(1),
        mem_kib: word(2),
        parallelism: word(3),
    };
    validate_kdf_params(algo, &params)?;

    let wrapping_key = derive_wrapping_key(password, &salt, &params)?;
    let header = &data[..HEADER_LEN];
    let nonce = &data[HEADER_LEN..HEADER_LEN + NONCE_LEN];
    let sealed = &data[HEADER_LEN + NONCE_LEN..];

    let cipher = XChaCha20Poly1305::new_from_slice(wrapping_key.as_ref())
        .map_err(|_| RekordError::AuthenticationFailed)?;
    let payload = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: header,
            },
        )
        .map_err(|_| RekordError::AuthenticationFailed)?;
    Ok(Zeroizing::new(payload))
}

/// Wrap the master secret key with the full-access password.
pub fn wrap_full(master: &MasterKey, password: &str, params: &KdfParams) -> Result<Vec<u8>> {
    seal_record(KeyClass::Full, &master.secret, password, params)
}

/// Wrap the master public key and object-ID key with the write-only
/// password. The master secret key is deliberately absent.
pub fn wrap_write(
    master_pk: &[u8; 32],
    id_key: &[u8; 32],
    password: &str,
    params: &KdfParams,
) -> Result<Vec<u8>> {
    let mut payload = Zeroizing::new([0u8; 64]);
    payload[..32].copy_from_slice(master_pk);
    payload[32..].copy_from_slice(id_key);
    seal_record(KeyClass::Write, payload.as_ref(), password, params)
}

/// Unwrap the full-access record into the master keypair.
pub fn unwrap_full(data: &[u8], password: &str) -> Result<MasterKey> {
    let payload = open_record(data, KeyClass::Full, password)?;
    if payload.len() != 32 {
        return Err(RekordError::Corrupt("full key payload length".into()));
    }
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&payload);
    Ok(MasterKey::from_secret(secret))
}

/// Unwrap the write-only record into `(master_pk, id_key)`.
pub fn unwrap_write(data: &[u8], password: &str) -> Result<([u8; 32], [u8; 32])> {
    let payload = open_record(data, KeyClass::Write, password)?;
    if payload.len() != 64 {
        return Err(RekordError::Corrupt("write key payload length".into()));
    }
    let mut master_pk = [0u8; 32];
    let mut id_key = [0u8; 32];
    master_pk.copy_from_slice(&payload[..32]);
    id_key.copy_from_slice(&payload[32..]);
    Ok((master_pk, id_key))
}
