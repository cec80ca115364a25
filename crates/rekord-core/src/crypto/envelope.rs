use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{RekordError, Result};

use super::{recipient_key, sender_key};

const ENVELOPE_MAGIC: &[u8; 4] = b"rkOB";
const ENVELOPE_VERSION: u8 = 1;

/// magic + version + type + reserved + ephemeral_pk + base nonce.
pub const HEADER_LEN: usize = 4 + 1 + 1 + 2 + 32 + 24;

const TAG_LEN: usize = 16;
const LEN_WORD: usize = 4;

/// Maximum plaintext carried by one frame.
const FRAME_SIZE: usize = 64 * 1024;

/// High bit of the frame length word marks end-of-stream.
const EOS_BIT: u32 = 1 << 31;

/// Per-frame associated data: type tag, repository ID, object ID, the
/// stored length word, and the previous frame's tag (zeros for frame 0).
/// Binding the tag chains frames; binding the length word authenticates
/// the end-of-stream marker against truncation.
fn frame_aad(
    type_tag: u8,
    repo_id: &[u8; 32],
    object_id: &[u8; 32],
    len_word: u32,
    prev_tag: &[u8; TAG_LEN],
) -> [u8; 85] {
    let mut aad = [0u8; 85];
    aad[0] = type_tag;
    aad[1..33].copy_from_slice(repo_id);
    aad[33..65].copy_from_slice(object_id);
    aad[65..69].copy_from_slice(&len_word.to_le_bytes());
    aad[69..85].copy_from_slice(prev_tag);
    aad
}

/// Per-frame nonce: the base nonce with the frame counter XORed into the
/// trailing 8 bytes, so every frame under one ephemeral key is distinct.
fn frame_nonce(base: &[u8; 24], counter: u64) -> [u8; 24] {
    let mut nonce = *base;
    let ctr = counter.to_le_bytes();
    for (n, c) in nonce[16..24].iter_mut().zip(ctr) {
        *n ^= c;
    }
    nonce
}

/// Exact sealed size for a payload of `payload_len` bytes, used to declare
/// the blob length to the store before producing it.
pub fn sealed_len(payload_len: usize) -> usize {
    let frames = payload_len.div_ceil(FRAME_SIZE).max(1);
    HEADER_LEN + payload_len + frames * (LEN_WORD + TAG_LEN)
}

/// Seal a payload into the envelope format using only the master public
/// key (sealed-box construction).
pub fn seal(
    type_tag: u8,
    repo_id: &[u8; 32],
    object_id: &[u8; 32],
    master_pk: &[u8; 32],
    payload: &[u8],
) -> Result<Vec<u8>> {
    let (ephemeral_pk, key) = sender_key(master_pk);
    let cipher = XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| RekordError::Other(format!("envelope cipher init: {e}")))?;

    let mut base_nonce = [0u8; 24];
    OsRng.fill_bytes(&mut base_nonce);

    let mut out = Vec::with_capacity(sealed_len(payload.len()));
    out.extend_from_slice(ENVELOPE_MAGIC);
    out.push(ENVELOPE_VERSION);
    out.push(type_tag);
    out.extend_from_slice(&[0u8; 2]);
    out.extend_from_slice(&ephemeral_pk);
    out.extend_from_slice(&base_nonce);

    let mut prev_tag = [0u8; TAG_LEN];
    let frames = payload.len().div_ceil(FRAME_SIZE).max(1);
    for (counter, frame) in split_frames(payload).enumerate() {
        let last = counter == frames - 1;
        let mut len_word = frame.len() as u32;
        if last {
            len_word |= EOS_BIT;
        }

        let aad = frame_aad(type_tag, repo_id, object_id, len_word, &prev_tag);
        let nonce = frame_nonce(&base_nonce, counter as u64);
        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: frame,
                    aad: &aad,
                },
            )
            .map_err(|e| RekordError::Other(format!("envelope encrypt: {e}")))?;

        prev_tag.copy_from_slice(&sealed[sealed.len() - TAG_LEN..]);
        out.extend_from_slice(&len_word.to_le_bytes());
        out.extend_from_slice(&sealed);
    }

    Ok(out)
}

/// Split a payload into frame-sized pieces; an empty payload still yields
/// one (empty) frame so every envelope carries an end-of-stream marker.
fn split_frames(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    let empty = payload.is_empty();
    payload
        .chunks(FRAME_SIZE)
        .chain(if empty { Some(&payload[..0]) } else { None })
}

/// Open an envelope with the master secret key. Returns the header's type
/// tag and the reassembled payload.
///
/// Frames are verified and decrypted one at a time, so a reader never
/// trusts bytes beyond the frame it has authenticated.
pub fn open(
    data: &[u8],
    repo_id: &[u8; 32],
    object_id: &[u8; 32],
    master_sk: &[u8; 32],
) -> Result<(u8, Vec<u8>)> {
    if data.len() < HEADER_LEN {
        return Err(RekordError::Corrupt("envelope shorter than header".into()));
    }
    if &data[..4] != ENVELOPE_MAGIC {
        return Err(RekordError::Corrupt("bad envelope magic".into()));
    }
    if data[4] != ENVELOPE_VERSION {
        return Err(RekordError::UnsupportedVersion(data[4]));
    }
    let type_tag = data[5];

    let mut ephemeral_pk = [0u8; 32];
    ephemeral_pk.copy_from_slice(&data[8..40]);
    let mut base_nonce = [0u8; 24];
    base_nonce.copy_from_slice(&data[40..64]);

    let key = recipient_key(master_sk, &ephemeral_pk);
    let cipher = XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|_| RekordError::AuthenticationFailed)?;

    let mut payload = Vec::new();
    let mut prev_tag = [0u8; TAG_LEN];
    let mut pos = HEADER_LEN;
    let mut counter = 0u64;
    loop {
        if data.len() - pos < LEN_WORD + TAG_LEN {
            return Err(RekordError::Corrupt("truncated envelope frame".into()));
        }
        let len_word = u32::from_le_bytes(data[pos..pos + LEN_WORD].try_into().unwrap());
        let last = len_word & EOS_BIT != 0;
        let frame_len = (len_word & !EOS_BIT) as usize;
        if frame_len > FRAME_SIZE {
            return Err(RekordError::Corrupt("oversized envelope frame".into()));
        }
        let body_start = pos + LEN_WORD;
        let body_end = body_start
            .checked_add(frame_len + TAG_LEN)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| RekordError::Corrupt("truncated envelope frame".into()))?;

        let aad = frame_aad(type_tag, repo_id, object_id, len_word, &prev_tag);
        let nonce = frame_nonce(&base_nonce, counter);
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &data[body_start..body_end],
                    aad: &aad,
                },
            )
            .map_err(|_| RekordError::AuthenticationFailed)?;
        payload.extend_from_slice(&plaintext);

        prev_tag.copy_from_slice(&data[body_end - TAG_LEN..body_end]);
        pos = body_end;
        counter += 1;

        if last {
            if pos != data.len() {
                return Err(RekordError::Corrupt("data after final frame".into()));
            }
            return Ok((type_tag, payload));
        }
    }
}
