use std::fmt;

/// A 32-byte object identifier computed as keyed BLAKE3 over the object's
/// type tag and canonical plaintext encoding.
///
/// Two objects with the same type and plaintext share an ID; this is the
/// deduplication key. IDs are rendered as lowercase hex and parsed
/// case-insensitively.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub [u8; 32]);

impl ObjectId {
    /// Compute an object ID using keyed BLAKE3 over `type_tag || payload`.
    ///
    /// The key is repository-specific, so IDs act as a MAC over plaintext:
    /// they cannot be computed (or verified) without opening the repository.
    pub fn compute(key: &[u8; 32], type_tag: u8, payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_keyed(key);
        hasher.update(&[type_tag]);
        hasher.update(payload);
        ObjectId(*hasher.finalize().as_bytes())
    }

    /// Hex-encode the full ID (64 lowercase characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse an ObjectId from a 64-character hex string (any case).
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(ObjectId(arr))
    }

    /// First byte as a two-char hex string, used for shard directories.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Storage key path: `objects/<aa>/<full-hex>`.
    pub fn object_key(&self) -> String {
        format!("objects/{}/{}", self.shard_prefix(), self.to_hex())
    }

    /// Tag key path: `tags/<full-hex>`.
    pub fn tag_key(&self) -> String {
        format!("tags/{}", self.to_hex())
    }

    /// Raw bytes for use as AAD context.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_id_key() -> [u8; 32] {
        [0xAA; 32]
    }

    #[test]
    fn compute_deterministic() {
        let key = test_id_key();
        let id1 = ObjectId::compute(&key, 0, b"hello world");
        let id2 = ObjectId::compute(&key, 0, b"hello world");
        assert_eq!(id1, id2);
    }

    #[test]
    fn compute_type_tag_separates() {
        let key = test_id_key();
        let chunk = ObjectId::compute(&key, 0, b"same payload");
        let file = ObjectId::compute(&key, 1, b"same payload");
        assert_ne!(chunk, file);
    }

    #[test]
    fn compute_different_key_different_id() {
        let data = b"same data";
        let id1 = ObjectId::compute(&[0xAA; 32], 0, data);
        let id2 = ObjectId::compute(&[0xBB; 32], 0, data);
        assert_ne!(id1, id2);
    }

    #[test]
    fn hex_roundtrip_case_insensitive() {
        let id = ObjectId::compute(&test_id_key(), 0, b"roundtrip");
        let lower = id.to_hex();
        assert_eq!(lower, lower.to_lowercase());
        let upper = lower.to_uppercase();
        assert_eq!(ObjectId::from_hex(&lower).unwrap(), id);
        assert_eq!(ObjectId::from_hex(&upper).unwrap(), id);
    }

    #[test]
    fn from_hex_rejects_bad_lengths() {
        assert!(ObjectId::from_hex("abcd").is_err());
        assert!(ObjectId::from_hex(&"ab".repeat(33)).is_err());
        assert!(ObjectId::from_hex("not hex at all").is_err());
    }

    #[test]
    fn object_key_is_sharded() {
        let id = ObjectId([0xAB; 32]);
        let key = id.object_key();
        assert!(key.starts_with("objects/ab/abab"));
        assert_eq!(id.tag_key(), format!("tags/{}", id.to_hex()));
    }
}
