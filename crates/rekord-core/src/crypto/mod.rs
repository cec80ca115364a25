pub mod envelope;
pub mod key;

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

/// Derive the symmetric envelope key from an X25519 shared secret.
///
/// Both public halves are mixed in so the key binds the specific
/// (ephemeral, master) pair that produced the agreement.
fn derive_envelope_key(shared: &[u8; 32], ephemeral_pk: &[u8; 32], master_pk: &[u8; 32]) -> [u8; 32] {
    let mut material = [0u8; 96];
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral_pk);
    material[64..].copy_from_slice(master_pk);
    blake3::derive_key("rekord v1 envelope key", &material)
}

/// Sender side of the sealed box: generate a fresh ephemeral keypair, agree
/// with the master public key, and derive the symmetric key.
///
/// Only the public key is needed, which is what makes write-only backup
/// sessions possible.
pub(crate) fn sender_key(master_pk: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pk = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*master_pk));
    let key = derive_envelope_key(shared.as_bytes(), ephemeral_pk.as_bytes(), master_pk);
    (*ephemeral_pk.as_bytes(), key)
}

/// Recipient side of the sealed box: recompute the symmetric key from the
/// master secret key and the ephemeral public key shipped in the header.
pub(crate) fn recipient_key(master_sk: &[u8; 32], ephemeral_pk: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*master_sk);
    let master_pk = PublicKey::from(&secret);
    let shared = secret.diffie_hellman(&PublicKey::from(*ephemeral_pk));
    derive_envelope_key(shared.as_bytes(), ephemeral_pk, master_pk.as_bytes())
}
