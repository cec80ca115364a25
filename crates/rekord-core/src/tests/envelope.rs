use crate::crypto::envelope::{open, seal, sealed_len};
use crate::crypto::key::MasterKey;
use crate::error::RekordError;
use crate::testutil::pseudo_random;

const TYPE_TAG: u8 = 0;

fn fixtures() -> (MasterKey, [u8; 32], [u8; 32]) {
    let master = MasterKey::generate();
    let repo_id = [0x11; 32];
    let object_id = [0x22; 32];
    (master, repo_id, object_id)
}

#[test]
fn roundtrip_small_payload() {
    let (master, repo_id, object_id) = fixtures();
    let payload = b"six bytes payload";

    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, payload).unwrap();
    assert_eq!(sealed.len(), sealed_len(payload.len()));

    let (type_tag, opened) = open(&sealed, &repo_id, &object_id, &master.secret).unwrap();
    assert_eq!(type_tag, TYPE_TAG);
    assert_eq!(opened, payload);
}

#[test]
fn roundtrip_empty_payload() {
    let (master, repo_id, object_id) = fixtures();
    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"").unwrap();
    assert_eq!(sealed.len(), sealed_len(0));
    let (_, opened) = open(&sealed, &repo_id, &object_id, &master.secret).unwrap();
    assert!(opened.is_empty());
}

#[test]
fn roundtrip_multi_frame_payload() {
    let (master, repo_id, object_id) = fixtures();
    // Three full frames plus a partial one.
    let payload = pseudo_random(9, 3 * 64 * 1024 + 1000);

    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, &payload).unwrap();
    assert_eq!(sealed.len(), sealed_len(payload.len()));

    let (_, opened) = open(&sealed, &repo_id, &object_id, &master.secret).unwrap();
    assert_eq!(opened, payload);
}

#[test]
fn roundtrip_exact_frame_boundary() {
    let (master, repo_id, object_id) = fixtures();
    let payload = pseudo_random(10, 2 * 64 * 1024);
    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, &payload).unwrap();
    let (_, opened) = open(&sealed, &repo_id, &object_id, &master.secret).unwrap();
    assert_eq!(opened, payload);
}

#[test]
fn encryption_is_nondeterministic() {
    let (master, repo_id, object_id) = fixtures();
    let a = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"data").unwrap();
    let b = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"data").unwrap();
    assert_ne!(a, b, "fresh ephemeral key and nonce per write");
}

#[test]
fn any_bit_flip_is_detected() {
    let (master, repo_id, object_id) = fixtures();
    let payload = pseudo_random(11, 80 * 1024);
    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, &payload).unwrap();

    // Flip one bit at a spread of positions across header and both frames.
    for position in [0, 5, 8, 45, 70, 1000, 64 * 1024 + 100, sealed.len() - 1] {
        let mut tampered = sealed.clone();
        tampered[position] ^= 0x01;
        let result = open(&tampered, &repo_id, &object_id, &master.secret);
        assert!(
            matches!(
                result,
                Err(RekordError::AuthenticationFailed)
                    | Err(RekordError::Corrupt(_))
                    | Err(RekordError::UnsupportedVersion(_))
            ),
            "bit flip at {position} was not detected"
        );
    }
}

#[test]
fn truncating_final_frame_is_detected() {
    let (master, repo_id, object_id) = fixtures();
    let payload = pseudo_random(12, 100 * 1024);
    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, &payload).unwrap();

    // Drop the last frame entirely: the stream now ends without an
    // end-of-stream bit (first frame is a full 64 KiB, so its length word
    // has no EOS marker).
    let first_frame_end = crate::crypto::envelope::HEADER_LEN + 4 + 64 * 1024 + 16;
    let result = open(
        &sealed[..first_frame_end],
        &repo_id,
        &object_id,
        &master.secret,
    );
    assert!(matches!(result, Err(RekordError::Corrupt(_))));
}

#[test]
fn wrong_object_id_fails_authentication() {
    let (master, repo_id, object_id) = fixtures();
    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"data").unwrap();
    let other_id = [0x33; 32];
    assert!(matches!(
        open(&sealed, &repo_id, &other_id, &master.secret),
        Err(RekordError::AuthenticationFailed)
    ));
}

#[test]
fn wrong_repo_id_fails_authentication() {
    let (master, repo_id, object_id) = fixtures();
    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"data").unwrap();
    let other_repo = [0x44; 32];
    assert!(matches!(
        open(&sealed, &other_repo, &object_id, &master.secret),
        Err(RekordError::AuthenticationFailed)
    ));
}

#[test]
fn wrong_secret_key_fails_authentication() {
    let (master, repo_id, object_id) = fixtures();
    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"data").unwrap();
    let other = MasterKey::generate();
    assert!(matches!(
        open(&sealed, &repo_id, &object_id, &other.secret),
        Err(RekordError::AuthenticationFailed)
    ));
}

#[test]
fn type_tag_is_authenticated() {
    let (master, repo_id, object_id) = fixtures();
    let sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"data").unwrap();
    // Rewriting the header's type byte must break the frame AAD.
    let mut tampered = sealed.clone();
    tampered[5] = 1;
    assert!(matches!(
        open(&tampered, &repo_id, &object_id, &master.secret),
        Err(RekordError::AuthenticationFailed)
    ));
}

#[test]
fn bad_magic_is_corrupt() {
    let (master, repo_id, object_id) = fixtures();
    let mut sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"data").unwrap();
    sealed[0] = b'X';
    assert!(matches!(
        open(&sealed, &repo_id, &object_id, &master.secret),
        Err(RekordError::Corrupt(_))
    ));
}

#[test]
fn unsupported_version_is_reported() {
    let (master, repo_id, object_id) = fixtures();
    let mut sealed = seal(TYPE_TAG, &repo_id, &object_id, &master.public, b"data").unwrap();
    sealed[4] = 99;
    assert!(matches!(
        open(&sealed, &repo_id, &object_id, &master.secret),
        Err(RekordError::UnsupportedVersion(99))
    ));
}
