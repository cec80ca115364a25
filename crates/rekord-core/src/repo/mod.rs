use std::io::Write;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use rekord_types::ObjectId;

use crate::compress;
use crate::crypto::envelope;
use crate::crypto::key::{self, KdfParams, MasterKey};
use crate::error::{RekordError, Result};
use crate::index::IndexCache;
use crate::object::{self, Object, ObjectType};
use crate::platform;
use crate::storage::{BlobStore, WriteOutcome};

const META_ID_KEY: &str = "meta/id";
const FULL_KEY_KEY: &str = "keys/full";
const WRITE_KEY_KEY: &str = "keys/write";
const TAGS_PREFIX: &str = "tags/";

/// Minimum hex characters accepted for a snapshot ID prefix.
const MIN_PREFIX_LEN: usize = 8;

/// Access mode of an opened repository.
///
/// `Secure` means no secrets have been unsealed yet; it only exists
/// transiently during init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskMode {
    Secure,
    WriteOnly,
    ReadWrite,
}

impl DiskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskMode::Secure => "Secure",
            DiskMode::WriteOnly => "WriteOnly",
            DiskMode::ReadWrite => "ReadWrite",
        }
    }
}

/// A handle to an opened repository: blob store, unsealed keys, and the
/// optional local index cache.
///
/// Shared immutably across pipeline workers; interior locking lives in the
/// store and cache.
pub struct Repository {
    store: Box<dyn BlobStore>,
    id: [u8; 32],
    mode: DiskMode,
    master_pk: [u8; 32],
    master_sk: Option<Zeroizing<[u8; 32]>>,
    id_key: [u8; 32],
    cache: Option<IndexCache>,
    threads: usize,
}

impl Repository {
    /// Initialize a new repository: master keypair, repository ID, the two
    /// password-wrapped key records, and the empty tag namespace.
    ///
    /// Returns an opened `ReadWrite` handle. On failure every blob written
    /// so far is deleted (best effort).
    pub fn init(
        store: Box<dyn BlobStore>,
        full_password: &str,
        write_password: &str,
        kdf: &KdfParams,
    ) -> Result<Self> {
        if store.test_slow(META_ID_KEY)? {
            return Err(RekordError::RepoAlreadyExists("repository".into()));
        }

        let master = MasterKey::generate();
        let mut repo_id = [0u8; 32];
        OsRng.fill_bytes(&mut repo_id);
        let id_key = key::derive_id_key(&master.public, &repo_id);

        let full_record = key::wrap_full(&master, full_password, kdf)?;
        let write_record = key::wrap_write(&master.public, &id_key, write_password, kdf)?;

        let mut written: Vec<&str> = Vec::new();
        let mut init_sequence = || -> Result<()> {
            write_blob(&*store, META_ID_KEY, &repo_id)?;
            written.push(META_ID_KEY);
            write_blob(&*store, FULL_KEY_KEY, &full_record)?;
            written.push(FULL_KEY_KEY);
            write_blob(&*store, WRITE_KEY_KEY, &write_record)?;
            written.push(WRITE_KEY_KEY);
            store.create_dir(TAGS_PREFIX)?;
            Ok(())
        };

        if let Err(e) = init_sequence() {
            for key_path in written {
                if let Err(cleanup_err) = store.delete(key_path) {
                    warn!("init rollback: failed to delete '{key_path}': {cleanup_err}");
                }
            }
            return Err(e);
        }

        debug!(id = %hex::encode(repo_id), "initialized repository");
        Ok(Self {
            store,
            id: repo_id,
            mode: DiskMode::ReadWrite,
            master_pk: master.public,
            master_sk: Some(Zeroizing::new(master.secret)),
            id_key,
            cache: None,
            threads: platform::default_threads(),
        })
    }

    /// Open an existing repository with a password.
    ///
    /// Tries the full wrapper first (`ReadWrite`), then the write-only
    /// wrapper (`WriteOnly`); if neither unseals, the password is wrong.
    pub fn open(store: Box<dyn BlobStore>, password: &str) -> Result<Self> {
        let repo_id = store
            .read(META_ID_KEY)?
            .ok_or_else(|| RekordError::RepoNotFound("missing meta/id".into()))?;
        let id: [u8; 32] = repo_id
            .as_slice()
            .try_into()
            .map_err(|_| RekordError::InvalidFormat("meta/id is not 32 bytes".into()))?;

        let full_record = store.read(FULL_KEY_KEY)?;
        if let Some(record) = &full_record {
            match key::unwrap_full(record, password) {
                Ok(master) => {
                    let id_key = key::derive_id_key(&master.public, &id);
                    debug!(mode = "ReadWrite", "opened repository");
                    return Ok(Self {
                        store,
                        id,
                        mode: DiskMode::ReadWrite,
                        master_pk: master.public,
                        master_sk: Some(Zeroizing::new(master.secret)),
                        id_key,
                        cache: None,
                        threads: platform::default_threads(),
                    });
                }
                Err(RekordError::AuthenticationFailed) => {}
                Err(e) => warn!("keys/full is unreadable: {e}"),
            }
        }

        let write_record = store.read(WRITE_KEY_KEY)?;
        if let Some(record) = &write_record {
            match key::unwrap_write(record, password) {
                Ok((master_pk, id_key)) => {
                    debug!(mode = "WriteOnly", "opened repository");
                    return Ok(Self {
                        store,
                        id,
                        mode: DiskMode::WriteOnly,
                        master_pk,
                        master_sk: None,
                        id_key,
                        cache: None,
                        threads: platform::default_threads(),
                    });
                }
                Err(RekordError::AuthenticationFailed) => {}
                Err(e) => warn!("keys/write is unreadable: {e}"),
            }
        }

        if full_record.is_none() && write_record.is_none() {
            return Err(RekordError::RepoNotFound("missing key records".into()));
        }
        Err(RekordError::AuthenticationFailed)
    }

    /// Attach the local index cache rooted at `cache_dir`.
    pub fn attach_index_cache(&mut self, cache_dir: &Path) -> Result<()> {
        self.cache = Some(IndexCache::open(cache_dir, &self.id)?);
        Ok(())
    }

    pub fn mode(&self) -> DiskMode {
        self.mode
    }

    pub fn id(&self) -> &[u8; 32] {
        &self.id
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn set_threads(&mut self, count: usize) {
        self.threads = count.max(1);
    }

    /// Compute the content address of an object.
    pub fn compute_id(&self, object: &Object) -> ObjectId {
        let encoded = object::encode(object);
        ObjectId::compute(&self.id_key, object.emit_type() as u8, &encoded)
    }

    /// Is this object present in the store? Consults the local cache, then
    /// the fast probe, then the authoritative check; positive answers are
    /// fed back into the cache.
    pub fn has_object(&self, id: &ObjectId) -> Result<bool> {
        match self.cache_contains(id) {
            Some(true) => return Ok(true),
            Some(false) | None => {}
        }

        let key = id.object_key();
        // test_fast allows false negatives but not false positives, so a
        // hit is trusted; only a miss needs the slow path.
        let present = self.store.test_fast(&key)? || self.store.test_slow(&key)?;
        if present {
            self.cache_insert(id);
        }
        Ok(present)
    }

    /// Cache probe; errors degrade to a miss (the cache is only a hint).
    fn cache_contains(&self, id: &ObjectId) -> Option<bool> {
        let cache = self.cache.as_ref()?;
        match cache.contains(id) {
            Ok(hit) => Some(hit),
            Err(e) => {
                warn!("index cache probe failed: {e}");
                None
            }
        }
    }

    /// Cache update; errors are logged, never propagated.
    fn cache_insert(&self, id: &ObjectId) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.insert(id) {
                warn!("index cache insert failed: {e}");
            }
        }
    }

    /// Store an object under its content address.
    ///
    /// Returns the ID and the number of bytes physically written (zero when
    /// the object was already present — the at-most-once-write guarantee is
    /// the cache, plus `AlreadyExists` tolerance at the store).
    pub fn store_object(&self, object: &Object) -> Result<(ObjectId, u64)> {
        if let Object::Chunk(data) = object {
            return self.store_chunk(data);
        }
        let encoded = object::encode(object);
        let type_tag = object.emit_type() as u8;
        let id = ObjectId::compute(&self.id_key, type_tag, &encoded);

        if self.has_object(&id)? {
            return Ok((id, 0));
        }

        let payload = compress::compress(&encoded)?;
        let sealed = envelope::seal(type_tag, &self.id, &id.0, &self.master_pk, &payload)?;

        let outcome = self.store.write(
            &id.object_key(),
            sealed.len() as u64,
            &mut |sink: &mut dyn Write| {
                sink.write_all(&sealed)?;
                Ok(())
            },
        )?;
        self.cache_insert(&id);
        Ok((id, outcome.bytes_written()))
    }

    /// Store a raw chunk without building an `Object` first (the chunk
    /// encoding is the identity, so the pipeline's hot path skips a copy).
    pub fn store_chunk(&self, data: &[u8]) -> Result<(ObjectId, u64)> {
        let type_tag = ObjectType::Chunk as u8;
        let id = ObjectId::compute(&self.id_key, type_tag, data);

        if self.has_object(&id)? {
            return Ok((id, 0));
        }

        let payload = compress::compress(data)?;
        let sealed = envelope::seal(type_tag, &self.id, &id.0, &self.master_pk, &payload)?;

        let outcome = self.store.write(
            &id.object_key(),
            sealed.len() as u64,
            &mut |sink: &mut dyn Write| {
                sink.write_all(&sealed)?;
                Ok(())
            },
        )?;
        self.cache_insert(&id);
        Ok((id, outcome.bytes_written()))
    }

    /// Read and decrypt an object. Requires the full key.
    ///
    /// The envelope authenticates the object's type and ID, so a blob
    /// swapped to a different key fails decryption rather than decoding.
    pub fn read_object(&self, id: &ObjectId) -> Result<Object> {
        let master_sk = self.master_sk.as_ref().ok_or(RekordError::WriteOnly)?;

        let sealed = self
            .store
            .read(&id.object_key())?
            .ok_or_else(|| RekordError::ObjectNotFound(id.to_hex()))?;

        let (type_tag, payload) = envelope::open(&sealed, &self.id, &id.0, master_sk)?;
        let object_type = ObjectType::from_u8(type_tag)?;
        let encoded = compress::decompress(&payload)?;
        object::decode(object_type, &encoded)
    }

    /// Assert that an ID names a snapshot root by writing its tag: a
    /// zero-length blob at `tags/<hex>`. Idempotent.
    pub fn write_tag(&self, id: &ObjectId) -> Result<()> {
        let outcome = self.store.write(&id.tag_key(), 0, &mut |_| Ok(()))?;
        if outcome == WriteOutcome::AlreadyExists {
            debug!(id = %id, "tag already present");
        }
        Ok(())
    }

    /// List all snapshot root IDs recorded in the tag namespace.
    pub fn list_tags(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for key in self.store.list(TAGS_PREFIX)? {
            let hex_part = key.rsplit('/').next().unwrap_or(&key);
            match ObjectId::from_hex(hex_part) {
                Ok(id) => ids.push(id),
                Err(_) => warn!("ignoring malformed tag '{key}'"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Resolve a user-supplied snapshot reference: a full 64-character hex
    /// ID, or a unique tag prefix of at least 8 hex characters.
    pub fn resolve_id(&self, reference: &str) -> Result<ObjectId> {
        let reference = reference.trim();
        if reference.len() == 64 {
            return ObjectId::from_hex(reference)
                .map_err(|_| RekordError::InvalidId(reference.into()));
        }
        if reference.len() < MIN_PREFIX_LEN
            || reference.len() > 64
            || !reference.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(RekordError::InvalidId(reference.into()));
        }

        let prefix = reference.to_ascii_lowercase();
        let matches: Vec<ObjectId> = self
            .list_tags()?
            .into_iter()
            .filter(|id| id.to_hex().starts_with(&prefix))
            .collect();
        match matches.len() {
            0 => Err(RekordError::ObjectNotFound(reference.into())),
            1 => Ok(matches[0]),
            _ => Err(RekordError::AmbiguousId(reference.into())),
        }
    }

    /// Flush buffered index-cache inserts (called when a pipeline drains).
    pub fn flush_index_cache(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.flush()?;
        }
        Ok(())
    }
}

/// Write a small metadata blob in full (init-time records).
fn write_blob(store: &dyn BlobStore, key: &str, data: &[u8]) -> Result<()> {
    let outcome = store.write(key, data.len() as u64, &mut |sink: &mut dyn Write| {
        sink.write_all(data)?;
        Ok(())
    })?;
    if outcome == WriteOutcome::AlreadyExists {
        return Err(RekordError::RepoAlreadyExists(key.into()));
    }
    Ok(())
}
