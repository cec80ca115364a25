use crate::crypto::key::KdfParams;
use crate::error::Result;
use crate::repo::Repository;
use crate::storage::BlobStore;

/// Initialize a new repository and return the opened handle.
pub fn run(
    store: Box<dyn BlobStore>,
    full_password: &str,
    write_password: &str,
) -> Result<Repository> {
    Repository::init(store, full_password, write_password, &KdfParams::default())
}
