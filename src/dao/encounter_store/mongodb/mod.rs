mod bootstrap;
mod error;
mod models;
pub mod store;

pub use bootstrap::{Collections, MongoSettings};
pub use error::MongoDaoError;
pub use store::MongoEncounterStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::DuplicateKey { collection, key, .. } => {
                StorageError::conflict(collection, key)
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
