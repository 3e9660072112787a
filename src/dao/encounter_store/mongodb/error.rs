use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB database `{database}` did not answer a ping")]
    Unreachable {
        database: String,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: String,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save encounter `{id}`")]
    SaveEncounter {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load the encounter snapshot")]
    LoadEncounter {
        #[source]
        source: MongoError,
    },
    #[error("failed to save player `{id}`")]
    SavePlayer {
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load player `{id}`")]
    LoadPlayer {
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("record `{key}` already exists in `{collection}`")]
    DuplicateKey {
        collection: String,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write to `{collection}`")]
    Insert {
        collection: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to read reward grants of `{player_id}`")]
    LoadGrants {
        player_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to claim reward grant `{player_id}:{encounter_id}`")]
    ClaimGrant {
        player_id: String,
        encounter_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("stored document in `{collection}` is malformed: {reason}")]
    Malformed {
        collection: String,
        reason: String,
    },
}
