//! Settings, connection and index setup of the MongoDB backend.
//!
//! Connecting makes a single bounded attempt; retries and backoff belong to the storage
//! supervisor.

use std::time::Duration;

use mongodb::{Client, Database, IndexModel, bson::doc, options::ClientOptions, options::IndexOptions};
use tracing::{debug, info};

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE_NAME: &str = "world_boss";
const APP_NAME: &str = "world-boss-back";
const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Collection names, optionally prefixed so several deployments can share one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    /// Holds the single current-encounter snapshot.
    pub encounters: String,
    /// Player progress documents.
    pub players: String,
    /// Append-only reward grants keyed by `player:encounter`.
    pub grants: String,
    /// One entry per killed boss.
    pub history: String,
}

impl Collections {
    /// `{prefix}_{name}` when a non-empty prefix is given.
    pub fn with_prefix(prefix: Option<&str>) -> Self {
        let name = |base: &str| match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}_{base}"),
            _ => base.to_owned(),
        };
        Self {
            encounters: name("encounters"),
            players: name("players"),
            grants: name("reward_grants"),
            history: name("encounter_history"),
        }
    }
}

/// Where and how to reach MongoDB.
#[derive(Debug, Clone)]
pub struct MongoSettings {
    /// Connection string, `MONGO_URI`.
    pub uri: String,
    /// Defaults to `world_boss`.
    pub database_name: String,
    pub collections: Collections,
    /// Upper bound on one connection attempt.
    pub server_selection_timeout: Duration,
}

impl MongoSettings {
    /// Read `MONGO_URI` (required), `MONGO_DB`, `MONGO_COLLECTION_PREFIX` and
    /// `MONGO_CONNECT_TIMEOUT_MS` from the process environment.
    pub fn from_env() -> MongoResult<Self> {
        Self::from_vars(|var| std::env::var(var).ok())
    }

    /// Same as [`MongoSettings::from_env`] with an injectable variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> MongoResult<Self> {
        let uri = lookup("MONGO_URI")
            .filter(|uri| !uri.trim().is_empty())
            .ok_or(MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let server_selection_timeout = lookup("MONGO_CONNECT_TIMEOUT_MS")
            .and_then(|raw| raw.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT);

        Ok(Self {
            uri,
            database_name: lookup("MONGO_DB").unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_owned()),
            collections: Collections::with_prefix(lookup("MONGO_COLLECTION_PREFIX").as_deref()),
            server_selection_timeout,
        })
    }

    async fn client_options(&self) -> MongoResult<ClientOptions> {
        let mut options =
            ClientOptions::parse(&self.uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: self.uri.clone(),
                    source,
                })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());
        options.server_selection_timeout = Some(self.server_selection_timeout);
        Ok(options)
    }
}

/// Build a client and check that the server answers a ping.
pub async fn open_database(settings: &MongoSettings) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(settings.client_options().await?)
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&settings.database_name);

    database
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|source| MongoDaoError::Unreachable {
            database: settings.database_name.clone(),
            source,
        })?;
    debug!(database = %settings.database_name, "mongo ping answered");

    Ok((client, database))
}

/// Indexes the store relies on. Creating an existing index is a no-op.
///
/// The unique owner index backs the one-grant-per-(player, encounter) rule independently of
/// the document key.
pub async fn ensure_indexes(database: &Database, collections: &Collections) -> MongoResult<()> {
    let grant_indexes = [
        (
            "grant_owner_unique",
            IndexModel::builder()
                .keys(doc! { "player_id": 1, "encounter_id": 1 })
                .options(
                    IndexOptions::builder()
                        .name(Some("grant_owner_unique".to_owned()))
                        .unique(Some(true))
                        .build(),
                )
                .build(),
        ),
        (
            "grant_player_recent",
            IndexModel::builder()
                .keys(doc! { "player_id": 1, "created_at": -1 })
                .options(
                    IndexOptions::builder()
                        .name(Some("grant_player_recent".to_owned()))
                        .build(),
                )
                .build(),
        ),
    ];

    let grants = database.collection::<mongodb::bson::Document>(&collections.grants);
    for (name, index) in grant_indexes {
        grants
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: collections.grants.clone(),
                index: name,
                source,
            })?;
    }

    let history_index = IndexModel::builder()
        .keys(doc! { "killed_at": -1 })
        .options(
            IndexOptions::builder()
                .name(Some("history_recent".to_owned()))
                .build(),
        )
        .build();
    database
        .collection::<mongodb::bson::Document>(&collections.history)
        .create_index(history_index)
        .await
        .map_err(|source| MongoDaoError::EnsureIndex {
            collection: collections.history.clone(),
            index: "history_recent",
            source,
        })?;

    info!(grants = %collections.grants, history = %collections.history, "mongo indexes ready");
    Ok(())
}
