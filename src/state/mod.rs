pub mod claims;
pub mod dampening;
pub mod encounter;
mod events;
pub mod participation;
pub mod player;
pub mod rewards;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::encounter_store::EncounterStore,
    error::ServiceError,
    services::coordinator::{self, CoordinatorHandle, CoordinatorInbox},
    state::{claims::ClaimLocks, player::PlayerSlot},
};

pub use self::events::EventHub;

pub type SharedState = Arc<AppState>;

/// Capacity of the public event channel. Health ticks fire four times a second.
const PUBLIC_EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
/// Handle used to push messages to a connected player session.
pub struct PlayerConnection {
    /// Distinguishes reconnects of the same player.
    pub session_id: Uuid,
    pub player_id: String,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state: store slot, live sessions, player profiles, claim locks and
/// the handle to the encounter coordinator.
pub struct AppState {
    config: Arc<AppConfig>,
    encounter_store: RwLock<Option<Arc<dyn EncounterStore>>>,
    public_events: EventHub,
    sessions: DashMap<String, PlayerConnection>,
    players: DashMap<String, PlayerSlot>,
    claims: ClaimLocks,
    coordinator: CoordinatorHandle,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct the shared state and the inbox the coordinator task will drain.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> (SharedState, CoordinatorInbox) {
        let (degraded_tx, _rx) = watch::channel(true);
        let (coordinator, inbox) = coordinator::channel(config.runtime.command_queue);
        let state = Arc::new(Self {
            config: Arc::new(config),
            encounter_store: RwLock::new(None),
            public_events: EventHub::new(PUBLIC_EVENT_CAPACITY),
            sessions: DashMap::new(),
            players: DashMap::new(),
            claims: ClaimLocks::new(),
            coordinator,
            degraded: degraded_tx,
        });
        (state, inbox)
    }

    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn encounter_store(&self) -> Option<Arc<dyn EncounterStore>> {
        let guard = self.encounter_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store or [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn EncounterStore>, ServiceError> {
        self.encounter_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn set_encounter_store(&self, store: Arc<dyn EncounterStore>) {
        {
            let mut guard = self.encounter_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_encounter_store(&self) {
        {
            let mut guard = self.encounter_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Hub behind the public SSE stream.
    pub fn public_events(&self) -> &EventHub {
        &self.public_events
    }

    /// Live player sessions keyed by player id. A reconnect replaces the previous entry.
    pub fn sessions(&self) -> &DashMap<String, PlayerConnection> {
        &self.sessions
    }

    /// In-memory player profiles keyed by player id.
    pub fn players(&self) -> &DashMap<String, PlayerSlot> {
        &self.players
    }

    pub fn claims(&self) -> &ClaimLocks {
        &self.claims
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }
}
