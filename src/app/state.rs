//! Shared handles injected into lobbies and sessions

use std::sync::Arc;

use crate::config::Config;
use crate::store::{EventFeed, Heartbeat, MatchQueue, MemoryBackend, RoomDirectory};
use crate::util::time::{Clock, SystemClock};

/// Collaborators a multiplayer session talks to
#[derive(Clone)]
pub struct Backend {
    pub rooms: Arc<dyn RoomDirectory>,
    pub feed: Arc<dyn EventFeed>,
    pub heartbeat: Arc<dyn Heartbeat>,
    pub queue: Arc<dyn MatchQueue>,
    pub clock: Arc<dyn Clock>,
}

impl Backend {
    /// Every collaborator served by one in-process store
    pub fn from_memory(memory: Arc<MemoryBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: memory.clone(),
            feed: memory.clone(),
            heartbeat: memory.clone(),
            queue: memory,
            clock,
        }
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> (Self, Arc<MemoryBackend>) {
        let memory = Arc::new(MemoryBackend::new(clock.clone()));
        (Self::from_memory(memory.clone(), clock), memory)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Backend,
    pub memory: Arc<MemoryBackend>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Local runs keep every room and feed in this process
        let (backend, memory) = Backend::in_memory(Arc::new(SystemClock));

        Self {
            config,
            backend,
            memory,
        }
    }
}
