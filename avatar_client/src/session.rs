//! Session context.
//!
//! One `Session` exists per participant for the lifetime of a connection. It
//! carries the local identity, the shared-store handle and the configuration,
//! and is cloned into every system that needs them.

use std::sync::Arc;

use avatar_shared::{
    config::SessionConfig, directory::PeerDirectory, net::PeerId, store::SharedStore,
};

#[derive(Clone)]
pub struct Session {
    directory: PeerDirectory,
    config: Arc<SessionConfig>,
}

impl Session {
    pub fn new(store: Arc<dyn SharedStore>, peer: PeerId, config: SessionConfig) -> Self {
        let directory =
            PeerDirectory::new(store, peer, config.state_ttl()).with_avatar_id(config.avatar_id);
        Self {
            directory,
            config: Arc::new(config),
        }
    }

    /// Identity of the local participant.
    pub fn peer(&self) -> &PeerId {
        self.directory.peer()
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
