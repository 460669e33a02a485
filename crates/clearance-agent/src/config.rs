//! Agent configuration.

use std::time::Duration;

use clearance_exchange::{HandshakeConfig, RouterConfig};

/// Configuration for an [`crate::Agent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Handshake timing and the credential type to request.
    pub handshake: HandshakeConfig,
    /// Inbound router polling and auto-respond behavior.
    pub router: RouterConfig,
    /// Encrypt to the newest cached peer credential instead of running a
    /// handshake before every classified send.
    ///
    /// Off by default: a cached credential may publish a key the peer has
    /// since rotated away from.
    pub reuse_cached_peer_credentials: bool,
    /// How long [`crate::Agent::await_presentation`] waits.
    pub presentation_wait: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            router: RouterConfig::default(),
            reuse_cached_peer_credentials: false,
            presentation_wait: Duration::from_secs(15),
        }
    }
}
