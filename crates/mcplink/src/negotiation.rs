//! Handshake state and capability checks.
//!
//! Every session walks `Uninitialized -> Negotiating -> Ready -> Closed`.
//! The client moves to `Negotiating` when it sends `initialize` and to
//! `Ready` once it has the result and has sent `notifications/initialized`.
//! The server moves to `Negotiating` when it answers `initialize` and to
//! `Ready` when `notifications/initialized` arrives.

use std::{fmt, sync::RwLock};

use tokio::sync::watch;

use crate::{
    error::{Error, Result},
    schema::{Capabilities, Capability, Implementation, SUPPORTED_PROTOCOL_VERSIONS, methods},
};

/// Lifecycle of a session. Only handshake traffic passes before `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Attached, no `initialize` exchanged yet.
    Uninitialized,
    /// `initialize` sent or received, waiting for `initialized`.
    Negotiating,
    /// Handshake complete; all methods allowed.
    Ready,
    /// Terminated. Final.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Negotiating => "negotiating",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What the handshake told us about the other side.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    /// Name and version the peer reported.
    pub implementation: Implementation,
    /// Capabilities the peer declared.
    pub capabilities: Capabilities,
    /// Protocol version agreed for the session.
    pub protocol_version: String,
}

/// Pick the protocol version a server answers with: the client's if we speak
/// it, our newest otherwise.
pub fn negotiate_protocol_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

/// Lifecycle state plus the capability sets on both ends of one session.
pub struct Negotiation {
    state: watch::Sender<SessionState>,
    local: RwLock<Capabilities>,
    peer: RwLock<Option<PeerInfo>>,
}

impl Negotiation {
    pub fn new(local: Capabilities) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            state,
            local: RwLock::new(local),
            peer: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `next` if the transition is legal. `Closed` is reachable from
    /// everywhere and is final.
    pub fn transition(&self, next: SessionState) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            use SessionState::*;
            let legal = matches!(
                (*current, next),
                (Uninitialized, Negotiating) | (Negotiating, Ready) | (Uninitialized | Negotiating | Ready, Closed)
            );
            if legal {
                tracing::debug!("Session state {} -> {}", current, next);
                *current = next;
                true
            } else {
                if *current != next {
                    outcome = Err(Error::InvalidRequest(format!(
                        "illegal session transition {current} -> {next}"
                    )));
                }
                false
            }
        });
        outcome
    }

    /// Resolve once the session reaches `Ready` (or fail once it closes).
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, SessionState::Ready | SessionState::Closed))
            .await
            .map_err(|_| Error::SessionClosed)?;
        match *state {
            SessionState::Ready => Ok(()),
            _ => Err(Error::SessionClosed),
        }
    }

    /// Gate an outbound or inbound message on the lifecycle.
    pub fn check_method(&self, method: &str) -> Result<()> {
        match self.state() {
            SessionState::Closed => Err(Error::SessionClosed),
            SessionState::Ready => Ok(()),
            _ if methods::allowed_before_ready(method) => Ok(()),
            state => Err(Error::NotInitialized(format!(
                "'{method}' not allowed while session is {state}"
            ))),
        }
    }

    pub fn local_capabilities(&self) -> Capabilities {
        self.local
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn peer(&self) -> Option<PeerInfo> {
        self.peer.read().ok().and_then(|p| p.clone())
    }

    pub fn set_peer(&self, peer: PeerInfo) {
        if let Ok(mut slot) = self.peer.write() {
            *slot = Some(peer);
        }
    }

    /// Fail with `CapabilityNotSupported` unless the peer declared `capability`.
    pub fn require_peer(&self, capability: Capability) -> Result<()> {
        let declared = self
            .peer
            .read()
            .ok()
            .and_then(|p| p.as_ref().map(|p| p.capabilities.supports(capability)))
            .unwrap_or(false);
        if declared {
            Ok(())
        } else {
            Err(Error::CapabilityNotSupported(capability.to_string()))
        }
    }

    /// Fail with `CapabilityNotSupported` unless we declared `capability`.
    pub fn require_local(&self, capability: Capability) -> Result<()> {
        if self.local_capabilities().supports(capability) {
            Ok(())
        } else {
            Err(Error::CapabilityNotSupported(capability.to_string()))
        }
    }
}
