//! The discoverability collaborator.
//!
//! Before listening, the host has to be visible to the peer. How that happens
//! is platform business; the link only asks for it and then waits for the
//! platform to report the scan mode it ended up in.

use std::time::Duration;

use tracing::info;

use crate::error::LinkResult;

/// Scan mode reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Not reachable.
    None,
    /// Reachable by peers that already know the host.
    Connectable,
    /// Reachable and advertised. The only mode the link starts listening in.
    ConnectableDiscoverable,
}

/// Outcome of a discoverability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverabilityRequest {
    /// The host is already discoverable; listen right away.
    AlreadyDiscoverable,
    /// The request was made; a [`ScanMode`] change will follow.
    Requested,
}

/// Makes the host discoverable.
pub trait Discoverability: Send {
    /// Ask for the host to be discoverable for `duration`.
    fn request_discoverable(&mut self, duration: Duration) -> LinkResult<DiscoverabilityRequest>;
}

/// Sockets need no advertisement.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDiscoverable;

impl Discoverability for AlwaysDiscoverable {
    fn request_discoverable(&mut self, _duration: Duration) -> LinkResult<DiscoverabilityRequest> {
        Ok(DiscoverabilityRequest::AlreadyDiscoverable)
    }
}

/// Discoverability granted from outside, via
/// [`ManagerHandle::discoverability_changed`](crate::manager::ManagerHandle::discoverability_changed).
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualDiscoverability;

impl Discoverability for ManualDiscoverability {
    fn request_discoverable(&mut self, duration: Duration) -> LinkResult<DiscoverabilityRequest> {
        info!(
            "Discoverability for {}s requested; waiting for the scan mode signal",
            duration.as_secs()
        );
        Ok(DiscoverabilityRequest::Requested)
    }
}
