//! Channel lifecycle.
//!
//! [`ChannelManager`] owns at most one live channel and the generation number
//! it was built under. The slot is guarded by an async mutex that stays held
//! while a replacement handshakes, so callers racing on a stale or missing
//! channel wait for the single rebuild and reuse it.
//!
//! ```text
//! acquire(endpoint) ──same endpoint──> reuse (generation N)
//!        │
//!        └──none / other endpoint──> close old, connect, generation N+1
//!
//! invalidate(N) ──current is N──> drop channel
//!        └──current is not N──> no-op (a newer channel already replaced it)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ChannelError;
use crate::settings::Endpoint;
use crate::transport::Transport;

/// A channel borrowed for the duration of one call.
#[derive(Debug, Clone)]
pub struct LeasedChannel<C> {
    /// The transport channel.
    pub channel: C,
    /// Generation the channel was built under.
    pub generation: u64,
    /// Endpoint the channel is bound to.
    pub endpoint: Endpoint,
}

struct Slot<C> {
    channel: C,
    generation: u64,
    endpoint: Endpoint,
}

struct State<C> {
    current: Option<Slot<C>>,
    generation: u64,
    closed: bool,
}

/// Owns the single live channel.
pub struct ChannelManager<T: Transport> {
    transport: Arc<T>,
    state: Mutex<State<T::Channel>>,
    builds: AtomicU64,
}

impl<T: Transport> ChannelManager<T> {
    /// Create an empty manager; the first channel is built lazily.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            state: Mutex::new(State {
                current: None,
                generation: 0,
                closed: false,
            }),
            builds: AtomicU64::new(0),
        }
    }

    /// Return the channel for `endpoint`, building it if none exists or the
    /// current one is bound elsewhere.
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
    ) -> Result<LeasedChannel<T::Channel>, ChannelError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ChannelError::Closed);
        }

        if let Some(slot) = &state.current {
            if &slot.endpoint == endpoint {
                return Ok(LeasedChannel {
                    channel: slot.channel.clone(),
                    generation: slot.generation,
                    endpoint: slot.endpoint.clone(),
                });
            }
        }

        if let Some(old) = state.current.take() {
            tracing::debug!(
                endpoint = %old.endpoint,
                generation = old.generation,
                "closing channel bound to previous endpoint"
            );
        }

        let channel = self.transport.connect(endpoint).await?;
        state.generation += 1;
        let generation = state.generation;
        self.builds.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%endpoint, generation, "channel built");

        state.current = Some(Slot {
            channel: channel.clone(),
            generation,
            endpoint: endpoint.clone(),
        });

        Ok(LeasedChannel {
            channel,
            generation,
            endpoint: endpoint.clone(),
        })
    }

    /// Drop the channel if it is still the one built under `generation`.
    ///
    /// Returns `true` when a channel was dropped.
    pub async fn invalidate(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        let is_current = state
            .current
            .as_ref()
            .is_some_and(|slot| slot.generation == generation);
        if !is_current {
            tracing::debug!(generation, "stale invalidation ignored");
            return false;
        }
        if let Some(slot) = state.current.take() {
            tracing::info!(endpoint = %slot.endpoint, generation, "invalidating channel");
        }
        true
    }

    /// Drop the channel and refuse further acquisitions.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(slot) = state.current.take() {
            tracing::debug!(endpoint = %slot.endpoint, "channel closed");
        }
    }

    /// Generation of the current channel, if one is held.
    pub async fn current_generation(&self) -> Option<u64> {
        self.state.lock().await.current.as_ref().map(|s| s.generation)
    }

    /// Total number of channels built so far.
    #[must_use]
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}
