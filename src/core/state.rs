use std::sync::Arc;

use crate::core::time::Clock;
use crate::core::{config::Settings, redis::RedisHandle};
use crate::repositories::claims::ClaimStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    redis: RedisHandle,
    claims: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        redis: RedisHandle,
        claims: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, redis, claims, clock }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn claims(&self) -> &dyn ClaimStore {
        self.inner.claims.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }
}
