use std::sync::Arc;

use sqlx::PgPool;

use crate::core::time::Clock;
use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::storage::ObjectStore;
use crate::services::submission_store::SubmissionStore;
use crate::tasks::queue::JobQueue;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

pub(crate) struct AppServices {
    pub(crate) store: Arc<dyn SubmissionStore>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) objects: Option<Arc<dyn ObjectStore>>,
    pub(crate) clock: Arc<dyn Clock>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    services: AppServices,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        services: AppServices,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, redis, services }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn store(&self) -> Arc<dyn SubmissionStore> {
        self.inner.services.store.clone()
    }

    pub(crate) fn queue(&self) -> Arc<dyn JobQueue> {
        self.inner.services.queue.clone()
    }

    pub(crate) fn objects(&self) -> Option<Arc<dyn ObjectStore>> {
        self.inner.services.objects.clone()
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.inner.services.clock.clone()
    }
}
