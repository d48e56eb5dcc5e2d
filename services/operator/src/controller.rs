//! Watch loop feeding `HpaScaler` notifications to the handlers.
//!
//! Events are handled one at a time, so notifications for a resource reach
//! the task manager in the order the watch delivered them. A relist
//! (`Init` .. `InitDone`) is treated as a full snapshot: tracked resources
//! missing from it were deleted while the watch was down.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use hpascale_id::ResourceId;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::crd::HpaScaler;
use crate::handlers::{resource_id, Handlers};

/// Dispatches watcher events to the handlers.
pub struct EventRouter {
    handlers: Arc<Handlers>,

    /// Identities seen since the last `Init`, while a relist is in progress.
    relist: Option<HashSet<ResourceId>>,
}

impl EventRouter {
    pub fn new(handlers: Arc<Handlers>) -> Self {
        Self {
            handlers,
            relist: None,
        }
    }

    pub async fn handle(&mut self, event: Event<HpaScaler>) {
        match event {
            Event::Init => {
                debug!("Relist started");
                self.relist = Some(HashSet::new());
            }
            Event::InitApply(obj) => {
                if let (Some(seen), Ok(id)) = (self.relist.as_mut(), resource_id(&obj)) {
                    seen.insert(id);
                }
                self.apply(&obj).await;
            }
            Event::InitDone => self.finish_relist().await,
            Event::Apply(obj) => self.apply(&obj).await,
            Event::Delete(obj) => {
                if let Err(e) = self.handlers.on_delete(&obj).await {
                    warn!(error = %e, "Ignoring delete for unaddressable resource");
                }
            }
        }
    }

    async fn apply(&self, obj: &HpaScaler) {
        // Rejections are surfaced on the resource by the handler.
        let _ = self.handlers.on_update(obj).await;
    }

    async fn finish_relist(&mut self) {
        let Some(seen) = self.relist.take() else {
            return;
        };

        let stale: Vec<_> = self
            .handlers
            .manager()
            .tracked()
            .await
            .into_iter()
            .filter(|id| !seen.contains(id))
            .collect();

        info!(listed = seen.len(), stale = stale.len(), "Relist complete");
        for id in stale {
            info!(resource = %id, "Resource vanished during relist, removing task");
            self.handlers.on_delete_id(&id).await;
        }
    }
}

/// Watch `HpaScaler` objects until shutdown or until the stream ends.
#[instrument(skip_all, fields(namespace = namespace.as_deref().unwrap_or("*")))]
pub async fn run(
    client: Client,
    namespace: Option<String>,
    handlers: Arc<Handlers>,
    mut shutdown: watch::Receiver<bool>,
) {
    let api: Api<HpaScaler> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let mut stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    let mut router = EventRouter::new(handlers);

    info!("Watching HpaScaler resources");

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Watch loop received shutdown signal");
                    break;
                }
            }

            next = stream.next() => match next {
                Some(Ok(event)) => router.handle(event).await,
                Some(Err(e)) => warn!(error = %e, "Watch error, backing off"),
                None => {
                    warn!("Watch stream ended");
                    break;
                }
            },
        }
    }
}
