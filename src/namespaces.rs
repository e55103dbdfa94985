use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Namespace;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::ResourceKind;
use crate::queue::{SyncQueue, SyncTask};
use crate::{Metrics, Result};

const NAMESPACE_ACTIVE_PHASE: &str = "Active";

/// Read side of the label-filtered namespace cache.
pub trait NamespaceLister: Send + Sync {
    fn get_by_key(&self, key: &str) -> Result<Option<Namespace>>;
}

/// Live cluster read, used to distinguish a namespace that lost the watched
/// label from one that was deleted.
#[async_trait]
pub trait NamespaceApi: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;
}

/// Lifecycle hooks of a sub-controller that maintains its own per-namespace
/// watchers. Implementations must tolerate repeated adds for the same key.
pub trait NamespacedInformerDependent: Send + Sync {
    fn add_namespaced_informer(&self, key: &str);
    fn remove_namespaced_informer(&self, key: &str);
}

/// Builds the per-kind watchers for one namespace.
pub trait WatcherGroupFactory: Send + Sync {
    fn build(&self, namespace: &str) -> NamespaceWatcherGroup;
}

/// One per-kind watcher inside a namespace group. `run` is the watch loop,
/// spawned when the group starts; `synced` flips to true once the watcher's
/// initial listing has completed.
pub struct KindWatcher {
    kind: ResourceKind,
    run: Option<BoxFuture<'static, ()>>,
    handle: Option<JoinHandle<()>>,
    synced: watch::Receiver<bool>,
}

impl KindWatcher {
    pub fn new(
        kind: ResourceKind,
        synced: watch::Receiver<bool>,
        run: BoxFuture<'static, ()>,
    ) -> Self {
        Self {
            kind,
            run: Some(run),
            handle: None,
            synced,
        }
    }
}

/// The set of per-kind watchers scoped to one namespace. Exactly one group
/// exists per namespace key while that namespace is in the watched set.
pub struct NamespaceWatcherGroup {
    namespace: String,
    stop: CancellationToken,
    watchers: Vec<KindWatcher>,
    started: bool,
    synced: bool,
}

impl NamespaceWatcherGroup {
    pub fn new(namespace: impl Into<String>, watchers: Vec<KindWatcher>) -> Self {
        Self {
            namespace: namespace.into(),
            stop: CancellationToken::new(),
            watchers,
            started: false,
            synced: false,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Spawns every per-kind watch loop, bounded by the group's stop token.
    pub fn start(&mut self) {
        for watcher in &mut self.watchers {
            if let Some(run) = watcher.run.take() {
                let stop = self.stop.clone();
                watcher.handle = Some(tokio::spawn(async move {
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        _ = run => {}
                    }
                }));
            }
        }
        self.started = true;
    }

    /// Stops all per-kind watchers and releases their tasks.
    pub fn stop(&mut self) {
        self.stop.cancel();
        for watcher in &mut self.watchers {
            if let Some(handle) = watcher.handle.take() {
                handle.abort();
            }
        }
        self.started = false;
    }

    pub fn cache_sync_flags(&self) -> Vec<(ResourceKind, watch::Receiver<bool>)> {
        self.watchers
            .iter()
            .map(|w| (w.kind, w.synced.clone()))
            .collect()
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// Whether the group's caches completed their initial sync while this
    /// controller was watching.
    pub fn synced(&self) -> bool {
        self.synced
    }

    fn mark_synced(&mut self) {
        self.synced = true;
    }
}

/// Waits until every cache-sync flag reports true, or the shutdown token
/// fires. Returns false when the wait was cut short.
pub async fn wait_for_cache_sync(
    namespace: &str,
    flags: &[(ResourceKind, watch::Receiver<bool>)],
    shutdown: &CancellationToken,
) -> bool {
    for (kind, flag) in flags {
        let mut flag = flag.clone();
        loop {
            if *flag.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(namespace, kind = %kind, "shutdown before caches synced");
                    return false;
                }
                changed = flag.changed() => {
                    if changed.is_err() {
                        warn!(namespace, kind = %kind, "watcher went away before its cache synced");
                        return false;
                    }
                }
            }
        }
    }
    true
}

/// Owns the active namespace watcher groups and reconciles them against the
/// label-filtered namespace set. Invoked from the queue's worker context;
/// safe for concurrent calls on distinct keys, never re-entered per key.
pub struct NamespaceInformerManager {
    groups: Mutex<HashMap<String, NamespaceWatcherGroup>>,
    lister: Arc<dyn NamespaceLister>,
    api: Arc<dyn NamespaceApi>,
    queue: Arc<dyn SyncQueue>,
    factory: Arc<dyn WatcherGroupFactory>,
    cert_manager: Option<Arc<dyn NamespacedInformerDependent>>,
    external_dns: Option<Arc<dyn NamespacedInformerDependent>>,
    shutdown: CancellationToken,
    metrics: Metrics,
}

impl NamespaceInformerManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lister: Arc<dyn NamespaceLister>,
        api: Arc<dyn NamespaceApi>,
        queue: Arc<dyn SyncQueue>,
        factory: Arc<dyn WatcherGroupFactory>,
        cert_manager: Option<Arc<dyn NamespacedInformerDependent>>,
        external_dns: Option<Arc<dyn NamespacedInformerDependent>>,
        shutdown: CancellationToken,
        metrics: Metrics,
    ) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            lister,
            api,
            queue,
            factory,
            cert_manager,
            external_dns,
            shutdown,
            metrics,
        }
    }

    /// Brings the watcher-group set in line with the namespace behind `task`.
    pub async fn reconcile(&self, task: SyncTask) {
        let _timer = self.metrics.measure_namespace_reconcile();
        let key = task.key.clone();

        let cached = match self.lister.get_by_key(&key) {
            Ok(cached) => cached,
            Err(error) => {
                warn!(namespace = %key, %error, "namespace cache lookup failed, requeueing");
                self.queue.requeue(task, error);
                return;
            }
        };

        match cached {
            None => self.remove_watchers(&key).await,
            Some(_) => self.ensure_watchers(&key).await,
        }
    }

    async fn remove_watchers(&self, key: &str) {
        // Distinguish a namespace that merely lost the watched label from one
        // that is gone from the cluster.
        let live = self.api.get_namespace(key).await.ok().flatten();
        let still_active = live
            .and_then(|ns| ns.status)
            .and_then(|status| status.phase)
            .map(|phase| phase == NAMESPACE_ACTIVE_PHASE)
            .unwrap_or(false);

        if still_active {
            info!(namespace = %key, "removing configuration for unwatched namespace");
        } else {
            info!(namespace = %key, "deleting watchers for deleted namespace");
        }

        {
            let mut groups = self.groups.lock().await;
            if let Some(mut group) = groups.remove(key) {
                group.stop();
            }
            self.metrics.watcher_groups.set(groups.len() as i64);
        }

        if let Some(cert_manager) = &self.cert_manager {
            cert_manager.remove_namespaced_informer(key);
        }
        if let Some(external_dns) = &self.external_dns {
            external_dns.remove_namespaced_informer(key);
        }
    }

    async fn ensure_watchers(&self, key: &str) {
        let flags = {
            let mut groups = self.groups.lock().await;
            let group = match groups.entry(key.to_string()) {
                Entry::Occupied(entry) => {
                    debug!(namespace = %key, "watched namespace already has informers");
                    entry.into_mut()
                }
                Entry::Vacant(entry) => {
                    info!(namespace = %key, "adding new watched namespace");
                    let mut group = self.factory.build(key);
                    group.start();
                    entry.insert(group)
                }
            };
            let flags = group.cache_sync_flags();
            self.metrics.watcher_groups.set(groups.len() as i64);
            flags
        };

        // Dependents keep their own per-namespace watchers; adds are
        // idempotent on their side.
        if let Some(cert_manager) = &self.cert_manager {
            cert_manager.add_namespaced_informer(key);
        }
        if let Some(external_dns) = &self.external_dns {
            external_dns.add_namespaced_informer(key);
        }

        if !wait_for_cache_sync(key, &flags, &self.shutdown).await {
            // Group stays in place, a later event retries the sync.
            return;
        }
        if let Some(group) = self.groups.lock().await.get_mut(key) {
            group.mark_synced();
        }
    }
}
