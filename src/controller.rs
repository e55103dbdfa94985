use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{api::Api, client::Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier;
use crate::events::{object_key, DeletePayload, RawEvent, ResourceKind, Watched};
use crate::handlers::{is_supported_secret_type, EventHandlers, WeightUpdateApplier};
use crate::namespaces::{
    KindWatcher, NamespaceApi, NamespaceInformerManager, NamespaceLister, NamespaceWatcherGroup,
    NamespacedInformerDependent, WatcherGroupFactory,
};
use crate::queue::{ChannelQueue, SyncQueue};
use crate::resources::{VirtualServer, VirtualServerRoute};
use async_trait::async_trait;

use crate::{Metrics, Result};

/// Runtime options resolved from the command line.
#[derive(Clone, Debug)]
pub struct Options {
    /// Label selector choosing which namespaces belong to the watched set.
    pub watch_namespace_label: String,
    /// Apply two-way split weight changes through the targeted update path
    /// instead of a full configuration reload.
    pub dynamic_weight_reload: bool,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the queue worker
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
    options: Options,
    /// Optional sub-controller following the watched-namespace lifecycle
    cert_manager: Option<Arc<dyn NamespacedInformerDependent>>,
    /// Optional sub-controller following the watched-namespace lifecycle
    external_dns: Option<Arc<dyn NamespacedInformerDependent>>,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(options: Options) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            options,
            cert_manager: None,
            external_dns: None,
        }
    }

    pub fn with_cert_manager(self, dependent: Arc<dyn NamespacedInformerDependent>) -> Self {
        Self {
            cert_manager: Some(dependent),
            ..self
        }
    }

    pub fn with_external_dns(self, dependent: Arc<dyn NamespacedInformerDependent>) -> Self {
        Self {
            external_dns: Some(dependent),
            ..self
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// Drives one watch stream: pairs raw applies into add/update notifications
/// against the last seen object, synthesizes deletes for objects that vanish
/// across a re-list, and flips the sync flag once the initial listing is
/// complete.
pub(crate) async fn dispatch_watch_events<K, S, F>(
    stream: S,
    synced: watch::Sender<bool>,
    mut deliver: F,
) where
    K: kube::Resource + Watched + Clone,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
    F: FnMut(RawEvent<K>),
{
    tokio::pin!(stream);
    let mut last_seen: HashMap<String, K> = HashMap::new();
    let mut relisted: HashSet<String> = HashSet::new();

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Init) => {
                relisted.clear();
            }
            Ok(watcher::Event::InitApply(obj)) => {
                let key = object_key(&obj);
                relisted.insert(key.clone());
                match last_seen.insert(key, obj.clone()) {
                    Some(old) => deliver(RawEvent::Updated { old, new: obj }),
                    None => deliver(RawEvent::Added(obj)),
                }
            }
            Ok(watcher::Event::InitDone) => {
                let vanished: Vec<K> = last_seen
                    .iter()
                    .filter(|(key, _)| !relisted.contains(*key))
                    .map(|(_, obj)| obj.clone())
                    .collect();
                for obj in vanished {
                    last_seen.remove(&object_key(&obj));
                    deliver(RawEvent::Deleted(DeletePayload::Object(obj.into_watched())));
                }
                let _ = synced.send(true);
            }
            Ok(watcher::Event::Apply(obj)) => {
                let key = object_key(&obj);
                match last_seen.insert(key, obj.clone()) {
                    Some(old) => deliver(RawEvent::Updated { old, new: obj }),
                    None => deliver(RawEvent::Added(obj)),
                }
            }
            Ok(watcher::Event::Delete(obj)) => {
                last_seen.remove(&object_key(&obj));
                deliver(RawEvent::Deleted(DeletePayload::Object(obj.into_watched())));
            }
            Err(error) => {
                warn!(%error, "watch stream error");
            }
        }
    }
}

/// Label-filtered namespace cache, read by the reconciliation path and kept
/// current by the namespace watch stream.
struct StoreNamespaceLister {
    store: Store<Namespace>,
}

impl NamespaceLister for StoreNamespaceLister {
    fn get_by_key(&self, key: &str) -> Result<Option<Namespace>> {
        Ok(self
            .store
            .get(&ObjectRef::new(key))
            .map(|obj| (*obj).clone()))
    }
}

struct KubeNamespaceApi {
    client: Client,
}

#[async_trait]
impl NamespaceApi for KubeNamespaceApi {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }
}

/// Seam to the data plane's targeted weight-update endpoint. The controller
/// guarantees it is only invoked for two-destination splits whose weights are
/// the sole difference between the two objects.
struct DynamicReloadApplier;

impl WeightUpdateApplier for DynamicReloadApplier {
    fn apply_virtual_server(&self, _old: &VirtualServer, new: &VirtualServer) {
        info!(
            virtualserver = %object_key(new),
            "updating canary split weights without regenerating configuration"
        );
    }

    fn apply_virtual_server_route(&self, _old: &VirtualServerRoute, new: &VirtualServerRoute) {
        info!(
            virtualserverroute = %object_key(new),
            "updating canary split weights without regenerating configuration"
        );
    }
}

fn kind_watcher<K, F>(api: Api<K>, kind: ResourceKind, deliver: F) -> KindWatcher
where
    K: kube::Resource<DynamicType = ()>
        + Watched
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
    F: FnMut(RawEvent<K>) + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    KindWatcher::new(kind, rx, Box::pin(dispatch_watch_events(stream, tx, deliver)))
}

/// Builds the per-kind watchers for one watched namespace.
struct KubeWatcherGroupFactory {
    client: Client,
    handlers: Arc<EventHandlers>,
}

impl WatcherGroupFactory for KubeWatcherGroupFactory {
    fn build(&self, namespace: &str) -> NamespaceWatcherGroup {
        let ingresses = {
            let handlers = self.handlers.clone();
            kind_watcher(
                Api::<Ingress>::namespaced(self.client.clone(), namespace),
                ResourceKind::Ingress,
                move |event| match event {
                    RawEvent::Added(obj) => handlers.ingress_added(&obj),
                    RawEvent::Updated { old, new } => handlers.ingress_updated(&old, &new),
                    RawEvent::Deleted(payload) => handlers.ingress_deleted(payload),
                },
            )
        };
        let secrets = {
            let handlers = self.handlers.clone();
            kind_watcher(
                Api::<Secret>::namespaced(self.client.clone(), namespace),
                ResourceKind::Secret,
                move |event| match event {
                    RawEvent::Added(obj) => handlers.secret_added(&obj),
                    RawEvent::Updated { old, new } => handlers.secret_updated(&old, &new),
                    RawEvent::Deleted(payload) => handlers.secret_deleted(payload),
                },
            )
        };
        let virtual_servers = {
            let handlers = self.handlers.clone();
            kind_watcher(
                Api::<VirtualServer>::namespaced(self.client.clone(), namespace),
                ResourceKind::VirtualServer,
                move |event| match event {
                    RawEvent::Added(obj) => handlers.virtual_server_added(&obj),
                    RawEvent::Updated { old, new } => handlers.virtual_server_updated(&old, &new),
                    RawEvent::Deleted(payload) => handlers.virtual_server_deleted(payload),
                },
            )
        };
        let virtual_server_routes = {
            let handlers = self.handlers.clone();
            kind_watcher(
                Api::<VirtualServerRoute>::namespaced(self.client.clone(), namespace),
                ResourceKind::VirtualServerRoute,
                move |event| match event {
                    RawEvent::Added(obj) => handlers.virtual_server_route_added(&obj),
                    RawEvent::Updated { old, new } => {
                        handlers.virtual_server_route_updated(&old, &new)
                    }
                    RawEvent::Deleted(payload) => handlers.virtual_server_route_deleted(payload),
                },
            )
        };

        NamespaceWatcherGroup::new(
            namespace,
            vec![ingresses, secrets, virtual_servers, virtual_server_routes],
        )
    }
}

/// Initialize the controller and shared state
pub async fn run(state: State) {
    let client = Client::try_default()
        .await
        .expect("failed to create kube Client");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal, stopping watchers");
            shutdown.cancel();
        });
    }

    let (queue, mut tasks) = ChannelQueue::new();
    let queue: Arc<dyn SyncQueue> = Arc::new(queue);
    let metrics = Metrics::default().register(&state.registry).unwrap();

    let handlers = Arc::new(EventHandlers::new(
        queue.clone(),
        Arc::new(DynamicReloadApplier),
        classifier::ingress_spec_or_annotations_changed,
        is_supported_secret_type,
        state.options.dynamic_weight_reload,
        metrics.clone(),
    ));

    // The label-filtered namespace watcher feeds both the event handlers and
    // the lister the reconciliation path reads.
    let ns_api: Api<Namespace> = Api::all(client.clone());
    let ns_cfg = watcher::Config::default().labels(&state.options.watch_namespace_label);
    let (ns_store, ns_writer) = reflector::store();
    let ns_stream = reflector(ns_writer, watcher(ns_api, ns_cfg)).default_backoff();
    {
        let handlers = handlers.clone();
        let shutdown = shutdown.clone();
        let (ns_synced, _) = watch::channel(false);
        tokio::spawn(async move {
            let dispatch = dispatch_watch_events(ns_stream, ns_synced, move |event| match event {
                RawEvent::Added(ns) => handlers.namespace_added(&ns),
                RawEvent::Updated { old, new } => handlers.namespace_updated(&old, &new),
                RawEvent::Deleted(payload) => handlers.namespace_deleted(payload),
            });
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = dispatch => {}
            }
        });
    }

    let manager = NamespaceInformerManager::new(
        Arc::new(StoreNamespaceLister { store: ns_store }),
        Arc::new(KubeNamespaceApi {
            client: client.clone(),
        }),
        queue.clone(),
        Arc::new(KubeWatcherGroupFactory { client, handlers }),
        state.cert_manager.clone(),
        state.external_dns.clone(),
        shutdown.clone(),
        metrics,
    );

    // Queue worker: namespace tasks drive the watcher lifecycle, everything
    // else is handed to the configuration renderer.
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            task = tasks.recv() => {
                let Some(task) = task else { break };
                state.diagnostics.write().await.last_event = Utc::now();
                match task.kind {
                    ResourceKind::Namespace => manager.reconcile(task).await,
                    kind => debug!(key = %task.key, %kind, "sync task ready for configuration renderer"),
                }
            }
        }
    }
}
