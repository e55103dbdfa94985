use std::sync::Arc;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use tracing::debug;

use crate::classifier::{self, ChangeVerdict};
use crate::events::{self, object_key, DeletePayload, ResourceKind};
use crate::queue::{SyncQueue, SyncTask};
use crate::resources::{VirtualServer, VirtualServerRoute};
use crate::Metrics;

/// Secret types the data plane can consume. Everything else is ignored at the
/// watch boundary, before any work is enqueued.
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
pub const CA_SECRET_TYPE: &str = "conductor.dev/ca";
pub const JWK_SECRET_TYPE: &str = "conductor.dev/jwk";

pub fn is_supported_secret_type(secret_type: &str) -> bool {
    matches!(
        secret_type,
        TLS_SECRET_TYPE | CA_SECRET_TYPE | JWK_SECRET_TYPE
    )
}

/// Applies split weight changes through the data plane's targeted update
/// path, bypassing full configuration regeneration.
pub trait WeightUpdateApplier: Send + Sync {
    fn apply_virtual_server(&self, old: &VirtualServer, new: &VirtualServer);
    fn apply_virtual_server_route(&self, old: &VirtualServerRoute, new: &VirtualServerRoute);
}

/// Significance test for Ingress updates, injected so the proxy-facing rules
/// live with the configuration renderer.
pub type IngressPredicate = fn(&Ingress, &Ingress) -> bool;

pub type SecretTypePredicate = fn(&str) -> bool;

/// Turns raw watch notifications into classified, filtered work on the sync
/// queue or the weight fast path. Runs on the watch delivery context and must
/// never block.
pub struct EventHandlers {
    queue: Arc<dyn SyncQueue>,
    weights: Arc<dyn WeightUpdateApplier>,
    ingress_changed: IngressPredicate,
    supported_secret_type: SecretTypePredicate,
    dynamic_weight_reload: bool,
    metrics: Metrics,
}

impl EventHandlers {
    pub fn new(
        queue: Arc<dyn SyncQueue>,
        weights: Arc<dyn WeightUpdateApplier>,
        ingress_changed: IngressPredicate,
        supported_secret_type: SecretTypePredicate,
        dynamic_weight_reload: bool,
        metrics: Metrics,
    ) -> Self {
        Self {
            queue,
            weights,
            ingress_changed,
            supported_secret_type,
            dynamic_weight_reload,
            metrics,
        }
    }

    fn enqueue(&self, kind: ResourceKind, key: String) {
        self.metrics.count_enqueue(kind);
        self.queue.enqueue(SyncTask::new(kind, key));
    }

    // Ingress

    pub fn ingress_added(&self, ingress: &Ingress) {
        debug!(ingress = %object_key(ingress), "adding Ingress");
        self.enqueue(ResourceKind::Ingress, object_key(ingress));
    }

    pub fn ingress_deleted(&self, payload: DeletePayload) {
        let ingress: Ingress = match events::resolve(payload) {
            Ok(ingress) => ingress,
            Err(dropped) => {
                debug!(%dropped, "dropping Ingress delete event");
                self.metrics.count_dropped(ResourceKind::Ingress);
                return;
            }
        };
        debug!(ingress = %object_key(&ingress), "removing Ingress");
        self.enqueue(ResourceKind::Ingress, object_key(&ingress));
    }

    pub fn ingress_updated(&self, old: &Ingress, new: &Ingress) {
        if (self.ingress_changed)(old, new) {
            debug!(ingress = %object_key(new), "Ingress changed, syncing");
            self.enqueue(ResourceKind::Ingress, object_key(new));
        }
    }

    // Secret

    fn secret_supported(&self, secret: &Secret) -> bool {
        let secret_type = secret.type_.as_deref().unwrap_or_default();
        if (self.supported_secret_type)(secret_type) {
            return true;
        }
        debug!(
            secret = %object_key(secret),
            r#type = secret_type,
            "ignoring Secret of unsupported type"
        );
        false
    }

    pub fn secret_added(&self, secret: &Secret) {
        if !self.secret_supported(secret) {
            return;
        }
        debug!(secret = %object_key(secret), "adding Secret");
        self.enqueue(ResourceKind::Secret, object_key(secret));
    }

    pub fn secret_deleted(&self, payload: DeletePayload) {
        let secret: Secret = match events::resolve(payload) {
            Ok(secret) => secret,
            Err(dropped) => {
                debug!(%dropped, "dropping Secret delete event");
                self.metrics.count_dropped(ResourceKind::Secret);
                return;
            }
        };
        if !self.secret_supported(&secret) {
            return;
        }
        debug!(secret = %object_key(&secret), "removing Secret");
        self.enqueue(ResourceKind::Secret, object_key(&secret));
    }

    pub fn secret_updated(&self, old: &Secret, new: &Secret) {
        // A secret cannot change its type, checking the current one suffices.
        if !self.secret_supported(new) {
            return;
        }
        if old != new {
            debug!(secret = %object_key(new), "Secret changed, syncing");
            self.enqueue(ResourceKind::Secret, object_key(new));
        }
    }

    // Namespace

    pub fn namespace_added(&self, namespace: &Namespace) {
        debug!(namespace = %object_key(namespace), "adding Namespace to watched set");
        self.enqueue(ResourceKind::Namespace, object_key(namespace));
    }

    pub fn namespace_deleted(&self, payload: DeletePayload) {
        let namespace: Namespace = match events::resolve(payload) {
            Ok(namespace) => namespace,
            Err(dropped) => {
                debug!(%dropped, "dropping Namespace delete event");
                self.metrics.count_dropped(ResourceKind::Namespace);
                return;
            }
        };
        debug!(namespace = %object_key(&namespace), "removing Namespace from watched set");
        self.enqueue(ResourceKind::Namespace, object_key(&namespace));
    }

    pub fn namespace_updated(&self, old: &Namespace, new: &Namespace) {
        if old != new {
            debug!(namespace = %object_key(new), "Namespace changed, syncing");
            self.enqueue(ResourceKind::Namespace, object_key(new));
        }
    }

    // VirtualServer

    pub fn virtual_server_added(&self, vs: &VirtualServer) {
        debug!(virtualserver = %object_key(vs), "adding VirtualServer");
        self.enqueue(ResourceKind::VirtualServer, object_key(vs));
    }

    pub fn virtual_server_deleted(&self, payload: DeletePayload) {
        let vs: VirtualServer = match events::resolve(payload) {
            Ok(vs) => vs,
            Err(dropped) => {
                debug!(%dropped, "dropping VirtualServer delete event");
                self.metrics.count_dropped(ResourceKind::VirtualServer);
                return;
            }
        };
        debug!(virtualserver = %object_key(&vs), "removing VirtualServer");
        self.enqueue(ResourceKind::VirtualServer, object_key(&vs));
    }

    pub fn virtual_server_updated(&self, old: &VirtualServer, new: &VirtualServer) {
        match classifier::classify_virtual_server(old, new, self.dynamic_weight_reload) {
            ChangeVerdict::WeightOnlyChange => {
                debug!(
                    virtualserver = %object_key(new),
                    "applying VirtualServer split weights via dynamic reload"
                );
                self.metrics.count_weight_update(ResourceKind::VirtualServer);
                self.weights.apply_virtual_server(old, new);
            }
            ChangeVerdict::FullChange => {
                debug!(virtualserver = %object_key(new), "VirtualServer changed, syncing");
                self.enqueue(ResourceKind::VirtualServer, object_key(new));
            }
            ChangeVerdict::NoChange => {}
        }
    }

    // VirtualServerRoute

    pub fn virtual_server_route_added(&self, vsr: &VirtualServerRoute) {
        debug!(virtualserverroute = %object_key(vsr), "adding VirtualServerRoute");
        self.enqueue(ResourceKind::VirtualServerRoute, object_key(vsr));
    }

    pub fn virtual_server_route_deleted(&self, payload: DeletePayload) {
        let vsr: VirtualServerRoute = match events::resolve(payload) {
            Ok(vsr) => vsr,
            Err(dropped) => {
                debug!(%dropped, "dropping VirtualServerRoute delete event");
                self.metrics.count_dropped(ResourceKind::VirtualServerRoute);
                return;
            }
        };
        debug!(virtualserverroute = %object_key(&vsr), "removing VirtualServerRoute");
        self.enqueue(ResourceKind::VirtualServerRoute, object_key(&vsr));
    }

    pub fn virtual_server_route_updated(&self, old: &VirtualServerRoute, new: &VirtualServerRoute) {
        match classifier::classify_virtual_server_route(old, new, self.dynamic_weight_reload) {
            ChangeVerdict::WeightOnlyChange => {
                debug!(
                    virtualserverroute = %object_key(new),
                    "applying VirtualServerRoute split weights via dynamic reload"
                );
                self.metrics
                    .count_weight_update(ResourceKind::VirtualServerRoute);
                self.weights.apply_virtual_server_route(old, new);
            }
            ChangeVerdict::FullChange => {
                debug!(virtualserverroute = %object_key(new), "VirtualServerRoute changed, syncing");
                self.enqueue(ResourceKind::VirtualServerRoute, object_key(new));
            }
            ChangeVerdict::NoChange => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Tombstone, Watched};
    use crate::resources::{Action, Route, Split, VirtualServerRouteSpec, VirtualServerSpec};
    use crate::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingQueue {
        enqueued: Mutex<Vec<SyncTask>>,
    }

    impl SyncQueue for RecordingQueue {
        fn enqueue(&self, task: SyncTask) {
            self.enqueued.lock().unwrap().push(task);
        }

        fn requeue(&self, task: SyncTask, _error: Error) {
            self.enqueued.lock().unwrap().push(task);
        }
    }

    #[derive(Default)]
    struct RecordingApplier {
        vs_calls: Mutex<Vec<(String, String)>>,
        vsr_calls: Mutex<Vec<(String, String)>>,
    }

    impl WeightUpdateApplier for RecordingApplier {
        fn apply_virtual_server(&self, old: &VirtualServer, new: &VirtualServer) {
            self.vs_calls
                .lock()
                .unwrap()
                .push((object_key(old), object_key(new)));
        }

        fn apply_virtual_server_route(
            &self,
            old: &VirtualServerRoute,
            new: &VirtualServerRoute,
        ) {
            self.vsr_calls
                .lock()
                .unwrap()
                .push((object_key(old), object_key(new)));
        }
    }

    struct Fixture {
        queue: Arc<RecordingQueue>,
        applier: Arc<RecordingApplier>,
        handlers: EventHandlers,
    }

    fn fixture(dynamic_weight_reload: bool) -> Fixture {
        let queue = Arc::new(RecordingQueue::default());
        let applier = Arc::new(RecordingApplier::default());
        let handlers = EventHandlers::new(
            queue.clone(),
            applier.clone(),
            crate::classifier::ingress_spec_or_annotations_changed,
            is_supported_secret_type,
            dynamic_weight_reload,
            Metrics::default(),
        );
        Fixture {
            queue,
            applier,
            handlers,
        }
    }

    impl Fixture {
        fn enqueued(&self) -> Vec<SyncTask> {
            self.queue.enqueued.lock().unwrap().clone()
        }

        fn vs_weight_calls(&self) -> usize {
            self.applier.vs_calls.lock().unwrap().len()
        }
    }

    fn secret(name: &str, secret_type: &str) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.into());
        secret.metadata.namespace = Some("default".into());
        secret.type_ = Some(secret_type.into());
        secret
    }

    fn vs(host: &str, weights: &[i64]) -> VirtualServer {
        let mut vs = VirtualServer::new(
            "cafe",
            VirtualServerSpec {
                host: host.into(),
                tls: None,
                upstreams: vec![],
                routes: vec![Route {
                    path: "/tea".into(),
                    action: None,
                    splits: weights
                        .iter()
                        .map(|w| Split {
                            weight: *w,
                            action: Action {
                                pass: Some("tea".into()),
                                redirect: None,
                            },
                        })
                        .collect(),
                    matches: vec![],
                    route: None,
                }],
            },
        );
        vs.metadata.namespace = Some("default".into());
        vs
    }

    #[test]
    fn unsupported_secret_type_never_enqueues() {
        let f = fixture(false);
        let dockercfg = secret("registry", "kubernetes.io/dockerconfigjson");

        f.handlers.secret_added(&dockercfg);
        f.handlers.secret_updated(&dockercfg, &{
            let mut changed = dockercfg.clone();
            changed.metadata.labels = Some([("a".to_string(), "b".to_string())].into());
            changed
        });
        f.handlers
            .secret_deleted(DeletePayload::Object(dockercfg.into_watched()));

        assert!(f.enqueued().is_empty());
    }

    #[test]
    fn supported_secret_add_and_delete_enqueue() {
        let f = fixture(false);
        let tls = secret("tls-cert", TLS_SECRET_TYPE);

        f.handlers.secret_added(&tls);
        f.handlers
            .secret_deleted(DeletePayload::Object(tls.into_watched()));

        let tasks = f.enqueued();
        assert_eq!(tasks.len(), 2);
        assert!(tasks
            .iter()
            .all(|t| t.kind == ResourceKind::Secret && t.key == "default/tls-cert"));
    }

    #[test]
    fn unchanged_secret_update_is_dropped() {
        let f = fixture(false);
        let tls = secret("tls-cert", TLS_SECRET_TYPE);
        f.handlers.secret_updated(&tls, &tls.clone());
        assert!(f.enqueued().is_empty());
    }

    #[test]
    fn secret_delete_through_tombstone_enqueues_like_direct_delete() {
        let f = fixture(false);
        let tls = secret("tls-cert", TLS_SECRET_TYPE);
        f.handlers.secret_deleted(DeletePayload::Tombstone(Tombstone {
            last_known: tls.into_watched(),
        }));
        assert_eq!(f.enqueued().len(), 1);
    }

    #[test]
    fn tombstone_of_wrong_kind_is_dropped_without_enqueue() {
        let f = fixture(false);
        f.handlers.secret_deleted(DeletePayload::Tombstone(Tombstone {
            last_known: Namespace::default().into_watched(),
        }));
        assert!(f.enqueued().is_empty());
    }

    #[test]
    fn namespace_update_enqueues_only_on_difference() {
        let f = fixture(false);
        let mut ns = Namespace::default();
        ns.metadata.name = Some("team-a".into());

        f.handlers.namespace_updated(&ns, &ns.clone());
        assert!(f.enqueued().is_empty());

        let mut labeled = ns.clone();
        labeled.metadata.labels = Some([("watch".to_string(), "true".to_string())].into());
        f.handlers.namespace_updated(&ns, &labeled);
        assert_eq!(
            f.enqueued(),
            vec![SyncTask::new(ResourceKind::Namespace, "team-a")]
        );
    }

    #[test]
    fn ingress_update_honors_the_significance_predicate() {
        let f = fixture(false);
        let mut ingress = Ingress::default();
        ingress.metadata.name = Some("web".into());
        ingress.metadata.namespace = Some("default".into());

        // Status-only difference is not significant.
        let mut status_changed = ingress.clone();
        status_changed.status = Some(Default::default());
        f.handlers.ingress_updated(&ingress, &status_changed);
        assert!(f.enqueued().is_empty());

        let mut annotated = ingress.clone();
        annotated.metadata.annotations =
            Some([("conductor.dev/rewrite".to_string(), "/".to_string())].into());
        f.handlers.ingress_updated(&ingress, &annotated);
        assert_eq!(f.enqueued().len(), 1);
    }

    #[test]
    fn weight_only_update_takes_fast_path_exactly_once() {
        let f = fixture(true);
        f.handlers
            .virtual_server_updated(&vs("cafe.example.com", &[80, 20]), &vs("cafe.example.com", &[60, 40]));

        assert_eq!(f.vs_weight_calls(), 1);
        assert!(f.enqueued().is_empty());
    }

    #[test]
    fn weight_only_update_with_reload_disabled_enqueues_full_sync() {
        let f = fixture(false);
        f.handlers
            .virtual_server_updated(&vs("cafe.example.com", &[80, 20]), &vs("cafe.example.com", &[60, 40]));

        assert_eq!(f.vs_weight_calls(), 0);
        assert_eq!(
            f.enqueued(),
            vec![SyncTask::new(ResourceKind::VirtualServer, "default/cafe")]
        );
    }

    #[test]
    fn mixed_change_always_enqueues_and_never_touches_weights() {
        let f = fixture(true);
        f.handlers
            .virtual_server_updated(&vs("cafe.example.com", &[80, 20]), &vs("bar.example.com", &[60, 40]));

        assert_eq!(f.vs_weight_calls(), 0);
        assert_eq!(f.enqueued().len(), 1);
    }

    #[test]
    fn three_way_split_change_always_enqueues() {
        let f = fixture(true);
        f.handlers.virtual_server_updated(
            &vs("cafe.example.com", &[50, 30, 20]),
            &vs("cafe.example.com", &[40, 40, 20]),
        );

        assert_eq!(f.vs_weight_calls(), 0);
        assert_eq!(f.enqueued().len(), 1);
    }

    fn vsr(weights: &[i64]) -> VirtualServerRoute {
        let mut vsr = VirtualServerRoute::new(
            "tea",
            VirtualServerRouteSpec {
                host: "cafe.example.com".into(),
                upstreams: vec![],
                subroutes: vec![Route {
                    path: "/tea".into(),
                    action: None,
                    splits: weights
                        .iter()
                        .map(|w| Split {
                            weight: *w,
                            action: Action {
                                pass: Some("tea".into()),
                                redirect: None,
                            },
                        })
                        .collect(),
                    matches: vec![],
                    route: None,
                }],
            },
        );
        vsr.metadata.namespace = Some("default".into());
        vsr
    }

    #[test]
    fn virtual_server_route_weight_change_uses_its_own_fast_path() {
        let f = fixture(true);
        f.handlers
            .virtual_server_route_updated(&vsr(&[80, 20]), &vsr(&[60, 40]));

        assert_eq!(f.applier.vsr_calls.lock().unwrap().len(), 1);
        assert_eq!(f.vs_weight_calls(), 0);
        assert!(f.enqueued().is_empty());
    }
}
