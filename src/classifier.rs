use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::resources::{Route, VirtualServer, VirtualServerRoute};
use crate::{Error, Result};

/// Outcome of comparing the old and new version of one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeVerdict {
    NoChange,
    /// Only canary split weights moved; the change can be applied through the
    /// targeted weight-update path instead of a full resync.
    WeightOnlyChange,
    FullChange,
}

/// Deep copy through a serde round trip. Cached objects are shared and
/// read-only, so weight normalization must never touch the originals.
fn deep_copy<T: Serialize + DeserializeOwned>(value: &T) -> serde_json::Result<T> {
    serde_json::from_value(serde_json::to_value(value)?)
}

/// Zeroes the weights of every two-destination split, at route level and
/// match level. Splits of any other arity are left untouched and therefore
/// never eligible for the weight-only fast path.
fn zero_out_route_split_weights(routes: &mut [Route]) {
    for route in routes {
        for m in &mut route.matches {
            if m.splits.len() == 2 {
                for split in &mut m.splits {
                    split.weight = 0;
                }
            }
        }
        if route.splits.len() == 2 {
            for split in &mut route.splits {
                split.weight = 0;
            }
        }
    }
}

pub fn classify_virtual_server(
    old: &VirtualServer,
    new: &VirtualServer,
    dynamic_weight_reload: bool,
) -> ChangeVerdict {
    if dynamic_weight_reload {
        match (deep_copy(&old.spec), deep_copy(&new.spec)) {
            (Ok(mut old_spec), Ok(mut new_spec)) => {
                zero_out_route_split_weights(&mut old_spec.routes);
                zero_out_route_split_weights(&mut new_spec.routes);
                if old_spec == new_spec {
                    return ChangeVerdict::WeightOnlyChange;
                }
            }
            (Err(error), _) | (_, Err(error)) => {
                warn!(
                    virtualserver = %new.name_any(),
                    %error,
                    "failed to copy VirtualServer for dynamic weight comparison"
                );
                return ChangeVerdict::NoChange;
            }
        }
    }

    if old.spec != new.spec {
        ChangeVerdict::FullChange
    } else {
        ChangeVerdict::NoChange
    }
}

pub fn classify_virtual_server_route(
    old: &VirtualServerRoute,
    new: &VirtualServerRoute,
    dynamic_weight_reload: bool,
) -> ChangeVerdict {
    if dynamic_weight_reload {
        match (deep_copy(&old.spec), deep_copy(&new.spec)) {
            (Ok(mut old_spec), Ok(mut new_spec)) => {
                zero_out_route_split_weights(&mut old_spec.subroutes);
                zero_out_route_split_weights(&mut new_spec.subroutes);
                if old_spec == new_spec {
                    return ChangeVerdict::WeightOnlyChange;
                }
            }
            (Err(error), _) | (_, Err(error)) => {
                warn!(
                    virtualserverroute = %new.name_any(),
                    %error,
                    "failed to copy VirtualServerRoute for dynamic weight comparison"
                );
                return ChangeVerdict::NoChange;
            }
        }
    }

    if old.spec != new.spec {
        ChangeVerdict::FullChange
    } else {
        ChangeVerdict::NoChange
    }
}

/// Compares the `spec` of two schema-less documents. A missing spec on the new
/// document is an error; a missing spec on the old one is tolerated, so any
/// spec on the new side then counts as a change.
pub fn specs_differ(old: &Value, new: &Value, name: &str) -> Result<bool> {
    let new_spec = new
        .get("spec")
        .ok_or_else(|| Error::MissingSpec(name.to_string()))?;
    let old_spec = old.get("spec");
    if old_spec.is_none() {
        warn!(resource = name, "old object has no spec, treating it as absent");
    }
    Ok(old_spec != Some(new_spec))
}

/// Default significance test for Ingress updates: anything affecting derived
/// proxy configuration lives in the spec or the annotations.
pub fn ingress_spec_or_annotations_changed(old: &Ingress, new: &Ingress) -> bool {
    old.spec != new.spec || old.metadata.annotations != new.metadata.annotations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Action, Condition, Match, Split, VirtualServerRouteSpec, VirtualServerSpec};
    use serde_json::json;

    fn pass(upstream: &str) -> Action {
        Action {
            pass: Some(upstream.into()),
            redirect: None,
        }
    }

    fn splits(weights: &[i64]) -> Vec<Split> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| Split {
                weight: *w,
                action: pass(&format!("upstream-{i}")),
            })
            .collect()
    }

    fn vs_with_route_splits(host: &str, weights: &[i64]) -> VirtualServer {
        VirtualServer::new(
            "cafe",
            VirtualServerSpec {
                host: host.into(),
                tls: None,
                upstreams: vec![],
                routes: vec![Route {
                    path: "/tea".into(),
                    action: None,
                    splits: splits(weights),
                    matches: vec![],
                    route: None,
                }],
            },
        )
    }

    fn vsr_with_subroute_splits(weights: &[i64]) -> VirtualServerRoute {
        VirtualServerRoute::new(
            "tea",
            VirtualServerRouteSpec {
                host: "cafe.example.com".into(),
                upstreams: vec![],
                subroutes: vec![Route {
                    path: "/tea".into(),
                    action: None,
                    splits: splits(weights),
                    matches: vec![],
                    route: None,
                }],
            },
        )
    }

    #[test]
    fn pure_weight_change_on_canary_pair_is_weight_only() {
        let old = vs_with_route_splits("cafe.example.com", &[80, 20]);
        let new = vs_with_route_splits("cafe.example.com", &[60, 40]);
        assert_eq!(
            classify_virtual_server(&old, &new, true),
            ChangeVerdict::WeightOnlyChange
        );
    }

    #[test]
    fn weight_change_with_reload_disabled_needs_full_sync() {
        let old = vs_with_route_splits("cafe.example.com", &[80, 20]);
        let new = vs_with_route_splits("cafe.example.com", &[60, 40]);
        assert_eq!(
            classify_virtual_server(&old, &new, false),
            ChangeVerdict::FullChange
        );
    }

    #[test]
    fn host_change_alongside_weights_needs_full_sync() {
        let old = vs_with_route_splits("cafe.example.com", &[80, 20]);
        let new = vs_with_route_splits("bar.example.com", &[60, 40]);
        assert_eq!(
            classify_virtual_server(&old, &new, true),
            ChangeVerdict::FullChange
        );
    }

    #[test]
    fn three_way_split_never_takes_the_fast_path() {
        let old = vs_with_route_splits("cafe.example.com", &[50, 30, 20]);
        let new = vs_with_route_splits("cafe.example.com", &[40, 40, 20]);
        assert_eq!(
            classify_virtual_server(&old, &new, true),
            ChangeVerdict::FullChange
        );
    }

    #[test]
    fn identical_specs_without_reload_are_no_change() {
        let old = vs_with_route_splits("cafe.example.com", &[80, 20]);
        let new = vs_with_route_splits("cafe.example.com", &[80, 20]);
        assert_eq!(
            classify_virtual_server(&old, &new, false),
            ChangeVerdict::NoChange
        );
    }

    #[test]
    fn unchanged_spec_with_reload_enabled_still_takes_fast_path() {
        // Normalized specs compare equal, so the update routes through the
        // weight applier, which treats identical weights as a no-op.
        let old = vs_with_route_splits("cafe.example.com", &[80, 20]);
        let new = vs_with_route_splits("cafe.example.com", &[80, 20]);
        assert_eq!(
            classify_virtual_server(&old, &new, true),
            ChangeVerdict::WeightOnlyChange
        );
    }

    #[test]
    fn match_level_canary_pair_is_weight_only() {
        let build = |weights: &[i64]| {
            VirtualServer::new(
                "cafe",
                VirtualServerSpec {
                    host: "cafe.example.com".into(),
                    tls: None,
                    upstreams: vec![],
                    routes: vec![Route {
                        path: "/tea".into(),
                        action: Some(pass("tea")),
                        splits: vec![],
                        matches: vec![Match {
                            conditions: vec![Condition {
                                header: Some("x-canary".into()),
                                cookie: None,
                                argument: None,
                                variable: None,
                                value: "yes".into(),
                            }],
                            action: None,
                            splits: splits(weights),
                        }],
                        route: None,
                    }],
                },
            )
        };
        assert_eq!(
            classify_virtual_server(&build(&[90, 10]), &build(&[50, 50]), true),
            ChangeVerdict::WeightOnlyChange
        );
    }

    #[test]
    fn virtual_server_route_subroute_weights_are_weight_only() {
        let old = vsr_with_subroute_splits(&[80, 20]);
        let new = vsr_with_subroute_splits(&[60, 40]);
        assert_eq!(
            classify_virtual_server_route(&old, &new, true),
            ChangeVerdict::WeightOnlyChange
        );
        assert_eq!(
            classify_virtual_server_route(&old, &new, false),
            ChangeVerdict::FullChange
        );
    }

    #[test]
    fn normalization_leaves_the_cached_objects_untouched() {
        let old = vs_with_route_splits("cafe.example.com", &[80, 20]);
        let new = vs_with_route_splits("cafe.example.com", &[60, 40]);
        classify_virtual_server(&old, &new, true);
        assert_eq!(old.spec.routes[0].splits[0].weight, 80);
        assert_eq!(new.spec.routes[0].splits[0].weight, 60);
    }

    #[test]
    fn missing_spec_on_new_document_is_an_error() {
        let old = json!({"spec": {"field": 1}});
        let new = json!({"metadata": {"name": "p"}});
        assert!(matches!(
            specs_differ(&old, &new, "p"),
            Err(Error::MissingSpec(_))
        ));
    }

    #[test]
    fn missing_spec_on_old_document_counts_as_change() {
        let old = json!({"metadata": {"name": "p"}});
        let new = json!({"spec": {"field": 1}});
        assert!(specs_differ(&old, &new, "p").unwrap());
    }

    #[test]
    fn equal_specs_do_not_differ() {
        let old = json!({"spec": {"field": 1, "nested": {"a": [1, 2]}}, "status": {"x": 1}});
        let new = json!({"spec": {"nested": {"a": [1, 2]}, "field": 1}, "status": {"x": 2}});
        assert!(!specs_differ(&old, &new, "p").unwrap());
    }

    #[test]
    fn changed_spec_differs() {
        let old = json!({"spec": {"field": 1}});
        let new = json!({"spec": {"field": 2}});
        assert!(specs_differ(&old, &new, "p").unwrap());
    }
}
