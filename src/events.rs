use std::fmt;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;

use crate::resources::{VirtualServer, VirtualServerRoute};

/// The resource kinds this controller watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Ingress,
    Secret,
    Namespace,
    VirtualServer,
    VirtualServerRoute,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Secret => "Secret",
            ResourceKind::Namespace => "Namespace",
            ResourceKind::VirtualServer => "VirtualServer",
            ResourceKind::VirtualServerRoute => "VirtualServerRoute",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed sum over every watched kind, so delete payloads and tombstones can
/// carry any of them without unchecked downcasts.
#[derive(Clone, Debug)]
pub enum WatchedObject {
    Ingress(Ingress),
    Secret(Secret),
    Namespace(Namespace),
    VirtualServer(VirtualServer),
    VirtualServerRoute(VirtualServerRoute),
}

impl WatchedObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            WatchedObject::Ingress(_) => ResourceKind::Ingress,
            WatchedObject::Secret(_) => ResourceKind::Secret,
            WatchedObject::Namespace(_) => ResourceKind::Namespace,
            WatchedObject::VirtualServer(_) => ResourceKind::VirtualServer,
            WatchedObject::VirtualServerRoute(_) => ResourceKind::VirtualServerRoute,
        }
    }
}

/// Delivered on Delete when the object was evicted from the local cache before
/// the deletion notice arrived; carries the last known value.
#[derive(Clone, Debug)]
pub struct Tombstone {
    pub last_known: WatchedObject,
}

/// Payload of a Delete notification.
#[derive(Clone, Debug)]
pub enum DeletePayload {
    Object(WatchedObject),
    Tombstone(Tombstone),
}

/// A watch notification for one kind. Delete payloads stay untyped because a
/// tombstone may hold anything the watch source last saw.
#[derive(Clone, Debug)]
pub enum RawEvent<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(DeletePayload),
}

/// Verdict for a delete notification whose object could not be recovered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DroppedEvent {
    pub expected: ResourceKind,
    pub found: ResourceKind,
    pub reason: &'static str,
}

impl fmt::Display for DroppedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (expected {}, found {})",
            self.reason, self.expected, self.found
        )
    }
}

/// A watched kind, convertible to and from the closed sum.
pub trait Watched: Sized {
    const KIND: ResourceKind;

    /// Extracts `Self`, handing the object back on a kind mismatch.
    fn from_watched(obj: WatchedObject) -> Result<Self, WatchedObject>;
    fn into_watched(self) -> WatchedObject;
}

macro_rules! impl_watched {
    ($ty:ty, $variant:ident) => {
        impl Watched for $ty {
            const KIND: ResourceKind = ResourceKind::$variant;

            fn from_watched(obj: WatchedObject) -> Result<Self, WatchedObject> {
                match obj {
                    WatchedObject::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }

            fn into_watched(self) -> WatchedObject {
                WatchedObject::$variant(self)
            }
        }
    };
}

impl_watched!(Ingress, Ingress);
impl_watched!(Secret, Secret);
impl_watched!(Namespace, Namespace);
impl_watched!(VirtualServer, VirtualServer);
impl_watched!(VirtualServerRoute, VirtualServerRoute);

/// Recovers the deleted object of the expected kind from a delete payload,
/// unwrapping a tombstone if the cache had already evicted the live object.
pub fn resolve<K: Watched>(raw: DeletePayload) -> Result<K, DroppedEvent> {
    match raw {
        DeletePayload::Object(obj) => K::from_watched(obj).map_err(|other| DroppedEvent {
            expected: K::KIND,
            found: other.kind(),
            reason: "unexpected object kind",
        }),
        DeletePayload::Tombstone(Tombstone { last_known }) => {
            K::from_watched(last_known).map_err(|other| DroppedEvent {
                expected: K::KIND,
                found: other.kind(),
                reason: "tombstone held unexpected kind",
            })
        }
    }
}

/// Cache key of an object: "namespace/name" for namespaced kinds, "name" for
/// cluster-scoped ones.
pub fn object_key<K: ResourceExt>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}
