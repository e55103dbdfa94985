use kube::CustomResourceExt;

use ingress_conductor::resources::{VirtualServer, VirtualServerRoute};

fn main() {
    print!(
        "{}---\n{}",
        serde_yaml::to_string(&VirtualServer::crd()).unwrap(),
        serde_yaml::to_string(&VirtualServerRoute::crd()).unwrap()
    )
}
