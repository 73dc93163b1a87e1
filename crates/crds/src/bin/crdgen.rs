//! Prints the PodNet CRDs as multi-document YAML.

use crds::{IPInstance, Network, Subnet};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [IPInstance::crd(), Network::crd(), Subnet::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
