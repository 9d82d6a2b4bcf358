//! Prints the CRD manifests as YAML.
//!
//! `cargo run -p crds --bin crdgen > config/crd.yaml`

use crds::AddressPool;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&AddressPool::crd())?);
    Ok(())
}
