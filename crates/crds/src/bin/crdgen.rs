//! Prints the FloatingIP CRD manifest.
//!
//! The TApp CRD is owned by tapp-controller and is not generated here.
//!
//! ```text
//! cargo run -p crds --bin crdgen > deploy/crds/floatingip.yaml
//! ```

use crds::FloatingIP;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&FloatingIP::crd())?);
    Ok(())
}
