//! Prints the NooBaa CustomResourceDefinition as YAML

use kube::CustomResourceExt;
use noobaa_operator::{NooBaa, Result};

fn main() -> Result<()> {
    print!("{}", serde_yaml::to_string(&NooBaa::crd())?);
    Ok(())
}
