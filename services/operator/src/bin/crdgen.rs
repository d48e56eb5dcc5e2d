//! Prints the `HpaScaler` CustomResourceDefinition as YAML-compatible JSON.

use hpascale_operator::HpaScaler;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&HpaScaler::crd())?);
    Ok(())
}
