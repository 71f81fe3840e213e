use kube::CustomResourceExt;
use rayjob_types::*;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/ray.io_rayjob_crd.yaml",
        serde_yaml::to_string(&RayJob::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/ray.io_raycluster_crd.yaml",
        serde_yaml::to_string(&RayCluster::crd()).unwrap(),
    )
    .unwrap();
}
