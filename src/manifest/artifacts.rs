//! Fixed table of artifact types a build manifest can describe.

/// Artifact type names recognised in `meta.json`, lower-cased.
///
/// `extensions` is listed here even though its entry lives at the top level
/// of `meta.json` rather than under `images`.
pub const ARTIFACT_TYPES: &[&str] = &[
    "aliyun",
    "applehv",
    "aws",
    "azure",
    "azurestack",
    "dasd",
    "digitalocean",
    "exoscale",
    "extensions",
    "gcp",
    "hyperv",
    "ibmcloud",
    "initramfs",
    "iso",
    "kernel",
    "kubevirt",
    "live-initramfs",
    "live-iso",
    "live-kernel",
    "live-rootfs",
    "metal",
    "metal4k",
    "nutanix",
    "openstack",
    "ostree",
    "powervs",
    "qemu",
    "qemu-secex",
    "vmware",
    "vultr",
];

/// Returns `true` if `name` is a known artifact type (case-insensitive).
#[must_use]
pub fn is_known(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ARTIFACT_TYPES.binary_search(&lower.as_str()).is_ok()
}
