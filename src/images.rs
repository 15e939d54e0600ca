//! Registry and image-name helpers.
//!
//! These functions only compose strings; they never pull or inspect anything.

pub const RED_HAT_REGISTRY: &str = "registry.redhat.io";
pub const QUAY_REGISTRY: &str = "quay.io";
pub const DOCKER_HUB_REGISTRY: &str = "docker.io";

/// `registry.redhat.io` for rhel* systems, `quay.io` otherwise.
pub fn registry_from_os(os_name: &str) -> &'static str {
    if os_name.starts_with("rhel") {
        RED_HAT_REGISTRY
    } else {
        QUAY_REGISTRY
    }
}

/// Public pull spec for an sclorg image; dots are dropped from the version.
pub fn get_public_image_name(os_name: &str, base_image_name: &str, version: &str) -> String {
    let registry = registry_from_os(os_name);
    let version = version.replace('.', "");
    match os_name {
        "rhel8" | "rhel9" | "rhel10" => format!("{registry}/{os_name}/{base_image_name}-{version}"),
        "c9s" | "c10s" => format!("{registry}/sclorg/{base_image_name}-{version}-{os_name}"),
        _ => format!("{registry}/sclorg/{base_image_name}-{version}"),
    }
}

/// Registry used by the older rhscl/centos7 naming scheme.
pub fn legacy_registry_name(os_name: &str) -> &'static str {
    if os_name.starts_with("rhel") {
        RED_HAT_REGISTRY
    } else {
        DOCKER_HUB_REGISTRY
    }
}

/// Pull spec under the older rhscl/centos7 naming scheme.
pub fn legacy_public_image_name(os_name: &str, base_image_name: &str, version: &str) -> String {
    let registry = legacy_registry_name(os_name);
    match os_name {
        "rhel7" => format!("{registry}/rhscl/{base_image_name}-{version}-rhel7"),
        "rhel8" => format!("{registry}/rhel8/{base_image_name}-{version}"),
        _ => format!("{registry}/centos/{base_image_name}-{version}-centos7"),
    }
}

fn short_image_name(image_name: &str) -> Option<&str> {
    let last = image_name.rsplit('/').next()?;
    let name = last.split(':').next()?;
    (!name.is_empty()).then_some(name)
}

/// `rhel8/httpd-24:1` + `2.4` => `httpd-24:2.4`.
pub fn get_tagged_image(image_name: &str, version: &str) -> Option<String> {
    short_image_name(image_name).map(|name| format!("{name}:{version}"))
}

/// `rhel8/httpd-24:1` => `httpd-24-testing`.
pub fn get_service_image(image_name: &str) -> Option<String> {
    short_image_name(image_name).map(|name| format!("{name}-testing"))
}
