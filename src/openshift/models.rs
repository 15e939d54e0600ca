//! Light views over `oc ... -o json` output.
//!
//! Every field is defaulted; a missing key reads as empty instead of failing the parse.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PodStatus {
    pub phase: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub status: PodStatus,
}

impl Pod {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn phase(&self) -> &str {
        &self.status.phase
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PodList {
    pub items: Vec<Pod>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    #[serde(rename = "clusterIP")]
    pub cluster_ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Service {
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
}

impl Service {
    /// Cluster IP, `None` when absent or empty.
    pub fn cluster_ip(&self) -> Option<&str> {
        self.spec.cluster_ip.as_deref().filter(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouteTarget {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouteSpec {
    pub host: String,
    pub to: RouteTarget,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Route {
    pub metadata: ObjectMeta,
    pub spec: RouteSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouteList {
    pub items: Vec<Route>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagSource {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagReference {
    pub name: Option<String>,
    pub from: Option<TagSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageStreamSpec {
    pub tags: Option<Vec<TagReference>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageStream {
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ImageStreamSpec,
}

impl ImageStream {
    /// True when some tag name contains `version`.
    pub fn has_tag_containing(&self, version: &str) -> bool {
        self.tags()
            .filter_map(|t| t.name.as_deref())
            .any(|n| n.contains(version))
    }

    pub fn tags(&self) -> impl Iterator<Item = &TagReference> {
        self.spec.tags.iter().flatten()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageStreamList {
    pub items: Vec<ImageStream>,
}

/// Pod manifest for the long-sleeping `command-app` used to run probes inside the cluster.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAppPod {
    api_version: &'static str,
    kind: &'static str,
    metadata: CommandAppMeta,
    spec: CommandAppSpec,
}

#[derive(Debug, Clone, Serialize)]
struct CommandAppMeta {
    name: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandAppSpec {
    restart_policy: &'static str,
    containers: Vec<CommandAppContainer>,
}

#[derive(Debug, Clone, Serialize)]
struct CommandAppContainer {
    name: &'static str,
    image: String,
    command: Vec<&'static str>,
    args: Vec<&'static str>,
}

pub const COMMAND_APP_NAME: &str = "command-app";

impl CommandAppPod {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            api_version: "v1",
            kind: "Pod",
            metadata: CommandAppMeta {
                name: COMMAND_APP_NAME,
            },
            spec: CommandAppSpec {
                restart_policy: "OnFailure",
                containers: vec![CommandAppContainer {
                    name: "command-container",
                    image: image.into(),
                    command: vec!["sleep"],
                    args: vec!["3h"],
                }],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_default() {
        let pods: PodList = serde_json::from_str(r#"{"items":[{"metadata":{"name":"a"}},{}]}"#).expect("parse");
        assert_eq!(pods.items.len(), 2);
        assert_eq!(pods.items[0].name(), "a");
        assert_eq!(pods.items[0].phase(), "");
        let svc: Service = serde_json::from_str(r#"{"spec":{"clusterIP":""}}"#).expect("parse");
        assert_eq!(svc.cluster_ip(), None);
        let empty: PodList = serde_json::from_str("{}").expect("parse");
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_imagestream_tags() {
        let is: ImageStream = serde_json::from_str(
            r#"{"kind":"ImageStream","metadata":{"name":"nodejs"},"spec":{"tags":[{"name":"16-ubi8"},{"from":{}}]}}"#,
        )
        .expect("parse");
        assert!(is.has_tag_containing("16"));
        assert!(!is.has_tag_containing("18"));
    }

    #[test]
    fn test_command_app_yaml() {
        let yaml = serde_yaml::to_string(&CommandAppPod::new("ubi8/ubi")).expect("yaml");
        assert!(yaml.contains("apiVersion: v1"));
        assert!(yaml.contains("restartPolicy: OnFailure"));
        assert!(yaml.contains("image: ubi8/ubi"));
    }
}
