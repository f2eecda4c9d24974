//! Pod wire model
//!
//! The subset of the cluster's pod object the sandbox engine reads and
//! writes. Field names follow the cluster's camelCase JSON; anything not
//! modelled here is ignored on read and omitted on write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Pod".to_string()
}

impl Pod {
    pub fn new(metadata: ObjectMeta, spec: PodSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    /// Current phase, `Pending` when the status has not been filled in yet
    pub fn phase(&self) -> PodPhase {
        self.status
            .as_ref()
            .map(|s| PodPhase::parse(&s.phase))
            .unwrap_or(PodPhase::Pending)
    }

    /// Exit code of a terminated container, if it has one
    pub fn terminated_exit_code(&self, container: &str) -> Option<i32> {
        self.status
            .as_ref()?
            .container_statuses
            .iter()
            .find(|s| s.name == container)?
            .state
            .terminated
            .as_ref()
            .map(|t| t.exit_code)
    }

    /// Why a failed pod never ran its main container
    ///
    /// Prefers the first init container that exited non-zero, then the
    /// pod's own reason and message.
    pub fn failure_reason(&self) -> String {
        let Some(status) = &self.status else {
            return "pod failed without status".to_string();
        };
        let init = status.init_container_statuses.iter().find_map(|s| {
            let terminated = s.state.terminated.as_ref().filter(|t| t.exit_code != 0)?;
            let mut reason = format!(
                "init container {} exited with code {}",
                s.name, terminated.exit_code
            );
            if !terminated.reason.is_empty() {
                reason.push_str(&format!(" ({})", terminated.reason));
            }
            Some(reason)
        });
        if let Some(reason) = init {
            return reason;
        }
        match (status.reason.as_str(), status.message.as_str()) {
            ("", "") => "pod failed before its containers started".to_string(),
            (reason, "") => reason.to_string(),
            ("", message) => message.to_string(),
            (reason, message) => format!("{}: {}", reason, message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Variable populated from a key of a cluster secret
    pub fn secret(name: impl Into<String>, secret: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.into(),
                    key: key.into(),
                }),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeySelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
}

impl Volume {
    pub fn empty_dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
        }
    }

    /// Memory-backed scratch volume capped at `size_limit`
    pub fn memory(name: impl Into<String>, size_limit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                size_limit: Some(size_limit.into()),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirVolumeSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_privilege_escalation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    pub effect: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_container_statuses: Vec<ContainerStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ContainerStateTerminated>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateTerminated {
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Lifecycle phase of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(value: &str) -> Self {
        match value {
            "" | "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Kind of change carried by a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
    #[serde(other)]
    Unknown,
}

/// One line of a watch stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    #[serde(default)]
    pub object: serde_json::Value,
}

impl WatchEvent {
    /// Decodes the event object as a pod
    ///
    /// `ERROR` events carry a status object instead and yield `None`.
    pub fn pod(&self) -> Option<Pod> {
        if self.event_type == WatchEventType::Error {
            return None;
        }
        serde_json::from_value(self.object.clone()).ok()
    }

    /// Message of an `ERROR` event
    pub fn error_message(&self) -> Option<String> {
        if self.event_type != WatchEventType::Error {
            return None;
        }
        Some(
            self.object
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("watch error")
                .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_serializes_camel_case_and_skips_empty() {
        let mut metadata = ObjectMeta {
            name: "sandbox-run-1".to_string(),
            ..Default::default()
        };
        metadata
            .labels
            .insert("app".to_string(), "sandrun-sandbox".to_string());

        let spec = PodSpec {
            restart_policy: "Never".to_string(),
            active_deadline_seconds: Some(900),
            containers: vec![Container {
                name: "runner".to_string(),
                image: "runner:latest".to_string(),
                ..Default::default()
            }],
            volumes: vec![Volume::memory("shm", "2Gi")],
            ..Default::default()
        };

        let json = serde_json::to_value(Pod::new(metadata, spec)).unwrap();
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["kind"], "Pod");
        assert_eq!(json["spec"]["restartPolicy"], "Never");
        assert_eq!(json["spec"]["activeDeadlineSeconds"], 900);
        assert_eq!(json["spec"]["volumes"][0]["emptyDir"]["medium"], "Memory");
        assert_eq!(json["spec"]["volumes"][0]["emptyDir"]["sizeLimit"], "2Gi");
        assert!(json["spec"].get("initContainers").is_none());
        assert!(json.get("status").is_none());
    }

    #[test]
    fn test_watch_event_decodes_failed_pod_exit_code() {
        let line = r#"{"type":"MODIFIED","object":{"metadata":{"name":"p"},
            "status":{"phase":"Failed","containerStatuses":[
                {"name":"runner","state":{"terminated":{"exitCode":3,"reason":"Error"}}}]}}}"#;
        let event: WatchEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.event_type, WatchEventType::Modified);

        let pod = event.pod().unwrap();
        assert_eq!(pod.phase(), PodPhase::Failed);
        assert_eq!(pod.terminated_exit_code("runner"), Some(3));
        assert_eq!(pod.terminated_exit_code("init"), None);
    }

    #[test]
    fn test_failure_reason_names_failed_init_container() {
        let line = r#"{"type":"MODIFIED","object":{"metadata":{"name":"p"},
            "status":{"phase":"Failed","initContainerStatuses":[
                {"name":"init-scripts","state":{"terminated":{"exitCode":8,"reason":"Error"}}}]}}}"#;
        let pod = serde_json::from_str::<WatchEvent>(line).unwrap().pod().unwrap();
        assert_eq!(pod.terminated_exit_code("runner"), None);
        assert_eq!(
            pod.failure_reason(),
            "init container init-scripts exited with code 8 (Error)"
        );

        let pod = Pod {
            status: Some(PodStatus {
                phase: "Failed".to_string(),
                reason: "Evicted".to_string(),
                message: "node ran low on memory".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(pod.failure_reason(), "Evicted: node ran low on memory");
    }

    #[test]
    fn test_watch_event_error_and_unknown_types() {
        let event: WatchEvent =
            serde_json::from_str(r#"{"type":"ERROR","object":{"message":"too old"}}"#).unwrap();
        assert!(event.pod().is_none());
        assert_eq!(event.error_message().as_deref(), Some("too old"));

        let event: WatchEvent = serde_json::from_str(r#"{"type":"WEIRD","object":{}}"#).unwrap();
        assert_eq!(event.event_type, WatchEventType::Unknown);
    }

    #[test]
    fn test_secret_env_var_shape() {
        let json = serde_json::to_value(EnvVar::secret("TOKEN", "creds", "token")).unwrap();
        assert_eq!(json["valueFrom"]["secretKeyRef"]["name"], "creds");
        assert!(json.get("value").is_none());
    }
}
