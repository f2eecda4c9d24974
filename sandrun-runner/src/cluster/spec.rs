//! Sandbox pod construction
//!
//! One pod per job. An init container fetches and unpacks the bundle into a
//! shared `workspace` volume; the main container installs dependencies, runs
//! the tests, copies reports into a `results` volume, pushes that volume to
//! the artifact store and exits with the test runner's exit code.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sandrun_client::pod::{
    Capabilities, Container, EnvVar, ObjectMeta, Pod, PodSecurityContext, PodSpec,
    ResourceRequirements, SecurityContext, Toleration, Volume, VolumeMount,
};
use sandrun_core::domain::artifact::ArtifactLayout;
use sandrun_core::domain::request::{BundleLocation, ExecutionRequest};
use sandrun_core::domain::resources::ResourceLimits;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::args::{shell_join, shell_quote, test_args};
use crate::config::ClusterConfig;

pub const INIT_CONTAINER: &str = "init-scripts";
pub const MAIN_CONTAINER: &str = "playwright";

const APP_LABEL: &str = "sandrun-sandbox";
const POD_NAME_PREFIX: &str = "sandbox-";
const MAX_NAME_LEN: usize = 63;
const SANDBOX_UID: i64 = 1000;

/// Deterministic pod name for a run
///
/// Lower-cased, non-alphanumerics folded to `-`, capped at 63 characters.
pub fn pod_name(run_id: &str) -> String {
    let mut name = String::from(POD_NAME_PREFIX);
    for c in run_id.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    name.truncate(MAX_NAME_LEN);
    name.trim_end_matches('-').to_string()
}

/// Label values: `[A-Za-z0-9._-]`, alphanumeric at both ends, at most 63
fn label_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    cleaned
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Cluster-wide pod settings
#[derive(Debug, Clone)]
pub struct PodTemplate {
    pub cluster: ClusterConfig,
    /// Bucket for bare bundle keys and uploaded results
    pub bucket: String,
}

impl PodTemplate {
    pub fn new(cluster: ClusterConfig, bucket: impl Into<String>) -> Self {
        Self {
            cluster,
            bucket: bucket.into(),
        }
    }

    /// Builds the pod for one job
    ///
    /// Fails for bundles on the local filesystem, which a pod cannot reach.
    pub fn build(
        &self,
        request: &ExecutionRequest,
        limits: &ResourceLimits,
        timeout: Duration,
        created_at: DateTime<Utc>,
    ) -> Result<Pod> {
        let (bundle_bucket, bundle_key) = match request.bundle() {
            BundleLocation::Remote { bucket, key } => {
                (bucket.unwrap_or_else(|| self.bucket.clone()), key)
            }
            BundleLocation::Local(path) => anyhow::bail!(
                "cluster sandboxes need a blob-store bundle, got local path {}",
                path.display()
            ),
        };

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), APP_LABEL.to_string());
        labels.insert("tenant".to_string(), label_value(&request.tenant_id));
        labels.insert("run".to_string(), label_value(&request.run_id));
        labels.insert("tier".to_string(), request.tier.as_str().to_string());
        labels.insert("project".to_string(), label_value(&request.project_id));

        let mut annotations = BTreeMap::new();
        annotations.insert(
            "sandrun.io/timeout".to_string(),
            format!("{}s", timeout.as_secs()),
        );
        annotations.insert(
            "sandrun.io/created-at".to_string(),
            created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        annotations.insert(
            "sandrun.io/target-url".to_string(),
            request.target_url.clone(),
        );

        let mut node_selector = BTreeMap::new();
        if let Some((key, value)) = &self.cluster.node_selector {
            node_selector.insert(key.clone(), value.clone());
        }

        let metadata = ObjectMeta {
            name: pod_name(&request.run_id),
            namespace: self.cluster.namespace.clone(),
            labels,
            annotations,
        };

        let spec = PodSpec {
            restart_policy: "Never".to_string(),
            active_deadline_seconds: Some(timeout.as_secs().max(1)),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                run_as_user: Some(SANDBOX_UID),
                fs_group: Some(SANDBOX_UID),
            }),
            init_containers: vec![self.init_container(&bundle_bucket, &bundle_key)],
            containers: vec![self.main_container(request, limits)],
            volumes: vec![
                Volume::empty_dir("workspace"),
                Volume::empty_dir("results"),
                Volume::memory("shm", "2Gi"),
            ],
            tolerations: vec![Toleration {
                key: self.cluster.node_taint.clone(),
                operator: "Equal".to_string(),
                value: "true".to_string(),
                effect: "NoSchedule".to_string(),
            }],
            node_selector,
        };

        Ok(Pod::new(metadata, spec))
    }

    fn store_env(&self) -> Vec<EnvVar> {
        vec![
            EnvVar::secret("STORE_ENDPOINT", &self.cluster.artifact_secret, "endpoint"),
            EnvVar::secret("STORE_TOKEN", &self.cluster.artifact_secret, "token"),
        ]
    }

    fn init_container(&self, bucket: &str, key: &str) -> Container {
        let script = r#"set -e
wget -q --header "Authorization: Bearer $STORE_TOKEN" -O /workspace/scripts.zip "$STORE_ENDPOINT/$SCRIPTS_BUCKET/$SCRIPTS_PATH"
cd /workspace
unzip -o -q scripts.zip
rm -f scripts.zip
ls -la /workspace
"#;

        let mut env = self.store_env();
        env.push(EnvVar::value("SCRIPTS_BUCKET", bucket));
        env.push(EnvVar::value("SCRIPTS_PATH", key));

        let mut limits = BTreeMap::new();
        limits.insert("cpu".to_string(), "500m".to_string());
        limits.insert("memory".to_string(), "512Mi".to_string());

        Container {
            name: INIT_CONTAINER.to_string(),
            image: self.cluster.init_image.clone(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            env,
            volume_mounts: vec![mount("workspace", "/workspace")],
            resources: ResourceRequirements {
                requests: BTreeMap::new(),
                limits,
            },
            security_context: Some(restricted()),
            ..Default::default()
        }
    }

    fn main_container(&self, request: &ExecutionRequest, limits: &ResourceLimits) -> Container {
        let layout = ArtifactLayout::new(&request.tenant_id, &request.run_id);

        let mut env = vec![
            EnvVar::value("CI", "true"),
            EnvVar::value("BASE_URL", &request.target_url),
            EnvVar::value("TEST_ENV", &request.environment),
            EnvVar::value("SANDBOX_RUN_ID", &request.run_id),
            EnvVar::value("RESULTS_BUCKET", &self.bucket),
            EnvVar::value("RESULTS_PATH", layout.uploaded_results_prefix()),
        ];
        env.extend(self.store_env());

        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), limits.cpu_request_quantity());
        requests.insert("memory".to_string(), limits.memory_request_quantity());
        let mut caps = BTreeMap::new();
        caps.insert("cpu".to_string(), limits.cpu_limit_quantity());
        caps.insert("memory".to_string(), limits.memory_limit_quantity());

        Container {
            name: MAIN_CONTAINER.to_string(),
            image: self.cluster.runner_image.clone(),
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                main_script(request),
            ],
            working_dir: "/workspace".to_string(),
            env,
            volume_mounts: vec![
                mount("workspace", "/workspace"),
                mount("results", "/results"),
                mount("shm", "/dev/shm"),
            ],
            resources: ResourceRequirements {
                requests,
                limits: caps,
            },
            security_context: Some(restricted()),
            ..Default::default()
        }
    }
}

/// Shell script for the main container
///
/// Keeps going after a failed test step so reports are still uploaded, and
/// exits with the test step's code.
pub fn main_script(request: &ExecutionRequest) -> String {
    let test_command = shell_join(&test_args(request, "json,list"));
    let browser = shell_quote(request.browser.as_str());

    format!(
        r#"cd /workspace
if [ ! -f package.json ] && [ "$(ls -1 | wc -l)" -eq 1 ] && [ -d "$(ls -1)" ]; then cd "$(ls -1)"; fi
npm ci --prefer-offline || npm install || echo "dependency installation failed"
npx playwright install {browser} || echo "browser install failed, continuing"
mkdir -p /results
PLAYWRIGHT_JSON_OUTPUT_NAME=/results/results.json npx {test_command}
EXIT_CODE=$?
cp -r test-results /results/ 2>/dev/null || true
cp -r playwright-report /results/ 2>/dev/null || true
cd /results
find . -type f | while read -r f; do
  curl -sS -f -X PUT -H "Authorization: Bearer $STORE_TOKEN" --data-binary "@$f" "$STORE_ENDPOINT/$RESULTS_BUCKET/$RESULTS_PATH/${{f#./}}" || echo "upload failed: $f"
done
exit $EXIT_CODE
"#
    )
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
    }
}

fn restricted() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: vec!["ALL".to_string()],
        }),
    }
}
