//! Shared pod-spec synthesis.
//!
//! Every workload kind delegates here to turn a [`Task`] into the pod spec
//! its manifest embeds: container command/args/image, GPU and CPU resources,
//! claim/secret/config-map volumes, the identity environment variables, the
//! registry pull secret, and a `Never` restart policy.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, LocalObjectReference,
    PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec, ResourceRequirements, Secret,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{Api, Client};

use odin_core::task::{ConfigMapRef, SecretRef, Task};

/// Directory where the well-known secrets mount.
pub const SECRET_LOC: &str = "/etc/odind/";
/// Name of the cluster secret holding the orchestrator credential file.
pub const ODIN_CRED: &str = "odin-cred";
pub const ODIN_CRED_FILE: &str = "odin-cred.yml";
/// Name of the cluster secret holding the SSH identity.
pub const SSH_KEY: &str = "ssh-key";
pub const SSH_KEY_FILE: &str = "identity";
pub const SSH_MODE: i32 = 0o400;
pub const DEFAULT_MODE: i32 = 0o644;

/// Environment variable naming the task's child label.
pub const ODIN_TASK_ENV: &str = "ODIN_TASK_ID";
/// Environment variable naming the mounted credential file.
pub const ODIN_CRED_ENV: &str = "ODIN_CRED";

pub const REGISTRY_PULL_SECRET: &str = "registry";
pub const RESTART_NEVER: &str = "Never";

const SSH_CONFIG_MAP: &str = "ssh-config";
const CHORES_PREFIX: &str = "odin-chores";
const TOOLING_PREFIX: &str = "odin";

/// A secret mount with every field resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMount {
    pub name: String,
    pub path: String,
    pub sub_path: String,
    pub mode: i32,
}

/// Fill in the defaults of the well-known secrets; anything else must spell
/// out its own path.
pub fn populate_secret(secret: &SecretRef) -> SecretMount {
    let (default_path, default_sub, default_mode) = match secret.name.as_str() {
        ODIN_CRED => (
            format!("{SECRET_LOC}{ODIN_CRED_FILE}"),
            ODIN_CRED_FILE.to_string(),
            DEFAULT_MODE,
        ),
        SSH_KEY => (
            format!("{SECRET_LOC}{SSH_KEY_FILE}"),
            SSH_KEY_FILE.to_string(),
            SSH_MODE,
        ),
        _ => (String::new(), String::new(), DEFAULT_MODE),
    };
    SecretMount {
        name: secret.name.clone(),
        path: secret.path.clone().unwrap_or(default_path),
        sub_path: secret.sub_path.clone().unwrap_or(default_sub),
        mode: secret.mode.unwrap_or(default_mode),
    }
}

async fn secret_exists(client: &Client, namespace: &str, name: &str) -> bool {
    Api::<Secret>::namespaced(client.clone(), namespace)
        .get(name)
        .await
        .is_ok()
}

async fn config_map_exists(client: &Client, namespace: &str, name: &str) -> bool {
    Api::<ConfigMap>::namespaced(client.clone(), namespace)
        .get(name)
        .await
        .is_ok()
}

/// Combine the secrets the task asked for with the well-known ones the
/// orchestrator's own tooling needs. Missing well-known secrets are not
/// fatal.
pub async fn reference_secrets(client: &Client, namespace: &str, task: &Task) -> Vec<SecretMount> {
    let mut secrets: Vec<SecretMount> = task.secrets.iter().map(populate_secret).collect();
    let command = task.command.first().map(String::as_str).unwrap_or_default();
    if command.starts_with(TOOLING_PREFIX) {
        if secret_exists(client, namespace, ODIN_CRED).await {
            let cred = populate_secret(&SecretRef {
                name: ODIN_CRED.to_string(),
                path: None,
                sub_path: None,
                mode: None,
            });
            if !secrets.contains(&cred) {
                secrets.push(cred);
            }
        } else if !task.args.iter().any(|arg| arg == "--cred") {
            tracing::warn!(
                task = %task.name,
                "no --cred arg found and no odin-cred secret to populate the container"
            );
        }
    }
    if command.starts_with(CHORES_PREFIX) && secret_exists(client, namespace, SSH_KEY).await {
        let ssh = populate_secret(&SecretRef {
            name: SSH_KEY.to_string(),
            path: None,
            sub_path: None,
            mode: None,
        });
        if !secrets.contains(&ssh) {
            secrets.push(ssh);
        }
    }
    secrets
}

/// Combine requested config maps with the SSH client configuration needed by
/// the chores tooling when the cluster provides it.
pub async fn generate_config_maps(
    client: &Client,
    namespace: &str,
    task: &Task,
) -> Vec<ConfigMapRef> {
    let mut config_maps = task.config_maps.clone();
    let command = task.command.first().map(String::as_str).unwrap_or_default();
    if command.starts_with(CHORES_PREFIX) && config_map_exists(client, namespace, SSH_CONFIG_MAP).await
    {
        config_maps.push(ConfigMapRef {
            name: SSH_CONFIG_MAP.to_string(),
            path: "/etc/ssh/ssh_config".to_string(),
            sub_path: Some("ssh_config".to_string()),
        });
        config_maps.push(ConfigMapRef {
            name: SSH_CONFIG_MAP.to_string(),
            path: "/etc/ssh/ssh_known_hosts".to_string(),
            sub_path: Some("known_hosts".to_string()),
        });
    }
    config_maps
}

/// Convert a task into the pod spec a Kubernetes scheduler can run.
pub fn task_to_pod_spec(
    task: &Task,
    container_name: Option<&str>,
    secrets: &[SecretMount],
    config_maps: &[ConfigMapRef],
) -> PodSpec {
    let mut limits: BTreeMap<String, Quantity> = BTreeMap::new();
    let mut requests: BTreeMap<String, Quantity> = BTreeMap::new();
    if task.num_gpus > 0 {
        limits.insert("nvidia.com/gpu".to_string(), Quantity(task.num_gpus.to_string()));
    }
    if let Some(cpu) = &task.cpu {
        if let Some(limit) = &cpu.limits {
            limits.insert("cpu".to_string(), Quantity(limit.clone()));
        }
        if let Some(request) = &cpu.requests {
            requests.insert("cpu".to_string(), Quantity(request.clone()));
        }
    }

    let mut volume_mounts: Vec<VolumeMount> = task
        .mounts
        .iter()
        .map(|mount| VolumeMount {
            mount_path: mount.path.clone(),
            name: mount.name.clone(),
            ..Default::default()
        })
        .collect();
    volume_mounts.extend(secrets.iter().map(|secret| VolumeMount {
        mount_path: secret.path.clone(),
        name: secret.name.clone(),
        sub_path: Some(secret.sub_path.clone()),
        ..Default::default()
    }));
    volume_mounts.extend(config_maps.iter().map(|config_map| VolumeMount {
        mount_path: config_map.path.clone(),
        name: config_map.name.clone(),
        sub_path: config_map.sub_path.clone(),
        ..Default::default()
    }));

    let container = Container {
        name: container_name.unwrap_or(&task.name).to_string(),
        image: Some(task.image.clone()),
        command: Some(task.command.clone()),
        args: Some(task.args.clone()),
        image_pull_policy: Some(task.pull_policy.clone()),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        resources: Some(ResourceRequirements {
            limits: (!limits.is_empty()).then_some(limits),
            requests: (!requests.is_empty()).then_some(requests),
            ..Default::default()
        }),
        env: Some(vec![
            EnvVar {
                name: ODIN_TASK_ENV.to_string(),
                value: Some(task.name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: ODIN_CRED_ENV.to_string(),
                value: Some(format!("{SECRET_LOC}{ODIN_CRED_FILE}")),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let mut volumes: Vec<Volume> = task
        .mounts
        .iter()
        .map(|mount| Volume {
            name: mount.name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: mount.claim.clone(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    // One volume per secret name even when it is projected at several paths.
    let mut seen_secrets = BTreeMap::new();
    for secret in secrets {
        seen_secrets.insert(secret.name.clone(), secret.mode);
    }
    volumes.extend(seen_secrets.into_iter().map(|(name, mode)| Volume {
        name: name.clone(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(name),
            default_mode: Some(mode),
            ..Default::default()
        }),
        ..Default::default()
    }));
    let config_map_names: std::collections::BTreeSet<String> =
        config_maps.iter().map(|c| c.name.clone()).collect();
    volumes.extend(config_map_names.into_iter().map(|name| Volume {
        name: name.clone(),
        config_map: Some(ConfigMapVolumeSource {
            name: name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }));

    let security_context = task.security_context.as_ref().map(|ctx| PodSecurityContext {
        fs_group: ctx.fs_group,
        run_as_group: ctx.run_as_group,
        run_as_user: ctx.run_as_user,
        ..Default::default()
    });

    PodSpec {
        containers: vec![container],
        security_context,
        image_pull_secrets: Some(vec![LocalObjectReference {
            name: REGISTRY_PULL_SECRET.to_string(),
        }]),
        volumes: (!volumes.is_empty()).then_some(volumes),
        node_selector: task
            .node_selector
            .as_ref()
            .map(|selector| selector.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        restart_policy: Some(RESTART_NEVER.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odin_core::task::{CpuRequest, VolumeRef};
    use serde_json::json;

    fn task() -> Task {
        serde_json::from_value(json!({
            "name": "sst2-aaaj--train",
            "image": "example.com/trainer:latest",
            "command": ["odin-train"],
            "args": ["--config", "/data/config.yml"],
            "num_gpus": 2,
        }))
        .unwrap()
    }

    #[test]
    fn gpu_request_becomes_a_limit() {
        let spec = task_to_pod_spec(&task(), None, &[], &[]);
        let limits = spec.containers[0]
            .resources
            .as_ref()
            .unwrap()
            .limits
            .as_ref()
            .unwrap();
        assert_eq!(limits["nvidia.com/gpu"], Quantity("2".to_string()));
    }

    #[test]
    fn zero_gpus_request_nothing() {
        let mut t = task();
        t.num_gpus = 0;
        let spec = task_to_pod_spec(&t, None, &[], &[]);
        assert!(spec.containers[0]
            .resources
            .as_ref()
            .unwrap()
            .limits
            .is_none());
    }

    #[test]
    fn cpu_passes_through() {
        let mut t = task();
        t.cpu = Some(CpuRequest {
            limits: Some("2000m".to_string()),
            requests: Some("500m".to_string()),
        });
        let spec = task_to_pod_spec(&t, None, &[], &[]);
        let resources = spec.containers[0].resources.as_ref().unwrap();
        assert_eq!(
            resources.limits.as_ref().unwrap()["cpu"],
            Quantity("2000m".to_string())
        );
        assert_eq!(
            resources.requests.as_ref().unwrap()["cpu"],
            Quantity("500m".to_string())
        );
    }

    #[test]
    fn identity_env_vars_are_always_injected() {
        let spec = task_to_pod_spec(&task(), None, &[], &[]);
        let env = spec.containers[0].env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|var| var.name == ODIN_TASK_ENV && var.value.as_deref() == Some("sst2-aaaj--train")));
        assert!(env
            .iter()
            .any(|var| var.name == ODIN_CRED_ENV
                && var.value.as_deref() == Some("/etc/odind/odin-cred.yml")));
    }

    #[test]
    fn mounts_become_claim_volumes() {
        let mut t = task();
        t.mounts = vec![VolumeRef {
            name: "data".to_string(),
            path: "/data".to_string(),
            claim: "data-claim".to_string(),
        }];
        let spec = task_to_pod_spec(&t, None, &[], &[]);
        let volumes = spec.volumes.as_ref().unwrap();
        assert_eq!(
            volumes[0]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "data-claim"
        );
        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/data");
    }

    #[test]
    fn well_known_secret_defaults() {
        let cred = populate_secret(&SecretRef {
            name: ODIN_CRED.to_string(),
            path: None,
            sub_path: None,
            mode: None,
        });
        assert_eq!(cred.path, "/etc/odind/odin-cred.yml");
        assert_eq!(cred.sub_path, "odin-cred.yml");
        assert_eq!(cred.mode, 0o644);

        let ssh = populate_secret(&SecretRef {
            name: SSH_KEY.to_string(),
            path: None,
            sub_path: None,
            mode: None,
        });
        assert_eq!(ssh.path, "/etc/odind/identity");
        assert_eq!(ssh.mode, 0o400);
    }

    #[test]
    fn restart_policy_and_pull_secret() {
        let spec = task_to_pod_spec(&task(), None, &[], &[]);
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            spec.image_pull_secrets.as_ref().unwrap()[0].name,
            "registry"
        );
    }

    #[test]
    fn container_name_defaults_to_task_name() {
        let spec = task_to_pod_spec(&task(), None, &[], &[]);
        assert_eq!(spec.containers[0].name, "sst2-aaaj--train");
        let spec = task_to_pod_spec(&task(), Some("pytorch"), &[], &[]);
        assert_eq!(spec.containers[0].name, "pytorch");
    }
}
