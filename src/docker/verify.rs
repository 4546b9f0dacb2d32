//! Post-build inspection of a final image
//!
//! Static facts (PATH, command, workdir, labels) come from the image config.
//! The package inventory and installer presence come from a short-lived,
//! network-less container running the image's own interpreter.

use super::client::is_not_found;
use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::manifest::{normalize_name, Manifest};
use crate::pipeline::LABEL_BUILDER_DIGEST;
use crate::recipe::{entry_command, EnvironmentSpec, Installer};
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const INVENTORY_TIMEOUT: Duration = Duration::from_secs(120);

/// Prints the interpreter prefix, installed distributions and where each
/// named tool can be found, as one JSON document.
const INVENTORY_SCRIPT: &str = r#"
import json, os, shutil, sys
from importlib import metadata
env, tools = sys.argv[1], sys.argv[2:]
packages = {}
for dist in metadata.distributions():
    name = dist.metadata["Name"]
    if name:
        packages[name] = dist.version
found = {}
for tool in tools:
    found[tool] = {
        "in_env": os.path.exists(os.path.join(env, "bin", tool)),
        "on_path": shutil.which(tool),
    }
print(json.dumps({"prefix": sys.prefix, "packages": packages, "tools": found}))
"#;

/// What a correctly built image looks like
#[derive(Debug, Clone)]
pub struct Expectations {
    pub environment: EnvironmentSpec,
    pub workdir: String,
    pub command: Vec<String>,
    pub installer: Installer,
    /// Normalized name -> pinned version
    pub pins: BTreeMap<String, String>,
}

impl Expectations {
    pub fn from_config(config: &BuildConfig, manifest: Option<&Manifest>) -> Self {
        let pins = manifest
            .map(|m| {
                m.pinned()
                    .filter_map(|r| r.pinned_version().map(|v| (r.name.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            environment: EnvironmentSpec::new(config.env_path()),
            workdir: config.workdir.clone(),
            command: entry_command(&config.entry),
            installer: config.installer,
            pins,
        }
    }
}

/// Configuration baked into the image
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageFacts {
    pub id: String,
    pub env: BTreeMap<String, String>,
    pub cmd: Vec<String>,
    pub workdir: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolPresence {
    pub in_env: bool,
    pub on_path: Option<String>,
}

/// Result of the inventory script
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Inventory {
    pub prefix: String,
    pub packages: BTreeMap<String, String>,
    pub tools: BTreeMap<String, ToolPresence>,
}

impl Inventory {
    pub fn version_of(&self, name: &str) -> Option<&str> {
        let wanted = normalize_name(name);
        self.packages
            .iter()
            .find(|(n, _)| normalize_name(n) == wanted)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub image: String,
    pub image_id: String,
    pub packages: usize,
    pub checks: Vec<Check>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

pub struct ImageVerifier {
    client: Docker,
}

impl ImageVerifier {
    pub fn new(client: Docker) -> Self {
        Self { client }
    }

    pub async fn verify(
        &self,
        image: &str,
        expected: &Expectations,
    ) -> Result<VerifyReport, BuildError> {
        let facts = self.inspect(image).await?;
        info!("Verifying {} ({})", image, facts.id);

        let inventory = self.inventory(image, expected).await?;
        debug!(
            packages = inventory.packages.len(),
            prefix = %inventory.prefix,
            "Collected inventory"
        );

        Ok(VerifyReport {
            image: image.to_string(),
            image_id: facts.id.clone(),
            packages: inventory.packages.len(),
            checks: evaluate(expected, &facts, &inventory),
        })
    }

    pub async fn inspect(&self, image: &str) -> Result<ImageFacts, BuildError> {
        let inspect = match self.client.inspect_image(image).await {
            Ok(inspect) => inspect,
            Err(err) if is_not_found(&err) => {
                return Err(BuildError::ImageMissing {
                    image: image.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        let config = inspect.config.unwrap_or_default();
        let env = config
            .env
            .unwrap_or_default()
            .into_iter()
            .filter_map(|kv| {
                kv.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();

        Ok(ImageFacts {
            id: inspect.id.unwrap_or_default(),
            env,
            cmd: config.cmd.unwrap_or_default(),
            workdir: config.working_dir.unwrap_or_default(),
            labels: config.labels.unwrap_or_default().into_iter().collect(),
        })
    }

    /// Runs the inventory script inside the image and parses its output
    pub async fn inventory(
        &self,
        image: &str,
        expected: &Expectations,
    ) -> Result<Inventory, BuildError> {
        let name = format!("stagebox-verify-{}", Uuid::new_v4());
        let mut cmd = vec![
            "python".to_string(),
            "-c".to_string(),
            INVENTORY_SCRIPT.to_string(),
            expected.environment.path.clone(),
        ];
        cmd.extend(expected.installer.executables().iter().map(|s| s.to_string()));

        let body = ContainerCreateBody {
            image: Some(image.to_string()),
            cmd: Some(cmd),
            entrypoint: Some(Vec::new()),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                readonly_rootfs: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptionsBuilder::new().name(&name).build();
        self.client.create_container(Some(options), body).await?;

        let result = self.collect_output(&name).await;

        let remove = RemoveContainerOptionsBuilder::new().force(true).build();
        if let Err(err) = self.client.remove_container(&name, Some(remove)).await {
            debug!("Could not remove container '{}': {}", name, err);
        }

        let (exit_code, stdout, stderr) = result?;
        parse_inventory(exit_code, &stdout, &stderr)
    }

    async fn collect_output(
        &self,
        name: &str,
    ) -> Result<(Option<i64>, String, String), BuildError> {
        let attach = AttachContainerOptionsBuilder::new()
            .stream(true)
            .stdout(true)
            .stderr(true)
            .logs(true)
            .build();
        let mut attached = self.client.attach_container(name, Some(attach)).await?;
        self.client
            .start_container(name, None::<StartContainerOptions>)
            .await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let read = async {
            while let Some(chunk) = attached.output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Error while reading container output: {}", e),
                }
            }
        };
        if tokio::time::timeout(INVENTORY_TIMEOUT, read).await.is_err() {
            return Err(BuildError::Inspection(format!(
                "inventory container did not finish within {}s",
                INVENTORY_TIMEOUT.as_secs()
            )));
        }

        let exit_code = match self
            .client
            .wait_container(name, None::<WaitContainerOptions>)
            .next()
            .await
        {
            Some(Ok(res)) => Some(res.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(err)) => return Err(err.into()),
            None => None,
        };

        Ok((exit_code, stdout, stderr))
    }
}

/// Reads the inventory document the script prints as its last JSON line
fn parse_inventory(
    exit_code: Option<i64>,
    stdout: &str,
    stderr: &str,
) -> Result<Inventory, BuildError> {
    if exit_code != Some(0) {
        return Err(BuildError::Inspection(format!(
            "inventory script exited with {:?}: {}",
            exit_code,
            stderr.trim()
        )));
    }

    let json = stdout.lines().rev().find(|l| l.starts_with('{')).unwrap_or("");
    serde_json::from_str(json).map_err(|e| {
        BuildError::Inspection(format!("unreadable inventory output ({}): {}", e, stdout.trim()))
    })
}

/// Compares what the image contains against what the recipe promised
pub fn evaluate(expected: &Expectations, facts: &ImageFacts, inventory: &Inventory) -> Vec<Check> {
    let mut checks = Vec::new();
    let bin = expected.environment.bin_dir();

    let path = facts.env.get("PATH").map(String::as_str).unwrap_or("");
    let first = path.split(':').next().unwrap_or("");
    checks.push(Check::new(
        "path-precedence",
        first == bin,
        format!("PATH={}", path),
    ));

    checks.push(Check::new(
        "interpreter",
        inventory.prefix == expected.environment.path,
        format!("python resolves to prefix {}", inventory.prefix),
    ));

    checks.push(Check::new(
        "command",
        facts.cmd == expected.command,
        format!("CMD {:?}", facts.cmd),
    ));

    checks.push(Check::new(
        "workdir",
        facts.workdir == expected.workdir,
        format!("WORKDIR {}", facts.workdir),
    ));

    checks.push(Check::new(
        "provenance",
        facts.labels.contains_key(LABEL_BUILDER_DIGEST),
        facts
            .labels
            .get(LABEL_BUILDER_DIGEST)
            .map(|d| format!("built from builder {}", d))
            .unwrap_or_else(|| "missing builder digest label".to_string()),
    ));

    checks.push(installer_check(expected.installer, inventory));

    for (name, version) in &expected.pins {
        let check = match inventory.version_of(name) {
            Some(installed) if installed == version => {
                Check::new(format!("pin:{}", name), true, format!("{}=={}", name, installed))
            }
            Some(installed) => Check::new(
                format!("pin:{}", name),
                false,
                format!("expected {}, found {}", version, installed),
            ),
            None => Check::new(
                format!("pin:{}", name),
                false,
                format!("expected {}, not installed", version),
            ),
        };
        checks.push(check);
    }

    checks
}

/// `uv` must be absent from the whole image; pip may exist in the base
/// image but never inside the environment.
fn installer_check(installer: Installer, inventory: &Inventory) -> Check {
    let mut found = Vec::new();
    for tool in installer.executables() {
        if let Some(presence) = inventory.tools.get(*tool) {
            if presence.in_env {
                found.push(format!("{} in environment", tool));
            } else if installer.is_added_by_builder() {
                if let Some(location) = &presence.on_path {
                    found.push(format!("{} at {}", tool, location));
                }
            }
        }
    }
    if let Some(version) = inventory.version_of(installer.name()) {
        found.push(format!("{} {} installed as a package", installer.name(), version));
    }

    if found.is_empty() {
        Check::new("installer-absent", true, format!("{} not present", installer))
    } else {
        Check::new("installer-absent", false, found.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(installer: Installer) -> Expectations {
        let mut pins = BTreeMap::new();
        pins.insert("discord-py".to_string(), "2.3.2".to_string());
        Expectations {
            environment: EnvironmentSpec::new("/app/.venv"),
            workdir: "/app".to_string(),
            command: vec!["python".to_string(), "main.py".to_string()],
            installer,
            pins,
        }
    }

    fn facts() -> ImageFacts {
        let mut env = BTreeMap::new();
        env.insert(
            "PATH".to_string(),
            "/app/.venv/bin:/usr/local/bin:/usr/bin".to_string(),
        );
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_BUILDER_DIGEST.to_string(), "sha256:abc".to_string());
        ImageFacts {
            id: "sha256:img".to_string(),
            env,
            cmd: vec!["python".to_string(), "main.py".to_string()],
            workdir: "/app".to_string(),
            labels,
        }
    }

    fn inventory(json: &str) -> Inventory {
        serde_json::from_str(json).unwrap()
    }

    const CLEAN: &str = r#"{
        "prefix": "/app/.venv",
        "packages": {"discord.py": "2.3.2", "aiohttp": "3.9.5"},
        "tools": {
            "uv": {"in_env": false, "on_path": null},
            "uvx": {"in_env": false, "on_path": null}
        }
    }"#;

    fn failed(checks: &[Check]) -> Vec<&str> {
        checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }

    #[test]
    fn test_clean_image_passes() {
        let checks = evaluate(&expected(Installer::Uv), &facts(), &inventory(CLEAN));
        assert!(failed(&checks).is_empty(), "{:?}", checks);
        assert!(checks.iter().any(|c| c.name == "pin:discord-py"));
    }

    #[test]
    fn test_path_appended_fails() {
        let mut facts = facts();
        facts.env.insert(
            "PATH".to_string(),
            "/usr/local/bin:/app/.venv/bin".to_string(),
        );
        let checks = evaluate(&expected(Installer::Uv), &facts, &inventory(CLEAN));
        assert_eq!(failed(&checks), vec!["path-precedence"]);
    }

    #[test]
    fn test_pin_mismatch() {
        let inv = inventory(
            r#"{"prefix": "/app/.venv", "packages": {"discord.py": "2.4.0"}, "tools": {}}"#,
        );
        let checks = evaluate(&expected(Installer::Uv), &facts(), &inv);
        let pin = checks.iter().find(|c| c.name == "pin:discord-py").unwrap();
        assert!(!pin.passed);
        assert_eq!(pin.detail, "expected 2.3.2, found 2.4.0");
    }

    #[test]
    fn test_uv_left_in_image() {
        let inv = inventory(
            r#"{"prefix": "/app/.venv", "packages": {"discord.py": "2.3.2"},
                "tools": {"uv": {"in_env": false, "on_path": "/usr/local/bin/uv"}}}"#,
        );
        let checks = evaluate(&expected(Installer::Uv), &facts(), &inv);
        assert_eq!(failed(&checks), vec!["installer-absent"]);
    }

    #[test]
    fn test_pip_allowed_in_base_but_not_env() {
        let base_only = inventory(
            r#"{"prefix": "/app/.venv", "packages": {"discord.py": "2.3.2"},
                "tools": {"pip": {"in_env": false, "on_path": "/usr/local/bin/pip"}}}"#,
        );
        let checks = evaluate(&expected(Installer::Pip), &facts(), &base_only);
        assert!(failed(&checks).is_empty());

        let in_env = inventory(
            r#"{"prefix": "/app/.venv", "packages": {"discord.py": "2.3.2", "pip": "24.0"},
                "tools": {"pip": {"in_env": true, "on_path": "/app/.venv/bin/pip"}}}"#,
        );
        let checks = evaluate(&expected(Installer::Pip), &facts(), &in_env);
        let check = checks.iter().find(|c| c.name == "installer-absent").unwrap();
        assert!(!check.passed);
        assert!(check.detail.contains("pip in environment"));
        assert!(check.detail.contains("pip 24.0"));
    }

    #[test]
    fn test_system_interpreter_fails() {
        let inv = inventory(r#"{"prefix": "/usr/local", "packages": {}, "tools": {}}"#);
        let checks = evaluate(&expected(Installer::Uv), &facts(), &inv);
        assert!(failed(&checks).contains(&"interpreter"));
        assert!(failed(&checks).contains(&"pin:discord-py"));
    }

    #[test]
    fn test_expectations_from_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = BuildConfig::defaults(dir.path());
        let manifest = Manifest::parse(
            "requirements.txt",
            "Discord.py==2.3.2\nrequests>=2\n".to_string(),
        );
        let expected = Expectations::from_config(&config, Some(&manifest));
        assert_eq!(expected.pins.len(), 1);
        assert_eq!(expected.pins["discord-py"], "2.3.2");
        assert_eq!(expected.environment.path, "/app/.venv");
    }

    #[test]
    fn test_parse_inventory() {
        let stdout = format!("warming up\n{}\n", CLEAN.replace('\n', " "));
        let inv = parse_inventory(Some(0), &stdout, "").unwrap();
        assert_eq!(inv.prefix, "/app/.venv");
        assert_eq!(inv.version_of("Discord.py"), Some("2.3.2"));
    }

    #[test]
    fn test_inventory_failures_exit_with_run_failure() {
        let err = parse_inventory(Some(1), "", "ModuleNotFoundError: importlib").unwrap_err();
        assert!(matches!(err, BuildError::Inspection(_)));
        assert!(err.to_string().contains("ModuleNotFoundError"));
        assert_eq!(err.exit_code(), 1);

        let err = parse_inventory(Some(0), "not json", "").unwrap_err();
        assert!(matches!(err, BuildError::Inspection(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
