//! Output formatting for multiple formats
//!
//! Plans, build reports, verification results and daemon status can each be
//! printed as JSON, YAML or human-readable text. Machine formats go through
//! serde; the human format is hand-laid for a terminal.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::BuildConfig;
use crate::docker::{DaemonInfo, VerifyReport};
use crate::pipeline::{BuildReport, Plan, StageStatus};

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a validated plan
    pub fn format_plan(&self, plan: &Plan) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(plan, "plan"),
            OutputFormat::Yaml => to_yaml(plan, "plan"),
            OutputFormat::Human => Ok(self.format_plan_human(plan)),
        }
    }

    /// Formats the outcome of a build, successful or not
    pub fn format_report(&self, report: &BuildReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(report, "build report"),
            OutputFormat::Yaml => to_yaml(report, "build report"),
            OutputFormat::Human => Ok(self.format_report_human(report)),
        }
    }

    pub fn format_verify(&self, report: &VerifyReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(report, "verification report"),
            OutputFormat::Yaml => to_yaml(report, "verification report"),
            OutputFormat::Human => Ok(self.format_verify_human(report)),
        }
    }

    pub fn format_daemon(&self, info: &DaemonInfo) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(info, "daemon info"),
            OutputFormat::Yaml => to_yaml(info, "daemon info"),
            OutputFormat::Human => Ok(self.format_daemon_human(info)),
        }
    }

    /// Formats the effective configuration
    pub fn format_config(&self, config: &BuildConfig) -> Result<String> {
        let map = config.to_display_map();
        match self.format {
            OutputFormat::Json => to_json(&map, "config"),
            OutputFormat::Yaml => to_yaml(&map, "config"),
            OutputFormat::Human => Ok(self.format_config_human(&map)),
        }
    }

    fn format_plan_human(&self, plan: &Plan) -> String {
        let mut output = String::new();

        output.push_str("\u{2713} Build Plan\n");
        output.push_str(RULE);
        output.push_str("\n\n");

        output.push_str(&format!("Manifest:     {}", plan.manifest.path));
        output.push_str(&format!(
            " ({} requirements, {} pinned)\n",
            plan.manifest.requirements.len(),
            plan.manifest.pinned().count()
        ));
        output.push_str(&format!(
            "Context:      {} files ({} bytes)\n",
            plan.context_files, plan.context_size
        ));
        output.push_str(&format!("Installer:    {}\n", plan.recipe.installer.name()));
        output.push_str(&format!("Environment:  {}\n", plan.recipe.environment.path));
        if let Some(tag) = &plan.tag {
            output.push_str(&format!("Tag:          {}\n", tag));
        }
        output.push('\n');

        for stage in plan.recipe.stages() {
            let digest = match stage.role {
                crate::recipe::StageRole::Builder => &plan.stages.builder,
                crate::recipe::StageRole::Runtime => &plan.stages.runtime,
            };
            output.push_str(&format!(
                "Stage {} ({}) [{}]\n",
                stage.role,
                stage.base.reference(),
                digest.short()
            ));
            let last = stage.steps.len().saturating_sub(1);
            for (i, step) in stage.steps.iter().enumerate() {
                let connector = if i == last { "\u{2514}\u{2500}" } else { "\u{251C}\u{2500}" };
                output.push_str(&format!("{} {}\n", connector, step.label()));
            }
            output.push('\n');
        }

        push_warnings(&mut output, &plan.warnings);
        output
    }

    fn format_report_human(&self, report: &BuildReport) -> String {
        let mut output = String::new();

        if report.succeeded() {
            output.push_str("\u{2713} Build Succeeded\n");
        } else {
            output.push_str("\u{2717} Build Failed\n");
        }
        output.push_str(RULE);
        output.push_str("\n\n");

        if let Some(image_id) = &report.image_id {
            output.push_str(&format!("Image:     {}\n", image_id));
        }
        if let Some(tag) = &report.tag {
            output.push_str(&format!("Tag:       {}\n", tag));
        }
        output.push_str(&format!("Executor:  {}\n", report.executor));
        output.push_str(&format!("Build ID:  {}\n\n", report.id));

        output.push_str("Stages:\n");
        for stage in &report.stages {
            let symbol = match stage.status {
                StageStatus::Succeeded => "\u{2713}",
                StageStatus::Failed => "\u{2717}",
                _ => "-",
            };
            output.push_str(&format!(
                "{} {:<8} {} ({}ms)\n",
                symbol,
                stage.stage.as_str(),
                stage.status,
                stage.duration_ms
            ));
            if let Some(step) = &stage.failed_step {
                output.push_str(&format!("  Step:  {}\n", step));
            }
            if let Some(error) = &stage.error {
                output.push_str(&format!("  Error: {}\n", error));
            }
        }

        push_warnings(&mut output, &report.warnings);
        output.push_str(&format!("\nCompleted in {}ms\n", report.duration_ms));
        output
    }

    fn format_verify_human(&self, report: &VerifyReport) -> String {
        let mut output = String::new();

        if report.passed() {
            output.push_str(&format!("\u{2713} {} verified\n", report.image));
        } else {
            output.push_str(&format!("\u{2717} {} failed verification\n", report.image));
        }
        output.push_str(RULE);
        output.push_str("\n\n");
        output.push_str(&format!("Image ID:  {}\n", report.image_id));
        output.push_str(&format!("Packages:  {}\n\n", report.packages));

        for check in &report.checks {
            let symbol = if check.passed { "\u{2713}" } else { "\u{2717}" };
            output.push_str(&format!("{} {}\n", symbol, check.name));
            output.push_str(&format!("  {}\n", check.detail));
        }
        output
    }

    fn format_daemon_human(&self, info: &DaemonInfo) -> String {
        let mut output = String::new();
        output.push_str("\u{2713} Docker daemon available\n");
        output.push_str(RULE);
        output.push_str("\n\n");
        output.push_str(&format!("Version:      {}\n", info.version));
        output.push_str(&format!("API Version:  {}\n", info.api_version));
        output.push_str(&format!("Platform:     {}/{}\n", info.os, info.arch));
        output
    }

    fn format_config_human(&self, map: &BTreeMap<String, String>) -> String {
        let mut output = String::new();
        output.push_str("stagebox Configuration\n");
        output.push_str(RULE);
        output.push_str("\n\n");
        for (key, value) in map {
            output.push_str(&format!("  {}: {}\n", key, value));
        }
        output
    }
}

fn push_warnings(output: &mut String, warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    output.push_str("\u{26A0} Warnings:\n");
    for warning in warnings {
        output.push_str(&format!("  - {}\n", warning));
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {} to JSON", what))
}

fn to_yaml<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_yaml::to_string(value).with_context(|| format!("Failed to serialize {} to YAML", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::Check;
    use crate::pipeline::StageReport;
    use crate::recipe::StageRole;
    use crate::validation::Validator;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_plan() -> (TempDir, Plan) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("requirements.txt"),
            "requests==2.31.0\nflask>=3.0\n",
        )
        .unwrap();
        fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        let config = BuildConfig::defaults(dir.path());
        let plan = Plan::prepare(&config, &Validator::new()).unwrap();
        (dir, plan)
    }

    fn create_test_report(failed: bool) -> BuildReport {
        let builder = StageReport {
            stage: StageRole::Builder,
            status: StageStatus::Succeeded,
            digest: "sha256:aaaa".to_string(),
            artifact: Some("sha256:b1".to_string()),
            duration_ms: 1200,
            failed_step: None,
            error: None,
        };
        let runtime = if failed {
            StageReport {
                stage: StageRole::Runtime,
                status: StageStatus::Failed,
                digest: "sha256:bbbb".to_string(),
                artifact: None,
                duration_ms: 300,
                failed_step: Some("COPY . .".to_string()),
                error: Some("no space left on device".to_string()),
            }
        } else {
            StageReport {
                stage: StageRole::Runtime,
                status: StageStatus::Succeeded,
                digest: "sha256:bbbb".to_string(),
                artifact: Some("sha256:r1".to_string()),
                duration_ms: 300,
                failed_step: None,
                error: None,
            }
        };

        BuildReport {
            id: "build-1".to_string(),
            context: "/tmp/bot".to_string(),
            executor: "docker".to_string(),
            started_at: Utc::now(),
            duration_ms: 1500,
            tag: Some("bot:latest".to_string()),
            image_id: if failed { None } else { Some("sha256:r1".to_string()) },
            stages: vec![builder, runtime],
            labels: BTreeMap::new(),
            warnings: vec![],
        }
    }

    #[test]
    fn test_plan_json_format() {
        let (_dir, plan) = create_test_plan();
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_plan(&plan)
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["context_files"], 2);
        assert_eq!(parsed["context_size"], 40);
        assert!(parsed["stages"]["builder"]
            .as_str()
            .unwrap()
            .starts_with("sha256:"));
        assert!(parsed.get("dockerfile").is_none());
    }

    #[test]
    fn test_plan_yaml_format() {
        let (_dir, plan) = create_test_plan();
        let output = OutputFormatter::new(OutputFormat::Yaml)
            .format_plan(&plan)
            .unwrap();

        let parsed: serde_yaml::Value = serde_yaml::from_str(&output).unwrap();
        assert!(parsed.get("recipe").is_some());
    }

    #[test]
    fn test_plan_human_format() {
        let (_dir, plan) = create_test_plan();
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_plan(&plan)
            .unwrap();

        assert!(output.contains("Build Plan"));
        assert!(output.contains("2 requirements, 1 pinned"));
        assert!(output.contains("Context:      2 files (40 bytes)"));
        assert!(output.contains("Stage builder"));
        assert!(output.contains("Stage runtime"));
        assert!(output.contains("Warnings"));
        assert!(output.contains("'flask>=3.0' allows a range of versions"));
    }

    #[test]
    fn test_report_human_success() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_report(&create_test_report(false))
            .unwrap();

        assert!(output.contains("\u{2713} Build Succeeded"));
        assert!(output.contains("Image:     sha256:r1"));
        assert!(output.contains("Completed in 1500ms"));
    }

    #[test]
    fn test_report_human_failure() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_report(&create_test_report(true))
            .unwrap();

        assert!(output.contains("\u{2717} Build Failed"));
        assert!(!output.contains("Image:"));
        assert!(output.contains("Step:  COPY . ."));
        assert!(output.contains("no space left on device"));
    }

    #[test]
    fn test_report_json_skips_missing_image() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_report(&create_test_report(true))
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert!(parsed.get("image_id").is_none());
        assert_eq!(parsed["stages"][1]["status"], "failed");
    }

    #[test]
    fn test_verify_human_format() {
        let report = VerifyReport {
            image: "bot:latest".to_string(),
            image_id: "sha256:r1".to_string(),
            packages: 12,
            checks: vec![
                Check {
                    name: "path-precedence".to_string(),
                    passed: true,
                    detail: "/app/.venv/bin is first on PATH".to_string(),
                },
                Check {
                    name: "installer-absent".to_string(),
                    passed: false,
                    detail: "uv found at /usr/local/bin/uv".to_string(),
                },
            ],
        };
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_verify(&report)
            .unwrap();

        assert!(output.contains("bot:latest failed verification"));
        assert!(output.contains("\u{2713} path-precedence"));
        assert!(output.contains("\u{2717} installer-absent"));
    }

    #[test]
    fn test_daemon_format() {
        let info = DaemonInfo {
            version: "27.1.1".to_string(),
            api_version: "1.46".to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
        };
        let human = OutputFormatter::new(OutputFormat::Human)
            .format_daemon(&info)
            .unwrap();
        assert!(human.contains("Platform:     linux/amd64"));

        let json = OutputFormatter::new(OutputFormat::Json)
            .format_daemon(&info)
            .unwrap();
        assert!(json.contains("\"api_version\": \"1.46\""));
    }

    #[test]
    fn test_config_format() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::defaults(dir.path());
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_config(&config)
            .unwrap();
        assert!(output.contains("stagebox Configuration"));
    }
}
