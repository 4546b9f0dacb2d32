//! Dockerfile rendering
//!
//! Every step maps to exactly one instruction, so an instruction reported by
//! the daemon can be traced back to the step that produced it.

use crate::recipe::{CopySource, EnvBinding, Recipe, Stage, Step};
use std::fmt::Write;

/// Renders the full two-stage Dockerfile
pub fn render(recipe: &Recipe) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Generated by stagebox {}. Do not edit; change stagebox.toml instead.",
        crate::VERSION
    );
    let _ = writeln!(
        out,
        "# Installer: {}. Environment: {}. Manifest: {}.",
        recipe.installer, recipe.environment.path, recipe.manifest
    );

    for (idx, stage) in recipe.stages().into_iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        render_stage(&mut out, stage);
    }
    out
}

fn render_stage(out: &mut String, stage: &Stage) {
    let _ = writeln!(out, "FROM {} AS {}", stage.base.reference(), stage.role);
    for step in &stage.steps {
        let _ = writeln!(out, "{}", instruction(step));
    }
}

/// Dockerfile instruction for a single step
pub fn instruction(step: &Step) -> String {
    match step {
        Step::Run { command, .. } => format!("RUN {}", command),
        Step::Workdir { path } => format!("WORKDIR {}", path),
        Step::Copy { source, src, dest } => match source {
            CopySource::Context => format!("COPY {} {}", src, dest),
            CopySource::Stage(stage) => format!("COPY --from={} {} {}", stage, src, dest),
        },
        Step::Env { bindings } => render_env(bindings),
        Step::Cmd { argv } => format!("CMD {}", exec_form(argv)),
    }
}

fn render_env(bindings: &[EnvBinding]) -> String {
    let pairs: Vec<String> = bindings
        .iter()
        .map(|b| format!("{}=\"{}\"", b.key, escape_env(&b.value)))
        .collect();
    format!("ENV {}", pairs.join(" \\\n    "))
}

/// Quotes for a double-quoted ENV value; `$VAR` references stay expandable
fn escape_env(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn exec_form(argv: &[String]) -> String {
    // Vec<String> always serializes
    serde_json::to_string(argv).unwrap_or_default()
}

/// Finds the step whose instruction matches one echoed by the daemon
///
/// The legacy builder echoes instructions as `Step N/M : RUN ...` and may
/// normalize whitespace, so the comparison ignores runs of spaces and
/// instruction keyword case.
pub fn step_for_instruction<'a>(recipe: &'a Recipe, echoed: &str) -> Option<&'a Step> {
    let wanted = normalize(echoed);
    recipe
        .stages()
        .into_iter()
        .flat_map(|s| s.steps.iter())
        .find(|step| normalize(&instruction(step)) == wanted)
}

fn normalize(text: &str) -> String {
    let mut words = text.split_whitespace().filter(|w| *w != "\\");
    let keyword = words.next().unwrap_or("").to_uppercase();
    std::iter::once(keyword)
        .chain(words.map(str::to_string))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::recipe::{Installer, RunKind, StageRole};
    use tempfile::TempDir;

    fn recipe_with(installer: Installer) -> Recipe {
        let dir = TempDir::new().unwrap();
        let mut config = BuildConfig::defaults(dir.path());
        config.python_version = "3.12".to_string();
        config.installer = installer;
        Recipe::two_stage(&config)
    }

    #[test]
    fn test_render_uv_recipe() {
        let dockerfile = render(&recipe_with(Installer::Uv));
        let lines: Vec<&str> = dockerfile
            .lines()
            .filter(|l| !l.starts_with('#') && !l.is_empty())
            .collect();

        assert_eq!(lines[0], "FROM python:3.12-slim AS builder");
        assert_eq!(lines[1], "RUN pip install --no-cache-dir uv");
        assert_eq!(lines[2], "WORKDIR /app");
        assert_eq!(lines[3], "COPY requirements.txt requirements.txt");
        assert!(lines[4].starts_with("RUN uv venv /app/.venv && uv pip install"));
        assert_eq!(lines[5], "FROM python:3.12-slim AS runtime");
        assert_eq!(lines[6], "WORKDIR /app");
        assert_eq!(lines[7], "COPY --from=builder /app/.venv /app/.venv");
        assert_eq!(lines[8], "ENV PATH=\"/app/.venv/bin:$PATH\" \\");
        assert!(dockerfile.contains("COPY . .\n"));
        assert!(dockerfile.ends_with("CMD [\"python\",\"main.py\"]\n"));
    }

    #[test]
    fn test_runtime_has_no_run_instructions() {
        for installer in [Installer::Uv, Installer::Pip] {
            let dockerfile = render(&recipe_with(installer));
            let runtime = dockerfile.split("AS runtime").nth(1).unwrap();
            assert!(!runtime.contains("RUN "));
            assert!(!runtime.contains("pip install"));
        }
    }

    #[test]
    fn test_env_escaping() {
        let step = Step::Env {
            bindings: vec![
                EnvBinding::new("GREETING", "say \"hi\""),
                EnvBinding::new("PYTHONUNBUFFERED", "1"),
            ],
        };
        assert_eq!(
            instruction(&step),
            "ENV GREETING=\"say \\\"hi\\\"\" \\\n    PYTHONUNBUFFERED=\"1\""
        );
    }

    #[test]
    fn test_cmd_exec_form_escapes() {
        let step = Step::Cmd {
            argv: vec!["python".to_string(), "my \"app\".py".to_string()],
        };
        assert_eq!(instruction(&step), r#"CMD ["python","my \"app\".py"]"#);
    }

    #[test]
    fn test_step_for_instruction() {
        let recipe = recipe_with(Installer::Uv);
        let step = step_for_instruction(&recipe, "RUN pip install  --no-cache-dir uv").unwrap();
        assert!(matches!(
            step,
            Step::Run {
                kind: RunKind::InstallTool,
                ..
            }
        ));

        let copy = step_for_instruction(&recipe, "copy --from=builder /app/.venv /app/.venv").unwrap();
        assert!(matches!(
            copy,
            Step::Copy {
                source: CopySource::Stage(StageRole::Builder),
                ..
            }
        ));

        assert!(step_for_instruction(&recipe, "RUN rm -rf /").is_none());
    }
}
