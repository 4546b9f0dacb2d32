use crate::config::ConfigOverrides;
use crate::recipe::Installer;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Two-stage container image builder for Python applications
#[derive(Parser, Debug)]
#[command(
    name = "stagebox",
    about = "Two-stage container image builder for Python applications",
    version,
    author,
    long_about = "stagebox builds a Python application image in two stages: a builder stage \
                  installs the dependency manifest into an isolated environment, and a runtime \
                  stage copies only that environment and the source tree onto a fresh base image. \
                  Build tools never reach the final image."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Show the validated recipe and stage digests",
        long_about = "Reads the manifest, walks the build context and assembles both stages \
                      without contacting Docker.\n\n\
                      Examples:\n  \
                      stagebox plan\n  \
                      stagebox plan ./bot --format json\n  \
                      stagebox plan --installer pip --entry event_server/main.py"
    )]
    Plan(PlanArgs),

    #[command(
        about = "Print the rendered Dockerfile",
        long_about = "Renders the two-stage recipe as a Dockerfile.\n\n\
                      Examples:\n  \
                      stagebox dockerfile\n  \
                      stagebox dockerfile ./bot -o Dockerfile"
    )]
    Dockerfile(DockerfileArgs),

    #[command(
        about = "Build the image",
        long_about = "Builds the builder stage, then the runtime stage, against the local \
                      Docker daemon. Prints the final image id on success.\n\n\
                      Examples:\n  \
                      stagebox build --tag bot:latest\n  \
                      stagebox build ./bot --tag bot:dev --no-cache\n  \
                      stagebox build --dry-run --format json"
    )]
    Build(BuildArgs),

    #[command(
        about = "Check a built image",
        long_about = "Inspects an image for PATH precedence, command, working directory and \
                      installer absence, and compares installed packages with manifest pins.\n\n\
                      Examples:\n  \
                      stagebox verify bot:latest\n  \
                      stagebox verify bot:latest --context ./bot --format json"
    )]
    Verify(VerifyArgs),

    #[command(about = "Check Docker daemon availability")]
    Check(CheckArgs),
}

/// Inputs shared by every command that assembles a recipe
#[derive(Args, Debug, Clone, Default)]
pub struct RecipeArgs {
    #[arg(
        value_name = "PATH",
        help = "Build context directory (defaults to current directory)"
    )]
    pub context: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Dependency manifest, relative to the context")]
    pub manifest: Option<String>,

    #[arg(long, value_name = "FILE", help = "Entry file or dotted module started by the image")]
    pub entry: Option<String>,

    #[arg(long = "python", value_name = "VERSION", help = "Python version for the base image")]
    pub python_version: Option<String>,

    #[arg(long, value_name = "IMAGE", help = "Base image repository")]
    pub base_image: Option<String>,

    #[arg(long, value_name = "SUFFIX", help = "Base image tag suffix, e.g. slim")]
    pub base_variant: Option<String>,

    #[arg(long, value_name = "DIR", help = "Working directory inside the image")]
    pub workdir: Option<String>,

    #[arg(long, value_name = "DIR", help = "Environment directory, relative to the workdir")]
    pub env_dir: Option<String>,

    #[arg(long, value_enum, help = "Package installation tool")]
    pub installer: Option<InstallerArg>,

    #[arg(
        long = "env",
        value_name = "KEY=VALUE",
        value_parser = parse_key_val,
        help = "Extra variable for the final image (repeatable)"
    )]
    pub runtime_env: Vec<(String, String)>,

    #[arg(
        long,
        value_name = "PATTERN",
        help = "Extra context exclusion pattern (repeatable)"
    )]
    pub exclude: Vec<String>,
}

impl RecipeArgs {
    pub fn context(&self) -> PathBuf {
        self.context.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            python_version: self.python_version.clone(),
            base_image: self.base_image.clone(),
            base_variant: self.base_variant.clone(),
            workdir: self.workdir.clone(),
            manifest: self.manifest.clone(),
            env_dir: self.env_dir.clone(),
            installer: self.installer.map(Into::into),
            entry: self.entry.clone(),
            runtime_env: self.runtime_env.clone(),
            exclude: self.exclude.clone(),
            ..Default::default()
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct DockerfileArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the Dockerfile to a file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    #[arg(short = 't', long, value_name = "TAG", help = "Tag for the final image")]
    pub tag: Option<String>,

    #[arg(long, help = "Reinstall dependencies instead of reusing cached layers")]
    pub no_cache: bool,

    #[arg(long, help = "Run the pipeline without a Docker daemon")]
    pub dry_run: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Report format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(value_name = "IMAGE", help = "Image tag or id to inspect")]
    pub image: String,

    #[arg(
        short = 'c',
        long,
        value_name = "PATH",
        default_value = ".",
        help = "Build context the image was built from"
    )]
    pub context: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerArg {
    Uv,
    Pip,
}

impl From<InstallerArg> for Installer {
    fn from(arg: InstallerArg) -> Self {
        match arg {
            InstallerArg::Uv => Installer::Uv,
            InstallerArg::Pip => Installer::Pip,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid KEY=VALUE: no '=' found in '{}'", s))?;
    if key.is_empty() {
        return Err(format!("Invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}
