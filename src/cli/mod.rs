pub mod commands;
pub mod output;

pub use commands::{
    BuildArgs, CheckArgs, CliArgs, Commands, DockerfileArgs, InstallerArg, OutputFormatArg,
    PlanArgs, RecipeArgs, VerifyArgs,
};
pub use output::{OutputFormat, OutputFormatter};
