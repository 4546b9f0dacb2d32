use stagebox::cli::{
    BuildArgs, CheckArgs, CliArgs, Commands, DockerfileArgs, OutputFormat, OutputFormatter,
    PlanArgs, RecipeArgs, VerifyArgs,
};
use stagebox::config::{BuildConfig, ConfigOverrides};
use stagebox::docker::{self, DockerExecutor, Expectations, ImageVerifier};
use stagebox::manifest::Manifest;
use stagebox::pipeline::{PipelineOrchestrator, PlanningExecutor, StageExecutor};
use stagebox::progress::{LoggingHandler, ProgressHandler, SpinnerHandler};
use stagebox::util::{init_logging, LoggingConfig};
use stagebox::VERSION;

use clap::Parser;
use std::fs;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Exit code for bad input: missing manifest, invalid configuration, unknown image
const EXIT_INPUT: i32 = 2;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(LoggingConfig::from_flags(
        args.log_level.as_deref(),
        args.verbose,
        args.quiet,
    ));

    debug!("stagebox v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args),
        Commands::Dockerfile(dockerfile_args) => handle_dockerfile(dockerfile_args),
        Commands::Build(build_args) => handle_build(build_args, args.quiet, args.verbose).await,
        Commands::Verify(verify_args) => handle_verify(verify_args).await,
        Commands::Check(check_args) => handle_check(check_args).await,
    };

    std::process::exit(exit_code);
}

fn load_config(recipe: &RecipeArgs, overrides: ConfigOverrides) -> Result<BuildConfig, i32> {
    let context = recipe.context();
    debug!("Build context: {}", context.display());

    BuildConfig::load(&context, &overrides).map_err(|e| {
        error!("Configuration error: {}", e);
        eprintln!("\nCheck stagebox.toml, STAGEBOX_* environment variables and command-line flags.");
        EXIT_INPUT
    })
}

fn print_output(rendered: anyhow::Result<String>) -> i32 {
    match rendered {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            error!("Failed to format output: {}", e);
            1
        }
    }
}

fn handle_plan(args: &PlanArgs) -> i32 {
    let config = match load_config(&args.recipe, args.recipe.overrides()) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let orchestrator = PipelineOrchestrator::new(PlanningExecutor);
    match orchestrator.plan(&config) {
        Ok(plan) => {
            for warning in &plan.warnings {
                warn!("{}", warning);
            }
            print_output(OutputFormatter::new(args.format.into()).format_plan(&plan))
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}

fn handle_dockerfile(args: &DockerfileArgs) -> i32 {
    let config = match load_config(&args.recipe, args.recipe.overrides()) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let orchestrator = PipelineOrchestrator::new(PlanningExecutor);
    let plan = match orchestrator.plan(&config) {
        Ok(plan) => plan,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    match &args.output {
        Some(path) => match fs::write(path, &plan.dockerfile) {
            Ok(()) => {
                info!("Wrote {}", path.display());
                0
            }
            Err(e) => {
                error!("Failed to write {}: {}", path.display(), e);
                1
            }
        },
        None => {
            print!("{}", plan.dockerfile);
            0
        }
    }
}

async fn handle_build(args: &BuildArgs, quiet: bool, verbose: bool) -> i32 {
    let mut overrides = args.recipe.overrides();
    overrides.tag = args.tag.clone();
    overrides.no_cache = args.no_cache;

    let config = match load_config(&args.recipe, overrides) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let format: OutputFormat = args.format.into();
    let progress: Arc<dyn ProgressHandler> =
        if !quiet && !verbose && format == OutputFormat::Human && SpinnerHandler::is_supported() {
            Arc::new(SpinnerHandler::new())
        } else {
            Arc::new(LoggingHandler)
        };

    if args.dry_run {
        info!("Dry run: no images will be built");
        let orchestrator = PipelineOrchestrator::new(PlanningExecutor).with_progress(progress);
        return run_build(&orchestrator, &config, format).await;
    }

    let client = match docker::connect() {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            eprintln!("\nIs the Docker daemon running? Try: stagebox check");
            return e.exit_code();
        }
    };
    let orchestrator = PipelineOrchestrator::new(DockerExecutor::new(client)).with_progress(progress);
    run_build(&orchestrator, &config, format).await
}

async fn run_build<E: StageExecutor>(
    orchestrator: &PipelineOrchestrator<E>,
    config: &BuildConfig,
    format: OutputFormat,
) -> i32 {
    let formatter = OutputFormatter::new(format);

    match orchestrator.run(config).await {
        Ok(report) => {
            if format == OutputFormat::Human {
                println!("{}", report.image_id.clone().unwrap_or_default());
                0
            } else {
                print_output(formatter.format_report(&report))
            }
        }
        Err(failure) => {
            error!("{}", failure.error);
            match format {
                OutputFormat::Human => {
                    if let Ok(rendered) = formatter.format_report(&failure.report) {
                        eprintln!("\n{}", rendered);
                    }
                }
                _ => {
                    print_output(formatter.format_report(&failure.report));
                }
            }
            failure.exit_code()
        }
    }
}

async fn handle_verify(args: &VerifyArgs) -> i32 {
    let recipe = RecipeArgs {
        context: Some(args.context.clone()),
        ..Default::default()
    };
    let config = match load_config(&recipe, recipe.overrides()) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let manifest = match Manifest::load(&config.context, &config.manifest) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!("{}; pinned versions will not be checked", e);
            None
        }
    };
    let expected = Expectations::from_config(&config, manifest.as_ref());

    let client = match docker::connect() {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    info!("Verifying image {}", args.image);
    let verifier = ImageVerifier::new(client);
    let report = match verifier.verify(&args.image, &expected).await {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    for failure in report.failures() {
        warn!(check = %failure.name, "{}", failure.detail);
    }

    let code = print_output(OutputFormatter::new(args.format.into()).format_verify(&report));
    if code != 0 {
        return code;
    }
    if report.passed() {
        0
    } else {
        1
    }
}

async fn handle_check(args: &CheckArgs) -> i32 {
    info!("Checking Docker daemon");

    let client = match docker::connect() {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    match docker::daemon_info(&client).await {
        Ok(info) => print_output(OutputFormatter::new(args.format.into()).format_daemon(&info)),
        Err(e) => {
            error!("Docker daemon is not reachable: {}", e);
            eprintln!("\nPossible solutions:");
            eprintln!("  - Start Docker Desktop or the docker service");
            eprintln!("  - Check the DOCKER_HOST environment variable");
            1
        }
    }
}
