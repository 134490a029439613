mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Commands};

use mb_core::config::Config;
use mb_core::media;
use mb_engine::{EngineLoader, FfmpegLoader, MemoryLoader};
use mb_orchestrator::{
    BatchSummary, ConversionTask, DirectorySink, InputFile, Orchestrator, TaskState,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise the verbose flag picks the level.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediabatch=debug,mb_orchestrator=debug,mb_engine=debug,mb_core=debug".to_string()
        } else {
            "mediabatch=info,mb_orchestrator=info,mb_engine=info,mb_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert {
            files,
            format,
            out,
            bundle,
            parallel,
            dry_run,
            json,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(n) = parallel {
                config.limits.max_concurrent = n;
            }
            let opts = ConvertOptions {
                format,
                out,
                bundle,
                dry_run,
                json,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(config, files, opts))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Formats => list_formats(cli.config.as_deref()),
        Commands::Version => {
            println!("mediabatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// An explicit config path must parse; otherwise defaults apply.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(p) => Config::load(p).with_context(|| format!("loading config {}", p.display()))?,
        None => Config::default(),
    };
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    Ok(config)
}

struct ConvertOptions {
    format: Option<String>,
    out: PathBuf,
    bundle: Option<Option<String>>,
    dry_run: bool,
    json: bool,
}

async fn convert(config: Config, files: Vec<PathBuf>, opts: ConvertOptions) -> Result<()> {
    let loader: Arc<dyn EngineLoader> = if opts.dry_run {
        tracing::info!("Dry run: using the in-memory passthrough engine");
        Arc::new(MemoryLoader::new())
    } else {
        Arc::new(FfmpegLoader::new(config.tools.clone()))
    };

    let orchestrator = Orchestrator::builder(config, loader)
        .sink(Arc::new(DirectorySink::new(&opts.out)))
        .build();

    let inputs = read_inputs(&files, orchestrator.config().limits.max_file_size).await?;
    orchestrator.submit_files(inputs);

    let summary = orchestrator.start_pending(opts.format.as_deref()).await?;
    let tasks = orchestrator.tasks();

    if opts.json {
        let report = serde_json::json!({ "summary": summary, "tasks": tasks });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&tasks, &summary);
    }

    if !orchestrator.artifacts().is_empty() {
        match opts.bundle {
            Some(name) => {
                let bundle = orchestrator.download_as_bundle(name.as_deref()).await?;
                if !opts.json {
                    println!(
                        "\nWrote {} ({})",
                        opts.out.join(&bundle.name).display(),
                        media::format_file_size(bundle.bytes.len() as u64)
                    );
                }
            }
            None => {
                let count = orchestrator.download_all_individually().await?;
                if !opts.json {
                    println!("\nWrote {count} file(s) to {}", opts.out.display());
                }
            }
        }
    }

    orchestrator.shutdown();

    let failed = tasks.iter().filter(|t| t.state == TaskState::Failed).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} file(s) failed to convert", tasks.len());
    }
    Ok(())
}

/// Read every input. Files over the size limit are not read; they are
/// submitted with their declared size only and rejected at submission.
async fn read_inputs(files: &[PathBuf], max_file_size: u64) -> Result<Vec<InputFile>> {
    let mut inputs = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("not a file: {}", path.display()))?;
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?
            .len();

        let bytes = if size > max_file_size {
            Bytes::new()
        } else {
            Bytes::from(
                tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
            )
        };
        inputs.push(InputFile { name, bytes, size });
    }
    Ok(inputs)
}

fn print_report(tasks: &[ConversionTask], summary: &BatchSummary) {
    println!("{:<36} {:>10}  {:<10} DETAIL", "FILE", "SIZE", "STATE");
    for task in tasks {
        let detail = match task.state {
            TaskState::Completed => format!(
                "-> {}",
                media::output_name(&task.input_name, &task.output_format)
            ),
            TaskState::Failed => task.error.clone().unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "{:<36} {:>10}  {:<10} {}",
            task.input_name,
            media::format_file_size(task.size_bytes),
            task.state,
            detail
        );
    }
    println!(
        "\n{} completed, {} failed, {} skipped in {} wave(s)",
        summary.completed, summary.failed, summary.skipped, summary.waves
    );
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Checking external tools...\n");

    let tools = mb_engine::tools::check_tools(&config.tools);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("ffmpeg is missing. Install it or use `convert --dry-run`.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!(
        "  Max file size: {}",
        media::format_file_size(config.limits.max_file_size)
    );
    println!(
        "  Max concurrent: {}",
        config.limits.effective_concurrency()
    );
    println!(
        "  Output formats: {} (default {})",
        config.formats.audio_formats.join(", "),
        config.formats.default_output_format
    );
    println!("  Bundle name: {}", config.bundle.default_name);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for w in &warnings {
            println!("  ! {w}");
        }
    }

    Ok(())
}

fn list_formats(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Output formats:");
    for f in &config.formats.audio_formats {
        let marker = if *f == config.formats.default_output_format {
            " (default)"
        } else {
            ""
        };
        println!("  {f}{marker}");
    }
    println!("\nVideo extensions (audio extracted to {}):", media::EXTRACTION_FORMAT);
    for ext in &config.formats.video_extensions {
        println!("  {ext}");
    }
    Ok(())
}
