//! Portcullis gateway bundle compiler.
//!
//! Compiles a source directory into a `.gwa` artifact, extracts
//! folder-scoped subsets of artifacts, and inspects artifact manifests.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use portcullis_compiler::{
    compile, compile_with_manifest, extract, load_artifact, CompileOptions, Manifest,
    ProjectManifest, MANIFEST_FILE,
};
use portcullis_telemetry::{log_artifact_written, log_command_failed, log_startup};
use portcullis_telemetry::{LogFormat, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "portcullis", about = "Gateway configuration bundle compiler", version)]
struct Cli {
    /// Log level or filter directives (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "warn", env = "PORTCULLIS_LOG_LEVEL")]
    log_level: String,

    /// Log output format (pretty or json).
    #[arg(long, global = true, default_value = "pretty", env = "PORTCULLIS_LOG_FORMAT")]
    log_format: String,

    /// Include source file and line numbers in log events.
    #[arg(long, global = true, env = "PORTCULLIS_LOG_SOURCE_LOCATION")]
    log_source_location: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a source directory into a .gwa artifact.
    ///
    /// Resolves every policy reference (E2001-E2005) and orders policies so
    /// that dependencies come first.
    Compile {
        /// Source directory (policy/ and config/).
        #[arg(short, long)]
        source: PathBuf,

        /// Output artifact path.
        #[arg(short, long)]
        output: PathBuf,

        /// Project manifest. Defaults to portcullis.yaml in the source
        /// directory when present.
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Dependency artifact(s), consulted for references not in the source.
        #[arg(short, long = "dependency", conflicts_with = "manifest")]
        dependencies: Vec<PathBuf>,

        /// Project name recorded in the artifact manifest.
        #[arg(long)]
        name: Option<String>,
    },

    /// Extract the part of an artifact used by one folder.
    Extract {
        /// Path to the .gwa artifact file.
        #[arg(short, long)]
        artifact: PathBuf,

        /// Folder scope, e.g. /apis/orders.
        #[arg(long)]
        scope: String,

        /// Output artifact path.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the manifest and contents of an artifact.
    Inspect {
        /// Path to the .gwa artifact file.
        #[arg(short, long)]
        artifact: PathBuf,

        /// Output format (text or json).
        #[arg(long, default_value = "text")]
        format: String,
    },
}

/// Run the compile command.
fn run_compile(
    source: &Path,
    output: &Path,
    manifest: Option<&Path>,
    dependencies: Vec<PathBuf>,
    name: Option<String>,
) -> ExitCode {
    if !source.is_dir() {
        eprintln!("error: source directory not found: {}", source.display());
        return ExitCode::from(1);
    }

    let default_manifest = source.join(MANIFEST_FILE);
    let manifest_path = match manifest {
        Some(path) => Some(path.to_path_buf()),
        None if dependencies.is_empty() && default_manifest.is_file() => Some(default_manifest),
        None => None,
    };

    let result = match manifest_path {
        Some(path) => {
            let mut project = match ProjectManifest::load(&path) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::from(1);
                }
            };
            if name.is_some() {
                project.name = name;
            }
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            compile_with_manifest(source, &project, base, output)
        }
        None => compile(source, output, &CompileOptions { name, dependencies }),
    };

    match result {
        Ok(manifest) => {
            let entities: usize = manifest.entity_counts.values().sum();
            log_artifact_written!(output = %output.display(), entities);
            eprintln!(
                "compiled {} to {} ({} entities)",
                source.display(),
                output.display(),
                entities
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log_command_failed!(command = "compile", code = e.code().unwrap_or("-"));
            eprintln!("error: compilation failed: {}", e);
            ExitCode::from(1)
        }
    }
}

/// Run the extract command.
fn run_extract(artifact: &Path, scope: &str, output: &Path) -> ExitCode {
    if !artifact.exists() {
        eprintln!("error: artifact not found: {}", artifact.display());
        return ExitCode::from(1);
    }

    match extract(artifact, scope, output) {
        Ok(manifest) => {
            let entities: usize = manifest.entity_counts.values().sum();
            log_artifact_written!(output = %output.display(), scope, entities);
            eprintln!(
                "extracted {} from {} to {} ({} entities)",
                scope,
                artifact.display(),
                output.display(),
                entities
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log_command_failed!(command = "extract", code = e.code().unwrap_or("-"));
            eprintln!("error: extraction failed: {}", e);
            ExitCode::from(1)
        }
    }
}

/// Run the inspect command.
fn run_inspect(artifact: &Path, format: &str) -> ExitCode {
    if !artifact.exists() {
        eprintln!("error: artifact not found: {}", artifact.display());
        return ExitCode::from(1);
    }

    let (manifest, bundle) = match load_artifact(artifact) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };

    match format {
        "json" => match serde_json::to_string_pretty(&manifest) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::from(1);
            }
        },
        "text" => {
            print_manifest(artifact, &manifest);
            println!("entities:");
            for (entity_type, key, entity) in bundle.iter_ordered() {
                println!("  {:<24} {:<40} {}", entity_type.to_string(), key, entity.id);
            }
        }
        other => {
            eprintln!("error: unknown format '{}' (expected text or json)", other);
            return ExitCode::from(1);
        }
    }
    ExitCode::SUCCESS
}

fn print_manifest(artifact: &Path, manifest: &Manifest) {
    println!("artifact:         {}", artifact.display());
    if let Some(name) = &manifest.name {
        println!("name:             {}", name);
    }
    println!("format version:   {}", manifest.portcullis_artifact_version);
    println!("compiler version: {}", manifest.compiler_version);
    println!("compiled at:      {}", manifest.compiled_at);
    if let Some(scope) = &manifest.scope {
        println!("scope:            {}", scope);
    }
    println!("entity counts:");
    for (entity_type, count) in &manifest.entity_counts {
        println!("  {:<24} {}", entity_type.to_string(), count);
    }
    for (file, checksum) in &manifest.checksums {
        println!("checksum:         {} {}", file, checksum);
    }
    for dependency in &manifest.dependencies {
        println!(
            "dependency:       {} ({})",
            dependency.name.as_deref().unwrap_or(&dependency.path),
            dependency.sha256
        );
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(log_format) = LogFormat::parse(&cli.log_format) else {
        eprintln!(
            "error: unknown log format '{}' (expected pretty or json)",
            cli.log_format
        );
        return ExitCode::from(2);
    };
    let telemetry = TelemetryConfig::new()
        .with_log_level(cli.log_level.as_str())
        .with_log_format(log_format)
        .with_source_location(cli.log_source_location);
    if let Err(e) = portcullis_telemetry::init(&telemetry) {
        eprintln!("error: {}", e);
        return ExitCode::from(2);
    }
    log_startup!(version = env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Compile {
            source,
            output,
            manifest,
            dependencies,
            name,
        } => run_compile(&source, &output, manifest.as_deref(), dependencies, name),
        Commands::Extract {
            artifact,
            scope,
            output,
        } => run_extract(&artifact, &scope, &output),
        Commands::Inspect { artifact, format } => run_inspect(&artifact, &format),
    }
}
