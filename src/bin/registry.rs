//! Protobuf Schema Registry CLI
//!
//! Diffs and lints descriptor sets, and verifies or submits them against
//! the registries defined in `registry.toml`.
//!
//! Descriptor inputs are `FileDescriptorSet` files as written by
//! `protoc --include_imports --descriptor_set_out`, or directories of them.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use prost::Message;
use prost_types::FileDescriptorSet;
use proto_registry::{
    diff, lint, BindingTarget, Comment, ProtoDomain, Profiles, RegistryConfig, RegistryError,
    Registries, Report, ResourceBinding, SchemaContext, Scope,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const DESCRIPTOR_EXTENSIONS: [&str; 3] = ["pb", "desc", "binpb"];

#[derive(Parser)]
#[command(name = "proto-registry")]
#[command(about = "Protobuf schema registry: diff, lint and gate schema changes")]
struct Cli {
    /// Config file (defaults to registry.toml and the user config dir)
    #[arg(short, long)]
    config: Option<String>,

    /// Registry to operate on
    #[arg(short, long, default_value = "default")]
    registry: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Structural diff between two descriptor sets
    Diff {
        reference: PathBuf,
        candidate: PathBuf,
        /// all, prefix:<p>, package:<p>, file:<f>, message:<m>, enum:<e>, service:<s>
        #[arg(short, long, default_value = "all")]
        scope: Scope,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Lint a descriptor set
    Lint {
        candidate: PathBuf,
        #[arg(short, long, default_value = "all")]
        scope: Scope,
        #[arg(long)]
        json: bool,
    },

    /// Validate a candidate against the registry without storing it
    Verify {
        candidate: PathBuf,
        #[arg(short, long, default_value = "all")]
        scope: Scope,
        /// Compatibility profile (defaults to the registry's)
        #[arg(short, long)]
        profile: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Validate a candidate and make it the registry's schema
    Submit {
        candidate: PathBuf,
        #[arg(short, long, default_value = "all")]
        scope: Scope,
        #[arg(short, long)]
        profile: Option<String>,
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Fetch the files matching a scope
    Get {
        #[arg(short, long, default_value = "all")]
        scope: Scope,
        /// Include imported files
        #[arg(short, long)]
        transitive: bool,
        /// Write the FileDescriptorSet here instead of listing file names
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Bind a resource identifier to a message or service
    Bind {
        resource: String,
        #[arg(long, conflicts_with = "service", required_unless_present = "service")]
        message: Option<String>,
        #[arg(long)]
        service: Option<String>,
        /// Replace an existing binding
        #[arg(long)]
        update: bool,
    },

    /// Remove a resource binding
    Unbind { resource: String },

    /// List resource bindings
    Bindings,

    /// List compatibility profiles
    Profiles,

    /// Write the effective configuration to a file
    InitConfig {
        #[arg(default_value = "registry.toml")]
        path: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RegistryConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Diff {
            reference,
            candidate,
            scope,
            json,
        } => {
            let reference = load_descriptors(&reference)?;
            let candidate = load_descriptors(&candidate)?;
            println!("🔍 Diffing {} ({} -> {} files)", scope, reference.file_count(), candidate.file_count());
            let report = diff(&reference, &candidate, &scope)?;
            print_report(&report, json)?;
            Ok(())
        }

        Commands::Lint { candidate, scope, json } => {
            let candidate = load_descriptors(&candidate)?;
            println!("🔍 Linting {} ({} files)", scope, candidate.file_count());
            let report = lint(&candidate, &scope, &config.lint)?;
            print_report(&report, json)?;
            if report.result_count.lint_errors > 0 {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Verify {
            candidate,
            scope,
            profile,
            json,
        } => {
            let registries = Registries::from_config(&config)?;
            let registry = registries.get(&cli.registry)?;
            let candidate = load_descriptors(&candidate)?;
            println!("🔍 Verifying {} against registry '{}'", scope, registry.name());

            let report = registry.verify(&candidate, &scope, profile.as_deref())?;
            print_report(&report, json)?;
            if report.has_errors() {
                println!("❌ Candidate is incompatible");
                std::process::exit(1);
            }
            println!("✅ Candidate is compatible");
            Ok(())
        }

        Commands::Submit {
            candidate,
            scope,
            profile,
            message,
            author,
            email,
        } => {
            let registries = Registries::from_config(&config)?;
            let candidate = load_descriptors(&candidate)?;
            let comment = Comment::new(message.unwrap_or_default())
                .with_author(author.unwrap_or_default(), email.unwrap_or_default());

            match registries.submit(&cli.registry, candidate, &scope, profile.as_deref(), &comment) {
                Ok(report) => {
                    print_report(&report, false)?;
                    println!("✅ Schema accepted by '{}'", cli.registry);
                    for shadow in registries.shadows_of(&cli.registry) {
                        println!("   └─ shadow '{}' rebased", shadow);
                    }
                    Ok(())
                }
                Err(RegistryError::Incompatible { report }) => {
                    print_report(&report, false)?;
                    println!("❌ Schema rejected by '{}'", cli.registry);
                    std::process::exit(1);
                }
                Err(e) => Err(e.into()),
            }
        }

        Commands::Get {
            scope,
            transitive,
            output,
        } => {
            let registries = Registries::from_config(&config)?;
            let set = registries.get(&cli.registry)?.get_schema(&scope, transitive)?;
            match output {
                Some(path) => {
                    fs::write(&path, set.encode_to_vec())
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("✅ Wrote {} file(s) to {}", set.file.len(), path.display());
                }
                None => {
                    for file in &set.file {
                        println!("{}", file.name());
                    }
                }
            }
            Ok(())
        }

        Commands::Bind {
            resource,
            message,
            service,
            update,
        } => {
            let registries = Registries::from_config(&config)?;
            let registry = registries.get(&cli.registry)?;
            let target = match (message, service) {
                (Some(message), _) => BindingTarget::Message(message),
                (None, Some(service)) => BindingTarget::Service(service),
                (None, None) => bail!("either --message or --service is required"),
            };
            let comment = Comment::new(format!("Bind {} to {}", resource, target.name()));
            let binding = ResourceBinding::new(resource, target);
            if update {
                registry.update_binding(binding, &comment)?;
            } else {
                registry.create_binding(binding, &comment)?;
            }
            println!("✅ {}", comment.message());
            Ok(())
        }

        Commands::Unbind { resource } => {
            let registries = Registries::from_config(&config)?;
            let comment = Comment::new(format!("Unbind {}", resource));
            let removed = registries.get(&cli.registry)?.delete_binding(&resource, &comment)?;
            println!("✅ Removed binding {} -> {}", removed.linked_resource, removed.target.name());
            Ok(())
        }

        Commands::Bindings => {
            let registries = Registries::from_config(&config)?;
            let registry = registries.get(&cli.registry)?;
            let bindings = registry.list_bindings()?;
            if bindings.is_empty() {
                println!("No bindings in '{}'", registry.name());
            }
            for binding in bindings {
                let file = registry
                    .get_binding_with_schema(&binding.linked_resource, SchemaContext::InFile)
                    .ok()
                    .and_then(|(_, set)| set.file.first().map(|f| f.name().to_string()))
                    .unwrap_or_else(|| "unresolved".to_string());
                println!(
                    "{} -> {} ({}, updated {})",
                    binding.linked_resource,
                    binding.target.name(),
                    file,
                    binding.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }

        Commands::Profiles => {
            for name in Profiles::NAMES {
                let marker = if name == config.validation.default_profile { "*" } else { " " };
                println!("{} {}", marker, name);
            }
            Ok(())
        }

        Commands::InitConfig { path } => {
            config.save(&path).with_context(|| format!("writing {}", path))?;
            println!("✅ Wrote configuration to {}", path);
            Ok(())
        }
    }
}

/// Read a descriptor set file, or every descriptor set under a directory.
///
/// Sets built with `--include_imports` repeat shared imports; the first
/// copy of each file name wins.
fn load_descriptors(path: &Path) -> anyhow::Result<ProtoDomain> {
    let paths = if path.is_dir() {
        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| DESCRIPTOR_EXTENSIONS.contains(&ext))
            })
            .collect();
        files.sort();
        if files.is_empty() {
            bail!("no descriptor sets found under {}", path.display());
        }
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut seen = HashSet::new();
    let mut builder = ProtoDomain::builder();
    for file in paths {
        debug!(path = %file.display(), "loading descriptor set");
        let bytes = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
        let set = FileDescriptorSet::decode(bytes.as_slice())
            .with_context(|| format!("decoding {}", file.display()))?;
        for proto in set.file {
            if seen.insert(proto.name().to_string()) {
                builder = builder.add(proto);
            }
        }
    }

    Ok(builder.build()?)
}

fn print_report(report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}
