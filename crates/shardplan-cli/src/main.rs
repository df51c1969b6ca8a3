//! shardplan CLI: compile plan documents into coordinator query documents.

use clap::{Parser, Subcommand};
use shardplan_core::config::{Algebra, CompilerConfig};
use shardplan_core::hash::hash_serde;
use shardplan_core::manifest::CompileManifest;
use shardplan_planner::{
    compile_query, extract_fragments, optimize, parse_plan, Catalog, FakeCatalog,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardplan")]
#[command(about = "Distributed query compiler: logical plans in, worker fragments out", long_about = None)]
struct Cli {
    /// Log compiler decisions (rule groups, join merges, hypercube sizing)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PlanArgs {
    /// Path to the plan document (YAML or JSON)
    #[arg(short, long)]
    plan: PathBuf,

    /// Catalog YAML with the worker count and relation cardinalities
    #[arg(short, long)]
    catalog: Option<PathBuf>,

    /// Worker count (overrides the catalog)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Target algebra: left-deep or hyper-cube (overrides SHARDPLAN_ALGEBRA)
    #[arg(long)]
    algebra: Option<Algebra>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a plan into the JSON query document
    Compile {
        #[command(flatten)]
        args: PlanArgs,

        /// Pretty-print the document
        #[arg(long)]
        pretty: bool,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show the optimized physical plan and its fragments
    Explain {
        #[command(flatten)]
        args: PlanArgs,
    },

    /// Parse a plan document without compiling it
    Validate {
        /// Path to the plan document (YAML or JSON)
        #[arg(short, long)]
        plan: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Compile { args, pretty, out } => compile(&args, pretty, out.as_deref()),
        Commands::Explain { args } => explain(&args),
        Commands::Validate { plan } => validate(&plan),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("shardplan=debug,shardplan_planner=debug,shardplan_hc=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Flags over `SHARDPLAN_*` variables over defaults.
fn load_config(args: &PlanArgs) -> CompilerConfig {
    let mut config = CompilerConfig::from_env();
    if let Some(algebra) = args.algebra {
        config.algebra = algebra;
    }
    config
}

fn load_catalog(args: &PlanArgs) -> Result<FakeCatalog, Box<dyn std::error::Error>> {
    let mut catalog = match &args.catalog {
        Some(path) => FakeCatalog::from_yaml(&fs::read_to_string(path)?)?,
        None => FakeCatalog::new(1),
    };
    if let Some(workers) = args.workers {
        catalog.workers = workers;
    }
    Ok(catalog)
}

fn compile(
    args: &PlanArgs,
    pretty: bool,
    out: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args);
    let catalog = load_catalog(args)?;
    let mut parsed = parse_plan(&fs::read_to_string(&args.plan)?)?;
    let root = parsed.root()?;
    tracing::debug!(
        plan = %args.plan.display(),
        nodes = parsed.arena.len(),
        workers = catalog.worker_count(),
        "compiling plan"
    );

    let query = compile_query(&parsed.query, &mut parsed.arena, root, &catalog, &config)?;
    let manifest = CompileManifest::new(
        hash_serde(&query)?,
        config.algebra,
        catalog.worker_count(),
        query.plan.fragment_count(),
    );

    let doc = if pretty {
        serde_json::to_string_pretty(&query)?
    } else {
        serde_json::to_string(&query)?
    };
    match out {
        Some(path) => fs::write(path, doc + "\n")?,
        None => println!("{doc}"),
    }

    eprintln!("✓ Compiled {} fragment(s)", manifest.fragments);
    eprintln!("  Plan hash: {}", manifest.plan_hash);
    Ok(())
}

fn explain(args: &PlanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args);
    let catalog = load_catalog(args)?;
    let mut parsed = parse_plan(&fs::read_to_string(&args.plan)?)?;
    let root = parsed.root()?;

    println!("Logical Plan");
    println!("============");
    print!("{}", parsed.arena.render(root)?);
    println!();

    let physical = optimize(&mut parsed.arena, root, &catalog, &config)?;
    println!(
        "Physical Plan ({:?}, {} workers)",
        config.algebra,
        catalog.worker_count()
    );
    println!("=============");
    print!("{}", parsed.arena.render(physical)?);
    println!();

    println!("Fragments:");
    for (i, nodes) in extract_fragments(&parsed.arena, physical)?.iter().enumerate() {
        let labels = nodes
            .iter()
            .map(|id| parsed.arena.label(*id))
            .collect::<Result<Vec<_>, _>>()?;
        println!("  {}. {}", i + 1, labels.join(" -> "));
    }
    Ok(())
}

fn validate(plan: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut parsed = parse_plan(&fs::read_to_string(plan)?)?;
    let root = parsed.root()?;
    println!("✓ Plan is valid");
    print!("{}", parsed.arena.render(root)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(workers: Option<usize>, algebra: Option<Algebra>) -> PlanArgs {
        PlanArgs {
            plan: PathBuf::from("plan.yaml"),
            catalog: None,
            workers,
            algebra,
        }
    }

    #[test]
    fn flags_override_defaults() {
        let config = load_config(&args(None, Some(Algebra::HyperCube)));
        assert_eq!(config.algebra, Algebra::HyperCube);
        let catalog = load_catalog(&args(Some(8), None)).unwrap();
        assert_eq!(catalog.worker_count(), 8);
        assert_eq!(load_catalog(&args(None, None)).unwrap().worker_count(), 1);
    }

    #[test]
    fn cli_parses_compile_flags() {
        let cli = Cli::try_parse_from([
            "shardplan",
            "compile",
            "--plan",
            "q.yaml",
            "--workers",
            "4",
            "--algebra",
            "hyper-cube",
            "--pretty",
        ])
        .unwrap();
        let Commands::Compile { args, pretty, out } = cli.command else {
            panic!("expected compile");
        };
        assert!(pretty);
        assert!(out.is_none());
        assert_eq!(args.workers, Some(4));
        assert_eq!(args.algebra, Some(Algebra::HyperCube));
    }
}
