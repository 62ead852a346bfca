//! mrplan CLI: compile YAML operator plans into map/reduce job graphs.

use clap::{Parser, Subcommand};
use mrplan_core::config::CompilerConfig;
use mrplan_planner::{compile, explain, parse_yaml_plan, Collaborators, Compiled, PlanConfig};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mrplan")]
#[command(about = "Compile operator DAGs into two-phase map/reduce job graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a plan and print the job graph
    Compile {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        /// Temp-name seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Default reducer count (overrides config)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Print the compiled graph as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Validate a plan YAML file (parse and shape check)
    Validate {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Show the compiled job graph (EXPLAIN)
    Explain {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        /// Default reducer count (for planning)
        #[arg(long)]
        parallelism: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            plan,
            seed,
            parallelism,
            json,
        } => {
            if let Err(e) = compile_plan(&plan, seed, parallelism, json) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { plan } => {
            if let Err(e) = validate_plan(&plan) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Plan is valid");
        }
        Commands::Explain { plan, parallelism } => {
            if let Err(e) = explain_plan(&plan, parallelism) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load_and_compile(
    plan_path: &PathBuf,
    seed: Option<u64>,
    parallelism: Option<usize>,
) -> Result<Compiled, Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(plan_path)?;
    let parsed = parse_yaml_plan(&yaml_content)?;

    let mut config = CompilerConfig::from_env();
    apply_plan_config(&mut config, &parsed.config);
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(p) = parallelism {
        config.default_parallelism = Some(p);
    }

    let collab = Collaborators::from_config(&config);
    Ok(compile(&parsed.plan, &config, &collab)?)
}

fn compile_plan(
    plan_path: &PathBuf,
    seed: Option<u64>,
    parallelism: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let compiled = load_and_compile(plan_path, seed, parallelism)?;
    if json {
        println!("{}", compiled.to_json()?);
        return Ok(());
    }

    println!("✓ Plan compiled successfully");
    println!("  Jobs: {}", compiled.graph.len());
    println!("  Edges: {}", compiled.graph.edges().len());
    println!("  Warnings: {}", compiled.warnings.len());
    println!("  Plan hash: {}", compiled.fingerprint()?);
    for w in &compiled.warnings {
        println!("  warning: {}", w);
    }
    Ok(())
}

fn validate_plan(plan_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(plan_path)?;
    let parsed = parse_yaml_plan(&yaml_content)?;
    mrplan_planner::logical::check_input(&parsed.plan)?;
    Ok(())
}

fn explain_plan(
    plan_path: &PathBuf,
    parallelism: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let compiled = load_and_compile(plan_path, None, parallelism)?;
    print!("{}", explain(&compiled));
    Ok(())
}

fn apply_plan_config(cfg: &mut CompilerConfig, doc: &PlanConfig) {
    if let Some(dir) = &doc.temp_dir {
        cfg.temp_dir = dir.clone();
    }
    if let Some(serializer) = &doc.temp_serializer {
        cfg.temp_serializer = serializer.clone();
    }
    if let Some(seed) = doc.seed {
        cfg.seed = seed;
    }
    if let Some(p) = doc.default_parallelism {
        cfg.default_parallelism = Some(p);
    }
    if let Some(k) = doc.skew_reducers {
        cfg.skew_reducers = Some(k);
    }
    if let Some(rate) = doc.skew_sample_rate {
        cfg.skew_sample_rate = rate;
    }
    if let Some(fraction) = doc.skew_memory_fraction {
        cfg.skew_memory_fraction = fraction;
    }
    if let Some(size) = doc.sort_sample_size {
        cfg.sort_sample_size = size;
    }
    if let Some(on) = doc.adjust_rearranges {
        cfg.adjust_rearranges = on;
    }
    if let Some(on) = doc.adjust_limits {
        cfg.adjust_limits = on;
    }
    if let Some(loaders) = &doc.indexed_loaders {
        cfg.indexed_loaders = loaders.clone();
    }
    if let Some(loaders) = &doc.collected_group_loaders {
        cfg.collected_group_loaders = loaders.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_plan_config, CompilerConfig};
    use mrplan_planner::PlanConfig;

    #[test]
    fn plan_config_overrides_env_defaults() {
        let mut config = CompilerConfig::default();
        let plan = PlanConfig {
            temp_dir: Some("/tmp/plan".into()),
            seed: Some(42),
            adjust_limits: Some(false),
            indexed_loaders: Some(vec!["IndexedStorage".into()]),
            ..Default::default()
        };
        apply_plan_config(&mut config, &plan);
        assert_eq!(config.temp_dir, "/tmp/plan");
        assert_eq!(config.seed, 42);
        assert!(!config.adjust_limits);
        assert!(config.adjust_rearranges);
        assert_eq!(config.indexed_loaders, vec!["IndexedStorage".to_string()]);
    }

    #[test]
    fn cli_overrides_higher_priority_than_config() {
        let mut config = CompilerConfig::default();
        let plan = PlanConfig {
            default_parallelism: Some(8),
            ..Default::default()
        };
        apply_plan_config(&mut config, &plan);
        assert_eq!(config.default_parallelism, Some(8));

        // Simulate CLI override after config
        config.default_parallelism = Some(2);
        assert_eq!(config.default_parallelism, Some(2));
    }
}
