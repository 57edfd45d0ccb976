//! chainrt CLI - run chain descriptors from the command line
//!
//! Loads a JSON chain descriptor, schedules it on a node and ticks the
//! node until the chain finishes or the tick budget runs out.

use std::path::PathBuf;

use anyhow::Context as _;
use chainrt::core_registry;
use chainrt::runtime::serialize::value_from_json;
use chainrt::runtime::types::derive_type_info;
use chainrt::runtime::{ChainDescriptor, Node, NodeConfig};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chainrt")]
#[command(about = "Run block chains on a cooperative node", long_about = None)]
struct Cli {
    /// Node configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a chain descriptor and run it
    Run {
        /// Path to the chain descriptor
        descriptor: PathBuf,

        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,

        /// Root input of the chain, as JSON
        #[arg(long)]
        input: Option<String>,
    },

    /// List the registered blocks
    Blocks,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let registry = core_registry();

    match cli.command {
        Commands::Run {
            descriptor,
            ticks,
            input,
        } => {
            let config = match &cli.config {
                Some(path) => {
                    let json = std::fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    NodeConfig::from_json(&json)?
                }
                None => NodeConfig::default(),
            };

            let chain = ChainDescriptor::from_path(&descriptor)
                .with_context(|| format!("loading {}", descriptor.display()))?
                .build(&registry)?;
            if let Some(input) = input {
                let json: serde_json::Value = serde_json::from_str(&input).context("parsing --input")?;
                let value = value_from_json(&json);
                chain.set_input_type(derive_type_info(&value));
                chain.set_root_input(value);
            }

            let mut node = Node::with_config(config)?;
            node.schedule(&chain)?;
            let ran = node.run(ticks);

            println!("Chain: {}", chain.name());
            println!("Ticks: {}", ran);
            println!("Iterations: {}", chain.iteration_count());
            println!("State: {:?}", chain.state());
            println!("Output: {}", chain.finished_output());
            if let Some(error) = chain.finished_error() {
                println!("Error: {}", error);
            }

            node.stop_all();
            chain.destroy()?;
        }

        Commands::Blocks => {
            for name in registry.list_types() {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
