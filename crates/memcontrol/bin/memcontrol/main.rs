mod cmd;
use clap::{Parser, Subcommand};
use cmd::bench::BenchArgs;
use eyre::Result;

#[cfg(not(feature = "global-alloc"))]
#[global_allocator]
static GLOBAL: memcontrol::MemControlAllocator = memcontrol::MemControlAllocator::system();

#[derive(Subcommand, Debug)]
pub enum MCSubcommand {
    #[command(about = "Run a collective benchmark and report heap usage per iteration")]
    Bench(BenchArgs),
}

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "memcontrol CLI: count allocations, reallocations and frees made by collective benchmarks

Every iteration is one measurement window. Reports are averaged across ranks or printed per rank."
)]
pub struct MCArgs {
    #[command(subcommand)]
    pub cmd: MCSubcommand,
}

fn main() -> Result<()> {
    init_logging();
    let root_args = MCArgs::parse();

    match root_args.cmd {
        MCSubcommand::Bench(args) => {
            args.run()?;
        }
    }

    Ok(())
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
