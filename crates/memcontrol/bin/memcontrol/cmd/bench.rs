mod collectives;

use clap::Parser;
use eyre::Result;
use memcontrol::{with_original_provider, Format, MemControlBuilder, ReportMode, SingleProcess};

use collectives::Collective;

#[derive(Debug, Parser)]
pub struct BenchArgs {
    #[arg(value_enum, default_value_t = Collective::Allreduce, help = "Collective to measure")]
    collective: Collective,

    #[arg(long, default_value_t = 4, help = "Worker threads taking part in the collective")]
    workers: usize,

    #[arg(long, default_value_t = 3, help = "Measured iterations, one report each")]
    iterations: usize,

    #[arg(long, default_value_t = 1024, help = "Elements contributed by each worker")]
    elements: usize,

    #[arg(
        long,
        value_enum,
        default_value_t = ReportMode::Aggregate,
        help = "How each window is reported"
    )]
    mode: ReportMode,

    #[arg(long, help = "Print JSON lines instead of a table")]
    json: bool,
}

impl BenchArgs {
    pub fn run(&self) -> Result<()> {
        if self.workers == 0 {
            eyre::bail!("--workers must be at least 1");
        }

        let format = if self.json { Format::Json } else { Format::Table };
        let mut memory = MemControlBuilder::new(self.collective.to_string())
            .mode(self.mode)
            .format(format)
            .build(SingleProcess);

        memory
            .print_header()
            .map_err(|e| eyre::eyre!("failed to print header: {}", e))?;

        for iteration in 0..self.iterations {
            let outcome = self.collective.run(self.workers, self.elements)?;

            with_original_provider(|| {
                tracing::info!(
                    iteration,
                    collective = %self.collective,
                    checksum = outcome,
                    "iteration finished"
                );
            });

            memory
                .report_window()
                .map_err(|e| eyre::eyre!("failed to report iteration {}: {}", iteration, e))?;
        }

        Ok(())
    }
}
