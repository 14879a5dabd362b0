use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bamstats::{AnnotationIndex, BamSource, Config, pipeline};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let workers = config.effective_workers();
    tracing::info!("Running bamstats {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Using {} worker threads", workers);

    let source = BamSource::open(&config.input)
        .with_context(|| format!("cannot open {}", config.input.display()))?;

    let index = match &config.annotation {
        Some(path) => {
            let started = Instant::now();
            let index = AnnotationIndex::from_path(path, &source.chromosome_lengths(), &config.index_options())
                .with_context(|| format!("cannot index annotation {}", path.display()))?;
            tracing::info!(elapsed = ?started.elapsed(), "annotation ready");
            Some(index)
        }
        None => None,
    };

    let stats = pipeline::process(&source, index.as_ref(), &config.pipeline_options())
        .inspect_err(|e| tracing::error!(kind = e.kind(), "{}", e))?;

    if config.writes_to_stdout() {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        stats.write_json(&mut out)?;
        out.flush()?;
    } else {
        let file = File::create(&config.output)
            .with_context(|| format!("cannot create {}", config.output))?;
        let mut out = BufWriter::new(file);
        stats.write_json(&mut out)?;
        out.flush()?;
    }

    Ok(())
}
