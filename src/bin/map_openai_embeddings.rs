use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use map_openai_embeddings::config::ConfigError;
use map_openai_embeddings::{
    run_stream, AboutFormat, AboutInfo, ConfigSource, GptEmbeddingMapper, MapperConfig,
    OpenAiEmbedder,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "map-openai-embeddings",
    version,
    about = "Split documents into segments, then vectorize them with OpenAI embeddings"
)]
struct MapperCli {
    /// Config JSON file, or `ENV` to read MAP_OPENAI_EMBEDDINGS_* variables (repeatable)
    #[arg(long = "config", value_name = "PATH|ENV")]
    config: Vec<String>,

    /// Read Singer messages from this file instead of stdin
    #[arg(long)]
    input: Option<PathBuf>,

    /// Print plugin metadata and exit
    #[arg(long, default_value_t = false)]
    about: bool,

    /// Output format for --about
    #[arg(long, value_enum, default_value_t = AboutFormat::Json)]
    format: AboutFormat,

    /// Log filter (overrides RUST_LOG), e.g. `debug` or `map_openai_embeddings=debug`
    #[arg(long, env = "MAP_OPENAI_EMBEDDINGS_LOG_LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = MapperCli::parse();
    init_tracing(cli.log_level.as_deref());

    if cli.about {
        println!("{}", AboutInfo::current().render(cli.format)?);
        return Ok(());
    }

    let sources: Vec<ConfigSource> = cli.config.iter().map(|arg| ConfigSource::parse(arg)).collect();
    let config = MapperConfig::load(&sources).context("failed to load mapper settings")?;
    let report = config.validate(true)?;
    for warning in &report.warnings {
        warn!("{warning}");
    }

    let api_key = config.resolve_api_key().ok_or(ConfigError::MissingApiKey)?;
    let embedder = OpenAiEmbedder::new(
        &api_key,
        &config.openai_base_url,
        &config.openai_model,
        config.openai_timeout(),
    )?;
    info!(
        model = embedder.model(),
        text_property = %config.document_text_property,
        split_documents = config.split_documents,
        "starting mapper"
    );
    let mapper = GptEmbeddingMapper::new(config, embedder)?;

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    match &cli.input {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("failed to open {:?}", path))?;
            run_stream(BufReader::new(file), &mut writer, &mapper)?;
        }
        None => {
            run_stream(io::stdin().lock(), &mut writer, &mapper)?;
        }
    }
    Ok(())
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
