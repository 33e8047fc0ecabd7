use clap::Parser;

#[derive(Debug, Parser)]
struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();
	let config = asi_config::load(&args.config)?;

	asi_api::init_tracing(&config.service.log_level);
	asi_api::serve(config).await
}
