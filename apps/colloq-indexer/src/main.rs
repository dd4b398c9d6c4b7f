use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = colloq_indexer::Args::parse();

	colloq_indexer::run(args).await
}
