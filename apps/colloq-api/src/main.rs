use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = colloq_api::Args::parse();

	colloq_api::run(args).await
}
