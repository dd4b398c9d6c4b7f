pub mod worker;

mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use colloq_service::{ColloqService, IngestMode, Stores};
use colloq_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = colloq_cli::VERSION,
	rename_all = "kebab",
	styles = colloq_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// Directory whose `.txt` and `.md` files are ingested.
	#[arg(long, value_name = "DIR")]
	pub path: PathBuf,
	#[arg(long, value_enum, default_value_t = Mode::SkipExisting)]
	pub mode: Mode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Mode {
	SkipExisting,
	Force,
	Resume,
}
impl From<Mode> for IngestMode {
	fn from(mode: Mode) -> Self {
		match mode {
			Mode::SkipExisting => Self::SkipExisting,
			Mode::Force => Self::Force,
			Mode::Resume => Self::Resume,
		}
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = colloq_config::load(&args.config)?;

	colloq_cli::init_tracing(&config.service.log_level);

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(config.storage.index.vector_dim).await?;

	let service = ColloqService::new(config, Stores::from_db(db));
	let summary = worker::index_directory(&service, &args.path, args.mode.into()).await?;

	tracing::info!(
		files = summary.files,
		files_skipped = summary.files_skipped,
		files_failed = summary.files_failed,
		chunks_written = summary.chunks_written,
		chunks_existing = summary.chunks_existing,
		chunks_failed = summary.chunks_failed,
		"Indexing finished."
	);

	if summary.files_failed > 0 || summary.chunks_failed > 0 {
		tracing::warn!("Some sources were not fully indexed. Rerun with --mode resume.");
	}

	Ok(())
}
