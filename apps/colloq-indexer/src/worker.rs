use std::{
	fs,
	path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{Error, Result};
use colloq_service::{ColloqService, IngestMode, IngestRequest, SourceMetadata};

const EXTENSIONS: [&str; 2] = ["md", "txt"];

/// A file picked up by the walk. `source_id` is its path relative to the root, `/`-separated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
	pub path: PathBuf,
	pub source_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
	pub files: u32,
	pub files_skipped: u32,
	pub files_failed: u32,
	pub chunks_written: u32,
	pub chunks_existing: u32,
	pub chunks_failed: u32,
}

/// Lists every `.txt` and `.md` file under `root`, sorted by source id.
pub fn collect_sources(root: &Path) -> Result<Vec<SourceFile>> {
	if !root.is_dir() {
		return Err(Error::NotADirectory { path: root.to_path_buf() });
	}

	let mut sources = Vec::new();

	for entry in WalkDir::new(root).follow_links(true) {
		let entry = entry.map_err(|err| Error::Walk { path: root.to_path_buf(), source: err })?;

		if !entry.file_type().is_file() || !has_text_extension(entry.path()) {
			continue;
		}

		let Some(source_id) = source_id_for(root, entry.path()) else {
			continue;
		};

		sources.push(SourceFile { path: entry.into_path(), source_id });
	}

	sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));

	Ok(sources)
}

/// Ingests every source under `root`. A file that cannot be read or ingested is logged and
/// counted; the run moves on to the next one.
pub async fn index_directory(
	service: &ColloqService,
	root: &Path,
	mode: IngestMode,
) -> Result<RunSummary> {
	let sources = collect_sources(root)?;
	let mut summary = RunSummary::default();

	tracing::info!(root = %root.display(), files = sources.len(), ?mode, "Indexing directory.");

	for source in sources {
		summary.files += 1;

		let raw_text = match fs::read_to_string(&source.path) {
			Ok(raw_text) => raw_text,
			Err(err) => {
				tracing::error!(
					source_id = %source.source_id,
					error = %err,
					"Failed to read source file."
				);

				summary.files_failed += 1;

				continue;
			},
		};
		let request = IngestRequest {
			source_id: source.source_id.clone(),
			raw_text,
			metadata: SourceMetadata::default(),
			mode,
		};

		match service.ingest(request).await {
			Ok(report) => {
				tracing::info!(
					source_id = %report.source_id,
					skipped = report.skipped,
					chunks_written = report.chunks_written,
					chunks_existing = report.chunks_existing,
					chunks_failed = report.chunks_failed,
					"Source indexed."
				);

				if report.skipped {
					summary.files_skipped += 1;
				}

				summary.chunks_written += report.chunks_written;
				summary.chunks_existing += report.chunks_existing;
				summary.chunks_failed += report.chunks_failed;
			},
			Err(err) => {
				tracing::error!(
					source_id = %source.source_id,
					error = %err,
					"Failed to index source."
				);

				summary.files_failed += 1;
			},
		}
	}

	Ok(summary)
}

fn has_text_extension(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

fn source_id_for(root: &Path, path: &Path) -> Option<String> {
	let relative = path.strip_prefix(root).ok()?;
	let parts: Vec<&str> =
		relative.components().map(|part| part.as_os_str().to_str()).collect::<Option<_>>()?;

	(!parts.is_empty()).then(|| parts.join("/"))
}
