use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{path} is not a directory.")]
	NotADirectory { path: PathBuf },
	#[error("Failed to walk {path}: {source}")]
	Walk { path: PathBuf, source: walkdir::Error },
}
