pub mod enrich;

pub use enrich::{Enrichment, enrich};

use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
	pub max_chars: u32,
	pub overlap_chars: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
	pub chunk_index: i32,
	/// Byte offsets into the source text.
	pub start_offset: usize,
	pub end_offset: usize,
	/// The source between the offsets, minus any whitespace run too long to fit in a chunk.
	pub text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Boundary {
	Paragraph,
	Line,
	Sentence,
	Word,
	Char,
}
impl Boundary {
	fn next(self) -> Self {
		match self {
			Self::Paragraph => Self::Line,
			Self::Line => Self::Sentence,
			Self::Sentence => Self::Word,
			Self::Word | Self::Char => Self::Char,
		}
	}
}

/// Splits `text` into chunks of at most `max_chars` characters where each chunk after the first
/// begins with the last `overlap_chars` characters of its predecessor.
pub fn split_text(text: &str, cfg: &ChunkingConfig) -> Vec<Chunk> {
	let max_chars = cfg.max_chars.max(1) as usize;
	let overlap_chars = (cfg.overlap_chars as usize).min(max_chars - 1);
	// Pieces leave room for the carried overlap so a chunk never exceeds `max_chars`.
	let piece_limit = max_chars - overlap_chars;
	let mut pieces = Vec::new();

	segment(text, 0, Boundary::Paragraph, piece_limit, &mut pieces);

	let mut chunks = Vec::new();
	let mut carry: Option<Carry> = None;
	let mut body: Option<(usize, usize, usize)> = None;

	for (piece_start, piece_end) in pieces {
		let piece_chars = text[piece_start..piece_end].chars().count();
		let carry_chars = carry.as_ref().map_or(0, |carry| carry.chars);

		body = match body {
			None => Some((piece_start, piece_end, piece_chars)),
			Some((start, _, chars)) if carry_chars + chars + piece_chars <= max_chars =>
				Some((start, piece_end, chars + piece_chars)),
			Some((start, end, _)) => {
				push_chunk(text, start, end, overlap_chars, &mut carry, &mut chunks);

				Some((piece_start, piece_end, piece_chars))
			},
		};
	}

	if let Some((start, end, _)) = body {
		push_chunk(text, start, end, overlap_chars, &mut carry, &mut chunks);
	}

	chunks
}

/// Tail of the last emitted chunk, prepended to the next one.
struct Carry {
	start_offset: usize,
	text: String,
	chars: usize,
}

/// Emits `carry` followed by `text[start..end]`. A whitespace-only chunk is skipped and leaves
/// `carry` untouched, so the next chunk still overlaps the last emitted one.
fn push_chunk(
	text: &str,
	start: usize,
	end: usize,
	overlap_chars: usize,
	carry: &mut Option<Carry>,
	chunks: &mut Vec<Chunk>,
) {
	let body = &text[start..end];
	let (start_offset, chunk_text) = match carry.as_ref() {
		Some(carry) => (carry.start_offset, format!("{}{body}", carry.text)),
		None => (start, body.to_string()),
	};

	if chunk_text.trim().is_empty() {
		return;
	}

	let carried_len = chunk_text.len() - body.len();
	let tail_idx = tail_index(&chunk_text, overlap_chars);
	let tail = &chunk_text[tail_idx..];
	let tail_offset = match carry.as_ref() {
		Some(carry) if tail_idx < carried_len => carry.start_offset + tail_idx,
		_ => start + (tail_idx - carried_len),
	};

	*carry = Some(Carry {
		start_offset: tail_offset,
		text: tail.to_string(),
		chars: tail.chars().count(),
	});

	chunks.push(Chunk {
		chunk_index: chunks.len() as i32,
		start_offset,
		end_offset: end,
		text: chunk_text,
	});
}

fn tail_index(text: &str, overlap_chars: usize) -> usize {
	if overlap_chars == 0 {
		return text.len();
	}

	text.char_indices().rev().nth(overlap_chars - 1).map(|(idx, _)| idx).unwrap_or(0)
}

fn segment(
	text: &str,
	base: usize,
	boundary: Boundary,
	limit: usize,
	out: &mut Vec<(usize, usize)>,
) {
	if text.is_empty() {
		return;
	}
	if text.chars().count() <= limit {
		out.push((base, base + text.len()));

		return;
	}
	let parts: Vec<&str> = match boundary {
		Boundary::Paragraph => text.split_inclusive("\n\n").collect(),
		Boundary::Line => text.split_inclusive('\n').collect(),
		Boundary::Sentence => text.split_sentence_bounds().collect(),
		Boundary::Word => text.split_word_bounds().collect(),
		Boundary::Char => {
			let mut parts = Vec::new();
			let mut piece_start = 0;

			for (count, (idx, _)) in text.char_indices().enumerate() {
				if count > 0 && count % limit == 0 {
					parts.push(&text[piece_start..idx]);

					piece_start = idx;
				}
			}

			parts.push(&text[piece_start..]);

			parts
		},
	};

	if parts.len() <= 1 {
		segment(text, base, boundary.next(), limit, out);

		return;
	}

	let mut offset = base;

	for part in parts {
		segment(part, offset, boundary.next(), limit, out);

		offset += part.len();
	}
}
