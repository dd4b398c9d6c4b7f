use std::{
	collections::{BTreeMap, HashMap},
	sync::LazyLock,
};

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

static YEAR_RE: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"(?:^|[^0-9])((?:19|20)[0-9]{2})(?:[^0-9]|$)").ok());

const STOPWORDS: &[&str] = &[
	"about", "after", "also", "and", "any", "are", "been", "but", "can", "for", "from", "has",
	"have", "into", "its", "may", "more", "not", "one", "only", "other", "our", "shall", "should",
	"such", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
	"those", "under", "was", "were", "what", "when", "which", "who", "will", "with", "would", "you",
	"your",
];
const MIN_TERM_CHARS: usize = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Enrichment {
	pub year: Option<i32>,
	pub department: Option<String>,
	/// Space-separated, deduplicated, lowercase terms.
	pub keywords: String,
}

/// Derives year, department and keyword metadata for a source from its name and content.
pub fn enrich(
	source_name: &str,
	content: &str,
	departments: &BTreeMap<String, Vec<String>>,
	max_keywords: usize,
) -> Enrichment {
	let year = detect_year(source_name).or_else(|| detect_year(content));
	let department = detect_department(source_name, departments)
		.or_else(|| detect_department(content, departments));
	let keywords =
		synthesize_keywords(source_name, content, year, department.as_deref(), max_keywords);

	Enrichment { year, department, keywords }
}

pub fn detect_year(text: &str) -> Option<i32> {
	YEAR_RE
		.as_ref()?
		.captures(text)
		.and_then(|caps| caps.get(1))
		.and_then(|found| found.as_str().parse().ok())
}

pub fn detect_department(
	text: &str,
	departments: &BTreeMap<String, Vec<String>>,
) -> Option<String> {
	let haystack = text.to_lowercase();

	departments
		.iter()
		.find(|(_, needles)| {
			needles.iter().any(|needle| haystack.contains(&needle.trim().to_lowercase()))
		})
		.map(|(label, _)| label.clone())
}

fn synthesize_keywords(
	source_name: &str,
	content: &str,
	year: Option<i32>,
	department: Option<&str>,
	max_keywords: usize,
) -> String {
	let mut out: Vec<String> = Vec::new();
	let push = |term: String, out: &mut Vec<String>| {
		if out.len() < max_keywords && !out.contains(&term) {
			out.push(term);
		}
	};

	// Separators common in file names split source terms apart.
	let source_words = source_name.replace(['_', '-', '.', '/'], " ");

	for term in terms(&source_words) {
		push(term, &mut out);
	}
	if let Some(year) = year {
		push(year.to_string(), &mut out);
	}
	if let Some(department) = department {
		push(normalize_term(department), &mut out);
	}

	let mut counts: HashMap<String, usize> = HashMap::new();

	for term in terms(content) {
		*counts.entry(term).or_default() += 1;
	}

	let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();

	// Ties break alphabetically so the output is stable across runs.
	ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

	for (term, _) in ranked {
		push(term, &mut out);
	}

	out.join(" ")
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
	text.unicode_words().map(normalize_term).filter(|term| {
		term.chars().count() >= MIN_TERM_CHARS
			&& !term.chars().all(|c| c.is_ascii_digit())
			&& !STOPWORDS.contains(&term.as_str())
	})
}

fn normalize_term(raw: &str) -> String {
	raw.nfkc().collect::<String>().to_lowercase()
}
