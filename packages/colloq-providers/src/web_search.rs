use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};
use colloq_config::WebSearchProviderConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResult {
	pub title: String,
	pub url: String,
	#[serde(default)]
	pub content: String,
}

pub async fn search(
	cfg: &WebSearchProviderConfig,
	query: &str,
	max_results: usize,
) -> Result<Vec<WebResult>> {
	let client = crate::client(cfg.timeout_ms)?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "query": query, "max_results": max_results });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = crate::check_status(res).await?.json().await?;
	let mut results = parse_web_search_response(json)?;

	results.truncate(max_results);

	Ok(results)
}

fn parse_web_search_response(mut json: Value) -> Result<Vec<WebResult>> {
	let Some(results) = json.get_mut("results").map(Value::take) else {
		return Err(Error::InvalidResponse {
			message: "Web search response is missing results array.".to_string(),
		});
	};

	Ok(serde_json::from_value(results)?)
}
