//! AI category mapping advisor. Given a product title and a target
//! marketplace's tree, asks the LLM gateway for the closest target leaves,
//! grounded by previously human-verified mappings. The model's output is
//! treated as untrusted: fenced, truncated, or hallucinated answers degrade
//! to a low-confidence fallback instead of failing the request.

use crate::categories;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::llm::{LlmClient, LlmError, LlmMessage};
use crate::models::CategoryNode;
use crate::store::VerifiedMapping;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MAX_SUGGESTIONS: usize = 3;
const MAX_LEAVES_IN_PROMPT: usize = 120;
const MAX_MAPPINGS_IN_PROMPT: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub category_id: String,
    pub category_name: String,
    pub full_path: String,
    pub confidence: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn suggest(
    llm: &LlmClient,
    product_title: &str,
    product_description: Option<&str>,
    target_tree: &[CategoryNode],
    verified: &[VerifiedMapping],
) -> SyncResult<Vec<Suggestion>> {
    let title = product_title.trim();
    if title.is_empty() {
        return Err(SyncError::new(
            ErrorKind::ApiError,
            "product title is required for category suggestions",
        ));
    }
    let leaves = categories::leaf_paths(target_tree);
    if leaves.is_empty() {
        return Err(SyncError::new(
            ErrorKind::NoProducts,
            "target marketplace has no categories to map onto",
        ));
    }

    let prompt = build_prompt(title, product_description, &leaves, verified);
    let messages = [
        LlmMessage::system(
            "You map e-commerce categories between marketplaces. Answer with a JSON array only, \
             no prose: [{\"category_id\": \"...\", \"confidence\": 0.0-1.0, \"reason\": \"...\"}]. \
             Use only category ids from the provided list.",
        ),
        LlmMessage::user(prompt),
    ];

    match llm.chat(&messages).await {
        Ok(response) => {
            let mut suggestions = parse_suggestions(&response.text, &leaves);
            if suggestions.is_empty() {
                debug!(target: "pazarsync.advisor", "model returned no usable suggestions");
                suggestions.push(fallback_suggestion(&leaves));
            }
            Ok(suggestions)
        }
        Err(LlmError::Status(429)) => Err(SyncError::with_status(
            ErrorKind::RateLimited,
            "AI gateway is throttling category suggestions",
            429,
        )),
        Err(LlmError::Status(402)) => Err(SyncError::with_status(
            ErrorKind::PaymentRequired,
            "AI gateway quota is exhausted",
            402,
        )),
        Err(err) => {
            warn!(target: "pazarsync.advisor", error = %err, "gateway unavailable, using fallback suggestion");
            Ok(vec![fallback_suggestion(&leaves)])
        }
    }
}

fn build_prompt(
    title: &str,
    description: Option<&str>,
    leaves: &[(String, String)],
    verified: &[VerifiedMapping],
) -> String {
    let mut prompt = format!("Product title: \"{title}\"\n");
    if let Some(description) = description.map(str::trim).filter(|text| !text.is_empty()) {
        prompt.push_str(&format!("Product description: \"{description}\"\n"));
    }
    prompt.push_str("\nTarget categories (id: path):\n");
    for (id, path) in leaves.iter().take(MAX_LEAVES_IN_PROMPT) {
        prompt.push_str(&format!("{id}: {path}\n"));
    }
    if !verified.is_empty() {
        prompt.push_str("\nPreviously confirmed mappings on this marketplace:\n");
        for mapping in verified.iter().take(MAX_MAPPINGS_IN_PROMPT) {
            prompt.push_str(&format!(
                "\"{}\" -> {} ({})\n",
                mapping.source_category, mapping.target_category_id, mapping.target_category_path
            ));
        }
    }
    prompt.push_str(&format!(
        "\nReturn up to {MAX_SUGGESTIONS} suggestions as a JSON array."
    ));
    prompt
}

#[derive(Deserialize)]
struct RawSuggestion {
    category_id: serde_json::Value,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse the model's answer. Markdown fences are stripped, a JSON array is
/// located anywhere in the text, ids not present in the target tree are
/// dropped, and confidences are clamped into [0, 1].
fn parse_suggestions(text: &str, leaves: &[(String, String)]) -> Vec<Suggestion> {
    let Some(raw) = extract_json_array(text) else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<Vec<RawSuggestion>>(&raw) else {
        return Vec::new();
    };
    let mut suggestions: Vec<Suggestion> = parsed
        .into_iter()
        .filter_map(|raw| {
            let id = match &raw.category_id {
                serde_json::Value::String(text) => text.clone(),
                serde_json::Value::Number(number) => number.to_string(),
                _ => return None,
            };
            let path = leaves
                .iter()
                .find(|(leaf_id, _)| *leaf_id == id)
                .map(|(_, path)| path.clone())?;
            Some(Suggestion {
                category_id: id,
                category_name: leaf_name(&path),
                full_path: path,
                confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                reason: raw.reason,
            })
        })
        .collect();
    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    suggestions.dedup_by(|a, b| a.category_id == b.category_id);
    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

/// Find the outermost JSON array in free-form model output, tolerating
/// ```json fences and surrounding prose.
fn extract_json_array(text: &str) -> Option<String> {
    let cleaned = strip_markdown_fence(text);
    let start = cleaned.find('[')?;
    let end = cleaned.rfind(']')?;
    (end > start).then(|| cleaned[start..=end].to_string())
}

fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line, then the closing fence
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest).trim()
}

fn leaf_name(path: &str) -> String {
    path.rsplit(" > ").next().unwrap_or(path).to_string()
}

fn fallback_suggestion(leaves: &[(String, String)]) -> Suggestion {
    let (id, path) = &leaves[0];
    Suggestion {
        category_id: id.clone(),
        category_name: leaf_name(path),
        full_path: path.clone(),
        confidence: 0.1,
        reason: Some("automatic fallback, review before applying".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::{FlatCategory, build_tree};

    fn leaves() -> Vec<(String, String)> {
        let tree = build_tree(vec![
            FlatCategory::new("1000", "Elektronik", None),
            FlatCategory::new("1001", "Telefon", Some("1000")),
            FlatCategory::new("2000", "Giyim", None),
        ]);
        categories::leaf_paths(&tree)
    }

    #[test]
    fn fenced_answer_parses() {
        let answer = "```json\n[{\"category_id\": \"1001\", \"confidence\": 0.9, \"reason\": \"phones\"}]\n```";
        let suggestions = parse_suggestions(answer, &leaves());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].category_id, "1001");
        assert_eq!(suggestions[0].category_name, "Telefon");
        assert_eq!(suggestions[0].full_path, "Elektronik > Telefon");
    }

    #[test]
    fn prose_around_array_is_tolerated() {
        let answer = "Sure! Here are my picks: [{\"category_id\": 1001, \"confidence\": 0.7}] hope that helps";
        let suggestions = parse_suggestions(answer, &leaves());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].category_id, "1001");
    }

    #[test]
    fn hallucinated_ids_are_dropped() {
        let answer = r#"[{"category_id": "9999", "confidence": 0.99}, {"category_id": "2000", "confidence": 0.4}]"#;
        let suggestions = parse_suggestions(answer, &leaves());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].category_id, "2000");
    }

    #[test]
    fn sorted_desc_and_capped_at_three() {
        let tree = build_tree(
            (0..6)
                .map(|i| FlatCategory::new(i.to_string(), format!("Cat {i}"), None))
                .collect(),
        );
        let leaves = categories::leaf_paths(&tree);
        let answer = r#"[
            {"category_id": "0", "confidence": 0.2},
            {"category_id": "1", "confidence": 0.9},
            {"category_id": "2", "confidence": 0.5},
            {"category_id": "3", "confidence": 0.7}
        ]"#;
        let suggestions = parse_suggestions(answer, &leaves);
        assert_eq!(suggestions.len(), 3);
        let confidences: Vec<f64> = suggestions.iter().map(|s| s.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7, 0.5]);
    }

    #[test]
    fn confidence_clamped_into_unit_interval() {
        let answer = r#"[{"category_id": "1001", "confidence": 7.5}]"#;
        let suggestions = parse_suggestions(answer, &leaves());
        assert_eq!(suggestions[0].confidence, 1.0);
    }

    #[test]
    fn garbage_answer_yields_empty() {
        assert!(parse_suggestions("no json here", &leaves()).is_empty());
        assert!(parse_suggestions("[not valid json]", &leaves()).is_empty());
    }

    #[test]
    fn fallback_points_at_a_real_leaf() {
        let leaves = leaves();
        let fallback = fallback_suggestion(&leaves);
        assert_eq!(fallback.confidence, 0.1);
        assert!(leaves.iter().any(|(id, _)| *id == fallback.category_id));
    }

    #[test]
    fn prompt_carries_verified_mappings() {
        let verified = vec![VerifiedMapping {
            source_category: "Cep Telefonu".into(),
            target_category_id: "1001".into(),
            target_category_path: "Elektronik > Telefon".into(),
        }];
        let prompt = build_prompt("Akıllı Telefon 128GB", None, &leaves(), &verified);
        assert!(prompt.contains("Akıllı Telefon 128GB"));
        assert!(prompt.contains("Cep Telefonu"));
        assert!(prompt.contains("1001: Elektronik > Telefon"));
    }

    #[test]
    fn description_lands_in_prompt_when_present() {
        let prompt = build_prompt("Orkide", Some("Beyaz saksılı orkide"), &leaves(), &[]);
        assert!(prompt.contains("Beyaz saksılı orkide"));
        let without = build_prompt("Orkide", Some("   "), &leaves(), &[]);
        assert!(!without.contains("Product description"));
    }
}
