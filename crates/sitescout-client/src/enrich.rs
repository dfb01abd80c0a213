use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sitescout_core::entity::DraftEntity;
use sitescout_core::error::ExtractError;
use sitescout_core::model::{ApiCallRecord, ApiCallStatus, ApiKind};
use sitescout_core::traits::{EnrichOutcome, Enricher};
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_KG_BASE_URL: &str = "https://kgsearch.googleapis.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const SYSTEM_PROMPT: &str = "You are a company data classifier. Given extracted company data, \
    respond ONLY with a JSON object of the shape \
    {\"company_type\": string|null, \"description\": string|null, \"product_category\": string|null}. \
    Use null for fields you cannot improve. Do not include explanations.";

/// Industry labels vague enough that an AI suggestion may overwrite them.
const REPLACEABLE_TYPES: &[&str] = &["Other", "Technology"];

/// Enricher backed by an OpenAI-compatible chat API and an optional
/// knowledge-graph lookup, run concurrently.
///
/// Strictly additive: suggestions only fill gaps or replace placeholder
/// values, never erase what the heuristics found. Failures surface as
/// warnings and error-status [`ApiCallRecord`]s; the draft always comes
/// back usable.
#[derive(Clone)]
pub struct AiEnricher {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    kg: Option<KnowledgeGraphConfig>,
    timeout_secs: u64,
}

#[derive(Clone)]
struct KnowledgeGraphConfig {
    base_url: String,
    api_key: String,
}

impl AiEnricher {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ExtractError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            kg: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Enable knowledge-graph description lookups.
    pub fn with_knowledge_graph(mut self, api_key: impl Into<String>) -> Self {
        self.kg = Some(KnowledgeGraphConfig {
            base_url: DEFAULT_KG_BASE_URL.to_string(),
            api_key: api_key.into(),
        });
        self
    }

    pub fn with_knowledge_graph_base_url(mut self, base_url: impl Into<String>) -> Self {
        if let Some(kg) = self.kg.as_mut() {
            kg.base_url = base_url.into().trim_end_matches('/').to_string();
        }
        self
    }

    async fn suggest(&self, draft: &DraftEntity) -> Result<AiSuggestions, ExtractError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: draft_summary(draft),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(map_api_status("ai_enrichment", status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        parse_chat_content(&body)
    }

    async fn kg_lookup(
        &self,
        kg: &KnowledgeGraphConfig,
        company_name: &str,
    ) -> Result<Option<String>, ExtractError> {
        let url = format!("{}/entities:search", kg.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", company_name),
                ("key", kg.api_key.as_str()),
                ("limit", "1"),
                ("types", "Organization"),
            ])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(map_api_status("knowledge_graph", status, &body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(kg_article(&body))
    }

    fn transport_error(&self, e: reqwest::Error) -> ExtractError {
        if e.is_timeout() {
            ExtractError::Timeout(self.timeout_secs)
        } else {
            ExtractError::Connection(e.to_string())
        }
    }
}

impl Enricher for AiEnricher {
    async fn enrich(&self, mut draft: DraftEntity, extraction_id: Uuid) -> EnrichOutcome {
        let mut warnings = Vec::new();
        let mut api_calls = Vec::new();
        let mut auth_failed = false;

        let kg_query = match (&self.kg, &draft.company_name) {
            (Some(kg), Some(name)) => Some((kg.clone(), name.clone())),
            _ => None,
        };

        let ((ai_result, ai_started, ai_elapsed), kg_result) = tokio::join!(
            async {
                let started = Utc::now();
                let clock = Instant::now();
                let result = self.suggest(&draft).await;
                (result, started, clock.elapsed())
            },
            async {
                match &kg_query {
                    Some((kg, name)) => {
                        let started = Utc::now();
                        let clock = Instant::now();
                        let result = self.kg_lookup(kg, name).await;
                        Some((result, started, clock.elapsed()))
                    }
                    None => None,
                }
            }
        );

        match ai_result {
            Ok(suggestions) => {
                api_calls.push(ApiCallRecord {
                    api: ApiKind::AiEnrichment,
                    operation: "classify".to_string(),
                    extraction_id,
                    started_at: ai_started,
                    duration_ms: ai_elapsed.as_millis() as u64,
                    status: ApiCallStatus::Success,
                    request_summary: format!("model={}", self.model),
                    response_summary: format!(
                        "type={:?} category={:?}",
                        suggestions.company_type, suggestions.product_category
                    ),
                });
                apply_ai_suggestions(&mut draft, &suggestions);
            }
            Err(e) => {
                if matches!(e, ExtractError::Auth(_)) {
                    auth_failed = true;
                }
                warnings.push(format!("AI enrichment failed: {e}"));
                api_calls.push(ApiCallRecord {
                    api: ApiKind::AiEnrichment,
                    operation: "classify".to_string(),
                    extraction_id,
                    started_at: ai_started,
                    duration_ms: ai_elapsed.as_millis() as u64,
                    status: ApiCallStatus::Error,
                    request_summary: format!("model={}", self.model),
                    response_summary: e.to_string(),
                });
            }
        }

        if let Some((result, started_at, elapsed)) = kg_result {
            match result {
                Ok(article) => {
                    api_calls.push(ApiCallRecord {
                        api: ApiKind::KnowledgeGraph,
                        operation: "entity_search".to_string(),
                        extraction_id,
                        started_at,
                        duration_ms: elapsed.as_millis() as u64,
                        status: ApiCallStatus::Success,
                        request_summary: "entity search by company name".to_string(),
                        response_summary: match &article {
                            Some(a) => format!("{} chars", a.len()),
                            None => "no match".to_string(),
                        },
                    });
                    if let Some(article) = article {
                        apply_kg_description(&mut draft, &article);
                    }
                }
                Err(e) => {
                    if matches!(e, ExtractError::Auth(_)) {
                        auth_failed = true;
                    }
                    warnings.push(format!("Knowledge graph lookup failed: {e}"));
                    api_calls.push(ApiCallRecord {
                        api: ApiKind::KnowledgeGraph,
                        operation: "entity_search".to_string(),
                        extraction_id,
                        started_at,
                        duration_ms: elapsed.as_millis() as u64,
                        status: ApiCallStatus::Error,
                        request_summary: "entity search by company name".to_string(),
                        response_summary: e.to_string(),
                    });
                }
            }
        }

        EnrichOutcome {
            entity: draft,
            warnings,
            api_calls,
            auth_failed,
        }
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// What the model is allowed to contribute.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AiSuggestions {
    pub company_type: Option<String>,
    pub description: Option<String>,
    pub product_category: Option<String>,
}

fn draft_summary(draft: &DraftEntity) -> String {
    let products: Vec<&str> = draft.products.iter().map(|p| p.name.as_str()).collect();
    format!(
        "Company name: {}\nCurrent type: {}\nDescription: {}\nProducts: {}",
        draft.company_name.as_deref().unwrap_or("unknown"),
        draft.company_type.as_deref().unwrap_or("unknown"),
        draft.description.as_deref().unwrap_or("none"),
        if products.is_empty() {
            "none".to_string()
        } else {
            products.join(", ")
        }
    )
}

fn map_api_status(service: &str, status: u16, body: &str) -> ExtractError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {status}"));

    if status == 401 || status == 403 {
        return ExtractError::Auth(format!("{service}: {message}"));
    }
    ExtractError::Api {
        service: service.to_string(),
        status,
        message,
    }
}

fn parse_chat_content(body: &str) -> Result<AiSuggestions, ExtractError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ExtractError::Parsing(format!("malformed chat response: {e}")))?;
    let content = response
        .choices
        .first()
        .and_then(|c| c.message.content.as_deref())
        .ok_or_else(|| ExtractError::Parsing("empty chat response".into()))?;
    serde_json::from_str(content)
        .map_err(|e| ExtractError::Parsing(format!("model returned invalid JSON: {e}")))
}

/// Gap-filling merge of model suggestions into the draft.
fn apply_ai_suggestions(draft: &mut DraftEntity, suggestions: &AiSuggestions) {
    if let Some(company_type) = &suggestions.company_type {
        let replaceable = draft
            .company_type
            .as_deref()
            .is_none_or(|t| REPLACEABLE_TYPES.contains(&t));
        if replaceable {
            draft.company_type = Some(company_type.clone());
        }
    }

    if draft.description.is_none() {
        draft.description = suggestions.description.clone();
    }

    if let Some(category) = &suggestions.product_category {
        for product in draft.products.iter_mut() {
            if product.category.is_none() {
                product.category = Some(category.clone());
            }
        }
    }
}

/// A knowledge-graph article replaces the description only when it is
/// strictly longer than what the page yielded.
fn apply_kg_description(draft: &mut DraftEntity, article: &str) {
    if draft
        .description
        .as_ref()
        .is_none_or(|d| d.len() < article.len())
    {
        draft.description = Some(article.to_string());
    }
}

fn kg_article(body: &serde_json::Value) -> Option<String> {
    body.get("itemListElement")?
        .as_array()?
        .first()?
        .get("result")?
        .get("detailedDescription")?
        .get("articleBody")?
        .as_str()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescout_core::entity::ProductRecord;

    fn draft() -> DraftEntity {
        let mut d = DraftEntity::new();
        d.company_name = Some("Acme Foods".into());
        d.company_type = Some("Technology".into());
        d.description = Some("Tofu maker".into());
        d.add_product(ProductRecord::new("Tofu Block", "https://acme.test/"));
        d.add_product(
            ProductRecord::new("Soy Milk", "https://acme.test/").with_category("Beverages"),
        );
        d
    }

    #[test]
    fn placeholder_company_type_is_replaced() {
        let mut d = draft();
        apply_ai_suggestions(
            &mut d,
            &AiSuggestions {
                company_type: Some("Plant-based Foods".into()),
                ..AiSuggestions::default()
            },
        );
        assert_eq!(d.company_type.as_deref(), Some("Plant-based Foods"));
    }

    #[test]
    fn specific_company_type_is_kept() {
        let mut d = draft();
        d.company_type = Some("Plant-based Foods".into());
        apply_ai_suggestions(
            &mut d,
            &AiSuggestions {
                company_type: Some("Retail".into()),
                ..AiSuggestions::default()
            },
        );
        assert_eq!(d.company_type.as_deref(), Some("Plant-based Foods"));
    }

    #[test]
    fn description_is_gap_filled_only() {
        let mut d = draft();
        apply_ai_suggestions(
            &mut d,
            &AiSuggestions {
                description: Some("Something else".into()),
                ..AiSuggestions::default()
            },
        );
        assert_eq!(d.description.as_deref(), Some("Tofu maker"));

        d.description = None;
        apply_ai_suggestions(
            &mut d,
            &AiSuggestions {
                description: Some("Something else".into()),
                ..AiSuggestions::default()
            },
        );
        assert_eq!(d.description.as_deref(), Some("Something else"));
    }

    #[test]
    fn product_category_fills_gaps_without_overwriting() {
        let mut d = draft();
        apply_ai_suggestions(
            &mut d,
            &AiSuggestions {
                product_category: Some("Plant-based".into()),
                ..AiSuggestions::default()
            },
        );
        assert_eq!(d.products[0].category.as_deref(), Some("Plant-based"));
        assert_eq!(d.products[1].category.as_deref(), Some("Beverages"));
    }

    #[test]
    fn kg_description_wins_only_when_longer() {
        let mut d = draft();
        apply_kg_description(&mut d, "Acme Foods is a family-owned tofu producer.");
        assert!(d.description.as_deref().unwrap().contains("family-owned"));

        apply_kg_description(&mut d, "Short");
        assert!(d.description.as_deref().unwrap().contains("family-owned"));
    }

    #[test]
    fn chat_content_parses_suggestions() {
        let body = r#"{"choices":[{"message":{"content":
            "{\"company_type\":\"Plant-based Foods\",\"description\":null,\"product_category\":\"Tofu\"}"
        }}]}"#;
        let suggestions = parse_chat_content(body).unwrap();
        assert_eq!(suggestions.company_type.as_deref(), Some("Plant-based Foods"));
        assert_eq!(suggestions.description, None);
        assert_eq!(suggestions.product_category.as_deref(), Some("Tofu"));
    }

    #[test]
    fn empty_chat_response_is_a_parse_error() {
        let err = parse_chat_content(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, ExtractError::Parsing(_)));
    }

    #[test]
    fn auth_statuses_map_to_auth_errors() {
        assert!(matches!(
            map_api_status("ai_enrichment", 401, ""),
            ExtractError::Auth(_)
        ));
        assert!(matches!(
            map_api_status("ai_enrichment", 403, ""),
            ExtractError::Auth(_)
        ));
        assert!(matches!(
            map_api_status("ai_enrichment", 429, ""),
            ExtractError::Api { status: 429, .. }
        ));
    }

    #[test]
    fn api_error_body_message_is_surfaced() {
        let err = map_api_status(
            "ai_enrichment",
            500,
            r#"{"error":{"message":"server exploded"}}"#,
        );
        match err {
            ExtractError::Api { message, .. } => assert_eq!(message, "server exploded"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn kg_article_is_extracted_from_search_response() {
        let body: serde_json::Value = serde_json::from_str(
            r#"{"itemListElement":[{"result":{"name":"Acme Foods",
                "detailedDescription":{"articleBody":"Acme Foods produces tofu."}}}]}"#,
        )
        .unwrap();
        assert_eq!(
            kg_article(&body).as_deref(),
            Some("Acme Foods produces tofu.")
        );
        assert_eq!(kg_article(&serde_json::json!({"itemListElement": []})), None);
    }
}
