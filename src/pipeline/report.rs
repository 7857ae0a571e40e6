use std::sync::Arc;

use serde_json::Value;

use crate::llm::{GenerateRequest, LlmClient};
use crate::models::{DiseaseReport, GeneratedReport, WeeklyAverages};

use super::prompt::PromptTemplate;

#[derive(Debug, thiserror::Error)]
pub enum ReportGenerationError {
    #[error("language model call failed: {0}")]
    Llm(String),
}

#[async_trait::async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Produces a report for `disease`. `weather` selects the observed-weather
    /// or the general-advice branch of the prompt.
    async fn generate(
        &self,
        disease: &str,
        weather: Option<&WeeklyAverages>,
        language: &str,
    ) -> Result<GeneratedReport, ReportGenerationError>;
}

pub struct LlmReportGenerator {
    llm: Arc<LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    prompt: PromptTemplate,
}

impl LlmReportGenerator {
    pub fn new(
        llm: Arc<LlmClient>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
        prompt: PromptTemplate,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
            max_tokens,
            prompt,
        }
    }
}

#[async_trait::async_trait]
impl ReportGenerator for LlmReportGenerator {
    #[tracing::instrument(
        name = "pipeline_stage report_generation",
        skip(self, weather),
        fields(
            diagnosis.stage = "report_generation",
            report.prompt_version = %self.prompt.version,
            report.weather_known = weather.is_some(),
            report.raw,
        )
    )]
    async fn generate(
        &self,
        disease: &str,
        weather: Option<&WeeklyAverages>,
        language: &str,
    ) -> Result<GeneratedReport, ReportGenerationError> {
        let prompt = self.prompt.render(disease, weather, language);

        let resp = self
            .llm
            .generate(&GenerateRequest {
                model: self.model.clone(),
                system: self.prompt.system().to_string(),
                prompt,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                stage: "report_generation".to_string(),
            })
            .await
            .map_err(|e| ReportGenerationError::Llm(e.to_string()))?;

        let report = parse_report(&resp.content, disease);
        tracing::Span::current().record("report.raw", report.is_raw());
        if report.is_raw() {
            tracing::warn!(
                disease,
                "Model reply was not valid report JSON, returning raw text"
            );
        }

        Ok(report)
    }
}

/// Parses a model reply into a structured report, or keeps the full text as
/// `Raw` when no JSON object can be read from it. Field types are coerced by
/// `DiseaseReport`'s deserializer. An empty `disease` field is filled with
/// the classifier label.
pub(crate) fn parse_report(content: &str, disease: &str) -> GeneratedReport {
    let json_str = extract_json(content);

    let parsed = match serde_json::from_str::<Value>(&json_str) {
        Ok(value @ Value::Object(_)) => serde_json::from_value::<DiseaseReport>(value).ok(),
        _ => None,
    };

    match parsed {
        Some(mut report) => {
            if report.disease.trim().is_empty() {
                report.disease = disease.to_string();
            }
            GeneratedReport::Structured(report)
        }
        None => GeneratedReport::Raw {
            raw: content.to_string(),
        },
    }
}

pub(crate) fn extract_json(content: &str) -> String {
    if let Some(start) = content.find("```json")
        && let Some(end) = content[start + 7..].find("```")
    {
        return content[start + 7..start + 7 + end].trim().to_string();
    }
    if let Some(start) = content.find("```")
        && let Some(end) = content[start + 3..].find("```")
    {
        let inner = content[start + 3..start + 3 + end].trim();
        if inner.starts_with('{') {
            return inner.to_string();
        }
    }
    if let Some(start) = content.find('{')
        && let Some(end) = content.rfind('}')
        && start < end
    {
        return content[start..=end].to_string();
    }
    content.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::tests::ScriptedProvider;

    fn generator(provider: Arc<ScriptedProvider>) -> LlmReportGenerator {
        LlmReportGenerator::new(
            Arc::new(LlmClient::new(provider, None)),
            "llama-3.3-70b-versatile",
            0.3,
            1024,
            PromptTemplate::default(),
        )
    }

    #[test]
    fn test_extract_json_fenced_block() {
        let input = "Here you go:\n```json\n{\"disease\": \"Rust\"}\n```\nGood luck.";
        assert_eq!(extract_json(input), "{\"disease\": \"Rust\"}");
    }

    #[test]
    fn test_extract_json_generic_fence() {
        let input = "```\n{\"note\": \"water less\"}\n```";
        assert_eq!(extract_json(input), "{\"note\": \"water less\"}");
    }

    #[test]
    fn test_extract_json_embedded_in_text() {
        let input = "Report: {\"disease\": \"Blight\"} end";
        assert_eq!(extract_json(input), "{\"disease\": \"Blight\"}");
    }

    #[test]
    fn test_extract_json_without_object_returns_input() {
        let input = "Sorry } I cannot {";
        assert_eq!(extract_json(input), input);
    }

    #[test]
    fn test_parse_report_structured() {
        let content = r#"{"disease":"Early Blight","description":"Fungal","symptoms":["spots"],"causes":[],"treatment":{"organic":["neem"],"non_organic":["mancozeb 2 g/l"]},"prevention":[],"note":"spray weekly"}"#;

        let GeneratedReport::Structured(report) = parse_report(content, "Tomato Early Blight")
        else {
            panic!("expected structured report");
        };
        assert_eq!(report.disease, "Early Blight");
        assert_eq!(report.treatment.non_organic, vec!["mancozeb 2 g/l"]);
        assert_eq!(report.note, "spray weekly");
    }

    #[test]
    fn test_parse_report_fills_missing_disease_with_label() {
        let content = r#"{"description":"Leaf fungus","note":""}"#;

        let GeneratedReport::Structured(report) = parse_report(content, "Corn Common Rust")
        else {
            panic!("expected structured report");
        };
        assert_eq!(report.disease, "Corn Common Rust");
        assert!(report.symptoms.is_empty());
    }

    #[test]
    fn test_parse_report_accepts_loosely_typed_fields() {
        let content = r#"{"disease":"Early Blight","description":"Fungal leaf disease","symptoms":"Brown rings on lower leaves","causes":["Alternaria solani"],"treatment":{"organic":"Copper spray","non_organic":["Chlorothalonil"]},"prevention":[],"note":"Humid week, spray early"}"#;

        let GeneratedReport::Structured(report) = parse_report(content, "Tomato Early Blight")
        else {
            panic!("expected structured report");
        };
        assert_eq!(report.symptoms, vec!["Brown rings on lower leaves"]);
        assert_eq!(report.treatment.organic, vec!["Copper spray"]);
        assert_eq!(report.treatment.non_organic, vec!["Chlorothalonil"]);
        assert_eq!(report.note, "Humid week, spray early");
    }

    #[test]
    fn test_parse_report_json_that_is_not_an_object_is_raw() {
        let content = r#"["spray neem", "remove leaves"]"#;
        assert!(parse_report(content, "Leaf Spot").is_raw());
    }

    #[test]
    fn test_parse_report_non_json_keeps_full_text() {
        let content = "The plant has blight. Spray fungicide.";
        assert_eq!(
            parse_report(content, "Blight"),
            GeneratedReport::Raw {
                raw: content.to_string()
            }
        );
    }

    #[test]
    fn test_parse_report_malformed_json_is_raw() {
        let content = "{\"disease\": \"Blight\", \"symptoms\": [";
        assert!(parse_report(content, "Blight").is_raw());
    }

    #[tokio::test]
    async fn test_generate_uses_weather_branch() {
        let provider = Arc::new(ScriptedProvider::new(
            "groq",
            vec![Ok(r#"{"disease":"Late Blight","note":"humid week"}"#.to_string())],
        ));
        let weather = WeeklyAverages {
            avg_temp: 22.0,
            avg_humidity: 91.0,
            avg_sunlight: 2.0,
        };

        let report = generator(provider.clone())
            .generate("Late Blight", Some(&weather), "Hindi")
            .await
            .unwrap();

        assert!(!report.is_raw());
        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("avgHumidity: 91.0 %"));
        assert!(prompts[0].contains("written in Hindi"));
        let systems = provider.systems.lock().unwrap();
        assert!(systems[0].starts_with("You are an agricultural expert"));
    }

    #[tokio::test]
    async fn test_generate_without_weather_uses_general_branch() {
        let provider = Arc::new(ScriptedProvider::new(
            "groq",
            vec![Ok("no json, just advice".to_string())],
        ));

        let report = generator(provider.clone())
            .generate("Leaf Spot", None, "English")
            .await
            .unwrap();

        assert_eq!(
            report,
            GeneratedReport::Raw {
                raw: "no json, just advice".to_string()
            }
        );
        assert!(provider.prompts.lock().unwrap()[0].contains("No weather data"));
    }

    #[tokio::test]
    async fn test_generate_provider_failure_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(
            "groq",
            vec![Err("401 invalid api key".to_string())],
        ));

        let err = generator(provider)
            .generate("Leaf Spot", None, "English")
            .await
            .unwrap_err();

        assert!(matches!(err, ReportGenerationError::Llm(_)));
        assert!(err.to_string().contains("invalid api key"));
    }
}
