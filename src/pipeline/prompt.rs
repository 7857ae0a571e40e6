use std::path::Path;

use crate::models::WeeklyAverages;

const SYSTEM_V1: &str = include_str!("../../prompts/system.v1.txt");
const REPORT_TEMPLATE_V1: &str = include_str!("../../prompts/disease_report.v1.txt");
const WEATHER_OBSERVED_V1: &str = include_str!("../../prompts/weather_observed.v1.txt");
const WEATHER_UNKNOWN_V1: &str = include_str!("../../prompts/weather_unknown.v1.txt");

/// Report prompt text, kept as data rather than inline string building.
///
/// `system` is sent as the system message; the rendered report template is
/// the user message.
///
/// The report template must contain `{{disease}}`, `{{language}}` and
/// `{{weather}}`; the observed-weather block is filled from
/// `{{avg_temp}}`, `{{avg_humidity}}` and `{{avg_sunlight}}`.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub version: String,
    system: String,
    report: String,
    weather_observed: String,
    weather_unknown: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            system: SYSTEM_V1.trim_end().to_string(),
            report: REPORT_TEMPLATE_V1.to_string(),
            weather_observed: WEATHER_OBSERVED_V1.to_string(),
            weather_unknown: WEATHER_UNKNOWN_V1.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Replaces the report template with the contents of `path`. The version
    /// becomes the file stem so spans show which prompt produced a report.
    pub fn with_report_file(mut self, path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading prompt {}: {e}", path.display()))?;
        for placeholder in ["{{disease}}", "{{language}}", "{{weather}}"] {
            if !text.contains(placeholder) {
                anyhow::bail!("prompt {} is missing {placeholder}", path.display());
            }
        }
        self.report = text;
        self.version = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "custom".to_string());
        Ok(self)
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn render(&self, disease: &str, weather: Option<&WeeklyAverages>, language: &str) -> String {
        let weather_block = match weather {
            Some(w) => self
                .weather_observed
                .replace("{{avg_temp}}", &format!("{:.1}", w.avg_temp))
                .replace("{{avg_humidity}}", &format!("{:.1}", w.avg_humidity))
                .replace("{{avg_sunlight}}", &format!("{:.1}", w.avg_sunlight)),
            None => self.weather_unknown.clone(),
        };

        self.report
            .replace("{{disease}}", disease)
            .replace("{{language}}", language)
            .replace("{{weather}}", weather_block.trim_end())
    }
}
