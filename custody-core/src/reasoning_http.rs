//! Ollama-backed reasoning service.
//!
//! Talks to the `/api/generate` endpoint with `format: "json"` and parses the
//! model's JSON answer. Anything that does not parse is an error; the verdict
//! synthesizer turns errors into its fallback.

use crate::outcome::CheckOutcome;
use crate::verdict::{ReasoningService, SynthesisRequest, SynthesizedVerdict, Verdict};
use crate::visual::{DescriptionMatch, VisualReference};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Write as _;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.2";

#[derive(Clone)]
pub struct OllamaReasoner {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaReasoner {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// `OLLAMA_BASE_URL` and `OLLAMA_REASONING_MODEL`, with local defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model =
            std::env::var("OLLAMA_REASONING_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(&base_url, &model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&serde_json::json!({
                "model": &self.model,
                "prompt": prompt,
                "stream": false,
                "format": "json"
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama API error {}: {}", status, body));
        }

        #[derive(Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let body: GenerateResponse = response.json().await?;
        tracing::debug!(
            "Ollama raw response: {}",
            body.response.chars().take(1000).collect::<String>()
        );
        Ok(body.response)
    }
}

#[async_trait]
impl ReasoningService for OllamaReasoner {
    async fn synthesize_verdict(&self, request: &SynthesisRequest) -> Result<SynthesizedVerdict> {
        let text = self.generate(&verdict_prompt(request)).await?;
        parse_verdict(&text)
    }

    async fn compare_description(
        &self,
        description: &str,
        reference: &VisualReference,
    ) -> Result<DescriptionMatch> {
        let text = self
            .generate(&comparison_prompt(description, reference))
            .await?;
        parse_description_match(&text)
    }
}

// ── Prompts ──

fn outcome_line(out: &mut String, outcome: &CheckOutcome) {
    let status = if outcome.passed { "PASS" } else { "FAIL" };
    let critical = if outcome.critical { " (critical)" } else { "" };
    let _ = write!(
        out,
        "- {}: {status}{critical}, confidence {}",
        outcome.kind.label(),
        outcome.confidence
    );
    if let Some(err) = &outcome.error {
        let _ = write!(out, ", reason: {err}");
    }
    let _ = writeln!(out);
}

pub fn verdict_prompt(request: &SynthesisRequest) -> String {
    let mut checks = String::new();
    for outcome in &request.outcomes {
        outcome_line(&mut checks, outcome);
    }
    format!(
        "You supervise counterfeit detection for a parts supply chain.\n\n\
         CONTEXT:\nPart ID: {part}\nLocation: {location}\nPath: {path:?}\n\n\
         CHECK RESULTS:\n{checks}\n\
         RISK: score {score:.1}, level {level}\n\n\
         Resolve any conflicts between the checks and give a final verdict.\n\
         Respond in JSON with keys: \"verdict\" (AUTHENTIC, COUNTERFEIT, SUSPICIOUS or \
         NEEDS_REVIEW), \"confidence\" (0-100), \"reasoning\", \"critical_findings\" \
         (list of strings), \"recommended_action\".",
        part = request.part_id.as_deref().unwrap_or("unknown"),
        location = request.location,
        path = request.path,
        score = request.assessment.overall_score,
        level = request.assessment.level,
    )
}

pub fn comparison_prompt(description: &str, reference: &VisualReference) -> String {
    format!(
        "You verify parts visually for counterfeit detection.\n\n\
         USER DESCRIPTION:\n{description}\n\n\
         REFERENCE:\nPart name: {name}\nManufacturer: {maker}\nDescription: {desc}\n\
         Color: {color}\nMaterial: {material}\nKey features: {features}\n\n\
         Minor variations are acceptable; major differences are red flags.\n\
         Respond in JSON with keys: \"match_score\" (0-100), \"verdict\" (AUTHENTIC, \
         SUSPICIOUS or COUNTERFEIT), \"discrepancies\" (list of strings), \"reasoning\".",
        name = reference.part_name,
        maker = reference.manufacturer,
        desc = reference.description,
        color = reference.color.as_deref().unwrap_or("N/A"),
        material = reference.material.as_deref().unwrap_or("N/A"),
        features = reference.key_features,
    )
}

// ── Parsing ──

/// The outermost `{...}` in a model answer; models sometimes wrap JSON in prose.
fn json_object(text: &str) -> Result<&str> {
    let start = text.find('{').ok_or_else(|| anyhow!("no JSON object in answer"))?;
    let end = text.rfind('}').ok_or_else(|| anyhow!("no JSON object in answer"))?;
    if end < start {
        return Err(anyhow!("no JSON object in answer"));
    }
    Ok(&text[start..=end])
}

pub fn parse_verdict(text: &str) -> Result<SynthesizedVerdict> {
    #[derive(Deserialize)]
    struct Raw {
        verdict: String,
        confidence: f64,
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        critical_findings: Vec<String>,
        #[serde(default)]
        recommended_action: String,
    }

    let raw: Raw =
        serde_json::from_str(json_object(text)?).context("failed to parse verdict answer")?;
    let verdict: Verdict = raw.verdict.parse().map_err(|e: String| anyhow!(e))?;
    Ok(SynthesizedVerdict {
        verdict,
        confidence: raw.confidence,
        reasoning: raw.reasoning,
        critical_findings: raw.critical_findings,
        recommended_action: raw.recommended_action,
    })
}

pub fn parse_description_match(text: &str) -> Result<DescriptionMatch> {
    #[derive(Deserialize)]
    struct Raw {
        match_score: f64,
        verdict: String,
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        discrepancies: Vec<String>,
    }

    let raw: Raw =
        serde_json::from_str(json_object(text)?).context("failed to parse comparison answer")?;
    let verdict: Verdict = raw.verdict.parse().map_err(|e: String| anyhow!(e))?;
    Ok(DescriptionMatch {
        match_score: raw.match_score,
        verdict,
        reasoning: raw.reasoning,
        discrepancies: raw.discrepancies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_with_surrounding_prose() {
        let text = r#"Here you go:
        {"verdict": "suspicious", "confidence": 41, "reasoning": "route skipped",
         "critical_findings": ["skipped checkpoint"], "recommended_action": "hold"}"#;
        let v = parse_verdict(text).unwrap();
        assert_eq!(v.verdict, Verdict::Suspicious);
        assert_eq!(v.confidence, 41.0);
        assert_eq!(v.critical_findings, vec!["skipped checkpoint".to_string()]);
    }

    #[test]
    fn test_parse_verdict_rejects_garbage() {
        assert!(parse_verdict("I think it is fine").is_err());
        assert!(parse_verdict(r#"{"verdict": "GENUINE", "confidence": 90}"#).is_err());
        assert!(parse_verdict(r#"{"verdict": "AUTHENTIC"}"#).is_err());
    }

    #[test]
    fn test_parse_description_match() {
        let m = parse_description_match(
            r#"{"match_score": 72.5, "verdict": "AUTHENTIC", "discrepancies": []}"#,
        )
        .unwrap();
        assert_eq!(m.match_score, 72.5);
        assert_eq!(m.verdict, Verdict::Authentic);
        assert!(m.reasoning.is_empty());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let r = OllamaReasoner::new("http://ollama:11434/", "llama3");
        assert_eq!(r.base_url, "http://ollama:11434");
        assert_eq!(r.model(), "llama3");
    }
}
