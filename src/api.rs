//! Local LLM API interaction.
//!
//! This module talks to an Ollama-compatible text-generation endpoint:
//! `POST {endpoint}/api/generate` with `{model, prompt, stream: false}`,
//! answered by `{response}`.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait, "send a prompt, get text back"
//! - [`OllamaClient`]: `reqwest` implementation of [`AskAsync`]
//! - [`check_connection`]: startup probe that turns the common setup
//!   mistakes (server not running, model not pulled) into readable errors
//!
//! There is deliberately no retry here: every paragraph gets exactly one
//! request and the caller records a placeholder when it fails.

use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Trait for async LLM interaction.
///
/// Implementors send a prompt to a model and return its completion. Tests
/// swap in scripted implementations.
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    async fn ask(&self, prompt: &str) -> Result<Self::Response>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for the `/api/generate` endpoint of a local model server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            url: config.generate_url(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl AskAsync for OllamaClient {
    type Response = String;

    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn ask(&self, prompt: &str) -> Result<String> {
        let t0 = Instant::now();
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), elapsed_ms = t0.elapsed().as_millis() as u64, "Generate call failed");
            return Err(PipelineError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }
        let body: GenerateResponse = response.json().await?;
        info!(elapsed_ms = t0.elapsed().as_millis() as u64, chars = body.response.len(), "Generated completion");
        Ok(body.response.trim().to_string())
    }
}

/// Classify a failed probe into an actionable error.
fn explain_probe_failure(error: PipelineError, model: &str) -> PipelineError {
    match error {
        PipelineError::Http(e) if e.is_connect() => PipelineError::ModelServer(
            "could not connect to the model server; make sure Ollama is installed \
             (https://ollama.ai) and running (`ollama serve`)"
                .to_string(),
        ),
        PipelineError::Status { status: 404, .. } => PipelineError::ModelServer(format!(
            "model '{model}' not found; run `ollama pull {model}`"
        )),
        other => other,
    }
}

/// Probe the model with a tiny prompt before a summarization run.
#[instrument(level = "info", skip_all, fields(model = %client.model()))]
pub async fn check_connection(client: &OllamaClient) -> Result<()> {
    match client.ask("test").await {
        Ok(_) => {
            info!("Connected to model server");
            Ok(())
        }
        Err(e) => {
            let e = explain_probe_failure(e, client.model());
            error!(error = %e, "Model server check failed");
            Err(e)
        }
    }
}
