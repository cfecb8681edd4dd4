use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::FeedbackFailure;
use crate::models::{Criterion, EvaluationDraft, Student};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const TEMPERATURE: f64 = 0.7;

const MISSING_CONFIGURATION_MESSAGE: &str =
    "Error: La API_KEY de Gemini no está configurada. Por favor, contacta al administrador.";
const GENERATION_FAILED_MESSAGE: &str =
    "Ocurrió un error al generar la retroalimentación. Por favor, inténtalo de nuevo más tarde.";

/// External free-text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, FeedbackFailure>;
}

/// Gemini `generateContent` over HTTPS.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, FeedbackFailure> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let request_body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": TEMPERATURE },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|err| FeedbackFailure::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedbackFailure::Api { status, body });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| FeedbackFailure::Request(format!("invalid response body: {err}")))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(FeedbackFailure::EmptyResponse);
        }
        Ok(text)
    }
}

/// Result of a feedback request. Failures still carry displayable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackOutcome {
    GeneratedText(String),
    GenerationFailed(FeedbackFailure),
}

impl FeedbackOutcome {
    pub fn into_display(self) -> String {
        match self {
            FeedbackOutcome::GeneratedText(text) => text,
            FeedbackOutcome::GenerationFailed(FeedbackFailure::MissingConfiguration) => {
                MISSING_CONFIGURATION_MESSAGE.to_string()
            }
            FeedbackOutcome::GenerationFailed(_) => GENERATION_FAILED_MESSAGE.to_string(),
        }
    }
}

pub struct FeedbackGenerator {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl FeedbackGenerator {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        if generator.is_none() {
            tracing::warn!("GEMINI_API_KEY is not set; feedback generation is disabled");
        }
        Self { generator }
    }

    pub async fn generate(
        &self,
        student: &Student,
        draft: &EvaluationDraft,
        criteria: &[Criterion],
    ) -> FeedbackOutcome {
        let Some(generator) = &self.generator else {
            return FeedbackOutcome::GenerationFailed(FeedbackFailure::MissingConfiguration);
        };

        let prompt = build_prompt(student, draft, criteria);
        match generator.generate(&prompt).await {
            Ok(text) => FeedbackOutcome::GeneratedText(text),
            Err(err) => {
                tracing::error!(student_id = %student.id, error = %err, "feedback generation failed");
                FeedbackOutcome::GenerationFailed(err)
            }
        }
    }
}

pub fn build_prompt(student: &Student, draft: &EvaluationDraft, criteria: &[Criterion]) -> String {
    let scores_text = draft
        .scores
        .iter()
        .map(|score| {
            let criterion = criteria.iter().find(|c| c.id == score.criterion_id);
            let name = criterion.map_or("Criterio Desconocido", |c| c.name);
            let weight = criterion.map_or_else(|| "?".to_string(), |c| format!("{}", c.weight));
            format!("- {name} ({weight}%): {:.1}/10.0", score.score)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Eres un profesor universitario experimentado y constructivo, especializado en programas de maestría en ingeniería."
    );
    let _ = writeln!(
        prompt,
        "Tu tarea es generar un informe de retroalimentación detallado y personalizado para un estudiante basado en la evaluación de su presentación de seminario.\n"
    );
    let _ = writeln!(prompt, "**Instrucciones:**");
    let _ = writeln!(prompt, "1. Comienza con un saludo cordial dirigido al estudiante por su nombre.");
    let _ = writeln!(
        prompt,
        "2. Menciona que esta es la retroalimentación para su presentación del {}.",
        draft.semester
    );
    let _ = writeln!(
        prompt,
        "3. Analiza el desempeño del estudiante basándote en los siguientes criterios y calificaciones (escala 0-10):"
    );
    let _ = writeln!(prompt, "{scores_text}");
    let _ = writeln!(
        prompt,
        "4. La calificación final ponderada fue: {:.2}/10.0.",
        draft.final_score
    );
    let _ = writeln!(prompt, "5. **Estructura del feedback:**");
    let _ = writeln!(
        prompt,
        "   * **Fortalezas:** Identifica 2-3 áreas donde el estudiante demostró un buen desempeño. Sé específico y relaciona tus comentarios con los criterios mejor calificados. Usa un tono alentador."
    );
    let _ = writeln!(
        prompt,
        "   * **Áreas de Oportunidad:** Identifica 2-3 áreas clave que necesitan mejora. Sé constructivo y específico, basándote en los criterios con calificaciones más bajas. Ofrece sugerencias concretas o preguntas que guíen al estudiante a reflexionar y mejorar."
    );
    let _ = writeln!(
        prompt,
        "   * **Recomendaciones Generales:** Proporciona uno o dos consejos generales para su próximo seminario o para el avance de su tesis."
    );
    let _ = writeln!(prompt, "   * **Cierre:** Termina con una nota positiva y motivadora.\n");
    let _ = writeln!(prompt, "**Estudiante:** {}", student.name);
    let _ = writeln!(prompt, "**Semestre:** {}\n", draft.semester);
    let _ = writeln!(
        prompt,
        "Genera el informe de retroalimentación. Sé profesional, claro y conciso."
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvaluationScore;
    use crate::rubric::criteria_for;
    use std::sync::Mutex;
    use uuid::Uuid;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    struct ScriptedGenerator {
        reply: Result<String, FeedbackFailure>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, FeedbackFailure> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn student() -> Student {
        Student {
            id: Uuid::new_v4(),
            name: "Valeria Gómez Herrera".to_string(),
            matricula: "MIC-2024-001".to_string(),
        }
    }

    fn draft() -> EvaluationDraft {
        EvaluationDraft {
            student_id: Uuid::new_v4(),
            semester: "Primer Semestre".to_string(),
            scores: vec![
                EvaluationScore::new("1-1", 8.0),
                EvaluationScore::new("nope", 5.0),
            ],
            final_score: 6.8,
        }
    }

    #[test]
    fn prompt_lists_student_semester_scores_and_final_score() {
        let criteria = criteria_for("Primer Semestre");
        let prompt = build_prompt(&student(), &draft(), criteria);

        assert!(prompt.contains("**Estudiante:** Valeria Gómez Herrera"));
        assert!(prompt.contains("presentación del Primer Semestre"));
        assert!(prompt.contains(&format!("- {} ({}%): 8.0/10.0", criteria[0].name, criteria[0].weight)));
        assert!(prompt.contains("- Criterio Desconocido (?%): 5.0/10.0"));
        assert!(prompt.contains("6.80/10.0"));
        assert!(prompt.contains("Fortalezas"));
        assert!(prompt.contains("Áreas de Oportunidad"));
    }

    #[test]
    fn prompt_is_deterministic() {
        let criteria = criteria_for("Primer Semestre");
        let student = student();
        assert_eq!(
            build_prompt(&student, &draft(), criteria),
            build_prompt(&student, &draft(), criteria)
        );
    }

    #[tokio::test]
    async fn missing_configuration_degrades_to_a_message() {
        let generator = FeedbackGenerator::new(None);
        let outcome = generator
            .generate(&student(), &draft(), criteria_for("Primer Semestre"))
            .await;

        assert_eq!(
            outcome,
            FeedbackOutcome::GenerationFailed(FeedbackFailure::MissingConfiguration)
        );
        assert!(!outcome.into_display().is_empty());
    }

    #[tokio::test]
    async fn generator_receives_the_built_prompt() {
        let scripted = Arc::new(ScriptedGenerator {
            reply: Ok("Estimada Valeria...".to_string()),
            prompts: Mutex::new(Vec::new()),
        });
        let generator = FeedbackGenerator::new(Some(scripted.clone()));
        let criteria = criteria_for("Primer Semestre");

        let outcome = generator.generate(&student(), &draft(), criteria).await;

        assert_eq!(outcome, FeedbackOutcome::GeneratedText("Estimada Valeria...".to_string()));
        let prompts = scripted.prompts.lock().unwrap();
        assert_eq!(*prompts, vec![build_prompt(&student(), &draft(), criteria)]);
    }

    #[tokio::test]
    async fn generator_errors_become_a_failed_outcome() {
        let scripted = Arc::new(ScriptedGenerator {
            reply: Err(FeedbackFailure::Request("connection reset".to_string())),
            prompts: Mutex::new(Vec::new()),
        });
        let generator = FeedbackGenerator::new(Some(scripted));

        let outcome = generator
            .generate(&student(), &draft(), criteria_for("Primer Semestre"))
            .await;

        assert!(matches!(outcome, FeedbackOutcome::GenerationFailed(FeedbackFailure::Request(_))));
        assert_eq!(outcome.into_display(), GENERATION_FAILED_MESSAGE);
    }

    #[tokio::test]
    async fn gemini_client_joins_candidate_parts() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(matchers::header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Hola " }, { "text": "Valeria" }] }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new("test-key", DEFAULT_MODEL, server.uri());
        let text = client.generate("prompt").await.unwrap();
        assert_eq!(text, "Hola Valeria");
    }

    #[tokio::test]
    async fn gemini_client_sends_prompt_and_temperature() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::body_partial_json(serde_json::json!({
                "contents": [{ "parts": [{ "text": "hola" }] }],
                "generationConfig": { "temperature": 0.7 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new("k", DEFAULT_MODEL, server.uri());
        assert_eq!(client.generate("hola").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn gemini_client_reports_api_errors() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let client = GeminiClient::new("bad", DEFAULT_MODEL, server.uri());
        let err = client.generate("prompt").await.unwrap_err();
        assert_eq!(
            err,
            FeedbackFailure::Api {
                status: 403,
                body: "API key not valid".to_string()
            }
        );
    }

    #[tokio::test]
    async fn gemini_client_rejects_empty_candidates() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("k", DEFAULT_MODEL, server.uri());
        assert_eq!(client.generate("prompt").await.unwrap_err(), FeedbackFailure::EmptyResponse);
    }
}
