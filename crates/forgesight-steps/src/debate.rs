//! Adversarial debate step.
//!
//! Two advocate personas argue opposite stances over the same image while
//! a judge persona reviews the transcript each round. The judge may
//! terminate early; the final round always produces a judgment, falling
//! back to an inconclusive one when the judge's JSON cannot be parsed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use forgesight_core::{AnalysisStep, StepResult, TaskInput};

use crate::extract;
use crate::provider::{ImagePayload, ModelRequest, ProviderError, VisionModel};

pub const NAME: &str = "judge_debate";
pub const DISPLAY_NAME: &str = "Judge System Debate";

const DEFAULT_MAX_ROUNDS: usize = 3;

struct DebateRound {
    round: usize,
    pro_fake: String,
    pro_real: String,
}

pub struct DebateStep {
    model: Arc<dyn VisionModel>,
    max_rounds: usize,
}

impl DebateStep {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self {
            model,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    async fn argue(
        &self,
        prompt: String,
        image: &ImagePayload,
    ) -> Result<String, ProviderError> {
        self.model
            .generate(ModelRequest::text(prompt).with_image(image.clone()))
            .await
    }
}

#[async_trait]
impl AnalysisStep for DebateStep {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    async fn run(&self, input: &TaskInput) -> StepResult {
        let image = ImagePayload::from_bytes(input.image.clone());
        let text = input.text.as_deref();
        let mut history: Vec<DebateRound> = Vec::new();
        let mut judgment: Option<Value> = None;
        let mut rounds_completed = 0;

        for round in 1..=self.max_rounds {
            let pro_fake = match self
                .argue(advocate_prompt(true, text, &history, round), &image)
                .await
            {
                Ok(argument) => argument,
                Err(e) => return StepResult::failure(NAME, e.to_string()),
            };
            let pro_real = match self
                .argue(advocate_prompt(false, text, &history, round), &image)
                .await
            {
                Ok(argument) => argument,
                Err(e) => return StepResult::failure(NAME, e.to_string()),
            };
            history.push(DebateRound {
                round,
                pro_fake,
                pro_real,
            });

            let verdict_reply = match self
                .argue(judge_prompt(text, &history, round, self.max_rounds), &image)
                .await
            {
                Ok(reply) => reply,
                Err(e) => return StepResult::failure(NAME, e.to_string()),
            };
            rounds_completed = round;

            match extract::parse_object(&verdict_reply) {
                Some(decision) => {
                    let terminate = decision["decision"].as_str() == Some("TERMINATE");
                    // The final round accepts whatever the judge decided.
                    if terminate || round == self.max_rounds {
                        judgment = Some(decision);
                        break;
                    }
                    debug!(round, "judge elected to continue the debate");
                }
                None if round == self.max_rounds => {
                    judgment = Some(json!({
                        "decision": "TERMINATE",
                        "final_verdict": "Inconclusive",
                        "explanation": "the judge did not return valid JSON in the final round",
                    }));
                }
                None => {
                    debug!(round, "judge reply was not valid JSON; continuing");
                }
            }
        }

        let Some(mut judgment) = judgment else {
            return StepResult::failure(NAME, "debate ended without a judgment");
        };
        if let Value::Object(map) = &mut judgment {
            map.insert("rounds_completed".to_string(), json!(rounds_completed));
        }
        StepResult::success(NAME, judgment)
    }
}

fn transcript(history: &[DebateRound]) -> String {
    history
        .iter()
        .map(|entry| {
            format!(
                "Round {}:\nPro-Fake: {}\nPro-Real: {}\n",
                entry.round, entry.pro_fake, entry.pro_real
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn advocate_prompt(
    arguing_fake: bool,
    text: Option<&str>,
    history: &[DebateRound],
    round: usize,
) -> String {
    let stance = if arguing_fake {
        "You argue the image is AI-GENERATED or manipulated."
    } else {
        "You argue the image is an AUTHENTIC, unedited capture."
    };
    let mut prompt = format!(
        "You are a debate agent in a forensic image authenticity review.\n{stance}\n\n"
    );
    if let Some(text) = text {
        prompt.push_str(&format!("Text accompanying the image: {text}\n\n"));
    }
    if !history.is_empty() {
        prompt.push_str("Debate so far:\n");
        prompt.push_str(&transcript(history));
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "Current round: {round}\n\nMake your strongest concise argument for your \
         stance, grounded in what is visible in the attached image, and rebut the \
         opponent's prior points. Return plain text only."
    ));
    prompt
}

fn judge_prompt(
    text: Option<&str>,
    history: &[DebateRound],
    round: usize,
    max_rounds: usize,
) -> String {
    let mut prompt = String::from(
        "You are the judge supervising a debate about whether an image is AI-generated \
         or manipulated.\n\n",
    );
    if let Some(text) = text {
        prompt.push_str(&format!("Text accompanying the image: {text}\n\n"));
    }
    prompt.push_str("Debate history:\n");
    prompt.push_str(&transcript(history));
    prompt.push_str(&format!("\nCurrent round: {round} of {max_rounds}\n\n"));
    prompt.push_str(
        "Decide whether the debate has reached sufficient clarity. If it has, or this \
         is the final round, terminate with your verdict; otherwise continue.\n\
         Respond with ONLY a JSON object:\n\
         {\"decision\": \"TERMINATE\" or \"CONTINUE\",\n \
          \"reasoning\": \"<why you decided>\",\n \
          \"final_verdict\": \"Real\" | \"Fake\" | \"Inconclusive\",\n \
          \"explanation\": \"<final explanation for the user>\",\n \
          \"probability_score\": <integer 0-100, probability the image is fake>}\n\
         The last three fields are required only when terminating.",
    );
    prompt
}
