//! Fan-out of the four camera-angle generations for one portrait.
//!
//! A batch spawns one task per slot and waits for every task to settle. A
//! failing slot never cancels its siblings, and results are written back by
//! slot index, so completion order has no effect on the final layout.

use crate::credential::Credential;
use crate::error::{PortraitVizError, Result};
use crate::image::{GeneratedImage, GenerationMetadata, ImageGenerator, SourceImage};
use std::sync::Arc;
use std::time::Instant;

/// Number of slots in a batch.
pub const SLOT_COUNT: usize = 4;

/// Sampling temperature sent with every generation.
pub const DEFAULT_TEMPERATURE: f32 = 0.4;

/// Instruction for each slot, in slot order.
pub const INSTRUCTION_TEMPLATES: [&str; SLOT_COUNT] = [
    "medium shot, all people, original camera perspective",
    "extreme close-up of faces",
    "left-profile view, camera on subject's left, 90° head turn, gaze toward right edge",
    "right-profile view, camera on subject's right, 90° head turn, gaze toward left edge",
];

/// Appended to every instruction when only the face should be kept.
pub const ISOLATE_FACE_SUFFIX: &str =
    ", isolate the subject's face only on a plain white background";

/// Human-readable labels for the slots.
pub const SLOT_LABELS: [&str; SLOT_COUNT] =
    ["Medium shot", "Close-up", "Left profile", "Right profile"];

/// Builds the four instructions for a batch.
pub fn instructions(isolate_face_only: bool) -> [String; SLOT_COUNT] {
    INSTRUCTION_TEMPLATES.map(|template| {
        if isolate_face_only {
            format!("{template}{ISOLATE_FACE_SUFFIX}")
        } else {
            template.to_string()
        }
    })
}

/// State of one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SlotState {
    /// No batch has been launched.
    #[default]
    Idle,
    /// The generation call is in flight.
    Pending,
    /// The call returned an image.
    Succeeded(GeneratedImage),
    /// The call failed.
    Failed,
}

impl SlotState {
    /// True for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed)
    }
}

/// One of the four output positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSlot {
    /// Zero-based position.
    pub index: usize,
    /// Instruction frozen at launch; empty while idle.
    pub instruction: String,
    /// Current state.
    pub state: SlotState,
}

impl GenerationSlot {
    /// A slot with no batch behind it.
    pub fn idle(index: usize) -> Self {
        Self {
            index,
            instruction: String::new(),
            state: SlotState::Idle,
        }
    }

    /// A slot whose call has been launched with `instruction`.
    pub fn pending(index: usize, instruction: impl Into<String>) -> Self {
        Self {
            index,
            instruction: instruction.into(),
            state: SlotState::Pending,
        }
    }

    /// Label for display, e.g. "Close-up".
    pub fn label(&self) -> &'static str {
        SLOT_LABELS.get(self.index).copied().unwrap_or("")
    }

    /// The generated image, if this slot succeeded.
    pub fn image(&self) -> Option<&GeneratedImage> {
        match &self.state {
            SlotState::Succeeded(image) => Some(image),
            _ => None,
        }
    }
}

/// The four slots of one batch, in slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    slots: [GenerationSlot; SLOT_COUNT],
}

impl BatchResult {
    /// All slots idle.
    pub fn idle() -> Self {
        Self {
            slots: std::array::from_fn(GenerationSlot::idle),
        }
    }

    /// All slots pending with the given instructions.
    pub fn pending(instructions: [String; SLOT_COUNT]) -> Self {
        let mut instructions = instructions.into_iter();
        Self {
            slots: std::array::from_fn(|i| {
                GenerationSlot::pending(i, instructions.next().unwrap_or_default())
            }),
        }
    }

    /// Builds a result from explicit slots.
    pub fn from_slots(slots: [GenerationSlot; SLOT_COUNT]) -> Self {
        Self { slots }
    }

    /// The slots, in slot order.
    pub fn slots(&self) -> &[GenerationSlot; SLOT_COUNT] {
        &self.slots
    }

    /// Successful slots, in slot order.
    pub fn successes(&self) -> impl Iterator<Item = (usize, &GeneratedImage)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.image().map(|image| (slot.index, image)))
    }

    /// Number of successful slots.
    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    /// Number of failed slots.
    pub fn failure_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state == SlotState::Failed)
            .count()
    }

    /// True once every slot has settled.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|slot| slot.state.is_terminal())
    }
}

impl Default for BatchResult {
    fn default() -> Self {
        Self::idle()
    }
}

/// What a finished batch reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Terminal state of every slot.
    pub result: BatchResult,
    /// Partial-success message, present when fewer than four slots succeeded.
    pub advisory: Option<String>,
    /// Message of the first key rejection, in slot order.
    pub credential_error: Option<String>,
}

impl BatchOutcome {
    /// Aggregates settled slots into an outcome.
    pub fn new(result: BatchResult, credential_error: Option<String>) -> Self {
        let succeeded = result.success_count();
        let advisory = (succeeded < SLOT_COUNT).then(|| partial_advisory(succeeded));
        Self {
            result,
            advisory,
            credential_error,
        }
    }

    /// True when some slot failed because the API key was rejected.
    pub fn credential_rejected(&self) -> bool {
        self.credential_error.is_some()
    }
}

fn partial_advisory(succeeded: usize) -> String {
    format!("{succeeded} out of {SLOT_COUNT} images were generated successfully.")
}

/// Runs batches against an [`ImageGenerator`].
#[derive(Clone)]
pub struct BatchOrchestrator {
    generator: Arc<dyn ImageGenerator>,
    temperature: f32,
}

impl BatchOrchestrator {
    /// Creates an orchestrator using `generator` at the default temperature.
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        Self {
            generator,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Overrides the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sampling temperature in use.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Generates all four views of `source`.
    ///
    /// Fails only when `credential` is empty, in which case nothing is sent.
    /// Every per-slot error is folded into a `Failed` slot.
    pub async fn run_batch(
        &self,
        credential: &Credential,
        source: &SourceImage,
        isolate_face_only: bool,
    ) -> Result<BatchOutcome> {
        if credential.is_empty() {
            return Err(PortraitVizError::MissingCredential);
        }

        let start = Instant::now();
        let instructions = instructions(isolate_face_only);
        let model = self.generator.model().to_string();

        let handles = instructions.clone().map(|instruction| {
            let generator = Arc::clone(&self.generator);
            let credential = credential.clone();
            let image = source.image.clone();
            let temperature = self.temperature;
            tokio::spawn(async move {
                let slot_start = Instant::now();
                let result = generator
                    .generate(&credential, &image, &instruction, temperature)
                    .await;
                (result, slot_start.elapsed().as_millis() as u64)
            })
        });

        let mut slots: [GenerationSlot; SLOT_COUNT] = std::array::from_fn(GenerationSlot::idle);
        let mut credential_error = None;

        for ((index, handle), instruction) in handles.into_iter().enumerate().zip(instructions) {
            let state = match handle.await {
                Ok((Ok(image), duration_ms)) => {
                    let metadata = GenerationMetadata {
                        model: Some(model.clone()),
                        duration_ms: Some(duration_ms),
                    };
                    let generated = GeneratedImage::new(image, instruction.clone());
                    SlotState::Succeeded(generated.with_metadata(metadata))
                }
                Ok((Err(e), _)) => {
                    tracing::warn!(slot = index + 1, error = %e, "generation failed");
                    if e.is_credential_error() && credential_error.is_none() {
                        credential_error = Some(e.to_string());
                    }
                    SlotState::Failed
                }
                Err(e) => {
                    tracing::warn!(slot = index + 1, error = %e, "generation task failed");
                    SlotState::Failed
                }
            };
            slots[index] = GenerationSlot {
                index,
                instruction,
                state,
            };
        }

        let outcome = BatchOutcome::new(BatchResult::from_slots(slots), credential_error);
        tracing::info!(
            succeeded = outcome.result.success_count(),
            failed = outcome.result.failure_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "batch complete"
        );
        Ok(outcome)
    }
}
