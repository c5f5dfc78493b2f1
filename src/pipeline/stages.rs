//! The five pipeline stages.
//!
//! Each stage transforms [`PipelineState`] and mirrors its output into the
//! job registry so pollers see coarse progress. Progress checkpoints are
//! fixed per stage; Repair shares the rendering band and reports none.

use crate::artifact::ArtifactStore;
use crate::backend::{GeneratedImage, GenerationBackend};
use crate::error::FourcutError;
use crate::registry::{JobRegistry, JobStatus, JobUpdate};

use super::model::{
    Cut, ImagePrompt, PipelineState, Provenance, QaStatus, QaVerdict, RenderedImage, Storyboard,
};
use super::structured::extract_json;

const PLAN_TEMPERATURE: f32 = 0.2;
const PROMPT_TEMPERATURE: f32 = 0.3;
const QA_TEMPERATURE: f32 = 0.1;
const REPAIR_TEMPERATURE: f32 = 0.25;

const PROGRESS_PLAN_START: u8 = 10;
const PROGRESS_PLAN_DONE: u8 = 25;
const PROGRESS_PROMPTS_START: u8 = 35;
const PROGRESS_PROMPTS_DONE: u8 = 45;
const PROGRESS_RENDER_START: u8 = 60;
const PROGRESS_RENDER_DONE: u8 = 75;
const PROGRESS_CHECK: u8 = 85;

fn checkpoint(registry: &JobRegistry, job_id: &str, progress: u8) {
    registry.update(
        job_id,
        JobUpdate {
            progress: Some(progress),
            ..Default::default()
        },
    );
}

/// Plan the storyboard from the raw diary text.
pub async fn plan<B: GenerationBackend>(
    backend: &B,
    registry: &JobRegistry,
    state: &mut PipelineState,
) -> Result<(), FourcutError> {
    registry.update(
        &state.job_id,
        JobUpdate {
            status: Some(JobStatus::Running),
            progress: Some(PROGRESS_PLAN_START),
            ..Default::default()
        },
    );

    let instruction = plan_instruction(&state.diary, state.num_cuts, &state.style_guide);
    let raw = backend.text_complete(&instruction, PLAN_TEMPERATURE).await?;

    let payload =
        extract_json(&raw).map_err(|e| FourcutError::StoryboardParse(e.to_string()))?;
    let mut storyboard: Storyboard = serde_json::from_str(payload).map_err(|e| {
        FourcutError::StoryboardParse(format!("storyboard JSON does not match the schema: {e}"))
    })?;
    storyboard
        .validate(state.num_cuts)
        .map_err(FourcutError::StoryboardParse)?;
    // Downstream stages rely on position 0 being cut 1.
    storyboard.cuts.sort_by_key(|c| c.cut_index);

    tracing::info!(
        job_id = %state.job_id,
        trace_id = %state.trace_id,
        cuts = storyboard.cuts.len(),
        "storyboard planned"
    );
    state.storyboard = Some(storyboard.clone());
    registry.update(
        &state.job_id,
        JobUpdate {
            storyboard: Some(storyboard),
            progress: Some(PROGRESS_PLAN_DONE),
            ..Default::default()
        },
    );
    Ok(())
}

/// Write one image prompt per cut, in index order.
pub async fn build_prompts<B: GenerationBackend>(
    backend: &B,
    registry: &JobRegistry,
    state: &mut PipelineState,
) -> Result<(), FourcutError> {
    checkpoint(registry, &state.job_id, PROGRESS_PROMPTS_START);

    let storyboard = state.require_storyboard()?.clone();
    let mut prompts = Vec::with_capacity(storyboard.cuts.len());
    for cut in &storyboard.cuts {
        let instruction = prompt_instruction(cut, &state.style_guide);
        let text = backend
            .text_complete(&instruction, PROMPT_TEMPERATURE)
            .await?;
        prompts.push(ImagePrompt {
            cut_index: cut.cut_index,
            prompt: text.trim().to_string(),
        });
    }

    tracing::debug!(job_id = %state.job_id, prompts = prompts.len(), "image prompts built");
    state.prompts = prompts.clone();
    registry.update(
        &state.job_id,
        JobUpdate {
            prompts: Some(prompts),
            progress: Some(PROGRESS_PROMPTS_DONE),
            ..Default::default()
        },
    );
    Ok(())
}

/// Render every cut. Cut 1 anchors the character; later cuts are
/// variations of the anchor, so cut 1 must finish before any of them start.
pub async fn generate_images<B: GenerationBackend, S: ArtifactStore>(
    backend: &B,
    artifacts: &S,
    registry: &JobRegistry,
    state: &mut PipelineState,
) -> Result<(), FourcutError> {
    checkpoint(registry, &state.job_id, PROGRESS_RENDER_START);

    let appearance = state.require_storyboard()?.character_appearance.clone();
    let prompts = state.prompts.clone();
    let first = prompts
        .first()
        .ok_or(FourcutError::Contract("rendering started with no prompts"))?;

    let mut images = Vec::with_capacity(prompts.len());

    let first_prompt = effective_prompt(&first.prompt, appearance.as_deref());
    let seed = u64::from(first.cut_index);
    let generated = match &state.reference_image {
        Some(reference) => backend.image_variation(&first_prompt, reference, seed).await?,
        None => backend.text_to_image(&first_prompt, seed).await?,
    };
    state.anchor = Some(match &state.reference_image {
        Some(reference) => reference.clone(),
        None => generated.bytes.clone(),
    });
    images.push(
        store_rendered(
            artifacts,
            &state.job_id,
            first.cut_index,
            &generated,
            Provenance::Initial,
        )
        .await?,
    );

    for prompt in prompts.iter().skip(1) {
        let anchor = state
            .anchor
            .as_ref()
            .ok_or(FourcutError::Contract("anchor missing after first cut"))?;
        let text = effective_prompt(&prompt.prompt, appearance.as_deref());
        let generated = backend
            .image_variation(&text, anchor, u64::from(prompt.cut_index))
            .await?;
        images.push(
            store_rendered(
                artifacts,
                &state.job_id,
                prompt.cut_index,
                &generated,
                Provenance::Initial,
            )
            .await?,
        );
    }

    tracing::info!(job_id = %state.job_id, images = images.len(), "cuts rendered");
    state.images = images.clone();
    registry.update(
        &state.job_id,
        JobUpdate {
            images: Some(images),
            progress: Some(PROGRESS_RENDER_DONE),
            ..Default::default()
        },
    );
    Ok(())
}

/// Judge every rendered cut against its planned intent. Replaces the whole
/// verdict set. Text-only proxy: the rendered pixels are not inspected.
pub async fn quality_gate<B: GenerationBackend>(
    backend: &B,
    registry: &JobRegistry,
    state: &mut PipelineState,
) -> Result<(), FourcutError> {
    checkpoint(registry, &state.job_id, PROGRESS_CHECK);

    let storyboard = state.require_storyboard()?.clone();
    let mut verdicts = Vec::with_capacity(state.images.len());
    for image in &state.images {
        let cut = storyboard.cut(image.cut_index).ok_or(FourcutError::Contract(
            "rendered image without a storyboard cut",
        ))?;
        let used_prompt = state.prompt_text(image.cut_index)?;
        let instruction = qa_instruction(cut, used_prompt);
        let raw = backend.text_complete(&instruction, QA_TEMPERATURE).await?;

        let verdict = parse_verdict(image.cut_index, &raw);
        if verdict.failing() {
            tracing::warn!(
                job_id = %state.job_id,
                cut = verdict.cut_index,
                reason = verdict.reason.as_deref().unwrap_or("unknown"),
                "cut failed quality review"
            );
        }
        verdicts.push(verdict);
    }

    state.qa_results = verdicts.clone();
    registry.update(
        &state.job_id,
        JobUpdate {
            qa_results: Some(verdicts),
            ..Default::default()
        },
    );
    Ok(())
}

/// Rewrite and re-render every failing cut that still has repair budget.
/// Exhausted cuts are left alone; their FAIL stands into the next check.
pub async fn repair<B: GenerationBackend, S: ArtifactStore>(
    backend: &B,
    artifacts: &S,
    registry: &JobRegistry,
    state: &mut PipelineState,
) -> Result<(), FourcutError> {
    let failing: Vec<QaVerdict> = state
        .qa_results
        .iter()
        .filter(|v| v.failing())
        .cloned()
        .collect();
    let appearance = state.require_storyboard()?.character_appearance.clone();

    for verdict in failing {
        if !state.retries.has_budget(verdict.cut_index, state.max_retries) {
            continue;
        }

        let old_prompt = state.prompt_text(verdict.cut_index)?.to_string();
        let instruction = repair_instruction(&old_prompt, &verdict);
        let rewritten = backend
            .text_complete(&instruction, REPAIR_TEMPERATURE)
            .await?
            .trim()
            .to_string();
        if let Some(prompt) = state
            .prompts
            .iter_mut()
            .find(|p| p.cut_index == verdict.cut_index)
        {
            prompt.prompt = rewritten.clone();
        }

        let text = effective_prompt(&rewritten, appearance.as_deref());
        let seed = u64::from(verdict.cut_index);
        let generated = if verdict.cut_index == 1 {
            match &state.reference_image {
                Some(reference) => backend.image_variation(&text, reference, seed).await?,
                None => backend.text_to_image(&text, seed).await?,
            }
        } else {
            let anchor = state
                .anchor
                .as_ref()
                .ok_or(FourcutError::Contract("anchor missing during repair"))?;
            backend.image_variation(&text, anchor, seed).await?
        };
        // A re-rendered cut 1 is the new anchor, unless the caller's
        // reference image is pinning the character.
        if verdict.cut_index == 1 && state.reference_image.is_none() {
            state.anchor = Some(generated.bytes.clone());
        }

        let rendered = store_rendered(
            artifacts,
            &state.job_id,
            verdict.cut_index,
            &generated,
            Provenance::Repaired,
        )
        .await?;
        if let Some(slot) = state
            .images
            .iter_mut()
            .find(|i| i.cut_index == verdict.cut_index)
        {
            *slot = rendered;
        }

        state.retries.record_attempt(verdict.cut_index);
        tracing::info!(
            job_id = %state.job_id,
            cut = verdict.cut_index,
            attempt = state.retries.consumed(verdict.cut_index),
            "cut repaired and re-rendered"
        );
    }

    registry.update(
        &state.job_id,
        JobUpdate {
            prompts: Some(state.prompts.clone()),
            images: Some(state.images.clone()),
            ..Default::default()
        },
    );
    Ok(())
}

async fn store_rendered<S: ArtifactStore>(
    artifacts: &S,
    job_id: &str,
    cut_index: u32,
    generated: &GeneratedImage,
    provenance: Provenance,
) -> Result<RenderedImage, FourcutError> {
    let stored = artifacts.save(job_id, cut_index, &generated.bytes).await?;
    Ok(RenderedImage {
        cut_index,
        url: stored.url,
        storage_key: stored.key,
        provenance,
    })
}

fn effective_prompt(prompt: &str, appearance: Option<&str>) -> String {
    match appearance {
        Some(appearance) => format!("{prompt}. Recurring character: {appearance}"),
        None => prompt.to_string(),
    }
}

fn parse_verdict(cut_index: u32, raw: &str) -> QaVerdict {
    #[derive(serde::Deserialize)]
    struct QaJudgment {
        status: QaStatus,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        fix_hint: Option<String>,
    }

    let Ok(payload) = extract_json(raw) else {
        return QaVerdict::unreadable(cut_index);
    };
    match serde_json::from_str::<QaJudgment>(payload) {
        Ok(judgment) => QaVerdict {
            cut_index,
            status: judgment.status,
            reason: judgment.reason,
            fix_hint: judgment.fix_hint,
        },
        Err(_) => QaVerdict::unreadable(cut_index),
    }
}

fn plan_instruction(diary: &str, num_cuts: u32, style_guide: &str) -> String {
    format!(
        "You are a storyboard editor turning diary entries into short comics.\n\
         Plan a {num_cuts}-cut comic strip for the diary below.\n\
         Respond with ONLY valid JSON, no other text.\n\
         \n\
         Format:\n\
         {{\"cuts\": [\n\
           {{\"cut_index\": 1, \"summary\": \"...\", \"emotion\": \"...\", \"scene\": \"...\", \"dialogue\": \"...or null\", \"camera\": \"...or null\"}}\n\
         ], \"character_appearance\": \"...or null\"}}\n\
         \n\
         Rules:\n\
         - Produce exactly {num_cuts} cuts, with cut_index running 1..{num_cuts}\n\
         - Follow the style guide: {style_guide}\n\
         - character_appearance is one sentence fixing how the diarist looks in every cut\n\
         \n\
         Diary:\n\
         \"\"\"{diary}\"\"\""
    )
}

fn prompt_instruction(cut: &Cut, style_guide: &str) -> String {
    format!(
        "Write the image-generation prompt for one comic panel.\n\
         Respond with a single line of English prompt text, nothing else.\n\
         The renderer cannot draw legible text: describe the scene visually and\n\
         never put dialogue, captions or written words in the prompt.\n\
         Style guide: {style_guide}\n\
         \n\
         Panel {}:\n\
         - summary: {}\n\
         - emotion: {}\n\
         - scene: {}\n\
         - dialogue: {}\n\
         - camera: {}",
        cut.cut_index,
        cut.summary,
        cut.emotion,
        cut.scene,
        cut.dialogue.as_deref().unwrap_or("none"),
        cut.camera.as_deref().unwrap_or("none"),
    )
}

fn qa_instruction(cut: &Cut, used_prompt: &str) -> String {
    format!(
        "You are the comic QA reviewer. Judge whether the prompt below matches\n\
         the panel's intent. Respond with ONLY valid JSON, no other text.\n\
         Format: {{\"status\": \"PASS\"|\"FAIL\", \"reason\": \"...\", \"fix_hint\": \"...\"}}\n\
         reason and fix_hint are required on FAIL and should stay short.\n\
         \n\
         Panel {} intent:\n\
         - summary: {}\n\
         - emotion: {}\n\
         - scene: {}\n\
         - dialogue: {}\n\
         - camera: {}\n\
         \n\
         Prompt actually used:\n\
         {used_prompt}",
        cut.cut_index,
        cut.summary,
        cut.emotion,
        cut.scene,
        cut.dialogue.as_deref().unwrap_or("none"),
        cut.camera.as_deref().unwrap_or("none"),
    )
}

fn repair_instruction(old_prompt: &str, verdict: &QaVerdict) -> String {
    format!(
        "You rewrite image prompts for comic panels.\n\
         Keep the intent of the existing prompt, but change it so the QA\n\
         failure below is resolved. Respond with the rewritten single-line\n\
         prompt only.\n\
         \n\
         Existing prompt:\n\
         {old_prompt}\n\
         \n\
         QA failure reason:\n\
         {}\n\
         \n\
         Fix hint:\n\
         {}",
        verdict.reason.as_deref().unwrap_or("not given"),
        verdict.fix_hint.as_deref().unwrap_or("not given"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::pipeline::model::GenerateRequest;

    /// Replies with one fixed text for every completion call.
    struct CannedBackend {
        reply: String,
    }

    impl GenerationBackend for CannedBackend {
        async fn text_complete(
            &self,
            _prompt: &str,
            _temperature: f32,
        ) -> Result<String, BackendError> {
            Ok(self.reply.clone())
        }

        async fn text_to_image(
            &self,
            _prompt: &str,
            _seed: u64,
        ) -> Result<GeneratedImage, BackendError> {
            unreachable!("text stages never render")
        }

        async fn image_variation(
            &self,
            _prompt: &str,
            _reference: &[u8],
            _seed: u64,
        ) -> Result<GeneratedImage, BackendError> {
            unreachable!("text stages never render")
        }
    }

    fn state(num_cuts: u32) -> PipelineState {
        PipelineState::new(
            "job-1",
            GenerateRequest {
                diary: "Today was a lucky day.".into(),
                num_cuts,
                style_guide: "webtoon style".into(),
                max_retries: 2,
                reference_image: None,
            },
        )
    }

    #[tokio::test]
    async fn plan_rejects_prose_without_braces() {
        let backend = CannedBackend {
            reply: "I cannot help with that.".into(),
        };
        let registry = JobRegistry::new();
        registry.create("job-1");
        let mut state = state(4);

        let err = plan(&backend, &registry, &mut state).await.unwrap_err();
        assert!(matches!(err, FourcutError::StoryboardParse(_)));
        assert!(err.to_string().contains("no JSON object"));
    }

    #[tokio::test]
    async fn plan_rejects_wrong_cut_count() {
        let backend = CannedBackend {
            reply: r#"{"cuts": [{"cut_index": 1, "summary": "s", "emotion": "e", "scene": "sc"}]}"#
                .into(),
        };
        let registry = JobRegistry::new();
        registry.create("job-1");
        let mut state = state(4);

        let err = plan(&backend, &registry, &mut state).await.unwrap_err();
        assert!(err.to_string().contains("expected 4 cuts"));
    }

    #[tokio::test]
    async fn plan_strips_prose_and_records_checkpoints() {
        let backend = CannedBackend {
            reply: concat!(
                "Sure, here is the storyboard you asked for: ",
                r#"{"cuts": [{"cut_index": 1, "summary": "s", "emotion": "e", "scene": "sc"}],"#,
                r#" "character_appearance": "short dark hair"}"#,
            )
            .into(),
        };
        let registry = JobRegistry::new();
        registry.create("job-1");
        let mut state = state(1);

        plan(&backend, &registry, &mut state).await.unwrap();

        assert_eq!(state.require_storyboard().unwrap().cuts.len(), 1);
        let job = registry.get("job-1").unwrap();
        assert_eq!(job.status, crate::registry::JobStatus::Running);
        assert_eq!(job.progress, 25);
        assert!(job.storyboard.is_some());
    }

    #[test]
    fn verdict_parsing_degrades_to_fail() {
        let unreadable = parse_verdict(3, "the picture looks fine to me");
        assert!(unreadable.failing());
        assert_eq!(unreadable.reason.as_deref(), Some("unparseable QA verdict"));

        let unknown_status = parse_verdict(3, r#"{"status": "MAYBE"}"#);
        assert!(unknown_status.failing());

        let pass = parse_verdict(3, r#"Verdict: {"status": "PASS"} all good"#);
        assert!(!pass.failing());
        assert_eq!(pass.cut_index, 3);

        let fail = parse_verdict(2, r#"{"status": "FAIL", "reason": "r", "fix_hint": "h"}"#);
        assert!(fail.failing());
        assert_eq!(fail.reason.as_deref(), Some("r"));
        assert_eq!(fail.fix_hint.as_deref(), Some("h"));
    }

    #[test]
    fn effective_prompt_appends_appearance_only_when_present() {
        assert_eq!(effective_prompt("a panel", None), "a panel");
        assert_eq!(
            effective_prompt("a panel", Some("yellow sweater")),
            "a panel. Recurring character: yellow sweater"
        );
    }

    #[test]
    fn prompt_instruction_forbids_text_in_panels() {
        let cut = Cut {
            cut_index: 2,
            summary: "missed the bus".into(),
            emotion: "flustered".into(),
            scene: "bus stop at dawn".into(),
            dialogue: Some("wait!".into()),
            camera: None,
        };
        let instruction = prompt_instruction(&cut, "webtoon style");
        assert!(instruction.contains("never put dialogue, captions or written words"));
        assert!(instruction.contains("Panel 2:"));
        assert!(instruction.contains("- camera: none"));
    }
}
