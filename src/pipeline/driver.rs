//! Drives one job through the phase loop and classifies the outcome.

use std::sync::Arc;

use crate::artifact::ArtifactStore;
use crate::backend::GenerationBackend;
use crate::error::FourcutError;
use crate::registry::{JobRegistry, JobStatus, JobUpdate};

use super::model::{GenerateRequest, PipelineState};
use super::phase::Phase;
use super::stages;

/// Owns the collaborators and runs jobs to completion.
pub struct Driver<B, S> {
    backend: B,
    artifacts: S,
    registry: Arc<JobRegistry>,
}

impl<B: GenerationBackend, S: ArtifactStore> Driver<B, S> {
    pub fn new(backend: B, artifacts: S, registry: Arc<JobRegistry>) -> Self {
        Self {
            backend,
            artifacts,
            registry,
        }
    }

    /// Execute one job to completion.
    ///
    /// Every outcome is mirrored into the registry before this returns:
    /// pollers always learn the result there, the `Err` is for a
    /// supervising caller that wants to log or alert.
    pub async fn run(&self, job_id: &str, request: GenerateRequest) -> Result<(), FourcutError> {
        if let Err(error) = request.validate() {
            self.fail(job_id, &error);
            return Err(error);
        }

        self.registry.update(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Running),
                progress: Some(1),
                error: Some(None),
                ..Default::default()
            },
        );

        let mut state = PipelineState::new(job_id, request);
        match self.execute(&mut state).await {
            Ok(()) => {
                self.classify(&state);
                Ok(())
            }
            Err(error) => {
                self.fail(job_id, &error);
                Err(error)
            }
        }
    }

    /// The phase loop. Straight-line through planning, prompting and
    /// rendering, then checking and repairing alternate until the pure
    /// transition function says the job is done.
    async fn execute(&self, state: &mut PipelineState) -> Result<(), FourcutError> {
        let mut phase = Phase::Planning;
        loop {
            tracing::debug!(job_id = %state.job_id, %phase, "entering phase");
            match phase {
                Phase::Planning => stages::plan(&self.backend, &self.registry, state).await?,
                Phase::Prompting => {
                    stages::build_prompts(&self.backend, &self.registry, state).await?
                }
                Phase::Rendering => {
                    stages::generate_images(&self.backend, &self.artifacts, &self.registry, state)
                        .await?
                }
                Phase::Checking => {
                    stages::quality_gate(&self.backend, &self.registry, state).await?
                }
                Phase::Repairing => {
                    stages::repair(&self.backend, &self.artifacts, &self.registry, state).await?
                }
                Phase::Done => break,
            }
            phase = phase.next(&state.qa_results, &state.retries, state.max_retries);
        }
        Ok(())
    }

    /// Terminal classification. Cuts still failing after the repair loop
    /// make the job FAILED; that is a normal outcome, not an error.
    fn classify(&self, state: &PipelineState) {
        let failing: Vec<u32> = state
            .qa_results
            .iter()
            .filter(|v| v.failing())
            .map(|v| v.cut_index)
            .collect();

        if failing.is_empty() {
            tracing::info!(job_id = %state.job_id, "job succeeded");
            self.registry.update(
                &state.job_id,
                JobUpdate {
                    status: Some(JobStatus::Succeeded),
                    progress: Some(100),
                    ..Default::default()
                },
            );
        } else {
            tracing::warn!(job_id = %state.job_id, cuts = ?failing, "job failed quality review");
            self.registry.update(
                &state.job_id,
                JobUpdate {
                    status: Some(JobStatus::Failed),
                    progress: Some(100),
                    error: Some(Some(format!("cuts {failing:?} failed QA after retries"))),
                    ..Default::default()
                },
            );
        }
    }

    fn fail(&self, job_id: &str, error: &FourcutError) {
        tracing::error!(job_id, %error, "job aborted");
        self.registry.update(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Failed),
                progress: Some(100),
                error: Some(Some(error.to_string())),
                ..Default::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::artifact::StoredArtifact;
    use crate::backend::{BackendError, GeneratedImage};
    use crate::pipeline::model::Provenance;

    /// How a rendered image was requested from the backend.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum ImageCall {
        TextToImage { seed: u64 },
        Variation { seed: u64, reference_len: usize },
    }

    /// Scripted backend: storyboards and prompts are generated on demand;
    /// QA fails the configured cuts a configured number of times
    /// (`u32::MAX` means forever) and passes everything else.
    struct ScriptedBackend {
        num_cuts: u32,
        remaining_fails: Mutex<HashMap<u32, u32>>,
        qa_instructions: Mutex<Vec<String>>,
        image_calls: Mutex<Vec<ImageCall>>,
    }

    impl ScriptedBackend {
        fn passing(num_cuts: u32) -> Self {
            Self::with_fail_plan(num_cuts, HashMap::new())
        }

        fn with_fail_plan(num_cuts: u32, fail_plan: HashMap<u32, u32>) -> Self {
            Self {
                num_cuts,
                remaining_fails: Mutex::new(fail_plan),
                qa_instructions: Mutex::new(Vec::new()),
                image_calls: Mutex::new(Vec::new()),
            }
        }

        fn storyboard_reply(&self) -> String {
            let cuts: Vec<serde_json::Value> = (1..=self.num_cuts)
                .map(|i| {
                    serde_json::json!({
                        "cut_index": i,
                        "summary": format!("moment {i}"),
                        "emotion": "content",
                        "scene": format!("scene {i}"),
                        "dialogue": null,
                        "camera": null
                    })
                })
                .collect();
            let storyboard = serde_json::json!({
                "cuts": cuts,
                "character_appearance": "short dark hair, yellow sweater"
            });
            format!("Here you go: {storyboard}")
        }

        fn qa_reply(&self, instruction: &str) -> String {
            let cut = number_after(instruction, "Panel ").expect("QA instruction names its panel");
            let mut remaining = self.remaining_fails.lock().unwrap();
            let fail = match remaining.get_mut(&cut) {
                Some(0) | None => false,
                Some(n) => {
                    if *n != u32::MAX {
                        *n -= 1;
                    }
                    true
                }
            };
            if fail {
                format!(
                    r#"{{"status":"FAIL","reason":"panel {cut} drifted from intent","fix_hint":"emphasize the diary moment"}}"#
                )
            } else {
                r#"Verdict: {"status":"PASS"} looks right"#.to_string()
            }
        }
    }

    fn number_after(haystack: &str, marker: &str) -> Option<u32> {
        let at = haystack.find(marker)? + marker.len();
        let digits: String = haystack[at..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    impl GenerationBackend for ScriptedBackend {
        async fn text_complete(
            &self,
            prompt: &str,
            _temperature: f32,
        ) -> Result<String, BackendError> {
            // Let a concurrent poller observe intermediate checkpoints.
            tokio::time::sleep(Duration::from_millis(2)).await;
            if prompt.contains(r#""cuts""#) {
                Ok(self.storyboard_reply())
            } else if prompt.contains(r#""status""#) {
                self.qa_instructions.lock().unwrap().push(prompt.to_string());
                Ok(self.qa_reply(prompt))
            } else if prompt.contains("rewrite image prompts") {
                let cut = number_after(prompt, "panel ").expect("old prompt names its panel");
                Ok(format!("repaired prompt for panel {cut}"))
            } else {
                let cut = number_after(prompt, "Panel ").expect("instruction names its panel");
                Ok(format!("initial prompt for panel {cut}"))
            }
        }

        async fn text_to_image(
            &self,
            _prompt: &str,
            seed: u64,
        ) -> Result<GeneratedImage, BackendError> {
            self.image_calls
                .lock()
                .unwrap()
                .push(ImageCall::TextToImage { seed });
            Ok(GeneratedImage {
                bytes: vec![0xAA, seed as u8],
                model_id: "scripted".into(),
                seed,
            })
        }

        async fn image_variation(
            &self,
            _prompt: &str,
            reference: &[u8],
            seed: u64,
        ) -> Result<GeneratedImage, BackendError> {
            self.image_calls.lock().unwrap().push(ImageCall::Variation {
                seed,
                reference_len: reference.len(),
            });
            Ok(GeneratedImage {
                bytes: vec![0xBB, seed as u8],
                model_id: "scripted".into(),
                seed,
            })
        }
    }

    /// Keeps nothing on disk; just fabricates keys and URLs.
    struct MemoryStore;

    impl ArtifactStore for MemoryStore {
        async fn save(
            &self,
            job_id: &str,
            cut_index: u32,
            _bytes: &[u8],
        ) -> Result<StoredArtifact, FourcutError> {
            let key = format!("jobs/{job_id}/cut-{cut_index:02}.png");
            Ok(StoredArtifact {
                url: format!("mem://{key}"),
                key,
            })
        }
    }

    fn request(num_cuts: u32, max_retries: u32) -> GenerateRequest {
        GenerateRequest {
            diary: "Today was a lucky day. The bus driver waited, lunch was my favorite, \
                    and the dog was happy to see me."
                .into(),
            num_cuts,
            style_guide: "warm pastel webtoon".into(),
            max_retries,
            reference_image: None,
        }
    }

    fn driver_with(
        backend: ScriptedBackend,
    ) -> (Driver<ScriptedBackend, MemoryStore>, Arc<JobRegistry>) {
        let registry = Arc::new(JobRegistry::new());
        let driver = Driver::new(backend, MemoryStore, registry.clone());
        (driver, registry)
    }

    #[tokio::test]
    async fn all_pass_succeeds_with_initial_provenance() {
        let (driver, registry) = driver_with(ScriptedBackend::passing(4));
        registry.create("job-1");

        driver.run("job-1", request(4, 2)).await.unwrap();

        let job = registry.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());

        let storyboard = job.storyboard.unwrap();
        let mut indices: Vec<u32> = storyboard.cuts.iter().map(|c| c.cut_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![1, 2, 3, 4]);

        assert_eq!(job.prompts.unwrap().len(), 4);
        let images = job.images.unwrap();
        assert_eq!(images.len(), 4);
        assert!(images.iter().all(|i| i.provenance == Provenance::Initial));
        assert!(job.qa_results.unwrap().iter().all(|v| !v.failing()));
    }

    #[tokio::test]
    async fn cut_one_anchors_the_rest_of_the_strip() {
        let (driver, registry) = driver_with(ScriptedBackend::passing(3));
        registry.create("job-1");

        driver.run("job-1", request(3, 2)).await.unwrap();

        let calls = driver.backend.image_calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        // Cut 1 is a fresh render; cuts 2 and 3 vary cut 1's bytes.
        assert_eq!(calls[0], ImageCall::TextToImage { seed: 1 });
        assert_eq!(
            calls[1],
            ImageCall::Variation {
                seed: 2,
                reference_len: 2
            }
        );
        assert_eq!(
            calls[2],
            ImageCall::Variation {
                seed: 3,
                reference_len: 2
            }
        );
    }

    #[tokio::test]
    async fn caller_reference_image_seeds_every_cut() {
        let (driver, registry) = driver_with(ScriptedBackend::passing(2));
        registry.create("job-1");

        let mut req = request(2, 2);
        req.reference_image = Some(vec![1, 2, 3, 4, 5]);
        driver.run("job-1", req).await.unwrap();

        let calls = driver.backend.image_calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ImageCall::Variation {
                    seed: 1,
                    reference_len: 5
                },
                ImageCall::Variation {
                    seed: 2,
                    reference_len: 5
                },
            ]
        );
    }

    #[tokio::test]
    async fn failing_cut_is_repaired_then_passes() {
        let backend = ScriptedBackend::with_fail_plan(4, HashMap::from([(3, 1)]));
        let (driver, registry) = driver_with(backend);
        registry.create("job-1");

        let mut state = PipelineState::new("job-1", request(4, 2));
        driver.execute(&mut state).await.unwrap();
        driver.classify(&state);

        let job = registry.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);

        // Only the failing cut was touched.
        let images = job.images.unwrap();
        for image in &images {
            let expected = if image.cut_index == 3 {
                Provenance::Repaired
            } else {
                Provenance::Initial
            };
            assert_eq!(image.provenance, expected, "cut {}", image.cut_index);
        }
        assert_eq!(state.retries.consumed(3), 1);
        assert_eq!(state.retries.consumed(1), 0);
        assert_eq!(
            state.prompt_text(3).unwrap(),
            "repaired prompt for panel 3"
        );
    }

    #[tokio::test]
    async fn repaired_prompt_is_what_the_next_check_sees() {
        let backend = ScriptedBackend::with_fail_plan(4, HashMap::from([(3, 1)]));
        let (driver, registry) = driver_with(backend);
        registry.create("job-1");

        driver.run("job-1", request(4, 2)).await.unwrap();

        let instructions = driver.backend.qa_instructions.lock().unwrap();
        // Two gate passes over 4 cuts.
        assert_eq!(instructions.len(), 8);
        let recheck_of_cut_3 = instructions
            .iter()
            .rev()
            .find(|i| i.contains("Panel 3"))
            .unwrap();
        assert!(recheck_of_cut_3.contains("repaired prompt for panel 3"));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_job() {
        let backend = ScriptedBackend::with_fail_plan(4, HashMap::from([(2, u32::MAX)]));
        let (driver, registry) = driver_with(backend);
        registry.create("job-1");

        let mut state = PipelineState::new("job-1", request(4, 2));
        driver.execute(&mut state).await.unwrap();
        driver.classify(&state);

        assert_eq!(state.retries.consumed(2), 2);

        let job = registry.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 100);
        let error = job.error.unwrap();
        assert!(error.contains("failed QA"), "error was: {error}");
        assert!(error.contains('2'));

        // Initial render plus exactly max_retries repairs of cut 2.
        let renders_of_cut_2 = driver
            .backend
            .image_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, ImageCall::Variation { seed: 2, .. }))
            .count();
        assert_eq!(renders_of_cut_2, 3);
    }

    #[tokio::test]
    async fn zero_retry_budget_classifies_after_one_gate_pass() {
        let backend = ScriptedBackend::with_fail_plan(4, HashMap::from([(1, u32::MAX)]));
        let (driver, registry) = driver_with(backend);
        registry.create("job-1");

        let mut state = PipelineState::new("job-1", request(4, 0));
        driver.execute(&mut state).await.unwrap();
        driver.classify(&state);

        // One gate pass, no repairs, everything still initial.
        assert_eq!(driver.backend.qa_instructions.lock().unwrap().len(), 4);
        assert_eq!(state.retries.consumed(1), 0);
        assert!(
            state
                .images
                .iter()
                .all(|i| i.provenance == Provenance::Initial)
        );
        assert_eq!(registry.get("job-1").unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn plan_prose_aborts_with_storyboard_parse_error() {
        struct ProseBackend;
        impl GenerationBackend for ProseBackend {
            async fn text_complete(
                &self,
                _prompt: &str,
                _temperature: f32,
            ) -> Result<String, BackendError> {
                Ok("I had trouble with that request, sorry.".into())
            }
            async fn text_to_image(
                &self,
                _prompt: &str,
                _seed: u64,
            ) -> Result<GeneratedImage, BackendError> {
                unreachable!("plan fails before rendering")
            }
            async fn image_variation(
                &self,
                _prompt: &str,
                _reference: &[u8],
                _seed: u64,
            ) -> Result<GeneratedImage, BackendError> {
                unreachable!("plan fails before rendering")
            }
        }

        let registry = Arc::new(JobRegistry::new());
        let driver = Driver::new(ProseBackend, MemoryStore, registry.clone());
        registry.create("job-1");

        let err = driver.run("job-1", request(4, 2)).await.unwrap_err();
        assert!(matches!(err, FourcutError::StoryboardParse(_)));

        let job = registry.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 100);
        assert!(job.error.unwrap().contains("Storyboard parse error"));
    }

    #[tokio::test]
    async fn backend_error_during_render_aborts_the_job() {
        struct FlakyRenderBackend {
            inner: ScriptedBackend,
        }
        impl GenerationBackend for FlakyRenderBackend {
            async fn text_complete(
                &self,
                prompt: &str,
                temperature: f32,
            ) -> Result<String, BackendError> {
                self.inner.text_complete(prompt, temperature).await
            }
            async fn text_to_image(
                &self,
                _prompt: &str,
                _seed: u64,
            ) -> Result<GeneratedImage, BackendError> {
                Err(BackendError::ApiError {
                    status: 500,
                    message: "render farm down".into(),
                })
            }
            async fn image_variation(
                &self,
                _prompt: &str,
                _reference: &[u8],
                _seed: u64,
            ) -> Result<GeneratedImage, BackendError> {
                unreachable!("cut 1 fails first")
            }
        }

        let registry = Arc::new(JobRegistry::new());
        let driver = Driver::new(
            FlakyRenderBackend {
                inner: ScriptedBackend::passing(4),
            },
            MemoryStore,
            registry.clone(),
        );
        registry.create("job-1");

        let err = driver.run("job-1", request(4, 2)).await.unwrap_err();
        assert!(matches!(err, FourcutError::Backend(_)));

        let job = registry.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("render farm down"));
    }

    #[tokio::test]
    async fn invalid_request_is_recorded_and_returned() {
        let (driver, registry) = driver_with(ScriptedBackend::passing(4));
        registry.create("job-1");

        let mut bad = request(4, 2);
        bad.diary = "   ".into();
        let err = driver.run("job-1", bad).await.unwrap_err();
        assert!(matches!(err, FourcutError::InvalidRequest(_)));

        let job = registry.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("diary text"));
    }

    #[tokio::test]
    async fn progress_is_monotonic_while_running() {
        let (driver, registry) = driver_with(ScriptedBackend::passing(4));
        registry.create("job-1");

        let poller = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    if let Some(job) = registry.get("job-1") {
                        seen.push(job.progress);
                        if job.status.is_terminal() {
                            return seen;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        driver.run("job-1", request(4, 1)).await.unwrap();
        let seen = poller.await.unwrap();

        assert!(
            seen.windows(2).all(|w| w[0] <= w[1]),
            "progress went backwards: {seen:?}"
        );
        assert_eq!(*seen.last().unwrap(), 100);
    }
}
