//! End-to-end pipeline tests against mock providers and an in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use upshot::pipeline::{
    AnswerAttributor, AttributionSummary, ExtractionCompleted, ExtractionEvents,
    ExtractionSubscriber, InterviewPipeline, PipelineOptions, RunRequest, StageContext,
    standard_events,
};
use upshot::provider::{
    AnalysisProvider, EvidenceExtraction, EvidenceExtractionRequest, InsightSynthesis,
    InsightSynthesisRequest, SharedAnalysisProvider,
};
use upshot::queue::{RetryPolicy, TaskQueue};
use upshot::realtime::{RealtimeBatch, RealtimeExtractor};
use upshot::storage::{Database, SharedDatabase};
use upshot::types::{
    Chapter, ErrorCategory, EvidenceDraft, InterviewStatus, PersonDraft, RecordScope,
    ResearchQuestion, Result, StageKind, TranscriptBundle, UpshotError, Utterance,
};

// =============================================================================
// Mocks
// =============================================================================

/// Mock analysis provider with scriptable failure budgets
struct MockAnalysisProvider {
    /// Failures to produce before extraction succeeds; u32::MAX never succeeds
    extract_failures: AtomicU32,
    /// Failures to produce before synthesis succeeds
    synth_failures: AtomicU32,
    extract_calls: AtomicU32,
    synth_calls: AtomicU32,
    /// Total chapters seen across extraction requests
    chapters_seen: AtomicU32,
    evidence_count: usize,
    people_count: usize,
    insight_count: usize,
    extract_delay: Duration,
}

impl MockAnalysisProvider {
    fn new(evidence_count: usize, people_count: usize, insight_count: usize) -> Self {
        Self {
            extract_failures: AtomicU32::new(0),
            synth_failures: AtomicU32::new(0),
            extract_calls: AtomicU32::new(0),
            synth_calls: AtomicU32::new(0),
            chapters_seen: AtomicU32::new(0),
            evidence_count,
            people_count,
            insight_count,
            extract_delay: Duration::ZERO,
        }
    }

    fn failing_extraction(mut self, failures: u32) -> Self {
        self.extract_failures = AtomicU32::new(failures);
        self
    }

    fn failing_synthesis(mut self, failures: u32) -> Self {
        self.synth_failures = AtomicU32::new(failures);
        self
    }

    fn with_extract_delay(mut self, delay: Duration) -> Self {
        self.extract_delay = delay;
        self
    }

    fn extract_calls(&self) -> u32 {
        self.extract_calls.load(Ordering::SeqCst)
    }

    fn synth_calls(&self) -> u32 {
        self.synth_calls.load(Ordering::SeqCst)
    }

    fn chapters_seen(&self) -> u32 {
        self.chapters_seen.load(Ordering::SeqCst)
    }

    fn take_failure(budget: &AtomicU32) -> bool {
        let remaining = budget.load(Ordering::SeqCst);
        if remaining == 0 {
            return false;
        }
        if remaining != u32::MAX {
            budget.fetch_sub(1, Ordering::SeqCst);
        }
        true
    }
}

#[async_trait]
impl AnalysisProvider for MockAnalysisProvider {
    async fn extract_evidence(
        &self,
        request: &EvidenceExtractionRequest,
    ) -> Result<EvidenceExtraction> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.chapters_seen
            .fetch_add(request.chapters.len() as u32, Ordering::SeqCst);
        if !self.extract_delay.is_zero() {
            tokio::time::sleep(self.extract_delay).await;
        }
        if Self::take_failure(&self.extract_failures) {
            return Err(UpshotError::provider_with_category(
                ErrorCategory::Transient,
                "mock extraction overloaded",
            ));
        }

        let evidence = (0..self.evidence_count)
            .map(|i| EvidenceDraft {
                verbatim: format!("\u{201C}Quote {} about exports\u{201D}", i),
                support: Some(if i % 3 == 0 { "supports" } else { "neutral" }.to_string()),
                kind_tags: vec![if i % 2 == 0 { "problem" } else { "goal" }.to_string()],
                confidence: Some("high".to_string()),
                ..Default::default()
            })
            .collect();
        let people = (0..self.people_count)
            .map(|i| PersonDraft {
                name: if i == 0 {
                    "Dana".to_string()
                } else {
                    format!("Speaker {}", char::from(b'A' + (i as u8 - 1)))
                },
                role: Some("participant".to_string()),
                ..Default::default()
            })
            .collect();

        Ok(EvidenceExtraction {
            evidence,
            people,
            ..Default::default()
        })
    }

    async fn synthesize_insights(
        &self,
        request: &InsightSynthesisRequest,
    ) -> Result<InsightSynthesis> {
        self.synth_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.synth_failures) {
            return Err(UpshotError::provider_with_category(
                ErrorCategory::Transient,
                "mock synthesis overloaded",
            ));
        }

        let insights = (0..self.insight_count)
            .map(|i| upshot::types::InsightDraft {
                name: format!("Insight {}", i),
                category: Some("pain".to_string()),
                confidence: Some("medium".to_string()),
                evidence_indices: vec![i % request.evidence.len().max(1)],
                ..Default::default()
            })
            .collect();
        Ok(InsightSynthesis { insights })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Subscriber that always fails, for isolation tests
struct FailingSubscriber {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ExtractionSubscriber for FailingSubscriber {
    fn task_name(&self) -> &'static str {
        "lens.broken-analysis"
    }

    async fn handle(&self, _store: SharedDatabase, _event: ExtractionCompleted) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(UpshotError::validation("this analysis never works"))
    }
}

/// Attribution strategy that always fails, for halt-semantics tests
struct FailingAttributor;

#[async_trait]
impl AnswerAttributor for FailingAttributor {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn attribute(&self, _ctx: &StageContext) -> Result<AttributionSummary> {
        Err(UpshotError::validation("attribution backend rejected the request"))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn store() -> SharedDatabase {
    let db = Database::open_in_memory().unwrap();
    db.initialize().unwrap();
    Arc::new(db)
}

fn transcript() -> TranscriptBundle {
    TranscriptBundle::new(
        vec![
            Utterance {
                speaker: "Interviewer".into(),
                text: "What slows your team down?".into(),
                start_ms: Some(0),
                end_ms: Some(3000),
            },
            Utterance {
                speaker: "Dana".into(),
                text: "Exports. We lose half a day every week.".into(),
                start_ms: Some(3000),
                end_ms: Some(9000),
            },
            Utterance {
                speaker: "Dana".into(),
                text: "I just want a dashboard that updates itself.".into(),
                start_ms: Some(9000),
                end_ms: Some(15000),
            },
        ],
        "en",
    )
}

fn fast_options() -> PipelineOptions {
    PipelineOptions {
        retry: RetryPolicy::fast(),
        stage_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn pipeline_with(
    store: &SharedDatabase,
    analysis: SharedAnalysisProvider,
    options: PipelineOptions,
) -> (InterviewPipeline, Arc<TaskQueue>) {
    let queue = Arc::new(TaskQueue::new());
    let events = Arc::new(
        standard_events(store.clone(), queue.clone())
            .with_retry(RetryPolicy::fast())
            .with_task_timeout(Duration::from_secs(5)),
    );
    let pipeline = InterviewPipeline::new(store.clone(), analysis, None, queue.clone(), events, options);
    (pipeline, queue)
}

fn scope() -> RecordScope {
    RecordScope::account("acct-1").with_project("proj-1")
}

async fn wait_for_lens(store: &SharedDatabase, interview_id: &str) {
    for _ in 0..100 {
        if store.lens_analysis_for(interview_id).unwrap().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("lens analysis never appeared for {}", interview_id);
}

// =============================================================================
// Scenario A: happy path, attribution flag off
// =============================================================================

#[tokio::test]
async fn happy_path_commits_evidence_people_insights_and_one_fanout() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(5, 2, 2));
    let (pipeline, _queue) = pipeline_with(&store, analysis.clone(), fast_options());

    let interview = store
        .create_interview(&scope(), Some("Pilot"), None)
        .unwrap();
    let request = RunRequest::new(scope())
        .with_transcript(transcript())
        .with_initiator("user-7");

    let summary = pipeline.run(&interview.id, request).await.unwrap();

    assert_eq!(summary.evidence_ids.len(), 5);
    assert_eq!(summary.person_ids.len(), 2);
    assert_eq!(summary.insight_ids.len(), 2);
    assert!(!summary.degraded);
    assert_eq!(
        summary.completed_stages,
        vec![
            StageKind::Ingestion,
            StageKind::Extraction,
            StageKind::Attribution,
            StageKind::InsightSynthesis,
        ]
    );

    assert_eq!(
        store.interview_status(&interview.id).unwrap(),
        InterviewStatus::Ready
    );
    assert_eq!(store.evidence_for_interview(&interview.id).unwrap().len(), 5);
    assert_eq!(store.people_for_interview(&interview.id).unwrap().len(), 2);
    assert_eq!(store.insights_for_interview(&interview.id).unwrap().len(), 2);

    // Exactly one fan-out dispatch, to the lens subscriber
    let fanouts = store.fanout_runs_for(&interview.id).unwrap();
    assert_eq!(fanouts.len(), 1);
    assert_eq!(fanouts[0].task_name, "lens.apply-conversation-lens");
    assert_eq!(fanouts[0].initiated_by.as_deref(), Some("user-7"));

    wait_for_lens(&store, &interview.id).await;
    let lens = store.lens_analysis_for(&interview.id).unwrap().unwrap();
    assert_eq!(lens.evidence_count, 5);

    // Insights cite committed evidence
    let insights = store.insights_for_interview(&interview.id).unwrap();
    for insight in &insights {
        let citations = store.citations_for_insight(&insight.id).unwrap();
        assert!(!citations.is_empty());
        for cited in &citations {
            assert!(summary.evidence_ids.contains(cited));
        }
    }

    // Verbatims were sanitized on the way in
    let evidence = store.evidence_for_interview(&interview.id).unwrap();
    assert!(evidence.iter().all(|e| e.verbatim.starts_with('"')));
}

#[tokio::test]
async fn stage_log_records_every_stage() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(2, 1, 1));
    let (pipeline, queue) = pipeline_with(&store, analysis, fast_options());

    let interview = store.create_interview(&scope(), None, None).unwrap();
    pipeline
        .run(
            &interview.id,
            RunRequest::new(scope()).with_transcript(transcript()),
        )
        .await
        .unwrap();

    let row = store.interview(&interview.id).unwrap();
    let log = &row.conversation_analysis;
    assert_eq!(log.records.len(), 4);
    assert!(log.records.iter().all(|r| r.outcome.is_success()));
    assert!(log.records.iter().all(|r| r.attempts == 1));

    // Every primary stage was dispatched under its task name, in order.
    // The fan-out dispatch interleaves, so filter to the interview tasks.
    let dispatched: Vec<String> = queue
        .dispatched_task_names()
        .into_iter()
        .filter(|name| name.starts_with("interview."))
        .collect();
    assert_eq!(
        dispatched,
        vec![
            "interview.upload-media-and-transcribe".to_string(),
            "interview.extract-evidence-and-people".to_string(),
            "interview.attribute-answers".to_string(),
            "interview.generate-key-takeaways".to_string(),
        ]
    );
}

// =============================================================================
// Scenario B: extraction exhausts retries
// =============================================================================

#[tokio::test]
async fn extraction_exhaustion_marks_error_and_halts() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(5, 2, 2).failing_extraction(u32::MAX));
    let (pipeline, _queue) = pipeline_with(&store, analysis.clone(), fast_options());

    let interview = store.create_interview(&scope(), None, None).unwrap();
    let err = pipeline
        .run(
            &interview.id,
            RunRequest::new(scope()).with_transcript(transcript()),
        )
        .await
        .unwrap_err();
    assert!(err.is_recoverable(), "final error should be the transient provider error");

    // Three attempts were made, then the chain halted
    assert_eq!(analysis.extract_calls(), 3);
    assert_eq!(analysis.synth_calls(), 0);
    assert_eq!(
        store.interview_status(&interview.id).unwrap(),
        InterviewStatus::Error
    );
    assert!(store.evidence_for_interview(&interview.id).unwrap().is_empty());
    assert!(store.fanout_runs_for(&interview.id).unwrap().is_empty());

    let row = store.interview(&interview.id).unwrap();
    let record = row
        .conversation_analysis
        .last_for(StageKind::Extraction)
        .unwrap();
    assert!(!record.outcome.is_success());
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn transient_extraction_failure_recovers_within_budget() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(3, 1, 1).failing_extraction(2));
    let (pipeline, _queue) = pipeline_with(&store, analysis.clone(), fast_options());

    let interview = store.create_interview(&scope(), None, None).unwrap();
    let summary = pipeline
        .run(
            &interview.id,
            RunRequest::new(scope()).with_transcript(transcript()),
        )
        .await
        .unwrap();

    assert_eq!(summary.evidence_ids.len(), 3);
    assert_eq!(analysis.extract_calls(), 3);
    assert_eq!(
        store.interview_status(&interview.id).unwrap(),
        InterviewStatus::Ready
    );

    let row = store.interview(&interview.id).unwrap();
    let record = row
        .conversation_analysis
        .last_for(StageKind::Extraction)
        .unwrap();
    assert!(record.outcome.is_success());
    assert_eq!(record.attempts, 3);
}

// =============================================================================
// Partial success: synthesis failure leaves ready
// =============================================================================

#[tokio::test]
async fn synthesis_failure_is_degraded_not_error() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(4, 1, 2).failing_synthesis(u32::MAX));
    let (pipeline, _queue) = pipeline_with(&store, analysis.clone(), fast_options());

    let interview = store.create_interview(&scope(), None, None).unwrap();
    let summary = pipeline
        .run(
            &interview.id,
            RunRequest::new(scope()).with_transcript(transcript()),
        )
        .await
        .unwrap();

    assert!(summary.degraded);
    assert_eq!(summary.evidence_ids.len(), 4);
    assert!(summary.insight_ids.is_empty());
    assert!(!summary.completed_stages.contains(&StageKind::InsightSynthesis));

    // Evidence survives, status stays ready, insights absent
    assert_eq!(
        store.interview_status(&interview.id).unwrap(),
        InterviewStatus::Ready
    );
    assert_eq!(store.evidence_for_interview(&interview.id).unwrap().len(), 4);
    assert!(store.insights_for_interview(&interview.id).unwrap().is_empty());
}

// =============================================================================
// Idempotency and re-triggering
// =============================================================================

#[tokio::test]
async fn reprocessing_skips_extraction_and_duplicates_nothing() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(5, 2, 2));
    let (pipeline, _queue) = pipeline_with(&store, analysis.clone(), fast_options());

    let interview = store.create_interview(&scope(), None, None).unwrap();
    pipeline
        .run(
            &interview.id,
            RunRequest::new(scope()).with_transcript(transcript()),
        )
        .await
        .unwrap();
    assert_eq!(analysis.extract_calls(), 1);

    // External reset, then a re-trigger with evidence already committed
    store.reset_for_reprocessing(&interview.id).unwrap();
    let summary = pipeline
        .run(&interview.id, RunRequest::new(scope()))
        .await
        .unwrap();

    // Provider untouched, rows unchanged, no second fan-out
    assert_eq!(analysis.extract_calls(), 1);
    assert_eq!(summary.evidence_ids.len(), 5);
    assert_eq!(store.evidence_for_interview(&interview.id).unwrap().len(), 5);
    assert_eq!(store.people_for_interview(&interview.id).unwrap().len(), 2);
    assert_eq!(store.fanout_runs_for(&interview.id).unwrap().len(), 1);
    assert_eq!(
        store.interview_status(&interview.id).unwrap(),
        InterviewStatus::Ready
    );
}

#[tokio::test]
async fn concurrent_runs_on_one_interview_are_rejected() {
    let store = store();
    let analysis = Arc::new(
        MockAnalysisProvider::new(2, 1, 1).with_extract_delay(Duration::from_millis(300)),
    );
    let (pipeline, _queue) = pipeline_with(&store, analysis, fast_options());
    let pipeline = Arc::new(pipeline);

    let interview = store.create_interview(&scope(), None, None).unwrap();
    let first = {
        let pipeline = pipeline.clone();
        let id = interview.id.clone();
        tokio::spawn(async move {
            pipeline
                .run(&id, RunRequest::new(scope()).with_transcript(transcript()))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = pipeline
        .run(
            &interview.id,
            RunRequest::new(scope()).with_transcript(transcript()),
        )
        .await;
    assert!(matches!(second, Err(UpshotError::RunInProgress(_))));

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_transcript_fails_validation_without_retry() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(2, 1, 1));
    let (pipeline, _queue) = pipeline_with(&store, analysis.clone(), fast_options());

    // No media_ref, no transcript, no transcription provider
    let interview = store.create_interview(&scope(), None, None).unwrap();
    let err = pipeline
        .run(&interview.id, RunRequest::new(scope()))
        .await
        .unwrap_err();
    assert!(matches!(err, UpshotError::Validation(_)));
    assert_eq!(analysis.extract_calls(), 0);

    // Ingestion had already moved the row to transcribing, so error is legal
    assert_eq!(
        store.interview_status(&interview.id).unwrap(),
        InterviewStatus::Error
    );

    let row = store.interview(&interview.id).unwrap();
    let record = row
        .conversation_analysis
        .last_for(StageKind::Ingestion)
        .unwrap();
    assert_eq!(record.attempts, 1);
}

// =============================================================================
// Attribution (flag on)
// =============================================================================

#[tokio::test]
async fn attribution_links_answers_and_flags_placeholder_speakers() {
    let store = store();
    // Second mock person is the placeholder "Speaker A"
    let analysis = Arc::new(MockAnalysisProvider::new(4, 2, 1));
    let options = PipelineOptions {
        persona_analysis: true,
        ..fast_options()
    };
    let (pipeline, _queue) = pipeline_with(&store, analysis, options);

    let questions = vec![
        ResearchQuestion {
            id: "q-problem".into(),
            text: "What slows you down?".into(),
            category: "problem".into(),
        },
        ResearchQuestion {
            id: "q-goal".into(),
            text: "What does success look like?".into(),
            category: "goal".into(),
        },
        ResearchQuestion {
            id: "q-artifact".into(),
            text: "What tools do you use?".into(),
            category: "artifact".into(),
        },
    ];

    let interview = store.create_interview(&scope(), None, None).unwrap();
    pipeline
        .run(
            &interview.id,
            RunRequest::new(scope())
                .with_transcript(transcript())
                .with_questions(questions),
        )
        .await
        .unwrap();

    let answers = store.planned_answers_for(&interview.id).unwrap();
    assert_eq!(answers.len(), 3);
    let by_question = |id: &str| answers.iter().find(|a| a.question_id == id).unwrap();
    assert!(by_question("q-problem").is_answered());
    assert!(by_question("q-goal").is_answered());
    assert!(!by_question("q-artifact").is_answered());
    assert!(!by_question("q-problem").evidence_ids.is_empty());

    let row = store.interview(&interview.id).unwrap();
    assert!(row.speaker_review_needed);
}

#[tokio::test]
async fn attribution_failure_halts_chain_but_cannot_demote_ready() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(3, 1, 2));
    let queue = Arc::new(TaskQueue::new());
    let events = Arc::new(
        standard_events(store.clone(), queue.clone())
            .with_retry(RetryPolicy::fast())
            .with_task_timeout(Duration::from_secs(5)),
    );
    let pipeline = InterviewPipeline::with_attributor(
        store.clone(),
        analysis.clone(),
        None,
        queue,
        events,
        fast_options(),
        Arc::new(FailingAttributor),
    );

    let interview = store.create_interview(&scope(), None, None).unwrap();
    let err = pipeline
        .run(
            &interview.id,
            RunRequest::new(scope()).with_transcript(transcript()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UpshotError::Validation(_)));

    // Synthesis never ran; committed evidence survives
    assert_eq!(analysis.synth_calls(), 0);
    assert_eq!(store.evidence_for_interview(&interview.id).unwrap().len(), 3);
    assert!(store.insights_for_interview(&interview.id).unwrap().is_empty());

    // Extraction already moved the row to ready, and ready rows are never
    // demoted; the failure lives in the stage log instead.
    assert_eq!(
        store.interview_status(&interview.id).unwrap(),
        InterviewStatus::Ready
    );
    let row = store.interview(&interview.id).unwrap();
    let record = row
        .conversation_analysis
        .last_for(StageKind::Attribution)
        .unwrap();
    assert!(!record.outcome.is_success());
    assert!(
        row.conversation_analysis
            .last_for(StageKind::InsightSynthesis)
            .is_none()
    );
}

#[tokio::test]
async fn noop_attribution_leaves_answers_untouched() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(4, 1, 1));
    // Default options: persona_analysis off
    let (pipeline, _queue) = pipeline_with(&store, analysis, fast_options());

    let questions = vec![ResearchQuestion {
        id: "q-problem".into(),
        text: "What slows you down?".into(),
        category: "problem".into(),
    }];

    let interview = store.create_interview(&scope(), None, None).unwrap();
    pipeline
        .run(
            &interview.id,
            RunRequest::new(scope())
                .with_transcript(transcript())
                .with_questions(questions),
        )
        .await
        .unwrap();

    // Planned answers exist (ingestion planted them) but stay planned
    let answers = store.planned_answers_for(&interview.id).unwrap();
    assert_eq!(answers.len(), 1);
    assert!(!answers[0].is_answered());
}

// =============================================================================
// Chapters and initiator plumbing
// =============================================================================

#[tokio::test]
async fn batch_chapters_reach_the_extraction_request() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(2, 1, 1));
    let (pipeline, _queue) = pipeline_with(&store, analysis.clone(), fast_options());

    let chapters = vec![
        Chapter {
            start_ms: 0,
            end_ms: Some(60_000),
            title: Some("Warm-up".into()),
            summary: None,
        },
        Chapter {
            start_ms: 60_000,
            end_ms: None,
            title: Some("Pain points".into()),
            summary: Some("Weekly export grind".into()),
        },
    ];

    let interview = store.create_interview(&scope(), None, None).unwrap();
    pipeline
        .run(
            &interview.id,
            RunRequest::new(scope())
                .with_transcript(transcript())
                .with_chapters(chapters),
        )
        .await
        .unwrap();

    assert_eq!(analysis.chapters_seen(), 2);
}

#[tokio::test]
async fn realtime_extraction_never_sends_chapters() {
    let analysis = Arc::new(MockAnalysisProvider::new(1, 0, 0));
    let extractor = RealtimeExtractor::new(analysis.clone());

    let batch = RealtimeBatch {
        utterances: vec![Utterance {
            speaker: "Dana".into(),
            text: "live note".into(),
            start_ms: None,
            end_ms: None,
        }],
        language: "en".into(),
        batch_index: 0,
        session_id: None,
    };
    extractor.extract_batch(&batch).await.unwrap();

    assert_eq!(analysis.chapters_seen(), 0);
}

#[tokio::test]
async fn run_initiator_defaults_to_the_scope_user() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(2, 1, 1));
    let (pipeline, _queue) = pipeline_with(&store, analysis, fast_options());

    let scoped = scope().with_user("user-9");
    let interview = store.create_interview(&scoped, None, None).unwrap();
    pipeline
        .run(
            &interview.id,
            RunRequest::new(scoped).with_transcript(transcript()),
        )
        .await
        .unwrap();

    let fanouts = store.fanout_runs_for(&interview.id).unwrap();
    assert_eq!(fanouts.len(), 1);
    assert_eq!(fanouts[0].initiated_by.as_deref(), Some("user-9"));
}

// =============================================================================
// Fan-out isolation
// =============================================================================

#[tokio::test]
async fn fanout_failure_never_touches_primary_status() {
    let store = store();
    let analysis = Arc::new(MockAnalysisProvider::new(3, 1, 1));
    let queue = Arc::new(TaskQueue::new());
    let failing_calls = Arc::new(AtomicU32::new(0));
    let events = Arc::new(
        ExtractionEvents::new(store.clone(), queue.clone())
            .with_retry(RetryPolicy::fast())
            .with_task_timeout(Duration::from_secs(5))
            .subscribe(Arc::new(FailingSubscriber {
                calls: failing_calls.clone(),
            })),
    );
    let pipeline = InterviewPipeline::new(
        store.clone(),
        analysis,
        None,
        queue,
        events,
        fast_options(),
    );

    let interview = store.create_interview(&scope(), None, None).unwrap();
    let summary = pipeline
        .run(
            &interview.id,
            RunRequest::new(scope()).with_transcript(transcript()),
        )
        .await
        .unwrap();
    assert!(!summary.degraded);

    // Give the detached subscriber task time to fail
    for _ in 0..100 {
        if failing_calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(failing_calls.load(Ordering::SeqCst) >= 1);

    // The dispatch was recorded, and the failure stayed isolated
    let fanouts = store.fanout_runs_for(&interview.id).unwrap();
    assert_eq!(fanouts.len(), 1);
    assert_eq!(fanouts[0].task_name, "lens.broken-analysis");
    assert_eq!(
        store.interview_status(&interview.id).unwrap(),
        InterviewStatus::Ready
    );
}

// =============================================================================
// Scenario C: realtime batches out of order
// =============================================================================

#[tokio::test]
async fn realtime_batches_are_self_contained_in_any_order() {
    let analysis: SharedAnalysisProvider = Arc::new(MockAnalysisProvider::new(2, 1, 0));
    let extractor = RealtimeExtractor::new(analysis);

    let batch = |index: u32| RealtimeBatch {
        utterances: vec![Utterance {
            speaker: "Dana".into(),
            text: format!("live utterance for batch {}", index),
            start_ms: Some(u64::from(index) * 1000),
            end_ms: None,
        }],
        language: "en".into(),
        batch_index: index,
        session_id: Some("sess-1".into()),
    };

    for index in [0u32, 2, 1] {
        let result = extractor.extract_batch(&batch(index)).await.unwrap();
        assert_eq!(result.batch_index, index);
        assert_eq!(result.session_id.as_deref(), Some("sess-1"));
        assert_eq!(result.evidence.len(), 2);
        // Verbatims come back sanitized
        assert!(result.evidence.iter().all(|e| e.verbatim.starts_with('"')));
    }
}

#[tokio::test]
async fn realtime_rejects_empty_batches() {
    let analysis: SharedAnalysisProvider = Arc::new(MockAnalysisProvider::new(2, 1, 0));
    let extractor = RealtimeExtractor::new(analysis);

    let empty = RealtimeBatch {
        utterances: vec![],
        language: "en".into(),
        batch_index: 0,
        session_id: None,
    };
    assert!(matches!(
        extractor.extract_batch(&empty).await,
        Err(UpshotError::Validation(_))
    ));
}

#[tokio::test]
async fn realtime_deadline_is_enforced() {
    let analysis: SharedAnalysisProvider = Arc::new(
        MockAnalysisProvider::new(1, 0, 0).with_extract_delay(Duration::from_secs(60)),
    );
    let extractor = RealtimeExtractor::new(analysis).with_timeout(Duration::from_millis(50));

    let batch = RealtimeBatch {
        utterances: vec![Utterance {
            speaker: "Dana".into(),
            text: "slow".into(),
            start_ms: None,
            end_ms: None,
        }],
        language: "en".into(),
        batch_index: 0,
        session_id: None,
    };
    assert!(matches!(
        extractor.extract_batch(&batch).await,
        Err(UpshotError::Timeout { .. })
    ));
}
