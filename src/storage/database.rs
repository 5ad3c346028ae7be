//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite store for interview records and derived artifacts featuring:
//! - Connection pooling via r2d2 for concurrent access
//! - Compare-and-set status writes (the pipeline's single-writer guarantee)
//! - Version-tracked migrations
//! - WAL mode for optimal read/write performance

use std::path::Path;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::types::{
    ConversationAnalysis, Confidence, EvidenceUnit, Insight, Interview, InterviewStatus, KindTag,
    Person, RecordScope, ResearchQuestion, Result, ResultExt, StageRecord, Support,
    TranscriptBundle, UpshotError,
};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

/// Migration definitions
struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Add speaker review flag",
        up: "ALTER TABLE interviews ADD COLUMN speaker_review_needed INTEGER NOT NULL DEFAULT 0",
    },
    Migration {
        version: 2,
        description: "Add answer evidence links",
        up: "ALTER TABLE project_answers ADD COLUMN evidence_ids TEXT NOT NULL DEFAULT '[]'",
    },
];

// =============================================================================
// Row Types
// =============================================================================

/// A planned research answer row
#[derive(Debug, Clone)]
pub struct PlannedAnswer {
    pub id: String,
    pub question_id: String,
    pub question_text: String,
    pub question_category: String,
    pub status: String,
    pub evidence_ids: Vec<String>,
}

impl PlannedAnswer {
    pub fn is_answered(&self) -> bool {
        self.status == "answered"
    }
}

/// A recorded fan-out dispatch
#[derive(Debug, Clone)]
pub struct FanoutRun {
    pub id: String,
    pub interview_id: String,
    pub task_name: String,
    pub initiated_by: Option<String>,
    pub run_id: String,
}

/// Output row owned by the conversation-lens subscriber
#[derive(Debug, Clone)]
pub struct LensAnalysis {
    pub id: String,
    pub interview_id: String,
    pub summary: String,
    pub evidence_count: u32,
    pub computed_by: Option<String>,
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Connection pool configuration
///
/// Pool size is dynamically calculated based on CPU cores.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// Minimum idle connections to keep ready
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 4;
    const MAX_POOL_SIZE: u32 = 32;
    const POOL_SIZE_MULTIPLIER: f32 = 2.0;

    /// Calculate optimal pool size based on available CPU cores
    pub fn optimal_pool_size() -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);

        let calculated = (cores as f32 * Self::POOL_SIZE_MULTIPLIER) as u32;
        calculated.clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE)
    }

    /// Create config with automatic pool sizing based on CPU cores
    pub fn auto() -> Self {
        let max_size = Self::optimal_pool_size();
        Self {
            max_size,
            min_idle: (max_size / 4).max(2),
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// =============================================================================
// Database
// =============================================================================

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    /// Open database with custom pool configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| UpshotError::Storage(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    ///
    /// Single-connection pool so every caller sees the same memory database.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| UpshotError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Configure a new connection with production-ready settings.
    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = 5000;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    /// Get a connection from the pool.
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            UpshotError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        // Set version to current since schema.sql includes all columns
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .with_context("Failed to set schema version")?;

        drop(conn);
        // Migrations only needed for existing databases with older versions
        self.migrate()?;
        Ok(())
    }

    /// Run version-tracked migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;

        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;

                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    // =========================================================================
    // Interviews
    // =========================================================================

    /// Insert a new interview row in `uploaded` status.
    pub fn create_interview(
        &self,
        scope: &RecordScope,
        title: Option<&str>,
        media_ref: Option<&str>,
    ) -> Result<Interview> {
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO interviews (id, account_id, project_id, title, media_ref, status, conversation_analysis, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'uploaded', '{\"records\":[]}', ?6, ?6)",
            params![id, scope.account_id, scope.project_id, title, media_ref, ts],
        )?;
        drop(conn);
        self.interview(&id)
    }

    fn map_interview(row: &Row<'_>) -> rusqlite::Result<(Interview, String, String)> {
        let status_raw: String = row.get(7)?;
        let analysis_raw: String = row.get(8)?;
        let interview = Interview {
            id: row.get(0)?,
            account_id: row.get(1)?,
            project_id: row.get(2)?,
            title: row.get(3)?,
            media_ref: row.get(4)?,
            transcript_ref: row.get(5)?,
            language: row.get(6)?,
            // Patched below once the raw strings are parsed
            status: InterviewStatus::Uploaded,
            conversation_analysis: ConversationAnalysis::default(),
            speaker_review_needed: row.get::<_, i64>(9)? != 0,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        };
        Ok((interview, status_raw, analysis_raw))
    }

    /// Fetch an interview by id.
    pub fn interview(&self, id: &str) -> Result<Interview> {
        let conn = self.conn()?;
        let (mut interview, status_raw, analysis_raw) = conn
            .query_row(
                "SELECT id, account_id, project_id, title, media_ref, transcript_ref, language,
                        status, conversation_analysis, speaker_review_needed, created_at, updated_at
                 FROM interviews WHERE id = ?1",
                params![id],
                Self::map_interview,
            )
            .optional()?
            .ok_or_else(|| UpshotError::Storage(format!("Interview {} not found", id)))?;

        interview.status = InterviewStatus::parse(&status_raw)?;
        interview.conversation_analysis = serde_json::from_str(&analysis_raw)?;
        Ok(interview)
    }

    /// Current status only (cheaper than a full row fetch).
    pub fn interview_status(&self, id: &str) -> Result<InterviewStatus> {
        let conn = self.conn()?;
        let raw: String = conn
            .query_row(
                "SELECT status FROM interviews WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| UpshotError::Storage(format!("Interview {} not found", id)))?;
        InterviewStatus::parse(&raw)
    }

    /// Forward-only status write.
    ///
    /// Idempotent when the row is already at the target (a retried attempt
    /// re-running a stage is not an error). Any other non-forward move is an
    /// `IllegalTransition`. The UPDATE itself is compare-and-set on the
    /// observed status so concurrent writers cannot clobber each other.
    pub fn advance_status(&self, id: &str, target: InterviewStatus) -> Result<()> {
        let current = self.interview_status(id)?;
        if current == target {
            return Ok(());
        }
        if !current.can_transition(target) {
            return Err(UpshotError::IllegalTransition {
                interview_id: id.to_string(),
                from: current.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE interviews SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
            params![id, target.as_str(), now(), current.as_str()],
        )?;
        if changed == 0 {
            // Lost a race; accept only if the winner wrote the same target
            drop(conn);
            let observed = self.interview_status(id)?;
            if observed == target {
                return Ok(());
            }
            return Err(UpshotError::Storage(format!(
                "Concurrent status write on interview {} (observed {})",
                id, observed
            )));
        }
        Ok(())
    }

    /// Terminal failure write, legal only from `transcribing` or `analyzing`.
    /// Idempotent when the row is already in `error`.
    pub fn mark_error(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE interviews SET status = 'error', updated_at = ?2
             WHERE id = ?1 AND status IN ('transcribing', 'analyzing')",
            params![id, now()],
        )?;
        if changed == 0 {
            drop(conn);
            let current = self.interview_status(id)?;
            if current == InterviewStatus::Error {
                return Ok(());
            }
            return Err(UpshotError::IllegalTransition {
                interview_id: id.to_string(),
                from: current.as_str().to_string(),
                to: "error".to_string(),
            });
        }
        Ok(())
    }

    /// Explicit external reset: the only legal regression. Never called by
    /// the pipeline itself.
    pub fn reset_for_reprocessing(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE interviews SET status = 'transcribing', updated_at = ?2
             WHERE id = ?1 AND status IN ('ready', 'error')",
            params![id, now()],
        )?;
        if changed == 0 {
            drop(conn);
            let current = self.interview_status(id)?;
            return Err(UpshotError::IllegalTransition {
                interview_id: id.to_string(),
                from: current.as_str().to_string(),
                to: "transcribing".to_string(),
            });
        }
        Ok(())
    }

    /// Persist the normalized transcript for an interview.
    pub fn set_transcript(&self, id: &str, bundle: &TranscriptBundle) -> Result<()> {
        let json = serde_json::to_string(bundle)?;
        let transcript_ref = format!("transcript:{}", id);
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE interviews SET transcript_json = ?2, transcript_ref = ?3, language = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, json, transcript_ref, bundle.language, now()],
        )?;
        if changed == 0 {
            return Err(UpshotError::Storage(format!("Interview {} not found", id)));
        }
        Ok(())
    }

    /// Load the stored transcript, if ingestion has run.
    pub fn transcript(&self, id: &str) -> Result<Option<TranscriptBundle>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT transcript_json FROM interviews WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| UpshotError::Storage(format!("Interview {} not found", id)))?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Append a stage record to the interview's analysis log.
    ///
    /// Read-modify-write inside a transaction; the log itself is append-only.
    pub fn append_stage_record(&self, id: &str, record: StageRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let raw: String = tx
            .query_row(
                "SELECT conversation_analysis FROM interviews WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| UpshotError::Storage(format!("Interview {} not found", id)))?;

        let mut analysis: ConversationAnalysis = serde_json::from_str(&raw)?;
        analysis.push(record);
        let updated = serde_json::to_string(&analysis)?;

        tx.execute(
            "UPDATE interviews SET conversation_analysis = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, updated, now()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Flag the interview for manual speaker review.
    pub fn set_speaker_review_needed(&self, id: &str, needed: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE interviews SET speaker_review_needed = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, needed as i64, now()],
        )?;
        Ok(())
    }

    // =========================================================================
    // Evidence
    // =========================================================================

    /// Whether committed evidence already exists for this interview.
    pub fn evidence_exists_for(&self, interview_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM evidence WHERE interview_id = ?1",
            params![interview_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert evidence units in one transaction, skipping duplicates by
    /// independence key. Returns the ids actually inserted.
    pub fn insert_evidence_batch(&self, units: &[EvidenceUnit]) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(units.len());

        for unit in units {
            let changed = tx.execute(
                "INSERT OR IGNORE INTO evidence
                 (id, interview_id, account_id, project_id, verbatim, support, kind_tags,
                  personas, segments, journey_stage, anchors, confidence, independence_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    unit.id,
                    unit.interview_id,
                    unit.account_id,
                    unit.project_id,
                    unit.verbatim,
                    unit.support.as_str(),
                    serde_json::to_string(&unit.kind_tags)?,
                    serde_json::to_string(&unit.personas)?,
                    serde_json::to_string(&unit.segments)?,
                    unit.journey_stage,
                    serde_json::to_string(&unit.anchors)?,
                    unit.confidence.as_str(),
                    unit.independence_key,
                    unit.created_at,
                ],
            )?;
            if changed > 0 {
                inserted.push(unit.id.clone());
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn map_evidence(row: &Row<'_>) -> rusqlite::Result<(EvidenceUnit, String, String, String, String, String, String)> {
        let unit = EvidenceUnit {
            id: row.get(0)?,
            interview_id: row.get(1)?,
            account_id: row.get(2)?,
            project_id: row.get(3)?,
            verbatim: row.get(4)?,
            support: Support::Supports,
            kind_tags: Vec::new(),
            personas: Vec::new(),
            segments: Vec::new(),
            journey_stage: row.get(9)?,
            anchors: Vec::new(),
            confidence: Confidence::Medium,
            independence_key: row.get(12)?,
            created_at: row.get(13)?,
        };
        let support: String = row.get(5)?;
        let kind_tags: String = row.get(6)?;
        let personas: String = row.get(7)?;
        let segments: String = row.get(8)?;
        let anchors: String = row.get(10)?;
        let confidence: String = row.get(11)?;
        Ok((unit, support, kind_tags, personas, segments, anchors, confidence))
    }

    /// All evidence for an interview, oldest first.
    pub fn evidence_for_interview(&self, interview_id: &str) -> Result<Vec<EvidenceUnit>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, interview_id, account_id, project_id, verbatim, support, kind_tags,
                    personas, segments, journey_stage, anchors, confidence, independence_key, created_at
             FROM evidence WHERE interview_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![interview_id], Self::map_evidence)?;

        let mut units = Vec::new();
        for row in rows {
            let (mut unit, support, kind_tags, personas, segments, anchors, confidence) = row?;
            unit.support = Support::normalize(Some(&support));
            unit.kind_tags = serde_json::from_str::<Vec<KindTag>>(&kind_tags)?;
            unit.personas = serde_json::from_str(&personas)?;
            unit.segments = serde_json::from_str(&segments)?;
            unit.anchors = serde_json::from_str(&anchors)?;
            unit.confidence = Confidence::normalize(Some(&confidence));
            units.push(unit);
        }
        Ok(units)
    }

    // =========================================================================
    // People
    // =========================================================================

    /// Insert candidate people and link them to the interview.
    pub fn insert_people(&self, interview_id: &str, people: &[Person]) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(people.len());

        for person in people {
            tx.execute(
                "INSERT INTO people (id, account_id, project_id, name, role, organization, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    person.id,
                    person.account_id,
                    person.project_id,
                    person.name,
                    person.role,
                    person.organization,
                    person.description,
                    person.created_at,
                ],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO interview_people (interview_id, person_id) VALUES (?1, ?2)",
                params![interview_id, person.id],
            )?;
            inserted.push(person.id.clone());
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// People linked to an interview.
    pub fn people_for_interview(&self, interview_id: &str) -> Result<Vec<Person>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.account_id, p.project_id, p.name, p.role, p.organization, p.description, p.created_at
             FROM people p
             JOIN interview_people ip ON ip.person_id = p.id
             WHERE ip.interview_id = ?1
             ORDER BY p.created_at, p.id",
        )?;
        let rows = stmt.query_map(params![interview_id], |row| {
            Ok(Person {
                id: row.get(0)?,
                account_id: row.get(1)?,
                project_id: row.get(2)?,
                name: row.get(3)?,
                role: row.get(4)?,
                organization: row.get(5)?,
                description: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // =========================================================================
    // Insights
    // =========================================================================

    /// Insert insights with their evidence citations in one transaction.
    pub fn insert_insights(
        &self,
        insights: &[(Insight, Vec<String>)],
    ) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(insights.len());

        for (insight, evidence_ids) in insights {
            tx.execute(
                "INSERT INTO insights (id, interview_id, name, details, category, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    insight.id,
                    insight.interview_id,
                    insight.name,
                    insight.details,
                    insight.category,
                    insight.confidence.as_str(),
                    insight.created_at,
                ],
            )?;
            for evidence_id in evidence_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO insight_evidence (insight_id, evidence_id) VALUES (?1, ?2)",
                    params![insight.id, evidence_id],
                )?;
            }
            inserted.push(insight.id.clone());
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Insights for an interview, oldest first.
    pub fn insights_for_interview(&self, interview_id: &str) -> Result<Vec<Insight>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, interview_id, name, details, category, confidence, created_at
             FROM insights WHERE interview_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![interview_id], |row| {
            let confidence: String = row.get(5)?;
            Ok(Insight {
                id: row.get(0)?,
                interview_id: row.get(1)?,
                name: row.get(2)?,
                details: row.get(3)?,
                category: row.get(4)?,
                confidence: Confidence::normalize(Some(&confidence)),
                created_at: row.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Evidence ids cited by an insight.
    pub fn citations_for_insight(&self, insight_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT evidence_id FROM insight_evidence WHERE insight_id = ?1 ORDER BY evidence_id",
        )?;
        let rows = stmt.query_map(params![insight_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // =========================================================================
    // Planned Answers
    // =========================================================================

    /// Create planned answer rows for an interview's project questions.
    /// Idempotent per (interview, question).
    pub fn create_planned_answers(
        &self,
        interview_id: &str,
        project_id: &str,
        questions: &[ResearchQuestion],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut created = 0;

        for question in questions {
            let changed = tx.execute(
                "INSERT OR IGNORE INTO project_answers
                 (id, project_id, interview_id, question_id, question_text, question_category, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'planned')",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    project_id,
                    interview_id,
                    question.id,
                    question.text,
                    question.category,
                ],
            )?;
            created += changed;
        }

        tx.commit()?;
        Ok(created)
    }

    /// Planned answers for an interview.
    pub fn planned_answers_for(&self, interview_id: &str) -> Result<Vec<PlannedAnswer>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, question_id, question_text, question_category, status, evidence_ids
             FROM project_answers WHERE interview_id = ?1 ORDER BY question_id",
        )?;
        let rows = stmt.query_map(params![interview_id], |row| {
            let evidence_ids: String = row.get(5)?;
            Ok((
                PlannedAnswer {
                    id: row.get(0)?,
                    question_id: row.get(1)?,
                    question_text: row.get(2)?,
                    question_category: row.get(3)?,
                    status: row.get(4)?,
                    evidence_ids: Vec::new(),
                },
                evidence_ids,
            ))
        })?;

        let mut answers = Vec::new();
        for row in rows {
            let (mut answer, evidence_ids) = row?;
            answer.evidence_ids = serde_json::from_str(&evidence_ids)?;
            answers.push(answer);
        }
        Ok(answers)
    }

    /// Mark an answer as answered with the evidence backing it.
    pub fn mark_answer_answered(&self, answer_id: &str, evidence_ids: &[String]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE project_answers SET status = 'answered', evidence_ids = ?2, answered_at = ?3
             WHERE id = ?1",
            params![answer_id, serde_json::to_string(evidence_ids)?, now()],
        )?;
        Ok(())
    }

    // =========================================================================
    // Fan-out Bookkeeping
    // =========================================================================

    /// Record one fan-out dispatch.
    pub fn record_fanout_run(
        &self,
        interview_id: &str,
        task_name: &str,
        initiated_by: Option<&str>,
        run_id: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO fanout_runs (id, interview_id, task_name, initiated_by, run_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                interview_id,
                task_name,
                initiated_by,
                run_id,
                now(),
            ],
        )?;
        Ok(())
    }

    /// Recorded fan-out dispatches for an interview.
    pub fn fanout_runs_for(&self, interview_id: &str) -> Result<Vec<FanoutRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, interview_id, task_name, initiated_by, run_id
             FROM fanout_runs WHERE interview_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![interview_id], |row| {
            Ok(FanoutRun {
                id: row.get(0)?,
                interview_id: row.get(1)?,
                task_name: row.get(2)?,
                initiated_by: row.get(3)?,
                run_id: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // =========================================================================
    // Lens Analyses (subscriber-owned)
    // =========================================================================

    /// Upsert the lens analysis row for an interview.
    pub fn upsert_lens_analysis(
        &self,
        interview_id: &str,
        summary: &str,
        evidence_count: u32,
        computed_by: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO lens_analyses (id, interview_id, summary, evidence_count, computed_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(interview_id) DO UPDATE SET
                summary = excluded.summary,
                evidence_count = excluded.evidence_count,
                computed_by = excluded.computed_by",
            params![
                uuid::Uuid::new_v4().to_string(),
                interview_id,
                summary,
                evidence_count,
                computed_by,
                now(),
            ],
        )?;
        Ok(())
    }

    /// Lens analysis for an interview, if one has been computed.
    pub fn lens_analysis_for(&self, interview_id: &str) -> Result<Option<LensAnalysis>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, interview_id, summary, evidence_count, computed_by
             FROM lens_analyses WHERE interview_id = ?1",
            params![interview_id],
            |row| {
                Ok(LensAnalysis {
                    id: row.get(0)?,
                    interview_id: row.get(1)?,
                    summary: row.get(2)?,
                    evidence_count: row.get(3)?,
                    computed_by: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

// =============================================================================
// Tests
// =============================================================================
