use std::future::Future;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::postgres::{PgListener, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::ProfileStore;
use crate::models::{Evaluation, EvaluationScore, NewEvaluation, Professor, Role, Student};
use crate::subscription::{DataCallback, ErrorCallback, Subscription};

const USERS_CHANNEL: &str = "users_changed";
const STUDENTS_CHANNEL: &str = "students_changed";
const EVALUATIONS_CHANNEL: &str = "evaluations_changed";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Store timestamps leave the gateway as `YYYY-MM-DDTHH:MM:SS.sssZ`.
pub fn iso_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOrder {
    Chronological,
    NewestFirst,
}

/// Postgres-backed persistence gateway for profiles, students and evaluations.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_student(&self, name: &str, matricula: &str) -> Result<Student, GatewayError> {
        let name = name.trim();
        let matricula = matricula.trim();
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO students (name, matricula)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(matricula)
        .fetch_one(&self.pool)
        .await?
        .get("id");

        tracing::info!(student_id = %id, "student created");
        Ok(Student {
            id,
            name: name.to_string(),
            matricula: matricula.to_string(),
        })
    }

    /// Appends an evaluation; `date` comes from the database clock.
    pub async fn create_evaluation(&self, new: &NewEvaluation) -> Result<Evaluation, GatewayError> {
        let row = sqlx::query(
            r#"
            INSERT INTO evaluations (student_id, professor_id, semester, scores, final_score)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, date
            "#,
        )
        .bind(new.student_id)
        .bind(new.professor_id)
        .bind(&new.semester)
        .bind(Json(&new.scores))
        .bind(new.final_score)
        .fetch_one(&self.pool)
        .await?;

        let id: Uuid = row.get("id");
        let date: DateTime<Utc> = row.get("date");
        tracing::info!(
            evaluation_id = %id,
            student_id = %new.student_id,
            final_score = new.final_score,
            "evaluation saved"
        );
        Ok(Evaluation {
            id,
            student_id: new.student_id,
            professor_id: new.professor_id,
            semester: new.semester.clone(),
            date: iso_timestamp(date),
            scores: new.scores.clone(),
            final_score: new.final_score,
        })
    }

    pub async fn fetch_students(&self) -> Result<Vec<Student>, GatewayError> {
        fetch_students(self.pool.clone()).await
    }

    pub async fn fetch_evaluations(&self, order: EvaluationOrder) -> Result<Vec<Evaluation>, GatewayError> {
        fetch_evaluations(self.pool.clone(), order).await
    }

    pub async fn list_professors(&self) -> Result<Vec<Professor>, GatewayError> {
        let rows = sqlx::query("SELECT id, name, email, role FROM users ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(professor_from_row).collect()
    }

    /// Full student list ordered by name, re-sent on every change.
    pub fn subscribe_students(
        &self,
        on_data: DataCallback<Vec<Student>>,
        on_error: ErrorCallback,
    ) -> Subscription {
        live_query(
            self.pool.clone(),
            STUDENTS_CHANNEL,
            None,
            fetch_students,
            on_data,
            on_error,
        )
    }

    pub fn subscribe_evaluations(
        &self,
        order: EvaluationOrder,
        on_data: DataCallback<Vec<Evaluation>>,
        on_error: ErrorCallback,
    ) -> Subscription {
        live_query(
            self.pool.clone(),
            EVALUATIONS_CHANNEL,
            None,
            move |pool| fetch_evaluations(pool, order),
            on_data,
            on_error,
        )
    }

    /// Inserts a small demo roster. Students whose matricula exists are skipped.
    pub async fn seed(&self) -> anyhow::Result<usize> {
        let students = vec![
            ("Valeria Gómez Herrera", "MIC-2024-001"),
            ("Diego Martínez Salas", "MIC-2024-002"),
            ("Camila Torres Ruiz", "MIC-2023-014"),
            ("Andrés Fuentes Rivas", "MIC-2023-021"),
        ];

        let mut inserted = 0usize;
        for (name, matricula) in students {
            if self.insert_student_if_new(name, matricula).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Bulk roster import from a CSV with `name,matricula` columns.
    pub async fn import_students_csv(&self, csv_path: &Path) -> anyhow::Result<usize> {
        let mut inserted = 0usize;
        for row in read_students_csv(csv_path)? {
            if self.insert_student_if_new(&row.name, &row.matricula).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_student_if_new(&self, name: &str, matricula: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO students (name, matricula)
            SELECT $1, $2
            WHERE NOT EXISTS (SELECT 1 FROM students WHERE matricula = $2)
            "#,
        )
        .bind(name.trim())
        .bind(matricula.trim())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert student {matricula}"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn has_any_profile(&self) -> Result<bool, GatewayError> {
        let exists: bool = sqlx::query("SELECT EXISTS (SELECT 1 FROM users LIMIT 1) AS present")
            .fetch_one(&self.pool)
            .await?
            .get("present");
        Ok(exists)
    }

    async fn insert_profile(&self, profile: &Professor) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, role)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(profile.id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(profile.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_profile_name(&self, id: Uuid, name: &str) -> Result<(), GatewayError> {
        let result = sqlx::query("UPDATE users SET name = $1 WHERE id = $2")
            .bind(name.trim())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("profile {id}")));
        }
        tracing::info!(professor_id = %id, "profile name updated");
        Ok(())
    }

    fn subscribe_profile(
        &self,
        id: Uuid,
        on_data: DataCallback<Option<Professor>>,
        on_error: ErrorCallback,
    ) -> Subscription {
        live_query(
            self.pool.clone(),
            USERS_CHANNEL,
            Some(id.to_string()),
            move |pool| fetch_profile(pool, id),
            on_data,
            on_error,
        )
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct StudentCsvRow {
    pub name: String,
    pub matricula: String,
}

/// Reads roster rows, skipping records with an empty name or matricula.
pub fn read_students_csv(csv_path: &Path) -> anyhow::Result<Vec<StudentCsvRow>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut rows = Vec::new();

    for (line, result) in reader.deserialize::<StudentCsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", line + 1))?;
        if row.name.trim().is_empty() || row.matricula.trim().is_empty() {
            tracing::warn!(record = line + 1, "skipping CSV record with empty fields");
            continue;
        }
        rows.push(row);
    }

    Ok(rows)
}

async fn fetch_students(pool: PgPool) -> Result<Vec<Student>, GatewayError> {
    let rows = sqlx::query("SELECT id, name, matricula FROM students ORDER BY name, id")
        .fetch_all(&pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| Student {
            id: row.get("id"),
            name: row.get("name"),
            matricula: row.get("matricula"),
        })
        .collect())
}

async fn fetch_evaluations(pool: PgPool, order: EvaluationOrder) -> Result<Vec<Evaluation>, GatewayError> {
    let query = match order {
        EvaluationOrder::Chronological => {
            "SELECT id, student_id, professor_id, semester, date, scores, final_score \
             FROM evaluations ORDER BY date ASC, id"
        }
        EvaluationOrder::NewestFirst => {
            "SELECT id, student_id, professor_id, semester, date, scores, final_score \
             FROM evaluations ORDER BY date DESC, id"
        }
    };
    let rows = sqlx::query(query).fetch_all(&pool).await?;
    rows.iter().map(evaluation_from_row).collect()
}

async fn fetch_profile(pool: PgPool, id: Uuid) -> Result<Option<Professor>, GatewayError> {
    let row = sqlx::query("SELECT id, name, email, role FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?;
    row.as_ref().map(professor_from_row).transpose()
}

fn professor_from_row(row: &PgRow) -> Result<Professor, GatewayError> {
    let role: String = row.try_get("role")?;
    Ok(Professor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: role.parse::<Role>().map_err(GatewayError::Backend)?,
    })
}

fn evaluation_from_row(row: &PgRow) -> Result<Evaluation, GatewayError> {
    let date: DateTime<Utc> = row.try_get("date")?;
    let Json(scores): Json<Vec<EvaluationScore>> = row.try_get("scores")?;
    Ok(Evaluation {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        professor_id: row.try_get("professor_id")?,
        semester: row.try_get("semester")?,
        date: iso_timestamp(date),
        scores,
        final_score: row.try_get("final_score")?,
    })
}

/// What a change feed reports while a live query waits.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Notified(String),
    /// The connection dropped and was re-established. Notifications sent in
    /// between are gone.
    Reconnected,
}

#[async_trait]
trait ChangeFeed: Send {
    async fn next_change(&mut self) -> Result<Change, GatewayError>;
}

#[async_trait]
impl ChangeFeed for PgListener {
    async fn next_change(&mut self) -> Result<Change, GatewayError> {
        match self.try_recv().await? {
            Some(notification) => Ok(Change::Notified(notification.payload().to_string())),
            None => Ok(Change::Reconnected),
        }
    }
}

/// Runs `fetch` once, then again after every notification on `channel`
/// (optionally only those carrying `payload`) and after every reconnect,
/// pushing each full result. The first failure is reported through
/// `on_error` and ends the subscription.
fn live_query<T, F, Fut>(
    pool: PgPool,
    channel: &'static str,
    payload: Option<String>,
    fetch: F,
    on_data: DataCallback<T>,
    on_error: ErrorCallback,
) -> Subscription
where
    T: Send + 'static,
    F: Fn(PgPool) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
{
    Subscription::spawn(async move {
        // Listen before the first read so no change between the two is lost.
        let listener = match listen(&pool, channel).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(channel, error = %err, "live query could not listen");
                on_error(err);
                return;
            }
        };
        let refetch = move || fetch(pool.clone());
        follow_changes(listener, channel, payload, refetch, on_data, on_error).await;
    })
}

async fn listen(pool: &PgPool, channel: &str) -> Result<PgListener, GatewayError> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(channel).await?;
    Ok(listener)
}

async fn follow_changes<T, C, F, Fut>(
    mut feed: C,
    channel: &'static str,
    payload: Option<String>,
    fetch: F,
    mut on_data: DataCallback<T>,
    on_error: ErrorCallback,
) where
    C: ChangeFeed,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let streamed = stream_snapshots(&mut feed, channel, payload.as_deref(), &fetch, &mut on_data).await;
    if let Err(err) = streamed {
        tracing::warn!(channel, error = %err, "live query stopped");
        on_error(err);
    }
}

async fn stream_snapshots<T, C, F, Fut>(
    feed: &mut C,
    channel: &'static str,
    payload: Option<&str>,
    fetch: &F,
    on_data: &mut DataCallback<T>,
) -> Result<(), GatewayError>
where
    C: ChangeFeed,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    on_data(fetch().await?);

    loop {
        match feed.next_change().await? {
            Change::Notified(received) => {
                if payload.is_some_and(|wanted| wanted != received) {
                    continue;
                }
                tracing::trace!(channel, payload = %received, "change notification");
            }
            Change::Reconnected => {
                tracing::debug!(channel, "listener reconnected, refreshing snapshot");
            }
        }
        on_data(fetch().await?);
    }
}
