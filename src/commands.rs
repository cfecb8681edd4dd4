use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, EvaluationOrder, PgStore};
use crate::error::{BootstrapError, GatewayError};
use crate::feedback::{FeedbackGenerator, GeminiClient, TextGenerator};
use crate::gateway::{provision_professor, ProfileStore};
use crate::identity::{IdentityProvider, PgIdentityProvider};
use crate::models::{Evaluation, EvaluationDraft, EvaluationScore, Role, Student};
use crate::report::{self, LiveReport};
use crate::routes::{self, View};
use crate::rubric;
use crate::scoring;
use crate::session::{Session, SessionGuard, SessionState, SETTLE_TIMEOUT};
use crate::validation;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Email and password of the acting professor.
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub struct App {
    store: PgStore,
    identity: Arc<PgIdentityProvider>,
    guard: SessionGuard,
    feedback: FeedbackGenerator,
}

impl App {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        let store = PgStore::new(pool.clone());
        let identity = Arc::new(PgIdentityProvider::new(pool));
        let profiles: Arc<dyn ProfileStore> = Arc::new(store.clone());
        let guard = SessionGuard::new(identity.clone(), profiles);

        let generator = config.gemini.as_ref().map(|gemini| {
            Arc::new(GeminiClient::new(
                gemini.api_key.clone(),
                gemini.model.clone(),
                gemini.base_url.clone(),
            )) as Arc<dyn TextGenerator>
        });

        Self {
            store,
            identity,
            guard,
            feedback: FeedbackGenerator::new(generator),
        }
    }

    pub fn store(&self) -> &PgStore {
        &self.store
    }

    /// Runs initialisation, retrying up to `retries` times while the
    /// backend is unreachable.
    pub async fn start(&mut self, retries: u32) -> anyhow::Result<SessionState> {
        self.guard.initialize().await;
        let mut state = self.guard.settled(SETTLE_TIMEOUT).await?;

        let mut attempt = 0;
        while let SessionState::ServiceUnavailable { reason } = &state {
            if attempt >= retries {
                break;
            }
            attempt += 1;
            tracing::warn!(attempt, %reason, "backend unavailable, retrying");
            tokio::time::sleep(RETRY_DELAY).await;
            self.guard.retry().await?;
            state = self.guard.settled(SETTLE_TIMEOUT).await?;
        }
        Ok(state)
    }

    /// Starts the session, signs in and decides which view to show.
    async fn open(&mut self, credentials: &Credentials, requested: View) -> anyhow::Result<(Session, View)> {
        match self.start(0).await? {
            SessionState::FirstRunSetup => {
                bail!("no administrator exists yet; run `seminar-evals setup` first")
            }
            SessionState::ServiceUnavailable { reason } => {
                bail!("service unavailable: {reason}. Check the connection and try again")
            }
            _ => {}
        }

        validation::require("email", &credentials.email)?;
        validation::require("password", &credentials.password)?;
        let session = self
            .guard
            .login(&credentials.email, &credentials.password, SETTLE_TIMEOUT)
            .await?;
        tracing::info!(professor_id = %session.professor.id, admin = session.is_admin(), "session ready");

        let view = routes::resolve(&self.guard.state(), requested);
        if view != requested {
            eprintln!(
                "{} access requires an administrator; showing the dashboard instead.",
                view_name(requested)
            );
        }
        Ok((session, view))
    }

    async fn close(&self) {
        if let Err(err) = self.guard.logout().await {
            tracing::warn!(error = %err, "sign-out failed");
        }
    }

    async fn run_view<F, Fut>(&mut self, credentials: &Credentials, requested: View, body: F) -> anyhow::Result<()>
    where
        F: FnOnce(ViewContext) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        let (session, view) = self.open(credentials, requested).await?;
        let result = if view == requested {
            body(ViewContext {
                session,
                store: self.store.clone(),
                identity: self.identity.clone(),
            })
            .await
        } else {
            show_dashboard(&self.store, &session).await
        };
        self.close().await;
        result
    }
}

/// What an authorised view gets to work with.
struct ViewContext {
    session: Session,
    store: PgStore,
    identity: Arc<PgIdentityProvider>,
}

fn view_name(view: View) -> &'static str {
    match view {
        View::Students => "Student roster",
        View::Professors => "Professor roster",
        View::Reports => "Reports",
        View::Evaluate => "Evaluation",
        View::Settings => "Settings",
        _ => "This view",
    }
}

pub async fn status(app: &mut App, retries: u32) -> anyhow::Result<()> {
    let state = app.start(retries).await?;
    match &state {
        SessionState::ServiceUnavailable { reason } => {
            println!("Service unavailable: {reason}");
            println!("Run `seminar-evals status --retries N` to try again.");
        }
        SessionState::FirstRunSetup => {
            println!("First run: no administrator exists. Run `seminar-evals setup`.");
        }
        other => println!("Session state: {}", other.label()),
    }
    Ok(())
}

pub async fn setup(app: &mut App, name: &str, email: &str, password: &str, confirm: &str) -> anyhow::Result<()> {
    validation::new_account(name, email, password)?;
    validation::password_change(password, confirm)?;

    let state = app.start(0).await?;
    if let SessionState::ServiceUnavailable { reason } = state {
        bail!("service unavailable: {reason}");
    }

    match app.guard.bootstrap_admin(name, email, password).await {
        Ok(admin) => {
            println!("Administrator {} <{}> created. You can now sign in.", admin.name, admin.email);
            Ok(())
        }
        Err(BootstrapError::OrphanedAccount { email }) => {
            println!("An identity account for {email} already exists but has no profile.");
            println!("This is left over from an earlier setup attempt that did not finish.");
            println!("Remove the row for {email} from the accounts table, then run setup again.");
            Err(BootstrapError::OrphanedAccount { email }.into())
        }
        Err(err) => Err(err.into()),
    }
}

pub fn print_rubric(semester: Option<&str>) -> anyhow::Result<()> {
    let semesters: Vec<&str> = match semester {
        Some(semester) if rubric::is_known_semester(semester) => vec![semester],
        Some(semester) => bail!("unknown semester '{semester}'"),
        None => rubric::SEMESTERS.to_vec(),
    };

    for semester in semesters {
        println!("{semester}");
        for criterion in rubric::criteria_for(semester) {
            println!(
                "  {:<5} {:>5.1}%  {} ({})",
                criterion.id, criterion.weight, criterion.name, criterion.description
            );
        }
    }
    Ok(())
}

async fn show_dashboard(store: &PgStore, session: &Session) -> anyhow::Result<()> {
    let students = store.fetch_students().await?;
    let evaluations = store.fetch_evaluations(EvaluationOrder::NewestFirst).await?;
    let summary = report::dashboard(&students, &evaluations);
    print!("{}", report::render_dashboard(&session.professor, &summary));
    Ok(())
}

pub async fn dashboard(app: &mut App, credentials: &Credentials) -> anyhow::Result<()> {
    app.run_view(credentials, View::Dashboard, |ctx| async move {
        show_dashboard(&ctx.store, &ctx.session).await
    })
    .await
}

pub async fn reports(app: &mut App, credentials: &Credentials, out: Option<&Path>) -> anyhow::Result<()> {
    app.run_view(credentials, View::Reports, |ctx| async move {
        let students = ctx.store.fetch_students().await?;
        let evaluations = ctx.store.fetch_evaluations(EvaluationOrder::Chronological).await?;
        let snapshot = report::snapshot(&students, &evaluations);
        let generated_at = db::iso_timestamp(chrono::Utc::now());
        let output = report::build_report(&snapshot, &generated_at);

        match out {
            Some(path) => {
                std::fs::write(path, output)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Report written to {}.", path.display());
            }
            None => print!("{output}"),
        }
        Ok(())
    })
    .await
}

enum LiveUpdate {
    Students(Vec<Student>),
    Evaluations(Vec<Evaluation>),
    Failed(GatewayError),
}

/// Keeps both subscriptions open and reprints the dashboard on every change.
pub async fn watch(app: &mut App, credentials: &Credentials) -> anyhow::Result<()> {
    let mut session_state = app.guard.watch();

    app.run_view(credentials, View::Dashboard, |ctx| async move {
        let (tx, mut updates) = mpsc::unbounded_channel();

        let students_tx = tx.clone();
        let students_err = tx.clone();
        let students = ctx.store.subscribe_students(
            Box::new(move |rows| {
                let _ = students_tx.send(LiveUpdate::Students(rows));
            }),
            Box::new(move |err| {
                let _ = students_err.send(LiveUpdate::Failed(err));
            }),
        );

        let evaluations_tx = tx.clone();
        let evaluations = ctx.store.subscribe_evaluations(
            EvaluationOrder::NewestFirst,
            Box::new(move |rows| {
                let _ = evaluations_tx.send(LiveUpdate::Evaluations(rows));
            }),
            Box::new(move |err| {
                let _ = tx.send(LiveUpdate::Failed(err));
            }),
        );

        println!("Watching for changes, press Ctrl-C to stop.");
        let mut live = LiveReport::new();
        let result = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break Ok(()),
                changed = session_state.changed() => {
                    if changed.is_err() || session_state.borrow_and_update().session().is_none() {
                        break Err(anyhow::anyhow!("session ended"));
                    }
                }
                update = updates.recv() => {
                    let snapshot = match update {
                        Some(LiveUpdate::Students(rows)) => live.apply_students(rows),
                        Some(LiveUpdate::Evaluations(rows)) => live.apply_evaluations(rows),
                        Some(LiveUpdate::Failed(err)) => break Err(err.into()),
                        None => break Ok(()),
                    };
                    if let Some(snapshot) = snapshot {
                        println!();
                        print!("{}", report::render_dashboard(&ctx.session.professor, &snapshot.dashboard));
                    }
                }
            }
        };

        students.unsubscribe();
        evaluations.unsubscribe();
        result
    })
    .await
}

pub struct EvaluationInput {
    pub student_id: Uuid,
    pub semester: String,
    pub scores: Vec<EvaluationScore>,
}

async fn prepare_draft(store: &PgStore, input: EvaluationInput) -> anyhow::Result<(Student, EvaluationDraft)> {
    let criteria = validation::evaluation(&input.semester, &input.scores)?;
    let student = store
        .fetch_students()
        .await?
        .into_iter()
        .find(|student| student.id == input.student_id)
        .with_context(|| format!("no student with id {}", input.student_id))?;

    let final_score = scoring::compute_final_score(&input.scores, criteria);
    Ok((
        student,
        EvaluationDraft {
            student_id: input.student_id,
            semester: input.semester,
            scores: input.scores,
            final_score,
        },
    ))
}

pub async fn evaluate(
    app: &mut App,
    credentials: &Credentials,
    input: EvaluationInput,
    with_feedback: bool,
) -> anyhow::Result<()> {
    let (session, view) = app.open(credentials, View::Evaluate).await?;
    let result = async {
        if view != View::Evaluate {
            return show_dashboard(&app.store, &session).await;
        }
        let (student, draft) = prepare_draft(&app.store, input).await?;
        let criteria = rubric::criteria_for(&draft.semester);
        let saved = app
            .store
            .create_evaluation(&draft.clone().into_new_evaluation(session.professor.id))
            .await?;
        println!(
            "Saved evaluation {} for {} ({}): final score {:.2}",
            saved.id, student.name, saved.semester, saved.final_score
        );

        if with_feedback {
            let outcome = app.feedback.generate(&student, &draft, criteria).await;
            println!();
            println!("{}", outcome.into_display());
        }
        Ok(())
    }
    .await;
    app.close().await;
    result
}

pub async fn feedback(app: &mut App, credentials: &Credentials, input: EvaluationInput) -> anyhow::Result<()> {
    let (session, view) = app.open(credentials, View::Evaluate).await?;
    let result = async {
        if view != View::Evaluate {
            return show_dashboard(&app.store, &session).await;
        }
        let (student, draft) = prepare_draft(&app.store, input).await?;
        println!("Final score: {:.2}", draft.final_score);
        let outcome = app
            .feedback
            .generate(&student, &draft, rubric::criteria_for(&draft.semester))
            .await;
        println!();
        println!("{}", outcome.into_display());
        Ok(())
    }
    .await;
    app.close().await;
    result
}

pub async fn list_students(app: &mut App, credentials: &Credentials) -> anyhow::Result<()> {
    app.run_view(credentials, View::Students, |ctx| async move {
        let students = ctx.store.fetch_students().await?;
        if students.is_empty() {
            println!("No students registered.");
        }
        for student in students {
            println!("{}  {:<14} {}", student.id, student.matricula, student.name);
        }
        Ok(())
    })
    .await
}

pub async fn add_student(app: &mut App, credentials: &Credentials, name: &str, matricula: &str) -> anyhow::Result<()> {
    validation::require("name", name)?;
    validation::require("matricula", matricula)?;
    app.run_view(credentials, View::Students, |ctx| async move {
        let student = ctx.store.create_student(name, matricula).await?;
        println!("Added {} ({}) as {}.", student.name, student.matricula, student.id);
        Ok(())
    })
    .await
}

pub async fn import_students(app: &mut App, credentials: &Credentials, csv: &Path) -> anyhow::Result<()> {
    app.run_view(credentials, View::Students, |ctx| async move {
        let inserted = ctx.store.import_students_csv(csv).await?;
        println!("Inserted {inserted} students from {}.", csv.display());
        Ok(())
    })
    .await
}

pub async fn list_professors(app: &mut App, credentials: &Credentials) -> anyhow::Result<()> {
    app.run_view(credentials, View::Professors, |ctx| async move {
        for professor in ctx.store.list_professors().await? {
            println!(
                "{}  {:<9} {} <{}>",
                professor.id, professor.role, professor.name, professor.email
            );
        }
        Ok(())
    })
    .await
}

pub async fn add_professor(
    app: &mut App,
    credentials: &Credentials,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> anyhow::Result<()> {
    validation::new_account(name, email, password)?;
    app.run_view(credentials, View::Professors, |ctx| async move {
        let professor = provision_professor(ctx.identity.as_ref(), &ctx.store, name, email, password, role).await?;
        println!("Created {} <{}> with role {}.", professor.name, professor.email, professor.role);
        Ok(())
    })
    .await
}

pub async fn rename(app: &mut App, credentials: &Credentials, name: &str) -> anyhow::Result<()> {
    validation::require("name", name)?;
    app.run_view(credentials, View::Settings, |ctx| async move {
        ctx.store
            .update_profile_name(ctx.session.professor.id, name)
            .await?;
        println!("Name updated to {}.", name.trim());
        Ok(())
    })
    .await
}

pub async fn change_password(
    app: &mut App,
    credentials: &Credentials,
    new_password: &str,
    confirm: &str,
) -> anyhow::Result<()> {
    validation::password_change(new_password, confirm)?;
    app.run_view(credentials, View::Settings, |ctx| async move {
        ctx.identity.update_password(new_password).await?;
        println!("Password updated.");
        Ok(())
    })
    .await
}
