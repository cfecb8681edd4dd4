use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod commands;
mod config;
mod db;
mod error;
mod feedback;
mod gateway;
mod identity;
mod logging;
mod models;
mod report;
mod routes;
mod rubric;
mod scoring;
mod session;
mod subscription;
#[cfg(test)]
mod testing;
mod validation;

use commands::{App, Credentials, EvaluationInput};
use models::{EvaluationScore, Role};

#[derive(Parser)]
#[command(name = "seminar-evals")]
#[command(about = "Seminar presentation evaluations for graduate programs", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Log level or full filter directive (overrides --verbose)
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long, env = "SEMINAR_EMAIL")]
    email: String,
    #[arg(long, env = "SEMINAR_PASSWORD", hide_env_values = true)]
    password: String,
}

impl From<LoginArgs> for Credentials {
    fn from(args: LoginArgs) -> Self {
        Credentials {
            email: args.email,
            password: args.password,
        }
    }
}

#[derive(Args)]
struct EvaluationArgs {
    #[arg(long)]
    student: Uuid,
    #[arg(long)]
    semester: String,
    /// Criterion score as CRITERION=SCORE, repeatable
    #[arg(long = "score", value_parser = validation::parse_score, required = true)]
    scores: Vec<EvaluationScore>,
}

impl From<EvaluationArgs> for EvaluationInput {
    fn from(args: EvaluationArgs) -> Self {
        EvaluationInput {
            student_id: args.student,
            semester: args.semester,
            scores: args.scores,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo students
    Seed,
    /// Run session initialisation and print the resulting state
    Status {
        /// Retries while the backend is unreachable
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// Create the first administrator
    Setup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm: String,
    },
    /// Print the evaluation rubric
    Rubric {
        #[arg(long)]
        semester: Option<String>,
    },
    /// Totals, recent evaluations and score trend
    Dashboard {
        #[command(flatten)]
        login: LoginArgs,
    },
    /// Average scores per student and semester as markdown
    Reports {
        #[command(flatten)]
        login: LoginArgs,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Reprint the dashboard whenever students or evaluations change
    Watch {
        #[command(flatten)]
        login: LoginArgs,
    },
    /// Score a seminar presentation and save it
    Evaluate {
        #[command(flatten)]
        login: LoginArgs,
        #[command(flatten)]
        evaluation: EvaluationArgs,
        /// Also request written feedback
        #[arg(long)]
        feedback: bool,
    },
    /// Request written feedback without saving
    Feedback {
        #[command(flatten)]
        login: LoginArgs,
        #[command(flatten)]
        evaluation: EvaluationArgs,
    },
    /// Manage the student roster (administrators)
    Students {
        #[command(flatten)]
        login: LoginArgs,
        #[command(subcommand)]
        action: StudentAction,
    },
    /// Manage professor accounts (administrators)
    Professors {
        #[command(flatten)]
        login: LoginArgs,
        #[command(subcommand)]
        action: ProfessorAction,
    },
    /// Update your own profile
    Settings {
        #[command(flatten)]
        login: LoginArgs,
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum StudentAction {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        matricula: String,
    },
    /// Import students from a CSV with name,matricula columns
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProfessorAction {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long = "new-email")]
        email: String,
        #[arg(long = "new-password")]
        password: String,
        #[arg(long, default_value_t = Role::Professor)]
        role: Role,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Name {
        #[arg(long)]
        name: String,
    },
    Password {
        #[arg(long = "new-password")]
        new_password: String,
        #[arg(long)]
        confirm: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_level.as_deref(), cli.log_json)?;

    if let Commands::Rubric { semester } = &cli.command {
        return commands::print_rubric(semester.as_deref());
    }

    let config = config::Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let mut app = App::new(pool.clone(), &config);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = app.store().seed().await?;
            println!("Seed data inserted ({inserted} new students).");
        }
        Commands::Status { retries } => commands::status(&mut app, retries).await?,
        Commands::Setup {
            name,
            email,
            password,
            confirm,
        } => commands::setup(&mut app, &name, &email, &password, &confirm).await?,
        Commands::Rubric { .. } => {}
        Commands::Dashboard { login } => commands::dashboard(&mut app, &Credentials::from(login)).await?,
        Commands::Reports { login, out } => {
            commands::reports(&mut app, &Credentials::from(login), out.as_deref()).await?
        }
        Commands::Watch { login } => commands::watch(&mut app, &Credentials::from(login)).await?,
        Commands::Evaluate {
            login,
            evaluation,
            feedback,
        } => commands::evaluate(&mut app, &Credentials::from(login), EvaluationInput::from(evaluation), feedback).await?,
        Commands::Feedback { login, evaluation } => {
            commands::feedback(&mut app, &Credentials::from(login), EvaluationInput::from(evaluation)).await?
        }
        Commands::Students { login, action } => {
            let credentials = Credentials::from(login);
            match action {
                StudentAction::List => commands::list_students(&mut app, &credentials).await?,
                StudentAction::Add { name, matricula } => {
                    commands::add_student(&mut app, &credentials, &name, &matricula).await?
                }
                StudentAction::Import { csv } => {
                    commands::import_students(&mut app, &credentials, &csv).await?
                }
            }
        }
        Commands::Professors { login, action } => {
            let credentials = Credentials::from(login);
            match action {
                ProfessorAction::List => commands::list_professors(&mut app, &credentials).await?,
                ProfessorAction::Add {
                    name,
                    email,
                    password,
                    role,
                } => {
                    commands::add_professor(&mut app, &credentials, &name, &email, &password, role)
                        .await?
                }
            }
        }
        Commands::Settings { login, action } => {
            let credentials = Credentials::from(login);
            match action {
                SettingsAction::Name { name } => {
                    commands::rename(&mut app, &credentials, &name).await?
                }
                SettingsAction::Password {
                    new_password,
                    confirm,
                } => commands::change_password(&mut app, &credentials, &new_password, &confirm).await?,
            }
        }
    }

    Ok(())
}
