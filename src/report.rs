use std::collections::HashMap;
use std::fmt::Write;

use uuid::Uuid;

use crate::models::{Evaluation, Professor, RecentEvaluation, SemesterAverage, Student, StudentAverage};
use crate::rubric::{self, SEMESTERS};
use crate::scoring;

const RECENT_LIMIT: usize = 5;
const TREND_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub total_evaluations: usize,
    pub active_students: usize,
    pub recent: Vec<RecentEvaluation>,
    /// Final scores of the latest evaluations, oldest first.
    pub trend: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSnapshot {
    pub dashboard: DashboardSummary,
    pub by_student: Vec<StudentAverage>,
    pub by_semester: Vec<SemesterAverage>,
}

fn newest_first(evaluations: &[Evaluation]) -> Vec<&Evaluation> {
    let mut sorted: Vec<&Evaluation> = evaluations.iter().collect();
    // ISO-8601 UTC strings order the same way as the instants they encode.
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    sorted
}

pub fn dashboard(students: &[Student], evaluations: &[Evaluation]) -> DashboardSummary {
    let names: HashMap<Uuid, &str> = students.iter().map(|s| (s.id, s.name.as_str())).collect();
    let sorted = newest_first(evaluations);

    let recent = sorted
        .iter()
        .take(RECENT_LIMIT)
        .map(|evaluation| RecentEvaluation {
            student_name: names
                .get(&evaluation.student_id)
                .copied()
                .unwrap_or("N/A")
                .to_string(),
            semester: evaluation.semester.clone(),
            final_score: evaluation.final_score,
            date: evaluation.date.clone(),
        })
        .collect();

    let trend = sorted
        .iter()
        .take(TREND_LIMIT)
        .rev()
        .map(|evaluation| evaluation.final_score)
        .collect();

    DashboardSummary {
        total_evaluations: evaluations.len(),
        active_students: students.len(),
        recent,
        trend,
    }
}

/// First name plus first surname.
pub fn student_label(name: &str) -> String {
    name.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}

/// Average final score per student, in roster order. Students with no
/// evaluations, or whose evaluations all scored zero, are left out.
pub fn student_averages(students: &[Student], evaluations: &[Evaluation]) -> Vec<StudentAverage> {
    let mut scores: HashMap<Uuid, Vec<f64>> = HashMap::new();
    for evaluation in evaluations {
        scores
            .entry(evaluation.student_id)
            .or_default()
            .push(evaluation.final_score);
    }

    students
        .iter()
        .filter_map(|student| {
            let values = scores.get(&student.id)?;
            Some(StudentAverage {
                label: student_label(&student.name),
                average: scoring::average(values.iter().copied()),
                evaluation_count: values.len(),
            })
        })
        .filter(|row| row.average > 0.0)
        .collect()
}

/// Average final score per semester, in curriculum order. Unrecognised
/// semester labels follow alphabetically.
pub fn semester_averages(evaluations: &[Evaluation]) -> Vec<SemesterAverage> {
    let mut scores: HashMap<&str, Vec<f64>> = HashMap::new();
    for evaluation in evaluations {
        scores
            .entry(evaluation.semester.as_str())
            .or_default()
            .push(evaluation.final_score);
    }

    let mut semesters: Vec<&str> = scores.keys().copied().collect();
    semesters.sort_by_key(|semester| {
        let position = SEMESTERS.iter().position(|known| known == semester);
        (position.unwrap_or(SEMESTERS.len()), *semester)
    });

    semesters
        .into_iter()
        .map(|semester| {
            let values = &scores[semester];
            SemesterAverage {
                semester: semester.to_string(),
                label: rubric::short_label(semester),
                average: scoring::average(values.iter().copied()),
                evaluation_count: values.len(),
            }
        })
        .collect()
}

pub fn snapshot(students: &[Student], evaluations: &[Evaluation]) -> ReportSnapshot {
    ReportSnapshot {
        dashboard: dashboard(students, evaluations),
        by_student: student_averages(students, evaluations),
        by_semester: semester_averages(evaluations),
    }
}

/// Joins the students and evaluations streams. Each update recomputes the
/// whole snapshot from the latest value of both, so interleaving is harmless.
#[derive(Debug, Default)]
pub struct LiveReport {
    students: Option<Vec<Student>>,
    evaluations: Option<Vec<Evaluation>>,
}

impl LiveReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_students(&mut self, students: Vec<Student>) -> Option<ReportSnapshot> {
        self.students = Some(students);
        self.current()
    }

    pub fn apply_evaluations(&mut self, evaluations: Vec<Evaluation>) -> Option<ReportSnapshot> {
        self.evaluations = Some(evaluations);
        self.current()
    }

    /// `None` until both streams have delivered their first snapshot.
    pub fn current(&self) -> Option<ReportSnapshot> {
        match (&self.students, &self.evaluations) {
            (Some(students), Some(evaluations)) => Some(snapshot(students, evaluations)),
            _ => None,
        }
    }
}

pub fn render_dashboard(professor: &Professor, summary: &DashboardSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Welcome back, {}!", professor.first_name());
    let _ = writeln!(output);
    let _ = writeln!(output, "Total evaluations: {}", summary.total_evaluations);
    let _ = writeln!(output, "Active students: {}", summary.active_students);
    let _ = writeln!(output);
    let _ = writeln!(output, "Recent evaluations:");

    if summary.recent.is_empty() {
        let _ = writeln!(output, "  (none yet)");
    } else {
        for recent in &summary.recent {
            let _ = writeln!(
                output,
                "  {:.1}  {} ({}) {}",
                recent.final_score, recent.student_name, recent.semester, recent.date
            );
        }
    }

    if !summary.trend.is_empty() {
        let trend = summary
            .trend
            .iter()
            .map(|score| format!("{score:.2}"))
            .collect::<Vec<_>>()
            .join(" → ");
        let _ = writeln!(output);
        let _ = writeln!(output, "Trend: {trend}");
    }

    output
}

pub fn build_report(snapshot: &ReportSnapshot, generated_at: &str) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Seminar Evaluation Report");
    let _ = writeln!(
        output,
        "Generated {} ({} evaluations, {} students)",
        generated_at, snapshot.dashboard.total_evaluations, snapshot.dashboard.active_students
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Average Score by Student");

    if snapshot.by_student.is_empty() {
        let _ = writeln!(output, "No evaluations recorded yet.");
    } else {
        for row in &snapshot.by_student {
            let _ = writeln!(
                output,
                "- {}: {:.2} across {} evaluations",
                row.label, row.average, row.evaluation_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Average Score by Semester");

    if snapshot.by_semester.is_empty() {
        let _ = writeln!(output, "No evaluations recorded yet.");
    } else {
        for row in &snapshot.by_semester {
            let _ = writeln!(
                output,
                "- {} ({}): {:.2} across {} evaluations",
                row.semester, row.label, row.average, row.evaluation_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Evaluations");

    if snapshot.dashboard.recent.is_empty() {
        let _ = writeln!(output, "No evaluations recorded yet.");
    } else {
        for recent in &snapshot.dashboard.recent {
            let _ = writeln!(
                output,
                "- {} ({}) on {}: {:.1}",
                recent.student_name, recent.semester, recent.date, recent.final_score
            );
        }
    }

    output
}
