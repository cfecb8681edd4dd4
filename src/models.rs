use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub matricula: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Professor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Professor => "professor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Role::Admin),
            "professor" => Ok(Role::Professor),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Profile record bound one-to-one to an identity account: `id` is the account id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Professor {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Professor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

/// A weighted rubric entry. `weight` is in percentage points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Criterion {
    pub id: &'static str,
    pub name: &'static str,
    pub weight: f64,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationScore {
    pub criterion_id: String,
    pub score: f64,
}

impl EvaluationScore {
    pub fn new(criterion_id: impl Into<String>, score: f64) -> Self {
        Self {
            criterion_id: criterion_id.into(),
            score,
        }
    }
}

/// A stored evaluation. `date` is always an ISO-8601 UTC string with millisecond precision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub student_id: Uuid,
    pub professor_id: Uuid,
    pub semester: String,
    pub date: String,
    pub scores: Vec<EvaluationScore>,
    pub final_score: f64,
}

/// Everything an evaluation carries before the store assigns `id` and `date`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvaluation {
    pub student_id: Uuid,
    pub professor_id: Uuid,
    pub semester: String,
    pub scores: Vec<EvaluationScore>,
    pub final_score: f64,
}

/// The in-progress form state handed to the feedback generator.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationDraft {
    pub student_id: Uuid,
    pub semester: String,
    pub scores: Vec<EvaluationScore>,
    pub final_score: f64,
}

impl EvaluationDraft {
    pub fn into_new_evaluation(self, professor_id: Uuid) -> NewEvaluation {
        NewEvaluation {
            student_id: self.student_id,
            professor_id,
            semester: self.semester,
            scores: self.scores,
            final_score: self.final_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentAverage {
    pub label: String,
    pub average: f64,
    pub evaluation_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemesterAverage {
    pub semester: String,
    pub label: String,
    pub average: f64,
    pub evaluation_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentEvaluation {
    pub student_name: String,
    pub semester: String,
    pub final_score: f64,
    pub date: String,
}
