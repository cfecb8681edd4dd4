use crate::error::ValidationError;
use crate::models::{Criterion, EvaluationScore};
use crate::rubric;
use crate::scoring;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_SCORE: f64 = 10.0;

pub fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    Ok(())
}

pub fn password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LEN));
    }
    Ok(())
}

pub fn password_change(password: &str, confirm: &str) -> Result<(), ValidationError> {
    self::password(password)?;
    if password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

pub fn new_account(name: &str, email: &str, password: &str) -> Result<(), ValidationError> {
    require("name", name)?;
    require("email", email)?;
    self::password(password)
}

/// Checks a draft against its semester rubric and returns that rubric.
pub fn evaluation(
    semester: &str,
    scores: &[EvaluationScore],
) -> Result<&'static [Criterion], ValidationError> {
    if !rubric::is_known_semester(semester) {
        return Err(ValidationError::UnknownSemester(semester.to_string()));
    }
    let criteria = rubric::criteria_for(semester);

    for score in scores {
        if !criteria.iter().any(|c| c.id == score.criterion_id) {
            return Err(ValidationError::UnknownCriterion {
                criterion: score.criterion_id.clone(),
                semester: semester.to_string(),
            });
        }
        if !(0.0..=MAX_SCORE).contains(&score.score) {
            return Err(ValidationError::ScoreOutOfRange {
                criterion: score.criterion_id.clone(),
                score: score.score,
            });
        }
    }

    if !scoring::is_complete(scores, criteria) {
        return Err(ValidationError::Incomplete);
    }
    Ok(criteria)
}

/// Parses `CRITERION=SCORE` pairs as given on the command line.
pub fn parse_score(raw: &str) -> Result<EvaluationScore, String> {
    let (id, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected CRITERION=SCORE, got '{raw}'"))?;
    let score = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid score '{}' for criterion '{}'", value.trim(), id.trim()))?;
    Ok(EvaluationScore::new(id.trim(), score))
}
