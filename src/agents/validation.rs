//! Input validation for work items and work plans
//!
//! Validates structure before processing to prevent invalid states and give
//! early, specific feedback. Errors block execution; warnings are logged and
//! carried in the report.

use crate::types::{WorkItem, WorkPlan};

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    /// Clarifying questions raised when requirements are too vague
    pub questions: Vec<String>,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate work item fields for correctness and completeness.
pub fn validate_work_item(item: &WorkItem) -> ValidationReport {
    let mut report = ValidationReport::default();

    if item.id.is_empty() {
        report.errors.push("WorkItem.id is required".to_string());
    } else if item.id.len() > 256 {
        report.errors.push(format!(
            "WorkItem.id too long ({} chars, max 256)",
            item.id.len()
        ));
    }

    if item.description.is_empty() {
        report
            .errors
            .push("WorkItem.description is required".to_string());
    } else if item.description.len() < 10 {
        report.warnings.push(format!(
            "WorkItem.description very short ({} chars)",
            item.description.len()
        ));
    } else if item.description.len() > 50_000 {
        report.errors.push(format!(
            "WorkItem.description too long ({} chars, max 50000)",
            item.description.len()
        ));
    }

    if item.priority > 10 {
        report.warnings.push(format!(
            "WorkItem.priority very high ({}, typical range 0-5)",
            item.priority
        ));
    }

    if item.review_attempt > 5 {
        report.warnings.push(format!(
            "WorkItem.review_attempt high ({}, may indicate repeated failures)",
            item.review_attempt
        ));
    }

    if item.review_attempt > 0 && item.review_feedback.is_empty() {
        report.warnings.push(format!(
            "WorkItem.review_attempt is {} but review_feedback is empty",
            item.review_attempt
        ));
    }

    report
}

/// Trigger words that mark a requirement as vague.
const VAGUE_TERMS: &[&str] = &["quickly", "just", "simple", "easy", "whatever"];

/// Cue-word categories a clear requirement is expected to touch.
const DETAIL_CATEGORIES: &[(&str, &[&str])] = &[
    ("what", &["add", "create", "build", "implement", "develop"]),
    ("why", &["because", "to", "for", "need", "require", "goal", "purpose"]),
    ("how", &["using", "with", "via", "through", "by"]),
    ("constraints", &["must", "should", "cannot", "within", "limit", "requirement"]),
    ("scope", &["only", "all", "some", "specific", "following", "include"]),
];

/// Validate a work plan for completeness and clarity.
///
/// Requires a non-empty description, a stated success criterion and tech
/// stack. Warns on brief (<10 words) or vague descriptions; when three or
/// more cue-word categories are absent the plan fails validation and the
/// report carries a structured question list.
pub fn validate_work_plan(plan: &WorkPlan) -> ValidationReport {
    let mut report = ValidationReport::default();

    if plan.description.trim().is_empty() {
        report
            .errors
            .push("Work plan missing description".to_string());
        report
            .questions
            .push("What is the goal of this work?".to_string());
    }

    if plan.tech_stack.is_none() {
        report.errors.push("Tech stack not specified".to_string());
        report
            .questions
            .push("What tech stack / technologies should be used?".to_string());
    }

    if plan.success_criteria.is_none() {
        report
            .errors
            .push("Success criteria not defined".to_string());
        report
            .questions
            .push("How will we know when this is complete?".to_string());
    }

    let description = plan.description.to_lowercase();

    for term in VAGUE_TERMS {
        if description.contains(term) {
            report
                .warnings
                .push(format!("Vague requirement: '{}'", term));
            report.questions.push(format!(
                "Please clarify what '{}' means in this context",
                term
            ));
        }
    }

    let word_count = plan.description.split_whitespace().count();
    if word_count < 10 {
        report.warnings.push(format!(
            "Requirement brief ({} words)",
            word_count
        ));
        report
            .questions
            .push("Please provide more details about what needs to be built".to_string());
    }

    let missing: Vec<&str> = DETAIL_CATEGORIES
        .iter()
        .filter(|(_, indicators)| {
            !indicators
                .iter()
                .any(|indicator| contains_word(&description, indicator))
        })
        .map(|(category, _)| *category)
        .collect();

    if missing.len() >= 3 {
        report.errors.push(format!(
            "Prompt lacks detail in: {}",
            missing.join(", ")
        ));
        report.questions.extend(
            [
                "What specifically needs to be built? (what)",
                "Why is this needed? (purpose)",
                "How should it be implemented? (approach)",
                "Are there any constraints or requirements? (constraints)",
            ]
            .iter()
            .map(|q| q.to_string()),
        );
    }

    report
}

/// Word-boundary containment check, so "to" doesn't match inside "tokio".
fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}
