use std::collections::BTreeMap;
use std::sync::Arc;

use orchestrator_core::domain::task::Task;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required input fields: {0}")]
    MissingFields(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("{0}")]
    Failed(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReviewError {
    #[error("{0}")]
    Failed(String),
}

/// Tagged map from template name to a `{validate, render, review}` triple,
/// per spec.md §9's polymorphism note. The executor's stage-3/4 dispatch
/// consults this registry by `task.template_type`.
pub trait TemplateHandler: Send + Sync {
    fn validate(&self, input: &serde_json::Value) -> Result<(), ValidationError>;
    fn render(&self, task: &Task) -> Result<String, RenderError>;
    fn review(&self, rendered: &str) -> Result<(), ReviewError>;
}

pub struct TemplateRegistry {
    handlers: BTreeMap<String, Arc<dyn TemplateHandler>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { handlers: BTreeMap::new() }
    }

    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn TemplateHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TemplateHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new().register("meeting_summary", Arc::new(MeetingSummaryHandler))
    }
}

const REQUIRED_FIELDS: &[&str] = &["meeting_title", "meeting_date", "participants", "notes"];
pub const REQUIRED_HEADER: &str = "# 회의 결과 요약";

/// The sole template body this crate ships content for. Grounded
/// field-for-field in the reference implementation's meeting-summary
/// renderer: required fields, bullet-point extraction from free-form
/// notes, and the localized report shape.
pub struct MeetingSummaryHandler;

impl TemplateHandler for MeetingSummaryHandler {
    fn validate(&self, input: &serde_json::Value) -> Result<(), ValidationError> {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .filter(|field| is_missing(input, field))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing.join(", ")));
        }
        Ok(())
    }

    fn render(&self, task: &Task) -> Result<String, RenderError> {
        let input = &task.input;
        let notes = input.get("notes").and_then(|value| value.as_str()).unwrap_or_default();
        let points = extract_points(notes, 5);
        if points.is_empty() {
            return Err(RenderError::Failed("notes must include at least one meaningful line".to_string()));
        }

        let participant_text = match input.get("participants") {
            Some(serde_json::Value::Array(items)) if !items.is_empty() => {
                items.iter().map(display_value).collect::<Vec<_>>().join(", ")
            }
            Some(serde_json::Value::Array(_)) | None => "N/A".to_string(),
            Some(_) => return Err(RenderError::Failed("participants must be a list".to_string())),
        };

        let meeting_title = input.get("meeting_title").map(display_value).unwrap_or_else(|| "N/A".to_string());
        let meeting_date = input.get("meeting_date").map(display_value).unwrap_or_else(|| "N/A".to_string());

        let mut lines = vec![
            REQUIRED_HEADER.to_string(),
            String::new(),
            format!("- 회의 제목: {meeting_title}"),
            format!("- 회의 날짜: {meeting_date}"),
            format!("- 참석자: {participant_text}"),
            String::new(),
            "## 핵심 논점".to_string(),
        ];
        lines.extend(points.iter().map(|point| format!("- {point}")));
        lines.push(String::new());
        lines.push("## 액션 아이템".to_string());
        lines.push("| Action | Owner | Due | Priority | Status |".to_string());
        lines.push("|---|---|---|---|---|".to_string());
        for idx in 1..=points.len() {
            lines.push(format!("| Action {idx} | TBD | TBD | Medium | Open |"));
        }
        lines.push(String::new());
        lines.push("## 확인 필요".to_string());
        lines.push("본 보고서는 자동 생성되었습니다. 최종 확인 후 배포하세요.".to_string());

        Ok(lines.join("\n").trim().to_string() + "\n")
    }

    fn review(&self, rendered: &str) -> Result<(), ReviewError> {
        if rendered.lines().next() != Some(REQUIRED_HEADER) {
            return Err(ReviewError::Failed("review failed: report header missing".to_string()));
        }
        Ok(())
    }
}

fn is_missing(input: &serde_json::Value, field: &str) -> bool {
    match input.get(field) {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(value)) => value.is_empty(),
        _ => false,
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn extract_points(notes: &str, limit: usize) -> Vec<String> {
    let normalized = notes.replace('\r', "\n");
    let lines: Vec<String> = normalized
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.trim_matches(|c: char| matches!(c, '-' | '*' | ' ' | '\t')).to_string())
        .collect();

    if lines.is_empty() && !notes.trim().is_empty() {
        return vec![notes.trim().to_string()];
    }
    lines.into_iter().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn task_with_input(input: serde_json::Value) -> Task {
        Task::new("weekly sync", "meeting_summary", input, "kim", Utc::now())
    }

    #[test]
    fn validate_flags_missing_required_fields() {
        let handler = MeetingSummaryHandler;
        let error = handler.validate(&json!({"meeting_title": "standup"})).unwrap_err();
        assert!(matches!(error, ValidationError::MissingFields(_)));
    }

    #[test]
    fn render_splits_notes_into_bullet_points() {
        let handler = MeetingSummaryHandler;
        let task = task_with_input(json!({
            "meeting_title": "Weekly Sync",
            "meeting_date": "2026-07-29",
            "participants": ["Kim", "Lee"],
            "notes": "업무A 진행\n업무B 리스크\n업무C 일정",
        }));
        let rendered = handler.render(&task).expect("render should succeed");
        assert!(rendered.starts_with(REQUIRED_HEADER));
        assert!(rendered.contains("- 업무A 진행"));
        assert!(rendered.contains("- 참석자: Kim, Lee"));
        assert!(rendered.contains("| Action 3 | TBD | TBD | Medium | Open |"));
    }

    #[test]
    fn render_falls_back_to_whole_notes_when_no_lines_found() {
        let handler = MeetingSummaryHandler;
        let task = task_with_input(json!({
            "meeting_title": "Ad-hoc",
            "meeting_date": "2026-07-29",
            "participants": [],
            "notes": "single line summary",
        }));
        let rendered = handler.render(&task).expect("render should succeed");
        assert!(rendered.contains("- single line summary"));
        assert!(rendered.contains("- 참석자: N/A"));
    }

    #[test]
    fn render_rejects_non_list_participants() {
        let handler = MeetingSummaryHandler;
        let task = task_with_input(json!({
            "meeting_title": "Ops",
            "meeting_date": "2026-07-29",
            "participants": "Ops",
            "notes": "a\nb",
        }));
        let error = handler.render(&task).unwrap_err();
        assert!(matches!(error, RenderError::Failed(_)));
    }

    #[test]
    fn review_requires_localized_header_on_first_line() {
        let handler = MeetingSummaryHandler;
        assert!(handler.review("# 회의 결과 요약\n\nbody").is_ok());
        assert!(handler.review("not a header\nbody").is_err());
    }
}
