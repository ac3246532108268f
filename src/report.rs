use std::fmt::Write;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};

use crate::elapsed::{self, TimeSpent};
use crate::models::{TaskAssignment, VolunteerHours};

/// Total recorded time per volunteer, longest first. Assignments missing
/// either timestamp contribute no time.
pub fn summarize_hours(assignments: &[TaskAssignment]) -> Vec<VolunteerHours> {
    let mut map: std::collections::HashMap<uuid::Uuid, VolunteerHours> =
        std::collections::HashMap::new();

    for assignment in assignments {
        let entry = map
            .entry(assignment.volunteer_id)
            .or_insert_with(|| VolunteerHours {
                volunteer_name: assignment.volunteer_name.clone(),
                volunteer_email: assignment.volunteer_email.clone(),
                total_minutes: 0,
                assignment_count: 0,
            });

        if let Some(spent) = assignment_time(assignment) {
            entry.total_minutes += spent.total_minutes();
        }
        entry.assignment_count += 1;
    }

    let mut values: Vec<VolunteerHours> = map.into_values().collect();
    values.sort_by(|a, b| {
        b.total_minutes
            .cmp(&a.total_minutes)
            .then_with(|| a.volunteer_name.cmp(&b.volunteer_name))
    });
    values
}

/// Start of the reporting window, at least one day back from `now`.
pub fn cutoff(since_days: i64, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    Duration::try_days(since_days.max(1))
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| format!("--since-days {since_days} reaches outside the supported date range"))
}

fn assignment_time(assignment: &TaskAssignment) -> Option<TimeSpent> {
    match (assignment.started_at, assignment.completed_at) {
        (Some(start), Some(end)) => Some(elapsed::time_spent(start, Some(end))),
        _ => None,
    }
}

pub fn build_report(
    volunteer: Option<&str>,
    since: DateTime<Utc>,
    assignments: &[TaskAssignment],
) -> String {
    let hours = summarize_hours(assignments);

    let mut output = String::new();
    let scope_label = volunteer.unwrap_or("all volunteers");

    let _ = writeln!(output, "# Volunteer Hours Report");
    let _ = writeln!(
        output,
        "Generated for {} (check-outs since {})",
        scope_label,
        since.format("%Y-%m-%d")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Volunteer Hours");

    if hours.is_empty() {
        let _ = writeln!(output, "No completed tasks recorded for this window.");
    } else {
        for entry in hours.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) {} across {} tasks",
                entry.volunteer_name,
                entry.volunteer_email,
                TimeSpent::from_minutes(entry.total_minutes).formatted,
                entry.assignment_count
            );
        }
    }

    let mut recent: Vec<&TaskAssignment> = assignments.iter().collect();
    recent.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Check-outs");

    if recent.is_empty() {
        let _ = writeln!(output, "No completed tasks recorded for this window.");
    } else {
        for assignment in recent.iter().take(5) {
            let spent = assignment_time(assignment)
                .map(|spent| spent.formatted)
                .unwrap_or_else(|| "unknown time".to_string());
            let completed = assignment
                .completed_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let _ = write!(
                output,
                "- {} on {} by {} ({})",
                assignment.task_name, completed, assignment.volunteer_name, spent
            );
            match completion_notes(assignment) {
                Some(notes) => {
                    let _ = writeln!(output, ": {notes}");
                }
                None => {
                    let _ = writeln!(output);
                }
            }
        }
    }

    output
}

fn completion_notes(assignment: &TaskAssignment) -> Option<String> {
    let raw = assignment.notes.as_deref()?;
    let notes: serde_json::Value = serde_json::from_str(raw).ok()?;
    notes
        .get("completion_notes")
        .and_then(|value| value.as_str())
        .map(str::to_string)
}
