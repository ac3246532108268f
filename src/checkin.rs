use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::elapsed::{self, TimeSpent};
use crate::error::CheckInError;
use crate::geo::{self, ProximityResult};
use crate::location::LocationFix;
use crate::models::{AssignmentNotes, AssignmentStatus, TaskAssignment, TaskLocation};

/// State to persist for an admitted check-in.
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub started_at: DateTime<Utc>,
    pub notes: String,
    pub proximity: ProximityResult,
}

/// State to persist for a check-out.
#[derive(Debug, Clone)]
pub struct CheckOut {
    pub completed_at: DateTime<Utc>,
    pub notes: String,
    pub proximity: ProximityResult,
    pub time_spent: TimeSpent,
}

pub fn plan_check_in(
    assignment: &TaskAssignment,
    fix: &LocationFix,
    max_distance_meters: f64,
    now: DateTime<Utc>,
) -> Result<CheckIn, CheckInError> {
    let task_location = assignment
        .task_location
        .as_ref()
        .ok_or(CheckInError::MissingTaskLocation("check-in"))?;

    if !matches!(
        assignment.status,
        AssignmentStatus::Assigned | AssignmentStatus::Accepted
    ) {
        return Err(CheckInError::InvalidStatus {
            id: assignment.id,
            status: assignment.status,
            action: "check in",
        });
    }

    let proximity = geo::verify_proximity(
        fix.coordinate,
        task_location.coordinate,
        max_distance_meters,
    );
    if !proximity.is_within_range {
        return Err(CheckInError::OutOfRange(proximity));
    }

    let notes = AssignmentNotes {
        check_in_location: Some(observed_at(fix, task_location)),
        check_in_time: Some(now),
        ..AssignmentNotes::default()
    };

    Ok(CheckIn {
        started_at: now,
        notes: serde_json::to_string(&notes)?,
        proximity,
    })
}

/// Check-out is allowed from any distance; an out-of-range position is only
/// logged.
pub fn plan_check_out(
    assignment: &TaskAssignment,
    fix: &LocationFix,
    max_distance_meters: f64,
    now: DateTime<Utc>,
    completion_notes: Option<&str>,
) -> Result<CheckOut, CheckInError> {
    let task_location = assignment
        .task_location
        .as_ref()
        .ok_or(CheckInError::MissingTaskLocation("check-out"))?;

    if assignment.status != AssignmentStatus::InProgress {
        return Err(CheckInError::InvalidStatus {
            id: assignment.id,
            status: assignment.status,
            action: "check out",
        });
    }
    let started_at = assignment
        .started_at
        .ok_or(CheckInError::NotStarted(assignment.id))?;

    let proximity = geo::verify_proximity(
        fix.coordinate,
        task_location.coordinate,
        max_distance_meters,
    );
    if !proximity.is_within_range {
        tracing::warn!(
            assignment_id = %assignment.id,
            distance_m = proximity.distance_meters,
            "check-out location verification: {}",
            proximity.message
        );
    }

    let mut notes = existing_notes(assignment);
    notes.insert(
        "check_out_location".to_string(),
        serde_json::to_value(observed_at(fix, task_location))?,
    );
    notes.insert("check_out_time".to_string(), serde_json::to_value(now)?);
    if let Some(text) = completion_notes.filter(|text| !text.trim().is_empty()) {
        notes.insert("completion_notes".to_string(), Value::String(text.to_string()));
    }

    Ok(CheckOut {
        completed_at: now,
        notes: Value::Object(notes).to_string(),
        proximity,
        time_spent: elapsed::time_spent(started_at, Some(now)),
    })
}

/// Existing notes are kept key for key; anything that is not a JSON object
/// is replaced.
fn existing_notes(assignment: &TaskAssignment) -> Map<String, Value> {
    let Some(raw) = assignment.notes.as_deref() else {
        return Map::new();
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(notes)) => notes,
        Ok(_) => {
            tracing::warn!(
                assignment_id = %assignment.id,
                "discarding assignment notes that are not a JSON object"
            );
            Map::new()
        }
        Err(e) => {
            tracing::warn!(
                assignment_id = %assignment.id,
                error = %e,
                "discarding unparseable assignment notes"
            );
            Map::new()
        }
    }
}

fn observed_at(fix: &LocationFix, task_location: &TaskLocation) -> TaskLocation {
    TaskLocation {
        coordinate: fix.coordinate,
        address: task_location.address.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Coordinate, EARTH_RADIUS_METERS};
    use chrono::Duration;
    use uuid::Uuid;

    fn site() -> Coordinate {
        Coordinate::new(40.7128, -74.0060)
    }

    fn fix_at(meters_north: f64) -> LocationFix {
        let degrees = (meters_north / EARTH_RADIUS_METERS).to_degrees();
        LocationFix {
            coordinate: Coordinate::new(site().latitude + degrees, site().longitude),
            accuracy_meters: Some(5.0),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-02T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn assignment(status: AssignmentStatus) -> TaskAssignment {
        TaskAssignment {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            task_name: "Clear storm drain".to_string(),
            task_location: Some(TaskLocation {
                coordinate: site(),
                address: Some("Canal St & Centre St".to_string()),
            }),
            volunteer_id: Uuid::new_v4(),
            volunteer_name: "Rosa Diaz".to_string(),
            volunteer_email: "rosa@example.org".to_string(),
            status,
            assigned_at: now() - Duration::days(1),
            started_at: None,
            completed_at: None,
            notes: None,
        }
    }

    #[test]
    fn admits_check_in_near_task() {
        let plan = plan_check_in(&assignment(AssignmentStatus::Accepted), &fix_at(30.0), 100.0, now())
            .unwrap();
        assert_eq!(plan.started_at, now());
        assert_eq!(plan.proximity.distance_meters, Some(30));

        let notes: AssignmentNotes = serde_json::from_str(&plan.notes).unwrap();
        assert_eq!(notes.check_in_time, Some(now()));
        let location = notes.check_in_location.unwrap();
        assert_eq!(location.address.as_deref(), Some("Canal St & Centre St"));
        assert!(notes.check_out_time.is_none());
    }

    #[test]
    fn rejects_check_in_out_of_range() {
        let err = plan_check_in(&assignment(AssignmentStatus::Assigned), &fix_at(200.0), 100.0, now())
            .unwrap_err();
        match err {
            CheckInError::OutOfRange(result) => {
                assert_eq!(result.distance_meters, Some(200));
                assert_eq!(
                    result.message,
                    "You are 200m away. Please get within 100m to check in."
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_check_in_without_task_location() {
        let mut assignment = assignment(AssignmentStatus::Assigned);
        assignment.task_location = None;
        let err = plan_check_in(&assignment, &fix_at(0.0), 100.0, now()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Task location not set. Cannot verify check-in."
        );
    }

    #[test]
    fn rejects_check_in_when_already_started() {
        let err = plan_check_in(&assignment(AssignmentStatus::InProgress), &fix_at(0.0), 100.0, now())
            .unwrap_err();
        assert!(matches!(err, CheckInError::InvalidStatus { .. }));
    }

    #[test]
    fn check_out_merges_notes_and_reports_time() {
        let mut assignment = assignment(AssignmentStatus::InProgress);
        let started = now() - Duration::minutes(95);
        assignment.started_at = Some(started);
        assignment.notes = Some(
            serde_json::to_string(&AssignmentNotes {
                check_in_location: Some(TaskLocation {
                    coordinate: site(),
                    address: None,
                }),
                check_in_time: Some(started),
                ..AssignmentNotes::default()
            })
            .unwrap(),
        );

        let plan = plan_check_out(&assignment, &fix_at(10.0), 100.0, now(), Some("Drain cleared"))
            .unwrap();
        assert_eq!(plan.time_spent.formatted, "1h 35m");

        let notes: AssignmentNotes = serde_json::from_str(&plan.notes).unwrap();
        assert_eq!(notes.check_in_time, Some(started));
        assert_eq!(notes.check_out_time, Some(now()));
        assert_eq!(notes.completion_notes.as_deref(), Some("Drain cleared"));
    }

    #[test]
    fn check_out_out_of_range_still_proceeds() {
        let mut assignment = assignment(AssignmentStatus::InProgress);
        assignment.started_at = Some(now() - Duration::minutes(20));

        let plan = plan_check_out(&assignment, &fix_at(500.0), 100.0, now(), None).unwrap();
        assert!(!plan.proximity.is_within_range);
        assert_eq!(plan.time_spent.formatted, "20m");
    }

    #[test]
    fn check_out_replaces_unparseable_notes() {
        let mut assignment = assignment(AssignmentStatus::InProgress);
        assignment.started_at = Some(now() - Duration::minutes(5));
        assignment.notes = Some("left early, see phone".to_string());

        let plan = plan_check_out(&assignment, &fix_at(0.0), 100.0, now(), Some("done")).unwrap();
        let notes: AssignmentNotes = serde_json::from_str(&plan.notes).unwrap();
        assert!(notes.check_in_time.is_none());
        assert_eq!(notes.completion_notes.as_deref(), Some("done"));
    }

    #[test]
    fn check_out_keeps_unknown_note_keys() {
        let mut assignment = assignment(AssignmentStatus::InProgress);
        assignment.started_at = Some(now() - Duration::minutes(30));
        assignment.notes = Some(
            r#"{"check_in_time":"2026-05-02T09:30:00Z","check_in_location":{"lat":0,"lng":0,"accuracy":8},"device":"android"}"#
                .to_string(),
        );

        let plan = plan_check_out(&assignment, &fix_at(0.0), 100.0, now(), None).unwrap();
        let notes: Value = serde_json::from_str(&plan.notes).unwrap();
        assert_eq!(notes["device"], "android");
        assert_eq!(notes["check_in_location"]["accuracy"], 8);
        assert_eq!(notes["check_in_time"], "2026-05-02T09:30:00Z");
        assert_eq!(notes["check_out_time"], "2026-05-02T10:00:00Z");
        assert!(notes.get("completion_notes").is_none());
    }

    #[test]
    fn check_out_keeps_notes_of_a_different_shape() {
        let mut assignment = assignment(AssignmentStatus::InProgress);
        assignment.started_at = Some(now() - Duration::minutes(30));
        assignment.notes =
            Some(r#"{"check_in_location":"Main St","check_in_time":"2026-05-02T09:30:00Z"}"#.to_string());

        let plan = plan_check_out(&assignment, &fix_at(0.0), 100.0, now(), Some("done")).unwrap();
        let notes: Value = serde_json::from_str(&plan.notes).unwrap();
        assert_eq!(notes["check_in_location"], "Main St");
        assert_eq!(notes["check_in_time"], "2026-05-02T09:30:00Z");
        assert_eq!(notes["completion_notes"], "done");
    }

    #[test]
    fn check_out_replaces_non_object_notes() {
        let mut assignment = assignment(AssignmentStatus::InProgress);
        assignment.started_at = Some(now() - Duration::minutes(5));
        assignment.notes = Some("[1, 2, 3]".to_string());

        let plan = plan_check_out(&assignment, &fix_at(0.0), 100.0, now(), None).unwrap();
        let notes: Value = serde_json::from_str(&plan.notes).unwrap();
        assert!(notes.is_object());
        assert_eq!(notes["check_out_time"], "2026-05-02T10:00:00Z");
    }

    #[test]
    fn check_out_requires_in_progress() {
        let err = plan_check_out(&assignment(AssignmentStatus::Completed), &fix_at(0.0), 100.0, now(), None)
            .unwrap_err();
        assert!(matches!(err, CheckInError::InvalidStatus { .. }));
    }
}
