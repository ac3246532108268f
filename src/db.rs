use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::checkin::{CheckIn, CheckOut};
use crate::config::DatabaseConfig;
use crate::geo::Coordinate;
use crate::models::{TaskAssignment, TaskLocation};

const ASSIGNMENT_SELECT: &str = r#"
    SELECT a.id, a.task_id, t.name AS task_name, t.location,
           a.volunteer_id, v.name AS volunteer_name, v.email AS volunteer_email,
           a.status, a.assigned_at, a.started_at, a.completed_at, a.notes
    FROM weave.task_assignments a
    JOIN weave.tasks t ON t.id = a.task_id
    JOIN weave.volunteers v ON v.id = a.volunteer_id
"#;

pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .context("failed to connect to Postgres")?;
    tracing::debug!(max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let volunteers = vec![
        (
            Uuid::parse_str("6f1d7a52-8c3e-4d0b-9a61-0d2f5b7e3c11")?,
            "Rosa Diaz",
            "rosa.diaz@weave.community",
        ),
        (
            Uuid::parse_str("b2e4c8a0-13f7-4e59-8d2a-7c6b1f0e9d24")?,
            "Tomasz Nowak",
            "tomasz.nowak@weave.community",
        ),
    ];

    for (id, name, email) in volunteers {
        sqlx::query(
            r#"
            INSERT INTO weave.volunteers (id, name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let tasks = vec![
        (
            "seed-task-001",
            "Clear storm drain on Canal St",
            "Remove leaves and debris blocking the drain grate",
            TaskLocation {
                coordinate: Coordinate::new(40.7191, -74.0018),
                address: Some("Canal St & Centre St, New York".to_string()),
            },
        ),
        (
            "seed-task-002",
            "Repaint faded crosswalk",
            "Mark the crosswalk outside PS 124 with temporary paint",
            TaskLocation {
                coordinate: Coordinate::new(40.7150, -73.9970),
                address: Some("Division St & Market St, New York".to_string()),
            },
        ),
    ];

    for (source_key, name, description, location) in tasks {
        sqlx::query(
            r#"
            INSERT INTO weave.tasks (id, name, description, location, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(Json(location))
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let assignments = vec![
        ("seed-task-001", "rosa.diaz@weave.community"),
        ("seed-task-002", "tomasz.nowak@weave.community"),
    ];

    for (source_key, email) in assignments {
        let task_id: Uuid = sqlx::query("SELECT id FROM weave.tasks WHERE source_key = $1")
            .bind(source_key)
            .fetch_one(pool)
            .await?
            .get("id");
        assign_volunteer(pool, task_id, email).await?;
    }

    Ok(())
}

pub async fn import_tasks_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        name: String,
        description: Option<String>,
        lat: Option<f64>,
        lng: Option<f64>,
        address: Option<String>,
        required_people: Option<i32>,
        estimated_hours: Option<f64>,
        deadline: Option<DateTime<Utc>>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid task row {}", index + 1))?;

        let location = match (row.lat, row.lng) {
            (Some(lat), Some(lng)) => Some(TaskLocation {
                coordinate: Coordinate::checked(lat, lng)
                    .with_context(|| format!("task row {} ({})", index + 1, row.name))?,
                address: row.address.clone(),
            }),
            (None, None) => None,
            _ => anyhow::bail!("task row {} has only one of lat/lng", index + 1),
        };
        if location.is_none() {
            tracing::warn!(task = %row.name, "task imported without a location; check-in will be refused");
        }

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO weave.tasks
            (id, name, description, required_people, estimated_hours, location, deadline, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.name)
        .bind(&row.description)
        .bind(row.required_people.unwrap_or(1))
        .bind(row.estimated_hours)
        .bind(location.map(Json))
        .bind(row.deadline)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Assigns by volunteer email; re-assigning the same pair returns the
/// existing assignment.
pub async fn assign_volunteer(pool: &PgPool, task_id: Uuid, email: &str) -> anyhow::Result<Uuid> {
    let volunteer_id: Uuid = sqlx::query("SELECT id FROM weave.volunteers WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no volunteer registered with email {email}"))?
        .get("id");

    let row = sqlx::query(
        r#"
        INSERT INTO weave.task_assignments (id, task_id, volunteer_id, status)
        VALUES ($1, $2, $3, 'assigned')
        ON CONFLICT (task_id, volunteer_id) DO UPDATE SET task_id = EXCLUDED.task_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(task_id)
    .bind(volunteer_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to assign task {task_id}"))?;

    Ok(row.get("id"))
}

pub async fn fetch_assignment(pool: &PgPool, id: Uuid) -> anyhow::Result<TaskAssignment> {
    let query = format!("{ASSIGNMENT_SELECT} WHERE a.id = $1");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("assignment {id} not found"))?;
    assignment_from_row(&row)
}

pub async fn fetch_assignments(
    pool: &PgPool,
    volunteer_email: Option<&str>,
) -> anyhow::Result<Vec<TaskAssignment>> {
    let mut query = String::from(ASSIGNMENT_SELECT);
    if volunteer_email.is_some() {
        query.push_str(" WHERE v.email = $1");
    }
    query.push_str(" ORDER BY a.assigned_at DESC");

    let mut rows = sqlx::query(&query);
    if let Some(email) = volunteer_email {
        rows = rows.bind(email);
    }

    rows.fetch_all(pool)
        .await?
        .iter()
        .map(assignment_from_row)
        .collect()
}

pub async fn fetch_completed_assignments(
    pool: &PgPool,
    since: DateTime<Utc>,
    volunteer_email: Option<&str>,
) -> anyhow::Result<Vec<TaskAssignment>> {
    let mut query = format!(
        "{ASSIGNMENT_SELECT} WHERE a.status = 'completed' AND a.completed_at >= $1"
    );
    if volunteer_email.is_some() {
        query.push_str(" AND v.email = $2");
    }

    let mut rows = sqlx::query(&query).bind(since);
    if let Some(email) = volunteer_email {
        rows = rows.bind(email);
    }

    rows.fetch_all(pool)
        .await?
        .iter()
        .map(assignment_from_row)
        .collect()
}

pub async fn record_check_in(pool: &PgPool, id: Uuid, check_in: &CheckIn) -> anyhow::Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE weave.task_assignments
        SET status = 'in_progress', started_at = $2, notes = $3
        WHERE id = $1 AND status IN ('assigned', 'accepted')
        "#,
    )
    .bind(id)
    .bind(check_in.started_at)
    .bind(&check_in.notes)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("assignment {id} changed status before check-in was recorded");
    }
    Ok(())
}

pub async fn record_check_out(pool: &PgPool, id: Uuid, check_out: &CheckOut) -> anyhow::Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE weave.task_assignments
        SET status = 'completed', completed_at = $2, notes = $3
        WHERE id = $1 AND status = 'in_progress'
        "#,
    )
    .bind(id)
    .bind(check_out.completed_at)
    .bind(&check_out.notes)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("assignment {id} changed status before check-out was recorded");
    }
    Ok(())
}

fn assignment_from_row(row: &PgRow) -> anyhow::Result<TaskAssignment> {
    let status: String = row.get("status");
    let location: Option<Json<TaskLocation>> = row
        .try_get("location")
        .context("task location is not a {lat, lng} object")?;

    Ok(TaskAssignment {
        id: row.get("id"),
        task_id: row.get("task_id"),
        task_name: row.get("task_name"),
        task_location: location.map(|Json(location)| location),
        volunteer_id: row.get("volunteer_id"),
        volunteer_name: row.get("volunteer_name"),
        volunteer_email: row.get("volunteer_email"),
        status: status.parse()?,
        assigned_at: row.get("assigned_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        notes: row.get("notes"),
    })
}
