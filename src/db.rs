use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use nanoid::nanoid;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::{Availability, Poll, PollOption, Schedule, ScheduleResponse, Slot, Voter};
use crate::organizer;

/// Event ids double as URL path segments, so they stay short and URL-safe.
const EVENT_ID_LEN: usize = 10;

pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS polls (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            password TEXT,
            end_at TIMESTAMP,
            is_closed BOOLEAN NOT NULL DEFAULT 0,
            created_by TEXT,
            schedule_id TEXT,
            admin_token TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS poll_options (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            poll_id TEXT NOT NULL,
            option_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            url TEXT,
            description TEXT,
            FOREIGN KEY (poll_id) REFERENCES polls (id) ON DELETE CASCADE,
            UNIQUE(poll_id, option_id)
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS poll_votes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            poll_id TEXT NOT NULL,
            voter_id TEXT NOT NULL,
            voter_name TEXT NOT NULL,
            option_id INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (poll_id) REFERENCES polls (id) ON DELETE CASCADE,
            UNIQUE(poll_id, voter_id)
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            password TEXT,
            end_at TIMESTAMP,
            is_closed BOOLEAN NOT NULL DEFAULT 0,
            confirmed_slot TEXT,
            poll_id TEXT,
            admin_token TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schedule_slots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id TEXT NOT NULL,
            date DATE NOT NULL,
            time TEXT,
            FOREIGN KEY (schedule_id) REFERENCES schedules (id) ON DELETE CASCADE
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schedule_responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id TEXT NOT NULL,
            respondent_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (schedule_id) REFERENCES schedules (id) ON DELETE CASCADE,
            UNIQUE(schedule_id, respondent_id)
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schedule_availability (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id TEXT NOT NULL,
            respondent_id TEXT NOT NULL,
            slot_key TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY (schedule_id) REFERENCES schedules (id) ON DELETE CASCADE,
            UNIQUE(schedule_id, respondent_id, slot_key)
        );",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub struct NewPoll {
    pub title: String,
    pub options: Vec<NewPollOption>,
    pub password: Option<String>,
    pub end_at: Option<NaiveDateTime>,
    pub created_by: Option<String>,
    pub schedule_id: Option<String>,
}

pub struct NewPollOption {
    pub title: String,
    pub url: Option<String>,
    pub description: Option<String>,
}

pub struct CreatedEvent {
    pub id: String,
    pub admin_token: String,
}

pub async fn create_poll(pool: &SqlitePool, input: NewPoll) -> Result<CreatedEvent, AppError> {
    let id = nanoid!(EVENT_ID_LEN);
    let admin_token = organizer::new_admin_token();

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO polls (id, title, password, end_at, created_by, schedule_id, admin_token)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&input.title)
    .bind(&input.password)
    .bind(input.end_at)
    .bind(&input.created_by)
    .bind(&input.schedule_id)
    .bind(&admin_token)
    .execute(&mut *tx)
    .await?;

    // option_id is the stable 1-based integer the frontend keys on.
    for (index, option) in input.options.iter().enumerate() {
        sqlx::query(
            "INSERT INTO poll_options (poll_id, option_id, title, url, description)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind((index + 1) as i64)
        .bind(&option.title)
        .bind(&option.url)
        .bind(&option.description)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(CreatedEvent { id, admin_token })
}

pub async fn get_poll(pool: &SqlitePool, poll_id: &str) -> Result<Poll, AppError> {
    let mut poll = sqlx::query_as::<_, Poll>(
        "SELECT id, title, password, end_at, is_closed, created_by, schedule_id, admin_token,
                created_at
         FROM polls WHERE id = ?",
    )
    .bind(poll_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("poll not found".to_string()))?;

    let option_rows: Vec<(i64, String, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT option_id, title, url, description
         FROM poll_options WHERE poll_id = ? ORDER BY option_id",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    let vote_rows: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT option_id, voter_id, voter_name
         FROM poll_votes WHERE poll_id = ? ORDER BY created_at, id",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    let mut voters_by_option: HashMap<i64, Vec<Voter>> = HashMap::new();
    for (option_id, voter_id, voter_name) in vote_rows {
        voters_by_option
            .entry(option_id)
            .or_default()
            .push(Voter { id: voter_id, name: voter_name });
    }

    poll.options = option_rows
        .into_iter()
        .map(|(option_id, title, url, description)| {
            let voters = voters_by_option.remove(&option_id).unwrap_or_default();
            PollOption { option_id, title, url, description, votes: voters.len() as i64, voters }
        })
        .collect();

    Ok(poll)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    /// First vote by this voter.
    Voted,
    /// Moved from another option; the old membership is gone.
    Changed,
    /// Voted for the option already held, i.e. a toggle off.
    Cancelled,
}

/// One-vote-per-participant toggle. Runs in a single transaction so that a
/// voter ends up a member of exactly one option, or none when cancelling,
/// even under concurrent submissions.
pub async fn vote_poll(
    pool: &SqlitePool,
    poll_id: &str,
    option_id: i64,
    voter_id: &str,
    voter_name: &str,
) -> Result<VoteOutcome, AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT id FROM poll_options WHERE poll_id = ? AND option_id = ?")
        .bind(poll_id)
        .bind(option_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("option not found".to_string()))?;

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT option_id FROM poll_votes WHERE poll_id = ? AND voter_id = ?")
            .bind(poll_id)
            .bind(voter_id)
            .fetch_optional(&mut *tx)
            .await?;

    let outcome = match existing {
        Some((current,)) if current == option_id => {
            sqlx::query("DELETE FROM poll_votes WHERE poll_id = ? AND voter_id = ?")
                .bind(poll_id)
                .bind(voter_id)
                .execute(&mut *tx)
                .await?;
            VoteOutcome::Cancelled
        }
        Some(_) => {
            sqlx::query(
                "UPDATE poll_votes SET option_id = ?, voter_name = ?
                 WHERE poll_id = ? AND voter_id = ?",
            )
            .bind(option_id)
            .bind(voter_name)
            .bind(poll_id)
            .bind(voter_id)
            .execute(&mut *tx)
            .await?;
            VoteOutcome::Changed
        }
        None => {
            sqlx::query(
                "INSERT INTO poll_votes (poll_id, voter_id, voter_name, option_id)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(poll_id)
            .bind(voter_id)
            .bind(voter_name)
            .bind(option_id)
            .execute(&mut *tx)
            .await?;
            VoteOutcome::Voted
        }
    };
    tx.commit().await?;

    Ok(outcome)
}

pub async fn count_votes(pool: &SqlitePool, poll_id: &str) -> Result<i64, AppError> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM poll_votes WHERE poll_id = ?")
        .bind(poll_id)
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}

/// Relabels the voter wherever they appear; the id stays the same.
pub async fn update_voter_name(
    pool: &SqlitePool,
    poll_id: &str,
    voter_id: &str,
    name: &str,
) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE poll_votes SET voter_name = ? WHERE poll_id = ? AND voter_id = ?")
        .bind(name)
        .bind(poll_id)
        .bind(voter_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("voter not found".to_string()));
    }
    Ok(())
}

pub async fn set_poll_closed(
    pool: &SqlitePool,
    poll_id: &str,
    is_closed: bool,
) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE polls SET is_closed = ? WHERE id = ?")
        .bind(is_closed)
        .bind(poll_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("poll not found".to_string()));
    }
    Ok(())
}

/// Hard delete. Children go explicitly in the same transaction; SQLite does
/// not enforce ON DELETE CASCADE unless foreign keys are switched on.
pub async fn delete_poll(pool: &SqlitePool, poll_id: &str) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM poll_votes WHERE poll_id = ?")
        .bind(poll_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM poll_options WHERE poll_id = ?")
        .bind(poll_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(poll_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("poll not found".to_string()));
    }
    tx.commit().await?;
    Ok(())
}

pub struct NewSchedule {
    pub title: String,
    pub dates: Vec<NewDateOption>,
    pub password: Option<String>,
    pub end_at: Option<NaiveDateTime>,
    pub poll_id: Option<String>,
}

pub struct NewDateOption {
    pub date: NaiveDate,
    pub times: Vec<String>,
}

pub async fn create_schedule(
    pool: &SqlitePool,
    input: NewSchedule,
) -> Result<CreatedEvent, AppError> {
    let id = nanoid!(EVENT_ID_LEN);
    let admin_token = organizer::new_admin_token();

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO schedules (id, title, password, end_at, poll_id, admin_token)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&input.title)
    .bind(&input.password)
    .bind(input.end_at)
    .bind(&input.poll_id)
    .bind(&admin_token)
    .execute(&mut *tx)
    .await?;

    // Flatten at creation: a date with N times yields N slots, a date with no
    // times yields one whole-day slot.
    for date_option in &input.dates {
        if date_option.times.is_empty() {
            sqlx::query("INSERT INTO schedule_slots (schedule_id, date, time) VALUES (?, ?, NULL)")
                .bind(&id)
                .bind(date_option.date)
                .execute(&mut *tx)
                .await?;
        } else {
            for time in &date_option.times {
                sqlx::query("INSERT INTO schedule_slots (schedule_id, date, time) VALUES (?, ?, ?)")
                    .bind(&id)
                    .bind(date_option.date)
                    .bind(time)
                    .execute(&mut *tx)
                    .await?;
            }
        }
    }
    tx.commit().await?;

    Ok(CreatedEvent { id, admin_token })
}

pub async fn get_schedule(pool: &SqlitePool, schedule_id: &str) -> Result<Schedule, AppError> {
    let mut schedule = sqlx::query_as::<_, Schedule>(
        "SELECT id, title, password, end_at, is_closed, confirmed_slot, poll_id, admin_token,
                created_at
         FROM schedules WHERE id = ?",
    )
    .bind(schedule_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("schedule not found".to_string()))?;

    let slot_rows: Vec<(NaiveDate, Option<String>)> =
        sqlx::query_as("SELECT date, time FROM schedule_slots WHERE schedule_id = ? ORDER BY date, time")
            .bind(schedule_id)
            .fetch_all(pool)
            .await?;
    schedule.slots = slot_rows.into_iter().map(|(date, time)| Slot { date, time }).collect();

    let response_rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT respondent_id, name
         FROM schedule_responses WHERE schedule_id = ? ORDER BY created_at, id",
    )
    .bind(schedule_id)
    .fetch_all(pool)
    .await?;

    let availability_rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT respondent_id, slot_key, status FROM schedule_availability WHERE schedule_id = ?",
    )
    .bind(schedule_id)
    .fetch_all(pool)
    .await?;

    let mut by_respondent: HashMap<String, HashMap<String, Availability>> = HashMap::new();
    for (respondent_id, slot_key, status) in availability_rows {
        by_respondent
            .entry(respondent_id)
            .or_default()
            .insert(slot_key, Availability::parse(&status));
    }

    schedule.responses = response_rows
        .into_iter()
        .map(|(respondent_id, name)| ScheduleResponse {
            availability: by_respondent.remove(&respondent_id).unwrap_or_default(),
            respondent_id,
            name,
        })
        .collect();

    Ok(schedule)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseOutcome {
    Registered,
    Updated,
}

/// Upserts the response keyed by respondent id: the whole availability map is
/// replaced, never merged, inside one transaction. Only non-unavailable marks
/// are stored; a missing row already reads back as unavailable.
pub async fn submit_response(
    pool: &SqlitePool,
    schedule_id: &str,
    respondent_id: &str,
    name: &str,
    availability: &HashMap<String, Availability>,
) -> Result<ResponseOutcome, AppError> {
    let mut tx = pool.begin().await?;

    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM schedule_responses WHERE schedule_id = ? AND respondent_id = ?",
    )
    .bind(schedule_id)
    .bind(respondent_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match existing {
        Some(_) => {
            sqlx::query(
                "UPDATE schedule_responses SET name = ?, updated_at = CURRENT_TIMESTAMP
                 WHERE schedule_id = ? AND respondent_id = ?",
            )
            .bind(name)
            .bind(schedule_id)
            .bind(respondent_id)
            .execute(&mut *tx)
            .await?;
            ResponseOutcome::Updated
        }
        None => {
            sqlx::query(
                "INSERT INTO schedule_responses (schedule_id, respondent_id, name)
                 VALUES (?, ?, ?)",
            )
            .bind(schedule_id)
            .bind(respondent_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
            ResponseOutcome::Registered
        }
    };

    sqlx::query("DELETE FROM schedule_availability WHERE schedule_id = ? AND respondent_id = ?")
        .bind(schedule_id)
        .bind(respondent_id)
        .execute(&mut *tx)
        .await?;
    for (slot_key, status) in availability {
        if *status == Availability::Unavailable {
            continue;
        }
        sqlx::query(
            "INSERT INTO schedule_availability (schedule_id, respondent_id, slot_key, status)
             VALUES (?, ?, ?, ?)",
        )
        .bind(schedule_id)
        .bind(respondent_id)
        .bind(slot_key)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(outcome)
}

pub async fn close_schedule(
    pool: &SqlitePool,
    schedule_id: &str,
    confirmed_slot: &str,
) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE schedules SET is_closed = 1, confirmed_slot = ? WHERE id = ?")
        .bind(confirmed_slot)
        .bind(schedule_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("schedule not found".to_string()));
    }
    Ok(())
}

pub async fn reopen_schedule(pool: &SqlitePool, schedule_id: &str) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE schedules SET is_closed = 0, confirmed_slot = NULL WHERE id = ?")
        .bind(schedule_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("schedule not found".to_string()));
    }
    Ok(())
}

pub async fn delete_schedule(pool: &SqlitePool, schedule_id: &str) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM schedule_availability WHERE schedule_id = ?")
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM schedule_responses WHERE schedule_id = ?")
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM schedule_slots WHERE schedule_id = ?")
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("schedule not found".to_string()));
    }
    tx.commit().await?;
    Ok(())
}
