use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    db,
    error::AppError,
    identity,
    models::{Availability, ScheduleResponse, Voter},
    organizer,
    state::AppState,
    tally,
};

const TITLE_MAX: usize = 50;
const NAME_MAX: usize = 50;
const URL_MAX: usize = 1024;
const DESCRIPTION_MAX: usize = 50;
const OPTIONS_MIN: usize = 2;
const OPTIONS_MAX: usize = 6;

fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

fn admin_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(organizer::ADMIN_TOKEN_HEADER).and_then(|value| value.to_str().ok())
}

fn validate_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("title is required".to_string()));
    }
    if title.chars().count() > TITLE_MAX {
        return Err(AppError::BadRequest(format!(
            "title must be at most {TITLE_MAX} characters"
        )));
    }
    Ok(title.to_string())
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    if name.chars().count() > NAME_MAX {
        return Err(AppError::BadRequest(format!("name must be at most {NAME_MAX} characters")));
    }
    Ok(name.to_string())
}

/// `end_date` alone means midnight at the start of that date; `end_time`
/// without a date is ignored. A deadline must lie in the future at creation.
fn parse_deadline(
    end_date: Option<NaiveDate>,
    end_time: Option<&str>,
) -> Result<Option<NaiveDateTime>, AppError> {
    let Some(date) = end_date else {
        return Ok(None);
    };
    let time = match end_time {
        Some(raw) => NaiveTime::parse_from_str(raw, "%H:%M")
            .map_err(|_| AppError::BadRequest("end_time must be HH:mm".to_string()))?,
        None => NaiveTime::MIN,
    };
    let end_at = date.and_time(time);
    if end_at <= Utc::now().naive_utc() {
        return Err(AppError::BadRequest("the deadline must be in the future".to_string()));
    }
    Ok(Some(end_at))
}

fn ensure_open(
    kind: &str,
    is_closed: bool,
    end_at: Option<NaiveDateTime>,
) -> Result<(), AppError> {
    if is_closed {
        return Err(AppError::BadRequest(format!("this {kind} is closed")));
    }
    if end_at.is_some_and(|deadline| deadline <= Utc::now().naive_utc()) {
        return Err(AppError::BadRequest(format!("the {kind} deadline has passed")));
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct CreatePollPayload {
    title: String,
    options: Vec<PollOptionPayload>,
    password: Option<String>,
    end_date: Option<NaiveDate>,
    end_time: Option<String>,
    created_by: Option<String>,
    schedule_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PollOptionPayload {
    title: String,
    url: Option<String>,
    description: Option<String>,
}

#[derive(Serialize)]
pub struct CreatedEventResponse {
    id: String,
    admin_token: String,
}

pub async fn create_poll(
    State(app_state): State<AppState>,
    Json(payload): Json<CreatePollPayload>,
) -> Result<Json<Value>, AppError> {
    let title = validate_title(&payload.title)?;
    let end_at = parse_deadline(payload.end_date, payload.end_time.as_deref())?;

    // Blank option rows from the form are dropped before counting.
    let mut options = Vec::new();
    for option in &payload.options {
        let option_title = option.title.trim();
        if option_title.is_empty() {
            continue;
        }
        if let Some(url) = &option.url {
            if url.chars().count() > URL_MAX {
                return Err(AppError::BadRequest(format!(
                    "option url must be at most {URL_MAX} characters"
                )));
            }
        }
        if let Some(description) = &option.description {
            if description.chars().count() > DESCRIPTION_MAX {
                return Err(AppError::BadRequest(format!(
                    "option description must be at most {DESCRIPTION_MAX} characters"
                )));
            }
        }
        options.push(db::NewPollOption {
            title: option_title.to_string(),
            url: option.url.clone(),
            description: option.description.clone(),
        });
    }
    if options.len() < OPTIONS_MIN {
        return Err(AppError::BadRequest(format!(
            "at least {OPTIONS_MIN} options are required"
        )));
    }
    if options.len() > OPTIONS_MAX {
        return Err(AppError::BadRequest(format!("at most {OPTIONS_MAX} options are allowed")));
    }

    let created = db::create_poll(
        &app_state.pool,
        db::NewPoll {
            title,
            options,
            password: payload.password.filter(|p| !p.is_empty()),
            end_at,
            created_by: payload.created_by,
            schedule_id: payload.schedule_id,
        },
    )
    .await?;
    Ok(ok(CreatedEventResponse { id: created.id, admin_token: created.admin_token }))
}

#[derive(Deserialize)]
pub struct PollQuery {
    voter_id: Option<String>,
}

#[derive(Serialize)]
pub struct PollDetails {
    id: String,
    title: String,
    has_password: bool,
    end_at: Option<NaiveDateTime>,
    is_closed: bool,
    created_by: Option<String>,
    schedule_id: Option<String>,
    options: Vec<PollOptionDetails>,
    total_votes: i64,
    winner_option_id: Option<i64>,
    /// Option ids in results order: descending votes, ties keep creation order.
    ranking: Vec<i64>,
    my_vote: Option<MyVote>,
}

#[derive(Serialize)]
pub struct PollOptionDetails {
    option_id: i64,
    title: String,
    url: Option<String>,
    description: Option<String>,
    votes: i64,
    percentage: f64,
    voters: Vec<Voter>,
}

#[derive(Serialize)]
pub struct MyVote {
    voter_id: String,
    voter_name: String,
    option_id: i64,
}

pub async fn get_poll(
    State(app_state): State<AppState>,
    Path(poll_id): Path<String>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Value>, AppError> {
    let poll = db::get_poll(&app_state.pool, &poll_id).await?;
    let total_votes = tally::total_votes(&poll);

    let options = poll
        .options
        .iter()
        .map(|option| PollOptionDetails {
            option_id: option.option_id,
            title: option.title.clone(),
            url: option.url.clone(),
            description: option.description.clone(),
            votes: option.votes,
            percentage: (tally::vote_percentage(option.votes, total_votes) * 10.0).round() / 10.0,
            voters: option.voters.clone(),
        })
        .collect();

    let my_vote = query
        .voter_id
        .as_deref()
        .and_then(|voter_id| identity::find_voter(&poll, voter_id))
        .map(|(option, voter)| MyVote {
            voter_id: voter.id.clone(),
            voter_name: voter.name.clone(),
            option_id: option.option_id,
        });

    Ok(ok(PollDetails {
        id: poll.id.clone(),
        title: poll.title.clone(),
        has_password: poll.password.is_some(),
        end_at: poll.end_at,
        is_closed: poll.is_closed,
        created_by: poll.created_by.clone(),
        schedule_id: poll.schedule_id.clone(),
        options,
        total_votes,
        winner_option_id: tally::winning_option(&poll).map(|option| option.option_id),
        ranking: tally::sorted_options(&poll).iter().map(|option| option.option_id).collect(),
        my_vote,
    }))
}

#[derive(Deserialize)]
pub struct VotePayload {
    option_id: i64,
    voter_id: Option<String>,
    voter_name: String,
}

#[derive(Serialize)]
pub struct VoteResult {
    voter_id: String,
    outcome: db::VoteOutcome,
    total_votes: i64,
}

pub async fn submit_vote(
    State(app_state): State<AppState>,
    Path(poll_id): Path<String>,
    Json(payload): Json<VotePayload>,
) -> Result<Json<Value>, AppError> {
    let voter_name = validate_name(&payload.voter_name)?;
    let poll = db::get_poll(&app_state.pool, &poll_id).await?;
    ensure_open("poll", poll.is_closed, poll.end_at)?;

    let voter_id = payload
        .voter_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(identity::new_voter_id);
    let outcome =
        db::vote_poll(&app_state.pool, &poll_id, payload.option_id, &voter_id, &voter_name)
            .await?;
    let total_votes = db::count_votes(&app_state.pool, &poll_id).await?;
    Ok(ok(VoteResult { voter_id, outcome, total_votes }))
}

#[derive(Deserialize)]
pub struct VoterNamePayload {
    voter_id: String,
    name: String,
}

pub async fn update_voter_name(
    State(app_state): State<AppState>,
    Path(poll_id): Path<String>,
    Json(payload): Json<VoterNamePayload>,
) -> Result<Json<Value>, AppError> {
    let name = validate_name(&payload.name)?;
    // Ensure a 404 on the poll itself, not just on the voter row.
    db::get_poll(&app_state.pool, &poll_id).await?;
    db::update_voter_name(&app_state.pool, &poll_id, &payload.voter_id, &name).await?;
    Ok(ok(json!({ "voter_id": payload.voter_id, "name": name })))
}

#[derive(Deserialize)]
pub struct PasswordPayload {
    password: String,
}

pub async fn verify_poll_password(
    State(app_state): State<AppState>,
    Path(poll_id): Path<String>,
    Json(payload): Json<PasswordPayload>,
) -> Result<Json<Value>, AppError> {
    let poll = db::get_poll(&app_state.pool, &poll_id).await?;
    if poll.password.is_none() {
        return Err(AppError::Unauthorized(
            "this action is for the organizer only".to_string(),
        ));
    }
    if !organizer::verify_password(poll.password.as_deref(), &payload.password) {
        return Err(AppError::Unauthorized("incorrect password".to_string()));
    }
    Ok(ok(json!({ "admin_token": poll.admin_token })))
}

pub async fn close_poll(
    State(app_state): State<AppState>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let poll = db::get_poll(&app_state.pool, &poll_id).await?;
    organizer::authorize(&poll.admin_token, admin_token(&headers), poll.password.is_some())?;
    db::set_poll_closed(&app_state.pool, &poll_id, true).await?;
    Ok(ok(json!({ "id": poll_id, "is_closed": true })))
}

pub async fn reopen_poll(
    State(app_state): State<AppState>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let poll = db::get_poll(&app_state.pool, &poll_id).await?;
    organizer::authorize(&poll.admin_token, admin_token(&headers), poll.password.is_some())?;
    db::set_poll_closed(&app_state.pool, &poll_id, false).await?;
    Ok(ok(json!({ "id": poll_id, "is_closed": false })))
}

pub async fn delete_poll(
    State(app_state): State<AppState>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let poll = db::get_poll(&app_state.pool, &poll_id).await?;
    organizer::authorize(&poll.admin_token, admin_token(&headers), poll.password.is_some())?;
    db::delete_poll(&app_state.pool, &poll_id).await?;
    Ok(ok(json!({ "id": poll_id, "deleted": true })))
}

#[derive(Deserialize)]
pub struct CreateSchedulePayload {
    title: String,
    dates: Vec<DateOptionPayload>,
    password: Option<String>,
    end_date: Option<NaiveDate>,
    end_time: Option<String>,
    poll_id: Option<String>,
}

#[derive(Deserialize)]
pub struct DateOptionPayload {
    date: NaiveDate,
    #[serde(default)]
    times: Vec<String>,
}

pub async fn create_schedule(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateSchedulePayload>,
) -> Result<Json<Value>, AppError> {
    let title = validate_title(&payload.title)?;
    let end_at = parse_deadline(payload.end_date, payload.end_time.as_deref())?;

    if payload.dates.is_empty() {
        return Err(AppError::BadRequest("at least one date is required".to_string()));
    }
    let mut dates = Vec::new();
    for date_option in &payload.dates {
        for time in &date_option.times {
            if NaiveTime::parse_from_str(time, "%H:%M").is_err() {
                return Err(AppError::BadRequest(format!("invalid time of day: {time}")));
            }
        }
        dates.push(db::NewDateOption {
            date: date_option.date,
            times: date_option.times.clone(),
        });
    }

    let created = db::create_schedule(
        &app_state.pool,
        db::NewSchedule {
            title,
            dates,
            password: payload.password.filter(|p| !p.is_empty()),
            end_at,
            poll_id: payload.poll_id,
        },
    )
    .await?;
    Ok(ok(CreatedEventResponse { id: created.id, admin_token: created.admin_token }))
}

#[derive(Deserialize)]
pub struct ScheduleQuery {
    respondent_id: Option<String>,
}

#[derive(Serialize)]
pub struct ScheduleDetails {
    id: String,
    title: String,
    has_password: bool,
    end_at: Option<NaiveDateTime>,
    is_closed: bool,
    confirmed_slot: Option<String>,
    poll_id: Option<String>,
    slots: Vec<SlotDetails>,
    best_slot_keys: Vec<String>,
    responses: Vec<ScheduleResponse>,
    my_response: Option<ScheduleResponse>,
}

#[derive(Serialize)]
pub struct SlotDetails {
    date: NaiveDate,
    time: Option<String>,
    key: String,
    available: usize,
    maybe: usize,
    unavailable: usize,
    score: usize,
    is_best: bool,
}

pub async fn get_schedule(
    State(app_state): State<AppState>,
    Path(schedule_id): Path<String>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Value>, AppError> {
    let schedule = db::get_schedule(&app_state.pool, &schedule_id).await?;

    let mut slots = schedule.slots.clone();
    tally::sort_slots(&mut slots);
    if let Some(confirmed) = &schedule.confirmed_slot {
        tally::confirmed_first(&mut slots, confirmed);
    }

    let best = tally::best_slot_keys(&slots, &schedule.responses);
    let slot_details = slots
        .iter()
        .map(|slot| {
            let key = slot.key();
            let summary = tally::summarize(&key, &schedule.responses);
            SlotDetails {
                date: slot.date,
                time: slot.time.clone(),
                is_best: best.contains(&key),
                key,
                available: summary.available,
                maybe: summary.maybe,
                unavailable: summary.unavailable,
                score: tally::score(summary.available, summary.maybe),
            }
        })
        .collect();

    let mut best_slot_keys: Vec<String> = best.into_iter().collect();
    best_slot_keys.sort();

    let my_response = query
        .respondent_id
        .as_deref()
        .and_then(|respondent_id| identity::find_response(&schedule, respondent_id))
        .cloned();

    Ok(ok(ScheduleDetails {
        id: schedule.id.clone(),
        title: schedule.title.clone(),
        has_password: schedule.password.is_some(),
        end_at: schedule.end_at,
        is_closed: schedule.is_closed,
        confirmed_slot: schedule.confirmed_slot.clone(),
        poll_id: schedule.poll_id.clone(),
        slots: slot_details,
        best_slot_keys,
        responses: schedule.responses,
        my_response,
    }))
}

#[derive(Deserialize)]
pub struct SubmitResponsePayload {
    respondent_id: Option<String>,
    name: String,
    availability: HashMap<String, Availability>,
}

#[derive(Serialize)]
pub struct SubmitResponseResult {
    respondent_id: String,
    outcome: db::ResponseOutcome,
}

pub async fn submit_response(
    State(app_state): State<AppState>,
    Path(schedule_id): Path<String>,
    Json(payload): Json<SubmitResponsePayload>,
) -> Result<Json<Value>, AppError> {
    let name = validate_name(&payload.name)?;
    let schedule = db::get_schedule(&app_state.pool, &schedule_id).await?;
    ensure_open("schedule", schedule.is_closed, schedule.end_at)?;

    let valid_keys: std::collections::HashSet<String> =
        schedule.slots.iter().map(|slot| slot.key()).collect();
    for key in payload.availability.keys() {
        if !valid_keys.contains(key) {
            return Err(AppError::BadRequest(format!("unknown slot key: {key}")));
        }
    }

    let respondent_id = payload
        .respondent_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(identity::new_respondent_id);
    let outcome = db::submit_response(
        &app_state.pool,
        &schedule_id,
        &respondent_id,
        &name,
        &payload.availability,
    )
    .await?;
    Ok(ok(SubmitResponseResult { respondent_id, outcome }))
}

pub async fn verify_schedule_password(
    State(app_state): State<AppState>,
    Path(schedule_id): Path<String>,
    Json(payload): Json<PasswordPayload>,
) -> Result<Json<Value>, AppError> {
    let schedule = db::get_schedule(&app_state.pool, &schedule_id).await?;
    if schedule.password.is_none() {
        return Err(AppError::Unauthorized(
            "this action is for the organizer only".to_string(),
        ));
    }
    if !organizer::verify_password(schedule.password.as_deref(), &payload.password) {
        return Err(AppError::Unauthorized("incorrect password".to_string()));
    }
    Ok(ok(json!({ "admin_token": schedule.admin_token })))
}

#[derive(Deserialize)]
pub struct CloseSchedulePayload {
    confirmed_slot: String,
}

pub async fn close_schedule(
    State(app_state): State<AppState>,
    Path(schedule_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CloseSchedulePayload>,
) -> Result<Json<Value>, AppError> {
    let schedule = db::get_schedule(&app_state.pool, &schedule_id).await?;
    organizer::authorize(
        &schedule.admin_token,
        admin_token(&headers),
        schedule.password.is_some(),
    )?;
    if !schedule.slots.iter().any(|slot| slot.key() == payload.confirmed_slot) {
        return Err(AppError::BadRequest(
            "confirmed_slot must be one of the candidate slots".to_string(),
        ));
    }
    db::close_schedule(&app_state.pool, &schedule_id, &payload.confirmed_slot).await?;
    Ok(ok(json!({ "id": schedule_id, "confirmed_slot": payload.confirmed_slot })))
}

pub async fn reopen_schedule(
    State(app_state): State<AppState>,
    Path(schedule_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let schedule = db::get_schedule(&app_state.pool, &schedule_id).await?;
    organizer::authorize(
        &schedule.admin_token,
        admin_token(&headers),
        schedule.password.is_some(),
    )?;
    db::reopen_schedule(&app_state.pool, &schedule_id).await?;
    Ok(ok(json!({ "id": schedule_id, "is_closed": false })))
}

pub async fn delete_schedule(
    State(app_state): State<AppState>,
    Path(schedule_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let schedule = db::get_schedule(&app_state.pool, &schedule_id).await?;
    organizer::authorize(
        &schedule.admin_token,
        admin_token(&headers),
        schedule.password.is_some(),
    )?;
    db::delete_schedule(&app_state.pool, &schedule_id).await?;
    Ok(ok(json!({ "id": schedule_id, "deleted": true })))
}
