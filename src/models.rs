use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::tally;

/// A "vote for an option" event.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Poll {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub end_at: Option<NaiveDateTime>,
    pub is_closed: bool,
    pub created_by: Option<String>,
    pub schedule_id: Option<String>,
    #[serde(skip_serializing)]
    pub admin_token: String,
    #[serde(skip_serializing)]
    pub created_at: NaiveDateTime,
    #[sqlx(skip)]
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollOption {
    pub option_id: i64,
    pub title: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub votes: i64,
    pub voters: Vec<Voter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    pub id: String,
    pub name: String,
}

/// A "pick a date/time" event.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Schedule {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub end_at: Option<NaiveDateTime>,
    pub is_closed: bool,
    pub confirmed_slot: Option<String>,
    pub poll_id: Option<String>,
    #[serde(skip_serializing)]
    pub admin_token: String,
    #[serde(skip_serializing)]
    pub created_at: NaiveDateTime,
    #[sqlx(skip)]
    pub slots: Vec<Slot>,
    #[sqlx(skip)]
    pub responses: Vec<ScheduleResponse>,
}

/// One candidate date/time. A slot with no time covers the whole day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: Option<String>,
}

impl Slot {
    pub fn key(&self) -> String {
        tally::slot_key(self.date, self.time.as_deref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleResponse {
    pub respondent_id: String,
    pub name: String,
    /// Keyed by slot key. A missing key means unavailable.
    pub availability: HashMap<String, Availability>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Maybe,
    Unavailable,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Maybe => "maybe",
            Availability::Unavailable => "unavailable",
        }
    }

    /// Anything unrecognized counts as unavailable.
    pub fn parse(s: &str) -> Availability {
        match s {
            "available" => Availability::Available,
            "maybe" => Availability::Maybe,
            _ => Availability::Unavailable,
        }
    }
}
