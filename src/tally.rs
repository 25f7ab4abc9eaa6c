//! Pure aggregation over already-fetched event data: vote tallies for polls,
//! availability summaries and best-slot selection for schedules. Nothing here
//! touches the database and nothing here fails; missing counts are zero and
//! missing availability is unavailable.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::models::{Availability, Poll, PollOption, ScheduleResponse, Slot};

pub fn total_votes(poll: &Poll) -> i64 {
    poll.options.iter().map(|option| option.votes.max(0)).sum()
}

/// The option with the most votes, ties broken by first occurrence. With zero
/// votes everywhere this still returns the first option.
pub fn winning_option(poll: &Poll) -> Option<&PollOption> {
    poll.options.iter().fold(None, |winner, option| match winner {
        Some(best) if option.votes <= best.votes => winner,
        _ => Some(option),
    })
}

pub fn vote_percentage(votes: i64, total: i64) -> f64 {
    if total > 0 {
        votes.max(0) as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

/// Options in results order: descending votes, ties keep creation order.
pub fn sorted_options(poll: &Poll) -> Vec<&PollOption> {
    let mut options: Vec<&PollOption> = poll.options.iter().collect();
    options.sort_by(|a, b| b.votes.cmp(&a.votes));
    options
}

/// `YYYY-MM-DD` for a whole-day slot, `YYYY-MM-DD_HH:mm` otherwise. Dates
/// contain no underscore, so the key is unique per (date, time) pair.
pub fn slot_key(date: NaiveDate, time: Option<&str>) -> String {
    match time {
        Some(time) => format!("{}_{}", date.format("%Y-%m-%d"), time),
        None => date.format("%Y-%m-%d").to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSummary {
    pub available: usize,
    pub maybe: usize,
    pub unavailable: usize,
}

/// Per-slot response counts. Respondents who did not mark the slot count as
/// unavailable, so the three fields always sum to `responses.len()`.
pub fn summarize(slot_key: &str, responses: &[ScheduleResponse]) -> SlotSummary {
    let mut summary = SlotSummary { available: 0, maybe: 0, unavailable: 0 };
    for response in responses {
        match response.availability.get(slot_key).copied().unwrap_or(Availability::Unavailable) {
            Availability::Available => summary.available += 1,
            Availability::Maybe => summary.maybe += 1,
            Availability::Unavailable => summary.unavailable += 1,
        }
    }
    summary
}

/// The ranking metric: full availability weighs twice a tentative one.
pub fn score(available: usize, maybe: usize) -> usize {
    available * 2 + maybe
}

/// Keys of the slots achieving the maximum score, provided that maximum is
/// positive. An all-zero tie means nobody can make anything, which is not a
/// recommendation.
pub fn best_slot_keys(slots: &[Slot], responses: &[ScheduleResponse]) -> HashSet<String> {
    if responses.is_empty() {
        return HashSet::new();
    }
    let scored: Vec<(String, usize)> = slots
        .iter()
        .map(|slot| {
            let key = slot.key();
            let summary = summarize(&key, responses);
            let score = score(summary.available, summary.maybe);
            (key, score)
        })
        .collect();
    let max = scored.iter().map(|(_, score)| *score).max().unwrap_or(0);
    if max == 0 {
        return HashSet::new();
    }
    scored
        .into_iter()
        .filter(|(_, score)| *score == max)
        .map(|(key, _)| key)
        .collect()
}

/// Display order: ascending date, then lexical time. Times are zero-padded
/// `HH:mm`, so lexical order is chronological; a whole-day slot sorts before
/// the timed slots of its date.
pub fn sort_slots(slots: &mut [Slot]) {
    slots.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.time.as_deref().unwrap_or("").cmp(b.time.as_deref().unwrap_or("")))
    });
}

/// Stable reorder putting the confirmed slot first for the result view.
pub fn confirmed_first(slots: &mut [Slot], confirmed_key: &str) {
    slots.sort_by_key(|slot| slot.key() != confirmed_key);
}
