//! Participant identity. Ids are minted server-side on first contact and
//! handed back to the client, which keeps them in browser storage and sends
//! them with every later submission (there are no accounts).

use chrono::Utc;
use nanoid::nanoid;

use crate::models::{Poll, PollOption, Schedule, ScheduleResponse, Voter};

const SUFFIX_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// `<prefix>_<millis>_<alnum9>`. The prefix keeps voter and respondent ids in
/// disjoint namespaces.
fn participant_id(prefix: &str) -> String {
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), nanoid!(9, &SUFFIX_ALPHABET))
}

pub fn new_voter_id() -> String {
    participant_id("voter")
}

pub fn new_respondent_id() -> String {
    participant_id("resp")
}

/// Looks the voter up among the poll's current participants. `None` means the
/// client's remembered id is stale (vote cancelled, or votes reset) and its
/// local record should be dropped.
pub fn find_voter<'a>(poll: &'a Poll, voter_id: &str) -> Option<(&'a PollOption, &'a Voter)> {
    poll.options.iter().find_map(|option| {
        option.voters.iter().find(|voter| voter.id == voter_id).map(|voter| (option, voter))
    })
}

/// Same stale-or-current lookup for schedule respondents.
pub fn find_response<'a>(
    schedule: &'a Schedule,
    respondent_id: &str,
) -> Option<&'a ScheduleResponse> {
    schedule.responses.iter().find(|response| response.respondent_id == respondent_id)
}
