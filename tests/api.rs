use anyhow::Result;
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;

use quorum::{db, router, state::AppState};

async fn spawn_server() -> Result<String> {
    // One connection keeps the whole server on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    db::init(&pool).await?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(AppState { pool });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok(format!("http://{addr}"))
}

// httpc-test has no per-request headers, so organizer calls go through reqwest.
async fn post_with_token(url: &str, token: &str, body: Value) -> Result<(u16, Value)> {
    let response = reqwest::Client::new()
        .post(url)
        .header("x-admin-token", token)
        .json(&body)
        .send()
        .await?;
    let status = response.status().as_u16();
    Ok((status, response.json().await?))
}

async fn delete_with_token(url: &str, token: &str) -> Result<(u16, Value)> {
    let response = reqwest::Client::new()
        .delete(url)
        .header("x-admin-token", token)
        .send()
        .await?;
    let status = response.status().as_u16();
    Ok((status, response.json().await?))
}

fn lunch_poll_body() -> Value {
    json!({
        "title": "friday lunch",
        "options": [
            { "title": "ramen" },
            { "title": "sushi", "url": "https://example.com/sushi", "description": "a bit pricey" },
            { "title": "" },
            { "title": "curry" }
        ]
    })
}

fn offsite_body() -> Value {
    json!({
        "title": "team offsite",
        "dates": [
            { "date": "2026-09-05", "times": ["18:00", "19:30"] },
            { "date": "2026-09-07" }
        ]
    })
}

#[tokio::test]
async fn poll_voting_flow() -> Result<()> {
    let base = spawn_server().await?;
    let hc = httpc_test::new_client(&base)?;

    let created = hc.do_post("/api/polls", lunch_poll_body()).await?;
    assert_eq!(created.status().as_u16(), 200);
    let created = created.json_body()?;
    assert_eq!(created["success"], json!(true));
    let poll_id = created["data"]["id"].as_str().unwrap().to_string();

    // The blank option row was dropped: three options survive.
    let poll = hc.do_get(&format!("/api/polls/{poll_id}")).await?.json_body()?;
    let data = &poll["data"];
    assert_eq!(data["options"].as_array().unwrap().len(), 3);
    assert_eq!(data["has_password"], json!(false));
    assert_eq!(data["total_votes"], json!(0));
    assert_eq!(data["my_vote"], Value::Null);

    // First vote mints a voter id.
    let vote = hc
        .do_post(
            &format!("/api/polls/{poll_id}/votes"),
            json!({ "option_id": 2, "voter_name": "alice" }),
        )
        .await?
        .json_body()?;
    assert_eq!(vote["data"]["outcome"], json!("voted"));
    assert_eq!(vote["data"]["total_votes"], json!(1));
    let voter_id = vote["data"]["voter_id"].as_str().unwrap().to_string();
    assert!(voter_id.starts_with("voter_"));

    // Changing the option moves the single membership.
    let vote = hc
        .do_post(
            &format!("/api/polls/{poll_id}/votes"),
            json!({ "option_id": 1, "voter_id": voter_id, "voter_name": "alice" }),
        )
        .await?
        .json_body()?;
    assert_eq!(vote["data"]["outcome"], json!("changed"));
    assert_eq!(vote["data"]["total_votes"], json!(1));

    // A second voter; the tally and ranking follow.
    let vote = hc
        .do_post(
            &format!("/api/polls/{poll_id}/votes"),
            json!({ "option_id": 1, "voter_name": "bob" }),
        )
        .await?
        .json_body()?;
    assert_eq!(vote["data"]["outcome"], json!("voted"));

    let poll = hc
        .do_get(&format!("/api/polls/{poll_id}?voter_id={voter_id}"))
        .await?
        .json_body()?;
    let data = &poll["data"];
    assert_eq!(data["total_votes"], json!(2));
    assert_eq!(data["winner_option_id"], json!(1));
    assert_eq!(data["ranking"][0], json!(1));
    assert_eq!(data["my_vote"]["option_id"], json!(1));
    assert_eq!(data["options"][0]["votes"], json!(2));
    assert_eq!(data["options"][0]["percentage"], json!(100.0));

    // Renaming relabels the same voter id everywhere.
    let renamed = hc
        .do_post(
            &format!("/api/polls/{poll_id}/voter-name"),
            json!({ "voter_id": voter_id, "name": "alicia" }),
        )
        .await?
        .json_body()?;
    assert_eq!(renamed["success"], json!(true));
    let poll = hc
        .do_get(&format!("/api/polls/{poll_id}?voter_id={voter_id}"))
        .await?
        .json_body()?;
    assert_eq!(poll["data"]["my_vote"]["voter_name"], json!("alicia"));

    // Voting again for the held option cancels, and the stale id no longer
    // resolves to a local record.
    let vote = hc
        .do_post(
            &format!("/api/polls/{poll_id}/votes"),
            json!({ "option_id": 1, "voter_id": voter_id, "voter_name": "alicia" }),
        )
        .await?
        .json_body()?;
    assert_eq!(vote["data"]["outcome"], json!("cancelled"));
    let poll = hc
        .do_get(&format!("/api/polls/{poll_id}?voter_id={voter_id}"))
        .await?
        .json_body()?;
    assert_eq!(poll["data"]["my_vote"], Value::Null);
    assert_eq!(poll["data"]["total_votes"], json!(1));

    Ok(())
}

#[tokio::test]
async fn organizer_password_flow() -> Result<()> {
    let base = spawn_server().await?;
    let hc = httpc_test::new_client(&base)?;

    let mut body = lunch_poll_body();
    body["password"] = json!("abcd");
    let created = hc.do_post("/api/polls", body).await?.json_body()?;
    let poll_id = created["data"]["id"].as_str().unwrap().to_string();
    let minted_token = created["data"]["admin_token"].as_str().unwrap().to_string();

    let poll = hc.do_get(&format!("/api/polls/{poll_id}")).await?.json_body()?;
    assert_eq!(poll["data"]["has_password"], json!(true));

    // Without the token the close is refused but the password dialog applies.
    let refused = hc.do_post(&format!("/api/polls/{poll_id}/close"), json!({})).await?;
    assert_eq!(refused.status().as_u16(), 401);
    let refused = refused.json_body()?;
    assert_eq!(refused["success"], json!(false));
    assert_eq!(refused["error"], json!("password required"));

    // A wrong password keeps the prompt open.
    let wrong = hc
        .do_post(&format!("/api/polls/{poll_id}/verify-password"), json!({ "password": "wrong" }))
        .await?;
    assert_eq!(wrong.status().as_u16(), 401);
    assert_eq!(wrong.json_body()?["error"], json!("incorrect password"));

    // The right password yields the same token minted at creation.
    let verified = hc
        .do_post(&format!("/api/polls/{poll_id}/verify-password"), json!({ "password": "abcd" }))
        .await?
        .json_body()?;
    assert_eq!(verified["success"], json!(true));
    let token = verified["data"]["admin_token"].as_str().unwrap().to_string();
    assert_eq!(token, minted_token);

    let (status, closed) =
        post_with_token(&format!("{base}/api/polls/{poll_id}/close"), &token, json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(closed["data"]["is_closed"], json!(true));

    // A closed poll takes no votes.
    let vote = hc
        .do_post(
            &format!("/api/polls/{poll_id}/votes"),
            json!({ "option_id": 1, "voter_name": "carol" }),
        )
        .await?;
    assert_eq!(vote.status().as_u16(), 400);

    let (status, _) =
        post_with_token(&format!("{base}/api/polls/{poll_id}/reopen"), &token, json!({})).await?;
    assert_eq!(status, 200);
    let vote = hc
        .do_post(
            &format!("/api/polls/{poll_id}/votes"),
            json!({ "option_id": 1, "voter_name": "carol" }),
        )
        .await?;
    assert_eq!(vote.status().as_u16(), 200);

    let (status, _) = delete_with_token(&format!("{base}/api/polls/{poll_id}"), &token).await?;
    assert_eq!(status, 200);
    let gone = hc.do_get(&format!("/api/polls/{poll_id}")).await?;
    assert_eq!(gone.status().as_u16(), 404);
    assert_eq!(gone.json_body()?["success"], json!(false));

    Ok(())
}

#[tokio::test]
async fn passwordless_events_deny_non_organizers_outright() -> Result<()> {
    let base = spawn_server().await?;
    let hc = httpc_test::new_client(&base)?;

    let created = hc.do_post("/api/polls", lunch_poll_body()).await?.json_body()?;
    let poll_id = created["data"]["id"].as_str().unwrap().to_string();
    let token = created["data"]["admin_token"].as_str().unwrap().to_string();

    let refused = hc.do_post(&format!("/api/polls/{poll_id}/close"), json!({})).await?;
    assert_eq!(refused.status().as_u16(), 401);
    assert_eq!(refused.json_body()?["error"], json!("this action is for the organizer only"));

    // No password to exchange either.
    let verify = hc
        .do_post(&format!("/api/polls/{poll_id}/verify-password"), json!({ "password": "anything" }))
        .await?;
    assert_eq!(verify.status().as_u16(), 401);

    // The creator still can, with the token from creation.
    let (status, _) =
        post_with_token(&format!("{base}/api/polls/{poll_id}/close"), &token, json!({})).await?;
    assert_eq!(status, 200);

    Ok(())
}

#[tokio::test]
async fn schedule_response_flow() -> Result<()> {
    let base = spawn_server().await?;
    let hc = httpc_test::new_client(&base)?;

    let created = hc.do_post("/api/schedules", offsite_body()).await?.json_body()?;
    assert_eq!(created["success"], json!(true));
    let schedule_id = created["data"]["id"].as_str().unwrap().to_string();
    let token = created["data"]["admin_token"].as_str().unwrap().to_string();

    // Dates flattened to slots in chronological order.
    let schedule = hc.do_get(&format!("/api/schedules/{schedule_id}")).await?.json_body()?;
    let keys: Vec<&str> = schedule["data"]["slots"]
        .as_array()
        .unwrap()
        .iter()
        .map(|slot| slot["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["2026-09-05_18:00", "2026-09-05_19:30", "2026-09-07"]);
    assert_eq!(schedule["data"]["best_slot_keys"], json!([]));

    // First response mints a respondent id.
    let submitted = hc
        .do_post(
            &format!("/api/schedules/{schedule_id}/responses"),
            json!({
                "name": "alice",
                "availability": {
                    "2026-09-05_18:00": "available",
                    "2026-09-05_19:30": "maybe",
                    "2026-09-07": "unavailable"
                }
            }),
        )
        .await?
        .json_body()?;
    assert_eq!(submitted["data"]["outcome"], json!("registered"));
    let respondent_id = submitted["data"]["respondent_id"].as_str().unwrap().to_string();
    assert!(respondent_id.starts_with("resp_"));

    // Editing resubmits under the same id; the response count stays at one.
    let submitted = hc
        .do_post(
            &format!("/api/schedules/{schedule_id}/responses"),
            json!({
                "respondent_id": respondent_id,
                "name": "alice",
                "availability": {
                    "2026-09-05_18:00": "available",
                    "2026-09-05_19:30": "available",
                    "2026-09-07": "maybe"
                }
            }),
        )
        .await?
        .json_body()?;
    assert_eq!(submitted["data"]["outcome"], json!("updated"));

    let bob = hc
        .do_post(
            &format!("/api/schedules/{schedule_id}/responses"),
            json!({
                "name": "bob",
                "availability": { "2026-09-05_18:00": "available" }
            }),
        )
        .await?
        .json_body()?;
    assert_eq!(bob["data"]["outcome"], json!("registered"));

    let schedule = hc
        .do_get(&format!("/api/schedules/{schedule_id}?respondent_id={respondent_id}"))
        .await?
        .json_body()?;
    let data = &schedule["data"];
    assert_eq!(data["responses"].as_array().unwrap().len(), 2);
    assert_eq!(data["my_response"]["name"], json!("alice"));

    // 18:00 has 2 available (score 4) and wins over 19:30 (score 2).
    let slots = data["slots"].as_array().unwrap();
    let first = &slots[0];
    assert_eq!(first["key"], json!("2026-09-05_18:00"));
    assert_eq!(first["available"], json!(2));
    assert_eq!(first["score"], json!(4));
    assert_eq!(first["is_best"], json!(true));
    assert_eq!(data["best_slot_keys"], json!(["2026-09-05_18:00"]));
    let whole_day = &slots[2];
    assert_eq!(whole_day["maybe"], json!(1));
    assert_eq!(whole_day["unavailable"], json!(1));

    // Confirming requires a real slot key.
    let (status, bogus) = post_with_token(
        &format!("{base}/api/schedules/{schedule_id}/close"),
        &token,
        json!({ "confirmed_slot": "2026-12-31" }),
    )
    .await?;
    assert_eq!(status, 400);
    assert_eq!(bogus["success"], json!(false));

    let (status, closed) = post_with_token(
        &format!("{base}/api/schedules/{schedule_id}/close"),
        &token,
        json!({ "confirmed_slot": "2026-09-07" }),
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(closed["data"]["confirmed_slot"], json!("2026-09-07"));

    // The confirmed slot leads the result view, and responses are frozen.
    let schedule = hc.do_get(&format!("/api/schedules/{schedule_id}")).await?.json_body()?;
    assert_eq!(schedule["data"]["is_closed"], json!(true));
    assert_eq!(schedule["data"]["slots"][0]["key"], json!("2026-09-07"));
    let frozen = hc
        .do_post(
            &format!("/api/schedules/{schedule_id}/responses"),
            json!({ "name": "late", "availability": {} }),
        )
        .await?;
    assert_eq!(frozen.status().as_u16(), 400);

    let (status, _) = post_with_token(
        &format!("{base}/api/schedules/{schedule_id}/reopen"),
        &token,
        json!({}),
    )
    .await?;
    assert_eq!(status, 200);
    let schedule = hc.do_get(&format!("/api/schedules/{schedule_id}")).await?.json_body()?;
    assert_eq!(schedule["data"]["is_closed"], json!(false));
    assert_eq!(schedule["data"]["confirmed_slot"], Value::Null);

    let (status, _) =
        delete_with_token(&format!("{base}/api/schedules/{schedule_id}"), &token).await?;
    assert_eq!(status, 200);
    let gone = hc.do_get(&format!("/api/schedules/{schedule_id}")).await?;
    assert_eq!(gone.status().as_u16(), 404);

    Ok(())
}

#[tokio::test]
async fn validation_rejects_malformed_input() -> Result<()> {
    let base = spawn_server().await?;
    let hc = httpc_test::new_client(&base)?;

    // Too few usable options: blank titles do not count.
    let res = hc
        .do_post(
            "/api/polls",
            json!({ "title": "lunch", "options": [{ "title": "ramen" }, { "title": "  " }] }),
        )
        .await?;
    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(res.json_body()?["success"], json!(false));

    let res = hc
        .do_post(
            "/api/polls",
            json!({ "title": "", "options": [{ "title": "a" }, { "title": "b" }] }),
        )
        .await?;
    assert_eq!(res.status().as_u16(), 400);

    let seven: Vec<Value> = (0..7).map(|i| json!({ "title": format!("option {i}") })).collect();
    let res = hc.do_post("/api/polls", json!({ "title": "lunch", "options": seven })).await?;
    assert_eq!(res.status().as_u16(), 400);

    let res = hc.do_post("/api/schedules", json!({ "title": "offsite", "dates": [] })).await?;
    assert_eq!(res.status().as_u16(), 400);

    // A deadline in the past is rejected at creation.
    let res = hc
        .do_post(
            "/api/polls",
            json!({
                "title": "lunch",
                "options": [{ "title": "a" }, { "title": "b" }],
                "end_date": "2020-01-01",
                "end_time": "12:00"
            }),
        )
        .await?;
    assert_eq!(res.status().as_u16(), 400);

    // Unknown slot keys never reach storage.
    let created = hc.do_post("/api/schedules", offsite_body()).await?.json_body()?;
    let schedule_id = created["data"]["id"].as_str().unwrap();
    let res = hc
        .do_post(
            &format!("/api/schedules/{schedule_id}/responses"),
            json!({ "name": "alice", "availability": { "2030-01-01": "available" } }),
        )
        .await?;
    assert_eq!(res.status().as_u16(), 400);

    // Voting needs a name.
    let created = hc.do_post("/api/polls", lunch_poll_body()).await?.json_body()?;
    let poll_id = created["data"]["id"].as_str().unwrap();
    let res = hc
        .do_post(
            &format!("/api/polls/{poll_id}/votes"),
            json!({ "option_id": 1, "voter_name": "" }),
        )
        .await?;
    assert_eq!(res.status().as_u16(), 400);

    Ok(())
}
