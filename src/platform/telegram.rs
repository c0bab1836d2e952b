use std::pin::pin;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use teloxide::payloads::AnswerInlineQuerySetters;
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, InlineQuery, InlineQueryId, InlineQueryResult, InlineQueryResultVoice,
    UpdateKind,
};
use teloxide::update_listeners::{AsUpdateStream, Polling, UpdateListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::platform::{IncomingInlineQuery, IncomingUpdate, InlineAnswerer};
use crate::voice::InlineAnswer;

/// Build the bot over an HTTP client with a fixed request timeout
pub fn build_bot(config: &TelegramConfig) -> Result<Bot> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client for the bot")?;

    Ok(Bot::with_client(&config.bot_token, client))
}

/// Check the token with `getMe`. Returns the bot's username.
pub async fn authenticate(bot: &Bot) -> Result<String> {
    let me = bot
        .get_me()
        .await
        .context("Failed to authenticate bot, cannot start polling")?;

    let username = me.username().to_string();
    info!("Bot authenticated as: @{}", username);
    Ok(username)
}

impl From<InlineQuery> for IncomingInlineQuery {
    fn from(q: InlineQuery) -> Self {
        Self {
            platform: "telegram".to_string(),
            query_id: q.id.0,
            user_id: q.from.id.0,
            user_name: q.from.username,
            query: q.query,
        }
    }
}

/// Convert a raw Telegram update into what the dispatcher consumes
pub fn incoming_update(update: Update) -> IncomingUpdate {
    match update.kind {
        UpdateKind::InlineQuery(q) => IncomingUpdate::InlineQuery(q.into()),
        _ => IncomingUpdate::Other,
    }
}

/// Long-poll Telegram and forward every update onto `updates`.
///
/// Returns once polling has been stopped, either because `shutdown` was
/// cancelled or because the receiving side of `updates` was dropped.
pub async fn run_polling(
    bot: Bot,
    polling_timeout: Duration,
    updates: mpsc::Sender<IncomingUpdate>,
    shutdown: CancellationToken,
) {
    let mut listener = Polling::builder(bot)
        .timeout(polling_timeout)
        .allowed_updates(vec![AllowedUpdate::InlineQuery])
        .build();

    let stop_token = listener.stop_token();
    let mut stream = pin!(listener.as_stream());
    let mut stopping = false;

    info!("Polling for updates...");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled(), if !stopping => {
                debug!("Shutdown requested, stopping update polling");
                stop_token.stop();
                stopping = true;
                continue;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(update)) => {
                if updates.send(incoming_update(update)).await.is_err() && !stopping {
                    debug!("Update receiver closed, stopping update polling");
                    stop_token.stop();
                    stopping = true;
                }
            }
            Some(Err(e)) => warn!("Polling error: {}", e),
            // The listener finishes its last request after `stop()`
            None => break,
        }
    }

    info!("Update polling stopped");
}

/// Answers inline queries through the Bot API
pub struct TelegramAnswerer {
    bot: Bot,
}

impl TelegramAnswerer {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl InlineAnswerer for TelegramAnswerer {
    async fn answer_inline_query(&self, answer: InlineAnswer) -> Result<()> {
        let results = to_telegram_results(&answer)?;

        self.bot
            .answer_inline_query(InlineQueryId(answer.query_id), results)
            .cache_time(answer.cache_time)
            .await
            .context("answerInlineQuery request failed")?;

        Ok(())
    }
}

fn to_telegram_results(answer: &InlineAnswer) -> Result<Vec<InlineQueryResult>> {
    answer
        .results
        .iter()
        .map(|voice| {
            let url = reqwest::Url::parse(&voice.voice_url)
                .with_context(|| format!("Invalid voice URL '{}'", voice.voice_url))?;
            Ok(InlineQueryResult::Voice(InlineQueryResultVoice::new(
                voice.id.clone(),
                url,
                voice.title.clone(),
            )))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::handle_inline_query;
    use crate::voice;
    use serde_json::json;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASE_URL: &str = "https://cdn.example.com/audio";

    /// A bot whose Bot API calls all land on the local wiremock server.
    fn mock_bot(server: &MockServer) -> Bot {
        let config = TelegramConfig {
            bot_token: "123456:test-token".to_string(),
            request_timeout: Duration::from_secs(10),
            polling_timeout: Duration::from_secs(1),
        };
        build_bot(&config)
            .unwrap()
            .set_api_url(reqwest::Url::parse(&server.uri()).unwrap())
    }

    fn api_method(name: &str) -> wiremock::matchers::PathRegexMatcher {
        path_regex(format!(r"(?i)/bot[^/]+/{}$", name))
    }

    fn inline_query_json(id: &str) -> serde_json::Value {
        json!({
            "update_id": 10,
            "inline_query": {
                "id": id,
                "from": { "id": 4242, "is_bot": false, "first_name": "Ann" },
                "query": "",
                "offset": ""
            }
        })
    }

    // Update's deserializer needs a text source; `from_value` yields `UpdateKind::Error`
    fn parse_update(value: serde_json::Value) -> Update {
        serde_json::from_str(&value.to_string()).unwrap()
    }

    #[test]
    fn test_inline_query_update_is_converted() {
        let update = parse_update(json!({
            "update_id": 10,
            "inline_query": {
                "id": "abc123",
                "from": {
                    "id": 4242,
                    "is_bot": false,
                    "first_name": "Ann",
                    "username": "ann"
                },
                "query": "",
                "offset": ""
            }
        }));

        match incoming_update(update) {
            IncomingUpdate::InlineQuery(q) => {
                assert_eq!(q.platform, "telegram");
                assert_eq!(q.query_id, "abc123");
                assert_eq!(q.user_id, 4242);
                assert_eq!(q.user_name.as_deref(), Some("ann"));
                assert_eq!(q.query, "");
            }
            other => panic!("expected inline query, got {:?}", other),
        }
    }

    #[test]
    fn test_text_message_update_is_other() {
        let update = parse_update(json!({
            "update_id": 11,
            "message": {
                "message_id": 1,
                "date": 1700000000,
                "chat": { "id": 4242, "type": "private", "first_name": "Ann" },
                "from": { "id": 4242, "is_bot": false, "first_name": "Ann" },
                "text": "hello"
            }
        }));

        assert!(
            matches!(update.kind, UpdateKind::Message(_)),
            "fixture did not parse as a message: {:?}",
            update.kind
        );
        assert!(matches!(incoming_update(update), IncomingUpdate::Other));
    }

    #[test]
    fn test_voice_result_conversion() {
        let answer = voice::answer_for("abc123", "https://cdn.example.com");
        let results = to_telegram_results(&answer).unwrap();

        assert_eq!(results.len(), 1);
        match &results[0] {
            InlineQueryResult::Voice(v) => {
                assert_eq!(v.voice_url.as_str(), "https://cdn.example.com/greeting.ogg");
                assert_eq!(v.title, "Example Voice");
            }
            other => panic!("expected voice result, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_voice_url_is_an_error() {
        let answer = voice::answer_for("abc123", "not a url");
        let err = to_telegram_results(&answer).unwrap_err().to_string();
        assert!(err.contains("Invalid voice URL"));
    }

    // ── Bot API over HTTP ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_authenticate_returns_username() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(api_method("getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "id": 123456,
                    "is_bot": true,
                    "first_name": "Voice",
                    "username": "voice_bot",
                    "can_join_groups": true,
                    "can_read_all_group_messages": false,
                    "supports_inline_queries": true,
                    "can_connect_to_business": false,
                    "has_main_web_app": false
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let username = authenticate(&mock_bot(&server)).await.unwrap();
        assert_eq!(username, "voice_bot");
    }

    #[tokio::test]
    async fn test_authenticate_rejected_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(api_method("getMe"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "ok": false,
                "error_code": 401,
                "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let err = authenticate(&mock_bot(&server)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("cannot start polling"));
    }

    #[tokio::test]
    async fn test_answer_request_carries_voice_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(api_method("answerInlineQuery"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": true })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let answerer = TelegramAnswerer::new(mock_bot(&server));
        answerer
            .answer_inline_query(voice::answer_for("abc123", BASE_URL))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();

        assert_eq!(body["inline_query_id"], "abc123");
        assert_eq!(body["cache_time"], 0);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["type"], "voice");
        assert_eq!(results[0]["id"], "voice-1");
        assert_eq!(results[0]["title"], "Example Voice");
        assert_eq!(
            results[0]["voice_url"],
            "https://cdn.example.com/audio/greeting.ogg"
        );
    }

    #[tokio::test]
    async fn test_answer_server_error_is_returned_and_logged() {
        let server = MockServer::start().await;
        Mock::given(api_method("answerInlineQuery"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "ok": false,
                "error_code": 500,
                "description": "Internal Server Error"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let answerer = TelegramAnswerer::new(mock_bot(&server));
        let result = answerer
            .answer_inline_query(voice::answer_for("abc123", BASE_URL))
            .await;
        assert!(result.is_err());

        // The handler swallows the failure after logging it
        let query = IncomingInlineQuery {
            platform: "telegram".to_string(),
            query_id: "def456".to_string(),
            user_id: 4242,
            user_name: None,
            query: String::new(),
        };
        handle_inline_query(&answerer, BASE_URL, query).await;
    }

    #[tokio::test]
    async fn test_polling_forwards_inline_queries() {
        let server = MockServer::start().await;
        Mock::given(api_method("getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [inline_query_json("abc123")]
            })))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let polling = tokio::spawn(run_polling(
            mock_bot(&server),
            Duration::from_secs(1),
            tx,
            shutdown.clone(),
        ));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no update forwarded")
            .expect("channel closed");
        match first {
            IncomingUpdate::InlineQuery(q) => assert_eq!(q.query_id, "abc123"),
            other => panic!("expected inline query, got {:?}", other),
        }

        shutdown.cancel();
        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), polling)
            .await
            .expect("polling did not stop")
            .unwrap();
    }
}
