use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{BetRow, GameId, GameRow, Participant, PlayerRoundState};
use crate::store::entity::{bets, game_participants, games, player_states};
use crate::tokio_tools::spawn_game_task;

use super::{ChangeEvent, ChangeFeed, FeedSubscription};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const LOG_TARGET: &str = "feed::realtime";
const PROTOCOL_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
pub struct SupabaseRealtimeFeedConfig {
    /// Base realtime endpoint, e.g. `wss://<project>.supabase.co/realtime/v1`.
    pub realtime_url: Url,
    pub api_key: String,
    pub schema: String,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub broadcast_capacity: usize,
}

impl SupabaseRealtimeFeedConfig {
    pub fn new(realtime_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            realtime_url,
            api_key: api_key.into(),
            schema: "public".to_string(),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(5),
            broadcast_capacity: 64,
        }
    }

    pub fn topic(&self, game_id: GameId) -> String {
        format!("realtime:{}:game-{}", self.schema, game_id)
    }

    /// Websocket endpoint with the api key and protocol version attached.
    pub fn socket_url(&self) -> Url {
        let mut url = self.realtime_url.clone();
        if !url.path().trim_end_matches('/').ends_with("/websocket") {
            let path = format!("{}/websocket", url.path().trim_end_matches('/'));
            url.set_path(&path);
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", PROTOCOL_VERSION);
        url
    }
}

/// Change feed over Supabase Realtime. Each subscription opens its own
/// socket, joined to `postgres_changes` on the four game tables filtered to
/// one game, and reconnects until the subscription is dropped.
#[derive(Debug, Clone)]
pub struct SupabaseRealtimeFeed {
    cfg: SupabaseRealtimeFeedConfig,
}

impl SupabaseRealtimeFeed {
    pub fn new(cfg: SupabaseRealtimeFeedConfig) -> Self {
        Self { cfg }
    }
}

impl ChangeFeed for SupabaseRealtimeFeed {
    fn subscribe(&self, game_id: GameId) -> FeedSubscription {
        let stop = CancellationToken::new();
        let (client, rx) = GameChangesClient::new(self.cfg.clone(), game_id, stop.clone());
        spawn_game_task("realtime", game_id, async move {
            if let Err(err) = client.run().await {
                warn!(target: LOG_TARGET, game_id = %game_id, error = %err, "realtime client exited");
            }
        });
        FeedSubscription::with_stop(rx, stop)
    }
}

struct GameChangesClient {
    cfg: SupabaseRealtimeFeedConfig,
    game_id: GameId,
    topic: String,
    tx: broadcast::Sender<ChangeEvent>,
    stop: CancellationToken,
}

impl GameChangesClient {
    fn new(
        cfg: SupabaseRealtimeFeedConfig,
        game_id: GameId,
        stop: CancellationToken,
    ) -> (Self, broadcast::Receiver<ChangeEvent>) {
        let (tx, rx) = broadcast::channel(cfg.broadcast_capacity);
        let topic = cfg.topic(game_id);
        (
            Self {
                cfg,
                game_id,
                topic,
                tx,
                stop,
            },
            rx,
        )
    }

    async fn run(self) -> Result<()> {
        info!(
            target: LOG_TARGET,
            url = %self.cfg.realtime_url,
            game_id = %self.game_id,
            "starting Supabase realtime subscription"
        );
        while !self.stop.is_cancelled() {
            match self.connect().await {
                Ok(stream) => {
                    if let Err(err) = self.pump(stream).await {
                        warn!(target: LOG_TARGET, error = %err, "realtime stream ended with error");
                    }
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed to connect to Supabase realtime");
                }
            }

            if self.stop.is_cancelled() {
                break;
            }

            debug!(
                target: LOG_TARGET,
                delay_secs = self.cfg.reconnect_delay.as_secs_f32(),
                "waiting before reconnect attempt"
            );
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = sleep(self.cfg.reconnect_delay) => {}
            }
        }

        info!(target: LOG_TARGET, game_id = %self.game_id, "Supabase realtime subscription stopped");
        Ok(())
    }

    async fn connect(&self) -> Result<WsStream> {
        let ws_url = self.cfg.socket_url().to_string();
        let (stream, _) = timeout(self.cfg.handshake_timeout, connect_async(ws_url))
            .await
            .context("Supabase realtime handshake timed out")?
            .context("Supabase realtime handshake failed")?;
        Ok(stream)
    }

    async fn pump(&self, stream: WsStream) -> Result<()> {
        let (mut sink, mut source) = stream.split();

        sink.send(Message::Text(self.join_message()?))
            .await
            .context("failed to send join message")?;

        let mut heartbeat = interval(self.cfg.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let heartbeat_msg = heartbeat_message()?;
        let mut joined = false;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!(target: LOG_TARGET, "subscription dropped");
                    break;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = sink.send(Message::Text(heartbeat_msg.clone())).await {
                        warn!(target: LOG_TARGET, error = %err, "heartbeat send failed, ending loop");
                        break;
                    }
                }
                msg = source.next() => {
                    match msg {
                        Some(Ok(Message::Text(txt))) => {
                            if let Err(err) = self.handle_text(&mut joined, &txt) {
                                warn!(target: LOG_TARGET, error = %err, "failed to handle realtime message");
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            sink.send(Message::Pong(payload)).await.ok();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(target: LOG_TARGET, ?frame, "socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(target: LOG_TARGET, error = %err, "websocket error");
                            break;
                        }
                        None => {
                            debug!(target: LOG_TARGET, "websocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        if let Ok(leave) = leave_message(self.topic.clone()) {
            sink.send(Message::Text(leave)).await.ok();
        }
        let _ = sink.close().await;
        Ok(())
    }

    fn handle_text(&self, joined: &mut bool, txt: &str) -> Result<()> {
        let message: IncomingMessage<Value> =
            serde_json::from_str(txt).context("failed to deserialize realtime message")?;

        match message.event.as_str() {
            "phx_reply" if message.topic == self.topic => {
                if let Some(payload) = message.payload {
                    let reply: ReplyPayload = serde_json::from_value(payload)
                        .context("failed to decode phx_reply payload")?;
                    if reply.status == "ok" {
                        if !*joined {
                            debug!(target: LOG_TARGET, game_id = %self.game_id, "subscription acknowledged");
                        }
                        *joined = true;
                    } else {
                        warn!(target: LOG_TARGET, status = reply.status, "subscription rejected");
                    }
                }
            }
            "postgres_changes" => {
                if !*joined {
                    debug!(target: LOG_TARGET, "ignoring change before join ack");
                    return Ok(());
                }
                if let Some(payload) = message.payload {
                    let payload: PgPayload<Change> = serde_json::from_value(payload)
                        .context("failed to parse postgres change payload")?;
                    if let Some(event) = payload.data.map(decode_change).transpose()?.flatten() {
                        // receivers come and go with the session
                        let _ = self.tx.send(event);
                    }
                }
            }
            other => {
                debug!(target: LOG_TARGET, event = other, "ignoring realtime event");
            }
        }

        Ok(())
    }

    fn join_message(&self) -> Result<String> {
        let game_filter = format!("id=eq.{}", self.game_id);
        let child_filter = format!("game_id=eq.{}", self.game_id);
        let schema = self.cfg.schema.as_str();
        let payload = JoinPayload {
            access_token: &self.cfg.api_key,
            user_token: &self.cfg.api_key,
            config: JoinConfig {
                postgres_changes: vec![
                    PostgresChange {
                        event: "*",
                        schema,
                        table: "games",
                        filter: &game_filter,
                    },
                    PostgresChange {
                        event: "*",
                        schema,
                        table: "game_participants",
                        filter: &child_filter,
                    },
                    PostgresChange {
                        event: "*",
                        schema,
                        table: "bets",
                        filter: &child_filter,
                    },
                    PostgresChange {
                        event: "*",
                        schema,
                        table: "player_states",
                        filter: &child_filter,
                    },
                ],
            },
        };

        encode_message(&PhoenixEnvelope {
            topic: self.topic.clone(),
            event: "phx_join",
            reference: "1",
            payload,
        })
    }
}

/// Maps one `postgres_changes` record onto a feed event. Deletes other than
/// the game's own carry nothing a session acts on.
fn decode_change(change: Change) -> Result<Option<ChangeEvent>> {
    let deleted = change.event_type.eq_ignore_ascii_case("DELETE");

    if deleted {
        if change.table != "games" {
            return Ok(None);
        }
        let id = change
            .old
            .as_ref()
            .and_then(|old| old.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("game delete without old id"))?;
        let id = GameId::parse_str(id).context("game delete with malformed id")?;
        return Ok(Some(ChangeEvent::GameDeleted(id)));
    }

    let new_row = change
        .new
        .ok_or_else(|| anyhow!("change payload missing `new` record"))?;

    let event = match change.table.as_str() {
        "games" => {
            let model: games::Model =
                serde_json::from_value(new_row).context("failed to deserialize games row")?;
            ChangeEvent::Game(GameRow::try_from(model)?)
        }
        "game_participants" => {
            let model: game_participants::Model = serde_json::from_value(new_row)
                .context("failed to deserialize game_participants row")?;
            ChangeEvent::Participant(Participant::from(model))
        }
        "bets" => {
            let model: bets::Model =
                serde_json::from_value(new_row).context("failed to deserialize bets row")?;
            ChangeEvent::Bet(BetRow::try_from(model)?)
        }
        "player_states" => {
            let model: player_states::Model = serde_json::from_value(new_row)
                .context("failed to deserialize player_states row")?;
            ChangeEvent::PlayerState(PlayerRoundState::try_from(model)?)
        }
        other => {
            debug!(target: LOG_TARGET, table = other, "change on unexpected table");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn heartbeat_message() -> Result<String> {
    encode_message(&PhoenixEnvelope {
        topic: "phoenix".to_string(),
        event: "heartbeat",
        reference: "hb",
        payload: EmptyPayload {},
    })
}

fn leave_message(topic: String) -> Result<String> {
    encode_message(&PhoenixEnvelope {
        topic,
        event: "phx_leave",
        reference: "2",
        payload: EmptyPayload {},
    })
}

fn encode_message<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to serialize realtime message")
}

#[derive(serde::Serialize)]
struct PhoenixEnvelope<T> {
    topic: String,
    event: &'static str,
    #[serde(rename = "ref")]
    reference: &'static str,
    payload: T,
}

#[derive(serde::Serialize)]
struct EmptyPayload {}

#[derive(serde::Serialize)]
struct JoinPayload<'a> {
    access_token: &'a str,
    user_token: &'a str,
    config: JoinConfig<'a>,
}

#[derive(serde::Serialize)]
struct JoinConfig<'a> {
    postgres_changes: Vec<PostgresChange<'a>>,
}

#[derive(serde::Serialize)]
struct PostgresChange<'a> {
    event: &'a str,
    schema: &'a str,
    table: &'a str,
    filter: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct IncomingMessage<T = Value> {
    topic: String,
    event: String,
    payload: Option<T>,
}

#[derive(Debug, serde::Deserialize)]
struct PgPayload<T> {
    data: Option<T>,
}

#[derive(Debug, serde::Deserialize)]
struct Change {
    #[serde(default)]
    table: String,
    #[serde(rename = "eventType", alias = "type")]
    event_type: String,
    #[serde(alias = "record")]
    new: Option<Value>,
    #[serde(default, alias = "old_record")]
    old: Option<Value>,
}

#[derive(Debug, serde::Deserialize)]
struct ReplyPayload {
    status: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const GAME: &str = "3f2a9c01-7b44-4d2e-9a55-0c1d2e3f4a5b";

    fn client() -> (GameChangesClient, broadcast::Receiver<ChangeEvent>) {
        let cfg = SupabaseRealtimeFeedConfig::new(
            Url::parse("wss://project.supabase.co/realtime/v1").unwrap(),
            "anon",
        );
        GameChangesClient::new(cfg, GameId::parse_str(GAME).unwrap(), CancellationToken::new())
    }

    fn change_message(topic: &str, table: &str, event_type: &str, new: Value, old: Value) -> String {
        json!({
            "topic": topic,
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "data": {
                    "schema": "public",
                    "table": table,
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "eventType": event_type,
                    "new": new,
                    "old": old
                }
            }
        })
        .to_string()
    }

    #[test]
    fn socket_url_carries_key_and_version() {
        let cfg = SupabaseRealtimeFeedConfig::new(
            Url::parse("wss://project.supabase.co/realtime/v1").unwrap(),
            "anon",
        );
        assert_eq!(
            cfg.socket_url().as_str(),
            "wss://project.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn join_subscribes_to_all_game_tables() {
        let (client, _rx) = client();
        let join: Value = serde_json::from_str(&client.join_message().unwrap()).unwrap();
        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["topic"], format!("realtime:public:game-{GAME}"));

        let changes = join["payload"]["config"]["postgres_changes"].as_array().unwrap();
        let tables: Vec<&str> = changes.iter().map(|c| c["table"].as_str().unwrap()).collect();
        assert_eq!(tables, ["games", "game_participants", "bets", "player_states"]);
        assert_eq!(changes[0]["filter"], format!("id=eq.{GAME}"));
        assert_eq!(changes[2]["filter"], format!("game_id=eq.{GAME}"));
    }

    #[test]
    fn changes_before_join_ack_are_dropped() {
        let (client, mut rx) = client();
        let mut joined = false;
        let bet = json!({
            "game_id": GAME,
            "user_id": "00000000-0000-4000-8000-000000000001",
            "horse_number": 2,
            "amount": 0.6,
            "chips": 3
        });
        let msg = change_message(&client.topic, "bets", "INSERT", bet, Value::Null);

        client.handle_text(&mut joined, &msg).unwrap();
        assert!(rx.try_recv().is_err());

        let ack = json!({
            "topic": client.topic,
            "event": "phx_reply",
            "ref": "1",
            "payload": {"status": "ok", "response": {}}
        })
        .to_string();
        client.handle_text(&mut joined, &ack).unwrap();
        assert!(joined);

        client.handle_text(&mut joined, &msg).unwrap();
        match rx.try_recv().unwrap() {
            ChangeEvent::Bet(bet) => {
                assert_eq!(bet.horse_number, 2);
                assert_eq!(bet.chips, 3);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn game_delete_uses_the_old_record() {
        let (client, mut rx) = client();
        let mut joined = true;
        let msg = change_message(
            &client.topic,
            "games",
            "DELETE",
            Value::Null,
            json!({ "id": GAME }),
        );
        client.handle_text(&mut joined, &msg).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChangeEvent::GameDeleted(id) if id.to_string() == GAME
        ));
    }

    #[test]
    fn player_state_rows_decode() {
        let change = Change {
            table: "player_states".into(),
            event_type: "UPDATE".into(),
            new: Some(json!({
                "game_id": GAME,
                "user_id": "00000000-0000-4000-8000-000000000002",
                "round_number": 3,
                "betting_window_closed": true,
                "closed_at": "2024-05-01T10:00:30+00:00"
            })),
            old: None,
        };
        match decode_change(change).unwrap() {
            Some(ChangeEvent::PlayerState(state)) => {
                assert_eq!(state.round, 3);
                assert!(state.betting_window_closed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
