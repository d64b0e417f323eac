/// Ably binding for the relay channel
///
/// Connect flow:
/// - `GET {auth_url}?role=<patient|staff>` returns a token request (signed by
///   the server holding the API key) or ready token details
/// - a token request is exchanged at `POST {rest_url}/keys/{keyName}/requestToken`
///
/// Publish goes through the REST API; subscribe reads the server-sent-events
/// endpoint and dispatches by message name.
use super::{MessageHandler, RelayChannel, RelayConnection, RelayConnector, RelayError, Role};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use intake_core::RelayConfig;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

/// Ably protocol version requested on the SSE endpoint
const SSE_PROTOCOL_VERSION: &str = "1.2";

/// Tokens this close to expiry are renewed before use (milliseconds)
const TOKEN_RENEW_MARGIN_MS: i64 = 30_000;

/// Signed token request produced by the token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub key_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub timestamp: i64,
    pub nonce: String,
    pub mac: String,
}

/// Issued access token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDetails {
    pub token: String,
    /// Expiry in milliseconds since the epoch
    #[serde(default)]
    pub expires: Option<i64>,
    #[serde(default)]
    pub issued: Option<i64>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl TokenDetails {
    fn needs_renewal(&self, now_ms: i64) -> bool {
        self.expires
            .map(|expires| expires - now_ms <= TOKEN_RENEW_MARGIN_MS)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuthResponse {
    Details(TokenDetails),
    Request(TokenRequest),
}

/// Message as published to and received from the REST/SSE endpoints
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// Connector for the hosted relay
pub struct AblyConnector {
    config: RelayConfig,
    http_client: Client,
}

impl AblyConnector {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            http_client: Client::new(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

#[async_trait]
impl RelayConnector for AblyConnector {
    async fn connect(&self, role: Role) -> Result<Arc<dyn RelayConnection>, RelayError> {
        let auth = AuthClient {
            http_client: self.http_client.clone(),
            auth_url: self.config.auth_url.clone(),
            rest_url: self.config.rest_url.clone(),
            request_timeout: self.config.request_timeout,
            role,
        };

        let token = auth.obtain_token().await?;
        info!(
            "Connected to relay as {} (client id: {})",
            role,
            token.client_id.as_deref().unwrap_or("none")
        );

        Ok(Arc::new(AblyConnection {
            shared: Arc::new(Shared {
                auth,
                config: self.config.clone(),
                token: RwLock::new(token),
                closed: AtomicBool::new(false),
                next_stream: AtomicU64::new(0),
                streams: Mutex::new(HashMap::new()),
            }),
        }))
    }
}

struct AuthClient {
    http_client: Client,
    auth_url: String,
    rest_url: String,
    request_timeout: Duration,
    role: Role,
}

impl AuthClient {
    /// Fetch auth material from the token endpoint, exchanging it if needed
    async fn obtain_token(&self) -> Result<TokenDetails, RelayError> {
        let response = self
            .http_client
            .get(&self.auth_url)
            .query(&[("role", self.role.as_str())])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| RelayError::NetworkError(e.to_string()))?;

        let response = check_status(response).await.map_err(|e| match e {
            RelayError::ChannelError(msg) => RelayError::AuthError(msg),
            other => other,
        })?;

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| RelayError::DeserializationError(e.to_string()))?;

        match auth {
            AuthResponse::Details(details) => Ok(details),
            AuthResponse::Request(request) => self.request_token(&request).await,
        }
    }

    async fn request_token(&self, request: &TokenRequest) -> Result<TokenDetails, RelayError> {
        let url = endpoint(&self.rest_url, &["keys", &request.key_name, "requestToken"])?;
        debug!("Exchanging token request for key {}", request.key_name);

        let response = self
            .http_client
            .post(url)
            .json(request)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| RelayError::NetworkError(e.to_string()))?;

        let response = check_status(response).await.map_err(|e| match e {
            RelayError::ChannelError(msg) => RelayError::AuthError(msg),
            other => other,
        })?;

        response
            .json()
            .await
            .map_err(|e| RelayError::DeserializationError(e.to_string()))
    }
}

struct Shared {
    auth: AuthClient,
    config: RelayConfig,
    token: RwLock<TokenDetails>,
    closed: AtomicBool,
    next_stream: AtomicU64,
    /// Running SSE readers by stream id, aborted on close
    streams: Mutex<HashMap<u64, AbortHandle>>,
}

impl Shared {
    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RelayError::Closed)
        } else {
            Ok(())
        }
    }

    /// Current token, renewed through the token endpoint when close to expiry
    async fn access_token(&self) -> Result<String, RelayError> {
        let current = self.token.read().clone();
        if !current.needs_renewal(now_millis()) {
            return Ok(current.token);
        }

        debug!("Renewing relay token for {}", self.auth.role);
        let renewed = self.auth.obtain_token().await?;
        let token = renewed.token.clone();
        *self.token.write() = renewed;
        Ok(token)
    }
}

struct AblyConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl RelayConnection for AblyConnection {
    fn role(&self) -> Role {
        self.shared.auth.role
    }

    fn channel(&self, topic: &str) -> Arc<dyn RelayChannel> {
        Arc::new(AblyChannel {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            stream: Mutex::new(None),
        })
    }

    async fn close(&self) -> Result<(), RelayError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let streams: Vec<AbortHandle> = self
            .shared
            .streams
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for stream in &streams {
            stream.abort();
        }

        info!(
            "Relay connection for {} closed ({} streams stopped)",
            self.shared.auth.role,
            streams.len()
        );
        Ok(())
    }
}

type HandlerMap = HashMap<String, Vec<Arc<dyn MessageHandler>>>;

struct AblyChannel {
    shared: Arc<Shared>,
    topic: String,
    handlers: Arc<RwLock<HandlerMap>>,
    /// Reader for this handle and its id in `Shared::streams`
    stream: Mutex<Option<(u64, AbortHandle)>>,
}

#[async_trait]
impl RelayChannel for AblyChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, event: &str, payload: serde_json::Value) -> Result<(), RelayError> {
        self.shared.ensure_open()?;

        let encoded = serde_json::to_string(&payload)
            .map_err(|e| RelayError::SerializationError(e.to_string()))?;
        let message = WireMessage {
            id: Some(uuid::Uuid::new_v4().to_string()),
            name: Some(event.to_string()),
            data: Some(serde_json::Value::String(encoded)),
            encoding: Some("json".to_string()),
        };

        let token = self.shared.access_token().await?;
        let url = endpoint(&self.shared.config.rest_url, &["channels", &self.topic, "messages"])?;

        let response = self
            .shared
            .auth
            .http_client
            .post(url)
            .header("Authorization", format!("Bearer {}", BASE64.encode(token)))
            .json(&message)
            .timeout(self.shared.config.request_timeout)
            .send()
            .await
            .map_err(|e| RelayError::NetworkError(e.to_string()))?;

        check_status(response).await?;
        debug!("Published {} to {}", event, self.topic);
        Ok(())
    }

    async fn subscribe(
        &self,
        event: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RelayError> {
        self.shared.ensure_open()?;

        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);

        let mut stream = self.stream.lock();
        if stream.is_none() {
            let reader = SseReader {
                shared: Arc::clone(&self.shared),
                topic: self.topic.clone(),
                handlers: Arc::clone(&self.handlers),
            };
            let id = self.shared.next_stream.fetch_add(1, Ordering::SeqCst);
            let abort = tokio::spawn(reader.run()).abort_handle();
            self.shared.streams.lock().insert(id, abort.clone());
            *stream = Some((id, abort));
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), RelayError> {
        self.handlers.write().clear();
        let stream = self.stream.lock().take();
        if let Some((id, abort)) = stream {
            abort.abort();
            self.shared.streams.lock().remove(&id);
            debug!("Unsubscribed from {}", self.topic);
        }
        Ok(())
    }
}

/// Event-stream reader for one channel handle
struct SseReader {
    shared: Arc<Shared>,
    topic: String,
    handlers: Arc<RwLock<HandlerMap>>,
}

impl SseReader {
    async fn run(self) {
        info!("Starting relay event stream for {}", self.topic);

        while self.shared.ensure_open().is_ok() {
            match self.open().await {
                Ok(response) => self.read(response).await,
                Err(e) => error!("Event stream error on {}: {}", self.topic, e),
            }

            if self.shared.ensure_open().is_err() {
                break;
            }
            warn!(
                "Event stream for {} ended, reconnecting in {:?}",
                self.topic, self.shared.config.reconnect_delay
            );
            sleep(self.shared.config.reconnect_delay).await;
        }
    }

    async fn open(&self) -> Result<Response, RelayError> {
        let token = self.shared.access_token().await?;
        let mut url = endpoint(&self.shared.config.realtime_url, &["sse"])?;
        url.query_pairs_mut()
            .append_pair("v", SSE_PROTOCOL_VERSION)
            .append_pair("channels", &self.topic)
            .append_pair("accessToken", &token);

        let response = self
            .shared
            .auth
            .http_client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| RelayError::NetworkError(e.to_string()))?;

        check_status(response).await
    }

    async fn read(&self, mut response: Response) {
        let mut buffer = SseBuffer::default();

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    for data in buffer.push(&chunk) {
                        self.dispatch(&data).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Event stream read failed on {}: {}", self.topic, e);
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, data: &str) {
        let (name, payload) = match decode_wire_message(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping undecodable relay message on {}: {}", self.topic, e);
                return;
            }
        };

        let handlers = self
            .handlers
            .read()
            .get(&name)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            handler.handle_message(&name, payload.clone()).await;
        }
    }
}

/// Splits an event-stream byte stream into `data` payloads
#[derive(Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Append bytes and return the data of every event completed by them
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.pending.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.pending.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&block[..end]);
            if let Some(data) = parse_sse_block(&block) {
                events.push(data);
            }
        }
        events
    }
}

/// Data of a `message` event block; other event types and comments yield `None`
fn parse_sse_block(block: &str) -> Option<String> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (key, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match key {
            "event" => event_type = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    match event_type.as_deref() {
        None | Some("message") => Some(data_lines.join("\n")),
        Some(other) => {
            debug!("Ignoring event-stream event of type {}", other);
            None
        }
    }
}

/// Decode a relay message into its name and JSON payload
fn decode_wire_message(data: &str) -> Result<(String, serde_json::Value), RelayError> {
    let message: WireMessage = serde_json::from_str(data)
        .map_err(|e| RelayError::DeserializationError(e.to_string()))?;

    let name = message
        .name
        .ok_or_else(|| RelayError::DeserializationError("message has no name".to_string()))?;
    let data = message.data.unwrap_or(serde_json::Value::Null);

    let payload = match (message.encoding.as_deref(), data) {
        (None, data) => data,
        (Some(encoding), serde_json::Value::String(raw)) => decode_encoded(encoding, raw)?,
        (Some(encoding), _) => {
            return Err(RelayError::DeserializationError(format!(
                "encoding '{}' on non-string data",
                encoding
            )))
        }
    };

    Ok((name, payload))
}

/// Unwind an encoding chain such as `json/base64` (applied right to left)
fn decode_encoded(encoding: &str, raw: String) -> Result<serde_json::Value, RelayError> {
    let mut bytes = raw.into_bytes();
    let mut is_json = false;

    for step in encoding.split('/').rev() {
        match step {
            "base64" => {
                bytes = BASE64
                    .decode(&bytes)
                    .map_err(|e| RelayError::DeserializationError(e.to_string()))?;
            }
            "utf-8" => {}
            "json" => is_json = true,
            other => {
                return Err(RelayError::DeserializationError(format!(
                    "unsupported encoding '{}'",
                    other
                )))
            }
        }
    }

    if is_json {
        serde_json::from_slice(&bytes).map_err(|e| RelayError::DeserializationError(e.to_string()))
    } else {
        String::from_utf8(bytes)
            .map(serde_json::Value::String)
            .map_err(|e| RelayError::DeserializationError(e.to_string()))
    }
}

/// Append path segments to a base URL
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, RelayError> {
    let mut url = Url::parse(base).map_err(|e| RelayError::ChannelError(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| RelayError::ChannelError(format!("cannot append a path to '{}'", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map non-success responses to errors, keeping the relay's error message
async fn check_status(response: Response) -> Result<Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => match parsed.error.code {
            Some(code) => format!("{} (code {})", parsed.error.message, code),
            None => parsed.error.message,
        },
        Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(RelayError::AuthError(message))
    } else {
        Err(RelayError::ChannelError(message))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_response_variants() {
        let request: AuthResponse = serde_json::from_value(json!({
            "keyName": "NNy6aQ.31gugA",
            "ttl": 3600000,
            "capability": "{\"*\":[\"*\"]}",
            "clientId": "patient",
            "timestamp": 1718000000000i64,
            "nonce": "8f2b",
            "mac": "c2lnbmF0dXJl"
        }))
        .unwrap();
        assert!(matches!(request, AuthResponse::Request(r) if r.key_name == "NNy6aQ.31gugA"));

        let details: AuthResponse =
            serde_json::from_value(json!({"token": "tok-1", "expires": 1718003600000i64}))
                .unwrap();
        assert!(matches!(details, AuthResponse::Details(d) if d.token == "tok-1"));
    }

    #[test]
    fn test_token_renewal_margin() {
        let token = TokenDetails {
            token: "tok".to_string(),
            expires: Some(100_000),
            issued: None,
            client_id: None,
        };
        assert!(!token.needs_renewal(50_000));
        assert!(token.needs_renewal(80_000));

        let unbounded = TokenDetails {
            expires: None,
            ..token
        };
        assert!(!unbounded.needs_renewal(i64::MAX));
    }

    #[test]
    fn test_sse_buffer_splits_events_across_chunks() {
        let mut buffer = SseBuffer::default();
        assert!(buffer.push(b"id: 1\r\ndata: {\"na").is_empty());

        let events = buffer.push(b"me\":\"typing\"}\r\n\r\n:keepalive\n\ndata: x\n\n");
        assert_eq!(events, vec!["{\"name\":\"typing\"}".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_parse_sse_block_ignores_other_event_types() {
        assert_eq!(parse_sse_block("event: error\ndata: {}"), None);
        assert_eq!(
            parse_sse_block("event: message\ndata: a\ndata: b"),
            Some("a\nb".to_string())
        );
    }

    #[test]
    fn test_decode_wire_message_json_encoding() {
        let data = json!({
            "name": "field-change",
            "data": "{\"field\":\"FirstName\",\"value\":\"Jane\"}",
            "encoding": "json"
        })
        .to_string();

        let (name, payload) = decode_wire_message(&data).unwrap();
        assert_eq!(name, "field-change");
        assert_eq!(payload, json!({"field": "FirstName", "value": "Jane"}));
    }

    #[test]
    fn test_decode_wire_message_base64_chain_and_plain() {
        let encoded = BASE64.encode("{\"status\":\"idle\"}");
        let data = json!({"name": "typing", "data": encoded, "encoding": "json/base64"}).to_string();
        let (_, payload) = decode_wire_message(&data).unwrap();
        assert_eq!(payload, json!({"status": "idle"}));

        let plain = json!({"name": "typing", "data": {"status": "typing"}}).to_string();
        let (_, payload) = decode_wire_message(&plain).unwrap();
        assert_eq!(payload, json!({"status": "typing"}));

        let unnamed = json!({"data": {"status": "typing"}}).to_string();
        assert!(decode_wire_message(&unnamed).is_err());
    }

    fn unreachable_shared() -> Arc<Shared> {
        let config = RelayConfig {
            realtime_url: "http://127.0.0.1:9".to_string(),
            reconnect_delay: Duration::from_secs(60),
            ..RelayConfig::default()
        };
        Arc::new(Shared {
            auth: AuthClient {
                http_client: Client::new(),
                auth_url: config.auth_url.clone(),
                rest_url: config.rest_url.clone(),
                request_timeout: config.request_timeout,
                role: Role::Staff,
            },
            config,
            token: RwLock::new(TokenDetails {
                token: "tok".to_string(),
                expires: None,
                issued: None,
                client_id: None,
            }),
            closed: AtomicBool::new(false),
            next_stream: AtomicU64::new(0),
            streams: Mutex::new(HashMap::new()),
        })
    }

    struct Ignore;

    #[async_trait]
    impl MessageHandler for Ignore {
        async fn handle_message(&self, _event: &str, _payload: serde_json::Value) {}
    }

    #[tokio::test]
    async fn test_unsubscribe_forgets_stream() {
        let connection = AblyConnection {
            shared: unreachable_shared(),
        };
        let channel = connection.channel("patient-form");

        for _ in 0..3 {
            channel.subscribe("typing", Arc::new(Ignore)).await.unwrap();
            channel.subscribe("field-change", Arc::new(Ignore)).await.unwrap();
            assert_eq!(connection.shared.streams.lock().len(), 1);

            channel.unsubscribe().await.unwrap();
            assert!(connection.shared.streams.lock().is_empty());
        }

        let other = connection.channel("patient-form");
        other.subscribe("typing", Arc::new(Ignore)).await.unwrap();
        connection.close().await.unwrap();
        assert!(connection.shared.streams.lock().is_empty());
    }

    #[test]
    fn test_endpoint_appends_segments() {
        let url = endpoint("https://rest.ably.io/", &["channels", "patient form", "messages"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://rest.ably.io/channels/patient%20form/messages"
        );
    }
}
