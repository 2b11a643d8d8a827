use std::time::Duration;

use bot_core::{
    AuthError, ClientLifecycleState, DecodeError, EventKind, EventMetadata, Listener,
    ListenerRegistry, ListenerResult, LoginResponse, MessageContent, ReactionContent,
    RequestError, ResolutionError, SharedTokenStore, StatusChannel, StatusStream,
    StrippedStateEvent, SyncSettings, SyncStateMachine, TokenResponse, TokenStore, UserId,
    decode_value, invite_listener, message_listener, reaction_listener,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    BotConfig,
    executor::{ApiRequest, RequestExecutor},
    resolver::{HomeserverResolver, api_base_url},
};

const PASSWORD_LOGIN_TYPE: &str = "m.login.password";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default for every call except `/sync`, which sets its own from the long-poll timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct WhoAmI {
    user_id: String,
}

/// A Matrix bot account: resolved homeserver, tokens, listeners and lifecycle.
///
/// Listener registration needs `&mut self`; the sync loop only needs `&self`.
#[derive(Debug)]
pub struct MatrixBot {
    pub(crate) user_id: UserId,
    pub(crate) server_name: String,
    pub(crate) device_id: Option<String>,
    pub(crate) executor: RequestExecutor,
    pub(crate) tokens: SharedTokenStore,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) lifecycle: Mutex<SyncStateMachine>,
    pub(crate) status: StatusChannel,
    pub(crate) sync_settings: SyncSettings,
}

impl MatrixBot {
    /// Parse the identity and resolve its homeserver.
    ///
    /// With `config.homeserver` set, discovery is skipped and only the
    /// `/_matrix/` prefix is appended.
    pub async fn new(config: BotConfig) -> Result<Self, ResolutionError> {
        let user_id = UserId::parse(config.user_id.clone())?;
        let server_name = user_id.server_name().to_owned();
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ResolutionError::HttpClient(err.to_string()))?;

        let base_url = match &config.homeserver {
            Some(homeserver) => direct_base_url(homeserver, config.allow_insecure_http)?,
            None => {
                HomeserverResolver::new(http.clone())
                    .allow_insecure_http(config.allow_insecure_http)
                    .resolve(&server_name)
                    .await?
            }
        };
        info!(%user_id, %base_url, "using homeserver");

        let tokens = TokenStore::new().shared();
        Ok(Self {
            user_id,
            server_name,
            device_id: None,
            executor: RequestExecutor::new(http, base_url, tokens.clone(), config.retry),
            tokens,
            listeners: ListenerRegistry::new(),
            lifecycle: Mutex::new(SyncStateMachine::default()),
            status: StatusChannel::default(),
            sync_settings: config.sync,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Server name taken from the identity at construction.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn homeserver(&self) -> &Url {
        self.executor.base_url()
    }

    pub fn tokens(&self) -> SharedTokenStore {
        self.tokens.clone()
    }

    pub fn subscribe(&self) -> StatusStream {
        self.status.subscribe()
    }

    pub async fn lifecycle_state(&self) -> ClientLifecycleState {
        self.lifecycle.lock().await.state()
    }

    /// Last cursor recorded by the sync loop.
    pub async fn cursor(&self) -> Option<String> {
        self.lifecycle.lock().await.cursor().map(str::to_owned)
    }

    pub fn on(&mut self, kind: EventKind, listener: Listener) -> Listener {
        self.listeners.register(kind, listener)
    }

    pub fn on_message<F>(&mut self, f: F) -> Listener
    where
        F: Fn(MessageContent, &EventMetadata) -> ListenerResult + Send + Sync + 'static,
    {
        self.on(EventKind::Message, message_listener(f))
    }

    pub fn on_reaction<F>(&mut self, f: F) -> Listener
    where
        F: Fn(ReactionContent, &EventMetadata) -> ListenerResult + Send + Sync + 'static,
    {
        self.on(EventKind::Reaction, reaction_listener(f))
    }

    pub fn on_invite<F>(&mut self, f: F) -> Listener
    where
        F: Fn(StrippedStateEvent, &EventMetadata) -> ListenerResult + Send + Sync + 'static,
    {
        self.on(EventKind::Invite, invite_listener(f))
    }

    pub fn is_not_from_this_bot(&self, metadata: &EventMetadata) -> bool {
        metadata.sender != self.user_id.as_str()
    }

    /// Password login. On success the token store holds the new tokens and the
    /// server-reported user id replaces the configured one.
    pub async fn login(&mut self, password: &str, device_id: Option<&str>) -> Result<(), AuthError> {
        let event = self.lifecycle.lock().await.begin_auth()?;
        self.status.emit(event);

        let result = self.password_login(password, device_id).await;
        match &result {
            Ok(()) => info!(user_id = %self.user_id, device_id = ?self.device_id, "logged in"),
            Err(err) => warn!(user_id = %self.user_id, %err, "login failed"),
        }

        let event = self.lifecycle.lock().await.on_auth_result(result.is_ok())?;
        self.status.emit(event);
        result
    }

    async fn password_login(
        &mut self,
        password: &str,
        device_id: Option<&str>,
    ) -> Result<(), AuthError> {
        let login_types = self.executor.execute(&ApiRequest::get("client/v3/login")).await?;
        let flows = login_types.get("flows").and_then(Value::as_array);
        let supported = flows.is_some_and(|flows| {
            flows
                .iter()
                .any(|flow| flow.get("type").and_then(Value::as_str) == Some(PASSWORD_LOGIN_TYPE))
        });
        if !supported {
            return Err(AuthError::PasswordLoginUnsupported {
                flows: login_types.get("flows").map(Value::to_string).unwrap_or_default(),
            });
        }

        let mut body = json!({
            "type": PASSWORD_LOGIN_TYPE,
            "identifier": {"type": "m.id.user", "user": self.user_id.as_str()},
            "password": password,
            "refresh_token": true,
        });
        if let Some(device_id) = device_id {
            body["device_id"] = json!(device_id);
        }

        let response = self
            .executor
            .execute(&ApiRequest::post("client/v3/login", body))
            .await?;
        let login: LoginResponse = decode_value("login response", &response)?;
        if let Some(requested) = device_id
            && requested != login.device_id
        {
            return Err(AuthError::DeviceMismatch {
                requested: requested.to_owned(),
                returned: login.device_id,
            });
        }

        self.user_id = UserId::parse(login.user_id)
            .map_err(|err| DecodeError::invalid("login response user_id", err.to_string()))?;
        self.device_id = Some(login.device_id);
        self.tokens.write().await.apply(&login.tokens);
        Ok(())
    }

    /// Exchange a refresh token for new tokens.
    ///
    /// Allowed while syncing; the running loop picks up the new access token on
    /// its next request.
    pub async fn login_token(&self, refresh_token: &str) -> Result<(), AuthError> {
        let response = self
            .executor
            .execute(&ApiRequest::post(
                "client/v3/refresh",
                json!({"refresh_token": refresh_token}),
            ))
            .await
            .inspect_err(|err| warn!(%err, "token refresh failed"))?;
        let tokens: TokenResponse = decode_value("refresh response", &response)?;
        self.tokens.write().await.apply(&tokens);

        if let Some(event) = self.lifecycle.lock().await.mark_authenticated() {
            self.status.emit(event);
        }
        info!(user_id = %self.user_id, "tokens refreshed");
        Ok(())
    }

    /// Adopt an existing access token after checking it with `whoami`.
    ///
    /// A rejected token is removed from the store again.
    pub async fn restore_access_token(&mut self, access_token: &str) -> Result<(), AuthError> {
        let event = self.lifecycle.lock().await.begin_auth()?;
        self.status.emit(event);

        self.tokens.write().await.set_access_token(access_token);

        let result = self.whoami().await;
        match &result {
            Ok(user_id) => {
                info!(%user_id, "access token restored");
                self.user_id = user_id.clone();
            }
            Err(err) => {
                warn!(%err, "access token rejected");
                self.tokens.write().await.clear_access_token();
            }
        }

        let event = self.lifecycle.lock().await.on_auth_result(result.is_ok())?;
        self.status.emit(event);
        result.map(|_| ())
    }

    async fn whoami(&self) -> Result<UserId, AuthError> {
        let response = self
            .executor
            .execute(&ApiRequest::get("client/v3/account/whoami"))
            .await?;
        let whoami: WhoAmI = decode_value("whoami response", &response)?;
        UserId::parse(whoami.user_id)
            .map_err(|err| AuthError::from(DecodeError::invalid("whoami user_id", err.to_string())))
    }

    /// Join a room by id or alias and return the joined room id.
    pub async fn join_room(&self, room_id_or_alias: &str) -> Result<String, RequestError> {
        let request = ApiRequest::post("client/v3/join", json!({})).segment(room_id_or_alias);
        let response = self.executor.execute(&request).await?;
        string_field(&response, "room_id")
    }

    /// Send a plain `m.text` message and return the new event id.
    pub async fn send_text(&self, room_id: &str, body: &str) -> Result<String, RequestError> {
        let request = ApiRequest::put(
            "client/v3/rooms",
            json!({"msgtype": "m.text", "body": body}),
        )
        .segment(room_id)
        .segment("send")
        .segment("m.room.message")
        .segment(Uuid::new_v4().to_string());
        let response = self.executor.execute(&request).await?;
        string_field(&response, "event_id")
    }
}

fn direct_base_url(homeserver: &str, allow_insecure_http: bool) -> Result<Url, ResolutionError> {
    let base_url = api_base_url(homeserver)?;
    match base_url.scheme() {
        "https" => Ok(base_url),
        "http" if allow_insecure_http => Ok(base_url),
        scheme => Err(ResolutionError::InvalidUrl {
            url: homeserver.to_owned(),
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}

fn string_field(response: &Value, key: &str) -> Result<String, RequestError> {
    response
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| RequestError::UnknownResponse {
            status: 200,
            body: response.to_string(),
        })
}
