//! Zoom connector.
//!
//! User, meeting, recording and Team Chat administration over the Zoom REST
//! API using a server-to-server OAuth app. The access token is persisted and
//! reused until it expires.

mod chat;
mod meetings;

pub use chat::{
    ChannelSettings, CreateChannelRequest, DeleteChannelRequest, DeleteMessageRequest,
    InviteToChannelRequest, ListChannelsRequest, ListMessagesRequest, MessageTarget,
    RemoveFromChannelRequest, SendMessageRequest, UpdateChannelRequest, UpdateMessageRequest,
};
pub use meetings::{
    CreateMeetingRequest, FetchRecordingRequest, MeetingType, Recurrence, RecurrenceType,
};
use meetings::drop_nulls;

use crate::args::RawArgs;
use crate::auth::{OAuth2Auth, TokenCache};
use crate::command::{table, CommandOutput};
use crate::http::{ApiRequest, HttpClient};
use crate::secure_string::SecureString;
use crate::traits::{
    unknown_command, Connector, ConnectorConfig, ConnectorError, ConnectorHealth,
    ConnectorResult, Integration, IntegrationContext,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest page the Zoom API returns.
pub const MAX_RECORDS_PER_PAGE: usize = 300;

const LIMIT_AND_EXTRA_ARGUMENTS: &str = "Too many arguments. If you choose a limit, \
don't enter a user_id or page_size or next_page_token or page_number.";

const LIMIT_AND_EXTRA_ARGUMENTS_MEETING_LIST: &str = "Too many arguments. If you choose a limit, \
don't enter a page_size or next_page_token or page_number.";

const USER_COLUMNS: [&str; 8] = [
    "id",
    "email",
    "type",
    "pmi",
    "verified",
    "created_at",
    "status",
    "role_id",
];

const MEETING_COLUMNS: [&str; 10] = [
    "uuid",
    "id",
    "host_id",
    "topic",
    "type",
    "start_time",
    "duration",
    "timezone",
    "created_at",
    "join_url",
];

const MEETING_SECRETS: [&str; 4] = [
    "password",
    "pstn_password",
    "encrypted_password",
    "h323_password",
];

/// Zoom connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoomConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    pub account_id: String,
    pub client_id: String,
    pub client_secret: SecureString,
    #[serde(default = "default_oauth_url")]
    pub oauth_url: String,
}

fn default_oauth_url() -> String {
    "https://zoom.us/oauth/token".to_string()
}

/// Default REST API base.
pub const DEFAULT_BASE_URL: &str = "https://api.zoom.us/v2";

/// Numeric Zoom user type. `Pro` is the legacy name of `Licensed`.
pub fn user_type_number(name: &str) -> Option<u8> {
    match name {
        "Basic" => Some(1),
        "Pro" | "Licensed" => Some(2),
        "Corporate" => Some(3),
        _ => None,
    }
}

/// Arguments of `zoom-list-users`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListUsersRequest {
    pub status: String,
    pub page_size: usize,
    pub page_number: usize,
    pub next_page_token: Option<String>,
    pub role_id: Option<String>,
    pub user_id: Option<String>,
    /// Page through results until this many users are gathered.
    pub limit: Option<usize>,
}

impl TryFrom<&RawArgs> for ListUsersRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        let limit = args.parse::<usize>("limit")?.filter(|l| *l > 0);
        let next_page_token = args.get("next_page_token").map(str::to_string);
        let user_id = args.get("user_id").map(str::to_string);
        if limit.is_some()
            && (args.contains("page_size")
                || args.contains("page_number")
                || next_page_token.is_some()
                || user_id.is_some())
        {
            return Err(ConnectorError::InvalidRequest(
                LIMIT_AND_EXTRA_ARGUMENTS.to_string(),
            ));
        }
        Ok(Self {
            status: args.string_or("status", "active"),
            page_size: args.usize_or("page_size", 30)?,
            page_number: args.usize_or("page_number", 1)?,
            next_page_token,
            role_id: args.get("role_id").map(str::to_string),
            user_id,
            limit,
        })
    }
}

/// Arguments of `zoom-create-user`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateUserRequest {
    pub user_type: u8,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl TryFrom<&RawArgs> for CreateUserRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        let type_name = args.string_or("user_type", "Basic");
        let user_type = user_type_number(&type_name).ok_or_else(|| {
            ConnectorError::InvalidRequest(format!("Unknown user type '{}'", type_name))
        })?;
        Ok(Self {
            user_type,
            email: args.required("email")?.to_string(),
            first_name: args.get("first_name").map(str::to_string),
            last_name: args.get("last_name").map(str::to_string),
        })
    }
}

/// Arguments of `zoom-delete-user`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteUserRequest {
    pub user: String,
    /// `delete` or `disassociate`.
    pub action: String,
}

impl TryFrom<&RawArgs> for DeleteUserRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            user: args.required("user")?.to_string(),
            action: args.string_or("action", "delete"),
        })
    }
}

/// Arguments of `zoom-meeting-get`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingGetRequest {
    pub meeting_id: String,
    pub occurrence_id: Option<String>,
    pub show_previous_occurrences: bool,
}

impl TryFrom<&RawArgs> for MeetingGetRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            meeting_id: args.required("meeting_id")?.to_string(),
            occurrence_id: args.get("occurrence_id").map(str::to_string),
            show_previous_occurrences: args.bool_or("show_previous_occurrences", false)?,
        })
    }
}

/// Arguments of `zoom-meeting-list`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingListRequest {
    pub user_id: String,
    pub meeting_type: Option<String>,
    pub page_size: usize,
    pub page_number: usize,
    pub next_page_token: Option<String>,
    pub limit: Option<usize>,
}

impl TryFrom<&RawArgs> for MeetingListRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        let limit = args.parse::<usize>("limit")?.filter(|l| *l > 0);
        let next_page_token = args.get("next_page_token").map(str::to_string);
        if limit.is_some()
            && (args.contains("page_size")
                || args.contains("page_number")
                || next_page_token.is_some())
        {
            return Err(ConnectorError::InvalidRequest(
                LIMIT_AND_EXTRA_ARGUMENTS_MEETING_LIST.to_string(),
            ));
        }
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            meeting_type: args.get("type").map(str::to_string),
            page_size: args.usize_or("page_size", 30)?,
            page_number: args.usize_or("page_number", 1)?,
            next_page_token,
            limit,
        })
    }
}

/// Items gathered across pages plus the first page, which carries the
/// metadata.
struct Paged {
    items: Vec<Value>,
    first_page: Value,
    /// Token of the last page fetched, if the server offered another.
    next_page_token: Option<String>,
}

/// Meeting with its passwords removed.
fn strip_meeting_secrets(meeting: &Value) -> Value {
    let mut safe = meeting.clone();
    if let Some(obj) = safe.as_object_mut() {
        for secret in MEETING_SECRETS {
            obj.remove(secret);
        }
    }
    safe
}

/// Zoom connector.
pub struct ZoomConnector {
    config: ZoomConfig,
    client: HttpClient,
}

impl ZoomConnector {
    pub fn new(config: ZoomConfig, ctx: IntegrationContext) -> ConnectorResult<Self> {
        if config.account_id.trim().is_empty() || config.client_id.trim().is_empty() {
            return Err(ConnectorError::ConfigError(
                "Account ID and Client ID are required".to_string(),
            ));
        }
        if config.client_secret.is_blank() {
            return Err(ConnectorError::ConfigError(
                "Client Secret is required".to_string(),
            ));
        }

        let auth = OAuth2Auth::new(
            config.oauth_url.clone(),
            config.account_id.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            TokenCache::persistent(ctx.state.clone(), ctx.state_key("auth")),
        );
        let client = HttpClient::new(config.connector.clone(), Arc::new(auth))?;

        info!("Zoom connector initialized");

        Ok(Self { config, client })
    }

    /// Requests pages of `page_size` until `limit` items are gathered or the
    /// server stops returning a `next_page_token`.
    ///
    /// Also stops on a page that adds no items or repeats the previous token,
    /// either of which would otherwise request the same page forever.
    async fn paginate(
        &self,
        base: ApiRequest,
        items_key: &str,
        limit: usize,
        page_size: usize,
    ) -> ConnectorResult<Paged> {
        let mut items = Vec::new();
        let mut first_page = Value::Null;
        let mut next_page_token: Option<String> = None;

        while items.len() < limit {
            let request = base
                .clone()
                .query("page_size", page_size)
                .query_opt("next_page_token", next_page_token.as_deref());
            let page = self.client.send_json(&request).await?;

            let added = page
                .get(items_key)
                .and_then(Value::as_array)
                .map(|page_items| {
                    items.extend(page_items.iter().cloned());
                    page_items.len()
                })
                .unwrap_or(0);
            let token = page
                .get("next_page_token")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if first_page.is_null() {
                first_page = page;
            }
            let repeated = token == next_page_token;
            let stop = added == 0 || token.is_none() || repeated;
            if added == 0 && token.is_some() {
                warn!(items_key, "Empty page with a next_page_token, stopping");
            }
            next_page_token = token;
            if stop {
                if repeated {
                    next_page_token = None;
                }
                break;
            }
        }

        debug!(gathered = items.len(), limit, "Pagination finished");
        items.truncate(limit);
        Ok(Paged {
            items,
            first_page,
            next_page_token,
        })
    }

    async fn list_users(&self, request: ListUsersRequest) -> ConnectorResult<CommandOutput> {
        let base = ApiRequest::get(match &request.user_id {
            Some(user_id) => format!("users/{}", user_id),
            None => "users".to_string(),
        })
        .query("status", &request.status)
        .query_opt("role_id", request.role_id.as_deref());

        let (users, raw) = match request.limit {
            Some(limit) => {
                let paged = self
                    .paginate(base, "users", limit, limit.min(MAX_RECORDS_PER_PAGE))
                    .await?;
                (paged.items, paged.first_page)
            }
            None => {
                let raw = self
                    .client
                    .send_json(
                        &base
                            .query("page_size", request.page_size)
                            .query("page_number", request.page_number)
                            .query_opt("next_page_token", request.next_page_token.as_deref()),
                    )
                    .await?;
                let users = if request.user_id.is_some() {
                    vec![raw.clone()]
                } else {
                    raw.get("users")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default()
                };
                (users, raw)
            }
        };

        let title = if request.user_id.is_some() { "User" } else { "Users" };
        let mut readable = table(title, &USER_COLUMNS, &users);
        if request.user_id.is_none() {
            readable.push('\n');
            readable.push_str(&table(
                "Metadata",
                &["page_count", "page_number", "page_size", "total_records", "next_page_token"],
                &[raw.clone()],
            ));
        }

        let outputs = json!({
            "User": users,
            "Metadata": {
                "Count": raw.get("page_count"),
                "Number": raw.get("page_number"),
                "Size": raw.get("page_size"),
                "Total": raw.get("total_records"),
            }
        });
        Ok(CommandOutput::new(readable, "Zoom", outputs).with_raw(raw))
    }

    async fn create_user(&self, request: CreateUserRequest) -> ConnectorResult<CommandOutput> {
        let body = json!({
            "action": "create",
            "user_info": {
                "email": request.email,
                "type": request.user_type,
                "first_name": request.first_name,
                "last_name": request.last_name,
            }
        });
        let raw = self
            .client
            .send_json(&ApiRequest::post("users").json(body))
            .await?;
        let id = raw.get("id").and_then(Value::as_str).unwrap_or_default();
        Ok(CommandOutput::new(
            format!("User created successfully with ID: {}", id),
            "Zoom.User",
            raw.clone(),
        )
        .with_raw(raw))
    }

    async fn delete_user(&self, request: DeleteUserRequest) -> ConnectorResult<CommandOutput> {
        let delete = ApiRequest::delete(format!("users/{}", request.user))
            .json(json!({"action": request.action}));
        self.client.send_json(&delete).await?;
        Ok(CommandOutput::message(format!(
            "User {} was deleted successfully",
            request.user
        )))
    }

    async fn meeting_get(&self, request: MeetingGetRequest) -> ConnectorResult<CommandOutput> {
        let get = ApiRequest::get(format!("meetings/{}", request.meeting_id))
            .query_opt("occurrence_id", request.occurrence_id.as_deref())
            .query("show_previous_occurrences", request.show_previous_occurrences);
        let raw = self.client.send_json(&get).await?;

        let readable = table(
            "Meeting details",
            &[
                "uuid",
                "id",
                "host_id",
                "host_email",
                "topic",
                "type",
                "status",
                "start_time",
                "duration",
                "timezone",
                "agenda",
                "created_at",
                "start_url",
                "join_url",
            ],
            &[raw.clone()],
        );
        Ok(CommandOutput::new(readable, "Zoom.Meeting", strip_meeting_secrets(&raw)).with_raw(raw))
    }

    async fn meeting_list(&self, request: MeetingListRequest) -> ConnectorResult<CommandOutput> {
        let base = ApiRequest::get(format!("users/{}/meetings", request.user_id))
            .query_opt("type", request.meeting_type.as_deref());

        let (meetings, raw) = match request.limit {
            Some(limit) => {
                let paged = self
                    .paginate(base, "meetings", limit, limit.min(MAX_RECORDS_PER_PAGE))
                    .await?;
                (paged.items, paged.first_page)
            }
            None => {
                let raw = self
                    .client
                    .send_json(
                        &base
                            .query("page_size", request.page_size)
                            .query("page_number", request.page_number)
                            .query_opt("next_page_token", request.next_page_token.as_deref()),
                    )
                    .await?;
                let meetings = raw
                    .get("meetings")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                (meetings, raw)
            }
        };

        let mut readable = table("Meeting list", &MEETING_COLUMNS, &meetings);
        readable.push('\n');
        readable.push_str(&table(
            "Metadata",
            &["next_page_token", "page_size", "page_number", "total_records"],
            &[raw.clone()],
        ));

        let outputs = json!({
            "Meeting": meetings,
            "Metadata": {
                "Size": raw.get("page_size"),
                "Total": raw.get("total_records"),
            }
        });
        Ok(CommandOutput::new(readable, "Zoom", outputs).with_raw(raw))
    }
}

#[async_trait]
impl Connector for ZoomConnector {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "collaboration"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "health_check".to_string(),
            "test_connection".to_string(),
            "manage_users".to_string(),
            "manage_meetings".to_string(),
            "fetch_recordings".to_string(),
            "manage_channels".to_string(),
            "send_messages".to_string(),
        ]
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.test_connection().await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(ConnectorError::AuthenticationFailed(msg)) => {
                Ok(ConnectorHealth::Unhealthy(format!("Authentication failed: {}", msg)))
            }
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        let request = ApiRequest::get("users").query("page_size", 1);
        self.client.send_json(&request).await.map_err(|e| match e {
            ConnectorError::AuthenticationFailed(_) => e,
            other => ConnectorError::ConnectionFailed(format!(
                "Problem reaching Zoom API, check your credentials. Error message: {}",
                other
            )),
        })?;
        Ok(true)
    }
}

#[async_trait]
impl Integration for ZoomConnector {
    fn commands(&self) -> &'static [&'static str] {
        &[
            "zoom-list-users",
            "zoom-create-user",
            "zoom-delete-user",
            "zoom-meeting-get",
            "zoom-meeting-list",
            "zoom-create-meeting",
            "zoom-fetch-recording",
            "zoom-list-account-public-channels",
            "zoom-list-user-channels",
            "zoom-create-channel",
            "zoom-update-channel",
            "zoom-delete-channel",
            "zoom-invite-to-channel",
            "zoom-remove-from-channel",
            "zoom-send-message",
            "zoom-update-message",
            "zoom-delete-message",
            "zoom-list-messages",
        ]
    }

    async fn execute(&self, command: &str, args: &RawArgs) -> ConnectorResult<CommandOutput> {
        match command {
            "zoom-list-users" => self.list_users(ListUsersRequest::try_from(args)?).await,
            "zoom-create-user" => self.create_user(CreateUserRequest::try_from(args)?).await,
            "zoom-delete-user" => self.delete_user(DeleteUserRequest::try_from(args)?).await,
            "zoom-meeting-get" => self.meeting_get(MeetingGetRequest::try_from(args)?).await,
            "zoom-meeting-list" => self.meeting_list(MeetingListRequest::try_from(args)?).await,
            "zoom-create-meeting" => {
                self.create_meeting(CreateMeetingRequest::try_from(args)?).await
            }
            "zoom-fetch-recording" => {
                self.fetch_recording(FetchRecordingRequest::try_from(args)?).await
            }
            "zoom-list-account-public-channels" => {
                self.list_channels(ListChannelsRequest::account(args)?).await
            }
            "zoom-list-user-channels" => self.list_channels(ListChannelsRequest::user(args)?).await,
            "zoom-create-channel" => {
                self.create_channel(CreateChannelRequest::try_from(args)?).await
            }
            "zoom-update-channel" => {
                self.update_channel(UpdateChannelRequest::try_from(args)?).await
            }
            "zoom-delete-channel" => {
                self.delete_channel(DeleteChannelRequest::try_from(args)?).await
            }
            "zoom-invite-to-channel" => {
                self.invite_to_channel(InviteToChannelRequest::try_from(args)?).await
            }
            "zoom-remove-from-channel" => {
                self.remove_from_channel(RemoveFromChannelRequest::try_from(args)?).await
            }
            "zoom-send-message" => self.send_message(SendMessageRequest::try_from(args)?).await,
            "zoom-update-message" => {
                self.update_message(UpdateMessageRequest::try_from(args)?).await
            }
            "zoom-delete-message" => {
                self.delete_message(DeleteMessageRequest::try_from(args)?).await
            }
            "zoom-list-messages" => {
                let request = ListMessagesRequest::parse(args, chrono::Utc::now())?;
                self.list_messages(request).await
            }
            _ => Err(unknown_command(self.name(), command)),
        }
    }
}
