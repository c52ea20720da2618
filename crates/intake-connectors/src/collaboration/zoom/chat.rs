//! Team Chat channels and messages.

use super::{drop_nulls, ZoomConnector, LIMIT_AND_EXTRA_ARGUMENTS};
use crate::args::RawArgs;
use crate::command::{table, CommandOutput};
use crate::http::ApiRequest;
use crate::traits::{ConnectorError, ConnectorResult};
use chrono::{DateTime, Utc};
use intake_core::{parse_first_fetch, Timestamp};
use serde_json::{json, Value};

const MISSING_ARGUMENT: &str = "Missing either a contact info or a channel id";
const USER_NOT_FOUND: &str = "This user email can't be found";

/// Largest page the chat messages endpoint returns.
const MAX_MESSAGES_PER_PAGE: usize = 50;

fn lookup(
    kind: &str,
    args: &RawArgs,
    key: &str,
    names: &[(&str, u8)],
) -> ConnectorResult<Option<u8>> {
    match args.get(key) {
        None => Ok(None),
        Some(name) => names
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| Some(*v))
            .ok_or_else(|| ConnectorError::InvalidRequest(format!("Unknown {} '{}'", kind, name))),
    }
}

const POSTING_PERMISSIONS: [(&str, u8); 3] = [
    ("All members can post", 1),
    ("Only the owner and admins can post", 2),
    ("Only the owner, admins and certain members can post", 3),
];

const MEMBER_PERMISSIONS: [(&str, u8); 2] = [
    ("All channel members can add", 1),
    ("Only channel owner and admins can add", 2),
];

const CHANNEL_TYPES: [(&str, u8); 4] = [
    ("Private channel", 1),
    ("Private channel with members that belong to one account", 2),
    ("Public channel", 3),
    ("New chat", 4),
];

const AT_TYPES: [(&str, u8); 2] = [
    ("Mention a contact", 1),
    ("Mention \"all\" to notify everyone in the channel.", 2),
];

/// Where a chat message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    Channel(String),
    Contact(String),
}

impl MessageTarget {
    /// `to_channel` wins when both are given.
    pub fn from_args(args: &RawArgs) -> ConnectorResult<Self> {
        if let Some(channel) = args.get("to_channel") {
            Ok(Self::Channel(channel.to_string()))
        } else if let Some(contact) = args.get("to_contact") {
            Ok(Self::Contact(contact.to_string()))
        } else {
            Err(ConnectorError::InvalidRequest(MISSING_ARGUMENT.to_string()))
        }
    }

    fn key(&self) -> &'static str {
        match self {
            Self::Channel(_) => "to_channel",
            Self::Contact(_) => "to_contact",
        }
    }

    fn value(&self) -> &str {
        match self {
            Self::Channel(v) | Self::Contact(v) => v,
        }
    }

    fn apply(&self, request: ApiRequest) -> ApiRequest {
        request.query(self.key(), self.value())
    }
}

/// Arguments of `zoom-list-account-public-channels` and
/// `zoom-list-user-channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListChannelsRequest {
    /// Lists the channels of this user instead of the account's public ones.
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub page_size: usize,
    pub page_number: usize,
    pub next_page_token: Option<String>,
    pub limit: Option<usize>,
}

impl ListChannelsRequest {
    pub fn account(args: &RawArgs) -> ConnectorResult<Self> {
        if args.contains("limit") && args.contains("channel_id") {
            return Err(ConnectorError::InvalidRequest(
                LIMIT_AND_EXTRA_ARGUMENTS.to_string(),
            ));
        }
        Self::parse(args, None)
    }

    pub fn user(args: &RawArgs) -> ConnectorResult<Self> {
        Self::parse(args, Some(args.required("user_id")?.to_string()))
    }

    fn parse(args: &RawArgs, user_id: Option<String>) -> ConnectorResult<Self> {
        let limit = args.parse::<usize>("limit")?.filter(|l| *l > 0);
        let next_page_token = args.get("next_page_token").map(str::to_string);
        if limit.is_some()
            && (args.contains("page_size") || args.contains("page_number") || next_page_token.is_some())
        {
            return Err(ConnectorError::InvalidRequest(
                LIMIT_AND_EXTRA_ARGUMENTS.to_string(),
            ));
        }
        Ok(Self {
            user_id,
            channel_id: args.get("channel_id").map(str::to_string),
            page_size: args.usize_or("page_size", 50)?,
            page_number: args.usize_or("page_number", 1)?,
            next_page_token,
            limit,
        })
    }

    fn path(&self) -> String {
        let base = match &self.user_id {
            Some(user) => format!("chat/users/{}/channels", user),
            None => "chat/channels".to_string(),
        };
        match &self.channel_id {
            Some(channel) => format!("{}/{}", base, channel),
            None => base,
        }
    }
}

/// Channel settings shared by create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub add_member_permissions: Option<u8>,
    pub posting_permissions: Option<u8>,
    pub new_members_can_see_previous_messages_files: bool,
}

impl ChannelSettings {
    fn from_args(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            add_member_permissions: lookup(
                "add_member_permissions",
                args,
                "add_member_permissions",
                &MEMBER_PERMISSIONS,
            )?,
            posting_permissions: lookup(
                "posting_permissions",
                args,
                "posting_permissions",
                &POSTING_PERMISSIONS,
            )?,
            new_members_can_see_previous_messages_files: args
                .bool_or("new_members_can_see_prev_msgs", true)?,
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "add_member_permissions": self.add_member_permissions,
            "posting_permissions": self.posting_permissions,
            "new_members_can_see_previous_messages_files":
                self.new_members_can_see_previous_messages_files,
        })
    }
}

fn members_json(emails: &[String]) -> Vec<Value> {
    emails.iter().map(|email| json!({ "email": email })).collect()
}

/// Arguments of `zoom-create-channel`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateChannelRequest {
    pub user_id: String,
    pub name: String,
    pub channel_type: Option<u8>,
    pub member_emails: Vec<String>,
    pub settings: ChannelSettings,
}

impl TryFrom<&RawArgs> for CreateChannelRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            name: args.required("channel_name")?.to_string(),
            channel_type: lookup("channel type", args, "channel_type", &CHANNEL_TYPES)?,
            member_emails: args.list("member_emails"),
            settings: ChannelSettings::from_args(args)?,
        })
    }
}

/// Arguments of `zoom-update-channel`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateChannelRequest {
    pub user_id: String,
    pub channel_id: String,
    pub name: Option<String>,
    pub settings: ChannelSettings,
}

impl TryFrom<&RawArgs> for UpdateChannelRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            channel_id: args.required("channel_id")?.to_string(),
            name: args.get("channel_name").map(str::to_string),
            settings: ChannelSettings::from_args(args)?,
        })
    }
}

/// Arguments of `zoom-delete-channel`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteChannelRequest {
    pub user_id: String,
    pub channel_id: String,
}

impl TryFrom<&RawArgs> for DeleteChannelRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            channel_id: args.required("channel_id")?.to_string(),
        })
    }
}

/// Arguments of `zoom-invite-to-channel`.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteToChannelRequest {
    pub user_id: String,
    pub channel_id: String,
    pub members: Vec<String>,
}

impl TryFrom<&RawArgs> for InviteToChannelRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        args.required("members")?;
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            channel_id: args.required("channel_id")?.to_string(),
            members: args.list("members"),
        })
    }
}

/// Arguments of `zoom-remove-from-channel`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveFromChannelRequest {
    pub user_id: String,
    pub channel_id: String,
    pub member_id: String,
}

impl TryFrom<&RawArgs> for RemoveFromChannelRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            channel_id: args.required("channel_id")?.to_string(),
            member_id: args.required("member_id")?.to_string(),
        })
    }
}

/// Arguments of `zoom-send-message`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageRequest {
    pub user_id: String,
    pub message: String,
    pub target: MessageTarget,
    pub reply_main_message_id: Option<String>,
    /// `@` mention, present when `at_contact` or `at_type` is given.
    pub mention: Option<Value>,
    /// Formatting span, present when `format_type` is given.
    pub rich_text: Option<Value>,
}

impl TryFrom<&RawArgs> for SendMessageRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        let at_type = lookup("at_type", args, "at_type", &AT_TYPES)?;
        let mention = match (args.get("at_contact"), at_type) {
            (None, None) => None,
            (contact, at_type) => Some(drop_nulls(json!({
                "at_contact": contact,
                "at_type": at_type,
                "start_position": args.parse::<u32>("start_position")?,
                "end_position": args.parse::<u32>("end_position")?,
            }))),
        };
        let rich_text = match args.get("format_type") {
            None => None,
            Some(format_type) => Some(drop_nulls(json!({
                "format_type": format_type,
                "format_attr": args.get("format_attr"),
                "start_position": args.parse::<u32>("rt_start_position")?,
                "end_position": args.parse::<u32>("rt_end_position")?,
            }))),
        };
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            message: args.required("message")?.to_string(),
            target: MessageTarget::from_args(args)?,
            reply_main_message_id: args.get("reply_main_message_id").map(str::to_string),
            mention,
            rich_text,
        })
    }
}

impl SendMessageRequest {
    pub fn body(&self) -> Value {
        let mut body = json!({
            "message": self.message,
            "reply_main_message_id": self.reply_main_message_id,
            "at_items": self.mention.as_ref().map(|m| vec![m.clone()]),
            "rich_text": self.rich_text.as_ref().map(|r| vec![r.clone()]),
        });
        if let Some(obj) = body.as_object_mut() {
            obj.insert(self.target.key().to_string(), json!(self.target.value()));
        }
        drop_nulls(body)
    }
}

/// Arguments of `zoom-update-message`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessageRequest {
    pub user_id: String,
    pub message_id: String,
    pub message: String,
    pub target: MessageTarget,
}

impl TryFrom<&RawArgs> for UpdateMessageRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            message_id: args.required("message_id")?.to_string(),
            message: args.required("message")?.to_string(),
            target: MessageTarget::from_args(args)?,
        })
    }
}

/// Arguments of `zoom-delete-message`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMessageRequest {
    pub user_id: String,
    pub message_id: String,
    pub target: MessageTarget,
}

impl TryFrom<&RawArgs> for DeleteMessageRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            user_id: args.required("user_id")?.to_string(),
            message_id: args.required("message_id")?.to_string(),
            target: MessageTarget::from_args(args)?,
        })
    }
}

/// Arguments of `zoom-list-messages`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListMessagesRequest {
    /// A user ID or an email address, resolved to an ID before listing.
    pub user_id: String,
    pub target: MessageTarget,
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub include_deleted_and_edited_message: Option<bool>,
    pub search_type: Option<String>,
    pub search_key: Option<String>,
    pub exclude_child_message: bool,
    pub limit: usize,
}

impl ListMessagesRequest {
    pub fn parse(args: &RawArgs, now: DateTime<Utc>) -> ConnectorResult<Self> {
        let time = |key: &str| -> ConnectorResult<Option<String>> {
            args.get(key).map(|raw| chat_time(raw, now)).transpose()
        };
        Ok(Self {
            target: MessageTarget::from_args(args)?,
            user_id: args.required("user_id")?.to_string(),
            date: time("date")?,
            from: time("from")?,
            to: time("to")?,
            include_deleted_and_edited_message: args.parse("include_deleted_and_edited_message")?,
            search_type: args.get("search_type").map(str::to_string),
            search_key: args.get("search_key").map(str::to_string),
            exclude_child_message: args.bool_or("exclude_child_message", false)?,
            limit: args.usize_or("limit", 50)?.max(1),
        })
    }
}

/// Normalizes `now`, `today`, `N units ago` or an ISO time to
/// `yyyy-MM-ddTHH:mm:ssZ`.
fn chat_time(raw: &str, now: DateTime<Utc>) -> ConnectorResult<String> {
    let ts = match raw.trim() {
        "now" => Timestamp::from(now),
        "today" => {
            let midnight = now.date_naive().and_hms_opt(0, 0, 0).map(|d| d.and_utc());
            Timestamp::from(midnight.unwrap_or(now))
        }
        expr => parse_first_fetch(expr, now).map_err(|_| {
            ConnectorError::InvalidRequest(format!("Invalid datetime format: {}", raw))
        })?,
    };
    Ok(ts.to_datestring())
}

impl ZoomConnector {
    pub(super) async fn list_channels(
        &self,
        request: ListChannelsRequest,
    ) -> ConnectorResult<CommandOutput> {
        let base = ApiRequest::get(request.path())
            .query_opt("user_id", request.user_id.as_deref());

        let (channels, raw, token) = match request.limit.filter(|_| request.channel_id.is_none()) {
            Some(limit) => {
                let paged = self
                    .paginate(base, "channels", limit, limit.min(super::MAX_RECORDS_PER_PAGE))
                    .await?;
                let token = paged.first_page.get("next_page_token").cloned();
                (paged.items, paged.first_page, token)
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
                let channels = if request.channel_id.is_some() {
                    vec![raw.clone()]
                } else {
                    raw.get("channels")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default()
                };
                let token = raw.get("next_page_token").cloned();
                (channels, raw, token)
            }
        };
        let token = token.filter(|t| t.as_str().is_some_and(|s| !s.is_empty()));

        let rows: Vec<Value> = channels
            .iter()
            .map(|c| {
                json!({
                    "User id": request.user_id,
                    "Channel ID": c.get("id"),
                    "Channel JID": c.get("jid"),
                    "Channel name": c.get("name"),
                    "Channel type": c.get("type"),
                    "Channel url": c.get("channel_url"),
                })
            })
            .collect();
        let (columns, token_key): (&[&str], &str) = match request.user_id {
            Some(_) => (
                &["User id", "Channel ID", "Channel JID", "Channel name", "Channel type", "Channel url"],
                "UserChannelsNextToken",
            ),
            None => (
                &["Channel JID", "Channel ID", "Channel name", "Channel type", "Channel url"],
                "ChannelsNextToken",
            ),
        };

        let mut outputs = json!({ "Channel": channels });
        if let Some(obj) = outputs.as_object_mut() {
            obj.insert(token_key.to_string(), token.unwrap_or(Value::Null));
        }
        Ok(CommandOutput::new(table("Channels", columns, &rows), "Zoom", outputs).with_raw(raw))
    }

    pub(super) async fn create_channel(
        &self,
        request: CreateChannelRequest,
    ) -> ConnectorResult<CommandOutput> {
        let body = drop_nulls(json!({
            "name": request.name,
            "type": request.channel_type,
            "members": members_json(&request.member_emails),
            "channel_settings": request.settings.to_json(),
        }));
        let raw = self
            .client
            .send_json(
                &ApiRequest::post(format!("chat/users/{}/channels", request.user_id)).json(body),
            )
            .await?;

        let row = json!({
            "User id": request.user_id,
            "Channel ID": raw.get("id"),
            "Channel name": raw.get("name"),
            "Channel type": raw.get("type"),
            "Channel url": raw.get("channel_url"),
        });
        let readable = table(
            "Channel details",
            &["User id", "Channel ID", "Channel name", "Channel type", "Channel url"],
            &[row],
        );
        Ok(CommandOutput::new(readable, "Zoom.Channel", raw.clone()).with_raw(raw))
    }

    pub(super) async fn update_channel(
        &self,
        request: UpdateChannelRequest,
    ) -> ConnectorResult<CommandOutput> {
        let body = drop_nulls(json!({
            "name": request.name,
            "channel_settings": request.settings.to_json(),
        }));
        let update = ApiRequest::patch(format!(
            "chat/users/{}/channels/{}",
            request.user_id, request.channel_id
        ))
        .json(body);
        self.client.send_json(&update).await?;
        Ok(CommandOutput::message(format!(
            "Channel {} was updated successfully",
            request.channel_id
        )))
    }

    pub(super) async fn delete_channel(
        &self,
        request: DeleteChannelRequest,
    ) -> ConnectorResult<CommandOutput> {
        let delete = ApiRequest::delete(format!(
            "chat/users/{}/channels/{}",
            request.user_id, request.channel_id
        ));
        self.client.send_json(&delete).await?;
        Ok(CommandOutput::message(format!(
            "Channel {} was deleted successfully",
            request.channel_id
        )))
    }

    pub(super) async fn invite_to_channel(
        &self,
        request: InviteToChannelRequest,
    ) -> ConnectorResult<CommandOutput> {
        let invite = ApiRequest::post(format!(
            "chat/users/{}/channels/{}/members",
            request.user_id, request.channel_id
        ))
        .json(json!({ "members": members_json(&request.members) }));
        let raw = self.client.send_json(&invite).await?;

        let row = json!({
            "User id": raw.get("ids"),
            "Channel ID": request.channel_id,
            "Added at date and time": raw.get("added_at"),
        });
        let readable = table(
            "Channel details",
            &["User id", "Channel ID", "Added at date and time"],
            &[row],
        );
        Ok(CommandOutput::new(readable, "Zoom.Channel", raw.clone()).with_raw(raw))
    }

    pub(super) async fn remove_from_channel(
        &self,
        request: RemoveFromChannelRequest,
    ) -> ConnectorResult<CommandOutput> {
        let remove = ApiRequest::delete(format!(
            "chat/users/{}/channels/{}/members/{}",
            request.user_id, request.channel_id, request.member_id
        ));
        self.client.send_json(&remove).await?;
        Ok(CommandOutput::message(format!(
            "Member {} was successfully removed from channel {}",
            request.member_id, request.channel_id
        )))
    }

    pub(super) async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> ConnectorResult<CommandOutput> {
        let send = ApiRequest::post(format!("chat/users/{}/messages", request.user_id))
            .json(request.body());
        let raw = self.client.send_json(&send).await?;

        let row = json!({
            "Message ID": raw.get("id"),
            "Mentioned user": request.mention.as_ref().and_then(|m| m.get("at_contact")),
            "Channel ID": match &request.target {
                MessageTarget::Channel(c) => Some(c),
                MessageTarget::Contact(_) => None,
            },
            "Contact": match &request.target {
                MessageTarget::Contact(c) => Some(c),
                MessageTarget::Channel(_) => None,
            },
        });
        let readable = table(
            "Message",
            &["Message ID", "Mentioned user", "Channel ID", "Contact"],
            &[row],
        );
        Ok(CommandOutput::new(readable, "Zoom.ChatMessage", raw.clone()).with_raw(raw))
    }

    pub(super) async fn update_message(
        &self,
        request: UpdateMessageRequest,
    ) -> ConnectorResult<CommandOutput> {
        let mut body = json!({ "message": request.message });
        if let Some(obj) = body.as_object_mut() {
            obj.insert(request.target.key().to_string(), json!(request.target.value()));
        }
        let update = ApiRequest::put(format!(
            "chat/users/{}/messages/{}",
            request.user_id, request.message_id
        ))
        .json(body);
        self.client.send_json(&update).await?;
        Ok(CommandOutput::message(format!(
            "Message {} was successfully updated",
            request.message_id
        )))
    }

    pub(super) async fn delete_message(
        &self,
        request: DeleteMessageRequest,
    ) -> ConnectorResult<CommandOutput> {
        let delete = request.target.apply(ApiRequest::delete(format!(
            "chat/users/{}/messages/{}",
            request.user_id, request.message_id
        )));
        self.client.send_json(&delete).await?;
        Ok(CommandOutput::message(format!(
            "Message {} was deleted successfully",
            request.message_id
        )))
    }

    /// Resolves an email address to the user's ID. Other values pass through.
    async fn resolve_user_id(&self, user: &str) -> ConnectorResult<String> {
        if !user.contains('@') {
            return Ok(user.to_string());
        }
        let raw = self.client.get_json(&format!("users/{}", user)).await?;
        raw.get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ConnectorError::NotFound(USER_NOT_FOUND.to_string()))
    }

    pub(super) async fn list_messages(
        &self,
        request: ListMessagesRequest,
    ) -> ConnectorResult<CommandOutput> {
        let user_id = self.resolve_user_id(&request.user_id).await?;
        let base = request
            .target
            .apply(ApiRequest::get(format!("chat/users/{}/messages", user_id)))
            .query_opt("date", request.date.as_deref())
            .query_opt("from", request.from.as_deref())
            .query_opt("to", request.to.as_deref())
            .query_opt(
                "include_deleted_and_edited_message",
                request.include_deleted_and_edited_message,
            )
            .query_opt("search_type", request.search_type.as_deref())
            .query_opt("search_key", request.search_key.as_deref())
            .query("exclude_child_message", request.exclude_child_message);

        let paged = self
            .paginate(
                base,
                "messages",
                request.limit,
                request.limit.min(MAX_MESSAGES_PER_PAGE),
            )
            .await?;

        let rows: Vec<Value> = paged
            .items
            .iter()
            .map(|m| {
                json!({
                    "User id": user_id,
                    "Message Id": m.get("id"),
                    "Message text": m.get("message"),
                    "Message sender": m.get("sender"),
                    "Sender display name": m.get("sender_display_name"),
                    "Date Time": m.get("date_time"),
                    "From": request.from,
                    "To": request.to,
                })
            })
            .collect();
        let readable = table(
            "Messages",
            &[
                "User id",
                "Message Id",
                "Message text",
                "Message sender",
                "Sender display name",
                "Date Time",
                "From",
                "To",
            ],
            &rows,
        );
        let outputs = json!({
            "ChatMessage": paged.items,
            "ChatMessageNextToken": paged.next_page_token,
        });
        Ok(CommandOutput::new(readable, "Zoom", outputs).with_raw(paged.first_page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn args(pairs: &[(&str, &str)]) -> RawArgs {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_message_target() {
        assert_eq!(
            MessageTarget::from_args(&args(&[("to_channel", "c1"), ("to_contact", "a@b")])).unwrap(),
            MessageTarget::Channel("c1".to_string())
        );
        assert_eq!(
            MessageTarget::from_args(&args(&[("to_contact", "a@b")])).unwrap(),
            MessageTarget::Contact("a@b".to_string())
        );
        assert!(matches!(
            MessageTarget::from_args(&args(&[])),
            Err(ConnectorError::InvalidRequest(msg)) if msg == MISSING_ARGUMENT
        ));
    }

    #[test]
    fn test_channel_list_paths_and_collisions() {
        let account = ListChannelsRequest::account(&args(&[("channel_id", "c1")])).unwrap();
        assert_eq!(account.path(), "chat/channels/c1");
        assert_eq!(account.page_size, 50);
        assert!(ListChannelsRequest::account(&args(&[("limit", "5"), ("channel_id", "c1")])).is_err());

        let user = ListChannelsRequest::user(&args(&[("user_id", "me"), ("limit", "5")])).unwrap();
        assert_eq!(user.path(), "chat/users/me/channels");
        assert_eq!(user.limit, Some(5));
        assert!(matches!(
            ListChannelsRequest::user(&args(&[("user_id", "me"), ("limit", "5"), ("page_size", "9")])),
            Err(ConnectorError::InvalidRequest(msg)) if msg == LIMIT_AND_EXTRA_ARGUMENTS
        ));
        assert!(ListChannelsRequest::user(&args(&[])).is_err());
    }

    #[test]
    fn test_channel_settings_mapping() {
        let request = CreateChannelRequest::try_from(&args(&[
            ("user_id", "me"),
            ("channel_name", "ops"),
            ("channel_type", "Public channel"),
            ("posting_permissions", "Only the owner and admins can post"),
            ("member_emails", "a@example.com, b@example.com"),
        ]))
        .unwrap();
        assert_eq!(request.channel_type, Some(3));
        assert_eq!(request.settings.posting_permissions, Some(2));
        assert_eq!(request.settings.add_member_permissions, None);
        assert!(request.settings.new_members_can_see_previous_messages_files);
        assert_eq!(request.member_emails.len(), 2);

        assert!(CreateChannelRequest::try_from(&args(&[
            ("user_id", "me"),
            ("channel_name", "ops"),
            ("channel_type", "Secret club"),
        ]))
        .is_err());
    }

    #[test]
    fn test_send_message_body() {
        let plain = SendMessageRequest::try_from(&args(&[
            ("user_id", "me"),
            ("message", "hi"),
            ("to_contact", "a@example.com"),
        ]))
        .unwrap();
        assert_eq!(plain.body(), json!({"message": "hi", "to_contact": "a@example.com"}));

        let mention = SendMessageRequest::try_from(&args(&[
            ("user_id", "me"),
            ("message", "hi all"),
            ("to_channel", "c1"),
            ("at_type", "Mention \"all\" to notify everyone in the channel."),
            ("start_position", "3"),
            ("end_position", "6"),
            ("format_type", "Bold"),
        ]))
        .unwrap();
        let body = mention.body();
        assert_eq!(body["at_items"][0]["at_type"], 2);
        assert_eq!(body["at_items"][0]["start_position"], 3);
        assert!(body["at_items"][0].get("at_contact").is_none());
        assert_eq!(body["rich_text"][0]["format_type"], "Bold");
        assert_eq!(body["to_channel"], "c1");
    }

    #[test]
    fn test_chat_time_expressions() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();
        assert_eq!(chat_time("now", now).unwrap(), "2024-03-10T15:30:00Z");
        assert_eq!(chat_time("today", now).unwrap(), "2024-03-10T00:00:00Z");
        assert_eq!(chat_time("2 days ago", now).unwrap(), "2024-03-08T15:30:00Z");
        assert_eq!(chat_time("2024-01-01T10:00:00", now).unwrap(), "2024-01-01T10:00:00Z");
        assert!(chat_time("last tuesday", now).is_err());
    }

    #[test]
    fn test_list_messages_request() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();
        let request = ListMessagesRequest::parse(
            &args(&[("user_id", "me"), ("to_channel", "c1"), ("from", "1 hour ago")]),
            now,
        )
        .unwrap();
        assert_eq!(request.limit, 50);
        assert_eq!(request.from.as_deref(), Some("2024-03-10T14:30:00Z"));
        assert!(ListMessagesRequest::parse(&args(&[("user_id", "me")]), now).is_err());
    }
}
