//! Meeting scheduling and cloud recordings.

use super::{strip_meeting_secrets, ZoomConnector};
use crate::args::RawArgs;
use crate::command::{table, CommandOutput};
use crate::http::ApiRequest;
use crate::traits::{ConnectorError, ConnectorResult};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::{debug, warn};

const INSTANT_AND_TIME: &str =
    "Too many arguments. Use start_time and timezone for scheduled meetings only.";
const JBH_TIME_AND_NO_JBH: &str = "Collision arguments. \
join_before_host_time argument can be used only if join_before_host is 'True'.";
const WAITING_ROOM_AND_JBH: &str = "Collision arguments. \
join_before_host argument can be used only if waiting_room is 'False'.";
const END_TIMES_AND_END_DATE_TIME: &str = "Collision arguments. \
Choose only one of these two arguments, end_times or end_date_time.";
const NOT_RECURRING_WITH_RECURRING_ARGUMENTS: &str = "One or more arguments that were filed \
are used for a recurring meeting with a fixed time only.";
const NOT_MONTHLY_AND_MONTHLY_ARGUMENTS: &str = "One or more arguments that were filed \
are for a recurring meeting with a fixed time and monthly recurrence_type only.";
const MONTHLY_RECURRING_MISSING_ARGUMENTS: &str = "Missing arguments. A recurring meeting with \
a fixed time and monthly recurrence_type must have the following arguments: monthly_week and \
monthly_week_day.";
const NOT_WEEKLY_WITH_WEEKLY_ARGUMENTS: &str = "Weekly_days is for weekly recurrence_type only.";
const RECURRING_MISSING_ARGUMENTS: &str = "Missing arguments. A recurring meeting with a fixed \
time is missing this argument: recurrence_type.";
const WRONG_TIME_FORMAT: &str =
    "Wrong time format. Use this format: 'yyyy-MM-ddTHH:mm:ssZ' or 'yyyy-MM-ddTHH:mm:ss'";

const RECURRENCE_ARGUMENTS: [&str; 7] = [
    "end_date_time",
    "end_times",
    "monthly_day",
    "monthly_week",
    "monthly_week_day",
    "repeat_interval",
    "weekly_days",
];

const MEETING_DETAIL_COLUMNS: [&str; 13] = [
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
    "created_at",
    "start_url",
    "join_url",
];

/// Kind of meeting `zoom-create-meeting` schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingType {
    Instant,
    Scheduled,
    RecurringWithFixedTime,
}

impl MeetingType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Instant" => Some(Self::Instant),
            "Scheduled" => Some(Self::Scheduled),
            "Recurring meeting with fixed time" => Some(Self::RecurringWithFixedTime),
            _ => None,
        }
    }

    /// The number Zoom uses for this meeting type.
    pub fn number(self) -> u8 {
        match self {
            Self::Instant => 1,
            Self::Scheduled => 2,
            Self::RecurringWithFixedTime => 8,
        }
    }
}

/// How often a recurring meeting repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Monthly,
}

impl RecurrenceType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Daily" => Some(Self::Daily),
            "Weekly" => Some(Self::Weekly),
            "Monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 2,
            Self::Monthly => 3,
        }
    }
}

/// Repeat schedule of a recurring meeting with a fixed time.
#[derive(Debug, Clone, PartialEq)]
pub struct Recurrence {
    pub recurrence_type: RecurrenceType,
    pub end_date_time: Option<String>,
    pub end_times: Option<u32>,
    pub monthly_day: Option<u32>,
    pub monthly_week: Option<i32>,
    pub monthly_week_day: Option<u32>,
    pub repeat_interval: Option<u32>,
    pub weekly_days: Option<u32>,
}

/// Arguments of `zoom-create-meeting`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateMeetingRequest {
    pub user: String,
    pub topic: String,
    pub meeting_type: MeetingType,
    pub start_time: Option<String>,
    pub timezone: Option<String>,
    pub auto_record_meeting: Option<String>,
    pub encryption_type: Option<String>,
    pub host_video: bool,
    pub join_before_host: bool,
    pub join_before_host_time: Option<u32>,
    pub meeting_authentication: bool,
    pub waiting_room: bool,
    pub recurrence: Option<Recurrence>,
}

impl TryFrom<&RawArgs> for CreateMeetingRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        let invalid = |msg: &str| ConnectorError::InvalidRequest(msg.to_string());

        let type_name = args.string_or("type", "Instant");
        let meeting_type = MeetingType::parse(&type_name).ok_or_else(|| {
            ConnectorError::InvalidRequest(format!("Unknown meeting type '{}'", type_name))
        })?;
        let recurring = meeting_type == MeetingType::RecurringWithFixedTime;
        let join_before_host = args.bool_or("join_before_host", false)?;
        let waiting_room = args.bool_or("waiting_room", false)?;
        let recurrence_type = args.get("recurrence_type");

        if meeting_type == MeetingType::Instant
            && (args.contains("timezone") || args.contains("start_time"))
        {
            return Err(invalid(INSTANT_AND_TIME));
        }
        if args.contains("join_before_host_time") && !join_before_host {
            return Err(invalid(JBH_TIME_AND_NO_JBH));
        }
        if waiting_room && join_before_host {
            return Err(invalid(WAITING_ROOM_AND_JBH));
        }
        if args.contains("end_times") && args.contains("end_date_time") {
            return Err(invalid(END_TIMES_AND_END_DATE_TIME));
        }
        if !recurring && RECURRENCE_ARGUMENTS.iter().any(|a| args.contains(a)) {
            return Err(invalid(NOT_RECURRING_WITH_RECURRING_ARGUMENTS));
        }
        if recurring {
            let monthly = recurrence_type == Some("Monthly");
            if !monthly
                && ["monthly_day", "monthly_week", "monthly_week_day"]
                    .iter()
                    .any(|a| args.contains(a))
            {
                return Err(invalid(NOT_MONTHLY_AND_MONTHLY_ARGUMENTS));
            }
            if monthly
                && !(args.contains("monthly_week") && args.contains("monthly_week_day"))
                && !args.contains("monthly_day")
            {
                return Err(invalid(MONTHLY_RECURRING_MISSING_ARGUMENTS));
            }
            if recurrence_type != Some("Weekly") && args.contains("weekly_days") {
                return Err(invalid(NOT_WEEKLY_WITH_WEEKLY_ARGUMENTS));
            }
            if recurrence_type.is_none() {
                return Err(invalid(RECURRING_MISSING_ARGUMENTS));
            }
        }

        let start_time = args.get("start_time").map(str::to_string);
        if let Some(start) = &start_time {
            check_start_time_format(start)?;
        }

        let recurrence = match recurrence_type.filter(|_| recurring) {
            Some(name) => Some(Recurrence {
                recurrence_type: RecurrenceType::parse(name).ok_or_else(|| {
                    ConnectorError::InvalidRequest(format!("Unknown recurrence type '{}'", name))
                })?,
                end_date_time: args.get("end_date_time").map(str::to_string),
                end_times: match args.contains("end_date_time") {
                    true => None,
                    false => Some(args.parse("end_times")?.unwrap_or(1)),
                },
                monthly_day: Some(args.parse("monthly_day")?.unwrap_or(1)),
                monthly_week: args.parse("monthly_week")?,
                monthly_week_day: args.parse("monthly_week_day")?,
                repeat_interval: args.parse("repeat_interval")?,
                weekly_days: Some(args.parse("weekly_days")?.unwrap_or(1)),
            }),
            None => None,
        };

        Ok(Self {
            user: args.required("user")?.to_string(),
            topic: args.required("topic")?.to_string(),
            meeting_type,
            start_time,
            timezone: args.get("timezone").map(str::to_string),
            auto_record_meeting: args.get("auto_record_meeting").map(str::to_string),
            encryption_type: args.get("encryption_type").map(str::to_string),
            host_video: args.bool_or("host_video", true)?,
            join_before_host,
            join_before_host_time: args.parse("join_before_host_time")?,
            meeting_authentication: args.bool_or("meeting_authentication", false)?,
            waiting_room,
            recurrence,
        })
    }
}

impl CreateMeetingRequest {
    /// Request body with unset fields left out.
    pub fn body(&self) -> Value {
        let mut body = json!({
            "topic": self.topic,
            "type": self.meeting_type.number(),
            "start_time": self.start_time,
            "timezone": self.timezone,
            "settings": {
                "auto_recording": self.auto_record_meeting,
                "encryption_type": self.encryption_type,
                "host_video": self.host_video,
                "jbh_time": self.join_before_host_time,
                "join_before_host": self.join_before_host,
                "meeting_authentication": self.meeting_authentication,
                "waiting_room": self.waiting_room,
            },
        });
        if let (Some(r), Some(obj)) = (&self.recurrence, body.as_object_mut()) {
            obj.insert(
                "recurrence".to_string(),
                json!({
                    "type": r.recurrence_type.number(),
                    "end_date_time": r.end_date_time,
                    "end_times": r.end_times,
                    "monthly_day": r.monthly_day,
                    "monthly_week": r.monthly_week,
                    "monthly_week_day": r.monthly_week_day,
                    "repeat_interval": r.repeat_interval,
                    "weekly_days": r.weekly_days,
                }),
            );
        }
        drop_nulls(body)
    }
}

/// Accepts `yyyy-MM-ddTHH:mm:ss` with an optional trailing `Z`.
fn check_start_time_format(start_time: &str) -> ConnectorResult<()> {
    let naive = start_time.strip_suffix('Z').unwrap_or(start_time);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S")
        .map(|_| ())
        .map_err(|_| ConnectorError::InvalidRequest(WRONG_TIME_FORMAT.to_string()))
}

/// Removes null members from objects, recursively.
pub(super) fn drop_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, drop_nulls(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// Arguments of `zoom-fetch-recording`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRecordingRequest {
    pub meeting_id: String,
    pub delete_after: bool,
    /// Directory the files are written to.
    pub output_dir: PathBuf,
}

impl TryFrom<&RawArgs> for FetchRecordingRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            meeting_id: args.required("meeting_id")?.to_string(),
            delete_after: args.bool_or("delete_after", false)?,
            output_dir: PathBuf::from(args.string_or("output_dir", ".")),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecordingList {
    #[serde(default)]
    recording_files: Vec<RecordingFile>,
}

#[derive(Debug, Deserialize)]
struct RecordingFile {
    id: String,
    #[serde(default)]
    file_type: String,
    download_url: String,
}

impl RecordingFile {
    fn kind(&self) -> &str {
        match self.file_type.as_str() {
            "MP4" => "Video",
            "M4A" => "Audio",
            other => other,
        }
    }
}

impl ZoomConnector {
    pub(super) async fn create_meeting(
        &self,
        request: CreateMeetingRequest,
    ) -> ConnectorResult<CommandOutput> {
        let create =
            ApiRequest::post(format!("users/{}/meetings", request.user)).json(request.body());
        let mut raw = self.client.send_json(&create).await?;

        if request.meeting_type == MeetingType::RecurringWithFixedTime {
            let first = raw
                .pointer("/occurrences/0")
                .map(|o| (o.get("start_time").cloned(), o.get("duration").cloned()));
            if let (Some((start, duration)), Some(meeting)) = (first, raw.as_object_mut()) {
                meeting.insert("start_time".to_string(), start.unwrap_or(Value::Null));
                meeting.insert("duration".to_string(), duration.unwrap_or(Value::Null));
            }
        }

        let readable = table("Meeting details", &MEETING_DETAIL_COLUMNS, &[raw.clone()]);
        Ok(CommandOutput::new(readable, "Zoom.Meeting", strip_meeting_secrets(&raw)).with_raw(raw))
    }

    /// Downloads every file of a meeting's cloud recording into the output
    /// directory, optionally deleting each from the cloud afterwards.
    pub(super) async fn fetch_recording(
        &self,
        request: FetchRecordingRequest,
    ) -> ConnectorResult<CommandOutput> {
        let meeting_id = &request.meeting_id;
        let listing: RecordingList = self
            .client
            .send_as(&ApiRequest::get(format!("meetings/{}/recordings", meeting_id)))
            .await?;

        let mut lines = Vec::new();
        let mut files = Vec::new();
        for file in &listing.recording_files {
            debug!(meeting_id = %meeting_id, file_id = %file.id, "Downloading recording file");
            let content = self
                .client
                .send_bytes(&ApiRequest::get(&file.download_url))
                .await
                .map_err(|e| {
                    ConnectorError::RequestFailed(format!(
                        "Unable to download recording for meeting {}: {}",
                        meeting_id, e
                    ))
                })?;

            let filename = format!("recording_{}_{}.{}", meeting_id, file.id, file.file_type);
            let path = request.output_dir.join(&filename);
            tokio::fs::write(&path, &content).await.map_err(|e| {
                ConnectorError::RequestFailed(format!("Failed to write {}: {}", path.display(), e))
            })?;
            lines.push(format!(
                "The {} file {} was downloaded successfully",
                file.kind(),
                filename
            ));

            let mut deleted = false;
            if request.delete_after {
                let delete =
                    ApiRequest::delete(format!("meetings/{}/recordings/{}", meeting_id, file.id));
                match self.client.send(&delete).await {
                    Ok(_) => {
                        deleted = true;
                        lines.push(format!(
                            "The {} file {} was successfully removed from the cloud.",
                            file.kind(),
                            filename
                        ));
                    }
                    Err(e) => {
                        warn!(file = %filename, error = %e, "Failed to delete recording file");
                        lines.push(format!("Failed to delete file {}. {}", filename, e));
                    }
                }
            }

            files.push(json!({
                "MeetingID": meeting_id,
                "FileID": file.id,
                "FileType": file.file_type,
                "Path": path.display().to_string(),
                "Size": content.len(),
                "Deleted": deleted,
            }));
        }

        if files.is_empty() {
            return Ok(CommandOutput::message(format!(
                "No recording files found for meeting {}",
                meeting_id
            )));
        }
        Ok(CommandOutput::new(lines.join("\n"), "Zoom.Recording", Value::Array(files)))
    }
}
