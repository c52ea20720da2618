//! Scan definitions, scan results and vulnerability analysis.

use super::{epoch, id_string, owned_elements, timestamp_to_utc, values_at, TenableScConnector};
use crate::args::RawArgs;
use crate::command::{table, CommandOutput};
use crate::http::ApiRequest;
use crate::traits::{ConnectorError, ConnectorResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use intake_core::parse_first_fetch;
use serde_json::{json, Value};
use tracing::{debug, warn};

const SCAN_LIST_FIELDS: &str = "id,name,description,policy,ownerGroup,owner";

const SCAN_REPORT_FIELDS: &str = "name,description,details,status,scannedIPs,progress,startTime,\
scanDuration,importStart,finishTime,completedChecks,owner,ownerGroup,repository,policy";

const PLUGIN_FIELDS: &str = "name,description,family,type,cpe,riskFactor,solution,synopsis,\
exploitEase,exploitAvailable,cvssVector,baseScore,pluginPubDate,pluginModDate,vulnPubDate,\
temporalScore,xrefs,checkType";

/// Most analysis rows one `tenable-sc-get-vulnerability` call returns.
const MAX_VULNERABILITY_ROWS: usize = 200;

fn severity_level(name: &str) -> u8 {
    match name {
        "Critical" => 4,
        "High" => 3,
        "Medium" => 2,
        "Low" => 1,
        _ => 0,
    }
}

/// Arguments of `tenable-sc-list-scans`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListScansRequest {
    pub manageable: bool,
}

impl TryFrom<&RawArgs> for ListScansRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            manageable: args.bool_or("manageable", false)?,
        })
    }
}

/// When a new scan runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanSchedule {
    /// Runs after the scan with this ID.
    Dependent(String),
    /// Calendar schedule. `start` is `TZID=<zone>:<yyyyMMddTHHmmss>`.
    Ical {
        start: String,
        repeat_rule: Option<String>,
        enabled: bool,
    },
    Never,
    Rollover,
    Template,
    Now,
}

impl ScanSchedule {
    fn kind(&self) -> &'static str {
        match self {
            Self::Dependent(_) => "dependent",
            Self::Ical { .. } => "ical",
            Self::Never => "never",
            Self::Rollover => "rollover",
            Self::Template => "template",
            Self::Now => "now",
        }
    }

    fn to_json(&self) -> Value {
        let mut schedule = json!({ "type": self.kind() });
        match self {
            Self::Dependent(id) => schedule["dependentID"] = json!(id),
            Self::Ical {
                start,
                repeat_rule,
                enabled,
            } => {
                schedule["start"] = json!(start);
                schedule["enabled"] = json!(enabled);
                if let Some(rule) = repeat_rule {
                    schedule["repeatRule"] = json!(rule);
                }
            }
            _ => {}
        }
        schedule
    }

    fn from_args(args: &RawArgs, now: DateTime<Utc>) -> ConnectorResult<Option<Self>> {
        let invalid = |msg: &str| ConnectorError::InvalidRequest(msg.to_string());
        let schedule = match args.get("schedule") {
            None => return Ok(None),
            Some("dependent") => Self::Dependent(
                args.get("dependent_id")
                    .ok_or_else(|| invalid("Dependent schedule must include a dependent scan ID"))?
                    .to_string(),
            ),
            Some("ical") => {
                let (Some(zone), Some(start)) = (args.get("time_zone"), args.get("start_time"))
                else {
                    return Err(invalid(
                        "Please make sure to provide both time_zone and start_time.",
                    ));
                };
                Self::Ical {
                    start: format!("TZID={}:{}", zone, ical_start(start, now)?),
                    repeat_rule: repeat_rule(args)?,
                    enabled: args.bool_or("enabled", true)?,
                }
            }
            Some("never") => Self::Never,
            Some("rollover") => Self::Rollover,
            Some("template") => Self::Template,
            Some("now") => Self::Now,
            Some(other) => {
                return Err(ConnectorError::InvalidRequest(format!(
                    "Unknown schedule '{}'",
                    other
                )))
            }
        };
        Ok(Some(schedule))
    }
}

/// `yyyy-MM-dd:HH:mm:ss` or a relative expression such as `2 hours`, as
/// `yyyyMMddTHHmmss`.
fn ical_start(raw: &str, now: DateTime<Utc>) -> ConnectorResult<String> {
    const ICAL: &str = "%Y%m%dT%H%M%S";
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d:%H:%M:%S") {
        return Ok(naive.format(ICAL).to_string());
    }
    parse_first_fetch(raw, now)
        .map(|ts| ts.as_datetime().format(ICAL).to_string())
        .map_err(|_| ConnectorError::InvalidRequest(format!("Invalid start_time '{}'", raw)))
}

/// `FREQ=..;INTERVAL=..[;BYDAY=..]`, or nothing when no part is given.
fn repeat_rule(args: &RawArgs) -> ConnectorResult<Option<String>> {
    let freq = args.get("repeat_rule_freq");
    let interval = args.parse::<u32>("repeat_rule_interval")?.filter(|i| *i > 0);
    let by_day = args.list("repeat_rule_by_day");
    match (freq, interval) {
        (Some(freq), Some(interval)) if by_day.is_empty() => {
            Ok(Some(format!("FREQ={};INTERVAL={}", freq, interval)))
        }
        (Some(freq), Some(interval)) => Ok(Some(format!(
            "FREQ={};INTERVAL={};BYDAY={}",
            freq,
            interval,
            by_day.join(",")
        ))),
        (None, None) if by_day.is_empty() => Ok(None),
        _ => Err(ConnectorError::InvalidRequest(
            "Please make sure to provide repeat_rule_freq, repeat_rule_interval with or without \
repeat_rule_by_day, or don't provide any of them."
                .to_string(),
        )),
    }
}

/// Assets a new scan targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSelection {
    Ids(Vec<String>),
    /// Every asset the user can use.
    AllUsable,
    /// Every asset the user can manage.
    AllManageable,
}

/// Arguments of `tenable-sc-create-scan`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateScanRequest {
    pub name: String,
    pub repository_id: String,
    pub policy_id: Option<String>,
    pub plugin_id: Option<String>,
    pub description: Option<String>,
    pub zone_id: Option<String>,
    pub schedule: Option<ScanSchedule>,
    pub assets: Option<AssetSelection>,
    pub ip_list: Option<String>,
    pub scan_virtual_hosts: Option<bool>,
    pub report_ids: Vec<String>,
    pub credentials: Vec<String>,
    pub timeout_action: Option<String>,
    pub max_scan_time_hours: Option<u64>,
    pub dhcp_tracking: Option<bool>,
    pub rollover_type: Option<String>,
}

impl TryFrom<&RawArgs> for CreateScanRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        let assets = match args.get("asset_ids") {
            None => None,
            Some("AllManageable") => Some(AssetSelection::AllManageable),
            Some("AllUsable") => Some(AssetSelection::AllUsable),
            Some(_) => Some(AssetSelection::Ids(args.list("asset_ids"))),
        };
        let ip_list = args.get("ip_list").map(str::to_string);
        if assets.is_none() && ip_list.is_none() {
            return Err(ConnectorError::InvalidRequest(
                "Assets and/or IPs must be provided".to_string(),
            ));
        }

        Ok(Self {
            name: args.required("name")?.to_string(),
            repository_id: args.required("repository_id")?.to_string(),
            policy_id: args.get("policy_id").map(str::to_string),
            plugin_id: args.get("plugin_id").map(str::to_string),
            description: args.get("description").map(str::to_string),
            zone_id: args.get("zone_id").map(str::to_string),
            schedule: ScanSchedule::from_args(args, Utc::now())?,
            assets,
            ip_list,
            scan_virtual_hosts: args.parse("scan_virtual_hosts")?,
            report_ids: args.list("report_ids"),
            credentials: args.list("credentials"),
            timeout_action: args.get("timeout_action").map(str::to_string),
            max_scan_time_hours: args.parse("max_scan_time")?,
            dhcp_tracking: args.parse("dhcp_tracking")?,
            rollover_type: args.get("rollover_type").map(str::to_string),
        })
    }
}

fn id_refs(ids: &[String]) -> Value {
    Value::Array(ids.iter().map(|id| json!({ "id": id })).collect())
}

impl CreateScanRequest {
    /// Request body for the resolved asset IDs. A policy scan when a policy
    /// is given, a plugin scan otherwise.
    pub fn body(&self, asset_ids: &[String]) -> Value {
        let scan_type = if self.policy_id.is_some() { "policy" } else { "plugin" };
        let mut body = json!({
            "name": self.name,
            "type": scan_type,
            "repository": { "id": self.repository_id },
        });
        let fields = [
            ("policy", self.policy_id.as_ref().map(|id| json!({ "id": id }))),
            ("pluginID", self.plugin_id.as_ref().map(|id| json!(id))),
            ("description", self.description.as_ref().map(|d| json!(d))),
            ("zone", self.zone_id.as_ref().map(|id| json!({ "id": id }))),
            ("dhcpTracking", self.dhcp_tracking.map(|d| json!(d))),
            ("schedule", self.schedule.as_ref().map(ScanSchedule::to_json)),
            (
                "reports",
                (!self.report_ids.is_empty()).then(|| {
                    json!(self
                        .report_ids
                        .iter()
                        .map(|id| json!({ "id": id, "reportSource": "individual" }))
                        .collect::<Vec<_>>())
                }),
            ),
            ("assets", (!asset_ids.is_empty()).then(|| id_refs(asset_ids))),
            (
                "credentials",
                (!self.credentials.is_empty()).then(|| id_refs(&self.credentials)),
            ),
            ("timeoutAction", self.timeout_action.as_ref().map(|t| json!(t))),
            ("scanningVirtualHosts", self.scan_virtual_hosts.map(|v| json!(v))),
            ("rolloverType", self.rollover_type.as_ref().map(|r| json!(r))),
            ("ipList", self.ip_list.as_ref().map(|ips| json!(ips))),
            ("maxScanTime", self.max_scan_time_hours.map(|h| json!(h * 3600))),
        ];
        if let Some(obj) = body.as_object_mut() {
            for (key, value) in fields {
                if let Some(value) = value {
                    obj.insert(key.to_string(), value);
                }
            }
        }
        body
    }
}

/// Arguments of `tenable-sc-launch-scan`.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchScanRequest {
    pub scan_id: String,
    /// Diagnostic target address and password.
    pub diagnostic: Option<(String, String)>,
}

impl TryFrom<&RawArgs> for LaunchScanRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        let diagnostic = match (args.get("diagnostic_target"), args.get("diagnostic_password")) {
            (Some(target), Some(password)) => Some((target.to_string(), password.to_string())),
            (None, None) => None,
            _ => {
                return Err(ConnectorError::InvalidRequest(
                    "If a target is provided, both IP/Hostname and the password must be provided"
                        .to_string(),
                ))
            }
        };
        Ok(Self {
            scan_id: args.required("scan_id")?.to_string(),
            diagnostic,
        })
    }
}

/// Arguments of `tenable-sc-get-scan-status`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetScanStatusRequest {
    pub scan_results_ids: Vec<String>,
}

impl TryFrom<&RawArgs> for GetScanStatusRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        args.required("scan_results_id")?;
        Ok(Self {
            scan_results_ids: args.list("scan_results_id"),
        })
    }
}

/// Arguments of `tenable-sc-get-scan-report`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetScanReportRequest {
    pub scan_results_id: String,
    /// Severities whose vulnerabilities are added to the report.
    pub vulnerability_severity: Vec<String>,
}

impl TryFrom<&RawArgs> for GetScanReportRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            scan_results_id: args.required("scan_results_id")?.to_string(),
            vulnerability_severity: args.list("vulnerability_severity"),
        })
    }
}

/// Arguments of `tenable-sc-get-vulnerability`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetVulnerabilityRequest {
    pub vulnerability_id: String,
    pub scan_results_id: String,
    /// Offset of the first host row.
    pub page: usize,
    pub limit: usize,
}

impl TryFrom<&RawArgs> for GetVulnerabilityRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            vulnerability_id: args.required("vulnerability_id")?.to_string(),
            scan_results_id: args.required("scan_results_id")?.to_string(),
            page: args.usize_or("page", 0)?,
            limit: args.usize_or("limit", 50)?.min(MAX_VULNERABILITY_ROWS),
        })
    }
}

/// CVE IDs from a plugin's `xrefs`, e.g. `CVE:CVE-2014-1234, OSVDB:1`.
fn cves_from_xrefs(xrefs: &str) -> Vec<String> {
    xrefs
        .split(',')
        .map(str::trim)
        .filter(|x| x.starts_with("CVE"))
        .map(|x| x.trim_start_matches("CVE:").trim().to_string())
        .collect()
}

/// Scan duration in minutes.
fn duration_minutes(value: Option<&Value>) -> Value {
    match epoch(value) {
        0 => Value::Null,
        secs => json!(secs as f64 / 60.0),
    }
}

impl TenableScConnector {
    pub(super) async fn list_scans(&self, request: ListScansRequest) -> ConnectorResult<CommandOutput> {
        let response = self
            .call(ApiRequest::get("scan").query("fields", SCAN_LIST_FIELDS))
            .await?;
        let scans = owned_elements(&response, request.manageable);
        if scans.is_empty() {
            return Ok(CommandOutput::message("No scans found"));
        }

        let mapped: Vec<Value> = scans
            .iter()
            .map(|s| {
                json!({
                    "ID": s.get("id"),
                    "Name": s.get("name"),
                    "Description": s.get("description"),
                    "Policy": s.pointer("/policy/name"),
                    "Group": s.pointer("/ownerGroup/name"),
                    "Owner": s.pointer("/owner/username"),
                })
            })
            .collect();
        let readable = table(
            "Tenable.sc Scans",
            &["ID", "Name", "Description", "Policy", "Group", "Owner"],
            &mapped,
        );
        Ok(CommandOutput::new(readable, "TenableSC.Scan", Value::Array(mapped)).with_raw(response))
    }

    async fn resolve_assets(&self, selection: &AssetSelection) -> ConnectorResult<Vec<String>> {
        let manageable = match selection {
            AssetSelection::Ids(ids) => return Ok(ids.clone()),
            AssetSelection::AllUsable => false,
            AssetSelection::AllManageable => true,
        };
        let response = self.call(ApiRequest::get("asset").query("fields", "id")).await?;
        let ids: Vec<String> = owned_elements(&response, manageable)
            .iter()
            .filter_map(|a| a.get("id").map(id_string))
            .collect();
        debug!(count = ids.len(), manageable, "Resolved scan assets");
        Ok(ids)
    }

    pub(super) async fn create_scan(
        &self,
        request: CreateScanRequest,
    ) -> ConnectorResult<CommandOutput> {
        let asset_ids = match &request.assets {
            Some(selection) => self.resolve_assets(selection).await?,
            None => Vec::new(),
        };
        let scan = self
            .call(ApiRequest::post("scan").json(request.body(&asset_ids)))
            .await?;
        if scan.is_null() {
            return Err(ConnectorError::InvalidResponse(
                "Could not retrieve the scan".to_string(),
            ));
        }

        let mapped = json!({
            "ID": scan.get("id"),
            "CreatorID": scan.pointer("/creator/id"),
            "Name": scan.get("name"),
            "Type": scan.get("type"),
            "CreationTime": timestamp_to_utc(scan.get("createdTime"), ""),
            "OwnerName": scan.pointer("/owner/name"),
            "Reports": values_at(scan.get("reports").unwrap_or(&Value::Null), "id"),
        });
        let readable = table(
            "Scan created successfully",
            &["ID", "CreatorID", "Name", "Type", "CreationTime", "OwnerName", "Reports"],
            &[mapped.clone()],
        );
        Ok(CommandOutput::new(readable, "TenableSC.Scan", mapped).with_raw(scan))
    }

    pub(super) async fn launch_scan(
        &self,
        request: LaunchScanRequest,
    ) -> ConnectorResult<CommandOutput> {
        let mut launch = ApiRequest::post(format!("scan/{}/launch", request.scan_id));
        if let Some((target, password)) = &request.diagnostic {
            launch = launch.json(json!({
                "diagnosticTarget": target,
                "diagnosticPassword": password,
            }));
        }
        let response = self.call(launch).await?;
        let Some(result) = response.get("scanResult").filter(|r| !r.is_null()) else {
            return Err(ConnectorError::InvalidResponse(
                "Could not retrieve the scan".to_string(),
            ));
        };

        let mapped = json!({
            "Name": result.get("name"),
            "ID": result.get("id"),
            "OwnerID": result.get("ownerID"),
            "JobID": result.get("jobID"),
            "Status": result.get("status"),
        });
        let readable = table(
            "Tenable.sc Scan",
            &["Name", "ID", "OwnerID", "JobID", "Status"],
            &[mapped.clone()],
        );
        Ok(CommandOutput::new(readable, "TenableSC.ScanResults", mapped).with_raw(response))
    }

    pub(super) async fn get_scan_status(
        &self,
        request: GetScanStatusRequest,
    ) -> ConnectorResult<CommandOutput> {
        let mut results = Vec::new();
        for id in &request.scan_results_ids {
            let result = self.call(ApiRequest::get(format!("scanResult/{}", id))).await?;
            if result.is_null() || result.as_object().is_some_and(|o| o.is_empty()) {
                return Ok(CommandOutput::message("Scan results not found"));
            }
            results.push(result);
        }

        let mapped: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "ID": r.get("id"),
                    "Name": r.get("name"),
                    "Status": r.get("status"),
                    "Description": r.get("description"),
                })
            })
            .collect();
        let readable = table(
            "Tenable.sc Scan Status",
            &["ID", "Name", "Status", "Description"],
            &mapped,
        );
        Ok(
            CommandOutput::new(readable, "TenableSC.ScanResults", Value::Array(mapped))
                .with_raw(Value::Array(results)),
        )
    }

    /// Vulnerabilities of a scan result through a temporary `vulnipdetail`
    /// query, most severe first. The query is deleted afterwards.
    async fn scan_vulnerabilities(&self, scan_results_id: &str) -> ConnectorResult<Vec<Value>> {
        let query = self
            .call(ApiRequest::post("query").json(json!({
                "name": format!("scan {} query", scan_results_id),
                "type": "vuln",
                "tool": "vulnipdetail",
                "scanID": scan_results_id,
            })))
            .await?;
        let query_id = query.get("id").map(id_string).ok_or_else(|| {
            ConnectorError::InvalidResponse("Could not get vulnerabilities query".to_string())
        })?;

        let analysis = self
            .call(ApiRequest::post("analysis").json(json!({
                "type": "vuln",
                "query": { "id": query_id },
                "sourceType": "individual",
                "scanID": scan_results_id,
                "view": "all",
            })))
            .await;
        if let Err(e) = self.call(ApiRequest::delete(format!("query/{}", query_id))).await {
            warn!(query_id = %query_id, error = %e, "Failed to delete temporary query");
        }

        let mut vulnerabilities: Vec<Value> = analysis?
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .map(|v| {
                        json!({
                            "ID": v.get("pluginID"),
                            "Name": v.get("name"),
                            "Description": v.get("pluginDescription"),
                            "Family": v.pointer("/family/name"),
                            "Severity": v.pointer("/severity/name"),
                            "Total": v.get("total"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        vulnerabilities.sort_by_key(|v| {
            std::cmp::Reverse(severity_level(v["Severity"].as_str().unwrap_or_default()))
        });
        Ok(vulnerabilities)
    }

    pub(super) async fn get_scan_report(
        &self,
        request: GetScanReportRequest,
    ) -> ConnectorResult<CommandOutput> {
        let result = self
            .call(
                ApiRequest::get(format!("scanResult/{}", request.scan_results_id))
                    .query("fields", SCAN_REPORT_FIELDS),
            )
            .await?;
        if result.is_null() || result.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(CommandOutput::message("Scan results not found"));
        }

        let mut mapped = json!({
            "ID": result.get("id"),
            "Name": result.get("name"),
            "Status": result.get("status"),
            "Description": result.get("description"),
            "Policy": result.get("details"),
            "Group": result.pointer("/ownerGroup/name"),
            "Checks": result.get("completedChecks"),
            "StartTime": timestamp_to_utc(result.get("startTime"), ""),
            "EndTime": timestamp_to_utc(result.get("finishTime"), ""),
            "Duration": duration_minutes(result.get("scanDuration")),
            "ImportTime": timestamp_to_utc(result.get("importStart"), ""),
            "ScannedIPs": result.get("scannedIPs"),
            "Owner": result.pointer("/owner/username"),
            "RepositoryName": result.pointer("/repository/name"),
        });
        let mut readable = table(
            &format!("Tenable.sc Scan {} Report", request.scan_results_id),
            &[
                "ID",
                "Name",
                "Description",
                "Policy",
                "Group",
                "Owner",
                "ScannedIPs",
                "StartTime",
                "EndTime",
                "Duration",
                "Checks",
                "ImportTime",
                "RepositoryName",
                "Status",
            ],
            &[mapped.clone()],
        );

        if !request.vulnerability_severity.is_empty() {
            let wanted: Vec<Value> = self
                .scan_vulnerabilities(&request.scan_results_id)
                .await?
                .into_iter()
                .filter(|v| {
                    v["Severity"]
                        .as_str()
                        .is_some_and(|s| request.vulnerability_severity.iter().any(|w| w == s))
                })
                .collect();
            if !wanted.is_empty() {
                readable.push_str("\n\n");
                readable.push_str(&table(
                    "Vulnerabilities",
                    &["ID", "Name", "Family", "Severity", "Total"],
                    &wanted,
                ));
                mapped["Vulnerability"] = Value::Array(wanted);
            }
        }

        Ok(CommandOutput::new(readable, "TenableSC.ScanResults", mapped).with_raw(result))
    }

    pub(super) async fn get_vulnerability(
        &self,
        request: GetVulnerabilityRequest,
    ) -> ConnectorResult<CommandOutput> {
        let analysis = self
            .call(ApiRequest::post("analysis").json(json!({
                "type": "vuln",
                "query": {
                    "scanID": request.scan_results_id,
                    "filters": [{
                        "filterName": "pluginID",
                        "operator": "=",
                        "value": request.vulnerability_id,
                    }],
                    "tool": "vulndetails",
                    "type": "vuln",
                    "startOffset": request.page,
                    "endOffset": request.page + request.limit,
                },
                "sourceType": "individual",
                "scanID": request.scan_results_id,
                "view": "all",
            })))
            .await?;
        let results = analysis
            .get("results")
            .and_then(Value::as_array)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                ConnectorError::NotFound(
                    "Vulnerability not found in the scan results".to_string(),
                )
            })?;

        let vuln = self
            .call(
                ApiRequest::get(format!("plugin/{}", request.vulnerability_id))
                    .query("fields", PLUGIN_FIELDS),
            )
            .await?;
        if vuln.is_null() {
            return Ok(CommandOutput::message("Vulnerability not found"));
        }

        let hosts: Vec<Value> = results
            .iter()
            .map(|h| {
                json!({
                    "IP": h.get("ip"),
                    "MAC": h.get("macAddress"),
                    "Port": h.get("port"),
                    "Protocol": h.get("protocol"),
                })
            })
            .collect();
        let cves = vuln
            .get("xrefs")
            .and_then(Value::as_str)
            .map(cves_from_xrefs)
            .unwrap_or_default();
        // Severity is per scan result; every row carries the same one.
        let severity = results[0].pointer("/severity/name").cloned();

        let risk = json!({
            "RiskFactor": vuln.get("riskFactor"),
            "CVSSBaseScore": vuln.get("baseScore"),
            "CVSSTemporalScore": vuln.get("temporalScore"),
            "CVSSVector": vuln.get("cvssVector"),
        });
        let exploit = json!({
            "ExploitAvailable": vuln.get("exploitAvailable"),
            "ExploitEase": vuln.get("exploitEase"),
        });
        let plugin = json!({
            "Family": vuln.pointer("/family/name"),
            "Published": timestamp_to_utc(vuln.get("pluginPubDate"), ""),
            "Modified": timestamp_to_utc(vuln.get("pluginModDate"), ""),
            "CheckType": vuln.get("checkType"),
        });
        let info = json!({
            "Published": timestamp_to_utc(vuln.get("vulnPubDate"), ""),
            "CPE": vuln.get("cpe"),
            "CVE": if cves.is_empty() { Value::Null } else { json!(cves) },
        });

        let name = vuln.get("name").and_then(Value::as_str).unwrap_or_default();
        let text = |key: &str| vuln.get(key).and_then(Value::as_str).unwrap_or_default();
        let mut readable = format!(
            "Vulnerability: {} ({})\n\nSynopsis\n{}\n\nDescription\n{}\n\nSolution\n{}\n\n",
            name,
            request.vulnerability_id,
            text("synopsis"),
            text("description"),
            text("solution"),
        );
        let sections = [
            table("Hosts", &["IP", "MAC", "Port", "Protocol"], &hosts),
            table(
                "Risk Information",
                &["RiskFactor", "CVSSBaseScore", "CVSSTemporalScore", "CVSSVector"],
                &[risk.clone()],
            ),
            table(
                "Exploit Information",
                &["ExploitAvailable", "ExploitEase"],
                &[exploit.clone()],
            ),
            table(
                "Plugin Details",
                &["Family", "Published", "Modified", "CheckType"],
                &[plugin.clone()],
            ),
            table("Vulnerability Information", &["Published", "CPE", "CVE"], &[info.clone()]),
        ];
        readable.push_str(&sections.join("\n\n"));

        let mut mapped = json!({
            "ID": vuln.get("id"),
            "Name": name,
            "Description": vuln.get("description"),
            "Type": vuln.get("type"),
            "Severity": severity,
            "Synopsis": vuln.get("synopsis"),
            "Solution": vuln.get("solution"),
            "PluginDetails": plugin,
            "Host": hosts,
        });
        for section in [info, exploit, risk] {
            if let (Some(target), Value::Object(fields)) = (mapped.as_object_mut(), section) {
                target.extend(fields);
            }
        }

        let indicators = cves.iter().map(|id| json!({ "ID": id })).collect();
        Ok(
            CommandOutput::new(readable, "TenableSC.ScanResults.Vulnerability", mapped)
                .with_raw(vuln)
                .with_indicators(indicators),
        )
    }
}
