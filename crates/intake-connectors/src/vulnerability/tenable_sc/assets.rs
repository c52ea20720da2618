use super::{owned_elements, timestamp_to_utc, values_at, TenableScConnector};
use crate::args::RawArgs;
use crate::command::{table, CommandOutput};
use crate::http::ApiRequest;
use crate::traits::{ConnectorError, ConnectorResult};
use regex::Regex;
use serde_json::{json, Map, Value};

const ASSET_LIST_FIELDS: &str = "id,name,description,ipCount,type,tags,modifiedTime,groups,owner";

const ASSET_FIELDS: &str =
    "id,name,description,status,createdTime,modifiedTime,viewableIPs,ownerGroup,tags,owner";

const IPV4_PATTERN: &str = r"[0-9]+(?:\.[0-9]+){3}";

/// Arguments of `tenable-sc-list-assets`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListAssetsRequest {
    pub manageable: bool,
}

impl TryFrom<&RawArgs> for ListAssetsRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            manageable: args.bool_or("manageable", false)?,
        })
    }
}

/// Arguments of `tenable-sc-get-asset`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetAssetRequest {
    pub asset_id: String,
}

impl TryFrom<&RawArgs> for GetAssetRequest {
    type Error = ConnectorError;

    fn try_from(args: &RawArgs) -> ConnectorResult<Self> {
        Ok(Self {
            asset_id: args.required("asset_id")?.to_string(),
        })
    }
}

/// IPv4 addresses in the `ipList` of every viewable range. Ranges such as
/// `10.0.0.1-10.0.0.9` yield both ends.
fn viewable_ips(asset: &Value) -> ConnectorResult<Vec<String>> {
    let pattern = Regex::new(IPV4_PATTERN).map_err(|e| ConnectorError::Internal(e.to_string()))?;
    let lists = asset
        .get("viewableIPs")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    Ok(lists
        .iter()
        .filter_map(|v| v.get("ipList").and_then(Value::as_str))
        .flat_map(|list| pattern.find_iter(list).map(|m| m.as_str().to_string()))
        .collect())
}

impl TenableScConnector {
    pub(super) async fn list_assets(
        &self,
        request: ListAssetsRequest,
    ) -> ConnectorResult<CommandOutput> {
        let response = self
            .call(ApiRequest::get("asset").query("fields", ASSET_LIST_FIELDS))
            .await?;
        let assets = owned_elements(&response, request.manageable);
        if assets.is_empty() {
            return Ok(CommandOutput::message("No assets found"));
        }

        let mapped: Vec<Value> = assets
            .iter()
            .map(|a| {
                json!({
                    "ID": a.get("id"),
                    "Name": a.get("name"),
                    "Tag": a.get("tags"),
                    "Owner": a.pointer("/owner/username"),
                    "Type": a.get("type"),
                    "Group": a.pointer("/ownerGroup/name"),
                    "HostCount": a.get("ipCount"),
                    "LastModified": timestamp_to_utc(a.get("modifiedTime"), ""),
                })
            })
            .collect();
        let readable = table(
            "Tenable.sc Assets",
            &["ID", "Name", "HostCount", "Type", "Tag", "Owner", "Group", "LastModified"],
            &mapped,
        );
        Ok(CommandOutput::new(readable, "TenableSC.Asset", Value::Array(mapped)).with_raw(response))
    }

    pub(super) async fn get_asset(&self, request: GetAssetRequest) -> ConnectorResult<CommandOutput> {
        let asset = self
            .call(
                ApiRequest::get(format!("asset/{}", request.asset_id))
                    .query("fields", ASSET_FIELDS),
            )
            .await?;
        if asset.is_null() || asset.as_object().is_some_and(Map::is_empty) {
            return Ok(CommandOutput::message("Asset not found"));
        }

        let ips = viewable_ips(&asset)?;
        let mapped = json!({
            "ID": asset.get("id"),
            "Name": asset.get("name"),
            "Description": asset.get("description"),
            "Tag": asset.get("tags"),
            "Created": timestamp_to_utc(asset.get("createdTime"), ""),
            "Modified": timestamp_to_utc(asset.get("modifiedTime"), ""),
            "Owner": values_at(&asset, "owner.username"),
            "Group": values_at(&asset, "ownerGroup.name"),
            "IPs": ips,
        });
        let readable = table(
            "Tenable.sc Asset",
            &["ID", "Name", "Description", "Tag", "Created", "Modified", "Owner", "Group", "IPs"],
            &[mapped.clone()],
        );
        Ok(CommandOutput::new(readable, "TenableSC.Asset", mapped).with_raw(asset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewable_ips() {
        let asset = json!({
            "viewableIPs": [
                {"ipList": "10.0.0.1,10.0.0.5-10.0.0.9"},
                {"ipList": "192.168.1.20"},
                {"repository": {"id": "1"}}
            ]
        });
        assert_eq!(
            viewable_ips(&asset).unwrap(),
            vec!["10.0.0.1", "10.0.0.5", "10.0.0.9", "192.168.1.20"]
        );
        assert!(viewable_ips(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_asset_requests_from_args() {
        assert!(GetAssetRequest::try_from(&RawArgs::new()).is_err());
        let list = ListAssetsRequest::try_from(&RawArgs::new().with("manageable", "true")).unwrap();
        assert!(list.manageable);
    }
}
