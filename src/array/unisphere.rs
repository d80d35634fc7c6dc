//! Unisphere REST Client
//!
//! [`ArrayClient`] implementation over the Unisphere for PowerMax/VMAX
//! provisioning API (`/univmax/restapi/<version>/sloprovisioning`).

use crate::config::DriverConfig;
use crate::domain::array::{
    CreateMaskingViewParam, CreateVolumeParam, Host, MaskingView, StorageGroup, SymmetrixInfo,
    VolumeDetails, CAPACITY_UNIT_GB, EMULATION_FBA,
};
use crate::domain::ports::ArrayClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, info};

// =============================================================================
// Constants
// =============================================================================

/// REST API version segment
pub const API_VERSION: &str = "90";

const PROVISIONING: &str = "sloprovisioning/symmetrix";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct VolumeIdEntry {
    #[serde(rename = "volumeId")]
    volume_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResultList {
    #[serde(default)]
    result: Vec<VolumeIdEntry>,
}

/// Paged volume listing
#[derive(Debug, Deserialize)]
struct VolumeIterator {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    count: usize,
    #[serde(default, rename = "maxPageSize")]
    max_page_size: usize,
    #[serde(default, rename = "resultList")]
    result_list: ResultList,
}

#[derive(Debug, Deserialize)]
struct HostList {
    #[serde(default, rename = "hostId")]
    host_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

// =============================================================================
// Unisphere Client
// =============================================================================

/// Client for one Unisphere endpoint
pub struct UnisphereClient {
    http: Client,
    base_url: Url,
    user_name: String,
    password: String,
}

impl UnisphereClient {
    /// Build a client from validated driver configuration
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let base_url = config.base_url()?;

        let mut builder = Client::builder().danger_accept_invalid_certs(config.insecure);
        if config.use_certs {
            let path = config.cert_file.as_ref().ok_or_else(|| {
                Error::Configuration("client certificate file is not configured".into())
            })?;
            let pem = std::fs::read(path)?;
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        }

        info!(
            endpoint = %base_url,
            insecure = config.insecure,
            use_certs = config.use_certs,
            "Constructed Unisphere client"
        );

        Ok(Self {
            http: builder.build()?,
            base_url,
            user_name: config.user_name.clone(),
            password: config.password.clone(),
        })
    }

    /// URL of a resource under the provisioning API of an array
    fn resource_url(&self, array_id: &str, segments: &[&str]) -> Result<Url> {
        let mut path = format!(
            "univmax/restapi/{}/{}/{}",
            API_VERSION,
            PROVISIONING,
            urlencoding::encode(array_id)
        );
        for segment in segments {
            path.push('/');
            path.push_str(&urlencoding::encode(segment));
        }
        self.base_url
            .join(&path)
            .map_err(|e| Error::Internal(format!("invalid resource path '{}': {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.user_name, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// Send a request and decode a JSON response
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        kind: &str,
        name: &str,
        operation: &str,
    ) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        check_status(status, &body, kind, name, operation)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Send a request whose response body is ignored
    async fn send_empty(
        &self,
        request: RequestBuilder,
        kind: &str,
        name: &str,
        operation: &str,
    ) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        check_status(status, &body, kind, name, operation)
    }

    async fn edit_storage_group(&self, array_id: &str, group_id: &str, action: Value) -> Result<()> {
        let url = self.resource_url(array_id, &["storagegroup", group_id])?;
        let body = json!({ "editStorageGroupActionParam": action });
        self.send_empty(
            self.request(Method::PUT, url).json(&body),
            "StorageGroup",
            group_id,
            "edit_storage_group",
        )
        .await
    }

    /// Volume IDs carrying a volume identifier
    async fn volumes_named(&self, array_id: &str, name: &str) -> Result<BTreeSet<String>> {
        let url = self.resource_url(array_id, &["volume"])?;
        let request = self
            .request(Method::GET, url)
            .query(&[("volume_identifier", name)]);
        let listing: VolumeIterator = self
            .send_json(request, "Volume", name, "list_volumes")
            .await?;
        Ok(listing
            .result_list
            .result
            .into_iter()
            .map(|e| e.volume_id)
            .collect())
    }

    /// Fetch remaining pages of an iterator
    async fn drain_iterator(&self, listing: VolumeIterator) -> Result<Vec<String>> {
        let mut ids: Vec<String> = listing
            .result_list
            .result
            .into_iter()
            .map(|e| e.volume_id)
            .collect();

        let (Some(iterator_id), page_size) = (listing.id, listing.max_page_size.max(1)) else {
            return Ok(ids);
        };

        while ids.len() < listing.count {
            let from = ids.len() + 1;
            let to = (ids.len() + page_size).min(listing.count);
            let path = format!(
                "univmax/restapi/common/Iterator/{}/page",
                urlencoding::encode(&iterator_id)
            );
            let url = self
                .base_url
                .join(&path)
                .map_err(|e| Error::Internal(format!("invalid iterator path: {}", e)))?;
            let request = self
                .request(Method::GET, url)
                .query(&[("from", from.to_string()), ("to", to.to_string())]);

            debug!(iterator = %iterator_id, from, to, "Fetching volume page");
            let page: ResultList = self
                .send_json(request, "Iterator", &iterator_id, "list_volumes")
                .await?;
            if page.result.is_empty() {
                break;
            }
            ids.extend(page.result.into_iter().map(|e| e.volume_id));
        }

        Ok(ids)
    }
}

#[async_trait]
impl ArrayClient for UnisphereClient {
    async fn get_symmetrix(&self, array_id: &str) -> Result<SymmetrixInfo> {
        let url = self.resource_url(array_id, &[])?;
        self.send_json(self.request(Method::GET, url), "Symmetrix", array_id, "get_symmetrix")
            .await
    }

    async fn get_storage_group(&self, array_id: &str, group_id: &str) -> Result<StorageGroup> {
        let url = self.resource_url(array_id, &["storagegroup", group_id])?;
        self.send_json(
            self.request(Method::GET, url),
            "StorageGroup",
            group_id,
            "get_storage_group",
        )
        .await
    }

    async fn create_storage_group(&self, array_id: &str, group_id: &str) -> Result<StorageGroup> {
        let url = self.resource_url(array_id, &["storagegroup"])?;
        let body = create_storage_group_body(group_id);
        self.send_empty(
            self.request(Method::POST, url).json(&body),
            "StorageGroup",
            group_id,
            "create_storage_group",
        )
        .await?;
        self.get_storage_group(array_id, group_id).await
    }

    async fn delete_storage_group(&self, array_id: &str, group_id: &str) -> Result<()> {
        let url = self.resource_url(array_id, &["storagegroup", group_id])?;
        self.send_empty(
            self.request(Method::DELETE, url),
            "StorageGroup",
            group_id,
            "delete_storage_group",
        )
        .await
    }

    async fn add_volume_to_storage_group(
        &self,
        array_id: &str,
        group_id: &str,
        volume_id: &str,
    ) -> Result<()> {
        self.edit_storage_group(array_id, group_id, add_specific_volume_action(volume_id))
            .await
    }

    async fn remove_volume_from_storage_group(
        &self,
        array_id: &str,
        group_id: &str,
        volume_id: &str,
    ) -> Result<()> {
        let action = json!({ "removeVolumeParam": { "volumeId": [volume_id] } });
        self.edit_storage_group(array_id, group_id, action).await
    }

    async fn get_host(&self, array_id: &str, host_id: &str) -> Result<Host> {
        let url = self.resource_url(array_id, &["host", host_id])?;
        self.send_json(self.request(Method::GET, url), "Host", host_id, "get_host")
            .await
    }

    async fn create_host(
        &self,
        array_id: &str,
        host_id: &str,
        initiators: &[String],
    ) -> Result<Host> {
        let url = self.resource_url(array_id, &["host"])?;
        let body = json!({ "hostId": host_id, "initiatorId": initiators });
        self.send_empty(
            self.request(Method::POST, url).json(&body),
            "Host",
            host_id,
            "create_host",
        )
        .await?;
        self.get_host(array_id, host_id).await
    }

    async fn list_hosts(&self, array_id: &str) -> Result<Vec<String>> {
        let url = self.resource_url(array_id, &["host"])?;
        let hosts: HostList = self
            .send_json(self.request(Method::GET, url), "Host", "*", "list_hosts")
            .await?;
        Ok(hosts.host_ids)
    }

    async fn get_masking_view(&self, array_id: &str, view_id: &str) -> Result<MaskingView> {
        let url = self.resource_url(array_id, &["maskingview", view_id])?;
        self.send_json(
            self.request(Method::GET, url),
            "MaskingView",
            view_id,
            "get_masking_view",
        )
        .await
    }

    async fn create_masking_view(
        &self,
        array_id: &str,
        param: &CreateMaskingViewParam,
    ) -> Result<MaskingView> {
        let url = self.resource_url(array_id, &["maskingview"])?;
        let body = create_masking_view_body(param);
        self.send_empty(
            self.request(Method::POST, url).json(&body),
            "MaskingView",
            &param.masking_view_id,
            "create_masking_view",
        )
        .await?;
        self.get_masking_view(array_id, &param.masking_view_id).await
    }

    async fn list_volumes(&self, array_id: &str) -> Result<Vec<String>> {
        let url = self.resource_url(array_id, &["volume"])?;
        let listing: VolumeIterator = self
            .send_json(self.request(Method::GET, url), "Volume", "*", "list_volumes")
            .await?;
        self.drain_iterator(listing).await
    }

    async fn get_volume(&self, array_id: &str, volume_id: &str) -> Result<VolumeDetails> {
        let url = self.resource_url(array_id, &["volume", volume_id])?;
        self.send_json(self.request(Method::GET, url), "Volume", volume_id, "get_volume")
            .await
    }

    async fn create_volume(
        &self,
        array_id: &str,
        group_id: &str,
        param: &CreateVolumeParam,
    ) -> Result<String> {
        let existing = self.volumes_named(array_id, &param.name).await?;

        self.edit_storage_group(array_id, group_id, expand_storage_group_action(param))
            .await?;

        let created = self.volumes_named(array_id, &param.name).await?;
        created
            .difference(&existing)
            .next()
            .cloned()
            .ok_or_else(|| Error::Array {
                operation: "create_volume".into(),
                target: param.name.clone(),
                reason: "new volume not found after allocation".into(),
            })
    }

    async fn delete_volume(&self, array_id: &str, volume_id: &str) -> Result<()> {
        let url = self.resource_url(array_id, &["volume", volume_id])?;
        self.send_empty(
            self.request(Method::DELETE, url),
            "Volume",
            volume_id,
            "delete_volume",
        )
        .await
    }
}

// =============================================================================
// Payloads
// =============================================================================

fn create_storage_group_body(group_id: &str) -> Value {
    json!({
        "storageGroupId": group_id,
        "srpId": "None",
        "emulation": EMULATION_FBA,
    })
}

fn expand_storage_group_action(param: &CreateVolumeParam) -> Value {
    json!({
        "expandStorageGroupParam": {
            "addVolumeParam": {
                "num_of_vols": 1,
                "emulation": param.emulation,
                "create_new_volumes": true,
                "volumeAttribute": {
                    "capacityUnit": CAPACITY_UNIT_GB,
                    "volume_size": param.size_gb.to_string(),
                },
                "volumeIdentifier": {
                    "identifier_name": param.name,
                    "volumeIdentifierChoice": "identifier_name",
                },
            }
        }
    })
}

fn add_specific_volume_action(volume_id: &str) -> Value {
    json!({
        "expandStorageGroupParam": {
            "addSpecificVolumeParam": { "volumeId": [volume_id] }
        }
    })
}

fn create_masking_view_body(param: &CreateMaskingViewParam) -> Value {
    json!({
        "maskingViewId": param.masking_view_id,
        "hostOrHostGroupSelection": {
            "useExistingHostParam": { "hostId": param.host_id }
        },
        "portGroupSelection": {
            "useExistingPortGroupParam": { "portGroupId": param.port_group_id }
        },
        "storageGroupSelection": {
            "useExistingStorageGroupParam": { "storageGroupId": param.storage_group_id }
        },
    })
}

/// Map an HTTP status to the driver error taxonomy
fn check_status(
    status: StatusCode,
    body: &str,
    kind: &str,
    name: &str,
    operation: &str,
) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    let reason = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("{}: {}", status, body.trim()));

    match status {
        StatusCode::NOT_FOUND => Err(Error::not_found(kind, name)),
        StatusCode::CONFLICT => Err(Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            reason,
        }),
        _ => Err(Error::Array {
            operation: operation.to_string(),
            target: name.to_string(),
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn client() -> UnisphereClient {
        let config = DriverConfig::new("https://u4p.lab.local", "000197900123");
        UnisphereClient::new(&config).unwrap()
    }

    #[test]
    fn test_resource_url() {
        let url = client()
            .resource_url("000197900123", &["storagegroup", "libStorage_iqn1"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://u4p.lab.local:8443/univmax/restapi/90/sloprovisioning/symmetrix/000197900123/storagegroup/libStorage_iqn1"
        );
    }

    #[test]
    fn test_resource_url_encodes_segments() {
        let url = client()
            .resource_url("000197900123", &["host", "a b"])
            .unwrap();
        assert!(url.as_str().ends_with("/host/a%20b"));
    }

    #[test]
    fn test_check_status_classifies() {
        assert!(check_status(StatusCode::OK, "", "Volume", "1", "get_volume").is_ok());
        assert_matches!(
            check_status(StatusCode::NOT_FOUND, "", "Volume", "1", "get_volume"),
            Err(Error::NotFound { .. })
        );
        assert_matches!(
            check_status(
                StatusCode::CONFLICT,
                r#"{"message":"already exists"}"#,
                "Host",
                "h1",
                "create_host"
            ),
            Err(Error::Conflict { reason, .. }) if reason == "already exists"
        );
        assert_matches!(
            check_status(
                StatusCode::INTERNAL_SERVER_ERROR,
                "boom",
                "Volume",
                "1",
                "delete_volume"
            ),
            Err(Error::Array { operation, .. }) if operation == "delete_volume"
        );
    }

    #[test]
    fn test_expand_payload() {
        let body = expand_storage_group_action(&CreateVolumeParam::new("data01", 16));
        let add = &body["expandStorageGroupParam"]["addVolumeParam"];
        assert_eq!(add["num_of_vols"], 1);
        assert_eq!(add["emulation"], "FBA");
        assert_eq!(add["volumeAttribute"]["volume_size"], "16");
        assert_eq!(add["volumeAttribute"]["capacityUnit"], "GB");
        assert_eq!(add["volumeIdentifier"]["identifier_name"], "data01");
    }

    #[test]
    fn test_add_existing_volume_payload() {
        let body = add_specific_volume_action("0012A");
        assert_eq!(
            body["expandStorageGroupParam"]["addSpecificVolumeParam"]["volumeId"],
            serde_json::json!(["0012A"])
        );
        assert!(body.get("addVolumeParam").is_none());
    }

    #[test]
    fn test_masking_view_payload() {
        let body = create_masking_view_body(&CreateMaskingViewParam {
            masking_view_id: "mv".into(),
            host_id: "h".into(),
            port_group_id: "pg".into(),
            storage_group_id: "sg".into(),
        });
        assert_eq!(body["hostOrHostGroupSelection"]["useExistingHostParam"]["hostId"], "h");
        assert_eq!(
            body["storageGroupSelection"]["useExistingStorageGroupParam"]["storageGroupId"],
            "sg"
        );
        assert_eq!(create_storage_group_body("sg")["srpId"], "None");
    }

    #[test]
    fn test_volume_iterator_decodes() {
        let json = r#"{
            "id": "abc-123",
            "count": 2,
            "maxPageSize": 1000,
            "resultList": { "result": [{"volumeId": "1"}, {"volumeId": "2"}], "from": 1, "to": 2 }
        }"#;
        let listing: VolumeIterator = serde_json::from_str(json).unwrap();
        assert_eq!(listing.count, 2);
        assert_eq!(listing.result_list.result.len(), 2);
    }

    #[test]
    fn test_empty_volume_iterator_decodes() {
        let listing: VolumeIterator =
            serde_json::from_str(r#"{"count": 0, "maxPageSize": 1000}"#).unwrap();
        assert_eq!(listing.count, 0);
        assert!(listing.result_list.result.is_empty());
        assert!(listing.id.is_none());
    }
}
