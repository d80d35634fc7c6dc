//! Resource Resolver
//!
//! Derives the array-side names for a host and makes sure the per-host
//! storage group and host record exist. Nothing is cached: every call
//! re-reads the array.

use crate::domain::array::{Host, MaskingView, StorageGroup};
use crate::domain::ports::ArrayClientRef;
use crate::error::{Error, Result, ResultExt};
use tracing::{debug, info};

/// Suffix of host record names derived from a storage group name
pub const HOST_SUFFIX: &str = "_IG";

/// Suffix of masking view names derived from a storage group name
pub const MASKING_VIEW_SUFFIX: &str = "_MV";

/// Strip everything outside `[A-Za-z0-9_]`
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Result of an ensure-style lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Ensured<T> {
    pub resource: T,
    /// Whether the resource was already present
    pub existed: bool,
}

/// Resolves and provisions the per-host resources on one array
pub struct ResourceResolver {
    client: ArrayClientRef,
    array_id: String,
    group_prefix: String,
}

impl ResourceResolver {
    pub fn new(
        client: ArrayClientRef,
        array_id: impl Into<String>,
        group_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            array_id: array_id.into(),
            group_prefix: group_prefix.into(),
        }
    }

    pub fn array_id(&self) -> &str {
        &self.array_id
    }

    /// Storage group name for a host initiator
    pub fn resolve_group_name(&self, initiator: &str) -> String {
        format!("{}{}", self.group_prefix, sanitize_identifier(initiator))
    }

    /// Host record name for a host initiator
    pub fn resolve_host_name(&self, initiator: &str) -> String {
        format!("{}{}", self.resolve_group_name(initiator), HOST_SUFFIX)
    }

    /// Masking view name for a host initiator
    pub fn resolve_masking_view_name(&self, initiator: &str) -> String {
        format!("{}{}", self.resolve_group_name(initiator), MASKING_VIEW_SUFFIX)
    }

    /// Look up a storage group, creating it empty when the array reports it absent
    pub async fn ensure_storage_group(&self, group_name: &str) -> Result<Ensured<StorageGroup>> {
        match self
            .client
            .get_storage_group(&self.array_id, group_name)
            .await
        {
            Ok(group) => {
                debug!(group = group_name, "Storage group exists");
                Ok(Ensured {
                    resource: group,
                    existed: true,
                })
            }
            Err(e) if e.is_not_found() => {
                info!(group = group_name, array = %self.array_id, "Creating storage group");
                let group = self
                    .client
                    .create_storage_group(&self.array_id, group_name)
                    .await
                    .context("create_storage_group", group_name)?;
                Ok(Ensured {
                    resource: group,
                    existed: false,
                })
            }
            Err(e) => Err(e.context("get_storage_group", group_name)),
        }
    }

    /// Look up a host record, creating it with the initiator when absent
    pub async fn ensure_host(&self, host_name: &str, initiator: &str) -> Result<Ensured<Host>> {
        match self.client.get_host(&self.array_id, host_name).await {
            Ok(host) => {
                if !host.has_initiator(initiator) {
                    return Err(Error::Conflict {
                        kind: "Host".into(),
                        name: host_name.into(),
                        reason: format!("host does not carry initiator {}", initiator),
                    });
                }
                debug!(host = host_name, "Host record exists");
                Ok(Ensured {
                    resource: host,
                    existed: true,
                })
            }
            Err(e) if e.is_not_found() => {
                info!(host = host_name, initiator, "Creating host record");
                let host = self
                    .client
                    .create_host(&self.array_id, host_name, &[initiator.to_string()])
                    .await
                    .context("create_host", host_name)?;
                Ok(Ensured {
                    resource: host,
                    existed: false,
                })
            }
            Err(e) => Err(e.context("get_host", host_name)),
        }
    }

    /// First masking view of a group whose host carries the initiator
    pub async fn find_bound_view(
        &self,
        group: &StorageGroup,
        initiator: &str,
    ) -> Result<Option<MaskingView>> {
        for view_id in &group.masking_views {
            let view = self
                .client
                .get_masking_view(&self.array_id, view_id)
                .await
                .context("get_masking_view", view_id)?;
            let host = self
                .client
                .get_host(&self.array_id, &view.host_id)
                .await
                .context("get_host", &view.host_id)?;

            if host.has_initiator(initiator) {
                debug!(view = %view.masking_view_id, host = %host.host_id, "Found bound masking view");
                return Ok(Some(view));
            }
        }
        Ok(None)
    }

    /// Masking views the host record belongs to, whatever group they bind.
    ///
    /// A missing host has no views.
    pub async fn host_views(&self, host_name: &str) -> Result<Vec<MaskingView>> {
        let host = match self.client.get_host(&self.array_id, host_name).await {
            Ok(host) => host,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.context("get_host", host_name)),
        };

        let mut views = Vec::with_capacity(host.masking_views.len());
        for view_id in &host.masking_views {
            let view = self
                .client
                .get_masking_view(&self.array_id, view_id)
                .await
                .context("get_masking_view", view_id)?;
            views.push(view);
        }
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::InMemoryArray;
    use crate::domain::ports::ArrayClient;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const SYMM: &str = "000197900123";

    fn resolver(array: Arc<InMemoryArray>) -> ResourceResolver {
        ResourceResolver::new(array, SYMM, "libStorage_")
    }

    #[test]
    fn test_resolve_group_name_strips_non_word_characters() {
        let r = resolver(Arc::new(InMemoryArray::new(SYMM)));
        assert_eq!(
            r.resolve_group_name("iqn.1994-05:host_1/"),
            "libStorage_iqn199405host_1"
        );
        assert_eq!(
            r.resolve_group_name("iqn.1994-05:host_1/"),
            r.resolve_group_name("iqn.1994-05:host_1/")
        );
        assert_eq!(
            r.resolve_host_name("iqn.1994-05:host_1/"),
            "libStorage_iqn199405host_1_IG"
        );
        assert_eq!(
            r.resolve_masking_view_name("iqn.1994-05:host_1/"),
            "libStorage_iqn199405host_1_MV"
        );
    }

    #[test]
    fn test_sanitize_keeps_only_word_characters() {
        let sanitized = sanitize_identifier("aA9_ -.:/@é+");
        assert_eq!(sanitized, "aA9_");
        assert!(sanitized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[tokio::test]
    async fn test_ensure_storage_group_twice() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        let r = resolver(array.clone());

        let first = r.ensure_storage_group("libStorage_host1").await.unwrap();
        assert!(!first.existed);
        let second = r.ensure_storage_group("libStorage_host1").await.unwrap();
        assert!(second.existed);
        assert_eq!(array.storage_group_count(), 1);
    }

    #[tokio::test]
    async fn test_ensure_storage_group_propagates_other_errors() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        array.fail_operation("get_storage_group");
        let r = resolver(array.clone());

        let err = r.ensure_storage_group("libStorage_host1").await.unwrap_err();
        assert_matches!(err, Error::Array { .. });
        assert_eq!(array.storage_group_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_host_registers_initiator() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        let r = resolver(array.clone());
        let iqn = "iqn.2001-04.com.example:node1";

        let host = r.ensure_host("h1_IG", iqn).await.unwrap();
        assert!(!host.existed);
        assert!(host.resource.has_initiator(iqn));
        assert!(r.ensure_host("h1_IG", iqn).await.unwrap().existed);
        assert_eq!(array.list_hosts(SYMM).await.unwrap(), vec!["h1_IG".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_host_rejects_foreign_host() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        array
            .create_host(SYMM, "h1_IG", &["iqn.other".to_string()])
            .await
            .unwrap();
        let r = resolver(array);
        assert_matches!(
            r.ensure_host("h1_IG", "iqn.mine").await,
            Err(Error::Conflict { .. })
        );
    }
}
