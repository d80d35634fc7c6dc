//! Attachment Orchestrator
//!
//! Drives attach requests through
//! `ResolveHostGroup -> EnsureHostRecord -> ResolveMaskingView ->
//! EnsureMaskingView -> MutateGroupMembership -> VerifyAttachment`.
//!
//! Every step re-reads the array; nothing about the group/host/view topology
//! is kept between requests. A failing step ends the request with its error
//! and leaves whatever earlier steps provisioned in place, so a retry of the
//! same attach finds those resources and carries on.

use crate::domain::array::{CreateMaskingViewParam, MaskingView, StorageGroup};
use crate::domain::ports::{ArrayClientRef, InstanceId, Volume};
use crate::driver::lifecycle::VolumeLifecycle;
use crate::driver::resolver::ResourceResolver;
use crate::error::{Error, Result, ResultExt};
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// States
// =============================================================================

/// Steps of an attach request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    ResolveHostGroup,
    EnsureHostRecord,
    ResolveMaskingView,
    EnsureMaskingView,
    MutateGroupMembership,
    VerifyAttachment,
}

enum Step {
    Next(AttachState),
    Done(Volume),
}

/// Result of a completed attach
#[derive(Debug, Clone)]
pub struct AttachOutcome {
    /// Volume re-read with attachment info
    pub volume: Volume,
    /// States visited, in order
    pub path: Vec<AttachState>,
    pub created_group: bool,
    pub created_host: bool,
    pub created_view: bool,
    /// False when the volume was already in the bound group
    pub membership_changed: bool,
}

/// Working data of one attach request
struct AttachContext<'a> {
    volume_id: &'a str,
    initiator: &'a str,
    group_name: String,
    host_name: String,
    group: Option<StorageGroup>,
    bound_view: Option<MaskingView>,
    path: Vec<AttachState>,
    created_group: bool,
    created_host: bool,
    created_view: bool,
    membership_changed: bool,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Attach/detach state machine for the per-host masking-view topology
pub struct AttachmentOrchestrator {
    client: ArrayClientRef,
    resolver: Arc<ResourceResolver>,
    lifecycle: Arc<VolumeLifecycle>,
    port_group: Option<String>,
}

impl AttachmentOrchestrator {
    pub fn new(
        client: ArrayClientRef,
        resolver: Arc<ResourceResolver>,
        lifecycle: Arc<VolumeLifecycle>,
        port_group: Option<String>,
    ) -> Self {
        Self {
            client,
            resolver,
            lifecycle,
            port_group,
        }
    }

    fn array_id(&self) -> &str {
        self.resolver.array_id()
    }

    /// Make a volume visible to an instance.
    ///
    /// Attaching a volume that is already in the instance's bound group
    /// succeeds without touching membership.
    pub async fn attach(&self, volume_id: &str, instance: &InstanceId) -> Result<AttachOutcome> {
        validate_request(volume_id, instance)?;

        let mut ctx = AttachContext {
            volume_id,
            initiator: &instance.id,
            group_name: self.resolver.resolve_group_name(&instance.id),
            host_name: self.resolver.resolve_host_name(&instance.id),
            group: None,
            bound_view: None,
            path: Vec::new(),
            created_group: false,
            created_host: false,
            created_view: false,
            membership_changed: false,
        };

        info!(
            volume_id,
            initiator = %instance.id,
            group = %ctx.group_name,
            "Attaching volume"
        );

        let mut state = AttachState::ResolveHostGroup;
        loop {
            debug!(volume_id, ?state, "Attach step");
            ctx.path.push(state);
            match self.step(state, &mut ctx).await? {
                Step::Next(next) => state = next,
                Step::Done(volume) => {
                    info!(volume_id, initiator = %instance.id, "Volume attached");
                    return Ok(AttachOutcome {
                        volume,
                        path: ctx.path,
                        created_group: ctx.created_group,
                        created_host: ctx.created_host,
                        created_view: ctx.created_view,
                        membership_changed: ctx.membership_changed,
                    });
                }
            }
        }
    }

    async fn step(&self, state: AttachState, ctx: &mut AttachContext<'_>) -> Result<Step> {
        match state {
            AttachState::ResolveHostGroup => {
                let ensured = self.resolver.ensure_storage_group(&ctx.group_name).await?;
                ctx.created_group = !ensured.existed;
                ctx.group = Some(ensured.resource);
                Ok(Step::Next(AttachState::EnsureHostRecord))
            }
            AttachState::EnsureHostRecord => {
                let ensured = self
                    .resolver
                    .ensure_host(&ctx.host_name, ctx.initiator)
                    .await?;
                ctx.created_host = !ensured.existed;
                Ok(Step::Next(AttachState::ResolveMaskingView))
            }
            AttachState::ResolveMaskingView => {
                let group = ctx.group.as_ref().ok_or_else(|| {
                    Error::Internal("storage group not resolved before masking view".into())
                })?;
                ctx.bound_view = self.resolver.find_bound_view(group, ctx.initiator).await?;
                match ctx.bound_view {
                    Some(_) => Ok(Step::Next(AttachState::MutateGroupMembership)),
                    None => Ok(Step::Next(AttachState::EnsureMaskingView)),
                }
            }
            AttachState::EnsureMaskingView => {
                let view = self.ensure_masking_view(ctx).await?;
                ctx.bound_view = Some(view);
                Ok(Step::Next(AttachState::MutateGroupMembership))
            }
            AttachState::MutateGroupMembership => {
                let view = ctx.bound_view.as_ref().ok_or_else(|| {
                    Error::Internal("masking view not resolved before membership change".into())
                })?;
                ctx.membership_changed = self
                    .add_to_bound_group(ctx.volume_id, &view.storage_group_id)
                    .await?;
                Ok(Step::Next(AttachState::VerifyAttachment))
            }
            AttachState::VerifyAttachment => {
                let volume = self.lifecycle.inspect(ctx.volume_id, true).await?;
                let visible = volume
                    .attachments
                    .iter()
                    .any(|a| a.instance_id.id.eq_ignore_ascii_case(ctx.initiator));
                if !visible {
                    return Err(Error::AttachmentNotVisible {
                        volume_id: ctx.volume_id.to_string(),
                        initiator: ctx.initiator.to_string(),
                    });
                }
                Ok(Step::Done(volume))
            }
        }
    }

    /// Create the masking view binding this host's group, host record and
    /// the configured port group.
    async fn ensure_masking_view(&self, ctx: &mut AttachContext<'_>) -> Result<MaskingView> {
        let port_group = self.port_group.as_deref().ok_or_else(|| {
            Error::Configuration(format!(
                "no masking view binds initiator {} and no port group is configured to create one",
                ctx.initiator
            ))
        })?;

        let param = CreateMaskingViewParam {
            masking_view_id: self.resolver.resolve_masking_view_name(ctx.initiator),
            host_id: ctx.host_name.clone(),
            port_group_id: port_group.to_string(),
            storage_group_id: ctx.group_name.clone(),
        };

        info!(
            view = %param.masking_view_id,
            host = %param.host_id,
            port_group = %param.port_group_id,
            group = %param.storage_group_id,
            "Creating masking view"
        );

        match self.client.create_masking_view(self.array_id(), &param).await {
            Ok(view) => {
                ctx.created_view = true;
                Ok(view)
            }
            Err(conflict @ Error::Conflict { .. }) => {
                // A view with our name exists but is not on our group.
                let view = match self
                    .client
                    .get_masking_view(self.array_id(), &param.masking_view_id)
                    .await
                {
                    Ok(view) => view,
                    Err(e) if e.is_not_found() => return Err(conflict),
                    Err(e) => return Err(e.context("get_masking_view", &param.masking_view_id)),
                };
                let host = self
                    .client
                    .get_host(self.array_id(), &view.host_id)
                    .await
                    .context("get_host", &view.host_id)?;
                if host.has_initiator(ctx.initiator) {
                    debug!(view = %view.masking_view_id, "Reusing existing masking view");
                    Ok(view)
                } else {
                    Err(conflict)
                }
            }
            Err(e) => Err(e.context("create_masking_view", &param.masking_view_id)),
        }
    }

    /// Move a volume out of the default group into the bound group.
    ///
    /// Returns false when the volume already is a member of the bound group.
    async fn add_to_bound_group(&self, volume_id: &str, bound_group: &str) -> Result<bool> {
        let details = self
            .client
            .get_volume(self.array_id(), volume_id)
            .await
            .context("get_volume", volume_id)?;

        if details.in_group(bound_group) {
            info!(volume_id, group = bound_group, "Volume already in bound group");
            return Ok(false);
        }

        let default_group = self.lifecycle.default_group();
        if bound_group != default_group && details.in_group(default_group) {
            self.client
                .remove_volume_from_storage_group(self.array_id(), default_group, volume_id)
                .await
                .context("remove_volume_from_storage_group", default_group)?;
        }

        self.client
            .add_volume_to_storage_group(self.array_id(), bound_group, volume_id)
            .await
            .context("add_volume_to_storage_group", bound_group)?;

        debug!(volume_id, group = bound_group, "Added volume to bound group");
        Ok(true)
    }

    /// Remove a volume from the group bound to an instance.
    ///
    /// The bound group is found through the host record's masking views, so
    /// views reused at attach time are undone as well. The volume returns to
    /// the default group once no other group holds it.
    pub async fn detach(&self, volume_id: &str, instance: &InstanceId) -> Result<Volume> {
        validate_request(volume_id, instance)?;

        let host_name = self.resolver.resolve_host_name(&instance.id);
        info!(volume_id, initiator = %instance.id, host = %host_name, "Detaching volume");

        let views = self.resolver.host_views(&host_name).await?;
        if views.is_empty() {
            return Err(Error::not_found(
                "MaskingView",
                self.resolver.resolve_masking_view_name(&instance.id),
            ));
        }

        let details = self
            .client
            .get_volume(self.array_id(), volume_id)
            .await
            .context("get_volume", volume_id)?;

        // A volume outside every bound group falls through to the array's not-found.
        let bound_group = views
            .iter()
            .find(|view| details.in_group(&view.storage_group_id))
            .unwrap_or(&views[0])
            .storage_group_id
            .clone();

        self.client
            .remove_volume_from_storage_group(self.array_id(), &bound_group, volume_id)
            .await
            .context("remove_volume_from_storage_group", &bound_group)?;

        let default_group = self.lifecycle.default_group();
        let details = self
            .client
            .get_volume(self.array_id(), volume_id)
            .await
            .context("get_volume", volume_id)?;
        if details.storage_groups.is_empty() {
            self.resolver.ensure_storage_group(default_group).await?;
            self.client
                .add_volume_to_storage_group(self.array_id(), default_group, volume_id)
                .await
                .context("add_volume_to_storage_group", default_group)?;
        }

        info!(volume_id, initiator = %instance.id, "Volume detached");
        self.lifecycle.inspect(volume_id, true).await
    }
}

fn validate_request(volume_id: &str, instance: &InstanceId) -> Result<()> {
    if volume_id.is_empty() {
        return Err(Error::Configuration("no volume ID specified".into()));
    }
    if instance.id.trim().is_empty() {
        return Err(Error::Configuration("instance initiator is empty".into()));
    }
    Ok(())
}
