#![forbid(unsafe_code)]

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use roadwatch_contracts::identity::{BearerToken, Principal, Role, SessionPhase};
use roadwatch_contracts::media::{
    CameraPreset, CameraSourceId, CameraSwitchAck, UploadAck, UploadSource, UploadStatus,
};
use roadwatch_contracts::view::{ConsoleAction, ViewId};
use roadwatch_contracts::violation::{StatsSnapshot, Violation};
use roadwatch_contracts::{ContractViolation, ReasonCodeId};
use roadwatch_engines::{
    AuthError, ConsoleBackend, FetchError, IdentityProvider, PopupProviderConfig, PrincipalNotice,
};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::archive::ArchiveState;
use crate::config::ConsoleConfig;
use crate::evidence::{EvidenceReview, EvidenceStream, MediaLeases};
use crate::media::{self, CameraControl, LiveStream, UploadTask};
use crate::nav::{CapabilityTable, CONSOLE_CAPABILITIES};
use crate::poll::{FetchTicket, PollGate, PollHandle};
use crate::router::{SelectOutcome, ViewRouter};
use crate::session::{self, CredentialRejection, RolePolicy, SessionRuntime, SessionTransition};

pub mod reason_codes {
    use roadwatch_contracts::ReasonCodeId;

    pub const CONSOLE_RUNTIME_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x434F_0001);
    pub const CONSOLE_STATE_POISONED: ReasonCodeId = ReasonCodeId(0x434F_0002);
    pub const CONSOLE_NOT_AUTHENTICATED: ReasonCodeId = ReasonCodeId(0x434F_0003);
    pub const CONSOLE_FORBIDDEN: ReasonCodeId = ReasonCodeId(0x434F_0004);
    pub const CONSOLE_WRONG_VIEW: ReasonCodeId = ReasonCodeId(0x434F_0005);
    pub const CONSOLE_AUTH_FAILED: ReasonCodeId = ReasonCodeId(0x434F_0006);
    pub const CONSOLE_FETCH_FAILED: ReasonCodeId = ReasonCodeId(0x434F_0007);
    pub const CONSOLE_INVALID_INPUT: ReasonCodeId = ReasonCodeId(0x434F_0008);
    pub const POLL_FETCH_FAILED: ReasonCodeId = ReasonCodeId(0x434F_0009);
    pub const POLL_RESPONSE_DISCARDED: ReasonCodeId = ReasonCodeId(0x434F_000A);
    pub const ARCHIVE_FETCH_FAILED: ReasonCodeId = ReasonCodeId(0x434F_000B);
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsoleError {
    #[error("console must be created inside a tokio runtime")]
    RuntimeUnavailable,
    #[error("console state lock poisoned")]
    StatePoisoned,
    #[error("no authenticated session")]
    NotAuthenticated,
    #[error("role {} may not {}", .role.as_str(), .action.as_str())]
    Forbidden { role: Role, action: ConsoleAction },
    #[error("{} is not available from the {} view", .action.as_str(), .active.as_str())]
    WrongView { action: ConsoleAction, active: ViewId },
    #[error("camera source {0:?} is not a configured preset")]
    UnknownCameraSource(String),
    #[error("a camera switch is already pending")]
    CameraSwitchPending,
    #[error("an upload is already in progress")]
    UploadBusy,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

impl ConsoleError {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            ConsoleError::RuntimeUnavailable => reason_codes::CONSOLE_RUNTIME_UNAVAILABLE,
            ConsoleError::StatePoisoned => reason_codes::CONSOLE_STATE_POISONED,
            ConsoleError::NotAuthenticated => reason_codes::CONSOLE_NOT_AUTHENTICATED,
            ConsoleError::Forbidden { .. } => reason_codes::CONSOLE_FORBIDDEN,
            ConsoleError::WrongView { .. } => reason_codes::CONSOLE_WRONG_VIEW,
            ConsoleError::UnknownCameraSource(_) => media::reason_codes::MEDIA_UNKNOWN_CAMERA_SOURCE,
            ConsoleError::CameraSwitchPending => media::reason_codes::MEDIA_CAMERA_SWITCH_PENDING,
            ConsoleError::UploadBusy => media::reason_codes::MEDIA_UPLOAD_BUSY,
            ConsoleError::Auth(_) => reason_codes::CONSOLE_AUTH_FAILED,
            ConsoleError::Fetch(_) => reason_codes::CONSOLE_FETCH_FAILED,
            ConsoleError::Contract(_) => reason_codes::CONSOLE_INVALID_INPUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub email: Option<String>,
    pub role: Role,
    /// Last sign-in failure, shown inline until the next attempt succeeds.
    pub auth_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceView {
    pub violation: Violation,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveView {
    pub loaded: bool,
    pub loading: bool,
    pub entries: Vec<Violation>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadView {
    pub status: UploadStatus,
    pub file_name: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraView {
    pub presets: Vec<CameraPreset>,
    pub active: Option<CameraSourceId>,
    pub pending: Option<CameraSourceId>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveView {
    pub url: String,
    pub generation: u64,
}

/// Read-only state handed to the presentation layer. A fresh value is published on every
/// change, with a strictly increasing `revision`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleView {
    pub revision: u64,
    pub session: SessionView,
    /// `None` until a session is authenticated; nothing is rendered before that.
    pub active_view: Option<ViewId>,
    pub visible_views: Vec<ViewId>,
    pub stats: Option<StatsSnapshot>,
    pub poll_error: Option<String>,
    pub evidence: Option<EvidenceView>,
    pub archive: ArchiveView,
    pub upload: UploadView,
    pub camera: CameraView,
    pub live: LiveView,
    pub open_media_streams: usize,
}

/// Handle to a started upload. `completion` resolves once the attempt has settled or failed.
#[derive(Debug)]
pub struct UploadTicket {
    pub attempt: u64,
    pub completion: JoinHandle<Result<UploadAck, ConsoleError>>,
}

#[derive(Debug)]
struct ConsoleCore {
    session: SessionRuntime,
    router: ViewRouter,
    gate: PollGate,
    poller: Option<PollHandle>,
    stats: Option<StatsSnapshot>,
    poll_error: Option<String>,
    evidence: EvidenceReview,
    archive: ArchiveState,
    upload: UploadTask,
    camera: CameraControl,
    live: LiveStream,
    auth_error: Option<String>,
    revision: u64,
    shut_down: bool,
}

struct ConsoleShared {
    config: ConsoleConfig,
    policy: RolePolicy,
    capabilities: &'static CapabilityTable,
    backend: Arc<dyn ConsoleBackend>,
    identity: Arc<dyn IdentityProvider>,
    runtime: Handle,
    leases: MediaLeases,
    view_tx: watch::Sender<ConsoleView>,
    core: Mutex<ConsoleCore>,
}

/// Dashboard session and real-time state controller.
///
/// All state lives in one synchronous core guarded by a mutex that is never held across a
/// collaborator call. Results of collaborator calls are re-checked against the session
/// generation, poll epoch or request id they were issued under before they are applied.
pub struct Console {
    shared: Arc<ConsoleShared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Console {
    pub fn new(
        config: ConsoleConfig,
        backend: Arc<dyn ConsoleBackend>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ConsoleError> {
        let runtime = Handle::try_current().map_err(|_| ConsoleError::RuntimeUnavailable)?;
        let capabilities: &'static CapabilityTable = &CONSOLE_CAPABILITIES;
        let core = ConsoleCore {
            session: SessionRuntime::new(),
            router: ViewRouter::new(capabilities),
            gate: PollGate::new(),
            poller: None,
            stats: None,
            poll_error: None,
            evidence: EvidenceReview::new(),
            archive: ArchiveState::new(),
            upload: UploadTask::new(),
            camera: CameraControl::new(),
            live: LiveStream::new(backend.live_feed_url()),
            auth_error: None,
            revision: 0,
            shut_down: false,
        };
        let policy = RolePolicy::new(config.admin_marker.clone());
        let leases = MediaLeases::new();
        let initial = render(&config, capabilities, &leases, &core);
        let (view_tx, _) = watch::channel(initial);
        Ok(Self {
            shared: Arc::new(ConsoleShared {
                config,
                policy,
                capabilities,
                backend,
                identity,
                runtime,
                leases,
                view_tx,
                core: Mutex::new(core),
            }),
            listener: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.shared.config
    }

    pub fn capabilities(&self) -> &'static CapabilityTable {
        self.shared.capabilities
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsoleView> {
        self.shared.view_tx.subscribe()
    }

    pub fn snapshot(&self) -> ConsoleView {
        self.shared.view_tx.borrow().clone()
    }

    /// Follows the identity provider's session notices until the console is dropped.
    pub fn start_session_listener(&self) -> Result<(), ConsoleError> {
        let mut slot = self.listener.lock().map_err(|_| ConsoleError::StatePoisoned)?;
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let mut notices = self.shared.identity.subscribe();
        let weak = Arc::downgrade(&self.shared);
        *slot = Some(self.shared.runtime.spawn(async move {
            loop {
                let notice = notices.borrow_and_update().clone();
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match shared.accept_notice(notice) {
                    Ok(Some((generation, principal))) => {
                        let task = shared.clone().finish_sign_in(generation, principal);
                        shared.runtime.spawn(task);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "identity notice dropped"),
                }
                drop(shared);
                if notices.changed().await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    /// Applies one identity notice and waits for its credential exchange, if any.
    pub async fn handle_principal_notice(
        &self,
        notice: PrincipalNotice,
    ) -> Result<SessionPhase, ConsoleError> {
        if let Some((generation, principal)) = self.shared.accept_notice(notice)? {
            self.shared
                .clone()
                .finish_sign_in(generation, principal)
                .await?;
        }
        Ok(self.shared.lock_core()?.session.phase())
    }

    pub fn select_view(&self, view: ViewId) -> Result<SelectOutcome, ConsoleError> {
        let shared = &self.shared;
        let mut core = shared.lock_core()?;
        if !core.session.is_authenticated() {
            return Err(ConsoleError::NotAuthenticated);
        }
        let role = core.session.role();
        let outcome = core.router.select(view, role);
        if let SelectOutcome::Changed { from, to } = outcome {
            info!(from = from.as_str(), to = to.as_str(), "view changed");
            if !to.consumes_stats() {
                core.evidence.close();
            }
            shared.sync_mounts(&mut core, true);
            shared.publish(&mut core);
        }
        Ok(outcome)
    }

    /// Opens `violation` for review, replacing (and releasing) whatever was open.
    pub fn open_evidence(&self, violation: Violation) -> Result<(), ConsoleError> {
        let shared = &self.shared;
        let mut core = shared.lock_core()?;
        shared.ensure_allowed(&core, ConsoleAction::ReviewEvidence)?;
        let active = core.router.active();
        if !active.consumes_stats() {
            return Err(ConsoleError::WrongView {
                action: ConsoleAction::ReviewEvidence,
                active,
            });
        }
        let url = shared.backend.evidence_url(&violation.evidence);
        info!(violation_id = %violation.violation_id.as_str(), "evidence opened");
        let stream = EvidenceStream::new(url, shared.leases.acquire());
        if let Some(replaced) = core.evidence.open(violation, stream) {
            debug!(violation_id = %replaced.violation.violation_id.as_str(), "evidence replaced");
        }
        shared.publish(&mut core);
        Ok(())
    }

    pub fn close_evidence(&self) -> Result<bool, ConsoleError> {
        let shared = &self.shared;
        let mut core = shared.lock_core()?;
        let was_open = core.evidence.close().is_some();
        if was_open {
            shared.publish(&mut core);
        }
        Ok(was_open)
    }

    /// Re-fetches the archive listing; returns the number of entries received.
    pub async fn refresh_archive(&self) -> Result<usize, ConsoleError> {
        let shared = &self.shared;
        let (request, credential) = {
            let mut core = shared.lock_core()?;
            shared.ensure_allowed(&core, ConsoleAction::RefreshArchive)?;
            let active = core.router.active();
            if active != ViewId::Archive {
                return Err(ConsoleError::WrongView {
                    action: ConsoleAction::RefreshArchive,
                    active,
                });
            }
            let credential = shared.credential(&core)?;
            let request = core.archive.begin_fetch();
            shared.publish(&mut core);
            (request, credential)
        };
        shared.clone().load_archive(request, credential).await
    }

    /// Switches the capture source to a configured preset, matched by label or source.
    pub async fn switch_source(&self, preset: &str) -> Result<CameraSwitchAck, ConsoleError> {
        let shared = &self.shared;
        let (request, source, credential) = {
            let mut core = shared.lock_core()?;
            shared.ensure_allowed(&core, ConsoleAction::SwitchSource)?;
            shared.ensure_settings_view(&core, ConsoleAction::SwitchSource)?;
            let source = shared.resolve_preset(preset)?;
            let credential = shared.credential(&core)?;
            let Some(request) = core.camera.begin(source.clone()) else {
                debug!(
                    reason_code = %media::reason_codes::MEDIA_CAMERA_SWITCH_PENDING,
                    "camera switch rejected while another is pending"
                );
                return Err(ConsoleError::CameraSwitchPending);
            };
            shared.publish(&mut core);
            (request, source, credential)
        };
        let result = shared.backend.switch_camera(&credential, &source).await;
        let unauthorized = {
            let mut core = shared.lock_core()?;
            match &result {
                Ok(_) => {
                    core.session.credential_accepted(&credential);
                    if core.camera.complete(request) {
                        core.live.reconnect();
                        shared.refetch_archive_if_mounted(&mut core);
                        shared.publish(&mut core);
                    }
                    false
                }
                Err(err) => {
                    if core.camera.fail(request, err.to_string()) {
                        shared.publish(&mut core);
                    }
                    err.is_unauthorized()
                }
            }
        };
        if unauthorized {
            shared.credential_rejected(&credential);
        }
        result.map_err(ConsoleError::from)
    }

    /// Starts the session's single upload. Rejected without a network call while another
    /// upload is not idle.
    pub fn start_upload(&self, path: impl AsRef<Path>) -> Result<UploadTicket, ConsoleError> {
        let shared = &self.shared;
        let source = UploadSource::from_path(path)?;
        let mut core = shared.lock_core()?;
        shared.ensure_allowed(&core, ConsoleAction::UploadMedia)?;
        shared.ensure_settings_view(&core, ConsoleAction::UploadMedia)?;
        let credential = shared.credential(&core)?;
        let attempt = core
            .upload
            .begin(source.clone())
            .ok_or(ConsoleError::UploadBusy)?;
        shared.publish(&mut core);
        let completion = shared
            .runtime
            .spawn(shared.clone().run_upload(attempt, source, credential));
        Ok(UploadTicket {
            attempt,
            completion,
        })
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ConsoleError> {
        let result = self.shared.identity.sign_in_with_password(email, password).await;
        self.shared.record_sign_in(result)
    }

    pub async fn sign_in_with_popup(
        &self,
        provider: &PopupProviderConfig,
    ) -> Result<Principal, ConsoleError> {
        let result = self.shared.identity.sign_in_with_popup(provider).await;
        self.shared.record_sign_in(result)
    }

    /// Signs out at the provider, then tears the session down locally without waiting for
    /// the provider's notice. The local teardown happens even when the provider call fails;
    /// that failure is still returned.
    pub async fn sign_out(&self) -> Result<(), ConsoleError> {
        let provider = self.shared.identity.sign_out().await;
        self.shared.accept_notice(PrincipalNotice::SignedOut)?;
        if let Err(err) = &provider {
            warn!(
                error = %err,
                reason_code = %reason_codes::CONSOLE_AUTH_FAILED,
                "provider sign-out failed; local session cleared anyway"
            );
        }
        provider.map_err(ConsoleError::from)
    }

    /// Re-exchanges the current principal for a new credential. Returns false if there is no
    /// session or a refresh is already running.
    pub async fn refresh_credential(&self) -> Result<bool, ConsoleError> {
        self.shared.clone().refresh_credential().await
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        if let Ok(mut core) = self.shared.core.lock() {
            core.shut_down = true;
            core.gate.close();
            core.poller = None;
            core.evidence.close();
        }
    }
}

impl ConsoleShared {
    fn lock_core(&self) -> Result<MutexGuard<'_, ConsoleCore>, ConsoleError> {
        self.core.lock().map_err(|_| ConsoleError::StatePoisoned)
    }

    fn publish(&self, core: &mut ConsoleCore) {
        core.revision = core.revision.wrapping_add(1);
        let view = render(&self.config, self.capabilities, &self.leases, core);
        self.view_tx.send_replace(view);
    }

    fn credential(&self, core: &ConsoleCore) -> Result<BearerToken, ConsoleError> {
        core.session
            .credential()
            .cloned()
            .ok_or(ConsoleError::NotAuthenticated)
    }

    fn ensure_allowed(&self, core: &ConsoleCore, action: ConsoleAction) -> Result<(), ConsoleError> {
        if !core.session.is_authenticated() {
            return Err(ConsoleError::NotAuthenticated);
        }
        let role = core.session.role();
        if !self.capabilities.action_allowed(action, role) {
            debug!(
                role = role.as_str(),
                action = action.as_str(),
                reason_code = %reason_codes::CONSOLE_FORBIDDEN,
                "action refused for role"
            );
            return Err(ConsoleError::Forbidden { role, action });
        }
        Ok(())
    }

    fn ensure_settings_view(
        &self,
        core: &ConsoleCore,
        action: ConsoleAction,
    ) -> Result<(), ConsoleError> {
        let active = core.router.active();
        if active != ViewId::Settings {
            return Err(ConsoleError::WrongView { action, active });
        }
        Ok(())
    }

    fn resolve_preset(&self, raw: &str) -> Result<CameraSourceId, ConsoleError> {
        let raw = raw.trim();
        self.config
            .camera_presets
            .iter()
            .find(|p| p.label == raw || p.source.as_str() == raw)
            .map(|p| p.source.clone())
            .ok_or_else(|| ConsoleError::UnknownCameraSource(raw.to_string()))
    }

    fn accept_notice(
        self: &Arc<Self>,
        notice: PrincipalNotice,
    ) -> Result<Option<(u64, Principal)>, ConsoleError> {
        let mut core = self.lock_core()?;
        match notice {
            PrincipalNotice::Pending => Ok(None),
            PrincipalNotice::SignedOut => {
                let generation = core.session.begin_notice();
                let transition = core
                    .session
                    .clear(generation, session::reason_codes::SESSION_SIGNED_OUT);
                self.apply_session_transition(&mut core, transition);
                Ok(None)
            }
            PrincipalNotice::SignedIn(principal) => {
                let generation = core.session.begin_notice();
                debug!(generation, principal_id = %principal.principal_id.as_str(), "identity notice");
                Ok(Some((generation, principal)))
            }
        }
    }

    async fn finish_sign_in(
        self: Arc<Self>,
        generation: u64,
        principal: Principal,
    ) -> Result<(), ConsoleError> {
        let exchanged = self.identity.exchange_for_token(&principal).await;
        let mut core = self.lock_core()?;
        let transition = match exchanged {
            Ok(credential) => core
                .session
                .establish(generation, principal, credential, &self.policy),
            Err(err) => {
                warn!(
                    principal_id = %principal.principal_id.as_str(),
                    error = %err,
                    reason_code = %session::reason_codes::SESSION_EXCHANGE_FAILED,
                    "credential exchange failed; treating as signed out"
                );
                core.session
                    .clear(generation, session::reason_codes::SESSION_EXCHANGE_FAILED)
            }
        };
        self.apply_session_transition(&mut core, transition);
        Ok(())
    }

    fn apply_session_transition(self: &Arc<Self>, core: &mut ConsoleCore, transition: SessionTransition) {
        match transition {
            SessionTransition::Established {
                role,
                role_changed,
                same_principal,
            } => {
                if role_changed {
                    info!(role = role.as_str(), same_principal, "session role changed");
                }
                core.auth_error = None;
                if !same_principal {
                    self.reset_session_state(core);
                }
                core.router.reconcile(core.session.role());
                self.sync_mounts(core, true);
                self.publish(core);
            }
            SessionTransition::Cleared { was_authenticated } => {
                debug!(
                    was_authenticated,
                    exchange_failures = core.session.exchange_failures(),
                    "session state reset"
                );
                self.reset_session_state(core);
                core.router.reconcile(core.session.role());
                self.sync_mounts(core, false);
                self.publish(core);
            }
            SessionTransition::CredentialRefreshed => self.publish(core),
            SessionTransition::Superseded => debug!(
                reason_code = %session::reason_codes::SESSION_NOTICE_SUPERSEDED,
                "ignoring identity result for a superseded notice"
            ),
        }
    }

    fn reset_session_state(&self, core: &mut ConsoleCore) {
        core.stats = None;
        core.poll_error = None;
        core.evidence.close();
        core.upload.abandon();
        core.camera.abandon();
    }

    /// Starts or stops the stats poller and the archive listing to match the session and the
    /// active view. `remount` tears both down first, as a view switch does.
    fn sync_mounts(self: &Arc<Self>, core: &mut ConsoleCore, remount: bool) {
        let active = core.router.active();
        let authenticated = !core.shut_down && core.session.is_authenticated();
        let wants_poll = authenticated && active.consumes_stats();
        let wants_archive = authenticated && active == ViewId::Archive;

        if remount || !wants_poll {
            if core.gate.close() {
                debug!(
                    epoch = core.gate.epoch(),
                    issued = core.gate.issued_total(),
                    applied = core.gate.applied_total(),
                    discarded = core.gate.discarded_total(),
                    "stats polling stopped"
                );
            }
            core.poller = None;
        }
        if wants_poll && core.gate.open() {
            debug!(epoch = core.gate.epoch(), view = active.as_str(), "stats polling started");
            core.poller = Some(self.spawn_poller());
        }

        if remount || !wants_archive {
            core.archive.unmount();
        }
        if wants_archive && !core.archive.is_loaded() && !core.archive.is_loading() {
            self.spawn_archive_fetch(core);
        }
    }

    fn spawn_poller(self: &Arc<Self>) -> PollHandle {
        let weak = Arc::downgrade(self);
        PollHandle::spawn(&self.runtime, self.config.stats_cadence(), move || {
            let shared = weak.upgrade()?;
            shared.issue_stats_fetch()
        })
    }

    /// Issues one poll tick. An expired credential is not sent; the tick claims a refresh
    /// instead and the next tick uses the new credential.
    fn issue_stats_fetch(self: Arc<Self>) -> Option<impl Future<Output = ()> + Send + 'static> {
        let fetch = {
            let mut core = self.core.lock().ok()?;
            let credential = core.session.credential()?.clone();
            if !core.gate.is_open() {
                return None;
            }
            if credential.is_expired_at(now_unix_ms()) {
                if let Some((generation, principal)) = core.session.begin_refresh() {
                    debug!(generation, "credential expired; refreshing before next poll");
                    self.runtime
                        .spawn(self.clone().run_refresh(generation, principal));
                }
                None
            } else {
                core.gate.issue().map(|ticket| (ticket, credential))
            }
        };
        Some(async move {
            let Some((ticket, credential)) = fetch else {
                return;
            };
            let result = self.backend.fetch_stats(&credential).await;
            self.complete_stats_fetch(ticket, &credential, result);
        })
    }

    fn complete_stats_fetch(
        self: &Arc<Self>,
        ticket: FetchTicket,
        credential: &BearerToken,
        result: Result<StatsSnapshot, FetchError>,
    ) {
        let Ok(mut core) = self.core.lock() else {
            return;
        };
        match result {
            Ok(snapshot) => {
                core.session.credential_accepted(credential);
                let outcome = core.gate.admit(ticket);
                if outcome.is_applied() {
                    core.stats = Some(snapshot);
                    core.poll_error = None;
                    self.publish(&mut core);
                } else {
                    debug!(
                        epoch = ticket.epoch,
                        seq = ticket.seq,
                        ?outcome,
                        reason_code = %reason_codes::POLL_RESPONSE_DISCARDED,
                        "discarding stats response"
                    );
                }
            }
            Err(err) => {
                if !core.gate.check(ticket).is_applied() {
                    debug!(epoch = ticket.epoch, seq = ticket.seq, error = %err, "ignoring stale stats failure");
                    return;
                }
                warn!(
                    seq = ticket.seq,
                    error = %err,
                    reason_code = %reason_codes::POLL_FETCH_FAILED,
                    "stats fetch failed; retrying on next tick"
                );
                core.poll_error = Some(err.to_string());
                self.publish(&mut core);
                drop(core);
                if err.is_unauthorized() {
                    self.credential_rejected(credential);
                }
            }
        }
    }

    fn spawn_archive_fetch(self: &Arc<Self>, core: &mut ConsoleCore) {
        let Some(credential) = core.session.credential().cloned() else {
            return;
        };
        let request = core.archive.begin_fetch();
        self.runtime
            .spawn(self.clone().load_archive(request, credential));
    }

    fn refetch_archive_if_mounted(self: &Arc<Self>, core: &mut ConsoleCore) {
        if core.session.is_authenticated() && core.router.active() == ViewId::Archive {
            self.spawn_archive_fetch(core);
        }
    }

    async fn load_archive(
        self: Arc<Self>,
        request: u64,
        credential: BearerToken,
    ) -> Result<usize, ConsoleError> {
        let result = self.backend.fetch_violations(&credential).await;
        let mut core = self.lock_core()?;
        match result {
            Ok(entries) => {
                core.session.credential_accepted(&credential);
                let count = entries.len();
                if core.archive.complete(request, Ok(entries)) {
                    debug!(request, count, "archive listing applied");
                    self.publish(&mut core);
                }
                Ok(count)
            }
            Err(err) => {
                warn!(
                    request,
                    error = %err,
                    reason_code = %reason_codes::ARCHIVE_FETCH_FAILED,
                    "archive fetch failed"
                );
                if core.archive.complete(request, Err(err.to_string())) {
                    self.publish(&mut core);
                }
                drop(core);
                if err.is_unauthorized() {
                    self.credential_rejected(&credential);
                }
                Err(err.into())
            }
        }
    }

    async fn run_upload(
        self: Arc<Self>,
        attempt: u64,
        source: UploadSource,
        credential: BearerToken,
    ) -> Result<UploadAck, ConsoleError> {
        let result = self.backend.upload(&credential, &source).await;
        let ack = match result {
            Ok(ack) => ack,
            Err(err) => {
                {
                    let mut core = self.lock_core()?;
                    if core.upload.fail(attempt, err.to_string()) {
                        self.publish(&mut core);
                        core.upload.recover(attempt);
                        self.publish(&mut core);
                    }
                }
                if err.is_unauthorized() {
                    self.credential_rejected(&credential);
                }
                return Err(err.into());
            }
        };
        {
            let mut core = self.lock_core()?;
            core.session.credential_accepted(&credential);
            if !core.upload.acknowledge(attempt) {
                return Ok(ack);
            }
            self.publish(&mut core);
        }
        tokio::time::sleep(self.config.upload_settle()).await;
        let mut core = self.lock_core()?;
        if core.upload.settle(attempt) {
            core.live.reconnect();
            self.refetch_archive_if_mounted(&mut core);
            self.publish(&mut core);
        }
        Ok(ack)
    }

    /// Reacts to a `401` for `rejected`: one re-exchange per rejection chain, then the
    /// session is cleared. Must be called without the core lock held.
    fn credential_rejected(self: &Arc<Self>, rejected: &BearerToken) {
        let Ok(mut core) = self.core.lock() else {
            return;
        };
        let rejection = core.session.credential_rejected(rejected);
        match rejection {
            CredentialRejection::Refresh {
                generation,
                principal,
            } => {
                drop(core);
                self.runtime
                    .spawn(self.clone().run_refresh(generation, principal));
            }
            CredentialRejection::Exhausted { generation } => {
                warn!(
                    reason_code = %session::reason_codes::SESSION_REFRESH_FAILED,
                    "re-issued credential rejected; clearing session"
                );
                let transition = core
                    .session
                    .clear(generation, session::reason_codes::SESSION_REFRESH_FAILED);
                self.apply_session_transition(&mut core, transition);
            }
            outcome @ (CredentialRejection::InFlight
            | CredentialRejection::Stale
            | CredentialRejection::NoSession) => {
                debug!(?outcome, "credential rejection needs no action");
            }
        }
    }

    async fn refresh_credential(self: Arc<Self>) -> Result<bool, ConsoleError> {
        let claim = self.lock_core()?.session.begin_refresh();
        match claim {
            Some((generation, principal)) => self.run_refresh(generation, principal).await,
            None => Ok(false),
        }
    }

    async fn run_refresh(
        self: Arc<Self>,
        generation: u64,
        principal: Principal,
    ) -> Result<bool, ConsoleError> {
        let exchanged = self.identity.exchange_for_token(&principal).await;
        let mut core = self.lock_core()?;
        match exchanged {
            Ok(credential) => {
                let transition = core.session.complete_refresh(generation, credential);
                let refreshed = transition == SessionTransition::CredentialRefreshed;
                self.apply_session_transition(&mut core, transition);
                Ok(refreshed)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    reason_code = %session::reason_codes::SESSION_REFRESH_FAILED,
                    "credential refresh failed; clearing session"
                );
                let transition = core
                    .session
                    .clear(generation, session::reason_codes::SESSION_REFRESH_FAILED);
                self.apply_session_transition(&mut core, transition);
                Err(err.into())
            }
        }
    }

    fn record_sign_in(&self, result: Result<Principal, AuthError>) -> Result<Principal, ConsoleError> {
        let mut core = self.lock_core()?;
        match result {
            Ok(principal) => {
                info!(principal_id = %principal.principal_id.as_str(), "sign-in accepted by provider");
                if core.auth_error.take().is_some() {
                    self.publish(&mut core);
                }
                Ok(principal)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    reason_code = %reason_codes::CONSOLE_AUTH_FAILED,
                    "sign-in failed"
                );
                core.auth_error = Some(err.to_string());
                self.publish(&mut core);
                Err(err.into())
            }
        }
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn render(
    config: &ConsoleConfig,
    capabilities: &CapabilityTable,
    leases: &MediaLeases,
    core: &ConsoleCore,
) -> ConsoleView {
    let authenticated = core.session.is_authenticated();
    let role = core.session.role();
    ConsoleView {
        revision: core.revision,
        session: SessionView {
            phase: core.session.phase(),
            email: core
                .session
                .identity()
                .map(|identity| identity.principal.email.clone()),
            role,
            auth_error: core.auth_error.clone(),
        },
        active_view: authenticated.then(|| core.router.active()),
        visible_views: if authenticated {
            capabilities.visible_views(role)
        } else {
            Vec::new()
        },
        stats: core.stats.clone(),
        poll_error: core.poll_error.clone(),
        evidence: core.evidence.current().map(|open| EvidenceView {
            violation: open.violation.clone(),
            url: open.stream.url.clone(),
        }),
        archive: ArchiveView {
            loaded: core.archive.is_loaded(),
            loading: core.archive.is_loading(),
            entries: core.archive.entries().to_vec(),
            last_error: core.archive.last_error().map(str::to_string),
        },
        upload: UploadView {
            status: core.upload.status(),
            file_name: core.upload.source().map(|s| s.file_name.clone()),
            last_error: core.upload.last_error().map(str::to_string),
        },
        camera: CameraView {
            presets: config.camera_presets.clone(),
            active: core.camera.active().cloned(),
            pending: core.camera.pending().cloned(),
            last_error: core.camera.last_error().map(str::to_string),
        },
        live: LiveView {
            url: core.live.url().to_string(),
            generation: core.live.generation(),
        },
        open_media_streams: leases.outstanding(),
    }
}
