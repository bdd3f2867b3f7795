//! User agent: the call state machine
//!
//! A [`UserAgent`] drives at most one call (plus, while a transfer is being
//! carried out, the dialog towards the transfer target). User actions and
//! [`SignalingEvent`]s are serialized through a single state slot; every
//! event is checked against the dialog it belongs to before it is applied.
//!
//! Media flows are started on the media agent once both session descriptions
//! are known and the call is established, and stopped on every transition
//! back to idle.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use sippin_codec_core::CodecCatalog;
use sippin_media_core::{
    AudioDeviceFactory, MediaAgent, MediaEvent, Negotiator, SessionDescription, SilentDeviceFactory,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::call::{CallDirection, CallInfo, CallSession, CallState, DialogId};
use crate::config::UserAgentProfile;
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::signaling::{SignalingEvent, SignalingLayer};

/// Capacity of the client event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct AgentState {
    /// Current call
    call: Option<CallSession>,
    /// Outgoing dialog towards a transfer target
    transfer: Option<CallSession>,
    timers: Vec<CancellationToken>,
    /// Renewal and keep-alive loops of a looping registration
    registration: Option<CancellationToken>,
}

impl AgentState {
    fn call_state(&self) -> CallState {
        self.call.as_ref().map(|c| c.state).unwrap_or_default()
    }

    fn is_current(&self, dialog: DialogId) -> bool {
        self.call.as_ref().is_some_and(|c| c.dialog == dialog)
    }

    fn is_transfer(&self, dialog: DialogId) -> bool {
        self.transfer.as_ref().is_some_and(|c| c.dialog == dialog)
    }

    fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.cancel();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    Refuse,
    Accept,
    Hangup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodicAction {
    Register,
    KeepAlive,
}

/// Final reason reported when the response time of an incoming call runs out
const RESPONSE_TIMEOUT_REASON: &str = "Request Timeout";

/// SIP call agent: signaling state plus media
pub struct UserAgent {
    profile: UserAgentProfile,
    signaling: Arc<dyn SignalingLayer>,
    media: Arc<MediaAgent>,
    negotiator: Negotiator,
    state: Mutex<AgentState>,
    events: broadcast::Sender<ClientEvent>,
    weak_self: Weak<UserAgent>,
}

impl UserAgent {
    /// User agent with headless audio devices
    pub fn new(
        profile: UserAgentProfile,
        signaling: Arc<dyn SignalingLayer>,
        catalog: Arc<CodecCatalog>,
    ) -> ClientResult<Arc<Self>> {
        Self::with_devices(profile, signaling, catalog, Arc::new(SilentDeviceFactory))
    }

    pub fn with_devices(
        profile: UserAgentProfile,
        signaling: Arc<dyn SignalingLayer>,
        catalog: Arc<CodecCatalog>,
        devices: Arc<dyn AudioDeviceFactory>,
    ) -> ClientResult<Arc<Self>> {
        profile.validate()?;
        let media = Arc::new(MediaAgent::new(profile.media_agent_config(), devices));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!("user agent for {} ({:?} media)", profile.user, profile.direction());

        Ok(Arc::new_cyclic(|weak_self| Self {
            profile,
            signaling,
            media,
            negotiator: Negotiator::new(catalog),
            state: Mutex::new(AgentState::default()),
            events,
            weak_self: weak_self.clone(),
        }))
    }

    pub fn profile(&self) -> &UserAgentProfile {
        &self.profile
    }

    pub fn media(&self) -> &Arc<MediaAgent> {
        &self.media
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> CallState {
        self.state.lock().await.call_state()
    }

    /// Snapshot of the current call
    pub async fn call_info(&self) -> Option<CallInfo> {
        let state = self.state.lock().await;
        state.call.as_ref().map(|call| CallInfo {
            dialog: call.dialog,
            state: call.state,
            direction: call.direction,
            peer: call.peer.clone(),
            media_kinds: call.media_kinds.clone(),
            created_at: call.created_at,
            connected_at: call.connected_at,
            transfer_dialog: state.transfer.as_ref().map(|t| t.dialog),
        })
    }

    /// Local session description built from the profile
    pub fn local_session(&self) -> SessionDescription {
        self.profile.local_session(self.negotiator.catalog())
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    /// Place a call. Only allowed while idle.
    pub async fn call(&self, target: &str) -> ClientResult<DialogId> {
        let mut state = self.state.lock().await;
        if state.call.is_some() {
            return Err(ClientError::invalid_state("call", state.call_state()));
        }

        let offer = (!self.profile.no_offer).then(|| self.local_session());
        let body = offer.as_ref().map(|o| o.to_string());
        info!("calling {}", target);
        let dialog = match self.signaling.call(target, body.as_deref()).await {
            Ok(dialog) => dialog,
            Err(e) => {
                warn!("call to {} failed ({}): {}", target, e.category(), e);
                self.emit(ClientEvent::CallFailed {
                    dialog: None,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        state.call = Some(CallSession::outgoing(dialog, target, offer));
        self.emit(ClientEvent::CallStateChanged {
            dialog,
            previous: CallState::Idle,
            current: CallState::OutgoingProgress,
        });
        Ok(dialog)
    }

    /// Accept the ringing incoming call
    pub async fn accept(&self) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        self.accept_locked(&mut state).await
    }

    /// Refuse the ringing incoming call
    pub async fn refuse(&self) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        self.refuse_locked(&mut state, None).await
    }

    /// Close the current call, whatever its state
    pub async fn hangup(&self) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        self.hangup_locked(&mut state).await
    }

    /// Redirect the ringing incoming call to `target`
    pub async fn redirect(&self, target: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        self.redirect_locked(&mut state, target).await
    }

    /// Ask the remote party of the established call to call `target`
    pub async fn transfer(&self, target: &str) -> ClientResult<()> {
        let state = self.state.lock().await;
        let call = state
            .call
            .as_ref()
            .filter(|c| c.state.is_active())
            .ok_or_else(|| ClientError::invalid_state("transfer", state.call_state()))?;
        info!("transferring {} to {}", call.peer, target);
        let result = self.signaling.transfer(call.dialog, target).await;
        if let Err(e) = &result {
            warn!("transfer on {} failed ({}): {}", call.dialog, e.category(), e);
        }
        result
    }

    /// Re-invite the remote party. An empty body sends the local description.
    pub async fn modify(&self, body: &str) -> ClientResult<()> {
        let state = self.state.lock().await;
        let call = state
            .call
            .as_ref()
            .filter(|c| c.state.is_active())
            .ok_or_else(|| ClientError::invalid_state("modify", state.call_state()))?;
        let body = if body.is_empty() {
            call.local_sdp.clone().unwrap_or_else(|| self.local_session()).to_string()
        } else {
            body.to_string()
        };
        debug!("re-inviting {}", call.peer);
        self.signaling.modify(call.dialog, &body).await
    }

    /// Register once with the registrar
    pub async fn register(&self) -> ClientResult<()> {
        let expires = self.profile.registration_expiry();
        info!("registering {} for {:?}", self.profile.user, expires);
        match self.signaling.register(expires).await {
            Ok(()) => {
                self.emit(ClientEvent::Registered { expires });
                Ok(())
            }
            Err(e) => {
                warn!("registration failed ({}): {}", e.category(), e);
                self.emit(ClientEvent::RegistrationFailed { reason: e.to_string() });
                Err(e)
            }
        }
    }

    /// Register now, then renew at half the binding lifetime and send
    /// keep-alives until [`unregister`](Self::unregister) or shutdown.
    ///
    /// Renewals keep running when the first attempt fails; its error is
    /// returned.
    pub async fn loop_register(&self) -> ClientResult<()> {
        let token = CancellationToken::new();
        {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.registration.replace(token.clone()) {
                previous.cancel();
            }
        }
        self.spawn_periodic(&token, self.profile.renew_interval(), PeriodicAction::Register);
        if let Some(period) = self.profile.keep_alive_interval() {
            self.spawn_periodic(&token, period, PeriodicAction::KeepAlive);
        }
        self.register().await
    }

    /// Stop any registration loop and remove the binding
    pub async fn unregister(&self) -> ClientResult<()> {
        if let Some(token) = self.state.lock().await.registration.take() {
            token.cancel();
        }
        info!("unregistering {}", self.profile.user);
        self.signaling.unregister().await?;
        self.emit(ClientEvent::Unregistered);
        Ok(())
    }

    /// Cancel timers, stop every media flow and drop a looping registration
    pub async fn shutdown(&self) {
        let registered = {
            let mut state = self.state.lock().await;
            state.cancel_timers();
            if let Some(call) = state.call.as_mut() {
                self.stop_media(call).await;
            }
            state.registration.is_some()
        };
        self.media.stop_all().await;
        if registered {
            if let Err(e) = self.unregister().await {
                warn!("unregister on shutdown failed: {}", e);
            }
        }
    }

    async fn accept_locked(&self, state: &mut AgentState) -> ClientResult<()> {
        let current = state.call_state();
        if current != CallState::IncomingRinging {
            return Err(ClientError::invalid_state("accept", current));
        }
        state.cancel_timers();

        let Some(call) = state.call.as_mut() else {
            return Err(ClientError::invalid_state("accept", current));
        };
        let dialog = call.dialog;
        let local = self.local_session();
        let answer = match &call.remote_sdp {
            Some(remote) => self.negotiator.answer_session(&local, remote),
            None => local,
        };

        if let Err(e) = self.signaling.accept(dialog, &answer.to_string()).await {
            warn!("accepting {} failed: {}", dialog, e);
            self.end_call(
                state,
                ClientEvent::CallFailed {
                    dialog: Some(dialog),
                    reason: e.to_string(),
                },
            )
            .await;
            return Err(e);
        }

        call.local_sdp = Some(answer);
        call.connected_at = Some(Utc::now());
        self.set_state(call, CallState::Active);
        self.schedule_hangup(state, dialog);
        Ok(())
    }

    /// Refuse the ringing call. With a `reason` the call ends as failed
    /// with it, otherwise as closed.
    async fn refuse_locked(&self, state: &mut AgentState, reason: Option<&str>) -> ClientResult<()> {
        let current = state.call_state();
        let Some(dialog) = state.call.as_ref().filter(|_| current == CallState::IncomingRinging).map(|c| c.dialog)
        else {
            return Err(ClientError::invalid_state("refuse", current));
        };
        info!("refusing incoming call {}", dialog);
        state.cancel_timers();
        if let Err(e) = self.signaling.refuse(dialog).await {
            warn!("refuse on {} failed: {}", dialog, e);
        }
        let event = match reason {
            Some(reason) => ClientEvent::CallFailed {
                dialog: Some(dialog),
                reason: reason.to_string(),
            },
            None => ClientEvent::CallClosed { dialog },
        };
        self.end_call(state, event).await;
        Ok(())
    }

    async fn redirect_locked(&self, state: &mut AgentState, target: &str) -> ClientResult<()> {
        let current = state.call_state();
        let Some(dialog) = state.call.as_ref().filter(|_| current == CallState::IncomingRinging).map(|c| c.dialog)
        else {
            return Err(ClientError::invalid_state("redirect", current));
        };
        info!("redirecting {} to {}", dialog, target);
        state.cancel_timers();
        let result = self.signaling.redirect(dialog, target).await;
        if let Err(e) = &result {
            warn!("redirect on {} failed: {}", dialog, e);
        }
        self.end_call(state, ClientEvent::CallClosed { dialog }).await;
        result
    }

    async fn hangup_locked(&self, state: &mut AgentState) -> ClientResult<()> {
        state.cancel_timers();
        let Some(mut call) = state.call.take() else {
            return Err(ClientError::invalid_state("hangup", CallState::Idle));
        };
        info!("hanging up {}", call.dialog);
        self.stop_media(&mut call).await;
        if let Err(e) = self.signaling.hangup(call.dialog).await {
            warn!("hangup on {} failed: {}", call.dialog, e);
        }
        if let Some(transfer) = state.transfer.take() {
            debug!("hanging up pending transfer dialog {}", transfer.dialog);
            if let Err(e) = self.signaling.hangup(transfer.dialog).await {
                warn!("hangup on {} failed: {}", transfer.dialog, e);
            }
        }
        self.emit(ClientEvent::CallStateChanged {
            dialog: call.dialog,
            previous: call.state,
            current: CallState::Idle,
        });
        self.emit(ClientEvent::CallClosed { dialog: call.dialog });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Signaling events
    // ------------------------------------------------------------------

    /// Forward signaling events and media address changes until the
    /// signaling channel closes
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<SignalingEvent>) -> JoinHandle<()> {
        let agent = Arc::clone(self);
        let mut media_events = self.media.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => agent.handle_event(event).await,
                        None => {
                            debug!("signaling channel closed");
                            break;
                        }
                    },
                    event = media_events.recv() => match event {
                        Ok(event) => agent.on_media_event(event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("{} media events missed", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Apply one signaling event
    pub async fn handle_event(&self, event: SignalingEvent) {
        let mut state = self.state.lock().await;
        let dialog = event.dialog();
        debug!("{} on {}", event.name(), dialog);

        if let SignalingEvent::IncomingCall { dialog, caller, callee, sdp } = event {
            self.on_incoming_call(&mut state, dialog, caller, callee, sdp).await;
            return;
        }
        if !state.is_current(dialog) && !state.is_transfer(dialog) {
            debug!("{} for {}: not the current call", event.name(), dialog);
            return;
        }

        match event {
            SignalingEvent::IncomingCall { .. } => {}
            SignalingEvent::Progress { dialog } => self.on_provisional(&mut state, dialog, false),
            SignalingEvent::Ringing { dialog } => self.on_provisional(&mut state, dialog, true),
            SignalingEvent::Accepted { dialog, sdp } => self.on_accepted(&mut state, dialog, sdp).await,
            SignalingEvent::Confirmed { dialog, sdp } => self.on_confirmed(&mut state, dialog, sdp).await,
            SignalingEvent::ReInvite { dialog, sdp } => self.on_reinvite(&mut state, dialog, sdp).await,
            SignalingEvent::ReInviteAccepted { dialog, .. } => info!("re-invite accepted on {}", dialog),
            SignalingEvent::ReInviteRefused { dialog, reason } => {
                info!("re-invite refused on {} ({})", dialog, reason);
                self.emit(ClientEvent::ModifyFailed { dialog, reason });
            }
            SignalingEvent::Refused { dialog, code, reason } => {
                self.on_failure(&mut state, dialog, code, reason).await
            }
            SignalingEvent::Timeout { dialog } => {
                self.on_failure(&mut state, dialog, 408, "Request Timeout".to_string()).await
            }
            SignalingEvent::Redirected { dialog, reason, contacts } => {
                self.on_redirected(&mut state, dialog, reason, contacts).await
            }
            SignalingEvent::Cancelled { dialog } => {
                if state.is_current(dialog) {
                    info!("call {} cancelled", dialog);
                    self.end_call(&mut state, ClientEvent::CallCancelled { dialog }).await;
                } else {
                    self.on_failure(&mut state, dialog, 487, "Request Terminated".to_string()).await;
                }
            }
            SignalingEvent::Bye { dialog } => self.on_bye(&mut state, dialog).await,
            SignalingEvent::Closed { dialog } => {
                if state.is_current(dialog) {
                    self.end_call(&mut state, ClientEvent::CallClosed { dialog }).await;
                } else {
                    self.on_failure(&mut state, dialog, 487, "Request Terminated".to_string()).await;
                }
            }
            SignalingEvent::TransferRequested { dialog, refer_to, .. } => {
                self.on_transfer_requested(&mut state, dialog, refer_to).await
            }
            SignalingEvent::TransferAccepted { dialog } => info!("transfer accepted on {}", dialog),
            SignalingEvent::TransferRefused { dialog, reason } | SignalingEvent::TransferFailed { dialog, reason } => {
                info!("transfer from {} failed ({})", dialog, reason);
                self.emit(ClientEvent::TransferFailed { dialog, reason });
            }
            SignalingEvent::TransferSucceeded { dialog } => self.on_transfer_succeeded(&mut state, dialog).await,
        }
    }

    async fn on_incoming_call(
        &self,
        state: &mut AgentState,
        dialog: DialogId,
        caller: String,
        callee: String,
        sdp: Option<String>,
    ) {
        if state.call.is_some() {
            info!("locally busy: incoming call from {} refused", caller);
            if let Err(e) = self.signaling.refuse(dialog).await {
                warn!("busy refusal on {} failed: {}", dialog, e);
            }
            return;
        }

        info!("incoming call from {}", caller);
        let remote = Self::parse_sdp(sdp.as_deref());
        let media = remote.as_ref().map(|r| self.negotiator.descriptors(r)).unwrap_or_default();
        if let Err(e) = self.signaling.ring(dialog).await {
            warn!("ring on {} failed: {}", dialog, e);
        }

        state.call = Some(CallSession::incoming(dialog, caller.clone(), remote));
        self.emit(ClientEvent::CallStateChanged {
            dialog,
            previous: CallState::Idle,
            current: CallState::IncomingRinging,
        });
        self.emit(ClientEvent::IncomingCall {
            dialog,
            caller,
            callee,
            media,
        });

        if let Some(target) = self.profile.redirect_to.clone() {
            if let Err(e) = self.redirect_locked(state, &target).await {
                warn!("automatic redirect failed: {}", e);
            }
            return;
        }
        if let Some(delay) = self.profile.refuse_timeout() {
            self.schedule(state, delay, dialog, TimerAction::Refuse);
        }
        if let Some(delay) = self.profile.accept_timeout() {
            self.schedule(state, delay, dialog, TimerAction::Accept);
        }
    }

    fn on_provisional(&self, state: &mut AgentState, dialog: DialogId, ringing: bool) {
        let Some(call) = state.call.as_mut().filter(|c| c.dialog == dialog) else {
            debug!("provisional response on transfer dialog {}", dialog);
            return;
        };
        if ringing && !call.ringing_reported {
            call.ringing_reported = true;
            info!("ringing");
            self.emit(ClientEvent::CallRinging { dialog });
        } else if !ringing && !call.progress_reported {
            call.progress_reported = true;
            info!("progress");
            self.emit(ClientEvent::CallProgress { dialog });
        }
    }

    async fn on_accepted(&self, state: &mut AgentState, dialog: DialogId, sdp: Option<String>) {
        if state.is_transfer(dialog) {
            self.complete_transfer(state, sdp).await;
            return;
        }
        let Some(call) = state.call.as_mut() else {
            return;
        };

        match (call.direction, call.state) {
            (CallDirection::Outgoing, CallState::OutgoingProgress) => {
                info!("call {} accepted", dialog);
                let remote = Self::parse_sdp(sdp.as_deref());
                if self.profile.no_offer {
                    match &remote {
                        Some(remote) => {
                            let answer = self.negotiator.answer_session(&self.local_session(), remote);
                            if let Err(e) = self.signaling.ack_with_answer(dialog, &answer.to_string()).await {
                                warn!("ack with answer on {} failed: {}", dialog, e);
                            }
                            call.local_sdp = Some(answer);
                        }
                        None => warn!("2xx on {} carries no offer", dialog),
                    }
                }
                if remote.is_some() {
                    call.remote_sdp = remote;
                }
                call.connected_at = Some(Utc::now());
                self.set_state(call, CallState::Active);
                self.emit(ClientEvent::CallAccepted { dialog });
                self.start_media(call).await;
                self.schedule_hangup(state, dialog);
            }
            (CallDirection::Incoming, CallState::Active) => {
                self.start_media(call).await;
            }
            (_, current) => debug!("accepted on {} while {}, ignored", dialog, current),
        }
    }

    async fn on_confirmed(&self, state: &mut AgentState, dialog: DialogId, sdp: Option<String>) {
        let Some(call) = state.call.as_mut().filter(|c| c.dialog == dialog) else {
            return;
        };
        info!("call {} confirmed", dialog);
        if call.remote_sdp.is_none() {
            call.remote_sdp = Self::parse_sdp(sdp.as_deref());
        }
        if call.state.is_active() {
            self.start_media(call).await;
        }
    }

    async fn on_reinvite(&self, state: &mut AgentState, dialog: DialogId, sdp: Option<String>) {
        let Some(call) = state.call.as_mut().filter(|c| c.dialog == dialog) else {
            return;
        };
        info!("re-invite on {}", dialog);
        if let Some(remote) = Self::parse_sdp(sdp.as_deref()) {
            call.remote_sdp = Some(remote);
        }
        let local = call.local_sdp.clone().unwrap_or_else(|| self.local_session());
        if let Err(e) = self.signaling.accept(dialog, &local.to_string()).await {
            warn!("accepting re-invite on {} failed: {}", dialog, e);
        }
    }

    /// Final failure response or timeout on the current or transfer dialog
    async fn on_failure(&self, state: &mut AgentState, dialog: DialogId, code: u16, reason: String) {
        if state.is_transfer(dialog) {
            state.transfer = None;
            let Some(original) = state.call.as_ref().map(|c| c.dialog) else {
                return;
            };
            info!("transfer call failed ({} {})", code, reason);
            if let Err(e) = self.signaling.notify(original, code, &reason).await {
                warn!("notify on {} failed: {}", original, e);
            }
            self.emit(ClientEvent::TransferFailed {
                dialog: original,
                reason,
            });
            return;
        }
        info!("call {} failed ({} {})", dialog, code, reason);
        self.end_call(
            state,
            ClientEvent::CallFailed {
                dialog: Some(dialog),
                reason,
            },
        )
        .await;
    }

    async fn on_redirected(&self, state: &mut AgentState, dialog: DialogId, reason: String, contacts: Vec<String>) {
        let outgoing = state
            .call
            .as_ref()
            .is_some_and(|c| c.dialog == dialog && c.state == CallState::OutgoingProgress);
        if !outgoing {
            debug!("redirection on {} ignored", dialog);
            return;
        }
        info!("redirection ({})", reason);

        let Some(contact) = contacts.into_iter().next() else {
            self.end_call(
                state,
                ClientEvent::CallFailed {
                    dialog: Some(dialog),
                    reason,
                },
            )
            .await;
            return;
        };

        let offer = state.call.as_ref().and_then(|c| c.local_sdp.as_ref()).map(|o| o.to_string());
        match self.signaling.call(&contact, offer.as_deref()).await {
            Ok(next) => {
                info!("calling redirection contact {}", contact);
                if let Some(call) = state.call.as_mut() {
                    call.retarget(next, contact);
                }
            }
            Err(e) => {
                warn!("call to {} failed: {}", contact, e);
                self.end_call(
                    state,
                    ClientEvent::CallFailed {
                        dialog: Some(dialog),
                        reason: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    async fn on_bye(&self, state: &mut AgentState, dialog: DialogId) {
        if !state.is_current(dialog) {
            // the transfer target hung up before answering
            if let Some(transfer) = state.transfer.take() {
                info!("transfer dialog {} closed", transfer.dialog);
            }
            return;
        }

        if let Some(transfer) = state.transfer.take() {
            info!("close previous call");
            let previous = state.call_state();
            if let Some(mut call) = state.call.take() {
                self.stop_media(&mut call).await;
            }
            self.emit(ClientEvent::CallStateChanged {
                dialog: transfer.dialog,
                previous,
                current: transfer.state,
            });
            state.call = Some(transfer);
            return;
        }

        info!("call {} closed by remote", dialog);
        self.end_call(state, ClientEvent::CallClosed { dialog }).await;
    }

    async fn on_transfer_requested(&self, state: &mut AgentState, dialog: DialogId, refer_to: String) {
        if !state.is_current(dialog) || !state.call_state().is_active() {
            warn!("transfer request on {} while {}, ignored", dialog, state.call_state());
            return;
        }
        info!("transfer to {}", refer_to);
        if let Err(e) = self.signaling.accept_transfer(dialog).await {
            warn!("accepting transfer on {} failed: {}", dialog, e);
            return;
        }

        let offer = self.local_session();
        match self.signaling.call(&refer_to, Some(&offer.to_string())).await {
            Ok(next) => {
                debug!("transfer dialog {}", next);
                state.transfer = Some(CallSession::outgoing(next, refer_to, Some(offer)));
            }
            Err(e) => {
                warn!("call to {} failed: {}", refer_to, e);
                if let Err(e) = self.signaling.notify(dialog, 503, "Service Unavailable").await {
                    warn!("notify on {} failed: {}", dialog, e);
                }
                self.emit(ClientEvent::TransferFailed {
                    dialog,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// The transfer target answered: hand the call over to its dialog
    async fn complete_transfer(&self, state: &mut AgentState, sdp: Option<String>) {
        let Some(mut transfer) = state.transfer.take() else {
            return;
        };
        if let Some(remote) = Self::parse_sdp(sdp.as_deref()) {
            transfer.remote_sdp = Some(remote);
        }

        state.cancel_timers();
        if let Some(mut original) = state.call.take() {
            if let Err(e) = self.signaling.notify(original.dialog, 200, "OK").await {
                warn!("notify on {} failed: {}", original.dialog, e);
            }
            self.stop_media(&mut original).await;
            if let Err(e) = self.signaling.hangup(original.dialog).await {
                warn!("hangup on {} failed: {}", original.dialog, e);
            }
        }

        let dialog = transfer.dialog;
        info!("call transferred to {} ({})", transfer.peer, dialog);
        transfer.connected_at = Some(Utc::now());
        self.set_state(&mut transfer, CallState::Active);
        self.start_media(&mut transfer).await;
        state.call = Some(transfer);
        self.emit(ClientEvent::CallTransferred { dialog });
        self.schedule_hangup(state, dialog);
    }

    async fn on_transfer_succeeded(&self, state: &mut AgentState, dialog: DialogId) {
        if !state.is_current(dialog) {
            return;
        }
        info!("transfer succeeded");
        state.cancel_timers();
        let Some(mut call) = state.call.take() else {
            return;
        };
        self.stop_media(&mut call).await;
        if let Err(e) = self.signaling.hangup(dialog).await {
            warn!("hangup on {} failed: {}", dialog, e);
        }
        self.emit(ClientEvent::CallStateChanged {
            dialog,
            previous: call.state,
            current: CallState::Idle,
        });
        self.emit(ClientEvent::CallTransferred { dialog });
    }

    fn on_media_event(&self, event: MediaEvent) {
        match event {
            MediaEvent::RemoteAddressChanged { kind, addr } => {
                info!("remote {} address changed to {}", kind, addr);
                self.emit(ClientEvent::RemoteMediaAddressChanged { kind, addr });
            }
            other => debug!("media event: {:?}", other),
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn emit(&self, event: ClientEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, call: &mut CallSession, next: CallState) {
        if call.state == next {
            return;
        }
        let previous = std::mem::replace(&mut call.state, next);
        debug!("{}: {} -> {}", call.dialog, previous, next);
        self.emit(ClientEvent::CallStateChanged {
            dialog: call.dialog,
            previous,
            current: next,
        });
    }

    /// Drop the current call: timers, media, then the final event
    async fn end_call(&self, state: &mut AgentState, event: ClientEvent) {
        state.cancel_timers();
        if let Some(mut call) = state.call.take() {
            self.stop_media(&mut call).await;
            self.emit(ClientEvent::CallStateChanged {
                dialog: call.dialog,
                previous: call.state,
                current: CallState::Idle,
            });
        }
        self.emit(event);
    }

    async fn start_media(&self, call: &mut CallSession) {
        if call.has_media() {
            debug!("media sessions already active");
            return;
        }
        let (Some(local), Some(remote)) = (&call.local_sdp, &call.remote_sdp) else {
            debug!("offer/answer incomplete, media not started");
            return;
        };

        let flows = self.negotiator.negotiate_sessions(local, remote, self.profile.direction());
        if flows.is_empty() {
            info!("no media flow negotiated for {}", call.dialog);
        }
        for flow in flows {
            let kind = flow.kind.clone();
            let format = flow.codec.payload_type.to_string();
            info!("{} format: {}", kind, flow.codec);
            if self.media.start_media_session(flow).await {
                call.media_kinds.push(kind.clone());
                self.emit(ClientEvent::MediaStarted {
                    dialog: call.dialog,
                    kind,
                    format,
                });
            }
        }
    }

    async fn stop_media(&self, call: &mut CallSession) {
        for kind in std::mem::take(&mut call.media_kinds) {
            self.media.stop_media_session(&kind).await;
            self.emit(ClientEvent::MediaStopped {
                dialog: call.dialog,
                kind,
            });
        }
    }

    fn parse_sdp(body: Option<&str>) -> Option<SessionDescription> {
        let body = body.filter(|b| !b.trim().is_empty())?;
        match SessionDescription::parse(body) {
            Ok(sdp) => Some(sdp),
            Err(e) => {
                let e = ClientError::from(e);
                warn!("ignoring malformed session description ({}): {}", e.category(), e);
                None
            }
        }
    }

    fn schedule_hangup(&self, state: &mut AgentState, dialog: DialogId) {
        if let Some(delay) = self.profile.hangup_timeout() {
            self.schedule(state, delay, dialog, TimerAction::Hangup);
        }
    }

    fn schedule(&self, state: &mut AgentState, delay: Duration, dialog: DialogId, action: TimerAction) {
        let token = CancellationToken::new();
        state.timers.push(token.clone());
        let agent = self.weak_self.clone();
        debug!("{:?} timer for {} in {:?}", action, dialog, delay);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(agent) = agent.upgrade() {
                        agent.on_timer(dialog, action).await;
                    }
                }
            }
        });
    }

    async fn on_timer(&self, dialog: DialogId, action: TimerAction) {
        let mut state = self.state.lock().await;
        if !state.is_current(dialog) {
            debug!("{:?} timer for stale dialog {}", action, dialog);
            return;
        }
        let result = match (action, state.call_state()) {
            (TimerAction::Refuse, CallState::IncomingRinging) => {
                info!("response time expired: incoming call refused");
                self.refuse_locked(&mut state, Some(RESPONSE_TIMEOUT_REASON)).await
            }
            (TimerAction::Accept, CallState::IncomingRinging) => {
                info!("automatic answer");
                self.accept_locked(&mut state).await
            }
            (TimerAction::Hangup, CallState::Active) => {
                info!("automatic hangup");
                self.hangup_locked(&mut state).await
            }
            (action, current) => {
                debug!("{:?} timer no longer applies ({})", action, current);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("{:?} timer action failed: {}", action, e);
        }
    }

    fn spawn_periodic(&self, token: &CancellationToken, period: Duration, action: PeriodicAction) {
        let token = token.clone();
        let agent = self.weak_self.clone();
        debug!("{:?} every {:?}", action, period);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        let Some(agent) = agent.upgrade() else {
                            break;
                        };
                        agent.on_periodic(action).await;
                    }
                }
            }
        });
    }

    async fn on_periodic(&self, action: PeriodicAction) {
        match action {
            PeriodicAction::Register => {
                // failures are reported as events; the next period retries
                let _ = self.register().await;
            }
            PeriodicAction::KeepAlive => {
                if let Err(e) = self.signaling.keep_alive().await {
                    debug!("keep-alive failed: {}", e);
                }
            }
        }
    }
}
