//! Sign-in negotiation.

use hostbridge_core::{
    AuthFailure, BridgeConfig, BridgeError, Credential, HistoryBuffer, ProtocolFailure, Result,
    WipeGuard, config::LoginMarkers,
};
use hostbridge_shell::ConnectionManager;
use tokio_util::sync::CancellationToken;

use crate::{
    bridge::TerminalBridge,
    waiter::{CandidateSet, PatternWaiter},
};

/// What a matched marker asks of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAction {
    Reject(AuthFailure),
    SignedIn,
    /// Answer with these keys and keep negotiating.
    Keystroke(String),
    /// Answer with a bare line terminator and keep negotiating.
    BareEnter,
}

/// Build the ordered candidate list from configured markers.
///
/// Rejections come first so a refusal is never mistaken for progress.
#[must_use]
pub fn login_candidates(markers: &LoginMarkers) -> CandidateSet<LoginAction> {
    let mut set = CandidateSet::new();
    for marker in &markers.rejected {
        set.push(marker.clone(), LoginAction::Reject(AuthFailure::BadCredentials));
    }
    for marker in &markers.verify_code_change {
        set.push(
            marker.clone(),
            LoginAction::Reject(AuthFailure::VerifyCodeChangeRequired),
        );
    }
    for marker in &markers.main_menu {
        set.push(marker.clone(), LoginAction::SignedIn);
    }
    for prompt in &markers.continue_prompts {
        set.push(
            prompt.marker.clone(),
            LoginAction::Keystroke(prompt.key.clone()),
        );
    }
    for marker in &markers.unknown_prompts {
        set.push(marker.clone(), LoginAction::BareEnter);
    }
    set
}

/// Opens a fresh channel and walks the host's sign-in screens.
pub struct LoginHandshake {
    waiter: PatternWaiter,
    candidates: CandidateSet<LoginAction>,
    max_rounds: usize,
}

impl LoginHandshake {
    #[must_use]
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            waiter: PatternWaiter::new(config.login.wait_timeout(), config.sentinel()),
            candidates: login_candidates(&config.login.markers),
            max_rounds: config.login.max_rounds,
        }
    }

    /// Sign in with the given codes.
    ///
    /// Any open channel is closed first. Both credentials are wiped before
    /// this returns or is dropped. Text read during negotiation is shown on
    /// `bridge` as it arrives. Returns the number of rounds it took.
    ///
    /// # Errors
    /// - [`BridgeError::Authentication`] when the host refuses the codes.
    /// - [`BridgeError::Protocol`] on timeout or when rounds run out.
    /// - [`BridgeError::Connection`] when the host cannot be reached.
    pub async fn run(
        &self,
        conn: &mut ConnectionManager,
        history: &mut HistoryBuffer,
        bridge: &TerminalBridge,
        access: &mut Credential,
        verify: &mut Credential,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut access = WipeGuard::new(access);
        let mut verify = WipeGuard::new(verify);

        if conn.is_open() {
            tracing::info!("Closing existing channel before sign-in");
        }
        conn.open().await?;
        conn.send_secure(access.credential())?;
        conn.send_secure(verify.credential())?;

        for round in 1..=self.max_rounds {
            let found = self
                .waiter
                .wait_for_any(
                    conn,
                    &self.candidates,
                    history,
                    |chunk| bridge.write_host(chunk),
                    cancel,
                )
                .await?;

            let Some(candidate) = self.candidates.get(found.index) else {
                break;
            };
            tracing::debug!(round, marker = %candidate.marker, "Sign-in prompt");

            match &candidate.action {
                LoginAction::Reject(reason) => return Err(BridgeError::Authentication(*reason)),
                LoginAction::SignedIn => return Ok(round),
                LoginAction::Keystroke(keys) => conn.send_keys(keys)?,
                LoginAction::BareEnter => conn.send_raw("")?,
            }
        }

        Err(BridgeError::Protocol(ProtocolFailure::UnrecognizedHostState {
            rounds: self.max_rounds,
        }))
    }
}
