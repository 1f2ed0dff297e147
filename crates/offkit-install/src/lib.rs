//! # OffKit Install
//!
//! Install-promotion controller for the OffKit offline-support
//! subsystem.
//!
//! ## Features
//!
//! - **DeferredPrompt**: the stored "show install prompt" capability,
//!   consumable exactly once
//! - **InstallableOffer**: the "app becomes installable" event payload,
//!   with default mini-prompt suppression
//! - **InstallPromotion**: the promotion state machine (Idle ⇄ Offered)
//!
//! ## State machine
//!
//! ```text
//! Idle ──installable offer──▶ Offered
//! Offered ──promotion activated (prompt consumed)──▶ Idle
//! Offered ──app installed externally──▶ Idle
//! ```
//!
//! All transitions are driven by host-dispatched events on a single UI
//! thread; the controller takes `&mut self` and needs no locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

// ==================== Errors ====================

/// Errors that can occur in install promotion.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The promotion was activated with no offer outstanding; guarding
    /// this is the caller's responsibility.
    #[error("No pending install offer")]
    NoPendingOffer,

    /// The host side of the prompt went away before answering.
    #[error("Prompt host disappeared before the user responded")]
    HostGone,
}

// ==================== Prompt ====================

/// Outcome of showing the install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The user accepted the install.
    Accepted,
    /// The user dismissed the prompt.
    Dismissed,
}

/// The deferred "show install prompt" capability.
///
/// Offered by the host once per eligible session. `present` consumes it;
/// replay after consumption is ruled out by move semantics.
#[derive(Debug)]
pub struct DeferredPrompt {
    show_tx: oneshot::Sender<()>,
    choice_rx: oneshot::Receiver<PromptOutcome>,
}

/// Host side of a deferred prompt: observes the show request and
/// supplies the user's choice.
#[derive(Debug)]
pub struct PromptHost {
    /// Resolves when the prompt is presented; dropped if never shown.
    pub shown: oneshot::Receiver<()>,
    /// Delivers the user's choice.
    pub choice: oneshot::Sender<PromptOutcome>,
}

impl DeferredPrompt {
    /// Create a prompt and its host-side counterpart.
    pub fn channel() -> (Self, PromptHost) {
        let (show_tx, show_rx) = oneshot::channel();
        let (choice_tx, choice_rx) = oneshot::channel();
        (
            Self { show_tx, choice_rx },
            PromptHost {
                shown: show_rx,
                choice: choice_tx,
            },
        )
    }

    /// Show the prompt now and suspend until the user responds.
    ///
    /// Always settles: if the host side is gone the result is
    /// `InstallError::HostGone`, never a pending future.
    pub async fn present(self) -> Result<PromptOutcome, InstallError> {
        self.show_tx.send(()).map_err(|_| InstallError::HostGone)?;
        self.choice_rx.await.map_err(|_| InstallError::HostGone)
    }
}

// ==================== Installable Offer ====================

/// The "app becomes installable" event payload.
#[derive(Debug)]
pub struct InstallableOffer {
    prompt: DeferredPrompt,
    default_suppressed: Arc<AtomicBool>,
}

impl InstallableOffer {
    /// Create an offer around a deferred prompt. The returned flag lets
    /// the host observe whether its automatic mini-prompt was
    /// suppressed.
    pub fn new(prompt: DeferredPrompt) -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            Self {
                prompt,
                default_suppressed: Arc::clone(&flag),
            },
            flag,
        )
    }

    /// Suppress the host's automatic mini-prompt.
    pub fn prevent_default(&self) {
        self.default_suppressed.store(true, Ordering::Release);
    }

    /// Whether the default mini-prompt was suppressed.
    pub fn default_suppressed(&self) -> bool {
        self.default_suppressed.load(Ordering::Acquire)
    }

    fn into_prompt(self) -> DeferredPrompt {
        self.prompt
    }
}

// ==================== Promotion UI ====================

/// The promotional page element.
///
/// `show` makes the element visible and attaches its click handler;
/// `hide` reverses both. The controller holds an `Option` of this, so an
/// absent element is a silent no-op, not an error.
pub trait PromotionUi: Send {
    /// Make the promotion visible.
    fn show(&mut self);

    /// Hide the promotion.
    fn hide(&mut self);
}

// ==================== Controller ====================

/// Promotion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionState {
    /// No offer outstanding.
    Idle,
    /// An offer is stored and the promotion is visible.
    Offered,
}

/// The install-promotion controller.
///
/// Holds at most one deferred prompt at a time. A second offer while one
/// is outstanding replaces it; the host side of the dropped prompt
/// observes channel closure.
pub struct InstallPromotion<U: PromotionUi> {
    ui: Option<U>,
    deferred: Option<DeferredPrompt>,
    last_outcome: Option<PromptOutcome>,
}

impl<U: PromotionUi> InstallPromotion<U> {
    /// Create a controller. `ui` is `None` when the promotional element
    /// is absent from the page.
    pub fn new(ui: Option<U>) -> Self {
        Self {
            ui,
            deferred: None,
            last_outcome: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> PromotionState {
        if self.deferred.is_some() {
            PromotionState::Offered
        } else {
            PromotionState::Idle
        }
    }

    /// Check if an offer is stored.
    pub fn has_pending_offer(&self) -> bool {
        self.deferred.is_some()
    }

    /// Outcome of the most recent consumed prompt.
    pub fn last_outcome(&self) -> Option<PromptOutcome> {
        self.last_outcome
    }

    /// Idle → Offered: the host fired the installable event.
    ///
    /// Suppresses the automatic mini-prompt, stores the deferred prompt
    /// for later replay, and shows the promotion.
    pub fn on_installable(&mut self, offer: InstallableOffer) {
        offer.prevent_default();
        info!("installable offer received");
        self.deferred = Some(offer.into_prompt());
        self.show_ui();
    }

    /// Offered → Idle, consumption path: the user activated the
    /// promotion.
    ///
    /// Hides the promotion, shows the stored prompt, suspends until the
    /// user responds, and records the outcome. The prompt is gone
    /// afterwards regardless of the outcome. Calling this in Idle is a
    /// caller bug and returns `InstallError::NoPendingOffer`.
    pub async fn on_promotion_activated(&mut self) -> Result<PromptOutcome, InstallError> {
        let prompt = self.deferred.take().ok_or(InstallError::NoPendingOffer)?;
        self.hide_ui();
        let outcome = prompt.present().await?;
        info!(outcome = ?outcome, "user responded to install prompt");
        self.last_outcome = Some(outcome);
        Ok(outcome)
    }

    /// Offered → Idle, external-install path: the app was installed via
    /// another UI path (e.g. a browser-native menu).
    pub fn on_app_installed(&mut self) {
        info!("app installed");
        self.hide_ui();
        self.deferred = None;
    }

    fn show_ui(&mut self) {
        match self.ui.as_mut() {
            Some(ui) => ui.show(),
            None => debug!("promotion element absent, show is a no-op"),
        }
    }

    fn hide_ui(&mut self) {
        match self.ui.as_mut() {
            Some(ui) => ui.hide(),
            None => debug!("promotion element absent, hide is a no-op"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records visibility transitions.
    struct FakeUi {
        visible: bool,
        shows: usize,
        hides: usize,
    }

    impl FakeUi {
        fn new() -> Self {
            Self {
                visible: false,
                shows: 0,
                hides: 0,
            }
        }
    }

    impl PromotionUi for FakeUi {
        fn show(&mut self) {
            self.visible = true;
            self.shows += 1;
        }

        fn hide(&mut self) {
            self.visible = false;
            self.hides += 1;
        }
    }

    fn offer() -> (InstallableOffer, Arc<AtomicBool>, PromptHost) {
        let (prompt, host) = DeferredPrompt::channel();
        let (offer, flag) = InstallableOffer::new(prompt);
        (offer, flag, host)
    }

    #[test]
    fn test_offer_stored_and_ui_shown() {
        let mut promotion = InstallPromotion::new(Some(FakeUi::new()));
        assert_eq!(promotion.state(), PromotionState::Idle);

        let (offer, suppressed, _host) = offer();
        promotion.on_installable(offer);

        assert_eq!(promotion.state(), PromotionState::Offered);
        assert!(promotion.has_pending_offer());
        assert!(suppressed.load(Ordering::Acquire));
        assert!(promotion.ui.as_ref().unwrap().visible);
    }

    #[tokio::test]
    async fn test_consumption_clears_offer_and_hides_ui() {
        let mut promotion = InstallPromotion::new(Some(FakeUi::new()));
        let (offer, _flag, host) = offer();
        promotion.on_installable(offer);

        // Host answers the prompt once it is shown.
        tokio::spawn(async move {
            host.shown.await.unwrap();
            host.choice.send(PromptOutcome::Accepted).unwrap();
        });

        let outcome = promotion.on_promotion_activated().await.unwrap();
        assert_eq!(outcome, PromptOutcome::Accepted);
        assert_eq!(promotion.state(), PromotionState::Idle);
        assert_eq!(promotion.last_outcome(), Some(PromptOutcome::Accepted));

        let ui = promotion.ui.as_ref().unwrap();
        assert!(!ui.visible);
        assert_eq!(ui.hides, 1);
    }

    #[tokio::test]
    async fn test_dismissed_outcome_recorded() {
        let mut promotion = InstallPromotion::new(Some(FakeUi::new()));
        let (offer, _flag, host) = offer();
        promotion.on_installable(offer);

        tokio::spawn(async move {
            host.shown.await.unwrap();
            host.choice.send(PromptOutcome::Dismissed).unwrap();
        });

        let outcome = promotion.on_promotion_activated().await.unwrap();
        assert_eq!(outcome, PromptOutcome::Dismissed);
        assert!(!promotion.has_pending_offer());
    }

    #[tokio::test]
    async fn test_activation_without_offer_is_guarded() {
        let mut promotion = InstallPromotion::new(Some(FakeUi::new()));
        let err = promotion.on_promotion_activated().await.unwrap_err();
        assert!(matches!(err, InstallError::NoPendingOffer));
    }

    #[test]
    fn test_external_install_clears_offer() {
        let mut promotion = InstallPromotion::new(Some(FakeUi::new()));
        let (offer, _flag, _host) = offer();
        promotion.on_installable(offer);

        promotion.on_app_installed();
        assert_eq!(promotion.state(), PromotionState::Idle);
        assert!(!promotion.ui.as_ref().unwrap().visible);
    }

    #[test]
    fn test_absent_ui_is_silent_noop() {
        let mut promotion: InstallPromotion<FakeUi> = InstallPromotion::new(None);
        let (offer, _flag, _host) = offer();
        promotion.on_installable(offer);
        promotion.on_app_installed();
        assert_eq!(promotion.state(), PromotionState::Idle);
    }

    #[tokio::test]
    async fn test_host_gone_settles_with_error() {
        let mut promotion = InstallPromotion::new(Some(FakeUi::new()));
        let (offer, _flag, host) = offer();
        promotion.on_installable(offer);
        drop(host);

        let err = promotion.on_promotion_activated().await.unwrap_err();
        assert!(matches!(err, InstallError::HostGone));
        // The prompt is spent either way.
        assert_eq!(promotion.state(), PromotionState::Idle);
    }

    #[test]
    fn test_replacement_offer_drops_previous_prompt() {
        let mut promotion = InstallPromotion::new(Some(FakeUi::new()));
        let (first, _f1, first_host) = offer();
        promotion.on_installable(first);

        let (second, _f2, _second_host) = offer();
        promotion.on_installable(second);

        // The first prompt was dropped; its host observes closure.
        assert!(first_host.choice.is_closed());
        assert_eq!(promotion.state(), PromotionState::Offered);
    }
}
