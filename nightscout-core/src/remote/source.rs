//! Single-pass pipeline: payload -> command -> validation -> delegate.

use crate::clock::Clock;
use crate::otp::OtpManager;
use crate::remote::action::RemoteAction;
use crate::remote::command::RemoteCommand;
use crate::remote::notification::{NotificationPayload, RemoteNotification};
use crate::remote::RemoteCommandError;
use async_trait::async_trait;
use std::sync::Arc;

/// Furthest stage a notification reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStage {
    Received,
    Parsed,
    Validated,
    Dispatched,
}

impl std::fmt::Display for CommandStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandStage::Received => write!(f, "received"),
            CommandStage::Parsed => write!(f, "parsed"),
            CommandStage::Validated => write!(f, "validated"),
            CommandStage::Dispatched => write!(f, "dispatched"),
        }
    }
}

/// Host-side handler for accepted actions and rejected notifications.
#[async_trait]
pub trait RemoteCommandDelegate: Send + Sync {
    /// Carry out the action. Failures are reported back, never retried here.
    async fn handle_action(&self, action: RemoteAction) -> Result<(), RemoteCommandError>;

    /// Called once per failed notification with the stage it reached.
    async fn report_error(
        &self,
        error: &RemoteCommandError,
        stage: CommandStage,
        payload: &NotificationPayload,
    );
}

/// Turns push payloads into validated actions for the delegate.
pub struct RemoteCommandSource {
    otp_manager: Arc<OtpManager>,
    clock: Arc<dyn Clock>,
    delegate: Arc<dyn RemoteCommandDelegate>,
}

impl RemoteCommandSource {
    pub fn new(
        otp_manager: Arc<OtpManager>,
        clock: Arc<dyn Clock>,
        delegate: Arc<dyn RemoteCommandDelegate>,
    ) -> Self {
        Self {
            otp_manager,
            clock,
            delegate,
        }
    }

    /// Parse a payload into a command without validating or dispatching it.
    pub fn command_from_push_notification(
        &self,
        payload: &NotificationPayload,
    ) -> Result<RemoteCommand, RemoteCommandError> {
        RemoteNotification::from_payload(payload)?.into_command(&self.otp_manager, &self.clock)
    }

    /// Run one notification through the pipeline.
    ///
    /// Any failure is logged and reported to the delegate before being returned.
    pub async fn remote_notification_was_received(
        &self,
        payload: &NotificationPayload,
    ) -> Result<RemoteAction, RemoteCommandError> {
        let mut stage = CommandStage::Received;

        match self.process(payload, &mut stage).await {
            Ok(action) => {
                tracing::info!("Remote command dispatched: {}", action.description());
                Ok(action)
            }
            Err(error) => {
                let keys: Vec<&str> = payload.keys().map(String::as_str).collect();
                tracing::error!(
                    stage = %stage,
                    payload_keys = ?keys,
                    "Remote notification rejected: {}",
                    error
                );
                self.delegate.report_error(&error, stage, payload).await;
                Err(error)
            }
        }
    }

    async fn process(
        &self,
        payload: &NotificationPayload,
        stage: &mut CommandStage,
    ) -> Result<RemoteAction, RemoteCommandError> {
        let command = self.command_from_push_notification(payload)?;
        *stage = CommandStage::Parsed;

        command.validate()?;
        *stage = CommandStage::Validated;
        tracing::debug!(command_id = command.id(), "Remote command validated");

        let action = command.into_action();
        self.delegate.handle_action(action.clone()).await?;
        *stage = CommandStage::Dispatched;

        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::OtpConfig;
    use crate::otp::{MemorySecretStore, OtpValidationError};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    const TEST_SECRET: &str = "2IOF4MG5QSAKMIYD6QJKOBZFH2QV2CYG";
    // Four steps after 1_670_001_615; current code is 086432, previous 881201.
    const NOW: i64 = 1_670_001_705;

    #[derive(Default)]
    struct RecordingDelegate {
        actions: Mutex<Vec<RemoteAction>>,
        errors: Mutex<Vec<(String, CommandStage)>>,
        fail_actions: bool,
    }

    #[async_trait]
    impl RemoteCommandDelegate for RecordingDelegate {
        async fn handle_action(&self, action: RemoteAction) -> Result<(), RemoteCommandError> {
            if self.fail_actions {
                return Err(RemoteCommandError::ActionFailed(
                    "pump unreachable".to_string(),
                ));
            }
            self.actions.lock().unwrap().push(action);
            Ok(())
        }

        async fn report_error(
            &self,
            error: &RemoteCommandError,
            stage: CommandStage,
            _payload: &NotificationPayload,
        ) {
            self.errors.lock().unwrap().push((error.to_string(), stage));
        }
    }

    fn source_with(delegate: Arc<RecordingDelegate>) -> RemoteCommandSource {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_timestamp(NOW));
        let store = Arc::new(MemorySecretStore::with_secret(TEST_SECRET, "Test Key"));
        let otp_manager = Arc::new(OtpManager::new(store, clock.clone(), OtpConfig::default()));
        RemoteCommandSource::new(otp_manager, clock, delegate)
    }

    fn payload(value: Value) -> NotificationPayload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[tokio::test]
    async fn valid_bolus_is_dispatched_once() {
        let delegate = Arc::new(RecordingDelegate::default());
        let source = source_with(delegate.clone());
        let bolus = payload(json!({
            "bolus-entry": 1.5,
            "otp": "086432",
            "expiration": "2022-12-02T17:30:00Z"
        }));

        let action = source.remote_notification_was_received(&bolus).await.unwrap();
        assert_eq!(action.description(), "Bolus Entry 1.5 U");
        assert_eq!(delegate.actions.lock().unwrap().len(), 1);

        // Replay of the same payload.
        let err = source
            .remote_notification_was_received(&bolus)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteCommandError::Otp(OtpValidationError::PreviouslyUsed)
        ));
        assert_eq!(delegate.actions.lock().unwrap().len(), 1);
        assert_eq!(
            delegate.errors.lock().unwrap().as_slice(),
            &[(err.to_string(), CommandStage::Parsed)]
        );
    }

    #[tokio::test]
    async fn expired_notification_is_rejected_before_otp() {
        let delegate = Arc::new(RecordingDelegate::default());
        let source = source_with(delegate.clone());

        let err = source
            .remote_notification_was_received(&payload(json!({
                "carbs-entry": 20,
                "otp": "881201",
                "expiration": "2022-12-02T17:00:00Z"
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteCommandError::ExpiredNotification));

        // The OTP was never consumed, so a fresh command with it still passes.
        let action = source
            .remote_notification_was_received(&payload(json!({
                "carbs-entry": 20,
                "otp": "881201"
            })))
            .await
            .unwrap();
        assert!(matches!(action, RemoteAction::CarbsEntry(_)));
    }

    #[tokio::test]
    async fn missing_otp_is_rejected_for_dosing_commands() {
        let delegate = Arc::new(RecordingDelegate::default());
        let source = source_with(delegate.clone());

        let err = source
            .remote_notification_was_received(&payload(json!({ "carbs-entry": 20 })))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteCommandError::MissingOtp));
        assert!(delegate.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn override_needs_no_otp() {
        let delegate = Arc::new(RecordingDelegate::default());
        let source = source_with(delegate.clone());

        let action = source
            .remote_notification_was_received(&payload(json!({
                "override-name": "Pre-Meal",
                "remote-address": "abc"
            })))
            .await
            .unwrap();
        assert_eq!(action.description(), "Override Pre-Meal");
    }

    #[tokio::test]
    async fn unhandled_payload_is_reported_at_received() {
        let delegate = Arc::new(RecordingDelegate::default());
        let source = source_with(delegate.clone());

        let err = source
            .remote_notification_was_received(&payload(json!({ "hello": "world" })))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteCommandError::UnhandledNotification));
        assert_eq!(
            delegate.errors.lock().unwrap()[0].1,
            CommandStage::Received
        );
    }

    #[tokio::test]
    async fn delegate_failure_is_reported_after_validation() {
        let delegate = Arc::new(RecordingDelegate {
            fail_actions: true,
            ..RecordingDelegate::default()
        });
        let source = source_with(delegate.clone());

        let err = source
            .remote_notification_was_received(&payload(json!({
                "cancel-temporary-override": "true"
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteCommandError::ActionFailed(_)));
        assert_eq!(
            delegate.errors.lock().unwrap()[0].1,
            CommandStage::Validated
        );
    }

    #[test]
    fn command_from_push_notification_does_not_validate() {
        let source = source_with(Arc::new(RecordingDelegate::default()));
        let command = source
            .command_from_push_notification(&payload(json!({
                "bolus-entry": 2,
                "otp": "000000"
            })))
            .unwrap();
        assert!(matches!(command.action(), RemoteAction::BolusEntry(_)));
        assert!(command.validate().is_err());
    }
}
