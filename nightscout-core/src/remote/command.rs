//! A typed action bundled with the validators that guard it.

use crate::remote::action::RemoteAction;
use crate::remote::validators::RemoteCommandValidator;
use crate::remote::RemoteCommandError;

/// Constructed per notification and discarded once dispatched or rejected.
pub struct RemoteCommand {
    id: String,
    action: RemoteAction,
    validators: Vec<Box<dyn RemoteCommandValidator>>,
}

impl RemoteCommand {
    pub fn new(
        id: String,
        action: RemoteAction,
        validators: Vec<Box<dyn RemoteCommandValidator>>,
    ) -> Self {
        Self {
            id,
            action,
            validators,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn action(&self) -> &RemoteAction {
        &self.action
    }

    pub fn into_action(self) -> RemoteAction {
        self.action
    }

    /// Run validators in order, stopping at the first failure.
    pub fn validate(&self) -> Result<(), RemoteCommandError> {
        self.validators
            .iter()
            .try_for_each(|validator| validator.validate())
    }
}

impl std::fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("validators", &self.validators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::action::BolusAction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl RemoteCommandValidator for Counting {
        fn validate(&self) -> Result<(), RemoteCommandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RemoteCommandError::ExpiredNotification)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn first_failure_stops_validation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let command = RemoteCommand::new(
            "id-1".to_string(),
            RemoteAction::BolusEntry(BolusAction {
                amount_in_units: 1.0,
            }),
            vec![
                Box::new(Counting {
                    calls: calls.clone(),
                    fail: true,
                }),
                Box::new(Counting {
                    calls: calls.clone(),
                    fail: false,
                }),
            ],
        );

        assert!(matches!(
            command.validate(),
            Err(RemoteCommandError::ExpiredNotification)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(command.id(), "id-1");
    }
}
