//! Typed actions produced from remote notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A remote request the host application should carry out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteAction {
    TemporaryScheduleOverride(OverrideAction),
    CancelTemporaryOverride(OverrideCancelAction),
    BolusEntry(BolusAction),
    CarbsEntry(CarbAction),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideAction {
    pub name: String,
    /// `None` runs the override indefinitely.
    pub duration: Option<Duration>,
    pub remote_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideCancelAction {
    pub remote_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BolusAction {
    pub amount_in_units: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbAction {
    pub amount_in_grams: f64,
    pub absorption_time: Option<Duration>,
    pub food_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
}

impl RemoteAction {
    pub fn action_name(&self) -> &'static str {
        match self {
            RemoteAction::CarbsEntry(_) => "Carb Entry",
            RemoteAction::BolusEntry(_) => "Bolus Entry",
            RemoteAction::CancelTemporaryOverride(_) => "Cancel Override",
            RemoteAction::TemporaryScheduleOverride(_) => "Override",
        }
    }

    /// Short human-readable summary, e.g. `Carb Entry 30 g`.
    pub fn description(&self) -> String {
        let parameters = match self {
            RemoteAction::CarbsEntry(carbs) => format!("{} g", carbs.amount_in_grams),
            RemoteAction::BolusEntry(bolus) => format!("{} U", bolus.amount_in_units),
            RemoteAction::CancelTemporaryOverride(_) => String::new(),
            RemoteAction::TemporaryScheduleOverride(over) => over.name.clone(),
        };

        if parameters.is_empty() {
            self.action_name().to_string()
        } else {
            format!("{} {}", self.action_name(), parameters)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions() {
        let carbs = RemoteAction::CarbsEntry(CarbAction {
            amount_in_grams: 30.0,
            absorption_time: None,
            food_type: None,
            start_date: None,
        });
        assert_eq!(carbs.description(), "Carb Entry 30 g");

        let bolus = RemoteAction::BolusEntry(BolusAction {
            amount_in_units: 1.5,
        });
        assert_eq!(bolus.description(), "Bolus Entry 1.5 U");

        let cancel = RemoteAction::CancelTemporaryOverride(OverrideCancelAction {
            remote_address: None,
        });
        assert_eq!(cancel.description(), "Cancel Override");

        let over = RemoteAction::TemporaryScheduleOverride(OverrideAction {
            name: "Running".to_string(),
            duration: Some(Duration::from_secs(3600)),
            remote_address: None,
        });
        assert_eq!(over.description(), "Override Running");
    }
}
