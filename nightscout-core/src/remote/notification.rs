//! Push notification payload shapes and their decoding.

use crate::clock::Clock;
use crate::otp::OtpManager;
use crate::remote::action::{
    BolusAction, CarbAction, OverrideAction, OverrideCancelAction, RemoteAction,
};
use crate::remote::command::RemoteCommand;
use crate::remote::validators::{ExpirationValidator, OtpValidator, RemoteCommandValidator};
use crate::remote::RemoteCommandError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Flat key/value map delivered by the push transport.
pub type NotificationPayload = Map<String, Value>;

pub const CARBS_ENTRY_KEY: &str = "carbs-entry";
pub const BOLUS_ENTRY_KEY: &str = "bolus-entry";
pub const CANCEL_OVERRIDE_KEY: &str = "cancel-temporary-override";
pub const OVERRIDE_NAME_KEY: &str = "override-name";
pub const VERSION_KEY: &str = "version";

/// Highest notification format version (exclusive) handled here.
const SUPPORTED_VERSION_CEILING: f64 = 2.0;

#[derive(Debug, Clone, Deserialize)]
pub struct CarbRemoteNotification {
    #[serde(rename = "carbs-entry", deserialize_with = "de_number")]
    pub amount: f64,
    #[serde(rename = "absorption-time", default, deserialize_with = "de_opt_number")]
    pub absorption_in_hours: Option<f64>,
    #[serde(rename = "food-type", default)]
    pub food_type: Option<String>,
    #[serde(rename = "start-time", default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(rename = "remote-address", default)]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(rename = "sent-at", default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub otp: Option<String>,
    #[serde(rename = "entered-by", default)]
    pub entered_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BolusRemoteNotification {
    #[serde(rename = "bolus-entry", deserialize_with = "de_number")]
    pub amount: f64,
    #[serde(rename = "remote-address", default)]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(rename = "sent-at", default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub otp: Option<String>,
    #[serde(rename = "entered-by", default)]
    pub entered_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRemoteNotification {
    #[serde(rename = "override-name")]
    pub name: String,
    #[serde(
        rename = "override-duration-minutes",
        default,
        deserialize_with = "de_opt_number"
    )]
    pub duration_in_minutes: Option<f64>,
    #[serde(rename = "remote-address", default)]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(rename = "sent-at", default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "entered-by", default)]
    pub entered_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideCancelRemoteNotification {
    #[serde(rename = "remote-address", default)]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(rename = "sent-at", default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "entered-by", default)]
    pub entered_by: Option<String>,
}

/// One of the known notification shapes.
#[derive(Debug, Clone)]
pub enum RemoteNotification {
    Carbs(CarbRemoteNotification),
    Bolus(BolusRemoteNotification),
    CancelOverride(OverrideCancelRemoteNotification),
    Override(OverrideRemoteNotification),
}

impl RemoteNotification {
    /// Select and decode the notification shape by its identifying key.
    pub fn from_payload(payload: &NotificationPayload) -> Result<Self, RemoteCommandError> {
        check_version(payload)?;

        let value = Value::Object(payload.clone());
        let malformed = |e: serde_json::Error| RemoteCommandError::MalformedNotification(e.to_string());

        if payload.contains_key(CARBS_ENTRY_KEY) {
            serde_json::from_value(value)
                .map(RemoteNotification::Carbs)
                .map_err(malformed)
        } else if payload.contains_key(BOLUS_ENTRY_KEY) {
            serde_json::from_value(value)
                .map(RemoteNotification::Bolus)
                .map_err(malformed)
        } else if payload.contains_key(CANCEL_OVERRIDE_KEY) {
            serde_json::from_value(value)
                .map(RemoteNotification::CancelOverride)
                .map_err(malformed)
        } else if payload.contains_key(OVERRIDE_NAME_KEY) {
            serde_json::from_value(value)
                .map(RemoteNotification::Override)
                .map_err(malformed)
        } else {
            Err(RemoteCommandError::UnhandledNotification)
        }
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        match self {
            RemoteNotification::Carbs(n) => n.expiration,
            RemoteNotification::Bolus(n) => n.expiration,
            RemoteNotification::CancelOverride(n) => n.expiration,
            RemoteNotification::Override(n) => n.expiration,
        }
    }

    pub fn entered_by(&self) -> Option<&str> {
        match self {
            RemoteNotification::Carbs(n) => n.entered_by.as_deref(),
            RemoteNotification::Bolus(n) => n.entered_by.as_deref(),
            RemoteNotification::CancelOverride(n) => n.entered_by.as_deref(),
            RemoteNotification::Override(n) => n.entered_by.as_deref(),
        }
    }

    pub fn to_action(&self) -> Result<RemoteAction, RemoteCommandError> {
        match self {
            RemoteNotification::Carbs(n) => {
                ensure_amount(n.amount, CARBS_ENTRY_KEY)?;
                let absorption_time = n
                    .absorption_in_hours
                    .map(|hours| duration_from_secs(hours * 3600.0, "absorption-time"))
                    .transpose()?;
                Ok(RemoteAction::CarbsEntry(CarbAction {
                    amount_in_grams: n.amount,
                    absorption_time,
                    food_type: n.food_type.clone(),
                    start_date: n.start_date,
                }))
            }
            RemoteNotification::Bolus(n) => {
                ensure_amount(n.amount, BOLUS_ENTRY_KEY)?;
                Ok(RemoteAction::BolusEntry(BolusAction {
                    amount_in_units: n.amount,
                }))
            }
            RemoteNotification::CancelOverride(n) => {
                Ok(RemoteAction::CancelTemporaryOverride(OverrideCancelAction {
                    remote_address: n.remote_address.clone(),
                }))
            }
            RemoteNotification::Override(n) => {
                let duration = n
                    .duration_in_minutes
                    .map(|minutes| duration_from_secs(minutes * 60.0, "override-duration-minutes"))
                    .transpose()?;
                Ok(RemoteAction::TemporaryScheduleOverride(OverrideAction {
                    name: n.name.clone(),
                    duration,
                    remote_address: n.remote_address.clone(),
                }))
            }
        }
    }

    /// Attach the validators each shape requires.
    ///
    /// Dosing shapes (carbs, bolus) check expiration then OTP; override shapes
    /// check expiration only.
    pub fn into_command(
        self,
        otp_manager: &Arc<OtpManager>,
        clock: &Arc<dyn Clock>,
    ) -> Result<RemoteCommand, RemoteCommandError> {
        let action = self.to_action()?;
        let expiration: Box<dyn RemoteCommandValidator> =
            Box::new(ExpirationValidator::new(self.expiration(), clock.clone()));

        let validators = match self {
            RemoteNotification::Carbs(n) => vec![
                expiration,
                Box::new(OtpValidator::new(n.otp, n.sent_at, otp_manager.clone())) as Box<_>,
            ],
            RemoteNotification::Bolus(n) => vec![
                expiration,
                Box::new(OtpValidator::new(n.otp, n.sent_at, otp_manager.clone())) as Box<_>,
            ],
            RemoteNotification::CancelOverride(_) | RemoteNotification::Override(_) => {
                vec![expiration]
            }
        };

        Ok(RemoteCommand::new(
            Uuid::new_v4().to_string(),
            action,
            validators,
        ))
    }
}

fn check_version(payload: &NotificationPayload) -> Result<(), RemoteCommandError> {
    let version = match payload.get(VERSION_KEY) {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match version {
        Some(v) if v < SUPPORTED_VERSION_CEILING => Ok(()),
        _ => Err(RemoteCommandError::UnsupportedVersion(
            payload
                .get(VERSION_KEY)
                .map(|v| v.to_string())
                .unwrap_or_default(),
        )),
    }
}

fn ensure_amount(amount: f64, key: &str) -> Result<(), RemoteCommandError> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(())
    } else {
        Err(RemoteCommandError::MalformedNotification(format!(
            "{} must be a non-negative number",
            key
        )))
    }
}

fn duration_from_secs(secs: f64, key: &str) -> Result<Duration, RemoteCommandError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        RemoteCommandError::MalformedNotification(format!("{} is out of range", key))
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            NumberOrString::Number(n) => Ok(n),
            NumberOrString::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("expected a number, got '{}'", s))),
        }
    }
}

fn de_number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    NumberOrString::deserialize(d)?.into_f64()
}

fn de_opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Option::<NumberOrString>::deserialize(d)?
        .map(NumberOrString::into_f64)
        .transpose()
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> NotificationPayload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn decodes_carbs_entry() {
        let notification = RemoteNotification::from_payload(&payload(json!({
            "carbs-entry": 30,
            "absorption-time": 3.0,
            "food-type": "🍕",
            "start-time": "2022-12-02T17:20:15Z",
            "remote-address": "10.0.0.1",
            "expiration": "2022-12-02T17:25:15.123Z",
            "sent-at": "2022-12-02T17:20:15Z",
            "otp": "306469",
            "entered-by": "Loop Caregiver"
        })))
        .unwrap();

        let RemoteNotification::Carbs(carbs) = &notification else {
            panic!("expected carbs notification");
        };
        assert_eq!(carbs.otp.as_deref(), Some("306469"));
        assert_eq!(notification.entered_by(), Some("Loop Caregiver"));

        match notification.to_action().unwrap() {
            RemoteAction::CarbsEntry(action) => {
                assert_eq!(action.amount_in_grams, 30.0);
                assert_eq!(action.absorption_time, Some(Duration::from_secs(3 * 3600)));
                assert_eq!(action.food_type.as_deref(), Some("🍕"));
                assert_eq!(action.start_date.unwrap().timestamp(), 1_670_001_615);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn decodes_numeric_strings() {
        let notification = RemoteNotification::from_payload(&payload(json!({
            "bolus-entry": "1.25",
            "otp": 649742
        })))
        .unwrap();

        match notification.to_action().unwrap() {
            RemoteAction::BolusEntry(action) => assert_eq!(action.amount_in_units, 1.25),
            other => panic!("unexpected action {:?}", other),
        }
        let RemoteNotification::Bolus(bolus) = notification else {
            panic!("expected bolus notification");
        };
        assert_eq!(bolus.otp.as_deref(), Some("649742"));
    }

    #[test]
    fn decodes_override_and_cancel() {
        let over = RemoteNotification::from_payload(&payload(json!({
            "override-name": "Exercise",
            "override-duration-minutes": 90,
            "remote-address": "abc"
        })))
        .unwrap();
        assert_eq!(
            over.to_action().unwrap(),
            RemoteAction::TemporaryScheduleOverride(OverrideAction {
                name: "Exercise".to_string(),
                duration: Some(Duration::from_secs(90 * 60)),
                remote_address: Some("abc".to_string()),
            })
        );

        let cancel = RemoteNotification::from_payload(&payload(json!({
            "cancel-temporary-override": "true",
            "remote-address": "abc"
        })))
        .unwrap();
        assert!(matches!(
            cancel.to_action().unwrap(),
            RemoteAction::CancelTemporaryOverride(_)
        ));
    }

    #[test]
    fn unknown_shape_is_unhandled() {
        let err = RemoteNotification::from_payload(&payload(json!({
            "remote-address": "abc",
            "otp": "123456"
        })))
        .unwrap_err();
        assert!(matches!(err, RemoteCommandError::UnhandledNotification));
    }

    #[test]
    fn malformed_fields_are_rejected() {
        let err = RemoteNotification::from_payload(&payload(json!({
            "carbs-entry": "lots"
        })))
        .unwrap_err();
        assert!(matches!(err, RemoteCommandError::MalformedNotification(_)));

        let negative = RemoteNotification::from_payload(&payload(json!({
            "bolus-entry": -2.0
        })))
        .unwrap();
        assert!(matches!(
            negative.to_action(),
            Err(RemoteCommandError::MalformedNotification(_))
        ));
    }

    #[test]
    fn version_gate() {
        assert!(RemoteNotification::from_payload(&payload(json!({
            "version": "1.0",
            "bolus-entry": 1.0
        })))
        .is_ok());

        assert!(matches!(
            RemoteNotification::from_payload(&payload(json!({
                "version": "2.0",
                "bolus-entry": 1.0
            }))),
            Err(RemoteCommandError::UnsupportedVersion(_))
        ));

        assert!(matches!(
            RemoteNotification::from_payload(&payload(json!({
                "version": "beta",
                "bolus-entry": 1.0
            }))),
            Err(RemoteCommandError::UnsupportedVersion(_))
        ));
    }
}
