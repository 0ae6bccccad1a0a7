//! Wire models for the Nightscout REST API and the local records they come from.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Treatment `eventType` values this service writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatmentEventType {
    #[serde(rename = "Meal Bolus")]
    MealBolus,
    #[serde(rename = "Correction Bolus")]
    CorrectionBolus,
    #[serde(rename = "Temp Basal")]
    TempBasal,
    #[serde(rename = "Suspend Pump")]
    SuspendPump,
    #[serde(rename = "Resume Pump")]
    ResumePump,
}

/// A Nightscout treatment document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Treatment {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub event_type: TreatmentEventType,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    pub entered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absorption_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub programmed: Option<f64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub bolus_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<String>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Treatment {
    fn new(
        event_type: TreatmentEventType,
        created_at: DateTime<Utc>,
        entered_by: &str,
        sync_identifier: Option<String>,
    ) -> Self {
        Self {
            object_id: None,
            event_type,
            created_at,
            entered_by: entered_by.to_string(),
            sync_identifier,
            carbs: None,
            absorption_time: None,
            food_type: None,
            insulin: None,
            programmed: None,
            bolus_type: None,
            rate: None,
            absolute: None,
            temp: None,
            duration: None,
        }
    }
}

fn minutes(duration: Duration) -> f64 {
    duration.as_secs_f64() / 60.0
}

/// A carb entry as exported by the local carb store.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCarbObject {
    pub sync_identifier: Option<String>,
    pub uuid: Option<Uuid>,
    pub start_date: DateTime<Utc>,
    pub grams: f64,
    pub absorption_time: Option<Duration>,
    pub food_type: Option<String>,
}

impl SyncCarbObject {
    /// Key used for the remote record and the object id cache.
    pub fn nightscout_identifier(&self) -> Option<String> {
        self.sync_identifier
            .clone()
            .or_else(|| self.uuid.map(|uuid| uuid.to_string()))
    }

    /// `None` when the record has no identifier to reconcile by.
    pub fn treatment(&self, entered_by: &str, object_id: Option<String>) -> Option<Treatment> {
        let identifier = self.nightscout_identifier()?;
        let mut treatment = Treatment::new(
            TreatmentEventType::MealBolus,
            self.start_date,
            entered_by,
            Some(identifier),
        );
        treatment.object_id = object_id;
        treatment.carbs = Some(self.grams.round());
        treatment.absorption_time = self.absorption_time.map(minutes);
        treatment.food_type = self.food_type.clone();
        Some(treatment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseType {
    Basal,
    Bolus,
    Resume,
    Suspend,
    TempBasal,
}

/// An insulin delivery record from the local dose store.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseEntry {
    pub dose_type: DoseType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub programmed_units: f64,
    pub delivered_units: Option<f64>,
    pub units_per_hour: f64,
    pub sync_identifier: Option<String>,
}

impl DoseEntry {
    fn duration(&self) -> Duration {
        (self.end_date - self.start_date)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Scheduled basal is implied by the profile and never uploaded.
    pub fn treatment(&self, entered_by: &str) -> Option<Treatment> {
        let sync_identifier = self.sync_identifier.clone();
        let treatment = match self.dose_type {
            DoseType::Basal => return None,
            DoseType::Bolus => {
                let mut treatment = Treatment::new(
                    TreatmentEventType::CorrectionBolus,
                    self.start_date,
                    entered_by,
                    sync_identifier,
                );
                let duration = self.duration();
                treatment.insulin = Some(self.delivered_units.unwrap_or(self.programmed_units));
                treatment.programmed = Some(self.programmed_units);
                treatment.duration = Some(minutes(duration));
                treatment.bolus_type = Some(if duration > Duration::ZERO {
                    "square".to_string()
                } else {
                    "normal".to_string()
                });
                treatment
            }
            DoseType::TempBasal => {
                let mut treatment = Treatment::new(
                    TreatmentEventType::TempBasal,
                    self.start_date,
                    entered_by,
                    sync_identifier,
                );
                treatment.rate = Some(self.units_per_hour);
                treatment.absolute = Some(self.units_per_hour);
                treatment.temp = Some("absolute".to_string());
                treatment.duration = Some(minutes(self.duration()));
                treatment.insulin = self.delivered_units;
                treatment
            }
            DoseType::Suspend => Treatment::new(
                TreatmentEventType::SuspendPump,
                self.start_date,
                entered_by,
                sync_identifier,
            ),
            DoseType::Resume => Treatment::new(
                TreatmentEventType::ResumePump,
                self.start_date,
                entered_by,
                sync_identifier,
            ),
        };
        Some(treatment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlucoseTrend {
    UpUpUp,
    UpUp,
    Up,
    Flat,
    Down,
    DownDown,
    DownDownDown,
}

impl GlucoseTrend {
    /// Nightscout numeric trend, 1 (rising fast) to 7 (falling fast).
    pub fn ordinal(&self) -> u8 {
        match self {
            GlucoseTrend::UpUpUp => 1,
            GlucoseTrend::UpUp => 2,
            GlucoseTrend::Up => 3,
            GlucoseTrend::Flat => 4,
            GlucoseTrend::Down => 5,
            GlucoseTrend::DownDown => 6,
            GlucoseTrend::DownDownDown => 7,
        }
    }

    pub fn direction(&self) -> &'static str {
        match self {
            GlucoseTrend::UpUpUp => "DoubleUp",
            GlucoseTrend::UpUp => "SingleUp",
            GlucoseTrend::Up => "FortyFiveUp",
            GlucoseTrend::Flat => "Flat",
            GlucoseTrend::Down => "FortyFiveDown",
            GlucoseTrend::DownDown => "SingleDown",
            GlucoseTrend::DownDownDown => "DoubleDown",
        }
    }
}

/// A glucose reading from the local glucose store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredGlucoseSample {
    pub sync_identifier: Option<String>,
    pub start_date: DateTime<Utc>,
    pub quantity_mg_dl: f64,
    pub trend: Option<GlucoseTrend>,
    pub was_user_entered: bool,
    pub device: Option<String>,
}

impl StoredGlucoseSample {
    pub fn glucose_entry(&self, default_device: &str) -> GlucoseEntry {
        let value = self.quantity_mg_dl.round();
        let (entry_type, sgv, mbg) = if self.was_user_entered {
            ("mbg", None, Some(value))
        } else {
            ("sgv", Some(value), None)
        };

        GlucoseEntry {
            entry_type: entry_type.to_string(),
            sgv,
            mbg,
            date: self.start_date.timestamp_millis(),
            date_string: self.start_date.to_rfc3339_opts(SecondsFormat::Millis, true),
            device: self
                .device
                .clone()
                .unwrap_or_else(|| default_device.to_string()),
            direction: self.trend.map(|trend| trend.direction().to_string()),
            trend: self.trend.map(|trend| trend.ordinal()),
            identifier: self.sync_identifier.clone(),
        }
    }
}

/// A Nightscout `entries` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sgv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbg: Option<f64>,
    /// Milliseconds since the epoch.
    pub date: i64,
    pub date_string: String,
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

/// A `devicestatus` document. Loop and pump sections are passed through as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl DeviceStatus {
    /// Only the phone's own report, with nothing from the pump or the loop.
    pub fn is_uploader_only(&self) -> bool {
        self.sections.contains_key("uploader")
            && !self.sections.contains_key("pump")
            && !self.sections.contains_key("loop")
    }
}

/// A `profile` document holding one or more named therapy profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSet {
    pub start_date: DateTime<Utc>,
    pub default_profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    pub entered_by: String,
    pub store: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_settings: Option<Value>,
}

impl ProfileSet {
    /// Profiles without a default entry in `store` are not worth uploading.
    pub fn is_complete(&self) -> bool {
        self.store.contains_key(&self.default_profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn carb_identifier_falls_back_to_uuid() {
        let uuid = Uuid::new_v4();
        let carb = SyncCarbObject {
            sync_identifier: None,
            uuid: Some(uuid),
            start_date: at(1_700_000_000),
            grams: 29.6,
            absorption_time: Some(Duration::from_secs(3 * 3600)),
            food_type: Some("🍕".to_string()),
        };
        assert_eq!(carb.nightscout_identifier(), Some(uuid.to_string()));

        let treatment = carb.treatment("loop://Test", None).unwrap();
        let value = serde_json::to_value(&treatment).unwrap();
        assert_eq!(value["eventType"], "Meal Bolus");
        assert_eq!(value["carbs"], 30.0);
        assert_eq!(value["absorptionTime"], 180.0);
        assert_eq!(value["enteredBy"], "loop://Test");
        assert_eq!(value["syncIdentifier"], uuid.to_string());
        assert!(value.get("_id").is_none());
        assert!(value.get("insulin").is_none());
    }

    #[test]
    fn carb_without_identifier_has_no_treatment() {
        let carb = SyncCarbObject {
            sync_identifier: None,
            uuid: None,
            start_date: at(1_700_000_000),
            grams: 10.0,
            absorption_time: None,
            food_type: None,
        };
        assert!(carb.treatment("loop://Test", None).is_none());
    }

    #[test]
    fn dose_treatments() {
        let start = at(1_700_000_000);
        let dose = |dose_type, minutes: i64| DoseEntry {
            dose_type,
            start_date: start,
            end_date: start + chrono::Duration::minutes(minutes),
            programmed_units: 2.0,
            delivered_units: Some(1.8),
            units_per_hour: 1.2,
            sync_identifier: Some("dose".to_string()),
        };

        assert!(dose(DoseType::Basal, 30).treatment("loop://Test").is_none());

        let bolus = dose(DoseType::Bolus, 0).treatment("loop://Test").unwrap();
        assert_eq!(bolus.event_type, TreatmentEventType::CorrectionBolus);
        assert_eq!(bolus.insulin, Some(1.8));
        assert_eq!(bolus.bolus_type.as_deref(), Some("normal"));

        let extended = dose(DoseType::Bolus, 60).treatment("loop://Test").unwrap();
        assert_eq!(extended.bolus_type.as_deref(), Some("square"));

        let short = dose(DoseType::Bolus, 1).treatment("loop://Test").unwrap();
        assert_eq!(short.bolus_type.as_deref(), Some("square"));

        let temp = dose(DoseType::TempBasal, 30).treatment("loop://Test").unwrap();
        let value = serde_json::to_value(&temp).unwrap();
        assert_eq!(value["eventType"], "Temp Basal");
        assert_eq!(value["temp"], "absolute");
        assert_eq!(value["duration"], 30.0);

        let suspend = dose(DoseType::Suspend, 0).treatment("loop://Test").unwrap();
        assert_eq!(suspend.event_type, TreatmentEventType::SuspendPump);
    }

    #[test]
    fn glucose_entry_shape() {
        let sample = StoredGlucoseSample {
            sync_identifier: Some("g1".to_string()),
            start_date: at(1_700_000_000),
            quantity_mg_dl: 123.4,
            trend: Some(GlucoseTrend::DownDown),
            was_user_entered: false,
            device: None,
        };
        let value = serde_json::to_value(sample.glucose_entry("loop://Test")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "sgv",
                "sgv": 123.0,
                "date": 1_700_000_000_000i64,
                "dateString": "2023-11-14T22:13:20.000Z",
                "device": "loop://Test",
                "direction": "SingleDown",
                "trend": 6,
                "identifier": "g1"
            })
        );
    }

    #[test]
    fn device_status_flattens_sections() {
        let mut sections = Map::new();
        sections.insert("loop".to_string(), json!({ "iob": { "iob": 1.2 } }));
        let status = DeviceStatus {
            device: "loop://Test".to_string(),
            created_at: at(1_700_000_000),
            sections,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["loop"]["iob"]["iob"], 1.2);
        assert_eq!(value["device"], "loop://Test");
    }

    #[test]
    fn uploader_only_device_status() {
        let status = |keys: &[&str]| DeviceStatus {
            device: "loop://Test".to_string(),
            created_at: at(1_700_000_000),
            sections: keys
                .iter()
                .map(|key| (key.to_string(), json!({})))
                .collect(),
        };

        assert!(status(&["uploader"]).is_uploader_only());
        assert!(!status(&["uploader", "loop"]).is_uploader_only());
        assert!(!status(&["uploader", "pump"]).is_uploader_only());
        assert!(!status(&["loop"]).is_uploader_only());
        assert!(!status(&[]).is_uploader_only());
    }

    #[test]
    fn profile_set_completeness() {
        let mut store = Map::new();
        store.insert("Default".to_string(), json!({ "dia": 6 }));
        let mut profile = ProfileSet {
            start_date: at(1_700_000_000),
            default_profile: "Default".to_string(),
            units: Some("mg/dL".to_string()),
            entered_by: "loop://Test".to_string(),
            store,
            loop_settings: None,
        };
        assert!(profile.is_complete());
        profile.default_profile = "Missing".to_string();
        assert!(!profile.is_complete());
    }
}
