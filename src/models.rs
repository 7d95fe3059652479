// src/models.rs
use crate::errors::VigilError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MISSING_DETECTION_MESSAGE: &str = "Missing structured detection data.";

/// Request body of `POST /api/v1/analyze`. Fields stay untyped until validated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub detection: Option<Value>,
    pub analysis_mode: Option<Value>,
}

/// Validated detection payload. Records are passed to the model verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionInput {
    pub persons: Vec<Value>,
    pub machines: Vec<Value>,
    pub tools: Vec<Value>,
    pub hazards: Vec<Value>,
    #[serde(skip)]
    pub analysis_mode: String,
}

impl TryFrom<AnalyzeRequest> for DetectionInput {
    type Error = VigilError;

    /// `detection` must be an object carrying all four keys, each an array.
    fn try_from(request: AnalyzeRequest) -> Result<Self, Self::Error> {
        let missing = || VigilError::Validation(MISSING_DETECTION_MESSAGE.to_string());
        let Some(Value::Object(mut detection)) = request.detection else {
            return Err(missing());
        };

        let mut take = |key: &str| match detection.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(missing()),
        };

        Ok(Self {
            persons: take("persons")?,
            machines: take("machines")?,
            tools: take("tools")?,
            hazards: take("hazards")?,
            analysis_mode: request
                .analysis_mode
                .as_ref()
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|mode| !mode.is_empty())
                .unwrap_or("standard")
                .to_string(),
        })
    }
}

impl DetectionInput {
    pub fn hazard_views(&self) -> Vec<Hazard> {
        self.hazards.iter().map(Hazard::from_value).collect()
    }
}

/// The parts of a hazard record the fallback report reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Hazard {
    pub machine_class: String,
    pub threshold: Option<f64>,
    pub distance: Option<f64>,
    pub is_danger: bool,
}

impl Hazard {
    pub fn from_value(value: &Value) -> Self {
        Self {
            machine_class: value["machineClass"]
                .as_str()
                .filter(|s| !s.is_empty())
                .unwrap_or("machine")
                .to_string(),
            threshold: value["threshold"].as_f64(),
            distance: value["distance"].as_f64(),
            is_danger: value["isDanger"].as_bool() == Some(true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            "CRITICAL" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    pub fn for_score(score: u8) -> Self {
        match score {
            80.. => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            40..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub description: String,
    pub description_ar: String,
    pub recommendation: String,
    pub recommendation_ar: String,
    pub regulation: String,
}

/// Canonical analysis record returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResult {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub executive_summary: String,
    pub executive_summary_ar: String,
    pub ppe_compliance_rate: u8,
    pub workers_count: usize,
    pub machinery_count: usize,
    pub violations: Vec<Violation>,
    pub worker_analysis: Vec<Value>,
    pub positive_observations_ar: Vec<Value>,
    pub immediate_actions_ar: Vec<Value>,
    pub environmental_hazards_ar: Vec<Value>,
    pub safety_recommendations_ar: Vec<Value>,
    pub gemini_detections: Vec<Value>,
    pub detailed_report_ar: String,
    pub overall_assessment_ar: String,
    pub scene_description_ar: String,
    pub fallback: bool,
    /// Additional keys the model returned, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields that must always serialize as arrays.
pub const ARRAY_FIELDS: [&str; 7] = [
    "violations",
    "worker_analysis",
    "positive_observations_ar",
    "immediate_actions_ar",
    "environmental_hazards_ar",
    "safety_recommendations_ar",
    "gemini_detections",
];

/// Free-text fields of [`AnalysisResult`].
pub const TEXT_FIELDS: [&str; 5] = [
    "executive_summary",
    "executive_summary_ar",
    "detailed_report_ar",
    "overall_assessment_ar",
    "scene_description_ar",
];

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub provider: &'static str,
    pub model: String,
    pub keys_configured: usize,
    pub port: u16,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> AnalyzeRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn accepts_empty_collections() {
        let input = DetectionInput::try_from(request(json!({
            "detection": {"persons": [], "machines": [], "tools": [], "hazards": []}
        })))
        .unwrap();
        assert!(input.persons.is_empty());
        assert_eq!(input.analysis_mode, "standard");
    }

    #[test]
    fn rejects_missing_hazards() {
        let err = DetectionInput::try_from(request(json!({
            "detection": {"persons": [{}], "machines": [], "tools": []}
        })))
        .unwrap_err();
        assert_eq!(err, VigilError::Validation(MISSING_DETECTION_MESSAGE.to_string()));
    }

    #[test]
    fn rejects_non_array_collection() {
        let err = DetectionInput::try_from(request(json!({
            "detection": {"persons": null, "machines": [], "tools": [], "hazards": []}
        })))
        .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));

        assert!(DetectionInput::try_from(request(json!({"analysisMode": "quick"}))).is_err());
    }

    #[test]
    fn detection_must_be_an_object_with_named_keys() {
        for detection in [json!([[], [], [], []]), json!("x"), json!(42), json!({})] {
            let err = DetectionInput::try_from(request(json!({ "detection": detection })))
                .unwrap_err();
            assert_eq!(err, VigilError::Validation(MISSING_DETECTION_MESSAGE.to_string()));
        }
    }

    #[test]
    fn non_string_mode_falls_back_to_standard() {
        let input = DetectionInput::try_from(request(json!({
            "detection": {"persons": [], "machines": [], "tools": [], "hazards": []},
            "analysisMode": 7
        })))
        .unwrap();
        assert_eq!(input.analysis_mode, "standard");

        let input = DetectionInput::try_from(request(json!({
            "detection": {"persons": [], "machines": [], "tools": [], "hazards": []},
            "analysisMode": " quick "
        })))
        .unwrap();
        assert_eq!(input.analysis_mode, "quick");
    }

    #[test]
    fn hazard_view_reads_camel_case_fields() {
        let hazard = Hazard::from_value(&json!({
            "machineClass": "forklift", "threshold": 2, "distance": 1.4, "isDanger": true
        }));
        assert_eq!(hazard.machine_class, "forklift");
        assert_eq!(hazard.threshold, Some(2.0));
        assert_eq!(hazard.distance, Some(1.4));
        assert!(hazard.is_danger);

        let hazard = Hazard::from_value(&json!({"isDanger": "yes"}));
        assert_eq!(hazard.machine_class, "machine");
        assert!(!hazard.is_danger);
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::for_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::for_score(39), RiskLevel::Low);
        assert_eq!(RiskLevel::for_score(40), RiskLevel::Medium);
        assert_eq!(RiskLevel::for_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::for_score(72), RiskLevel::High);
        assert_eq!(RiskLevel::for_score(80), RiskLevel::Critical);
        assert_eq!(RiskLevel::parse(" critical "), Some(RiskLevel::Critical));
        assert_eq!(RiskLevel::parse("SEVERE"), None);
    }

    #[test]
    fn fallback_flag_always_serialized() {
        let value = serde_json::to_value(AnalysisResult::default()).unwrap();
        assert_eq!(value["fallback"], json!(false));
        assert_eq!(value["risk_level"], json!("LOW"));
        assert_eq!(value["violations"], json!([]));
    }
}
