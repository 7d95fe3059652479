// src/services/report.rs
use crate::errors::VigilError;
use crate::models::*;
use crate::services::prompt_builder::REPORT_SECTIONS;
use serde_json::{Map, Value, json};

const FALLBACK_PPE_RATE: u8 = 50;
const PROXIMITY_REGULATION: &str = "OSHA 29 CFR 1910.212";

/// Turns the model's raw text into an [`AnalysisResult`].
///
/// Detection counts from `input` always replace the counts the model claims.
pub fn normalize(raw: &str, input: &DetectionInput) -> Result<AnalysisResult, VigilError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| VigilError::MalformedResponse(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(VigilError::MalformedResponse(
            "analysis is not a JSON object".to_string(),
        ));
    };

    for key in ARRAY_FIELDS {
        if !fields.get(key).is_some_and(Value::is_array) {
            fields.insert(key.to_string(), Value::Array(Vec::new()));
        }
    }
    if let Some(Value::Array(items)) = fields.get_mut("violations") {
        items.retain(|item| !item.is_null());
        for item in items.iter_mut() {
            *item = normalize_violation(item.take());
        }
    }
    for key in TEXT_FIELDS {
        coerce_text(&mut fields, key);
    }

    let risk_score = fields.get("risk_score").and_then(percentage).unwrap_or(0);
    let risk_level = fields
        .get("risk_level")
        .and_then(Value::as_str)
        .and_then(RiskLevel::parse)
        .unwrap_or_else(|| RiskLevel::for_score(risk_score));
    let ppe_compliance_rate = fields
        .get("ppe_compliance_rate")
        .and_then(percentage)
        .unwrap_or(0);

    for key in [
        "risk_score",
        "risk_level",
        "ppe_compliance_rate",
        "workers_count",
        "machinery_count",
        "fallback",
    ] {
        fields.remove(key);
    }

    let mut result: AnalysisResult = serde_json::from_value(Value::Object(fields))
        .map_err(|e| VigilError::MalformedResponse(e.to_string()))?;
    result.risk_score = risk_score;
    result.risk_level = risk_level;
    result.ppe_compliance_rate = ppe_compliance_rate;
    result.workers_count = input.persons.len();
    result.machinery_count = input.machines.len();
    result.fallback = false;
    Ok(result)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Integer percentage from a number or numeric string, clamped to 0..=100.
fn percentage(value: &Value) -> Option<u8> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() {
        return None;
    }
    Some(number.round().clamp(0.0, 100.0) as u8)
}

fn coerce_text(fields: &mut Map<String, Value>, key: &str) {
    match fields.get(key) {
        Some(Value::String(_)) => {}
        Some(Value::Null) | None => {
            fields.remove(key);
        }
        Some(other) => {
            let text = other.to_string();
            fields.insert(key.to_string(), Value::String(text));
        }
    }
}

fn normalize_violation(item: Value) -> Value {
    match item {
        Value::Object(mut fields) => {
            for key in [
                "type",
                "severity",
                "description",
                "description_ar",
                "recommendation",
                "recommendation_ar",
                "regulation",
            ] {
                coerce_text(&mut fields, key);
            }
            if let Some(Value::String(severity)) = fields.get_mut("severity") {
                *severity = severity.trim().to_ascii_uppercase();
            }
            Value::Object(fields)
        }
        Value::String(description) => json!({ "description": description }),
        other => json!({ "description": other.to_string() }),
    }
}

fn level_ar(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "منخفض",
        RiskLevel::Medium => "متوسط",
        RiskLevel::High => "مرتفع",
        RiskLevel::Critical => "حرج",
    }
}

fn level_en(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "LOW",
        RiskLevel::Medium => "MEDIUM",
        RiskLevel::High => "HIGH",
        RiskLevel::Critical => "CRITICAL",
    }
}

pub fn fallback_risk_score(dangerous_hazards: usize) -> u8 {
    20usize
        .saturating_add(dangerous_hazards.saturating_mul(15))
        .min(100) as u8
}

fn proximity_violation(hazard: &Hazard) -> Violation {
    let class = &hazard.machine_class;
    let (mut description, mut description_ar) = match hazard.threshold {
        Some(threshold) => (
            format!("Worker detected within {} m of a {}.", threshold, class),
            format!("تم رصد عامل على مسافة أقل من {} متر من {}.", threshold, class),
        ),
        None => (
            format!("Worker detected inside the danger zone of a {}.", class),
            format!("تم رصد عامل داخل منطقة الخطر الخاصة بـ {}.", class),
        ),
    };
    if let Some(distance) = hazard.distance {
        description.push_str(&format!(" Measured distance: {:.1} m.", distance));
        description_ar.push_str(&format!(" المسافة المقاسة: {:.1} متر.", distance));
    }

    Violation {
        kind: "PROXIMITY_HAZARD".to_string(),
        severity: "HIGH".to_string(),
        description,
        description_ar,
        recommendation:
            "Enforce an exclusion zone around operating machinery and stop work until the worker is clear."
                .to_string(),
        recommendation_ar:
            "فرض منطقة عزل آمنة حول الآلات العاملة وإيقاف العمل حتى يبتعد العامل عن منطقة الخطر."
                .to_string(),
        regulation: PROXIMITY_REGULATION.to_string(),
    }
}

fn fallback_report_ar(
    score: u8,
    level: RiskLevel,
    workers: usize,
    machines: usize,
    violations: usize,
) -> String {
    let violations_paragraph = if violations > 0 {
        format!(
            "تم رصد {} مخالفة تتعلق بالاقتراب من الآلات وتتطلب تدخلاً فورياً.",
            violations
        )
    } else {
        "لم يتم رصد مخالفات تتعلق بالاقتراب من الآلات.".to_string()
    };

    let paragraphs = [
        format!(
            "تم إنشاء هذا التقرير تلقائياً دون تحليل الذكاء الاصطناعي. درجة المخاطر المقدرة {}/100 ومستوى الخطر {}.",
            score,
            level_ar(level)
        ),
        format!(
            "رصد نظام الرؤية الحاسوبية {} عامل و{} آلة في موقع العمل.",
            workers, machines
        ),
        format!(
            "لم يتم إجراء تحليل تفصيلي لمعدات الوقاية الشخصية لعدد {} عامل. يجب التحقق يدوياً من ارتداء الخوذات والسترات العاكسة والأحذية الواقية.",
            workers
        ),
        format!(
            "تم رصد {} آلة. يجب التأكد من وجود حواجز ومناطق عزل حول كل آلة قيد التشغيل.",
            machines
        ),
        violations_paragraph,
        "مراجعة الموقع ميدانياً من قبل مسؤول السلامة، وإعادة التحليل عند توفر خدمة الذكاء الاصطناعي."
            .to_string(),
    ];

    REPORT_SECTIONS
        .iter()
        .zip(paragraphs.iter())
        .enumerate()
        .map(|(i, (title, paragraph))| format!("{}. {}\n{}", i + 1, title, paragraph))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds a complete report from detection counts and hazard flags alone.
pub fn synthesize_fallback(input: &DetectionInput) -> AnalysisResult {
    let hazards = input.hazard_views();
    let dangers: Vec<&Hazard> = hazards.iter().filter(|h| h.is_danger).collect();

    let workers = input.persons.len();
    let machines = input.machines.len();
    let risk_score = fallback_risk_score(dangers.len());
    let risk_level = RiskLevel::for_score(risk_score);
    let violations: Vec<Violation> = dangers.iter().map(|h| proximity_violation(h)).collect();

    let immediate_actions_ar = dangers
        .iter()
        .map(|h| {
            json!({
                "action": format!("إبعاد العمال فوراً عن منطقة الخطر حول {}", h.machine_class),
                "priority": "IMMEDIATE"
            })
        })
        .collect();

    let positive_observations_ar = if dangers.is_empty() {
        vec![json!("لم يتم رصد عمال داخل مناطق الخطر المحيطة بالآلات.")]
    } else {
        Vec::new()
    };

    let worker_analysis = (1..=workers)
        .map(|worker_id| {
            json!({
                "worker_id": worker_id,
                "ppe_status_ar": "غير محدد",
                "notes_ar": "لم يتم إجراء تحليل فردي في التقرير الاحتياطي."
            })
        })
        .collect();

    AnalysisResult {
        risk_score,
        risk_level,
        executive_summary: format!(
            "Automated fallback report: {} worker(s), {} machine(s), {} proximity violation(s). Risk score {}/100 ({}).",
            workers,
            machines,
            violations.len(),
            risk_score,
            level_en(risk_level)
        ),
        executive_summary_ar: format!(
            "تقرير احتياطي آلي: {} عامل، {} آلة، {} مخالفة اقتراب. درجة المخاطر {}/100 ({}).",
            workers,
            machines,
            violations.len(),
            risk_score,
            level_ar(risk_level)
        ),
        ppe_compliance_rate: FALLBACK_PPE_RATE,
        workers_count: workers,
        machinery_count: machines,
        worker_analysis,
        positive_observations_ar,
        immediate_actions_ar,
        environmental_hazards_ar: Vec::new(),
        safety_recommendations_ar: vec![
            json!("تحديد مناطق عزل واضحة حول الآلات والمركبات العاملة."),
            json!("التحقق من ارتداء جميع العمال لمعدات الوقاية الشخصية."),
            json!("تدريب المشغلين والعمال على قواعد المسافة الآمنة."),
        ],
        gemini_detections: Vec::new(),
        detailed_report_ar: fallback_report_ar(
            risk_score,
            risk_level,
            workers,
            machines,
            violations.len(),
        ),
        overall_assessment_ar: format!(
            "مستوى الخطر العام {} بناءً على {} مخالفة مرصودة.",
            level_ar(risk_level),
            violations.len()
        ),
        scene_description_ar: format!(
            "موقع عمل يضم {} عامل و{} آلة و{} أداة.",
            workers,
            machines,
            input.tools.len()
        ),
        violations,
        fallback: true,
        extra: Map::new(),
    }
}
