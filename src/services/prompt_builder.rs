// src/services/prompt_builder.rs
use crate::models::DetectionInput;

/// Section titles of `detailed_report_ar`, shared with the fallback report.
pub const REPORT_SECTIONS: [&str; 6] = [
    "الملخص التنفيذي",
    "وصف الموقع والمشهد",
    "تحليل العمال ومعدات الوقاية الشخصية",
    "تحليل الآلات والمعدات",
    "المخالفات والمخاطر المرصودة",
    "التوصيات والإجراءات التصحيحية",
];

const OUTPUT_SCHEMA: &str = r#"{
  "risk_score": <integer 0-100>,
  "risk_level": "LOW" | "MEDIUM" | "HIGH" | "CRITICAL",
  "executive_summary": "<English summary>",
  "executive_summary_ar": "<Arabic summary>",
  "ppe_compliance_rate": <integer 0-100>,
  "workers_count": <integer>,
  "machinery_count": <integer>,
  "violations": [
    {
      "type": "<short violation code>",
      "severity": "LOW" | "MEDIUM" | "HIGH" | "CRITICAL",
      "description": "<English>",
      "description_ar": "<Arabic>",
      "recommendation": "<English>",
      "recommendation_ar": "<Arabic>",
      "regulation": "<regulation reference, e.g. OSHA 29 CFR 1910.132>"
    }
  ],
  "worker_analysis": [
    { "worker_id": <integer>, "ppe_status_ar": "<Arabic>", "risk_level": "LOW" | "MEDIUM" | "HIGH" | "CRITICAL", "notes_ar": "<Arabic>" }
  ],
  "positive_observations_ar": ["<Arabic>"],
  "immediate_actions_ar": [
    { "action": "<Arabic>", "priority": "IMMEDIATE" | "HIGH" | "MEDIUM" | "LOW" }
  ],
  "environmental_hazards_ar": ["<Arabic>"],
  "safety_recommendations_ar": ["<Arabic>"],
  "gemini_detections": [],
  "detailed_report_ar": "<the six-section Arabic report as one string>",
  "overall_assessment_ar": "<Arabic>",
  "scene_description_ar": "<Arabic>"
}"#;

fn mode_framing(mode: &str) -> String {
    match mode {
        "quick" => "Analysis mode: quick. Keep every text field short and focus on the most severe risks.".to_string(),
        "detailed" => "Analysis mode: detailed. Cover every worker, machine and hazard exhaustively.".to_string(),
        other => format!(
            "Analysis mode: {}. Give a balanced, professional safety assessment.",
            other
        ),
    }
}

/// Renders the Gemini instruction for one detection payload.
///
/// Pure and deterministic: the same input always yields the same prompt.
pub fn build_prompt(input: &DetectionInput) -> String {
    // Map key order is stable, so the rendering is deterministic.
    let payload = serde_json::to_string_pretty(input).unwrap_or_else(|_| "{}".to_string());

    let sections = REPORT_SECTIONS
        .iter()
        .enumerate()
        .map(|(i, title)| format!("  {}. {}", i + 1, title))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a certified industrial safety inspector reviewing the output of a computer-vision system on a work site.
{framing}

RULES:
1. Use ONLY the detection JSON below. Do not invent workers, machines, tools or hazards that are not in it.
2. Counts: the payload contains {persons} person(s), {machines} machine(s), {tools} tool(s) and {hazards} hazard record(s).
3. "detailed_report_ar" must be a professional report written in Arabic with exactly these six sections, in this order:
{sections}
4. Reply with ONLY a single JSON object matching the schema below. No markdown, no code fences, no commentary.

DETECTION JSON:
{payload}

OUTPUT SCHEMA:
{schema}
"#,
        framing = mode_framing(&input.analysis_mode),
        persons = input.persons.len(),
        machines = input.machines.len(),
        tools = input.tools.len(),
        hazards = input.hazards.len(),
        sections = sections,
        payload = payload,
        schema = OUTPUT_SCHEMA,
    )
}
