//! Architect Planner adapter: parses the architect's raw response into a
//! canonical [`Plan`], classifying its shape and repairing common noise
//! (spec.md §4.1 step 3, §9 "Variant plan output parsing").

use once_cell_replacement::Lazy;
use regex::Regex;

use crate::types::{Plan, PlanResponseFormat};

/// Regex every synthesized/accepted verification step must match
/// (spec.md §4.1 step 3f).
pub fn verification_regex() -> &'static Regex {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)unit tests|unit/integration tests|manual browser check|manual api check").unwrap()
    });
    &RE
}

/// Parse a raw architect response into `(Plan, format, raw_output)`.
///
/// Tries the `PLAN:/TARGETS:/RISK:/VERIFY:` DSL first, then a JSON object
/// with the same four fields, and falls back to treating the whole response
/// as unstructured prose (warned via `architect_output_unstructured_plaintext`).
pub fn parse_plan_response(raw: &str) -> Plan {
    if let Some(plan) = parse_dsl(raw) {
        return plan;
    }
    if let Some(plan) = parse_json(raw) {
        return plan;
    }
    Plan {
        steps: vec![raw.trim().to_string()],
        target_files: Vec::new(),
        risk_assessment: String::new(),
        verification: Vec::new(),
        warnings: vec!["architect_output_unstructured_plaintext".to_string()],
    }
}

pub fn response_format_of(raw: &str) -> PlanResponseFormat {
    if parse_dsl(raw).is_some() {
        PlanResponseFormat::Dsl
    } else if parse_json(raw).is_some() {
        PlanResponseFormat::Json
    } else {
        PlanResponseFormat::Prose
    }
}

fn parse_dsl(raw: &str) -> Option<Plan> {
    let has_any = ["PLAN:", "TARGETS:", "RISK:", "VERIFY:"]
        .iter()
        .any(|tag| raw.contains(tag));
    if !has_any {
        return None;
    }

    let mut steps = Vec::new();
    let mut target_files = Vec::new();
    let mut risk_assessment = String::new();
    let mut verification = Vec::new();
    let mut warnings = Vec::new();

    let mut section: Option<&str> = None;
    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("PLAN:") {
            section = Some("PLAN");
            push_nonempty(&mut steps, rest);
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("TARGETS:") {
            section = Some("TARGETS");
            push_csv(&mut target_files, rest);
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("RISK:") {
            section = Some("RISK");
            risk_assessment = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("VERIFY:") {
            section = Some("VERIFY");
            push_nonempty(&mut verification, rest);
            continue;
        }
        match section {
            Some("PLAN") => push_nonempty(&mut steps, trimmed),
            Some("TARGETS") => push_csv(&mut target_files, trimmed),
            Some("VERIFY") => push_nonempty(&mut verification, trimmed),
            Some("RISK") if !trimmed.is_empty() => {
                risk_assessment.push(' ');
                risk_assessment.push_str(trimmed);
            }
            _ => {
                if !trimmed.is_empty() {
                    warnings.push("architect_output_repaired".to_string());
                }
            }
        }
    }

    // Dedup repeated sections (wrapper/duplicate-section noise).
    dedup_in_place(&mut steps);
    dedup_in_place(&mut target_files);
    dedup_in_place(&mut verification);

    if steps.is_empty() || target_files.is_empty() {
        return None;
    }

    Some(Plan { steps, target_files, risk_assessment, verification, warnings })
}

fn parse_json(raw: &str) -> Option<Plan> {
    let trimmed = raw.trim();
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let steps = value.get("steps")?.as_array()?.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>();
    let target_files = value
        .get("target_files")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect::<Vec<_>>();
    if steps.is_empty() || target_files.is_empty() {
        return None;
    }
    let risk_assessment = value.get("risk_assessment").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let verification = value
        .get("verification")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    Some(Plan {
        steps,
        target_files,
        risk_assessment,
        verification,
        warnings: vec!["architect_output_used_json_fallback".to_string()],
    })
}

fn push_nonempty(out: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim().trim_start_matches('-').trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn push_csv(out: &mut Vec<String>, raw: &str) {
    for part in raw.split(',') {
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
}

fn dedup_in_place(items: &mut Vec<String>) {
    let mut seen = std::collections::BTreeSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// Synthesize concrete verification steps from target paths when a plan's
/// verification is empty or generic (spec.md §4.1 step 3f).
pub fn synthesize_verification(target_files: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for path in target_files {
        if path.ends_with(".html") || path.contains("public/") {
            out.push(format!(
                "Manual browser check: open http://localhost:3000 and verify changes to {path}"
            ));
        } else if path.contains("server") || path.contains("src/") {
            out.push(format!("Run unit/integration tests for {path}"));
        } else {
            out.push(format!("Run unit tests covering {path}"));
        }
    }
    if out.is_empty() {
        out.push("Run unit tests for the affected module".to_string());
    }
    out
}

/// True if `verification` is empty or only contains the generic phrase.
pub fn verification_is_degenerate(verification: &[String]) -> bool {
    verification.is_empty() || verification.iter().all(|v| v.trim().eq_ignore_ascii_case("verify changes"))
}

/// Minimal `Lazy` shim so this module doesn't need an extra workspace
/// dependency purely for one regex memoization site.
mod once_cell_replacement {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self { cell: OnceLock::new(), init }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}
