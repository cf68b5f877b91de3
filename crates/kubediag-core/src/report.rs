//! Report Synthesizer
//!
//! Turns the step results of a plan execution into a [`DiagnosisReport`].
//! The hypothesis selects a [`FailureSignature`] by keyword; the evidence of
//! succeeded steps is then searched for that signature's markers and for
//! every other signature's markers.
//!
//! Synthesis is a pure function of its inputs: no clock, no randomness, and
//! ordered collections only, so identical inputs serialize identically.

use crate::audit::truncate_chars;
use crate::error::{Error, Result};
use crate::executor::{StepResult, StepStatus};
use crate::invoker::output_text;
use crate::plan::ValidatedPlan;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Verdict on the initial hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    /// Evidence shows the expected failure signature
    Confirmed,
    /// Evidence shows a different failure and none of the expected one
    Refuted,
    /// Neither
    Inconclusive,
}

impl HypothesisStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Refuted => "refuted",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl std::fmt::Display for HypothesisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognizable failure mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSignature {
    /// Signature name
    pub name: String,
    /// Lowercase substrings that make a hypothesis select this signature
    pub hypothesis_keywords: Vec<String>,
    /// Case-insensitive regexes searched for in step outputs
    pub evidence_markers: Vec<String>,
    /// Remediation hints attached when the signature matches
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Describes a symptom with many causes; never refutes another signature
    #[serde(default)]
    pub symptom_only: bool,
}

fn signature(name: &str, keywords: &[&str], markers: &[&str], recommendations: &[&str]) -> FailureSignature {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
    FailureSignature {
        name: name.to_string(),
        hypothesis_keywords: owned(keywords),
        evidence_markers: owned(markers),
        recommendations: owned(recommendations),
        symptom_only: false,
    }
}

/// Built-in signatures, in selection priority order
#[must_use]
pub fn builtin_signatures() -> Vec<FailureSignature> {
    vec![
        signature(
            "oom_killed",
            &["oom", "out of memory", "memory limit"],
            &["OOMKilled"],
            &[
                "Raise the container memory limit or lower the workload's memory footprint",
                "Compare actual usage against requests and limits before changing them",
            ],
        ),
        signature(
            "image_pull",
            &["image pull", "imagepull", "image", "registry"],
            &["ErrImagePull", "ImagePullBackOff"],
            &[
                "Check the image name and tag",
                "Verify registry credentials (imagePullSecrets) and registry reachability",
            ],
        ),
        signature(
            "insufficient_resources",
            &["insufficient", "unschedulable", "scheduling", "capacity", "resources"],
            &["FailedScheduling", r"Insufficient (cpu|memory)"],
            &[
                "Lower resource requests or add node capacity",
                "Check node selectors, taints and tolerations",
            ],
        ),
        signature(
            "connection_failure",
            &["connection", "network", "dns", "unreachable", "timeout"],
            &["connection refused", "i/o timeout", "no such host"],
            &[
                "Verify the target service name, port and endpoints",
                "Check NetworkPolicies and DNS resolution from inside the pod",
            ],
        ),
        FailureSignature {
            symptom_only: true,
            ..signature(
                "crash_loop",
                &["crash", "restart"],
                &["CrashLoopBackOff", "Back-off restarting"],
                &[
                    "Read the previous container's logs for the exit reason",
                    "Check liveness probe thresholds and the container command",
                ],
            )
        },
        signature(
            "config_error",
            &["config", "secret", "environment variable"],
            &[
                "CreateContainerConfigError",
                r#"configmaps? "?[\w.-]+"? not found"#,
            ],
            &[
                "Create the missing ConfigMap or Secret, or fix the reference in the pod spec",
            ],
        ),
    ]
}

/// Synthesizer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Longest output excerpt quoted per step in the narrative
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Signatures appended after the built-ins
    #[serde(default)]
    pub extra_signatures: Vec<FailureSignature>,
}

fn default_max_output_chars() -> usize {
    500
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_output_chars: default_max_output_chars(),
            extra_signatures: Vec::new(),
        }
    }
}

/// Final diagnosis artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisReport {
    /// Problem statement
    pub problem_description: String,
    /// Hypothesis that was tested
    pub initial_hypothesis: String,
    /// Verdict
    pub hypothesis_status: HypothesisStatus,
    /// Signature the verdict rests on
    pub matched_signature: Option<String>,
    /// Step results in topological order
    pub evidence: Vec<StepResult>,
    /// Human-readable account of the run
    pub narrative: String,
    /// Remediation hints
    pub recommendations: Vec<String>,
}

/// Results of one executed plan together with the plan
#[derive(Debug, Clone)]
pub struct RoundEvidence {
    /// Plan that ran
    pub plan: ValidatedPlan,
    /// Its step results
    pub results: Vec<StepResult>,
}

#[derive(Debug)]
struct CompiledSignature {
    signature: FailureSignature,
    markers: Vec<Regex>,
}

impl CompiledSignature {
    fn compile(signature: FailureSignature) -> Result<Self> {
        let markers = signature
            .evidence_markers
            .iter()
            .map(|m| {
                RegexBuilder::new(m)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        Error::Configuration(format!(
                            "signature '{}': invalid marker '{}': {}",
                            signature.name, m, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { signature, markers })
    }

    fn selected_by(&self, hypothesis: &str) -> bool {
        self.signature
            .hypothesis_keywords
            .iter()
            .any(|k| hypothesis.contains(&k.to_lowercase()))
    }

    fn found_in(&self, evidence: &str) -> bool {
        self.markers.iter().any(|m| m.is_match(evidence))
    }
}

/// Builds diagnosis reports
#[derive(Debug)]
pub struct Synthesizer {
    signatures: Vec<CompiledSignature>,
    max_output_chars: usize,
}

impl Synthesizer {
    /// Compile the built-in signatures plus the configured extras
    pub fn new(config: &ReportConfig) -> Result<Self> {
        let signatures = builtin_signatures()
            .into_iter()
            .chain(config.extra_signatures.iter().cloned())
            .map(CompiledSignature::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            signatures,
            max_output_chars: config.max_output_chars,
        })
    }

    /// Signature names in priority order
    #[must_use]
    pub fn signature_names(&self) -> Vec<&str> {
        self.signatures
            .iter()
            .map(|s| s.signature.name.as_str())
            .collect()
    }

    /// Build the report for one plan execution
    #[must_use]
    pub fn synthesize(&self, plan: &ValidatedPlan, results: &[StepResult]) -> DiagnosisReport {
        let evidence = in_plan_order(plan, results);

        let problem = &plan.plan().problem_description;
        let hypothesis = &plan.plan().initial_hypothesis;
        let (status, matched) = self.classify(problem, hypothesis, &evidence);

        let mut narrative = self.header(problem, hypothesis, status, matched);
        for result in &evidence {
            self.write_step(&mut narrative, plan, result, result.round > 0);
        }

        DiagnosisReport {
            problem_description: problem.clone(),
            initial_hypothesis: hypothesis.clone(),
            hypothesis_status: status,
            matched_signature: matched.map(|s| s.signature.name.clone()),
            recommendations: matched
                .map(|s| s.signature.recommendations.clone())
                .unwrap_or_default(),
            evidence,
            narrative,
        }
    }

    /// Report for a session that ended without a verdict (planning failed or
    /// the replan ceiling was reached). Steps are labelled with their round.
    #[must_use]
    pub fn inconclusive(
        &self,
        problem: &str,
        hypothesis: &str,
        rounds: &[RoundEvidence],
        note: &str,
    ) -> DiagnosisReport {
        let mut narrative = self.header(problem, hypothesis, HypothesisStatus::Inconclusive, None);
        let mut evidence = Vec::new();
        for round in rounds {
            for result in in_plan_order(&round.plan, &round.results) {
                self.write_step(&mut narrative, &round.plan, &result, true);
                evidence.push(result);
            }
        }
        DiagnosisReport {
            problem_description: problem.to_string(),
            initial_hypothesis: hypothesis.to_string(),
            hypothesis_status: HypothesisStatus::Inconclusive,
            matched_signature: None,
            evidence,
            narrative,
            recommendations: Vec::new(),
        }
        .with_note(note)
    }

    fn classify<'s>(
        &'s self,
        problem: &str,
        hypothesis: &str,
        evidence: &[StepResult],
    ) -> (HypothesisStatus, Option<&'s CompiledSignature>) {
        let text = evidence
            .iter()
            .filter(|r| r.status == StepStatus::Succeeded)
            .filter_map(|r| r.output.as_ref().map(output_text))
            .collect::<Vec<_>>()
            .join("\n");

        let hypothesis = hypothesis.to_lowercase();
        let selected = self.signatures.iter().find(|s| s.selected_by(&hypothesis));
        let mut found = self.signatures.iter().filter(|s| s.found_in(&text));

        match selected {
            Some(sig) if sig.found_in(&text) => (HypothesisStatus::Confirmed, Some(sig)),
            // the problem's own symptom says nothing against the hypothesis
            Some(sig) => match found.find(|s| {
                s.signature.name != sig.signature.name
                    && !s.signature.symptom_only
                    && !s.found_in(problem)
            }) {
                Some(other) => (HypothesisStatus::Refuted, Some(other)),
                None => (HypothesisStatus::Inconclusive, None),
            },
            // no testable hypothesis; still surface what the evidence shows
            None => (HypothesisStatus::Inconclusive, found.next()),
        }
    }

    fn header(
        &self,
        problem: &str,
        hypothesis: &str,
        status: HypothesisStatus,
        matched: Option<&CompiledSignature>,
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Problem: {}", problem);
        let hypothesis = if hypothesis.is_empty() {
            "(none)"
        } else {
            hypothesis
        };
        let _ = writeln!(out, "Hypothesis: {} [{}]", hypothesis, status);
        if let Some(sig) = matched {
            let _ = writeln!(out, "Matched signature: {}", sig.signature.name);
        }
        out
    }

    fn write_step(
        &self,
        out: &mut String,
        plan: &ValidatedPlan,
        result: &StepResult,
        show_round: bool,
    ) {
        let step = plan.step(result.step_id);
        let reason = step.map(|s| s.reason.as_str()).unwrap_or("");
        let expected = step.map(|s| s.expected_outcome.as_str()).unwrap_or("");

        out.push('\n');
        if show_round {
            let _ = write!(out, "Round {} / ", result.round);
        }
        let _ = writeln!(
            out,
            "Step {} [{}] {} (attempts: {})",
            result.step_id, result.action, result.status, result.attempt_count
        );
        if !reason.is_empty() {
            let _ = writeln!(out, "  Reason: {}", reason);
        }
        if !expected.is_empty() {
            let _ = writeln!(out, "  Expected: {}", expected);
        }
        if let Some(output) = &result.output {
            let excerpt = truncate_chars(&output_text(output), self.max_output_chars);
            let _ = writeln!(out, "  Output: {}", excerpt.replace('\n', "\n    "));
        }
        if let Some(error) = &result.error {
            let _ = writeln!(
                out,
                "  Error (step {}, {}): {}",
                result.step_id,
                error.kind.as_str(),
                error.message
            );
        }
    }
}

/// Results of `plan` in its topological order
fn in_plan_order(plan: &ValidatedPlan, results: &[StepResult]) -> Vec<StepResult> {
    plan.order()
        .iter()
        .filter_map(|id| results.iter().find(|r| r.step_id == *id).cloned())
        .collect()
}

impl DiagnosisReport {
    /// Append a note to the narrative
    #[must_use]
    pub fn with_note(mut self, note: &str) -> Self {
        if !note.is_empty() {
            let _ = writeln!(self.narrative, "\nNote: {}", note);
        }
        self
    }
}
