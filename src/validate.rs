//! Validation engine
//!
//! Rules are registered statically as a plain list of descriptors, each with a
//! name, a default severity, and (for feature/annotation rules) a check
//! callback. The GFF3 reader raises its syntactic findings by rule name
//! through [`ValidationEngine::handle_syntactic`]; the same severity policy
//! decides whether a finding is suppressed, collected as a warning, or
//! escalated to an abort.

use std::fmt;

use log::warn;
use rustc_hash::FxHashMap;

use crate::error::{ConvertError, Result};
use crate::gff3::{Gff3Annotation, Gff3Feature};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Off,
    Warn,
    Error,
}

impl Severity {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "off" => Some(Severity::Off),
            "warn" | "warning" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// What a rule inspects.
pub enum RuleCheck {
    Feature(fn(&Gff3Feature) -> Option<String>),
    Annotation(fn(&Gff3Annotation) -> Option<String>),
    /// Raised by name from the reader's syntactic channel; no callback.
    Syntactic,
}

/// One registered rule.
pub struct Rule {
    pub name: &'static str,
    pub default_severity: Severity,
    pub check: RuleCheck,
}

/// The built-in rule registry. Callers may extend or replace the list before
/// constructing the engine.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "gff3.header",
            default_severity: Severity::Error,
            check: RuleCheck::Syntactic,
        },
        Rule {
            name: "gff3.record",
            default_severity: Severity::Error,
            check: RuleCheck::Syntactic,
        },
        Rule {
            name: "gff3.attributes",
            default_severity: Severity::Warn,
            check: RuleCheck::Syntactic,
        },
        Rule {
            name: "gff3.sequence-region.undeclared",
            default_severity: Severity::Error,
            check: RuleCheck::Syntactic,
        },
        Rule {
            name: "gff3.sequence-region.duplicate",
            default_severity: Severity::Warn,
            check: RuleCheck::Syntactic,
        },
        Rule {
            name: "gff3.record.coordinates",
            default_severity: Severity::Error,
            check: RuleCheck::Feature(check_coordinates),
        },
        Rule {
            name: "gff3.record.cds-phase",
            default_severity: Severity::Warn,
            check: RuleCheck::Feature(check_cds_phase),
        },
        Rule {
            name: "gff3.annotation.bounds",
            default_severity: Severity::Warn,
            check: RuleCheck::Annotation(check_region_bounds),
        },
    ]
}

fn check_coordinates(feature: &Gff3Feature) -> Option<String> {
    if feature.end < feature.start {
        Some(format!(
            "feature '{}' has end {} before start {}",
            feature.type_name, feature.end, feature.start
        ))
    } else {
        None
    }
}

fn check_cds_phase(feature: &Gff3Feature) -> Option<String> {
    if feature.type_name == "CDS" && feature.phase.is_none() {
        Some(format!(
            "CDS at {}..{} carries no phase",
            feature.start, feature.end
        ))
    } else {
        None
    }
}

fn check_region_bounds(annotation: &Gff3Annotation) -> Option<String> {
    let region = &annotation.region;
    annotation
        .features
        .iter()
        .find(|f| f.start < region.start || f.end > region.end)
        .map(|f| {
            format!(
                "feature '{}' at {}..{} leaves the declared region {}..{}",
                f.type_name, f.start, f.end, region.start, region.end
            )
        })
}

/// One collected warning.
#[derive(Debug, Clone)]
pub struct Finding {
    pub rule: &'static str,
    pub line: u64,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] line {}: {}", self.rule, self.line, self.message)
    }
}

/// Rule registry plus severity policy and the ordered warning list.
pub struct ValidationEngine {
    rules: Vec<Rule>,
    overrides: FxHashMap<String, Severity>,
    warnings: Vec<Finding>,
}

impl ValidationEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        ValidationEngine {
            rules,
            overrides: FxHashMap::default(),
            warnings: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        ValidationEngine::new(default_rules())
    }

    pub fn set_severity(&mut self, rule: &str, severity: Severity) {
        self.overrides.insert(rule.to_string(), severity);
    }

    /// Parses a `rule=off|warn|error` override spec.
    pub fn set_severity_spec(&mut self, spec: &str) -> std::result::Result<(), String> {
        let (rule, level) = spec
            .split_once('=')
            .ok_or_else(|| format!("expected rule=level, got '{spec}'"))?;
        let severity =
            Severity::parse(level).ok_or_else(|| format!("unknown severity '{level}'"))?;
        self.set_severity(rule.trim(), severity);
        Ok(())
    }

    fn severity_of(&self, rule: &str) -> Severity {
        if let Some(&severity) = self.overrides.get(rule) {
            return severity;
        }
        self.rules
            .iter()
            .find(|r| r.name == rule)
            .map(|r| r.default_severity)
            .unwrap_or(Severity::Error)
    }

    fn dispatch(&mut self, rule: &'static str, line: u64, message: String) -> Result<()> {
        match self.severity_of(rule) {
            Severity::Off => Ok(()),
            Severity::Warn => {
                warn!("[{rule}] line {line}: {message}");
                self.warnings.push(Finding {
                    rule,
                    line,
                    message,
                });
                Ok(())
            }
            Severity::Error => Err(ConvertError::Syntactic {
                rule,
                line,
                msg: message,
            }),
        }
    }

    /// Runs every feature rule against one parsed record.
    pub fn validate_feature(&mut self, feature: &Gff3Feature, line: u64) -> Result<()> {
        let findings: Vec<(&'static str, String)> = self
            .rules
            .iter()
            .filter_map(|rule| match rule.check {
                RuleCheck::Feature(check) => check(feature).map(|msg| (rule.name, msg)),
                _ => None,
            })
            .collect();
        for (rule, message) in findings {
            self.dispatch(rule, line, message)?;
        }
        Ok(())
    }

    /// Runs every annotation rule against one completed annotation.
    pub fn validate_annotation(&mut self, annotation: &Gff3Annotation, line: u64) -> Result<()> {
        let findings: Vec<(&'static str, String)> = self
            .rules
            .iter()
            .filter_map(|rule| match rule.check {
                RuleCheck::Annotation(check) => check(annotation).map(|msg| (rule.name, msg)),
                _ => None,
            })
            .collect();
        for (rule, message) in findings {
            self.dispatch(rule, line, message)?;
        }
        Ok(())
    }

    /// Syntactic-error channel for the reader. Returns `Ok(())` when the
    /// finding was suppressed or demoted; the caller then skips the offending
    /// construct and carries on.
    pub fn handle_syntactic(
        &mut self,
        rule: &'static str,
        line: u64,
        message: String,
    ) -> Result<()> {
        self.dispatch(rule, line, message)
    }

    pub fn warnings(&self) -> &[Finding] {
        &self.warnings
    }
}
