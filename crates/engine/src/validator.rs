//! Static syntax validation — run this before persisting or executing a
//! flow.
//!
//! The validator walks the tree depth-first without executing anything and
//! reports structural problems as severity-tagged diagnostics. Recursion is
//! driven by the action's child-introspection capability
//! ([`Action::child_sequences`] / [`Action::nested_actions`]), not a type
//! switch, so new composite kinds validate their children for free.
//!
//! Diagnostics never block execution by themselves; hosts decide whether a
//! flow with blocking diagnostics may run.

use std::fmt;
use std::fmt::Write as _;

use actions::{Condition, Environment, ValueType};

use crate::model::{Action, Flow};

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// How serious a diagnostic is. `Error` and `Critical` block a flow from
/// being considered valid; `Warning` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// One validation finding. Produced transiently; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// Display name of the offending action (`"flow"` for flow-level
    /// findings).
    pub action: String,
    pub message: String,
    /// The specific field the message refers to, when there is one.
    pub property: Option<String>,
    pub severity: Severity,
    /// Position of the node in the tree, `actions[2].body[0]` style.
    pub path: String,
    /// Extra detail for the report (observed type, depth reached, ...).
    pub context: Option<String>,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.severity, self.path, self.action, self.message
        )
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Knobs for a validation pass.
#[derive(Debug, Clone, Copy)]
pub struct ValidateOptions {
    /// Recurse into composite children. When false only the flow and its
    /// top-level actions are checked.
    pub validate_nested: bool,
    /// Keep warnings in the result. Errors and criticals are always kept.
    pub include_warnings: bool,
    /// Recursion cap; exceeding it yields one warning per branch and stops
    /// descending. Tree well-formedness (no cycles) is the editor's
    /// invariant — this cap is the only guard against malformed input.
    pub max_depth: usize,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            validate_nested: true,
            include_warnings: true,
            max_depth: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation walk
// ---------------------------------------------------------------------------

/// Validate a flow and return every finding, depth-first, in tree order.
/// Re-running on an unmodified flow returns the same findings.
pub fn validate_flow(flow: &Flow, options: &ValidateOptions) -> Vec<SyntaxError> {
    let mut walker = Walker {
        env: &flow.environment,
        options,
        findings: Vec::new(),
    };

    if flow.name.trim().is_empty() {
        walker.push(
            Severity::Warning,
            "flow",
            "flow",
            "flow has no name",
            Some("name"),
            None,
        );
    }
    if flow.sequence.is_empty() {
        walker.push(
            Severity::Warning,
            "flow",
            "flow",
            "flow has no actions",
            Some("actions"),
            None,
        );
    }

    walker.walk_sequence("actions", &flow.sequence.actions, 0);

    let mut findings = walker.findings;
    if !options.include_warnings {
        findings.retain(|e| e.severity != Severity::Warning);
    }
    findings
}

struct Walker<'a> {
    env: &'a Environment,
    options: &'a ValidateOptions,
    findings: Vec<SyntaxError>,
}

impl Walker<'_> {
    fn push(
        &mut self,
        severity: Severity,
        action: &str,
        path: &str,
        message: &str,
        property: Option<&str>,
        context: Option<String>,
    ) {
        self.findings.push(SyntaxError {
            action: action.to_owned(),
            message: message.to_owned(),
            property: property.map(str::to_owned),
            severity,
            path: path.to_owned(),
            context,
        });
    }

    fn walk_sequence(&mut self, path: &str, actions: &[Action], depth: usize) {
        for (index, action) in actions.iter().enumerate() {
            self.walk_action(&format!("{path}[{index}]"), action, depth);
        }
    }

    fn walk_action(&mut self, path: &str, action: &Action, depth: usize) {
        let name = action.display_name();

        if action.name().trim().is_empty() {
            self.push(
                Severity::Warning,
                name,
                path,
                "action has no name",
                Some("name"),
                None,
            );
        }
        if action.description().trim().is_empty() {
            self.push(
                Severity::Warning,
                name,
                path,
                "action has no description",
                Some("description"),
                None,
            );
        }

        match action {
            Action::Leaf(_) => {}
            Action::If(a) => {
                self.check_condition(path, name, &a.condition, "if action");
                if a.then_branch.is_empty() && a.else_branch.is_empty() {
                    self.push(
                        Severity::Warning,
                        name,
                        path,
                        "if action has no actions in either branch",
                        None,
                        None,
                    );
                }
            }
            Action::While(a) => {
                self.check_condition(path, name, &a.condition, "while loop");
                if a.body.is_empty() {
                    self.push(
                        Severity::Warning,
                        name,
                        path,
                        "while loop has an empty body",
                        Some("body"),
                        None,
                    );
                }
            }
            Action::For(a) => {
                self.check_condition(path, name, &a.condition, "for loop");
                if a.body.is_empty() {
                    self.push(
                        Severity::Warning,
                        name,
                        path,
                        "for loop has an empty body",
                        Some("body"),
                        None,
                    );
                }
            }
        }

        if !self.options.validate_nested {
            return;
        }

        let sequences = action.child_sequences();
        let nested = action.nested_actions();
        if sequences.is_empty() && nested.is_empty() {
            return;
        }

        if depth >= self.options.max_depth {
            self.push(
                Severity::Warning,
                name,
                path,
                "maximum validation depth reached, nested actions not checked",
                None,
                Some(format!("max_depth = {}", self.options.max_depth)),
            );
            return;
        }

        for (child_name, seq) in sequences {
            self.walk_sequence(&format!("{path}.{child_name}"), &seq.actions, depth + 1);
        }
        for (child_name, child) in nested {
            self.walk_action(&format!("{path}.{child_name}"), child, depth + 1);
        }
    }

    fn check_condition(
        &mut self,
        path: &str,
        name: &str,
        condition: &Option<Condition>,
        what: &str,
    ) {
        match condition {
            None => {
                self.push(
                    Severity::Critical,
                    name,
                    path,
                    &format!("{what} has no condition"),
                    Some("condition"),
                    None,
                );
            }
            Some(condition) => match condition.result_type(self.env) {
                Some(ValueType::Bool) => {}
                Some(other) => {
                    self.push(
                        Severity::Critical,
                        name,
                        path,
                        &format!("{what} condition is not boolean"),
                        Some("condition"),
                        Some(format!("expression evaluates to {other}")),
                    );
                }
                None => {
                    self.push(
                        Severity::Error,
                        name,
                        path,
                        &format!("{what} condition references an undefined variable"),
                        Some("condition"),
                        None,
                    );
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Aggregated validation result for host consumption.
#[derive(Debug, Clone)]
pub struct FlowValidationSummary {
    pub warnings: usize,
    pub errors: usize,
    pub criticals: usize,
    pub diagnostics: Vec<SyntaxError>,
}

impl FlowValidationSummary {
    pub fn from_diagnostics(diagnostics: Vec<SyntaxError>) -> Self {
        let count =
            |s: Severity| diagnostics.iter().filter(|e| e.severity == s).count();
        Self {
            warnings: count(Severity::Warning),
            errors: count(Severity::Error),
            criticals: count(Severity::Critical),
            diagnostics,
        }
    }

    /// A flow is valid when it carries no errors or criticals; warnings do
    /// not block.
    pub fn is_valid(&self) -> bool {
        self.errors == 0 && self.criticals == 0
    }

    /// Detailed text report, one diagnostic per line.
    pub fn report(&self) -> String {
        let mut out = format!(
            "flow validation: {} critical, {} error(s), {} warning(s)\n",
            self.criticals, self.errors, self.warnings
        );
        for finding in &self.diagnostics {
            let _ = write!(
                out,
                "  [{}] {} ({}): {}",
                finding.severity, finding.path, finding.action, finding.message
            );
            if let Some(context) = &finding.context {
                let _ = write!(out, " — {context}");
            }
            out.push('\n');
        }
        out
    }
}

impl Flow {
    /// Validate with default options.
    pub fn validate_syntax(&self) -> Vec<SyntaxError> {
        validate_flow(self, &ValidateOptions::default())
    }

    /// True when validation finds any blocking diagnostic (error or
    /// critical).
    pub fn has_syntax_errors(&self) -> bool {
        !FlowValidationSummary::from_diagnostics(self.validate_syntax()).is_valid()
    }
}
