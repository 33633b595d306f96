//! Validation pipeline
//!
//! Scope selection, then the differ and the linter side by side on scoped
//! threads (each with its own aggregator), then merge, then the profile.

use std::thread;

use tracing::{debug, info};

use crate::binding::{BindingResolver, NoBindings};
use crate::diff::ProtoDiff;
use crate::domain::ProtoDomain;
use crate::error::Result;
use crate::lint::{LintConfig, ProtoLinter};
use crate::profile::ValidationProfile;
use crate::report::Report;
use crate::scope::Scope;

/// Diff + lint + profile for one reference/candidate pair
pub struct Pipeline<'a> {
    profile: &'a dyn ValidationProfile,
    lint_config: &'a LintConfig,
    bindings: &'a dyn BindingResolver,
}

impl<'a> Pipeline<'a> {
    pub fn new(profile: &'a dyn ValidationProfile, lint_config: &'a LintConfig) -> Self {
        Self {
            profile,
            lint_config,
            bindings: &NoBindings,
        }
    }

    /// Resolve linked-resource scopes through `bindings`
    pub fn with_bindings(mut self, bindings: &'a dyn BindingResolver) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn run(&self, reference: &ProtoDomain, candidate: &ProtoDomain, scope: &Scope) -> Result<Report> {
        let linter = ProtoLinter::new(self.lint_config)?;
        let differ = ProtoDiff::new(reference, candidate);
        // Names only the reference declares are skipped by the linter.
        let selection = differ.select(scope, self.bindings)?;
        debug!(
            %scope,
            messages = selection.messages.len(),
            enums = selection.enums.len(),
            services = selection.services.len(),
            "validating"
        );

        let (diff_report, lint_report) = thread::scope(|s| {
            let diff = s.spawn(|| differ.run(&selection));
            let lint = s.spawn(|| linter.run(candidate, &selection));
            (
                diff.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
                lint.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
            )
        });

        let report = self.profile.validate(&diff_report.merge(lint_report));
        info!(
            profile = self.profile.name(),
            diff_errors = report.result_count.diff_errors,
            diff_warnings = report.result_count.diff_warnings,
            lint_errors = report.result_count.lint_errors,
            lint_warnings = report.result_count.lint_warnings,
            "validation complete"
        );
        Ok(report)
    }
}

/// Validate `candidate` against `reference` over `scope` under `profile`
pub fn validate(
    reference: &ProtoDomain,
    candidate: &ProtoDomain,
    scope: &Scope,
    profile: &dyn ValidationProfile,
    lint_config: &LintConfig,
) -> Result<Report> {
    Pipeline::new(profile, lint_config).run(reference, candidate, scope)
}
