use crate::model::{JobSpec, SourceRef, Transformation};
use regex::Regex;

/// Outcome of checking a job before it runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl JobSpec {
    /// Check required fields, transformation names and patterns.
    ///
    /// With `check_files`, local sources that do not exist are reported as warnings; relative
    /// paths resolve against the directory of the job file.
    pub fn validate(&self, check_files: bool) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.name.trim().is_empty() {
            report.error("'name' is required");
        }
        if self.sources.is_empty() {
            report.error("'sources' must contain at least one source");
        }

        check_transformations(&mut report, "global", &self.transformations);
        check_patterns(&mut report, "global inclusions", &self.inclusions);
        check_patterns(&mut report, "global exclusions", &self.exclusions);

        for (idx, source) in self.sources.iter().enumerate() {
            self.check_source(&mut report, idx, source, check_files);
        }

        report
    }

    fn check_source(
        &self,
        report: &mut ValidationReport,
        idx: usize,
        source: &SourceRef,
        check_files: bool,
    ) {
        let label = format!("sources[{idx}]");
        if source.locator.trim().is_empty() {
            report.error(format!("{label}: 'source' is required"));
            return;
        }

        check_transformations(report, &label, &source.transformations);
        check_patterns(report, &format!("{label} inclusions"), &source.inclusions);
        check_patterns(report, &format!("{label} exclusions"), &source.exclusions);

        if check_files && source.is_local() {
            let path = self.resolve_local(source);
            if !path.exists() {
                report.warn(format!(
                    "{label}: local source not found: {}",
                    path.display()
                ));
            }
        }
    }
}

fn check_transformations(report: &mut ValidationReport, scope: &str, names: &[String]) {
    for name in Transformation::unknown(names) {
        report.warn(format!("{scope}: unknown transformation '{name}'"));
    }
}

/// `/.../` patterns are regular expressions; everything else is a plain wildcard.
fn check_patterns(report: &mut ValidationReport, scope: &str, patterns: &[String]) {
    for pattern in patterns {
        let trimmed = pattern.trim();
        let Some(body) = trimmed
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        else {
            continue;
        };
        if let Err(err) = Regex::new(body) {
            report.warn(format!("{scope}: invalid regex '{trimmed}': {err}"));
        }
    }
}
