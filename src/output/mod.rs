//! Output and reporting
//!
//! The reporter receives per-test callbacks during a run and renders the final report.

mod formatter;
mod reporter;
mod summary;

pub use formatter::{ConsoleReporter, OutputFormat};
pub use reporter::Reporter;
pub use summary::{CaseRecord, CheckRecord, RunSummary};

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use super::Reporter;
    use crate::models::{CaseId, Outcome, TestCase};
    use crate::runnable::Runnable;

    /// Reporter that remembers every callback
    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        pub progress: Vec<CaseId>,
        pub results: Vec<(CaseId, String, Option<Outcome>)>,
        pub completions: usize,
    }

    impl RecordingReporter {
        pub fn result_count(&self, id: CaseId) -> usize {
            self.results.iter().filter(|(rid, _, _)| *rid == id).count()
        }
    }

    impl Reporter for RecordingReporter {
        type Report = Vec<(String, Option<Outcome>)>;

        fn report_progress<R: Runnable>(&mut self, case: &TestCase<R>) {
            self.progress.push(case.id());
        }

        fn report_result<R: Runnable>(&mut self, case: &TestCase<R>) {
            self.results
                .push((case.id(), case.full_name(), case.outcome()));
        }

        fn format_complete<R: Runnable>(
            &mut self,
            cases: &[TestCase<R>],
            _duration: Duration,
        ) -> Self::Report {
            self.completions += 1;
            cases
                .iter()
                .map(|case| (case.full_name(), case.outcome()))
                .collect()
        }
    }
}
