//! Reporter interface

use std::time::Duration;

use crate::models::TestCase;
use crate::runnable::Runnable;

/// Receives test case callbacks during a run and renders the final report
///
/// `report_progress` may be called many times per case while it runs,
/// `report_result` exactly once per case after it finishes, and
/// `format_complete` exactly once at the end of the run.
pub trait Reporter {
    type Report;

    fn report_progress<R: Runnable>(&mut self, case: &TestCase<R>);

    fn report_result<R: Runnable>(&mut self, case: &TestCase<R>);

    /// Render the report over every case, in finish order
    fn format_complete<R: Runnable>(
        &mut self,
        cases: &[TestCase<R>],
        duration: Duration,
    ) -> Self::Report;
}
