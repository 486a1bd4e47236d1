//! CLI command implementations.

pub mod remote;

use anyhow::Result;
use autotest_config::CourseConfig;
use autotest_scheduler::quota::{format_wait, remaining_wait};
use chrono::{DateTime, Utc};
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    match CourseConfig::load(path) {
        Ok(course) => {
            println!("Course '{}' is valid", course.name);
            for (id, deliverable) in &course.deliverables {
                let marker = if course.default_deliverable.as_deref() == Some(id.as_str()) {
                    " (default)"
                } else {
                    ""
                };
                println!(
                    "  {}{}: image={} student-delay={}s max-exec-time={}s",
                    id,
                    marker,
                    deliverable.image,
                    deliverable.student_delay,
                    deliverable.max_exec_time
                );
            }
            println!("  staff: {}", course.staff.len());
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// The wait message a student would see, or that feedback is available.
pub fn wait(delay: u64, last: DateTime<Utc>, at: DateTime<Utc>) -> String {
    match remaining_wait(delay, last, at) {
        Some(remaining) => format!("Wait {}", format_wait(remaining)),
        None => "Feedback available now".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_wait() {
        let last = Utc::now();
        assert_eq!(
            wait(3600, last, last + Duration::minutes(15)),
            "Wait 45 minutes"
        );
        assert_eq!(
            wait(43200, last, last + Duration::minutes(30)),
            "Wait 11 hours and 30 minutes"
        );
        assert_eq!(
            wait(3600, last, last + Duration::hours(2)),
            "Feedback available now"
        );
    }
}
