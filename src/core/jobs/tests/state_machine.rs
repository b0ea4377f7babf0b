use crate::core::jobs::{JobKind, JobPriority, JobStatus, can_transition};

#[test]
fn queued_job_can_start_cancel_or_fail() {
    assert!(can_transition(JobStatus::Queued, JobStatus::Running));
    assert!(can_transition(JobStatus::Queued, JobStatus::Cancelled));
    assert!(can_transition(JobStatus::Queued, JobStatus::Failed));
    assert!(!can_transition(JobStatus::Queued, JobStatus::Succeeded));
}

#[test]
fn running_job_can_only_reach_a_terminal_or_failed_state() {
    assert!(can_transition(JobStatus::Running, JobStatus::Succeeded));
    assert!(can_transition(JobStatus::Running, JobStatus::Failed));
    assert!(can_transition(JobStatus::Running, JobStatus::Cancelled));
    assert!(!can_transition(JobStatus::Running, JobStatus::Queued));
}

#[test]
fn failed_job_requeues_and_nothing_else() {
    assert!(can_transition(JobStatus::Failed, JobStatus::Queued));
    assert!(!can_transition(JobStatus::Failed, JobStatus::Running));
    assert!(!can_transition(JobStatus::Failed, JobStatus::Succeeded));
}

#[test]
fn terminal_states_admit_no_transition() {
    for to in [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ] {
        assert!(!can_transition(JobStatus::Succeeded, to));
        assert!(!can_transition(JobStatus::Cancelled, to));
    }
}

#[test]
fn status_strings_round_trip() {
    for status in [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ] {
        assert_eq!(JobStatus::from_status(status.as_str()), Some(status));
    }
    assert_eq!(JobStatus::from_status("exploded"), None);
}

#[test]
fn kind_strings_round_trip() {
    for kind in JobKind::ALL {
        assert_eq!(JobKind::from_kind(kind.as_str()), Some(kind));
    }
    assert_eq!(JobKind::from_kind("mystery"), None);
}

#[test]
fn interview_seed_and_health_probe_use_the_high_lane() {
    assert_eq!(JobKind::InterviewSeed.priority(), JobPriority::High);
    assert_eq!(JobKind::HealthProbe.priority(), JobPriority::High);
    assert_eq!(JobKind::Scan.priority(), JobPriority::Bulk);
    assert_eq!(JobKind::DigestBuild.priority(), JobPriority::Bulk);
}
