use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::store::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Pending,
    Answered,
    Dismissed,
}

impl InterviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InterviewStatus::Pending => "pending",
            InterviewStatus::Answered => "answered",
            InterviewStatus::Dismissed => "dismissed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(InterviewStatus::Pending),
            "answered" => Some(InterviewStatus::Answered),
            "dismissed" => Some(InterviewStatus::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Interview {
    pub id: Uuid,
    pub question: String,
    pub status: InterviewStatus,
    pub source: String,
    pub proposed_on: NaiveDate,
    pub answered_at: Option<DateTime<Utc>>,
    pub answer: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProposeOutcome {
    Proposed(Interview),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyPending,
    DailyLimitReached,
}

/// Constrained producer of strategic questions: at most one interview is
/// pending system-wide, and at most one leaves pending per UTC calendar day.
/// Duplicate answers and dismissals cost nothing.
pub struct InterviewScheduler {
    store: Storage,
}

impl InterviewScheduler {
    pub fn new(store: Storage) -> Self {
        Self { store }
    }

    pub async fn propose(&self, question: &str, source: &str) -> Result<ProposeOutcome> {
        if self.store.pending_interview().await?.is_some() {
            return Ok(ProposeOutcome::Rejected(RejectReason::AlreadyPending));
        }
        let today = Utc::now().date_naive();
        if self.store.interview_resolved_on(today).await? {
            return Ok(ProposeOutcome::Rejected(RejectReason::DailyLimitReached));
        }

        let interview = Interview {
            id: Uuid::new_v4(),
            question: question.to_string(),
            status: InterviewStatus::Pending,
            source: source.to_string(),
            proposed_on: today,
            answered_at: None,
            answer: None,
        };
        self.store.insert_interview(&interview).await?;
        Ok(ProposeOutcome::Proposed(interview))
    }

    /// Idempotent: on a non-pending interview the previous status is
    /// returned and nothing changes.
    pub async fn answer(&self, id: Uuid, response: &str) -> Result<InterviewStatus> {
        let Some(interview) = self.store.get_interview(id).await? else {
            return Ok(InterviewStatus::Dismissed);
        };
        if interview.status != InterviewStatus::Pending {
            return Ok(interview.status);
        }
        self.store
            .resolve_interview(
                id,
                InterviewStatus::Answered,
                Some(response),
                Utc::now().date_naive(),
            )
            .await?;
        Ok(InterviewStatus::Answered)
    }

    /// Idempotent, same contract as `answer`.
    pub async fn dismiss(&self, id: Uuid) -> Result<InterviewStatus> {
        let Some(interview) = self.store.get_interview(id).await? else {
            return Ok(InterviewStatus::Dismissed);
        };
        if interview.status != InterviewStatus::Pending {
            return Ok(interview.status);
        }
        self.store
            .resolve_interview(id, InterviewStatus::Dismissed, None, Utc::now().date_naive())
            .await?;
        Ok(InterviewStatus::Dismissed)
    }

    pub async fn pending(&self) -> Result<Option<Interview>> {
        self.store.pending_interview().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scheduler() -> InterviewScheduler {
        InterviewScheduler::new(Storage::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn second_proposal_is_rejected_while_one_is_pending() {
        let scheduler = scheduler().await;
        let first = scheduler.propose("What matters this week?", "seed").await.unwrap();
        assert!(matches!(first, ProposeOutcome::Proposed(_)));

        let second = scheduler.propose("Another question?", "seed").await.unwrap();
        assert!(matches!(
            second,
            ProposeOutcome::Rejected(RejectReason::AlreadyPending)
        ));
    }

    #[tokio::test]
    async fn daily_cap_holds_across_answer_and_dismiss() {
        let scheduler = scheduler().await;
        let ProposeOutcome::Proposed(interview) =
            scheduler.propose("Priorities?", "seed").await.unwrap()
        else {
            panic!("expected proposal");
        };
        scheduler.answer(interview.id, "Ship the release").await.unwrap();

        let again = scheduler.propose("Blockers?", "seed").await.unwrap();
        assert!(matches!(
            again,
            ProposeOutcome::Rejected(RejectReason::DailyLimitReached)
        ));
    }

    #[tokio::test]
    async fn duplicate_answer_is_a_noop_returning_previous_state() {
        let scheduler = scheduler().await;
        let ProposeOutcome::Proposed(interview) =
            scheduler.propose("Priorities?", "seed").await.unwrap()
        else {
            panic!("expected proposal");
        };

        assert_eq!(
            scheduler.answer(interview.id, "first").await.unwrap(),
            InterviewStatus::Answered
        );
        assert_eq!(
            scheduler.answer(interview.id, "second").await.unwrap(),
            InterviewStatus::Answered
        );

        let stored = scheduler.store.get_interview(interview.id).await.unwrap().unwrap();
        assert_eq!(stored.answer.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn dismiss_after_answer_does_not_change_status() {
        let scheduler = scheduler().await;
        let ProposeOutcome::Proposed(interview) =
            scheduler.propose("Priorities?", "seed").await.unwrap()
        else {
            panic!("expected proposal");
        };
        scheduler.answer(interview.id, "done").await.unwrap();

        assert_eq!(
            scheduler.dismiss(interview.id).await.unwrap(),
            InterviewStatus::Answered
        );
    }
}
