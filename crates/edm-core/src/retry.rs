//! Exponential-backoff retry queue for transient write failures.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use edm_model::{
    BatchId, EngineError, LineageRecord, Record, Result, RetryId, RetryQueueItem, RetrySettings,
    RetryStatus,
};
use tracing::{debug, info, warn};

/// Everything needed to replay one failed write.
#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub batch_id: BatchId,
    pub failed_operation: String,
    pub operation_key: String,
    pub target_table: String,
    pub source_row_numbers: Vec<u64>,
    pub record_id: String,
    pub payload: Record,
    pub lineage: Vec<LineageRecord>,
    pub error: EngineError,
}

/// Result of one processing attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub retry_id: RetryId,
    pub batch_id: BatchId,
    pub status: RetryStatus,
    pub attempt_number: u32,
}

#[derive(Debug, Clone)]
pub struct RetryQueue {
    settings: RetrySettings,
    items: Arc<RwLock<Vec<RetryQueueItem>>>,
}

/// `now + delay`, saturating at the latest representable instant.
fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn poisoned() -> EngineError {
    EngineError::Storage {
        message: "retry queue lock poisoned".to_string(),
    }
}

impl RetryQueue {
    pub fn new(settings: RetrySettings) -> Self {
        Self::from_items(settings, Vec::new())
    }

    /// Restores a queue from persisted items.
    ///
    /// An item left `RETRYING` was interrupted mid-attempt; it goes back to
    /// `PENDING` with its attempt number unchanged, so the replay is keyed by
    /// the same record id.
    pub fn from_items(settings: RetrySettings, mut items: Vec<RetryQueueItem>) -> Self {
        let mut requeued = 0;
        for item in items
            .iter_mut()
            .filter(|i| i.status == RetryStatus::Retrying)
        {
            item.status = RetryStatus::Pending;
            requeued += 1;
        }
        if requeued > 0 {
            warn!(requeued, "requeued retries interrupted mid-attempt");
        }
        Self {
            settings,
            items: Arc::new(RwLock::new(items)),
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Delay before attempt `attempt + 1`: `base * multiplier^(attempt - 1)`,
    /// capped at `max_delay_secs`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u64::from(self.settings.multiplier).saturating_pow(exponent);
        let secs = self
            .settings
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.settings.max_delay_secs);
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// Queues a failed write. An operation key that already has a live item
    /// returns that item instead of queueing a duplicate.
    pub fn enqueue(&self, request: RetryRequest, now: DateTime<Utc>) -> Result<RetryQueueItem> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        if let Some(existing) = items
            .iter()
            .find(|i| i.operation_key == request.operation_key && !i.status.is_terminal())
        {
            debug!(operation_key = %request.operation_key, "retry already queued");
            return Ok(existing.clone());
        }

        let item = RetryQueueItem {
            retry_id: RetryId::generate(),
            migration_batch_id: request.batch_id,
            failed_operation: request.failed_operation,
            operation_key: request.operation_key,
            target_table: request.target_table,
            source_row_numbers: request.source_row_numbers,
            record_id: request.record_id,
            payload: request.payload,
            lineage: request.lineage,
            error_code: request.error.kind().code().to_string(),
            error_message: request.error.to_string(),
            attempt_number: 1,
            max_attempts: self.settings.max_attempts.max(1),
            next_retry_at: after(now, self.backoff(1)),
            status: RetryStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        info!(
            retry_id = %item.retry_id,
            batch_id = %item.migration_batch_id,
            table = %item.target_table,
            next_retry_at = %item.next_retry_at,
            "queued retry"
        );
        items.push(item.clone());
        Ok(item)
    }

    /// Runs `handler` on every item due at `now`.
    ///
    /// A retryable failure schedules the next attempt until `max_attempts` is
    /// reached; any other failure exhausts the item immediately.
    pub fn process_due<F>(&self, now: DateTime<Utc>, handler: F) -> Result<Vec<RetryOutcome>>
    where
        F: FnMut(&RetryQueueItem) -> Result<()>,
    {
        self.process_due_matching(now, |_| true, handler)
    }

    /// [`RetryQueue::process_due`] restricted to items accepted by `filter`.
    pub fn process_due_matching<P, F>(
        &self,
        now: DateTime<Utc>,
        filter: P,
        mut handler: F,
    ) -> Result<Vec<RetryOutcome>>
    where
        P: Fn(&RetryQueueItem) -> bool,
        F: FnMut(&RetryQueueItem) -> Result<()>,
    {
        let due: Vec<RetryId> = {
            let mut items = self.items.write().map_err(|_| poisoned())?;
            items
                .iter_mut()
                .filter(|i| i.is_due(now) && filter(i))
                .map(|i| {
                    i.status = RetryStatus::Retrying;
                    i.updated_at = now;
                    i.retry_id.clone()
                })
                .collect()
        };

        let mut outcomes = Vec::with_capacity(due.len());
        for retry_id in due {
            let Some(snapshot) = self.get(&retry_id) else {
                continue;
            };
            let result = handler(&snapshot);

            let mut items = self.items.write().map_err(|_| poisoned())?;
            let Some(item) = items.iter_mut().find(|i| i.retry_id == retry_id) else {
                continue;
            };
            item.updated_at = now;
            match result {
                Ok(()) => {
                    item.status = RetryStatus::Succeeded;
                    info!(retry_id = %item.retry_id, attempt = item.attempt_number, "retry succeeded");
                }
                Err(error) => {
                    item.error_code = error.kind().code().to_string();
                    item.error_message = error.to_string();
                    if error.kind().is_retryable() && item.attempt_number < item.max_attempts {
                        let delay = self.backoff(item.attempt_number + 1);
                        item.attempt_number += 1;
                        item.next_retry_at = after(now, delay);
                        item.status = RetryStatus::Pending;
                        debug!(
                            retry_id = %item.retry_id,
                            attempt = item.attempt_number,
                            next_retry_at = %item.next_retry_at,
                            "retry rescheduled"
                        );
                    } else {
                        item.status = RetryStatus::Exhausted;
                        warn!(
                            retry_id = %item.retry_id,
                            attempt = item.attempt_number,
                            %error,
                            "retry exhausted"
                        );
                    }
                }
            }
            outcomes.push(RetryOutcome {
                retry_id: item.retry_id.clone(),
                batch_id: item.migration_batch_id.clone(),
                status: item.status,
                attempt_number: item.attempt_number,
            });
        }
        Ok(outcomes)
    }

    pub fn get(&self, retry_id: &RetryId) -> Option<RetryQueueItem> {
        self.items
            .read()
            .ok()?
            .iter()
            .find(|i| &i.retry_id == retry_id)
            .cloned()
    }

    pub fn items(&self) -> Vec<RetryQueueItem> {
        self.items.read().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn for_batch(&self, batch_id: &BatchId) -> Vec<RetryQueueItem> {
        self.items
            .read()
            .map(|items| {
                items
                    .iter()
                    .filter(|i| &i.migration_batch_id == batch_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Items still waiting for an attempt.
    pub fn pending(&self) -> Vec<RetryQueueItem> {
        self.items
            .read()
            .map(|items| {
                items
                    .iter()
                    .filter(|i| !i.status.is_terminal())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Earliest scheduled attempt, if anything is pending.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.pending().iter().map(|i| i.next_retry_at).min()
    }
}
