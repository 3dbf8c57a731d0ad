//! In-process delivery broker with weighted priority classes.
//!
//! The broker owns all queue state; workers interact with it through
//! reserve/ack/fail. A reserved intent is leased, not removed: it stays
//! in the in-flight table until acknowledged, and a lease that outlives
//! its deadline (worker crash) is made visible again by the sweeper.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::metrics::{
    INTENTS_DEAD_LETTERED_TOTAL, INTENTS_DELIVERED_TOTAL, INTENTS_ENQUEUED_TOTAL,
    INTENTS_RETRIED_TOTAL, LEASES_EXPIRED_TOTAL,
};

use super::intent::{DeliveryIntent, PriorityClass};
use super::retry::RetryPolicy;

/// Service order for worker attention, derived from class weights
/// (critical 8, default 3, low 1). Workers walk this pattern from a shared
/// cursor, so critical intents are served preferentially while default and
/// low classes keep guaranteed slots and never starve.
const SERVICE_PATTERN: [PriorityClass; 12] = [
    PriorityClass::Critical,
    PriorityClass::Critical,
    PriorityClass::Default,
    PriorityClass::Critical,
    PriorityClass::Critical,
    PriorityClass::Default,
    PriorityClass::Critical,
    PriorityClass::Low,
    PriorityClass::Critical,
    PriorityClass::Critical,
    PriorityClass::Default,
    PriorityClass::Critical,
];

/// Fallback poll interval when no delayed intent bounds the wait.
const IDLE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("delivery broker is shut down")]
    Closed,
}

/// An intent reserved by a worker. Must be resolved with `ack`, `fail`
/// or `reject`; otherwise the lease expires and the intent is redelivered.
#[derive(Debug)]
pub struct LeasedIntent {
    pub intent: DeliveryIntent,
    pub class: PriorityClass,
}

/// How the broker disposed of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Rescheduled for redelivery after the backoff delay.
    Retried { attempts: u32, delay: Duration },
    /// Retries exhausted; diverted to the dead-letter store.
    DeadLettered,
}

/// Intent that exhausted its retries, kept for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub intent: DeliveryIntent,
    pub class: PriorityClass,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub ready_critical: usize,
    pub ready_default: usize,
    pub ready_low: usize,
    pub scheduled: usize,
    pub in_flight: usize,
    pub dead_letters: usize,
}

struct ScheduledIntent {
    ready_at: Instant,
    class: PriorityClass,
    intent: DeliveryIntent,
}

// Min-heap by readiness time (BinaryHeap is a max-heap, so the ordering
// is reversed here).
impl PartialEq for ScheduledIntent {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.intent.id == other.intent.id
    }
}

impl Eq for ScheduledIntent {}

impl PartialOrd for ScheduledIntent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledIntent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.intent.id.cmp(&self.intent.id))
    }
}

struct InFlightIntent {
    intent: DeliveryIntent,
    class: PriorityClass,
    leased_at: Instant,
}

pub struct DeliveryBroker {
    ready: [Mutex<VecDeque<DeliveryIntent>>; PriorityClass::COUNT],
    scheduled: Mutex<BinaryHeap<ScheduledIntent>>,
    in_flight: DashMap<Uuid, InFlightIntent>,
    dead_letters: Mutex<VecDeque<DeadLetterEntry>>,
    notify: Notify,
    closed: AtomicBool,
    cursor: AtomicUsize,
    retry: RetryPolicy,
    lease: Duration,
    dead_letter_capacity: usize,
}

impl DeliveryBroker {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            ready: [
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
            ],
            scheduled: Mutex::new(BinaryHeap::new()),
            in_flight: DashMap::new(),
            dead_letters: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            cursor: AtomicUsize::new(0),
            retry: RetryPolicy::from_config(config),
            lease: Duration::from_secs(config.lease_seconds),
            dead_letter_capacity: config.dead_letter_capacity,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Hand an intent to the broker. Non-blocking; fire-and-forget from the
    /// producer's perspective.
    pub fn enqueue(
        &self,
        intent: DeliveryIntent,
        class: PriorityClass,
    ) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        tracing::debug!(
            intent_id = %intent.id,
            recipient_id = %intent.recipient_id,
            event_type = %intent.event_type,
            class = class.as_str(),
            "Intent enqueued"
        );

        self.ready[class.index()]
            .lock()
            .expect("ready queue lock poisoned")
            .push_back(intent);
        INTENTS_ENQUEUED_TOTAL
            .with_label_values(&[class.as_str()])
            .inc();
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next intent according to the weighted service order.
    /// Returns `None` once the broker is shut down.
    pub async fn reserve(&self) -> Option<LeasedIntent> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            self.promote_due();

            if let Some(lease) = self.try_reserve() {
                return Some(lease);
            }

            let wait = self.next_due_in().unwrap_or(IDLE_POLL);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn try_reserve(&self) -> Option<LeasedIntent> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        for i in 0..SERVICE_PATTERN.len() {
            let class = SERVICE_PATTERN[(start + i) % SERVICE_PATTERN.len()];
            let popped = self.ready[class.index()]
                .lock()
                .expect("ready queue lock poisoned")
                .pop_front();

            if let Some(intent) = popped {
                self.in_flight.insert(
                    intent.id,
                    InFlightIntent {
                        intent: intent.clone(),
                        class,
                        leased_at: Instant::now(),
                    },
                );
                return Some(LeasedIntent { intent, class });
            }
        }

        None
    }

    /// Move delayed intents whose backoff elapsed into their ready queues.
    fn promote_due(&self) {
        let now = Instant::now();
        let mut due = Vec::new();

        {
            let mut scheduled = self.scheduled.lock().expect("scheduled lock poisoned");
            while scheduled
                .peek()
                .is_some_and(|entry| entry.ready_at <= now)
            {
                if let Some(entry) = scheduled.pop() {
                    due.push(entry);
                }
            }
        }

        for entry in due {
            self.ready[entry.class.index()]
                .lock()
                .expect("ready queue lock poisoned")
                .push_back(entry.intent);
        }
    }

    fn next_due_in(&self) -> Option<Duration> {
        let scheduled = self.scheduled.lock().expect("scheduled lock poisoned");
        scheduled
            .peek()
            .map(|entry| entry.ready_at.saturating_duration_since(Instant::now()))
    }

    /// Acknowledge a delivered (or offline no-op) intent, releasing its lease.
    pub fn ack(&self, lease: &LeasedIntent) {
        self.in_flight.remove(&lease.intent.id);
        INTENTS_DELIVERED_TOTAL.inc();
    }

    /// Record a failed attempt: increment the attempt count, reschedule with
    /// exponential backoff, or dead-letter once retries are exhausted.
    pub fn fail(&self, lease: LeasedIntent, reason: &str) -> FailureDisposition {
        self.in_flight.remove(&lease.intent.id);

        let mut intent = lease.intent;
        intent.attempts += 1;

        if self.retry.is_exhausted(intent.attempts) {
            tracing::warn!(
                intent_id = %intent.id,
                recipient_id = %intent.recipient_id,
                event_type = %intent.event_type,
                attempts = intent.attempts,
                reason = %reason,
                "Retries exhausted, dead-lettering intent"
            );
            self.push_dead_letter(intent, lease.class, reason);
            return FailureDisposition::DeadLettered;
        }

        let attempts = intent.attempts;
        let delay = self.retry.delay_for(attempts);

        tracing::debug!(
            intent_id = %intent.id,
            attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Scheduling intent for redelivery"
        );

        self.scheduled
            .lock()
            .expect("scheduled lock poisoned")
            .push(ScheduledIntent {
                ready_at: Instant::now() + delay,
                class: lease.class,
                intent,
            });
        INTENTS_RETRIED_TOTAL.inc();
        self.notify.notify_one();

        FailureDisposition::Retried { attempts, delay }
    }

    /// Dead-letter an intent without retrying (producer errors such as an
    /// unparseable payload, which no amount of redelivery can fix).
    pub fn reject(&self, lease: LeasedIntent, reason: &str) {
        self.in_flight.remove(&lease.intent.id);

        let mut intent = lease.intent;
        intent.attempts += 1;

        tracing::warn!(
            intent_id = %intent.id,
            event_type = %intent.event_type,
            reason = %reason,
            "Rejecting intent without retry"
        );
        self.push_dead_letter(intent, lease.class, reason);
    }

    fn push_dead_letter(&self, intent: DeliveryIntent, class: PriorityClass, reason: &str) {
        let mut dead = self.dead_letters.lock().expect("dead-letter lock poisoned");
        dead.push_back(DeadLetterEntry {
            intent,
            class,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
        if dead.len() > self.dead_letter_capacity {
            dead.pop_front();
        }
        INTENTS_DEAD_LETTERED_TOTAL.inc();
    }

    /// Requeue in-flight intents whose lease expired (worker crashed or
    /// stalled mid-delivery). Attempt counts are untouched: the attempt was
    /// never resolved. Returns the number of intents made visible again.
    pub fn requeue_expired(&self) -> usize {
        let lease = self.lease;
        let expired: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|entry| entry.leased_at.elapsed() > lease)
            .map(|entry| *entry.key())
            .collect();

        let mut requeued = 0;
        for id in expired {
            if let Some((_, stale)) = self
                .in_flight
                .remove_if(&id, |_, entry| entry.leased_at.elapsed() > lease)
            {
                tracing::warn!(
                    intent_id = %stale.intent.id,
                    recipient_id = %stale.intent.recipient_id,
                    "Lease expired, requeueing intent"
                );
                self.ready[stale.class.index()]
                    .lock()
                    .expect("ready queue lock poisoned")
                    .push_back(stale.intent);
                LEASES_EXPIRED_TOTAL.inc();
                requeued += 1;
            }
        }

        if requeued > 0 {
            self.notify.notify_one();
        }
        requeued
    }

    /// Stop accepting intents and wake all waiting workers so they exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Recent dead-letter entries, newest last.
    pub fn dead_letters(&self, limit: usize) -> Vec<DeadLetterEntry> {
        let dead = self.dead_letters.lock().expect("dead-letter lock poisoned");
        dead.iter()
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    pub fn stats(&self) -> BrokerStats {
        let ready_len = |class: PriorityClass| {
            self.ready[class.index()]
                .lock()
                .expect("ready queue lock poisoned")
                .len()
        };

        BrokerStats {
            ready_critical: ready_len(PriorityClass::Critical),
            ready_default: ready_len(PriorityClass::Default),
            ready_low: ready_len(PriorityClass::Low),
            scheduled: self.scheduled.lock().expect("scheduled lock poisoned").len(),
            in_flight: self.in_flight.len(),
            dead_letters: self.dead_letters.lock().expect("dead-letter lock poisoned").len(),
        }
    }
}
