//! Control-state machine for the trading worker.
//!
//! States: ACTIVE (default), PAUSED, CRYO. Pause and cryo carry an absolute
//! deadline; any read past the deadline thaws back to ACTIVE and persists
//! the transition before returning (lazy thaw). All transitions and the
//! thaw check-then-act serialize through one mutex so two concurrent reads
//! can never persist the thaw twice.

use crate::{
    models::{ControlRecord, ControlState, Pet},
    store::TelemetryStore,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub struct ControlFsm {
    store: Arc<TelemetryStore>,
    lock: Mutex<()>,
}

/// Outcome of an explicit transition, echoed to the caller.
#[derive(Debug, Clone)]
pub struct Transition {
    pub record: ControlRecord,
    pub changed: bool,
}

impl ControlFsm {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Current control state after lazy thaw. A thaw that cannot be
    /// persisted fails the read: a stale PAUSED/CRYO answer would mislead
    /// the worker.
    pub fn current(&self) -> Result<ControlRecord> {
        let _guard = self.lock.lock();
        self.thaw_if_elapsed(Utc::now())
    }

    pub fn pause(&self, seconds: i64, reason: &str) -> Result<Transition> {
        self.freeze(ControlState::Paused, seconds, reason)
    }

    pub fn cryo(&self, seconds: i64, reason: &str) -> Result<Transition> {
        self.freeze(ControlState::Cryo, seconds, reason)
    }

    fn freeze(&self, target: ControlState, seconds: i64, reason: &str) -> Result<Transition> {
        let _guard = self.lock.lock();
        let now = Utc::now();
        let mut record = self.store.load_control().context("load control")?;
        let until = now + Duration::seconds(seconds.max(0));

        // Renewal with an earlier-or-equal deadline is a no-op aside from
        // updated_at.
        let renewal_noop = record.state == target
            && record
                .deadline_ms()
                .map(|d| until.timestamp_millis() <= d)
                .unwrap_or(false);

        if !renewal_noop {
            record.state = target;
            match target {
                ControlState::Paused => {
                    record.pause_until = until.to_rfc3339();
                    record.pause_reason = reason.to_string();
                    record.cryo_until = String::new();
                    record.cryo_reason = String::new();
                }
                ControlState::Cryo => {
                    record.cryo_until = until.to_rfc3339();
                    record.cryo_reason = reason.to_string();
                    record.pause_until = String::new();
                    record.pause_reason = String::new();
                }
                ControlState::Active => unreachable!("freeze target is never ACTIVE"),
            }
        }
        stamp(&mut record, now);
        self.store.save_control(&record).context("save control")?;

        let label = target.as_str();
        self.store
            .append_event(
                &now.to_rfc3339(),
                now.timestamp(),
                "warning",
                &format!("{} until {} ({})", label, until.to_rfc3339(), reason),
                &serde_json::json!({ "state": label, "seconds": seconds, "reason": reason }),
            )
            .context("append control event")?;

        info!(state = label, seconds, reason, "🧊 Worker control transition");
        Ok(Transition {
            record,
            changed: !renewal_noop,
        })
    }

    /// Back to ACTIVE: clears timers and reasons, resets the pet to its
    /// initial values (sex carries over), and logs an info event.
    pub fn revive(&self, reason: &str) -> Result<Transition> {
        let _guard = self.lock.lock();
        let now = Utc::now();
        let mut record = self.store.load_control().context("load control")?;
        let changed = record.state != ControlState::Active;

        record.state = ControlState::Active;
        record.pause_until = String::new();
        record.pause_reason = String::new();
        record.cryo_until = String::new();
        record.cryo_reason = String::new();
        stamp(&mut record, now);
        self.store.save_control(&record).context("save control")?;

        let sex = self
            .store
            .latest_pet()
            .context("load pet for revive")?
            .map(|p| p.sex)
            .unwrap_or_default();
        let mut pet = Pet::initial(now);
        pet.sex = sex;
        self.store.upsert_pet(&pet).context("reset pet on revive")?;

        self.store
            .append_event(
                &now.to_rfc3339(),
                now.timestamp(),
                "info",
                &format!("revived ({})", reason),
                &serde_json::json!({ "state": "ACTIVE", "reason": reason }),
            )
            .context("append revive event")?;

        info!(reason, "💫 Worker revived");
        Ok(Transition { record, changed })
    }

    fn thaw_if_elapsed(&self, now: DateTime<Utc>) -> Result<ControlRecord> {
        let mut record = self.store.load_control().context("load control")?;
        let elapsed = record
            .deadline_ms()
            .map(|d| d <= now.timestamp_millis())
            .unwrap_or(record.state != ControlState::Active);

        if record.state != ControlState::Active && elapsed {
            let was = record.state.as_str();
            record.state = ControlState::Active;
            record.pause_until = String::new();
            record.pause_reason = String::new();
            record.cryo_until = String::new();
            record.cryo_reason = String::new();
            stamp(&mut record, now);
            self.store
                .save_control(&record)
                .context("persist lazy thaw")?;
            info!(was, "☀️ Lazy thaw back to ACTIVE");
        }
        Ok(record)
    }
}

/// `updated_at` must strictly increase even when two transitions land in
/// the same millisecond.
fn stamp(record: &mut ControlRecord, now: DateTime<Utc>) {
    let ms = now.timestamp_millis().max(record.updated_at_ms + 1);
    record.updated_at_ms = ms;
    record.updated_at = DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or(now)
        .to_rfc3339();
}
