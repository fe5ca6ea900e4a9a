//! Local task reminders.
//!
//! Notification delivery belongs to the host platform and is reached through
//! [`ReminderScheduler`]. [`sync_reminders`] keeps the scheduled set in line
//! with a task list: open tasks with a future due date get a reminder at the
//! due time, everything else has its reminder cancelled.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::Task;

/// When a reminder fires relative to the due date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderPreset {
    #[serde(rename = "NONE")]
    None,
    #[default]
    #[serde(rename = "AT_DUE")]
    AtDue,
    #[serde(rename = "5M_BEFORE")]
    FiveMinutesBefore,
    #[serde(rename = "1H_BEFORE")]
    OneHourBefore,
    #[serde(rename = "1D_BEFORE")]
    OneDayBefore,
}

impl ReminderPreset {
    /// Lead time before the due date, or `None` for no reminder.
    pub fn lead_time(self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::AtDue => Some(Duration::zero()),
            Self::FiveMinutesBefore => Some(Duration::minutes(5)),
            Self::OneHourBefore => Some(Duration::hours(1)),
            Self::OneDayBefore => Some(Duration::days(1)),
        }
    }

    /// Fire time for a task due at `due_at`.
    pub fn trigger_at(self, due_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lead_time().map(|lead| due_at - lead)
    }
}

/// Platform notification scheduler.
pub trait ReminderScheduler: Send + Sync {
    /// Schedule (or reschedule) the reminder for `task_id`.
    ///
    /// # Errors
    ///
    /// Implementation-defined; [`sync_reminders`] logs and skips failures.
    fn schedule_reminder(
        &self,
        task_id: &str,
        title: &str,
        due_at: DateTime<Utc>,
        preset: ReminderPreset,
    ) -> Result<()>;

    /// Cancel the reminder for `task_id`. Cancelling an unknown task succeeds.
    ///
    /// # Errors
    ///
    /// Implementation-defined; [`sync_reminders`] logs and skips failures.
    fn cancel_reminder(&self, task_id: &str) -> Result<()>;
}

/// Outcome of one [`sync_reminders`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReminderSyncReport {
    pub scheduled: Vec<String>,
    pub cancelled: Vec<String>,
    pub failed: usize,
}

/// Bring scheduled reminders in line with `tasks` as of `now`.
pub fn sync_reminders(
    scheduler: &dyn ReminderScheduler,
    tasks: &[Task],
    now: DateTime<Utc>,
) -> ReminderSyncReport {
    let mut report = ReminderSyncReport::default();

    for task in tasks {
        let outcome = match task.due_date {
            Some(due) if task.is_upcoming(now) => scheduler
                .schedule_reminder(&task.id, &task.title, due, ReminderPreset::AtDue)
                .map(|()| report.scheduled.push(task.id.clone())),
            _ => scheduler
                .cancel_reminder(&task.id)
                .map(|()| report.cancelled.push(task.id.clone())),
        };
        if let Err(e) = outcome {
            warn!(task_id = %task.id, "reminder update failed: {e}");
            report.failed += 1;
        }
    }

    debug!(
        scheduled = report.scheduled.len(),
        cancelled = report.cancelled.len(),
        failed = report.failed,
        "reminders synced"
    );
    report
}

/// A reminder held by [`MemoryReminderScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReminder {
    pub title: String,
    pub fire_at: DateTime<Utc>,
}

/// In-memory scheduler keeping the pending reminder map.
///
/// Reminders whose fire time is already past are not stored.
#[derive(Debug, Default)]
pub struct MemoryReminderScheduler {
    pending: Mutex<HashMap<String, PendingReminder>>,
}

impl MemoryReminderScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingReminder>> {
        match self.pending.lock() {
            Ok(m) => m,
            Err(p) => p.into_inner(),
        }
    }

    pub fn pending(&self, task_id: &str) -> Option<PendingReminder> {
        self.lock().get(task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl ReminderScheduler for MemoryReminderScheduler {
    fn schedule_reminder(
        &self,
        task_id: &str,
        title: &str,
        due_at: DateTime<Utc>,
        preset: ReminderPreset,
    ) -> Result<()> {
        let Some(fire_at) = preset.trigger_at(due_at) else {
            return Ok(());
        };
        if fire_at <= Utc::now() {
            return Ok(());
        }
        self.lock().insert(
            task_id.to_owned(),
            PendingReminder {
                title: title.to_owned(),
                fire_at,
            },
        );
        Ok(())
    }

    fn cancel_reminder(&self, task_id: &str) -> Result<()> {
        self.lock().remove(task_id);
        Ok(())
    }
}
