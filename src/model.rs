//! Household, member and task records as pushed by the server.
//!
//! Everything except `id` is optional on the wire: the server sometimes sends
//! partial records (e.g. `{"id": "..."}` for the household in
//! `household:member_left`), so the other fields default rather than fail.
//! A record without an `id` is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task grouping shown in the task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskCategory {
    /// Household chores.
    Chores,
    /// Shopping list items.
    Shopping,
    /// Work items.
    Work,
    /// Anything else.
    #[default]
    General,
}

/// A member of a household.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub household_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: bool,
}

/// A household (the realtime "room").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub invite_code: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Link between a task and a member it is assigned to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub id: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub user_id: String,
    pub user: Option<User>,
}

/// A shared household task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub category: TaskCategory,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub creator_id: String,
    pub creator: Option<User>,
    #[serde(default)]
    pub household_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    #[serde(default)]
    pub assignments: Vec<TaskAssignment>,
}

impl Task {
    /// Minimal task with just an id and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Whether the task is still open and due strictly after `now`.
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due_date.is_some_and(|due| due > now)
    }
}
