//! Query engine: composable filter/sort/paginate over the record store.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::domain::{TaskId, TaskRecord, TaskStatus};
use crate::error::EngineError;
use crate::store::RecordStore;

/// Multi-criteria filter; supplied conditions AND together.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub namespace: Option<String>,
    pub statuses: Vec<TaskStatus>,
    pub groups: Vec<String>,
    pub task_types: Vec<String>,
    /// Case-insensitive substring of the task name.
    pub name_contains: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Relative to now at query time.
    pub older_than: Option<Duration>,
    pub newer_than: Option<Duration>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_types.push(task_type.into());
        self
    }

    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn created_after(mut self, t: DateTime<Utc>) -> Self {
        self.created_after = Some(t);
        self
    }

    pub fn created_before(mut self, t: DateTime<Utc>) -> Self {
        self.created_before = Some(t);
        self
    }

    pub fn older_than(mut self, age: Duration) -> Self {
        self.older_than = Some(age);
        self
    }

    pub fn newer_than(mut self, age: Duration) -> Self {
        self.newer_than = Some(age);
        self
    }

    fn matches(&self, record: &TaskRecord, now: DateTime<Utc>) -> bool {
        if let Some(ns) = &self.namespace
            && record.namespace != *ns
        {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if !self.groups.is_empty() && !self.groups.contains(&record.group) {
            return false;
        }
        if !self.task_types.is_empty() && !self.task_types.contains(&record.task_type) {
            return false;
        }
        if let Some(needle) = &self.name_contains
            && !record
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase())
        {
            return false;
        }
        if let Some(t) = self.created_after
            && record.created_time <= t
        {
            return false;
        }
        if let Some(t) = self.created_before
            && record.created_time >= t
        {
            return false;
        }
        if let Some(age) = self.older_than
            && record.created_time >= now - chrono::Duration::from_std(age).unwrap_or_default()
        {
            return false;
        }
        if let Some(age) = self.newer_than
            && record.created_time <= now - chrono::Duration::from_std(age).unwrap_or_default()
        {
            return false;
        }
        true
    }
}

/// Record field to order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Name,
    Group,
    Namespace,
    TaskType,
    Status,
    CreatedTime,
    StartTime,
    EndTime,
    Duration,
    RetryCount,
}

/// Sort order; ties always break on id so results are stable.
#[derive(Debug, Clone, Copy)]
pub struct TaskSort {
    pub field: SortField,
    pub descending: bool,
}

impl TaskSort {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    fn compare(&self, a: &TaskRecord, b: &TaskRecord) -> Ordering {
        let primary = match self.field {
            SortField::Id => a.id.cmp(&b.id),
            SortField::Name => a.name.cmp(&b.name),
            SortField::Group => a.group.cmp(&b.group),
            SortField::Namespace => a.namespace.cmp(&b.namespace),
            SortField::TaskType => a.task_type.cmp(&b.task_type),
            SortField::Status => a.status.cmp(&b.status),
            SortField::CreatedTime => a.created_time.cmp(&b.created_time),
            SortField::StartTime => a.start_time.cmp(&b.start_time),
            SortField::EndTime => a.end_time.cmp(&b.end_time),
            SortField::Duration => match (a.duration, b.duration) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            SortField::RetryCount => a.retry_count.cmp(&b.retry_count),
        };
        let primary = if self.descending {
            primary.reverse()
        } else {
            primary
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Parse a relative duration of the form `"90s"`, `"15m"`, `"6h"`, `"7d"`.
pub fn parse_duration(s: &str) -> Result<Duration, EngineError> {
    let s = s.trim();
    let unit_at = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| EngineError::validation(format!("duration '{s}' is missing a unit")))?;
    let (digits, unit) = s.split_at(unit_at);
    let n: u64 = digits
        .parse()
        .map_err(|_| EngineError::validation(format!("unparsable duration '{s}'")))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86_400,
        _ => {
            return Err(EngineError::validation(format!(
                "unknown duration unit '{unit}' in '{s}'"
            )));
        }
    };
    Ok(Duration::from_secs(secs))
}

#[derive(Clone)]
pub struct QueryEngine {
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl QueryEngine {
    pub(crate) fn new(records: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { records, clock }
    }

    /// Filter, sort, truncate. Without an explicit sort, results come back in
    /// creation order.
    pub async fn find(
        &self,
        filter: &TaskFilter,
        sort: Option<TaskSort>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskRecord>, EngineError> {
        let now = self.clock.now();
        let mut hits = self.candidates(filter).await?;
        hits.retain(|record| filter.matches(record, now));

        let sort = sort.unwrap_or_else(|| TaskSort::asc(SortField::CreatedTime));
        hits.sort_by(|a, b| sort.compare(a, b));

        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    /// Lightweight mode: ids only.
    pub async fn find_ids(
        &self,
        filter: &TaskFilter,
        sort: Option<TaskSort>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskId>, EngineError> {
        Ok(self
            .find(filter, sort, limit)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    /// Status-scoped queries go through the status index instead of scanning
    /// the whole record store.
    async fn candidates(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, EngineError> {
        match (&filter.namespace, filter.statuses.as_slice()) {
            (Some(ns), statuses) if !statuses.is_empty() => {
                let mut records = Vec::new();
                for status in statuses {
                    for id in self.records.ids_with_status(ns, *status).await? {
                        if let Some(record) = self.records.fetch(id).await? {
                            records.push(record);
                        }
                    }
                }
                Ok(records)
            }
            (Some(ns), _) => self.records.list(ns).await,
            (None, _) => self.records.list_all().await,
        }
    }
}
