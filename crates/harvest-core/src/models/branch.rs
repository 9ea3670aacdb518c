use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// Activity observed on one branch within the trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub commits: u64,
    pub pushes: u64,
    pub additions: u64,
    pub deletions: u64,
}

impl ActivitySample {
    pub fn commits(commits: u64) -> Self {
        Self {
            commits,
            ..Self::default()
        }
    }

    pub fn with_lines(mut self, additions: u64, deletions: u64) -> Self {
        self.additions = additions;
        self.deletions = deletions;
        self
    }

    pub fn line_delta(&self) -> u64 {
        self.additions.saturating_add(self.deletions)
    }

    pub fn is_idle(&self) -> bool {
        self.commits == 0 && self.pushes == 0 && self.line_delta() == 0
    }
}

impl std::ops::Add for ActivitySample {
    type Output = ActivitySample;

    fn add(self, rhs: Self) -> Self::Output {
        ActivitySample {
            commits: self.commits.saturating_add(rhs.commits),
            pushes: self.pushes.saturating_add(rhs.pushes),
            additions: self.additions.saturating_add(rhs.additions),
            deletions: self.deletions.saturating_add(rhs.deletions),
        }
    }
}

impl std::iter::Sum for ActivitySample {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ActivitySample::default(), |acc, s| acc + s)
    }
}

/// A branch plus whatever activity was sampled for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    /// Size reported by the platform for this branch, when it reports one.
    pub size: Option<u64>,
    /// Set when the platform flags this branch as the repository default.
    pub is_default: bool,
    pub activity: Vec<ActivitySample>,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            is_default: false,
            activity: Vec::new(),
        }
    }

    pub fn default_branch(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_activity(mut self, sample: ActivitySample) -> Self {
        self.activity.push(sample);
        self
    }

    /// All samples folded together.
    pub fn total_activity(&self) -> ActivitySample {
        self.activity.iter().copied().sum()
    }
}

/// The trailing time window activity is sampled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl ActivityWindow {
    /// Window covering the `months` months that end at `now`.
    pub fn trailing_months(months: u32, now: DateTime<Utc>) -> Self {
        let since = now
            .checked_sub_months(Months::new(months))
            .unwrap_or_else(|| now - Duration::days(30 * i64::from(months)));
        Self { since, until: now }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.since && at <= self.until
    }

    /// `since` formatted for query strings.
    pub fn since_rfc3339(&self) -> String {
        self.since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }

    /// `until` formatted for query strings.
    pub fn until_rfc3339(&self) -> String {
        self.until.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_trailing_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let window = ActivityWindow::trailing_months(1, now);
        assert_eq!(window.since, Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap());
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(window.until_rfc3339(), "2024-03-31T12:00:00Z");
    }

    #[test]
    fn test_activity_sum() {
        let branch = Branch::new("dev")
            .with_activity(ActivitySample::commits(2).with_lines(10, 1))
            .with_activity(ActivitySample::commits(3).with_lines(5, 4));
        let total = branch.total_activity();
        assert_eq!(total.commits, 5);
        assert_eq!(total.line_delta(), 20);
        assert!(!total.is_idle());
        assert!(Branch::new("main").total_activity().is_idle());
    }
}
