//! Weighted progress model.
//!
//! An audit is a fixed sequence of stages (`Task`s). Each stage carries a
//! weight proportional to how long it usually takes and counts its own
//! subtasks. `AuditTask` folds them into one percentage: finished stages
//! contribute their full weight, the first unfinished stage contributes the
//! fraction of its subtasks that are done, and later stages contribute
//! nothing.

/// The stages of one audit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    CalculateDownload,
    Download,
    ProcessDigests,
    ProcessLogs,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::CalculateDownload => "Calculating download size",
            Self::Download => "Downloading all CloudTrail files",
            Self::ProcessDigests => "Processing digest files",
            Self::ProcessLogs => "Processing log files",
        }
    }
}

/// One weighted stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub kind: TaskKind,
    /// Relative expected duration.
    pub weight: u32,
    pub total: u64,
    pub completed: u64,
}

impl Task {
    pub fn new(kind: TaskKind, weight: u32) -> Self {
        Self {
            kind,
            weight,
            total: 0,
            completed: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.label()
    }

    /// A stage with no subtasks yet is never finished.
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }

    /// Force the stage to finished. A stage with no subtasks gets one.
    pub fn mark_finished(&mut self) {
        if self.total == 0 {
            self.total = 1;
        }
        self.completed = self.total;
    }

    pub fn reset(&mut self) {
        self.total = 0;
        self.completed = 0;
    }

    pub fn add_subtasks(&mut self, count: u64) {
        self.total += count;
    }

    pub fn complete_subtasks(&mut self, count: u64) {
        self.completed += count;
    }

    /// Completed fraction in `[0, 1]`; zero when there are no subtasks.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed.min(self.total) as f64) / (self.total as f64)
    }
}

/// The ordered stages of one run.
#[derive(Debug, Clone, Default)]
pub struct AuditTask {
    tasks: Vec<Task>,
    /// Highest percentage handed out so far this run.
    reported: f64,
}

impl AuditTask {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            reported: 0.0,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, kind: TaskKind) -> Option<&Task> {
        self.tasks.iter().find(|t| t.kind == kind)
    }

    pub fn task_mut(&mut self, kind: TaskKind) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.kind == kind)
    }

    /// The first stage that is not finished.
    pub fn current_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| !t.is_finished())
    }

    /// Zero-based index of the current stage, or the stage count when all
    /// are finished.
    pub fn current_task_number(&self) -> usize {
        self.tasks
            .iter()
            .position(|t| !t.is_finished())
            .unwrap_or(self.tasks.len())
    }

    /// Weighted completion in `[0, 100]`.
    pub fn percent_complete(&self) -> f64 {
        let total: u64 = self.tasks.iter().map(|t| u64::from(t.weight)).sum();
        if total == 0 {
            return 0.0;
        }

        let mut done: f64 = self
            .tasks
            .iter()
            .filter(|t| t.is_finished())
            .map(|t| f64::from(t.weight))
            .sum();

        if let Some(current) = self.current_task() {
            done += f64::from(current.weight) * current.fraction();
        }

        (100.0 * done / total as f64).min(100.0)
    }

    /// The percentage to show an operator.
    ///
    /// Stages may discover more subtasks after they start, which would pull
    /// the raw figure backwards; the reported value never decreases within a
    /// run.
    pub fn reported_percent(&mut self) -> f64 {
        let raw = self.percent_complete();
        if raw > self.reported {
            self.reported = raw;
        }
        self.reported
    }

    pub fn finish_all(&mut self) {
        for task in &mut self.tasks {
            task.mark_finished();
        }
    }

    pub fn reset(&mut self) {
        for task in &mut self.tasks {
            task.reset();
        }
        self.reported = 0.0;
    }
}
