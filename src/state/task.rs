use url::Url;

/// One URL admitted to a run
///
/// A task is owned by exactly one worker at a time. The worker increments
/// `attempt_count` for every attempt and records the proxy each attempt used;
/// the task is dropped once it reaches a terminal outcome.
#[derive(Debug, Clone)]
pub struct FetchTask {
    /// Normalized URL to fetch
    pub url: Url,

    /// Host key used for pacing and robots lookups
    pub host: String,

    /// Attempts made so far
    pub attempt_count: u32,

    /// Upper bound on attempts (`max_retries + 1`)
    pub max_attempts: u32,

    /// Queue priority; lower values are served first
    pub priority: u32,

    /// Pages followed from the seed to reach this task (seed = 0)
    pub depth: u32,

    /// Page whose "next" link produced this task
    pub parent: Option<Url>,

    /// Identifier of the pagination lineage this task belongs to
    pub lineage: usize,

    /// Proxy address used by the most recent attempt
    pub assigned_proxy: Option<String>,
}

impl FetchTask {
    /// Creates a task for a seed URL, starting a new lineage
    pub fn seed(url: Url, host: String, lineage: usize, max_attempts: u32) -> Self {
        Self {
            url,
            host,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            priority: 0,
            depth: 0,
            parent: None,
            lineage,
            assigned_proxy: None,
        }
    }

    /// Creates the follow-on task for the next page of this task's lineage
    ///
    /// The child inherits the lineage, priority and attempt budget, carries
    /// this task's URL as its parent, and sits one level deeper. Depth does
    /// not lower the priority, so a lineage keeps its place in arrival order
    /// while new seeds stream in.
    pub fn next_page(&self, url: Url, host: String) -> Self {
        let depth = self.depth + 1;
        Self {
            url,
            host,
            attempt_count: 0,
            max_attempts: self.max_attempts,
            priority: self.priority,
            depth,
            parent: Some(self.url.clone()),
            lineage: self.lineage,
            assigned_proxy: None,
        }
    }

    /// Returns true if another attempt is within budget
    pub fn can_attempt(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Marks the start of an attempt and returns its 1-based number
    pub fn begin_attempt(&mut self, proxy: Option<String>) -> u32 {
        self.attempt_count += 1;
        self.assigned_proxy = proxy;
        self.attempt_count
    }

    /// Returns the number of attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempt_count.saturating_sub(1)
    }
}
