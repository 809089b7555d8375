use std::time::Instant;

/// Receives "total work units" once and "units completed" events afterwards.
pub trait ProgressReporter {
    /// `None` when the total is not known up front.
    fn start(&mut self, total: Option<usize>);
    fn advance(&mut self, by: usize);

    /// Short status text, e.g. how many workers are still busy.
    fn describe(&mut self, _status: &str) {}

    fn finish(&mut self) {}
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&mut self, _total: Option<usize>) {}
    fn advance(&mut self, _by: usize) {}
}

/// Writes progress lines to the log every `step` completed units and on finish.
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    step: usize,
    total: Option<usize>,
    done: usize,
    last_logged: usize,
    status: String,
    started: Option<Instant>,
}

impl LogProgress {
    pub fn new(label: impl Into<String>, step: usize) -> Self {
        Self {
            label: label.into(),
            step: step.max(1),
            total: None,
            done: 0,
            last_logged: 0,
            status: String::new(),
            started: None,
        }
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    fn line(&self) -> String {
        let elapsed = self.started.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        let count = match self.total {
            Some(total) => format!("{}/{}", self.done, total),
            None => format!("{}/?", self.done),
        };
        if self.status.is_empty() {
            format!("[{}] {} in {:.2}s", self.label, count, elapsed)
        } else {
            format!("[{}] {} in {:.2}s ({})", self.label, count, elapsed, self.status)
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new("map", 100)
    }
}

impl ProgressReporter for LogProgress {
    fn start(&mut self, total: Option<usize>) {
        self.total = total;
        self.done = 0;
        self.last_logged = 0;
        self.started = Some(Instant::now());
        log::info!("{}", self.line());
    }

    fn advance(&mut self, by: usize) {
        self.done += by;
        if self.done - self.last_logged >= self.step {
            self.last_logged = self.done;
            log::info!("{}", self.line());
        }
    }

    fn describe(&mut self, status: &str) {
        self.status = status.to_string();
    }

    fn finish(&mut self) {
        log::info!("{}", self.line());
    }
}
