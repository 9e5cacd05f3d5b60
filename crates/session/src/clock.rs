use tokio::time::Instant;

/// Source of world time, in seconds since the session started.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct WorldClock {
    started: Instant,
}

impl WorldClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for WorldClock {
    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}
