#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Running,
}

/// Monotonic running time in steps, frozen while idle.
#[derive(Debug, Clone)]
pub struct SequencerClock {
    state: ClockState,
    running_time: f64,
}

impl Default for SequencerClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencerClock {
    pub fn new() -> Self {
        Self {
            state: ClockState::Idle,
            running_time: 0.0,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ClockState::Running
    }

    pub fn running_time(&self) -> f64 {
        self.running_time
    }

    /// Returns `true` if the clock was idle.
    pub fn start(&mut self) -> bool {
        let was_idle = self.state == ClockState::Idle;
        self.state = ClockState::Running;
        was_idle
    }

    /// Freezes time where it is. Returns `true` if the clock was running.
    pub fn pause(&mut self) -> bool {
        let was_running = self.is_running();
        self.state = ClockState::Idle;
        was_running
    }

    /// Like [`pause`](Self::pause), and also rewinds to zero.
    pub fn stop(&mut self) -> bool {
        let was_running = self.pause();
        self.running_time = 0.0;
        was_running
    }

    /// Moves time forward by `elapsed` steps. Returns the new time, or `None`
    /// while idle. Negative or non-finite quanta are ignored.
    pub fn advance(&mut self, elapsed: f64) -> Option<f64> {
        if !self.is_running() {
            return None;
        }
        if elapsed.is_finite() && elapsed > 0.0 {
            self.running_time += elapsed;
        }
        Some(self.running_time)
    }
}
