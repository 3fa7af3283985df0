//! Setup session: one-time announcements and per-phase timings.
//!
//! A `SetupSession` is owned by the preconditioner and passed down the setup call chain. The
//! configuration banner is logged once for the lifetime of the session; every phase logs its
//! duration at debug level.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct SetupSession {
    rank: usize,
    announced: bool,
    current: Option<(&'static str, Instant)>,
    timings: Vec<(&'static str, Duration)>,
}

impl SetupSession {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            ..Self::default()
        }
    }

    /// Start a new setup: timings of the previous one are dropped.
    pub fn restart(&mut self, rank: usize) {
        self.rank = rank;
        self.current = None;
        self.timings.clear();
    }

    /// Log `message` at info level on rank 0, only the first time it is called. Returns
    /// whether this call was the first; `message` is built only if a logger takes it.
    pub fn announce<F: FnOnce() -> String>(&mut self, message: F) -> bool {
        if self.announced {
            return false;
        }
        self.announced = true;
        if self.rank == 0 {
            log::info!("{}", message());
        }
        true
    }

    pub fn already_announced(&self) -> bool {
        self.announced
    }

    pub fn begin(&mut self, phase: &'static str) {
        self.end();
        self.current = Some((phase, Instant::now()));
    }

    /// Close the running phase, if any.
    pub fn end(&mut self) {
        if let Some((phase, start)) = self.current.take() {
            let elapsed = start.elapsed();
            log::debug!("rank {}: {} took {:?}", self.rank, phase, elapsed);
            self.timings.push((phase, elapsed));
        }
    }

    pub fn timings(&self) -> &[(&'static str, Duration)] {
        &self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_is_announced_once_and_phases_are_recorded() {
        let mut s = SetupSession::new(0);
        assert!(!s.already_announced());
        assert!(s.announce(|| String::from("first")));
        assert!(s.already_announced());
        assert!(!s.announce(|| panic!("banner built twice")));
        s.begin("graph");
        s.begin("schur");
        s.end();
        let names: Vec<_> = s.timings().iter().map(|(p, _)| *p).collect();
        assert_eq!(names, vec!["graph", "schur"]);
        s.restart(0);
        assert!(s.timings().is_empty());
        assert!(s.already_announced());
    }

    #[test]
    fn only_the_first_announcement_counts_on_every_rank() {
        let mut s = SetupSession::new(3);
        assert!(s.announce(|| String::from("banner")));
        assert!(!s.announce(|| String::from("banner")));
    }
}
