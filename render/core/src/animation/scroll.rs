//! Auto-scroll suspension
//!
//! Tracks whether the user has scrolled away from the bottom of a surface
//! while a reveal is running. Auto-scroll stops as soon as the user scrolls
//! further than the threshold, and resumes only when the last reported
//! distance is within the threshold and no scroll input has arrived for the
//! quiet period.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::surface::ScrollEvent;

/// Scroll-follow state for one reveal run
#[derive(Debug)]
pub struct ScrollTracker {
    threshold: u32,
    quiet_period: Duration,
    suspended: bool,
    last_distance: u32,
    last_input: Option<Instant>,
}

impl ScrollTracker {
    /// Create a tracker that follows the bottom until told otherwise
    #[must_use]
    pub fn new(threshold: u32, quiet_period: Duration) -> Self {
        Self {
            threshold,
            quiet_period,
            suspended: false,
            last_distance: 0,
            last_input: None,
        }
    }

    /// Record a user scroll report
    pub fn observe(&mut self, distance_from_bottom: u32, now: Instant) {
        self.last_distance = distance_from_bottom;
        self.last_input = Some(now);
        if distance_from_bottom > self.threshold {
            self.suspended = true;
        }
    }

    /// Drain pending reports from a surface subscription
    pub fn drain(&mut self, rx: &mut broadcast::Receiver<ScrollEvent>, now: Instant) {
        loop {
            match rx.try_recv() {
                Ok(event) => self.observe(event.distance_from_bottom, now),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::trace!(skipped, "Scroll reports lagged");
                }
                Err(_) => break,
            }
        }
    }

    /// Whether the animator should keep the bottom in view at `now`
    pub fn should_follow(&mut self, now: Instant) -> bool {
        if self.suspended {
            let quiet = self
                .last_input
                .map_or(true, |at| now.saturating_duration_since(at) >= self.quiet_period);
            if quiet && self.last_distance <= self.threshold {
                self.suspended = false;
            }
        }
        !self.suspended
    }

    /// Whether auto-scroll is currently suspended
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(800);

    #[test]
    fn test_follows_by_default() {
        let mut tracker = ScrollTracker::new(40, QUIET);
        assert!(tracker.should_follow(Instant::now()));
    }

    #[test]
    fn test_scrolling_away_suspends() {
        let start = Instant::now();
        let mut tracker = ScrollTracker::new(40, QUIET);
        tracker.observe(10, start);
        assert!(tracker.should_follow(start));

        tracker.observe(300, start);
        assert!(!tracker.should_follow(start + Duration::from_secs(5)));
        assert!(tracker.is_suspended());
    }

    #[test]
    fn test_resumes_after_quiet_period_near_bottom() {
        let start = Instant::now();
        let mut tracker = ScrollTracker::new(40, QUIET);
        tracker.observe(300, start);
        tracker.observe(20, start + Duration::from_millis(100));

        // Back near the bottom but still scrolling
        assert!(!tracker.should_follow(start + Duration::from_millis(500)));
        // Quiet long enough
        assert!(tracker.should_follow(start + Duration::from_millis(900)));
    }

    #[tokio::test]
    async fn test_drain_reads_surface_reports() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut tracker = ScrollTracker::new(40, QUIET);
        tx.send(ScrollEvent {
            distance_from_bottom: 500,
        })
        .unwrap();
        tracker.drain(&mut rx, Instant::now());
        assert!(tracker.is_suspended());
    }
}
