//! Input Debouncer.
//!
//! Each channel is a two-state machine driven by one sample per poll tick.
//! `Released -> Pressed` fires the bound action once, on the inactive to
//! active edge. `Pressed -> Released` is silent and only happens after the
//! level has read inactive for `release_samples` consecutive polls, so
//! contact bounce inside that window cannot produce a second press.

use std::time::Duration;

/// Source of sampled levels, `true` meaning active (pressed).
pub trait InputSource {
    fn is_active(&mut self, channel: usize) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Released,
    Pressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    pub release_samples: u32,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self { release_samples: 1 }
    }
}

impl DebouncePolicy {
    /// Number of polls needed to span `debounce`, at least one.
    pub fn from_timing(poll: Duration, debounce: Duration) -> Self {
        let poll = poll.as_micros().max(1);
        let samples = debounce.as_micros().div_ceil(poll).max(1);
        Self {
            release_samples: u32::try_from(samples).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Clone)]
struct Channel<A> {
    action: A,
    state: ChannelState,
    prev_active: bool,
    inactive_run: u32,
}

#[derive(Debug, Clone)]
pub struct Debouncer<A> {
    channels: Vec<Channel<A>>,
    policy: DebouncePolicy,
}

impl<A: Clone> Debouncer<A> {
    pub fn new(actions: impl IntoIterator<Item = A>, policy: DebouncePolicy) -> Self {
        let channels = actions
            .into_iter()
            .map(|action| Channel {
                action,
                state: ChannelState::Released,
                prev_active: false,
                inactive_run: 0,
            })
            .collect();
        Self { channels, policy }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn state(&self, channel: usize) -> Option<ChannelState> {
        self.channels.get(channel).map(|c| c.state)
    }

    /// Samples every channel once and returns the actions that fired, in
    /// channel order.
    pub fn poll(&mut self, source: &mut impl InputSource) -> Vec<A> {
        let mut fired = Vec::new();
        for (idx, ch) in self.channels.iter_mut().enumerate() {
            let active = source.is_active(idx);
            match ch.state {
                ChannelState::Released => {
                    if active && !ch.prev_active {
                        ch.state = ChannelState::Pressed;
                        ch.inactive_run = 0;
                        tracing::debug!(channel = idx, "Pressed");
                        fired.push(ch.action.clone());
                    }
                }
                ChannelState::Pressed => {
                    if active {
                        ch.inactive_run = 0;
                    } else {
                        ch.inactive_run += 1;
                        if ch.inactive_run >= self.policy.release_samples {
                            ch.state = ChannelState::Released;
                            ch.inactive_run = 0;
                            tracing::debug!(channel = idx, "Released");
                        }
                    }
                }
            }
            ch.prev_active = active;
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays one recorded level per poll for a single channel.
    struct Trace<'a> {
        levels: &'a [u8],
        at: usize,
    }

    impl InputSource for Trace<'_> {
        fn is_active(&mut self, _channel: usize) -> bool {
            let level = self.levels.get(self.at).copied().unwrap_or(0) != 0;
            self.at += 1;
            level
        }
    }

    fn run(levels: &[u8], policy: DebouncePolicy) -> usize {
        let mut d = Debouncer::new(["act"], policy);
        let mut src = Trace { levels, at: 0 };
        (0..levels.len()).map(|_| d.poll(&mut src).len()).sum()
    }

    #[test]
    fn held_press_fires_once() {
        assert_eq!(run(&[0, 1, 1, 1, 1, 1, 1, 1, 0, 0], DebouncePolicy::default()), 1);
    }

    #[test]
    fn idle_and_release_fire_nothing() {
        assert_eq!(run(&[0, 0, 0, 0], DebouncePolicy::default()), 0);

        let mut d = Debouncer::new(["act"], DebouncePolicy::default());
        let mut src = Trace { levels: &[1, 0, 0], at: 0 };
        assert_eq!(d.poll(&mut src), vec!["act"]);
        assert!(d.poll(&mut src).is_empty());
        assert_eq!(d.state(0), Some(ChannelState::Released));
        assert!(d.poll(&mut src).is_empty());
    }

    #[test]
    fn two_presses_fire_twice() {
        assert_eq!(run(&[1, 1, 0, 0, 1, 0], DebouncePolicy::default()), 2);
    }

    #[test]
    fn bounce_inside_release_window_is_one_press() {
        let policy = DebouncePolicy { release_samples: 3 };
        let bouncy = [0, 1, 0, 1, 0, 0, 1, 1, 0, 1, 0, 0, 0, 0];
        assert_eq!(run(&bouncy, policy), 1);
    }

    #[test]
    fn bounce_counts_per_poll_rate() {
        // same 20 ms window, sampled at 1 ms and at 10 ms
        let fast = DebouncePolicy::from_timing(Duration::from_millis(1), Duration::from_millis(20));
        assert_eq!(fast.release_samples, 20);
        let mut trace = vec![1u8, 0, 1, 0, 1, 0, 1, 0, 1];
        trace.extend(std::iter::repeat_n(1, 30));
        trace.extend(std::iter::repeat_n(0, 25));
        assert_eq!(run(&trace, fast), 1);

        let slow = DebouncePolicy::from_timing(Duration::from_millis(10), Duration::from_millis(20));
        assert_eq!(slow.release_samples, 2);
        assert_eq!(run(&[1, 1, 1, 0, 1, 0, 0, 0], slow), 1);
    }

    #[test]
    fn channels_fire_in_order() {
        struct Both;
        impl InputSource for Both {
            fn is_active(&mut self, _channel: usize) -> bool {
                true
            }
        }
        let mut d = Debouncer::new(["a", "b"], DebouncePolicy::default());
        assert_eq!(d.poll(&mut Both), vec!["a", "b"]);
        assert!(d.poll(&mut Both).is_empty());
    }
}
