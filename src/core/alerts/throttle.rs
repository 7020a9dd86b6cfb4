use std::collections::HashMap;

/// Sliding one-hour token buckets for the push channel: at most 10 pushes an
/// hour fleet-wide and 3 an hour per agent. Both must admit.
pub struct PushBuckets {
    window_secs: u64,
    global_cap: usize,
    agent_cap: usize,
    global: Vec<u64>,
    per_agent: HashMap<String, Vec<u64>>,
}

impl PushBuckets {
    pub fn new() -> Self {
        Self {
            window_secs: 3_600,
            global_cap: 10,
            agent_cap: 3,
            global: Vec::new(),
            per_agent: HashMap::new(),
        }
    }

    pub fn try_acquire(&mut self, agent_id: &str, now: u64) -> bool {
        let cutoff = now.saturating_sub(self.window_secs);
        self.global.retain(|&t| t > cutoff);
        let agent = self.per_agent.entry(agent_id.to_string()).or_default();
        agent.retain(|&t| t > cutoff);

        if self.global.len() >= self.global_cap || agent.len() >= self.agent_cap {
            return false;
        }
        self.global.push(now);
        agent.push(now);
        true
    }
}

impl Default for PushBuckets {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of admitting one in-app delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum InAppAdmit {
    /// Deliver an individual message.
    Deliver,
    /// The rate tipped over; a digest window just opened and this event was
    /// absorbed into it. The caller owes a flush in 60 s.
    DigestOpened,
    /// Absorbed into the already-open digest window.
    Digested,
}

struct DigestWindow {
    until: u64,
    entries: Vec<String>,
}

/// Rate-aware coalescing for the in-app channel: after more than 5 deliveries
/// for one agent inside 60 s, further events in the next 60 s merge into a
/// single digest.
pub struct InAppCoalescer {
    window_secs: u64,
    burst_cap: usize,
    recent: HashMap<String, Vec<u64>>,
    digests: HashMap<String, DigestWindow>,
}

impl InAppCoalescer {
    pub fn new() -> Self {
        Self {
            window_secs: 60,
            burst_cap: 5,
            recent: HashMap::new(),
            digests: HashMap::new(),
        }
    }

    pub fn admit(&mut self, agent_id: &str, now: u64, line: String) -> InAppAdmit {
        if let Some(window) = self.digests.get_mut(agent_id) {
            if now < window.until {
                window.entries.push(line);
                return InAppAdmit::Digested;
            }
            // An expired window that was never flushed is abandoned.
            self.digests.remove(agent_id);
        }

        let cutoff = now.saturating_sub(self.window_secs);
        let recent = self.recent.entry(agent_id.to_string()).or_default();
        recent.retain(|&t| t > cutoff);

        if recent.len() >= self.burst_cap {
            self.digests.insert(
                agent_id.to_string(),
                DigestWindow {
                    until: now + self.window_secs,
                    entries: vec![line],
                },
            );
            return InAppAdmit::DigestOpened;
        }

        recent.push(now);
        InAppAdmit::Deliver
    }

    /// Drain the open digest window for `agent_id`, if any.
    pub fn take_digest(&mut self, agent_id: &str) -> Vec<String> {
        self.digests
            .remove(agent_id)
            .map(|w| w.entries)
            .unwrap_or_default()
    }
}

impl Default for InAppCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_agent_push_cap_is_three_per_hour() {
        let mut buckets = PushBuckets::new();
        for i in 0..3 {
            assert!(buckets.try_acquire("a1", 100 + i), "push {i} should pass");
        }
        assert!(!buckets.try_acquire("a1", 110));
        // Another agent still has budget.
        assert!(buckets.try_acquire("a2", 110));
        // The window slides: an hour later the agent may push again.
        assert!(buckets.try_acquire("a1", 100 + 3_601));
    }

    #[test]
    fn global_push_cap_is_ten_per_hour() {
        let mut buckets = PushBuckets::new();
        let mut granted = 0;
        for agent in 0..6 {
            for _ in 0..2 {
                if buckets.try_acquire(&format!("a{agent}"), 50) {
                    granted += 1;
                }
            }
        }
        assert_eq!(granted, 10);
    }

    #[test]
    fn burst_of_six_opens_a_digest() {
        let mut coalescer = InAppCoalescer::new();
        for i in 0..5 {
            assert_eq!(
                coalescer.admit("a1", 100 + i, format!("m{i}")),
                InAppAdmit::Deliver
            );
        }
        assert_eq!(
            coalescer.admit("a1", 106, "m5".into()),
            InAppAdmit::DigestOpened
        );
        assert_eq!(coalescer.admit("a1", 120, "m6".into()), InAppAdmit::Digested);

        let digest = coalescer.take_digest("a1");
        assert_eq!(digest, vec!["m5".to_string(), "m6".to_string()]);
        assert!(coalescer.take_digest("a1").is_empty());
    }

    #[test]
    fn digest_window_closes_after_sixty_seconds() {
        let mut coalescer = InAppCoalescer::new();
        for i in 0..6 {
            coalescer.admit("a1", 100 + i, format!("m{i}"));
        }
        // Past the window the agent delivers individually again.
        assert_eq!(
            coalescer.admit("a1", 100 + 5 + 61, "late".into()),
            InAppAdmit::Deliver
        );
    }

    #[test]
    fn slow_stream_never_digests() {
        let mut coalescer = InAppCoalescer::new();
        for i in 0..20 {
            assert_eq!(
                coalescer.admit("a1", i * 61, format!("m{i}")),
                InAppAdmit::Deliver
            );
        }
    }
}
