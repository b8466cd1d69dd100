//! Loop detection (§4.6): a small ring buffer of recent tool-invocation
//! fingerprints. A fingerprint repeating too often within the window means
//! the model is stuck — the Session terminates rather than burning budget.

use std::collections::VecDeque;

use taskwright_core::types::Invocation;

/// Canonical fingerprint of one invocation: server + action + canonicalised
/// args for every child, independent of formatting. Two structurally
/// identical invocations serialize identically regardless of JSON key
/// order in the original tag body, since `serde_json::Map` orders keys.
pub fn fingerprint_invocation(invocation: &Invocation) -> String {
    serde_json::to_string(invocation).unwrap_or_default()
}

/// Fingerprint for a malformed tool block. Only identical malformed blocks
/// count toward a loop — distinct malformations do not compound (§9, Open
/// Questions).
pub fn fingerprint_parse_error(raw_block: &str) -> String {
    format!("parse_error:{}", raw_block.trim())
}

pub struct LoopDetector {
    window: usize,
    repeat_threshold: usize,
    ring: VecDeque<String>,
}

impl LoopDetector {
    pub fn new(window: usize, repeat_threshold: usize) -> Self {
        Self {
            window: window.max(1),
            repeat_threshold: repeat_threshold.max(1),
            ring: VecDeque::with_capacity(window),
        }
    }

    /// Record one fingerprint and report whether the window now shows a
    /// loop: the fingerprint recurs at least `repeat_threshold` times, or
    /// the full window is a single repeating fingerprint.
    pub fn record_and_check(&mut self, fingerprint: &str) -> bool {
        self.ring.push_back(fingerprint.to_string());
        while self.ring.len() > self.window {
            self.ring.pop_front();
        }

        let count = self.ring.iter().filter(|f| f.as_str() == fingerprint).count();
        if count >= self.repeat_threshold {
            return true;
        }
        if self.ring.len() == self.window && self.ring.iter().all(|f| f == fingerprint) {
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwright_core::types::{Payload, SingleCall};

    fn sample_invocation(code: &str) -> Invocation {
        Invocation::Single(SingleCall {
            server: "microsandbox".to_string(),
            action: "execute_python".to_string(),
            payload: Payload::Raw(code.to_string()),
        })
    }

    #[test]
    fn identical_invocations_fingerprint_identically() {
        let a = fingerprint_invocation(&sample_invocation("print(1)"));
        let b = fingerprint_invocation(&sample_invocation("print(1)"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_invocations_fingerprint_differently() {
        let a = fingerprint_invocation(&sample_invocation("print(1)"));
        let b = fingerprint_invocation(&sample_invocation("print(2)"));
        assert_ne!(a, b);
    }

    #[test]
    fn third_repeat_triggers_loop_detection() {
        let mut detector = LoopDetector::new(5, 3);
        assert!(!detector.record_and_check("x"));
        assert!(!detector.record_and_check("x"));
        assert!(detector.record_and_check("x"));
    }

    #[test]
    fn distinct_fingerprints_do_not_trigger() {
        let mut detector = LoopDetector::new(5, 3);
        assert!(!detector.record_and_check("a"));
        assert!(!detector.record_and_check("b"));
        assert!(!detector.record_and_check("c"));
        assert!(!detector.record_and_check("d"));
    }

    #[test]
    fn window_evicts_oldest() {
        let mut detector = LoopDetector::new(3, 3);
        assert!(!detector.record_and_check("a"));
        assert!(!detector.record_and_check("a"));
        assert!(!detector.record_and_check("b"));
        // "a" has aged out of the 3-wide window along with its second hit.
        assert!(!detector.record_and_check("b"));
    }
}
