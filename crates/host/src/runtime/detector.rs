//! No-progress detection over a rolling window of tool calls. Qualifying
//! patterns produce a corrective directive the agent injects before the
//! next model call; the detector never terminates anything.

use std::collections::VecDeque;

use minder_domain::config::DetectorConfig;
use minder_domain::tool::ToolCall;

/// Why the detector fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Repeat,
    Oscillation,
    Stall,
}

pub struct LoopDetector {
    config: DetectorConfig,
    /// (tool_name, canonical_args) of the most recent calls.
    window: VecDeque<(String, String)>,
    stall_steps: usize,
    last_text: String,
}

impl LoopDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            stall_steps: 0,
            last_text: String::new(),
        }
    }

    /// Feed one completed step (assistant text + tool calls issued).
    /// Returns a directive when a qualifying pattern is present.
    pub fn observe(&mut self, assistant_text: &str, calls: &[ToolCall]) -> Option<String> {
        for call in calls {
            self.window
                .push_back((call.name.clone(), canonical_args(call)));
            while self.window.len() > self.config.window {
                self.window.pop_front();
            }
        }

        let trimmed = assistant_text.trim();
        if !calls.is_empty() && (trimmed.is_empty() || trimmed == self.last_text) {
            self.stall_steps += 1;
        } else {
            self.stall_steps = 0;
        }
        self.last_text = trimmed.to_string();

        self.signal().map(|s| self.directive(s))
    }

    fn signal(&self) -> Option<Signal> {
        // Repeat: identical (tool, args) at least repeat_threshold times.
        for (name, args) in &self.window {
            let count = self
                .window
                .iter()
                .filter(|(n, a)| n == name && a == args)
                .count();
            if count >= self.config.repeat_threshold {
                return Some(Signal::Repeat);
            }
        }

        // Oscillation: A,B,A,B over the last four calls with A != B.
        if self.window.len() >= 4 {
            let tail: Vec<_> = self.window.iter().rev().take(4).collect();
            if tail[0] == tail[2] && tail[1] == tail[3] && tail[0] != tail[1] {
                return Some(Signal::Oscillation);
            }
        }

        if self.stall_steps >= self.config.stall_threshold {
            return Some(Signal::Stall);
        }

        None
    }

    fn directive(&self, signal: Signal) -> String {
        let observed = match signal {
            Signal::Repeat => "You have issued the same tool call several times without progress.",
            Signal::Oscillation => {
                "You are alternating between the same two tool calls without progress."
            }
            Signal::Stall => "Recent steps have produced no new reasoning or output.",
        };
        format!(
            "{observed} Change your approach: try a different tool or different arguments, \
             ask the user for guidance, or finish with your best answer now."
        )
    }
}

/// Canonical argument form: serialized JSON with object keys sorted
/// (serde_json's default map ordering).
fn canonical_args(call: &ToolCall) -> String {
    call.arguments.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "tc".into(),
            name: name.into(),
            arguments: args,
        }
    }

    fn detector() -> LoopDetector {
        LoopDetector::new(DetectorConfig::default())
    }

    #[test]
    fn repeat_fires_at_threshold() {
        let mut d = detector();
        let repeated = || call("shell", serde_json::json!({"command": "ls"}));

        assert!(d.observe("checking", &[repeated()]).is_none());
        assert!(d.observe("checking again", &[repeated()]).is_none());
        let nudge = d.observe("once more", &[repeated()]);
        assert!(nudge.is_some());
        assert!(nudge.unwrap().contains("same tool call"));
    }

    #[test]
    fn key_order_does_not_defeat_repeat_detection() {
        let mut d = detector();
        assert!(d
            .observe("a", &[call("f", serde_json::json!({"a": 1, "b": 2}))])
            .is_none());
        assert!(d
            .observe("b", &[call("f", serde_json::json!({"b": 2, "a": 1}))])
            .is_none());
        assert!(d
            .observe("c", &[call("f", serde_json::json!({"a": 1, "b": 2}))])
            .is_some());
    }

    #[test]
    fn distinct_calls_do_not_fire() {
        let mut d = detector();
        for i in 0..6 {
            let nudge = d.observe(
                &format!("step {i}"),
                &[call("shell", serde_json::json!({"command": format!("cmd {i}")}))],
            );
            assert!(nudge.is_none(), "fired at step {i}");
        }
    }

    #[test]
    fn oscillation_fires_on_two_cycles() {
        let mut d = detector();
        let a = || call("read_file", serde_json::json!({"path": "a"}));
        let b = || call("read_file", serde_json::json!({"path": "b"}));

        assert!(d.observe("1", &[a()]).is_none());
        assert!(d.observe("2", &[b()]).is_none());
        assert!(d.observe("3", &[a()]).is_none());
        let nudge = d.observe("4", &[b()]);
        assert!(nudge.is_some());
        assert!(nudge.unwrap().contains("alternating"));
    }

    #[test]
    fn stall_fires_after_empty_text_steps() {
        let mut d = detector();
        for i in 0..3 {
            let nudge = d.observe(
                "",
                &[call("shell", serde_json::json!({"command": format!("c{i}")}))],
            );
            assert!(nudge.is_none(), "fired early at {i}");
        }
        let nudge = d.observe(
            "",
            &[call("shell", serde_json::json!({"command": "c3"}))],
        );
        assert!(nudge.is_some());
    }

    #[test]
    fn fresh_text_resets_stall() {
        let mut d = detector();
        for _ in 0..3 {
            d.observe("", &[call("x", serde_json::json!({"n": 1}))]);
        }
        d.observe("found something new", &[call("y", serde_json::json!({"n": 2}))]);
        let nudge = d.observe("", &[call("z", serde_json::json!({"n": 3}))]);
        assert!(nudge.is_none());
    }

    #[test]
    fn final_text_step_never_nudges() {
        let mut d = detector();
        assert!(d.observe("all done", &[]).is_none());
    }
}
