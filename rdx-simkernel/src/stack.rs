//! The execution trace stack.
//!
//! Records the chain of currently active action activations, purely for
//! diagnostics. When enabled, every push emits one indented, human-readable
//! line to the configured sink, and every new instant emits a time marker.
//! The stack has no effect on scheduling and can be disabled entirely.

use crate::common::Time;
use colored::Colorize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::info;

/// The kind of activation a frame records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Start,
    Fire,
    Succeed,
    Fail,
    Cancel,
    Execute,
    Launch,
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Activation::Start => "start",
            Activation::Fire => "fire",
            Activation::Succeed => "succeed",
            Activation::Fail => "fail",
            Activation::Cancel => "cancel",
            Activation::Execute => "execute",
            Activation::Launch => "launch",
        };
        f.pad(label)
    }
}

/// Where trace lines go.
pub enum TraceSink {
    /// Forward each line to `tracing` under target `simkernel::trace`.
    Log,
    /// Append each line to a shared buffer.
    Capture(Rc<RefCell<Vec<String>>>),
    /// Hand each line to a closure.
    Custom(Box<dyn FnMut(&str)>),
}

#[derive(Debug, Clone)]
struct Frame {
    kind: Activation,
    subject: String,
}

/// The diagnostic activation stack.
pub struct Stack {
    enabled: bool,
    colored: bool,
    frames: Vec<Frame>,
    sink: TraceSink,
}

impl Stack {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            colored: true,
            frames: Vec::new(),
            sink: TraceSink::Log,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns tracing on or off. Turning it off discards the open frames.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.frames.clear();
        }
    }

    pub fn set_sink(&mut self, sink: TraceSink) {
        self.sink = sink;
    }

    /// Installs a capture sink with plain (uncoloured) lines and returns its buffer.
    pub fn capture(&mut self) -> Rc<RefCell<Vec<String>>> {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        self.colored = false;
        self.sink = TraceSink::Capture(buffer.clone());
        buffer
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Opens an activation frame and emits its trace line.
    pub fn push(&mut self, kind: Activation, action: &str, owner: Option<&str>) {
        if !self.enabled {
            return;
        }
        let indent = "  ".repeat(self.frames.len());
        let label = format!("{:<8}", kind);
        let label = if self.colored {
            match kind {
                Activation::Succeed => label.green().to_string(),
                Activation::Fail => label.red().to_string(),
                Activation::Cancel => label.yellow().to_string(),
                _ => label.cyan().to_string(),
            }
        } else {
            label
        };
        let line = match owner {
            Some(owner) => format!("{}{} {} [{}]", indent, label, action, owner),
            None => format!("{}{} {}", indent, label, action),
        };
        self.frames.push(Frame {
            kind,
            subject: action.to_string(),
        });
        self.emit(&line);
    }

    /// Closes the innermost frame.
    pub fn pop(&mut self) {
        if self.enabled {
            self.frames.pop();
        }
    }

    /// Emits a simulated-time marker for a new instant.
    pub fn mark_instant(&mut self, now: Time) {
        if !self.enabled {
            return;
        }
        let marker = format!("--- t={} ---", now);
        let marker = if self.colored {
            marker.bold().to_string()
        } else {
            marker
        };
        self.emit(&marker);
    }

    /// Describes the open frames, innermost last.
    pub fn frames(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|f| format!("{} {}", f.kind, f.subject))
            .collect()
    }

    fn emit(&mut self, line: &str) {
        match &mut self.sink {
            TraceSink::Log => info!(target: "simkernel::trace", "{}", line),
            TraceSink::Capture(buffer) => buffer.borrow_mut().push(line.to_string()),
            TraceSink::Custom(f) => f(line),
        }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_stack_is_silent() {
        let mut stack = Stack::new(false);
        let buffer = stack.capture();
        stack.push(Activation::Start, "Delay(5)", Some("root"));
        stack.mark_instant(5.0);
        assert!(buffer.borrow().is_empty());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_indentation_follows_depth() {
        let mut stack = Stack::new(true);
        let buffer = stack.capture();
        stack.push(Activation::Fire, "Delay(5)", Some("root.a"));
        stack.push(Activation::Succeed, "Delay(5)", Some("root.a"));
        stack.pop();
        stack.pop();
        stack.mark_instant(5.0);

        let lines = buffer.borrow();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("fire"));
        assert!(lines[0].ends_with("[root.a]"));
        assert!(lines[1].starts_with("  succeed"));
        assert_eq!(lines[2], "--- t=5 ---");
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_frames_snapshot() {
        let mut stack = Stack::new(true);
        let _buffer = stack.capture();
        stack.push(Activation::Start, "Chain", None);
        stack.push(Activation::Start, "Delay(1)", None);
        assert_eq!(stack.frames(), vec!["start Chain", "start Delay(1)"]);
        stack.set_enabled(false);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_custom_sink() {
        let seen = Rc::new(RefCell::new(0usize));
        let counter = seen.clone();
        let mut stack = Stack::new(true);
        stack.set_sink(TraceSink::Custom(Box::new(move |_| *counter.borrow_mut() += 1)));
        stack.mark_instant(1.0);
        assert_eq!(*seen.borrow(), 1);
    }
}
