use std::collections::HashMap;

use offcanvas_wire::{CallKind, Value};

use crate::error::{Error, Result};
use crate::members::{self, MemberKind, Returns};

/// The 2D drawing surface as seen by every layer of the runtime.
///
/// Implementations receive calls already validated against
/// [`members::CONTEXT_2D`] when they come through a proxy, but must still
/// reject unknown members when driven directly.
pub trait Context2d {
    /// Invoke a method. Query methods return their result.
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Option<Value>>;

    /// Write a property.
    fn set(&mut self, property: &str, value: Value) -> Result<()>;

    /// Read a property.
    fn get(&self, property: &str) -> Result<Option<Value>>;
}

/// One observed mutation of a [`SoftwareContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Call { name: String, args: Vec<Value> },
    Set { name: String, value: Value },
}

impl Op {
    pub fn name(&self) -> &str {
        match self {
            Self::Call { name, .. } | Self::Set { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
struct DrawingState {
    properties: HashMap<&'static str, Value>,
    line_dash: Vec<f32>,
}

impl Default for DrawingState {
    fn default() -> Self {
        Self {
            properties: members::properties().collect(),
            line_dash: Vec::new(),
        }
    }
}

/// Headless 2D context that keeps drawing state and records what it is asked
/// to do instead of rasterising.
#[derive(Debug, Clone)]
pub struct SoftwareContext {
    state: DrawingState,
    stack: Vec<DrawingState>,
    log: Vec<Op>,
    recording: bool,
}

impl Default for SoftwareContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareContext {
    pub fn new() -> Self {
        Self {
            state: DrawingState::default(),
            stack: Vec::new(),
            log: Vec::new(),
            recording: true,
        }
    }

    /// A context that tracks state but keeps no log.
    pub fn unrecorded() -> Self {
        Self {
            recording: false,
            ..Self::new()
        }
    }

    pub fn log(&self) -> &[Op] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.log)
    }

    /// Depth of the `save` stack.
    pub fn saved_states(&self) -> usize {
        self.stack.len()
    }

    fn record(&mut self, op: Op) {
        if self.recording {
            self.log.push(op);
        }
    }

    fn line_dash(&self) -> Value {
        let dash = &self.state.line_dash;
        if dash.len() % 2 == 1 {
            Value::floats(dash.iter().chain(dash.iter()).copied())
        } else {
            Value::floats(dash.iter().copied())
        }
    }

    /// Rough advance width: half an em per character.
    fn measure(&self, text: &str) -> f32 {
        let font = self
            .state
            .properties
            .get("font")
            .and_then(Value::as_str)
            .unwrap_or("10px sans-serif");
        let size = font
            .split_whitespace()
            .find_map(|token| token.strip_suffix("px")?.parse::<f32>().ok())
            .unwrap_or(10.0);
        text.chars().count() as f32 * size * 0.5
    }
}

impl Context2d for SoftwareContext {
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Option<Value>> {
        let member = members::check(method, CallKind::Call, args)?;

        let result = match member.name {
            "save" => {
                self.stack.push(self.state.clone());
                None
            }
            "restore" => {
                // Unbalanced restores are ignored, as on a real canvas.
                if let Some(previous) = self.stack.pop() {
                    self.state = previous;
                }
                None
            }
            "setLineDash" => {
                if let Some(Value::Array(items)) = args.first() {
                    let dash: Vec<f32> = items.iter().filter_map(Value::as_f32).collect();
                    // Negative or non-finite entries leave the dash untouched.
                    if dash.iter().all(|v| v.is_finite() && *v >= 0.0) {
                        self.state.line_dash = dash;
                    }
                }
                None
            }
            "getLineDash" => Some(self.line_dash()),
            "measureText" => {
                let text = args.first().and_then(Value::as_str).unwrap_or_default();
                Some(Value::Float32(self.measure(text)))
            }
            _ => match member.kind {
                MemberKind::Method {
                    returns: Returns::Flag,
                    ..
                } => Some(Value::from(false)),
                MemberKind::Method {
                    returns: Returns::Number,
                    ..
                } => Some(Value::Float32(0.0)),
                _ => None,
            },
        };

        self.record(Op::Call {
            name: member.name.to_string(),
            args: args.to_vec(),
        });
        Ok(result)
    }

    fn set(&mut self, property: &str, value: Value) -> Result<()> {
        let member = members::check(property, CallKind::Set, std::slice::from_ref(&value))?;
        self.state.properties.insert(member.name, value.clone());
        self.record(Op::Set {
            name: member.name.to_string(),
            value,
        });
        Ok(())
    }

    fn get(&self, property: &str) -> Result<Option<Value>> {
        let member = members::check(property, CallKind::Get, &[])?;
        self.state
            .properties
            .get(member.name)
            .cloned()
            .map(Some)
            .ok_or_else(|| Error::UnknownMember(property.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_start_at_their_initial_values() {
        let ctx = SoftwareContext::new();
        assert_eq!(ctx.get("fillStyle").unwrap(), Some(Value::str("#000000")));
        assert_eq!(ctx.get("lineWidth").unwrap(), Some(Value::Float32(1.0)));
        assert_eq!(
            ctx.get("imageSmoothingEnabled").unwrap(),
            Some(Value::SmallInt(1))
        );
        assert!(matches!(ctx.get("strokeRect"), Err(Error::WrongCallKind { .. })));
    }

    #[test]
    fn save_restore_round_trips_state() {
        let mut ctx = SoftwareContext::new();
        ctx.set("fillStyle", Value::str("red")).unwrap();
        ctx.call("save", &[]).unwrap();
        ctx.set("fillStyle", Value::str("blue")).unwrap();
        ctx.call("setLineDash", &[Value::floats([4.0, 2.0])]).unwrap();
        assert_eq!(ctx.saved_states(), 1);

        ctx.call("restore", &[]).unwrap();
        assert_eq!(ctx.get("fillStyle").unwrap(), Some(Value::str("red")));
        assert_eq!(
            ctx.call("getLineDash", &[]).unwrap(),
            Some(Value::Array(Vec::new()))
        );

        // Extra restore is a no-op.
        ctx.call("restore", &[]).unwrap();
        assert_eq!(ctx.get("fillStyle").unwrap(), Some(Value::str("red")));
    }

    #[test]
    fn odd_line_dash_is_doubled() {
        let mut ctx = SoftwareContext::new();
        ctx.call("setLineDash", &[Value::floats([5.0, 10.0, 15.0])])
            .unwrap();
        assert_eq!(
            ctx.call("getLineDash", &[]).unwrap(),
            Some(Value::floats([5.0, 10.0, 15.0, 5.0, 10.0, 15.0]))
        );

        ctx.call("setLineDash", &[Value::floats([1.0, -1.0])]).unwrap();
        assert_eq!(
            ctx.call("getLineDash", &[]).unwrap(),
            Some(Value::floats([5.0, 10.0, 15.0, 5.0, 10.0, 15.0]))
        );
    }

    #[test]
    fn log_records_calls_and_writes_in_order() {
        let mut ctx = SoftwareContext::new();
        ctx.set("fillStyle", Value::str("red")).unwrap();
        ctx.call(
            "strokeRect",
            &[
                Value::Float32(37.5),
                Value::Float32(70.0),
                Value::Float32(75.0),
                Value::Float32(55.0),
            ],
        )
        .unwrap();
        let names: Vec<&str> = ctx.log().iter().map(Op::name).collect();
        assert_eq!(names, ["fillStyle", "strokeRect"]);

        let mut quiet = SoftwareContext::unrecorded();
        quiet.call("beginPath", &[]).unwrap();
        assert!(quiet.log().is_empty());
    }

    #[test]
    fn measure_text_scales_with_font() {
        let mut ctx = SoftwareContext::new();
        let narrow = ctx.call("measureText", &[Value::str("abcd")]).unwrap();
        ctx.set("font", Value::str("bold 20px serif")).unwrap();
        let wide = ctx.call("measureText", &[Value::str("abcd")]).unwrap();
        assert_eq!(narrow, Some(Value::Float32(20.0)));
        assert_eq!(wide, Some(Value::Float32(40.0)));
    }

    #[test]
    fn rejected_calls_leave_no_trace() {
        let mut ctx = SoftwareContext::new();
        assert!(ctx.call("fillRect", &[Value::Float32(1.0)]).is_err());
        assert!(ctx.call("createPattern", &[]).is_err());
        assert!(ctx.log().is_empty());
    }
}
