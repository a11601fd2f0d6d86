//! Data-driven description of the 2D context surface.
//!
//! Every layer (proxy, polyfill, consumer, software surface) dispatches on this
//! table instead of carrying one wrapper per drawing operation.

use std::collections::HashMap;
use std::sync::OnceLock;

use offcanvas_wire::{CallKind, Value};

use crate::error::{Error, Result};

/// Argument shape accepted at one parameter position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// `Float32`, or `SmallInt` for integral values.
    Number,
    Text,
    /// `SmallInt` 0 or 1.
    Flag,
    /// `Array` of numbers.
    NumberList,
    /// `OpaqueRef` to the resource the call is addressed to.
    Context,
}

impl Param {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Number => "a number",
            Self::Text => "a string",
            Self::Flag => "a flag (0 or 1)",
            Self::NumberList => "an array of numbers",
            Self::Context => "a context reference",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Self::Number, Value::Float32(_) | Value::SmallInt(_)) => true,
            (Self::Text, Value::Str(_)) => true,
            (Self::Flag, Value::SmallInt(v)) => *v <= 1,
            (Self::NumberList, Value::Array(items)) => {
                items.iter().all(|item| Self::Number.accepts(item))
            }
            (Self::Context, Value::OpaqueRef) => true,
            _ => false,
        }
    }
}

/// Initial value of a property on a fresh context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initial {
    Number(f32),
    Text(&'static str),
    Flag(bool),
}

impl Initial {
    pub fn value(self) -> Value {
        match self {
            Self::Number(v) => Value::Float32(v),
            Self::Text(s) => Value::str(s),
            Self::Flag(b) => Value::from(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    Nothing,
    Number,
    Flag,
    NumberList,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemberKind {
    Method {
        params: &'static [Param],
        /// Leading parameters that must be present; the rest are optional.
        required: usize,
        returns: Returns,
    },
    Property {
        param: Param,
        initial: Initial,
    },
    /// Part of the surface but not expressible over the transport.
    Unsupported { reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Member {
    pub name: &'static str,
    pub kind: MemberKind,
}

impl Member {
    /// Validate a call against this member's shape.
    pub fn check(&'static self, kind: CallKind, args: &[Value]) -> Result<()> {
        match (self.kind, kind) {
            (MemberKind::Unsupported { reason }, _) => Err(Error::Unsupported {
                member: self.name,
                reason,
            }),
            (
                MemberKind::Method {
                    params, required, ..
                },
                CallKind::Call,
            ) => {
                if args.len() < required || args.len() > params.len() {
                    return Err(Error::ArgumentCount {
                        member: self.name,
                        min: required,
                        max: params.len(),
                        got: args.len(),
                    });
                }
                check_shapes(self.name, params, args)
            }
            (MemberKind::Property { .. }, CallKind::Get) => {
                if args.is_empty() {
                    Ok(())
                } else {
                    Err(Error::ArgumentCount {
                        member: self.name,
                        min: 0,
                        max: 0,
                        got: args.len(),
                    })
                }
            }
            (MemberKind::Property { param, .. }, CallKind::Set) => {
                if args.len() != 1 {
                    return Err(Error::ArgumentCount {
                        member: self.name,
                        min: 1,
                        max: 1,
                        got: args.len(),
                    });
                }
                check_shapes(self.name, &[param], args)
            }
            (_, kind) => Err(Error::WrongCallKind {
                member: self.name,
                kind,
            }),
        }
    }

    pub fn is_property(&self) -> bool {
        matches!(self.kind, MemberKind::Property { .. })
    }
}

fn check_shapes(member: &'static str, params: &[Param], args: &[Value]) -> Result<()> {
    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        if !param.accepts(arg) {
            return Err(Error::ArgumentShape {
                member,
                index,
                expected: param.describe(),
            });
        }
    }
    Ok(())
}

use Param::{Context, Flag, Number, NumberList, Text};

const NONE: &[Param] = &[];
const N1: &[Param] = &[Number];
const N2: &[Param] = &[Number; 2];
const N4: &[Param] = &[Number; 4];
const N5: &[Param] = &[Number; 5];
const N6: &[Param] = &[Number; 6];
const TEXT_AT: &[Param] = &[Text, Number, Number, Number];
const ARC: &[Param] = &[Number, Number, Number, Number, Number, Flag];
const ELLIPSE: &[Param] = &[
    Number, Number, Number, Number, Number, Number, Number, Flag,
];
const TEXT: &[Param] = &[Text];
const FILL_RULE: &[Param] = &[Text];
const POINT_IN_PATH: &[Param] = &[Number, Number, Text];
const DRAW_IMAGE: &[Param] = &[Context, Number, Number, Number, Number];

const fn method(name: &'static str, params: &'static [Param], required: usize) -> Member {
    Member {
        name,
        kind: MemberKind::Method {
            params,
            required,
            returns: Returns::Nothing,
        },
    }
}

const fn query(
    name: &'static str,
    params: &'static [Param],
    required: usize,
    returns: Returns,
) -> Member {
    Member {
        name,
        kind: MemberKind::Method {
            params,
            required,
            returns,
        },
    }
}

const fn prop(name: &'static str, param: Param, initial: Initial) -> Member {
    Member {
        name,
        kind: MemberKind::Property { param, initial },
    }
}

const fn unsupported(name: &'static str, reason: &'static str) -> Member {
    Member {
        name,
        kind: MemberKind::Unsupported { reason },
    }
}

pub static CONTEXT_2D: &[Member] = &[
    // Rectangles.
    method("clearRect", N4, 4),
    method("fillRect", N4, 4),
    method("strokeRect", N4, 4),
    // Text.
    method("fillText", TEXT_AT, 3),
    method("strokeText", TEXT_AT, 3),
    query("measureText", TEXT, 1, Returns::Number),
    // Line styles.
    prop("lineWidth", Number, Initial::Number(1.0)),
    prop("lineCap", Text, Initial::Text("butt")),
    prop("lineJoin", Text, Initial::Text("miter")),
    prop("miterLimit", Number, Initial::Number(10.0)),
    query("getLineDash", NONE, 0, Returns::NumberList),
    method("setLineDash", &[NumberList], 1),
    prop("lineDashOffset", Number, Initial::Number(0.0)),
    // Text styles.
    prop("font", Text, Initial::Text("10px sans-serif")),
    prop("textAlign", Text, Initial::Text("start")),
    prop("textBaseline", Text, Initial::Text("alphabetic")),
    prop("direction", Text, Initial::Text("inherit")),
    // Fill and stroke styles.
    prop("fillStyle", Text, Initial::Text("#000000")),
    prop("strokeStyle", Text, Initial::Text("#000000")),
    unsupported("createLinearGradient", "gradients cannot be transferred"),
    unsupported("createRadialGradient", "gradients cannot be transferred"),
    unsupported("createPattern", "patterns cannot be transferred"),
    // Shadows.
    prop("shadowBlur", Number, Initial::Number(0.0)),
    prop("shadowColor", Text, Initial::Text("rgba(0, 0, 0, 0)")),
    prop("shadowOffsetX", Number, Initial::Number(0.0)),
    prop("shadowOffsetY", Number, Initial::Number(0.0)),
    // Paths.
    method("beginPath", NONE, 0),
    method("closePath", NONE, 0),
    method("moveTo", N2, 2),
    method("lineTo", N2, 2),
    method("bezierCurveTo", N6, 6),
    method("quadraticCurveTo", N4, 4),
    method("arc", ARC, 5),
    method("arcTo", N5, 5),
    method("ellipse", ELLIPSE, 7),
    method("rect", N4, 4),
    // Drawing paths. Path2D overloads are not representable.
    method("fill", FILL_RULE, 0),
    method("stroke", NONE, 0),
    method("clip", FILL_RULE, 0),
    query("isPointInPath", POINT_IN_PATH, 2, Returns::Flag),
    query("isPointInStroke", N2, 2, Returns::Flag),
    // Transformations.
    method("rotate", N1, 1),
    method("scale", N2, 2),
    method("translate", N2, 2),
    method("transform", N6, 6),
    method("setTransform", N6, 6),
    method("resetTransform", NONE, 0),
    // Compositing.
    prop("globalAlpha", Number, Initial::Number(1.0)),
    prop(
        "globalCompositeOperation",
        Text,
        Initial::Text("source-over"),
    ),
    // Images: only the context itself can be named as a source.
    method("drawImage", DRAW_IMAGE, 3),
    // Pixel manipulation.
    unsupported("createImageData", "image data cannot be transferred"),
    unsupported("getImageData", "image data cannot be transferred"),
    unsupported("putImageData", "image data cannot be transferred"),
    // Image smoothing.
    prop("imageSmoothingEnabled", Flag, Initial::Flag(true)),
    prop("imageSmoothingQuality", Text, Initial::Text("low")),
    // State.
    method("save", NONE, 0),
    method("restore", NONE, 0),
    // Filters.
    prop("filter", Text, Initial::Text("none")),
];

fn index() -> &'static HashMap<&'static str, &'static Member> {
    static INDEX: OnceLock<HashMap<&'static str, &'static Member>> = OnceLock::new();
    INDEX.get_or_init(|| CONTEXT_2D.iter().map(|m| (m.name, m)).collect())
}

pub fn lookup(name: &str) -> Option<&'static Member> {
    index().get(name).copied()
}

/// Look up `name` and validate a call of `kind` with `args` against it.
pub fn check(name: &str, kind: CallKind, args: &[Value]) -> Result<&'static Member> {
    let member = lookup(name).ok_or_else(|| Error::UnknownMember(name.to_string()))?;
    member.check(kind, args)?;
    Ok(member)
}

/// Every property with its initial value.
pub fn properties() -> impl Iterator<Item = (&'static str, Value)> {
    CONTEXT_2D.iter().filter_map(|m| match m.kind {
        MemberKind::Property { initial, .. } => Some((m.name, initial.value())),
        _ => None,
    })
}
