//! Ports: typed, lockable parameter cells exposed by recalls
//!
//! A port's kind never changes after creation. Every read and write goes
//! through the port's own lock, never through the graph-wide structural lock,
//! so control-side `apply` only ever contends with the single render worker
//! reading that port.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::PortError;
use crate::recall::RecallLevel;

/// Type tag of a port value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Boolean,
    Integer,
    Float,
    Double,
    Buffer,
}

/// Tagged port value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PortValue {
    Boolean(bool),
    Integer(i64),
    Float(f32),
    Double(f64),
    Buffer(Vec<f32>),
}

impl PortValue {
    pub fn kind(&self) -> PortKind {
        match self {
            PortValue::Boolean(_) => PortKind::Boolean,
            PortValue::Integer(_) => PortKind::Integer,
            PortValue::Float(_) => PortKind::Float,
            PortValue::Double(_) => PortKind::Double,
            PortValue::Buffer(_) => PortKind::Buffer,
        }
    }

    /// Numeric view, used for plugin parameter layouts and ranges
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PortValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            PortValue::Integer(i) => Some(*i as f64),
            PortValue::Float(f) => Some(*f as f64),
            PortValue::Double(d) => Some(*d),
            PortValue::Buffer(_) => None,
        }
    }

    fn clamped(self, range: Option<PortRange>) -> (PortValue, bool) {
        let Some(range) = range else {
            return (self, false);
        };
        match self {
            PortValue::Integer(i) => {
                let c = range.clamp_i64(i);
                (PortValue::Integer(c), c != i)
            }
            PortValue::Float(f) => {
                let c = range.clamp_f64(f as f64) as f32;
                (PortValue::Float(c), c != f)
            }
            PortValue::Double(d) => {
                let c = range.clamp_f64(d);
                (PortValue::Double(c), c != d)
            }
            other => (other, false),
        }
    }
}

/// Inclusive numeric bounds, always ordered with `min <= max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RangeBounds")]
pub struct PortRange {
    min: f64,
    max: f64,
}

#[derive(Deserialize)]
struct RangeBounds {
    min: f64,
    max: f64,
}

impl From<RangeBounds> for PortRange {
    fn from(bounds: RangeBounds) -> Self {
        PortRange::new(bounds.min, bounds.max)
    }
}

impl PortRange {
    /// Swapped bounds are reordered; a NaN bound leaves that side open.
    pub fn new(min: f64, max: f64) -> Self {
        let min = if min.is_nan() { f64::NEG_INFINITY } else { min };
        let max = if max.is_nan() { f64::INFINITY } else { max };
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// NaN lands on `min`
    fn clamp_f64(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.min
        } else {
            value.clamp(self.min, self.max)
        }
    }

    /// Clamp in the integer domain so large in-range values stay exact.
    /// Float-to-int casts saturate, so infinite bounds map to the i64 limits.
    /// A range holding no integer resolves to `floor(max)`.
    fn clamp_i64(&self, value: i64) -> i64 {
        let lo = self.min.ceil() as i64;
        let hi = self.max.floor() as i64;
        value.max(lo).min(hi)
    }
}

/// Port definition carried by an effect; every live port is seeded from one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    pub default: PortValue,
    pub range: Option<PortRange>,
    pub is_output: bool,
    /// Recall level whose instances own a live copy of this port
    pub level: RecallLevel,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, level: RecallLevel, default: PortValue) -> Self {
        Self {
            name: name.into(),
            default,
            range: None,
            is_output: false,
            level,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some(PortRange::new(min, max));
        self
    }

    pub fn output(mut self) -> Self {
        self.is_output = true;
        self
    }

    pub fn kind(&self) -> PortKind {
        self.default.kind()
    }
}

/// Result of a successful apply
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Stored,
    Clamped { requested: f64, stored: f64 },
}

/// A live port: immutable definition plus a locked value
#[derive(Debug)]
pub struct Port {
    definition: Arc<PortDefinition>,
    value: Mutex<PortValue>,
}

impl Port {
    pub fn new(definition: Arc<PortDefinition>) -> Self {
        let (value, _) = definition.default.clone().clamped(definition.range);
        Self {
            definition,
            value: Mutex::new(value),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn kind(&self) -> PortKind {
        self.definition.kind()
    }

    pub fn definition(&self) -> &PortDefinition {
        &self.definition
    }

    pub fn is_output(&self) -> bool {
        self.definition.is_output
    }

    /// Validate and store `value`.
    ///
    /// A kind mismatch fails and leaves the stored value untouched. Numeric
    /// values outside the declared range are clamped to the nearest bound.
    pub fn apply(&self, value: PortValue) -> Result<Applied, PortError> {
        if value.kind() != self.kind() {
            return Err(PortError::TypeMismatch {
                port: self.name().to_string(),
                expected: self.kind(),
                got: value.kind(),
            });
        }

        let requested = value.as_f64();
        let (value, clamped) = value.clamped(self.definition.range);
        let stored = value.as_f64();
        *self.lock() = value;

        match (clamped, requested, stored) {
            (true, Some(requested), Some(stored)) => Ok(Applied::Clamped { requested, stored }),
            _ => Ok(Applied::Stored),
        }
    }

    /// Store a processor-produced value. Returns false on a kind mismatch.
    pub fn store(&self, value: PortValue) -> bool {
        self.apply(value).is_ok()
    }

    /// Read the value under the lock without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&PortValue) -> R) -> R {
        f(&self.lock())
    }

    pub fn get(&self) -> PortValue {
        self.lock().clone()
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.read(|v| v.as_f64().map(|f| f as f32))
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.read(|v| match v {
            PortValue::Boolean(b) => Some(*b),
            _ => None,
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.read(|v| match v {
            PortValue::Integer(i) => Some(*i),
            _ => None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PortValue> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ordered set of ports with unique names
#[derive(Debug, Default, Clone)]
pub struct PortSet {
    ports: Vec<Arc<Port>>,
}

impl PortSet {
    pub const fn new() -> Self {
        Self { ports: Vec::new() }
    }

    /// Fresh ports for every definition owned by `level`
    pub fn instantiate(definitions: &[Arc<PortDefinition>], level: RecallLevel) -> Self {
        let mut set = Self::new();
        for def in definitions.iter().filter(|d| d.level == level) {
            if set.get(&def.name).is_none() {
                set.ports.push(Arc::new(Port::new(Arc::clone(def))));
            }
        }
        set
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Port>> {
        self.ports.iter().find(|p| p.name() == name)
    }

    /// Numeric value of `name`, or `fallback` when absent or non-numeric
    pub fn f32_or(&self, name: &str, fallback: f32) -> f32 {
        self.get(name).and_then(|p| p.as_f32()).unwrap_or(fallback)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Port>> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
