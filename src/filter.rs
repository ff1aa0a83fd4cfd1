// filter.rs — The filter plugin interface.
//
// Every filter exposes the same surface to callers:
//
//   name / description          → registry strings
//   generate_kernel(size, p)    → ConvKernel for this invocation
//   process(image, kernel, l)   → FilterOutput { image, elapsed }
//   recommended_launch_configs  → advisory block shapes
//   parameter_descriptor        → schema for configuration UIs
//
// The descriptor is data only: the engine never enforces its bounds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::accel::DeviceError;
use crate::image::ImageData;
use crate::kernel::ConvKernel;
use crate::launch::{LaunchConfig, NamedLaunchConfig};

pub type FilterResult<T> = std::result::Result<T, FilterError>;

/// Errors returned by filters.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A filter parameter is out of its valid domain (e.g. σ ≤ 0).
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The input image cannot be processed.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The launch configuration cannot cover the image.
    #[error("invalid launch configuration: {0}")]
    InvalidLaunch(String),

    /// Resource failure inside the accelerator. Buffers allocated before the
    /// failure have already been released.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result of one `process` call.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    /// Same shape and sample kind as the input.
    pub image: ImageData,
    /// Device time of the kernel launch alone; transfers are excluded.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_owned())
    }
}

/// Named parameter values passed to `Filter::generate_kernel`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterParams {
    values: BTreeMap<String, ParamValue>,
}

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Numeric parameter as f64. Integers widen; strings are a type error.
    pub fn float(&self, name: &str) -> FilterResult<Option<f64>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ParamValue::Float(v)) => Ok(Some(*v)),
            Some(ParamValue::Int(v)) => Ok(Some(*v as f64)),
            Some(ParamValue::Str(s)) => Err(FilterError::InvalidParameter {
                name: name.to_owned(),
                reason: format!("expected a number, got string {s:?}"),
            }),
        }
    }
}

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
    String,
}

/// Schema of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamKind,
    pub default: ParamValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<ParamValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<ParamValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<ParamValue>,
    pub description: String,
}

/// Ordered mapping name → `ParamSpec`. Serializes as a JSON object whose
/// keys keep declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamDescriptor {
    entries: Vec<(String, ParamSpec)>,
}

impl ParamDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter; a repeated name replaces the earlier spec in place.
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = spec,
            None => self.entries.push((name, spec)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for ParamDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, spec) in &self.entries {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Filter trait
// ---------------------------------------------------------------------------

/// A convolution filter that can be registered and invoked by name.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Build the kernel for one invocation. Even sizes are bumped to the
    /// next odd size.
    fn generate_kernel(&self, size: usize, params: &FilterParams) -> FilterResult<ConvKernel>;

    /// Convolve `image` with `kernel` using `launch`. Blocks until the result
    /// is back on the host.
    fn process(
        &self,
        image: &ImageData,
        kernel: &ConvKernel,
        launch: &LaunchConfig,
    ) -> FilterResult<FilterOutput>;

    fn recommended_launch_configs(&self) -> Vec<NamedLaunchConfig>;

    fn parameter_descriptor(&self) -> ParamDescriptor;
}
