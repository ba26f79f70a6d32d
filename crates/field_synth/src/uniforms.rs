//! Typed uniform values and their dispatch to GPU calls.
//!
//! Fields, generators and the view publish their shader parameters as a [`UniformMap`] of
//! symbol → [`UniformValue`]. [`set_uniform`] resolves the symbol in a linked program and
//! dispatches on the value's type to the matching [`GpuContext`] call. Symbols the program
//! does not declare are skipped silently: a field publishes every parameter it has, and a
//! particular program is free to ignore most of them.
use std::collections::btree_map;
use std::collections::BTreeMap;

use glam::{IVec3, IVec4, Mat3, Mat4, Vec3, Vec4};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::error::{Error, Result};
use crate::gpu::{GpuContext, ProgramId, UniformLocation};

/// A typed uniform value.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec3(Vec3),
    IVec3(IVec3),
    Vec4(Vec4),
    IVec4(IVec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    /// Short kind tag, matching the suffix of the GL call that sets it.
    pub fn tag(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "1f",
            UniformValue::Int(_) => "1i",
            UniformValue::UInt(_) => "1ui",
            UniformValue::Vec3(_) => "3fv",
            UniformValue::IVec3(_) => "3iv",
            UniformValue::Vec4(_) => "4fv",
            UniformValue::IVec4(_) => "4iv",
            UniformValue::Mat3(_) => "Matrix3fv",
            UniformValue::Mat4(_) => "Matrix4fv",
        }
    }

    /// Builds a value from a kind tag and its components (matrices column-major).
    ///
    /// Integer kinds truncate their components.
    pub fn from_tagged(name: &str, tag: &str, values: &[f32]) -> Result<Self> {
        let expected = match tag {
            "1f" | "1i" | "1ui" => 1,
            "3fv" | "3iv" => 3,
            "4fv" | "4iv" => 4,
            "Matrix3fv" => 9,
            "Matrix4fv" => 16,
            _ => {
                return Err(Error::UnsupportedUniform {
                    name: name.to_string(),
                    kind: tag.to_string(),
                })
            }
        };
        if values.len() != expected {
            return Err(Error::InvalidConfig(format!(
                "uniform '{}' of kind '{}' needs {} values but found {}",
                name,
                tag,
                expected,
                values.len()
            )));
        }

        let v = values;
        Ok(match tag {
            "1f" => UniformValue::Float(v[0]),
            "1i" => UniformValue::Int(v[0] as i32),
            "1ui" => UniformValue::UInt(v[0] as u32),
            "3fv" => UniformValue::Vec3(Vec3::from_slice(v)),
            "3iv" => UniformValue::IVec3(IVec3::new(v[0] as i32, v[1] as i32, v[2] as i32)),
            "4fv" => UniformValue::Vec4(Vec4::from_slice(v)),
            "4iv" => UniformValue::IVec4(IVec4::new(
                v[0] as i32,
                v[1] as i32,
                v[2] as i32,
                v[3] as i32,
            )),
            "Matrix3fv" => UniformValue::Mat3(Mat3::from_cols_slice(v)),
            _ => UniformValue::Mat4(Mat4::from_cols_slice(v)),
        })
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            UniformValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            UniformValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<u32> for UniformValue {
    fn from(value: u32) -> Self {
        UniformValue::UInt(value)
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<IVec3> for UniformValue {
    fn from(value: IVec3) -> Self {
        UniformValue::IVec3(value)
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        UniformValue::Vec4(value)
    }
}

impl From<IVec4> for UniformValue {
    fn from(value: IVec4) -> Self {
        UniformValue::IVec4(value)
    }
}

impl From<Mat3> for UniformValue {
    fn from(value: Mat3) -> Self {
        UniformValue::Mat3(value)
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        UniformValue::Mat4(value)
    }
}

impl From<mint::Vector3<f32>> for UniformValue {
    fn from(value: mint::Vector3<f32>) -> Self {
        UniformValue::Vec3(value.into())
    }
}

impl From<mint::Vector4<f32>> for UniformValue {
    fn from(value: mint::Vector4<f32>) -> Self {
        UniformValue::Vec4(value.into())
    }
}

impl From<mint::ColumnMatrix4<f32>> for UniformValue {
    fn from(value: mint::ColumnMatrix4<f32>) -> Self {
        UniformValue::Mat4(value.into())
    }
}

/// An ordered symbol → value mapping. Iteration order is the symbol order, so uploads are
/// deterministic.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformMap {
    values: BTreeMap<String, UniformValue>,
}

impl UniformMap {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Inserts a dynamically described uniform. Unknown kinds or wrong component counts are
    /// reported and the uniform is skipped.
    pub fn insert_tagged(
        &mut self,
        name: &str,
        tag: &str,
        values: &[f32],
        sink: &mut dyn DiagnosticSink,
    ) -> bool {
        match UniformValue::from_tagged(name, tag, values) {
            Ok(value) => {
                self.values.insert(name.to_string(), value);
                true
            }
            Err(err) => {
                report(
                    sink,
                    Diagnostic::UnsupportedUniform {
                        name: name.to_string(),
                        kind: match err {
                            Error::UnsupportedUniform { kind, .. } => kind,
                            other => other.to_string(),
                        },
                    },
                );
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<UniformValue> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn extend_from(&mut self, other: &UniformMap) {
        for (k, v) in other.iter() {
            self.values.insert(k.to_string(), *v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl IntoIterator for UniformMap {
    type Item = (String, UniformValue);
    type IntoIter = btree_map::IntoIter<String, UniformValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// Dispatches `value` to the GPU call matching its type.
pub fn apply_uniform(ctx: &mut dyn GpuContext, location: UniformLocation, value: &UniformValue) {
    match *value {
        UniformValue::Float(v) => ctx.uniform_1f(location, v),
        UniformValue::Int(v) => ctx.uniform_1i(location, v),
        UniformValue::UInt(v) => ctx.uniform_1ui(location, v),
        UniformValue::Vec3(v) => ctx.uniform_3fv(location, v.to_array()),
        UniformValue::IVec3(v) => ctx.uniform_3iv(location, v.to_array()),
        UniformValue::Vec4(v) => ctx.uniform_4fv(location, v.to_array()),
        UniformValue::IVec4(v) => ctx.uniform_4iv(location, v.to_array()),
        UniformValue::Mat3(m) => ctx.uniform_matrix_3fv(location, m.to_cols_array()),
        UniformValue::Mat4(m) => ctx.uniform_matrix_4fv(location, m.to_cols_array()),
    }
}

/// Sets `name` on `program` (which must be in use). Returns `false` when the program does not
/// declare the symbol.
pub fn set_uniform(
    ctx: &mut dyn GpuContext,
    program: ProgramId,
    name: &str,
    value: &UniformValue,
) -> bool {
    let Some(location) = ctx.uniform_location(program, name) else {
        return false;
    };
    apply_uniform(ctx, location, value);
    true
}

/// Sets every uniform in `uniforms` that `program` declares. Returns how many were set.
pub fn set_uniforms(ctx: &mut dyn GpuContext, program: ProgramId, uniforms: &UniformMap) -> usize {
    uniforms
        .iter()
        .filter(|(name, value)| set_uniform(ctx, program, name, value))
        .count()
}
