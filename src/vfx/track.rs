use super::ParticleSpace;
use crate::curve::{Curve, CurveMode, CurveValue};
use crate::error::{VfxError, VfxResult};
use crate::renderer::{ShaderUniforms, UniformValue};
use glam::{Vec2, Vec3, Vec4};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackValueType {
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl TrackValueType {
    pub fn label(self) -> &'static str {
        match self {
            TrackValueType::Float => "float",
            TrackValueType::Vec2 => "vec2",
            TrackValueType::Vec3 => "vec3",
            TrackValueType::Vec4 => "vec4",
        }
    }

    pub fn components(self) -> usize {
        match self {
            TrackValueType::Float => 1,
            TrackValueType::Vec2 => 2,
            TrackValueType::Vec3 => 3,
            TrackValueType::Vec4 => 4,
        }
    }
}

/// Keys of a track, tagged by the value type the track is locked to.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TrackCurve {
    #[default]
    Unlocked,
    Float(Curve<f32>),
    Vec2(Curve<Vec2>),
    Vec3(Curve<Vec3>),
    Vec4(Curve<Vec4>),
}

impl TrackCurve {
    pub fn value_type(&self) -> Option<TrackValueType> {
        match self {
            TrackCurve::Unlocked => None,
            TrackCurve::Float(_) => Some(TrackValueType::Float),
            TrackCurve::Vec2(_) => Some(TrackValueType::Vec2),
            TrackCurve::Vec3(_) => Some(TrackValueType::Vec3),
            TrackCurve::Vec4(_) => Some(TrackValueType::Vec4),
        }
    }

    fn empty(value_type: TrackValueType) -> Self {
        match value_type {
            TrackValueType::Float => TrackCurve::Float(Curve::new()),
            TrackValueType::Vec2 => TrackCurve::Vec2(Curve::new()),
            TrackValueType::Vec3 => TrackCurve::Vec3(Curve::new()),
            TrackValueType::Vec4 => TrackCurve::Vec4(Curve::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            TrackCurve::Unlocked => 0,
            TrackCurve::Float(curve) => curve.len(),
            TrackCurve::Vec2(curve) => curve.len(),
            TrackCurve::Vec3(curve) => curve.len(),
            TrackCurve::Vec4(curve) => curve.len(),
        }
    }
}

/// Payload types a [`Track`] can carry.
pub trait TrackValue: CurveValue {
    const VALUE_TYPE: TrackValueType;

    fn curve(curve: &TrackCurve) -> Option<&Curve<Self>>;
    fn curve_mut(curve: &mut TrackCurve) -> Option<&mut Curve<Self>>;
    fn to_uniform(self) -> UniformValue;

    /// Builds a value from exactly [`TrackValueType::components`] floats.
    fn from_components(values: &[f32]) -> Option<Self>;
}

macro_rules! impl_track_value {
    ($ty:ty, $variant:ident, |$values:ident| $build:expr) => {
        impl TrackValue for $ty {
            const VALUE_TYPE: TrackValueType = TrackValueType::$variant;

            fn curve(curve: &TrackCurve) -> Option<&Curve<Self>> {
                match curve {
                    TrackCurve::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn curve_mut(curve: &mut TrackCurve) -> Option<&mut Curve<Self>> {
                match curve {
                    TrackCurve::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn to_uniform(self) -> UniformValue {
                UniformValue::$variant(self)
            }

            fn from_components($values: &[f32]) -> Option<Self> {
                if $values.len() != Self::VALUE_TYPE.components() {
                    return None;
                }
                Some($build)
            }
        }
    };
}

impl_track_value!(f32, Float, |values| values[0]);
impl_track_value!(Vec2, Vec2, |values| Vec2::from_slice(values));
impl_track_value!(Vec3, Vec3, |values| Vec3::from_slice(values));
impl_track_value!(Vec4, Vec4, |values| Vec4::from_slice(values));

/// Interpolation mode plus a type-locked curve.
///
/// The value type locks on the first [`Track::prepare`] and stays locked until [`Track::reset`];
/// keys of another type are rejected without touching the existing ones.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    enabled: bool,
    mode: CurveMode,
    curve: TrackCurve,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn mode(&self) -> CurveMode {
        self.mode
    }

    pub fn value_type(&self) -> Option<TrackValueType> {
        self.curve.value_type()
    }

    pub fn curve(&self) -> &TrackCurve {
        &self.curve
    }

    pub fn len(&self) -> usize {
        self.curve.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prepare(&mut self, value_type: TrackValueType, mode: CurveMode) -> VfxResult<()> {
        match self.curve.value_type() {
            None => {
                self.curve = TrackCurve::empty(value_type);
                self.enabled = true;
            }
            Some(locked) if locked != value_type => {
                return Err(VfxError::invalid(format!(
                    "track is locked to {}, cannot accept {}",
                    locked.label(),
                    value_type.label()
                )));
            }
            Some(_) => {}
        }
        self.mode = mode;
        Ok(())
    }

    pub fn add_key<T: TrackValue>(&mut self, mode: CurveMode, t: f32, value: T) -> VfxResult<()> {
        if !t.is_finite() || !value.is_finite_value() {
            return Err(VfxError::invalid("track keys must be finite"));
        }
        self.prepare(T::VALUE_TYPE, mode)?;
        match T::curve_mut(&mut self.curve) {
            Some(curve) => curve.add_key(t, value),
            None => Err(VfxError::invalid(format!("track is not a {} track", T::VALUE_TYPE.label()))),
        }
    }

    /// `None` while disabled, empty, or locked to a different type.
    pub fn eval<T: TrackValue>(&self, t: f32) -> Option<T> {
        if !self.enabled {
            return None;
        }
        T::curve(&self.curve)?.eval(self.mode, t).ok()
    }

    pub fn eval_uniform(&self, t: f32) -> Option<UniformValue> {
        if !self.enabled {
            return None;
        }
        match &self.curve {
            TrackCurve::Unlocked => None,
            TrackCurve::Float(curve) => curve.eval(self.mode, t).ok().map(UniformValue::Float),
            TrackCurve::Vec2(curve) => curve.eval(self.mode, t).ok().map(UniformValue::Vec2),
            TrackCurve::Vec3(curve) => curve.eval(self.mode, t).ok().map(UniformValue::Vec3),
            TrackCurve::Vec4(curve) => curve.eval(self.mode, t).ok().map(UniformValue::Vec4),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Particle field a built-in track overwrites, sampled at each particle's life fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinTarget {
    Velocity,
    Color,
    Size,
    Rotation,
}

impl BuiltinTarget {
    pub const ALL: [BuiltinTarget; 4] =
        [BuiltinTarget::Velocity, BuiltinTarget::Color, BuiltinTarget::Size, BuiltinTarget::Rotation];

    pub fn index(self) -> usize {
        match self {
            BuiltinTarget::Velocity => 0,
            BuiltinTarget::Color => 1,
            BuiltinTarget::Size => 2,
            BuiltinTarget::Rotation => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BuiltinTarget::Velocity => "velocity",
            BuiltinTarget::Color => "color",
            BuiltinTarget::Size => "size",
            BuiltinTarget::Rotation => "rotation",
        }
    }

    pub fn value_type<S: ParticleSpace>(self) -> TrackValueType {
        match self {
            BuiltinTarget::Velocity => S::Vector::VALUE_TYPE,
            BuiltinTarget::Color => TrackValueType::Vec4,
            BuiltinTarget::Size | BuiltinTarget::Rotation => TrackValueType::Float,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuiltinTracks {
    tracks: [Track; 4],
}

impl BuiltinTracks {
    pub fn get(&self, target: BuiltinTarget) -> &Track {
        &self.tracks[target.index()]
    }

    pub fn get_mut(&mut self, target: BuiltinTarget) -> &mut Track {
        &mut self.tracks[target.index()]
    }

    pub fn reset_all(&mut self) {
        self.tracks.iter_mut().for_each(Track::reset);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformTrack {
    pub name: String,
    pub track: Track,
}

/// Named shader-uniform tracks. Cardinality is small, so lookups are linear.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UniformTracks {
    tracks: Vec<UniformTrack>,
}

impl UniformTracks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Track> {
        self.tracks.iter().find(|entry| entry.name == name).map(|entry| &entry.track)
    }

    pub fn get_or_create(&mut self, name: &str) -> VfxResult<&mut Track> {
        if name.is_empty() {
            return Err(VfxError::invalid("uniform track name must not be empty"));
        }
        let index = match self.tracks.iter().position(|entry| entry.name == name) {
            Some(index) => index,
            None => {
                self.tracks.push(UniformTrack { name: name.to_string(), track: Track::new() });
                self.tracks.len() - 1
            }
        };
        Ok(&mut self.tracks[index].track)
    }

    pub fn remove(&mut self, name: &str) -> VfxResult<()> {
        let index = self
            .tracks
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| VfxError::not_found(format!("uniform track '{name}'")))?;
        self.tracks.remove(index);
        Ok(())
    }

    pub fn clear_all(&mut self) {
        self.tracks.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniformTrack> {
        self.tracks.iter()
    }

    /// Samples every enabled track at `t` and writes it to the shader under the track's name.
    pub fn apply(&self, uniforms: &mut ShaderUniforms<'_>, t: f32) {
        for entry in &self.tracks {
            if let Some(value) = entry.track.eval_uniform(t) {
                uniforms.set(&entry.name, value);
            }
        }
    }
}
