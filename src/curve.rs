use crate::error::{VfxError, VfxResult};
use glam::{Vec2, Vec3, Vec4};
use serde::Deserialize;

/// Segments narrower than this evaluate as if `u = 0`.
const MIN_SEGMENT_WIDTH: f32 = 1e-6;

/// Remapping applied to the local segment parameter before interpolating endpoint values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveMode {
    Step,
    #[default]
    Linear,
    Smooth,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl CurveMode {
    pub fn remap(self, u: f32) -> f32 {
        match self {
            CurveMode::Step => 0.0,
            CurveMode::Linear => u,
            CurveMode::Smooth => u * u * (3.0 - 2.0 * u),
            CurveMode::EaseIn => u * u,
            CurveMode::EaseOut => {
                let inv = 1.0 - u;
                1.0 - inv * inv
            }
            CurveMode::EaseInOut => {
                if u < 0.5 {
                    2.0 * u * u
                } else {
                    let tail = -2.0 * u + 2.0;
                    1.0 - tail * tail * 0.5
                }
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CurveMode::Step => "step",
            CurveMode::Linear => "linear",
            CurveMode::Smooth => "smooth",
            CurveMode::EaseIn => "ease_in",
            CurveMode::EaseOut => "ease_out",
            CurveMode::EaseInOut => "ease_in_out",
        }
    }
}

/// Payload a [`Curve`] can interpolate componentwise.
pub trait CurveValue: Copy + PartialEq + std::fmt::Debug {
    fn lerp(a: Self, b: Self, t: f32) -> Self;
    fn is_finite_value(&self) -> bool;
}

impl CurveValue for f32 {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        a + (b - a) * t
    }

    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

macro_rules! impl_curve_value_vec {
    ($ty:ty) => {
        impl CurveValue for $ty {
            fn lerp(a: Self, b: Self, t: f32) -> Self {
                a + (b - a) * t
            }

            fn is_finite_value(&self) -> bool {
                self.is_finite()
            }
        }
    };
}

impl_curve_value_vec!(Vec2);
impl_curve_value_vec!(Vec3);
impl_curve_value_vec!(Vec4);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe<T> {
    pub t: f32,
    pub value: T,
}

/// Sparse keyframes over normalized time, kept sorted by `t` after every insert.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve<T> {
    keys: Vec<Keyframe<T>>,
}

impl<T> Default for Curve<T> {
    fn default() -> Self {
        Self { keys: Vec::new() }
    }
}

impl<T: CurveValue> Curve<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key after any existing keys sharing the same `t`.
    pub fn add_key(&mut self, t: f32, value: T) -> VfxResult<()> {
        if !t.is_finite() {
            return Err(VfxError::invalid(format!("curve key time {t} is not finite")));
        }
        if !value.is_finite_value() {
            return Err(VfxError::invalid("curve key value is not finite"));
        }
        let t = t.clamp(0.0, 1.0);
        let index = self.keys.partition_point(|key| key.t <= t);
        self.keys.insert(index, Keyframe { t, value });
        Ok(())
    }

    pub fn eval(&self, mode: CurveMode, t: f32) -> VfxResult<T> {
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(VfxError::not_found("curve has no keys")),
        };
        if self.keys.len() == 1 {
            return Ok(first.value);
        }
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        if t <= first.t {
            return Ok(first.value);
        }
        if t >= last.t {
            return Ok(last.value);
        }
        // first key whose successor is at or past `t`; always found since t < last.t
        let segment = self.keys.windows(2).position(|pair| t <= pair[1].t).unwrap_or(self.keys.len() - 2);
        let left = &self.keys[segment];
        let right = &self.keys[segment + 1];
        let width = right.t - left.t;
        let u = if width.abs() <= MIN_SEGMENT_WIDTH { 0.0 } else { ((t - left.t) / width).clamp(0.0, 1.0) };
        Ok(T::lerp(left.value, right.value, mode.remap(u)))
    }

    pub fn keys(&self) -> &[Keyframe<T>] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_curve(keys: &[(f32, f32)]) -> Curve<f32> {
        let mut curve = Curve::new();
        for &(t, v) in keys {
            curve.add_key(t, v).expect("key");
        }
        curve
    }

    #[test]
    fn empty_curve_reports_not_found() {
        let curve = Curve::<f32>::new();
        let err = curve.eval(CurveMode::Linear, 0.5).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn single_key_is_constant() {
        let curve = scalar_curve(&[(0.4, 3.0)]);
        for t in [0.0, 0.4, 0.9, 1.0] {
            assert_eq!(curve.eval(CurveMode::Smooth, t).unwrap(), 3.0);
        }
    }

    #[test]
    fn linear_midpoint_is_exact() {
        let curve = scalar_curve(&[(0.0, 0.0), (1.0, 10.0)]);
        assert_eq!(curve.eval(CurveMode::Linear, 0.5).unwrap(), 5.0);
    }

    #[test]
    fn evaluation_clamps_to_boundary_keys() {
        let curve = scalar_curve(&[(0.25, 2.0), (0.75, 6.0)]);
        for mode in [CurveMode::Step, CurveMode::Linear, CurveMode::EaseInOut] {
            assert_eq!(curve.eval(mode, 0.0).unwrap(), 2.0);
            assert_eq!(curve.eval(mode, 0.25).unwrap(), 2.0);
            assert_eq!(curve.eval(mode, 0.75).unwrap(), 6.0);
            assert_eq!(curve.eval(mode, 1.0).unwrap(), 6.0);
            assert_eq!(curve.eval(mode, 4.0).unwrap(), 6.0);
        }
    }

    #[test]
    fn unordered_inserts_stay_sorted() {
        let curve = scalar_curve(&[(0.9, 1.0), (0.1, 2.0), (0.5, 3.0), (-2.0, 4.0), (0.5, 5.0), (3.0, 6.0)]);
        let times: Vec<f32> = curve.keys().iter().map(|k| k.t).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "keys out of order: {times:?}");
        assert_eq!(times.first().copied(), Some(0.0));
        assert_eq!(times.last().copied(), Some(1.0));
        let duplicates: Vec<f32> = curve.keys().iter().filter(|k| k.t == 0.5).map(|k| k.value).collect();
        assert_eq!(duplicates, vec![3.0, 5.0], "equal times keep insertion order");
    }

    #[test]
    fn step_holds_left_value() {
        let curve = scalar_curve(&[(0.0, 1.0), (1.0, 9.0)]);
        assert_eq!(curve.eval(CurveMode::Step, 0.99).unwrap(), 1.0);
    }

    #[test]
    fn easing_modes_match_reference_points() {
        assert_eq!(CurveMode::EaseIn.remap(0.5), 0.25);
        assert_eq!(CurveMode::EaseOut.remap(0.5), 0.75);
        assert_eq!(CurveMode::Smooth.remap(0.5), 0.5);
        assert_eq!(CurveMode::EaseInOut.remap(0.25), 0.125);
        assert_eq!(CurveMode::EaseInOut.remap(0.75), 0.875);
        for mode in [CurveMode::Linear, CurveMode::Smooth, CurveMode::EaseIn, CurveMode::EaseOut, CurveMode::EaseInOut]
        {
            assert_eq!(mode.remap(0.0), 0.0, "{} at 0", mode.label());
            assert_eq!(mode.remap(1.0), 1.0, "{} at 1", mode.label());
        }
    }

    #[test]
    fn vector_payloads_interpolate_componentwise() {
        let mut curve = Curve::new();
        curve.add_key(0.0, Vec4::new(1.0, 0.0, 0.0, 1.0)).unwrap();
        curve.add_key(1.0, Vec4::new(0.0, 0.0, 1.0, 0.0)).unwrap();
        let mid = curve.eval(CurveMode::Linear, 0.5).unwrap();
        assert_eq!(mid, Vec4::new(0.5, 0.0, 0.5, 0.5));
    }

    #[test]
    fn coincident_keys_do_not_divide_by_zero() {
        let curve = scalar_curve(&[(0.0, 0.0), (0.5, 1.0), (0.5, 7.0), (1.0, 2.0)]);
        let value = curve.eval(CurveMode::Linear, 0.5).unwrap();
        assert!(value.is_finite());
    }

    #[test]
    fn non_finite_keys_are_rejected() {
        let mut curve = Curve::<f32>::new();
        assert!(curve.add_key(f32::NAN, 1.0).is_err());
        assert!(curve.add_key(0.5, f32::INFINITY).is_err());
        assert!(curve.is_empty());
    }
}
