use crate::curve::CurveMode;
use crate::error::{VfxError, VfxResult};
use crate::renderer::RenderContext;
use crate::vfx::system::DEFAULT_MAX_EMITTERS;
use crate::vfx::{
    BlendMode, BuiltinTarget, EmitterHandle, EmitterParams, ParticleSpace, TrackValue, TrackValueType, VfxParams,
    VfxSystem,
};
use anyhow::{Context, Result};
use glam::{Vec2, Vec3, Vec4};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct VfxSystemConfig {
    #[serde(default = "VfxSystemConfig::default_max_emitters")]
    pub max_emitters: usize,
    #[serde(default)]
    pub render_size: [f32; 2],
    #[serde(default = "VfxSystemConfig::default_auto_resize")]
    pub auto_resize_with_window: bool,
}

impl Default for VfxSystemConfig {
    fn default() -> Self {
        Self {
            max_emitters: Self::default_max_emitters(),
            render_size: [0.0, 0.0],
            auto_resize_with_window: Self::default_auto_resize(),
        }
    }
}

impl VfxSystemConfig {
    const fn default_max_emitters() -> usize {
        DEFAULT_MAX_EMITTERS
    }

    const fn default_auto_resize() -> bool {
        true
    }

    pub fn params(&self) -> VfxParams {
        VfxParams {
            max_emitters: self.max_emitters,
            render_size: Vec2::from_array(self.render_size),
            auto_resize_with_window: self.auto_resize_with_window,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackKeyFile {
    pub t: f32,
    pub value: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuiltinTrackFile {
    pub target: BuiltinTarget,
    #[serde(default)]
    pub mode: CurveMode,
    #[serde(default = "BuiltinTrackFile::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub keys: Vec<TrackKeyFile>,
}

impl BuiltinTrackFile {
    const fn default_enabled() -> bool {
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniformTrackFile {
    pub name: String,
    pub value_type: TrackValueType,
    #[serde(default)]
    pub mode: CurveMode,
    #[serde(default)]
    pub keys: Vec<TrackKeyFile>,
}

/// Named emitter setup. Omitted fields take the defaults of whichever dimension the preset is
/// spawned into; vectors carry 2 or 3 components to match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmitterPreset {
    #[serde(default)]
    pub position: Option<Vec<f32>>,
    #[serde(default)]
    pub velocity: Option<Vec<f32>>,
    #[serde(default)]
    pub color: Option<[f32; 4]>,
    #[serde(default)]
    pub size: Option<f32>,
    #[serde(default)]
    pub rotation: Option<f32>,
    #[serde(default)]
    pub spawn_rate: Option<f32>,
    #[serde(default)]
    pub burst_count: Option<u32>,
    #[serde(default)]
    pub lifetime: Option<[f32; 2]>,
    #[serde(default)]
    pub max_particles: Option<u32>,
    #[serde(default)]
    pub vertex_shader: Option<String>,
    #[serde(default)]
    pub fragment_shader: Option<String>,
    #[serde(default)]
    pub blend_mode: Option<BlendMode>,
    #[serde(default)]
    pub start_active: Option<bool>,
    #[serde(default)]
    pub builtin_tracks: Vec<BuiltinTrackFile>,
    #[serde(default)]
    pub uniform_tracks: Vec<UniformTrackFile>,
}

impl EmitterPreset {
    /// Overlays the preset on `S`'s defaults.
    pub fn params<S: ParticleSpace>(&self) -> VfxResult<EmitterParams<S>> {
        let mut params = S::default_params();
        if let Some(position) = &self.position {
            params.position = vector_from::<S::Vector>("position", position)?;
        }
        if let Some(velocity) = &self.velocity {
            params.velocity = vector_from::<S::Vector>("velocity", velocity)?;
        }
        if let Some(color) = self.color {
            params.color = Vec4::from_array(color);
        }
        params.size = self.size.unwrap_or(params.size);
        params.rotation = self.rotation.unwrap_or(params.rotation);
        params.spawn_rate = self.spawn_rate.unwrap_or(params.spawn_rate);
        params.burst_count = self.burst_count.unwrap_or(params.burst_count);
        if let Some([min, max]) = self.lifetime {
            params.lifetime_min = min;
            params.lifetime_max = max;
        }
        params.max_particles = self.max_particles.unwrap_or(params.max_particles);
        params.vertex_shader_path = self.vertex_shader.clone();
        params.fragment_shader_path = self.fragment_shader.clone();
        params.blend_mode = self.blend_mode.unwrap_or(params.blend_mode);
        params.start_active = self.start_active.unwrap_or(params.start_active);
        Ok(params)
    }

    /// Checks every key against the arity its track expects, before anything is created.
    fn validate_tracks<S: ParticleSpace>(&self) -> VfxResult<()> {
        for track in &self.builtin_tracks {
            let expected = track.target.value_type::<S>();
            check_keys(track.target.label(), expected, &track.keys)?;
        }
        for track in &self.uniform_tracks {
            if track.name.is_empty() {
                return Err(VfxError::invalid("uniform track name must not be empty"));
            }
            check_keys(&track.name, track.value_type, &track.keys)?;
        }
        Ok(())
    }
}

fn vector_from<V: TrackValue>(field: &str, values: &[f32]) -> VfxResult<V> {
    V::from_components(values).ok_or_else(|| {
        VfxError::invalid(format!(
            "{field} needs {} components, got {}",
            V::VALUE_TYPE.components(),
            values.len()
        ))
    })
}

fn check_keys(track: &str, expected: TrackValueType, keys: &[TrackKeyFile]) -> VfxResult<()> {
    for key in keys {
        if key.value.len() != expected.components() {
            return Err(VfxError::invalid(format!(
                "track '{track}' expects {} values ({}), key at t={} has {}",
                expected.components(),
                expected.label(),
                key.t,
                key.value.len()
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VfxConfig {
    #[serde(default)]
    pub system_2d: VfxSystemConfig,
    #[serde(default)]
    pub system_3d: VfxSystemConfig,
    #[serde(default)]
    pub emitters: BTreeMap<String, EmitterPreset>,
}

impl VfxConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[vfx] config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn preset(&self, name: &str) -> VfxResult<&EmitterPreset> {
        self.emitters.get(name).ok_or_else(|| VfxError::not_found(format!("emitter preset '{name}'")))
    }
}

impl<S: ParticleSpace> VfxSystem<S> {
    /// Adds an emitter from a preset and loads its tracks. Nothing is created when the preset's
    /// vectors or keys have the wrong arity for this dimension.
    pub fn add_emitter_from_preset(
        &mut self,
        ctx: &mut dyn RenderContext,
        preset: &EmitterPreset,
    ) -> VfxResult<EmitterHandle> {
        let params = preset.params::<S>()?;
        preset.validate_tracks::<S>()?;
        let handle = self.add_emitter(ctx, params)?;
        if let Err(err) = self.load_preset_tracks(handle, preset) {
            self.remove_emitter(ctx, handle)?;
            return Err(err);
        }
        Ok(handle)
    }

    fn load_preset_tracks(&mut self, handle: EmitterHandle, preset: &EmitterPreset) -> VfxResult<()> {
        for track in &preset.builtin_tracks {
            for key in &track.keys {
                match track.target.value_type::<S>() {
                    TrackValueType::Float => {
                        self.add_builtin_key(handle, track.target, track.mode, key.t, key.value[0])?
                    }
                    TrackValueType::Vec2 => self.add_builtin_key(
                        handle,
                        track.target,
                        track.mode,
                        key.t,
                        Vec2::from_slice(&key.value),
                    )?,
                    TrackValueType::Vec3 => self.add_builtin_key(
                        handle,
                        track.target,
                        track.mode,
                        key.t,
                        Vec3::from_slice(&key.value),
                    )?,
                    TrackValueType::Vec4 => self.add_builtin_key(
                        handle,
                        track.target,
                        track.mode,
                        key.t,
                        Vec4::from_slice(&key.value),
                    )?,
                }
            }
            if !track.enabled {
                self.set_builtin_track_enabled(handle, track.target, false)?;
            }
        }
        for track in &preset.uniform_tracks {
            for key in &track.keys {
                let name = track.name.as_str();
                match track.value_type {
                    TrackValueType::Float => self.add_uniform_key(handle, name, track.mode, key.t, key.value[0])?,
                    TrackValueType::Vec2 => {
                        self.add_uniform_key(handle, name, track.mode, key.t, Vec2::from_slice(&key.value))?
                    }
                    TrackValueType::Vec3 => {
                        self.add_uniform_key(handle, name, track.mode, key.t, Vec3::from_slice(&key.value))?
                    }
                    TrackValueType::Vec4 => {
                        self.add_uniform_key(handle, name, track.mode, key.t, Vec4::from_slice(&key.value))?
                    }
                }
            }
        }
        Ok(())
    }
}
