use crate::error::{VfxError, VfxResult};
use glam::{Vec2, Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle<V> {
    pub position: V,
    pub velocity: V,
    pub color: Vec4,
    pub size: f32,
    pub rotation: f32,
    pub age: f32,
    pub lifetime: f32,
    pub alive: bool,
}

pub type Particle2D = Particle<Vec2>;
pub type Particle3D = Particle<Vec3>;

impl<V: Default> Particle<V> {
    pub fn dead() -> Self {
        Self {
            position: V::default(),
            velocity: V::default(),
            color: Vec4::ZERO,
            size: 0.0,
            rotation: 0.0,
            age: 0.0,
            lifetime: 0.0,
            alive: false,
        }
    }
}

impl<V> Particle<V> {
    pub fn life_fraction(&self) -> f32 {
        super::clamp01(self.age / self.lifetime.max(super::emitter::MIN_LIFETIME))
    }
}

/// Fixed-capacity particle storage with LIFO reuse of dead slots.
///
/// Slot indices are reused after a particle dies, so they only identify a particle for as long
/// as it stays alive.
#[derive(Debug, Clone)]
pub struct ParticlePool<V> {
    particles: Vec<Particle<V>>,
    free_slots: Vec<usize>,
    capacity: usize,
    alive: usize,
}

impl<V: Copy + Default> ParticlePool<V> {
    /// Reserves storage for `capacity` particles up front so spawning never reallocates.
    pub fn with_capacity(capacity: usize) -> VfxResult<Self> {
        let capacity = capacity.max(1);
        let mut particles = Vec::new();
        particles
            .try_reserve_exact(capacity)
            .map_err(|err| VfxError::out_of_memory(format!("particle pool of {capacity}: {err}")))?;
        let mut free_slots = Vec::new();
        free_slots
            .try_reserve_exact(capacity)
            .map_err(|err| VfxError::out_of_memory(format!("free list of {capacity}: {err}")))?;
        Ok(Self { particles, free_slots, capacity, alive: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots allocated so far, dead or alive. Never exceeds [`ParticlePool::capacity`].
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.alive
    }

    pub fn free_slot_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Particles that can still be spawned before the pool is full.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.alive
    }

    pub fn is_full(&self) -> bool {
        self.alive >= self.capacity
    }

    /// Stores `particle` in a free slot, or a fresh one while under capacity.
    /// Returns `None` when the pool is full.
    pub fn spawn(&mut self, particle: Particle<V>) -> Option<usize> {
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None if self.particles.len() < self.capacity => {
                self.particles.push(Particle::dead());
                self.particles.len() - 1
            }
            None => return None,
        };
        self.particles[index] = Particle { alive: true, ..particle };
        self.alive += 1;
        Some(index)
    }

    /// Ages every live particle by `dt`, retiring the expired ones and handing the rest to `update`.
    /// Returns how many expired.
    pub fn advance(&mut self, dt: f32, mut update: impl FnMut(&mut Particle<V>)) -> u32 {
        let mut expired = 0;
        for (index, particle) in self.particles.iter_mut().enumerate() {
            if !particle.alive {
                continue;
            }
            particle.age += dt;
            if particle.age >= particle.lifetime {
                particle.alive = false;
                self.free_slots.push(index);
                expired += 1;
                continue;
            }
            update(particle);
        }
        self.alive -= expired as usize;
        expired
    }

    pub fn get(&self, index: usize) -> Option<&Particle<V>> {
        self.particles.get(index).filter(|particle| particle.alive)
    }

    pub fn iter_alive(&self) -> impl Iterator<Item = &Particle<V>> {
        self.particles.iter().filter(|particle| particle.alive)
    }

    /// Kills every particle. Slots stay allocated for reuse.
    pub fn clear(&mut self) {
        self.free_slots.clear();
        for (index, particle) in self.particles.iter_mut().enumerate().rev() {
            particle.alive = false;
            self.free_slots.push(index);
        }
        self.alive = 0;
    }
}
