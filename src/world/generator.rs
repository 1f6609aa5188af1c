// src/world/generator.rs

use glam::IVec2;
use noise::{NoiseFn, Perlin};

use crate::config::{NoiseConfig, Octave};
use crate::world::hash::layer_seed;

struct NoiseLayer {
    perlin: Perlin,
    octaves: Vec<Octave>,
}

impl NoiseLayer {
    fn new(seed: u32, octaves: &[Octave]) -> Self {
        Self {
            perlin: Perlin::new(seed),
            octaves: octaves.to_vec(),
        }
    }

    #[inline(always)]
    fn sample(&self, o: &Octave, xm: f64, zm: f64) -> f64 {
        self.perlin.get([xm * o.frequency, zm * o.frequency, 0.0])
    }

    fn sum(&self, xm: f64, zm: f64) -> f64 {
        self.octaves.iter().map(|o| o.amplitude * self.sample(o, xm, zm)).sum()
    }

    fn ridged_sum(&self, xm: f64, zm: f64, mult: f64) -> f64 {
        self.octaves
            .iter()
            .map(|o| o.amplitude * (1.0 - self.sample(o, xm, zm).abs()) * mult)
            .sum()
    }
}

/// Procedural height source. A pure function of (coordinate, level, seed).
pub struct HeightField {
    pub seed: u32,
    texel_size: f64,
    base_height: f64,

    ridge_mult: NoiseLayer,
    ridge: NoiseLayer,
    white: NoiseLayer,
}

impl HeightField {
    pub fn new(seed: u32, texel_size: f32, noise: &NoiseConfig) -> Self {
        Self {
            seed,
            texel_size: texel_size as f64,
            base_height: noise.base_height as f64,
            ridge_mult: NoiseLayer::new(layer_seed(seed, 0x9C9C_9C9C), &noise.ridge_mult),
            ridge: NoiseLayer::new(layer_seed(seed, 0xA5A5_A5A5), &noise.ridge),
            white: NoiseLayer::new(layer_seed(seed, 0xD1D1_D1D1), &noise.white),
        }
    }

    /// World-space (x, z) in meters sampled for a level-global coordinate.
    ///
    /// Level 0 samples sit on the grid corners; coarser levels sample the
    /// centre of their texel.
    #[inline]
    pub fn sample_position(&self, c: IVec2, level: u32) -> (f64, f64) {
        let spacing = (1u64 << level) as f64;
        let centre = if level > 0 { spacing * 0.5 } else { 0.0 };
        (
            (c.x as f64 * spacing + centre) * self.texel_size,
            (c.y as f64 * spacing + centre) * self.texel_size,
        )
    }

    pub fn generate_height(&self, c: IVec2, level: u32) -> f32 {
        let (xm, zm) = self.sample_position(c, level);

        let mult = (1.0 + self.ridge_mult.sum(xm, zm)).clamp(0.0, 2.0);
        let ridges = self.ridge.ridged_sum(xm, zm, mult);
        let detail = self.white.sum(xm, zm);

        (self.base_height + ridges + detail) as f32
    }
}
