pub mod clipmap;
pub mod config;
pub mod error;
pub mod gpu;
pub mod profiler;
pub mod terrain;
pub mod world;

pub use clipmap::{Clipmap, ClipmapLevel, LevelPhase, UpdateStats};
pub use config::{NoiseConfig, Octave, TerrainConfig};
pub use error::{GpuError, TerrainError};
pub use gpu::{QueueKind, SoftGpu, TerrainGpu, WgpuGpu};
pub use terrain::Terrain;
pub use world::{DirtyRegion, HeightField, TerrainHeights, TileKey};
