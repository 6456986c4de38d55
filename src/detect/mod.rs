mod backend;
pub mod backends;
mod result;
mod sampler;

pub use backend::DetectorBackend;
pub use backends::{backend_by_name, BackendOptions, CpuBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, DetectionResult, DetectorParams};
pub use sampler::{DetectionSampler, SamplerConfig};
