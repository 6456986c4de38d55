pub mod cpu;
pub mod stub;
#[cfg(feature = "backend-tract")]
pub mod tract;

use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub use cpu::CpuBackend;
pub use stub::{StubBackend, STUB_PRESENCE_LEVEL};
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use super::DetectorBackend;

/// Names accepted by [`backend_by_name`].
#[cfg(feature = "backend-tract")]
pub const BACKEND_NAMES: &[&str] = &["cpu", "stub", "tract"];
#[cfg(not(feature = "backend-tract"))]
pub const BACKEND_NAMES: &[&str] = &["cpu", "stub"];

/// Settings only model-based backends read.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendOptions {
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            model_path: None,
            input_width: 320,
            input_height: 240,
            confidence_threshold: 0.7,
        }
    }
}

/// Construct a backend from its configured name.
pub fn backend_by_name(name: &str, options: &BackendOptions) -> Result<Box<dyn DetectorBackend>> {
    match name {
        "cpu" => Ok(Box::new(CpuBackend::new())),
        "stub" => Ok(Box::new(StubBackend::new())),
        "tract" => tract_backend(options),
        other => Err(anyhow!(
            "unknown detector backend '{}' (expected one of: {})",
            other,
            BACKEND_NAMES.join(", ")
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn tract_backend(options: &BackendOptions) -> Result<Box<dyn DetectorBackend>> {
    let model_path = options
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("the tract backend needs a model path"))?;
    let backend = TractBackend::new(model_path, options.input_width, options.input_height)?
        .with_threshold(options.confidence_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_backend(_options: &BackendOptions) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend 'tract' needs a build with the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_builds_except_model_backends() {
        let options = BackendOptions::default();
        for name in BACKEND_NAMES {
            let built = backend_by_name(name, &options);
            if *name == "tract" {
                assert!(built.is_err(), "tract without a model must fail");
            } else {
                assert_eq!(built.unwrap().name(), *name);
            }
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = backend_by_name("haar", &BackendOptions::default()).err().unwrap();
        assert!(err.to_string().contains("unknown detector backend"));
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_requires_the_feature() {
        let options = BackendOptions {
            model_path: Some(PathBuf::from("face.onnx")),
            ..BackendOptions::default()
        };
        let err = backend_by_name("tract", &options).err().unwrap();
        assert!(err.to_string().contains("backend-tract"));
    }
}
