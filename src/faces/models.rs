use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};

use crate::config::{ModelFile, ModelsConfig, TensorLayout};

/// Locate a model file, downloading it first when a URL is configured.
pub fn ensure_model(models: &ModelsConfig, model: &ModelFile) -> Result<PathBuf> {
    let model_path = models.resolve(model);

    if model_path.exists() {
        return Ok(model_path);
    }

    let Some(url) = model.url.as_deref() else {
        bail!(
            "Model {} not found and no download url is configured",
            model_path.display()
        );
    };

    if let Some(parent) = model_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(model = %model_path.display(), %url, "Downloading model...");
    let response = ureq::get(url)
        .call()
        .map_err(|e| anyhow!("Failed to download model: {}", e))?;

    // Write to a temporary name so an interrupted download is never loaded
    let partial = model_path.with_extension("partial");
    let mut file = std::fs::File::create(&partial)?;
    std::io::copy(&mut response.into_reader(), &mut file)?;
    std::fs::rename(&partial, &model_path)?;
    tracing::info!(path = ?model_path, "Model downloaded");

    Ok(model_path)
}

/// Build an inference session for an ONNX model file.
pub fn load_session(path: &Path) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load model {}", path.display()))?;
    Ok(session)
}

/// Pack an RGB image into a `[1, 3, H, W]` or `[1, H, W, 3]` tensor.
pub(crate) fn image_tensor(
    img: &RgbImage,
    layout: TensorLayout,
    normalize: impl Fn(u8) -> f32,
) -> Result<Tensor<f32>> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = width * height;
    let mut input_data = vec![0.0f32; 3 * plane];

    match layout {
        TensorLayout::Nchw => {
            for (idx, pixel) in img.pixels().enumerate() {
                input_data[idx] = normalize(pixel[0]); // R
                input_data[plane + idx] = normalize(pixel[1]); // G
                input_data[2 * plane + idx] = normalize(pixel[2]); // B
            }
            Ok(Tensor::from_array((
                [1usize, 3, height, width],
                input_data.into_boxed_slice(),
            ))?)
        }
        TensorLayout::Nhwc => {
            for (idx, value) in img.as_raw().iter().enumerate() {
                input_data[idx] = normalize(*value);
            }
            Ok(Tensor::from_array((
                [1usize, height, width, 3],
                input_data.into_boxed_slice(),
            ))?)
        }
    }
}

/// Run a single-input model and copy every output out as a flat `f32` buffer.
pub(crate) fn run_flat(session: &mut Session, input: Tensor<f32>) -> Result<Vec<Vec<f32>>> {
    let outputs = session.run(ort::inputs![input])?;

    let mut flat = Vec::with_capacity(outputs.len());
    for (_name, value) in outputs.iter() {
        let (_shape, data) = value.try_extract_tensor::<f32>()?;
        flat.push(data.to_vec());
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_existing_model_is_used() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("face.onnx"), b"model").unwrap();

        let models = ModelsConfig {
            dir: dir.path().to_path_buf(),
            ..ModelsConfig::default()
        };
        let model = ModelFile {
            file: PathBuf::from("face.onnx"),
            url: None,
            layout: TensorLayout::Nchw,
        };

        assert_eq!(ensure_model(&models, &model).unwrap(), dir.path().join("face.onnx"));
    }

    #[test]
    fn test_missing_model_without_url() {
        let dir = tempdir().unwrap();
        let models = ModelsConfig {
            dir: dir.path().to_path_buf(),
            ..ModelsConfig::default()
        };
        let model = ModelFile {
            file: PathBuf::from("absent.onnx"),
            url: None,
            layout: TensorLayout::Nchw,
        };

        let err = ensure_model(&models, &model).unwrap_err();
        assert!(err.to_string().contains("absent.onnx"));
    }
}
