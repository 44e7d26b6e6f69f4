use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};

use crate::eval::EvalError;

/// Raw per-image outputs of one evaluation run: probability rows `[N, C]`
/// and the true labels `[N, 1]`, persisted for downstream analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    pub probabilities: Array2<f32>,
    pub targets: Array2<i64>,
}

pub const PREDICTIONS_FILE: &str = "predictions.safetensors";

impl Predictions {
    pub fn from_rows(probabilities: Array2<f32>, targets: Vec<i64>) -> Self {
        let targets = Array1::from_vec(targets).insert_axis(Axis(1));
        Self {
            probabilities,
            targets,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.probabilities.nrows()
    }

    pub fn num_columns(&self) -> usize {
        self.probabilities.ncols()
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf, EvalError> {
        let path = dir.join(PREDICTIONS_FILE);

        let probability_bytes: Vec<u8> = self
            .probabilities
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        let target_bytes: Vec<u8> = self
            .targets
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();

        let tensors = vec![
            (
                "probabilities".to_string(),
                TensorView::new(
                    Dtype::F32,
                    self.probabilities.shape().to_vec(),
                    &probability_bytes,
                )?,
            ),
            (
                "targets".to_string(),
                TensorView::new(Dtype::I64, self.targets.shape().to_vec(), &target_bytes)?,
            ),
        ];

        safetensors::serialize_to_file(tensors, &None, &path)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, EvalError> {
        let bytes = std::fs::read(path).map_err(|source| EvalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tensors = SafeTensors::deserialize(&bytes)?;

        let probabilities = read_matrix(&tensors, "probabilities", read_f32)?;
        let targets = read_matrix(&tensors, "targets", read_i64)?;

        Ok(Self {
            probabilities,
            targets,
        })
    }
}

fn read_matrix<T>(
    tensors: &SafeTensors<'_>,
    name: &'static str,
    decode: fn(&TensorView<'_>) -> Vec<T>,
) -> Result<Array2<T>, EvalError> {
    let view = tensors
        .tensor(name)
        .map_err(|_| EvalError::MissingTensor(name))?;
    let shape: [usize; 2] = view
        .shape()
        .try_into()
        .map_err(|_| EvalError::UnexpectedRank {
            tensor: name,
            expected: 2,
            actual: view.shape().len(),
        })?;

    Array2::from_shape_vec((shape[0], shape[1]), decode(&view))
        .map_err(|err| EvalError::Tensor(format!("tensor `{name}`: {err}")))
}

fn read_f32(view: &TensorView<'_>) -> Vec<f32> {
    view.data()
        .chunks_exact(4)
        .map(|chunk| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(chunk);
            f32::from_le_bytes(bytes)
        })
        .collect()
}

fn read_i64(view: &TensorView<'_>) -> Vec<i64> {
    view.data()
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            i64::from_le_bytes(bytes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn round_trips_through_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let predictions = Predictions::from_rows(
            array![[0.7, 0.2, 0.1], [0.1, 0.8, 0.1]],
            vec![0, 1],
        );

        let path = predictions.save(dir.path()).unwrap();
        let loaded = Predictions::load(&path).unwrap();

        assert_eq!(loaded, predictions);
        assert_eq!(loaded.num_samples(), 2);
        assert_eq!(loaded.num_columns(), 3);
        assert_eq!(loaded.targets.shape(), &[2, 1]);
    }

    #[test]
    fn missing_tensor_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.safetensors");

        let bytes: Vec<u8> = 1.0f32.to_le_bytes().to_vec();
        let view = TensorView::new(Dtype::F32, vec![1, 1], &bytes).unwrap();
        safetensors::serialize_to_file(vec![("probabilities".to_string(), view)], &None, &path)
            .unwrap();

        let result = Predictions::load(&path);
        assert!(matches!(result, Err(EvalError::MissingTensor("targets"))));
    }

    #[test]
    fn rejects_unexpected_rank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.safetensors");

        let bytes: Vec<u8> = [0.5f32, 0.5]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let probabilities = TensorView::new(Dtype::F32, vec![2], &bytes).unwrap();
        let target_bytes: Vec<u8> = 1i64.to_le_bytes().to_vec();
        let targets = TensorView::new(Dtype::I64, vec![1, 1], &target_bytes).unwrap();
        safetensors::serialize_to_file(
            vec![
                ("probabilities".to_string(), probabilities),
                ("targets".to_string(), targets),
            ],
            &None,
            &path,
        )
        .unwrap();

        let result = Predictions::load(&path);
        assert!(matches!(
            result,
            Err(EvalError::UnexpectedRank {
                tensor: "probabilities",
                ..
            })
        ));
    }
}
