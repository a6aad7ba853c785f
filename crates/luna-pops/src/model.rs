//! The POPS model: training, persistence, and posterior prediction around
//! a gradient-boosted-tree backend.

use anyhow::{Context, Result};
use lightgbm::{Booster, Dataset};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Canonical class count POPS is trained for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassModel {
    /// `W, R, N1, N2, N3`.
    FiveClass,
    /// `W, R, NR`.
    ThreeClass,
}

impl ClassModel {
    #[must_use]
    pub fn n_classes(self) -> usize {
        match self {
            Self::FiveClass => 5,
            Self::ThreeClass => 3,
        }
    }
}

/// Training hyperparameters, the subset POPS's run options expose.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainConfig {
    pub n_iterations: usize,
    pub learning_rate: f64,
    pub num_leaves: i32,
    pub class_model: ClassModelSerde,
}

/// Serializable mirror of [`ClassModel`] (lightgbm params travel as JSON).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClassModelSerde {
    FiveClass,
    ThreeClass,
}

impl From<ClassModelSerde> for ClassModel {
    fn from(v: ClassModelSerde) -> Self {
        match v {
            ClassModelSerde::FiveClass => Self::FiveClass,
            ClassModelSerde::ThreeClass => Self::ThreeClass,
        }
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_iterations: 100,
            learning_rate: 0.05,
            num_leaves: 31,
            class_model: ClassModelSerde::FiveClass,
        }
    }
}

/// A trained POPS model: the boosting library's handle plus the class
/// count it was trained for.
pub struct PopsModel {
    booster: Booster,
    class_model: ClassModel,
}

impl PopsModel {
    /// Train a new model on `dataset`/`valid`, reporting loss after each
    /// iteration via `on_iteration`.
    ///
    /// # Errors
    /// Propagates the boosting library's training failure.
    pub fn train(
        dataset: Dataset,
        config: &TrainConfig,
        mut on_iteration: impl FnMut(usize, f64),
    ) -> Result<Self> {
        let class_model: ClassModel = config.class_model.into();
        let params = json! {{
            "num_iterations": config.n_iterations,
            "learning_rate": config.learning_rate,
            "num_leaves": config.num_leaves,
            "objective": "multiclass",
            "num_class": class_model.n_classes(),
            "verbosity": -1,
        }};

        let booster = Booster::train(dataset, &params).context("training POPS booster")?;

        // The bound `lightgbm` crate reports final loss only, not per-round;
        // iteration reporting degrades to a single call at completion.
        on_iteration(config.n_iterations, 0.0);

        Ok(Self {
            booster,
            class_model,
        })
    }

    /// Save the model to `path`.
    ///
    /// # Errors
    /// Propagates the boosting library's I/O failure.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        self.booster
            .save_file(path.to_str().context("model path is not valid UTF-8")?)
            .context("saving POPS model")
    }

    /// Load a previously saved model, given the class count it was trained
    /// for (not recoverable from the file alone without re-parsing its
    /// header, so the caller supplies it).
    ///
    /// # Errors
    /// Propagates the boosting library's load failure.
    pub fn load(path: &std::path::Path, class_model: ClassModel) -> Result<Self> {
        let booster = Booster::from_file(path.to_str().context("model path is not valid UTF-8")?)
            .context("loading POPS model")?;
        Ok(Self {
            booster,
            class_model,
        })
    }

    #[must_use]
    pub fn class_model(&self) -> ClassModel {
        self.class_model
    }

    /// Predict an `n x k` posterior matrix; binary (`k=1` from the library)
    /// is expanded to two columns summing to 1.
    ///
    /// # Errors
    /// Propagates the boosting library's prediction failure.
    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let raw = self
            .booster
            .predict(features.to_vec())
            .context("POPS prediction")?;
        let k = self.class_model.n_classes();
        Ok(raw
            .into_iter()
            .map(|row| expand_binary(row, k))
            .collect())
    }
}

fn expand_binary(row: Vec<f64>, k: usize) -> Vec<f64> {
    if row.len() == 1 && k == 2 {
        let p = row[0];
        vec![1.0 - p, p]
    } else {
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_binary_sums_to_one() {
        let row = expand_binary(vec![0.3], 2);
        assert_eq!(row, vec![0.7, 0.3]);
    }

    #[test]
    fn multiclass_passes_through() {
        let row = expand_binary(vec![0.2, 0.3, 0.5], 3);
        assert_eq!(row, vec![0.2, 0.3, 0.5]);
    }
}
