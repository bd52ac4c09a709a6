//! Model registry
//!
//! Pose oracles are expensive to construct, so pipelines asking for the same model id
//! share one instance. Each id gets its own `OnceCell`: the map lock is held only to find
//! or insert the cell, and concurrent first requests for one id block on that cell while
//! a single loader call runs.

use super::pose::{OracleLoader, PoseOracle};
use crate::error::Result;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

type OracleCell = Arc<OnceCell<Arc<dyn PoseOracle>>>;

pub struct ModelRegistry {
    loader: Arc<dyn OracleLoader>,
    models: Mutex<HashMap<String, OracleCell>>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn OracleLoader>) -> Self {
        Self {
            loader,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Shared oracle for `model_id`, loading it on first use
    ///
    /// A failed load is not cached; the next request retries.
    pub fn get(&self, model_id: &str) -> Result<Arc<dyn PoseOracle>> {
        let cell = {
            let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                models
                    .entry(model_id.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let oracle = cell.get_or_try_init(|| {
            info!("Loading pose model {}", model_id);
            self.loader.load(model_id)
        })?;
        Ok(Arc::clone(oracle))
    }

    /// Model ids with a loaded oracle
    pub fn loaded(&self) -> Vec<String> {
        let models = self.models.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = models
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
