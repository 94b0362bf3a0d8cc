use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RenderError, RenderResult};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`StatisticalData`] instance.
///
/// Binding the same instance again only refreshes coefficients; binding a
/// different one re-uploads mean and basis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelId(u64);

impl ModelId {
    fn next() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Linear PCA model: `mean + basis * pcs`.
///
/// `basis` is row-major with `rows * parameters` entries.
#[derive(Debug)]
pub struct StatisticalData {
    id: ModelId,
    mean: Vec<f32>,
    basis: Vec<f32>,
    pcs: Vec<f32>,
    pc: Vec<f32>,
    std: Vec<f32>,
    number_of_settings: usize,
}

impl StatisticalData {
    pub fn new(mean: Vec<f32>, basis: Vec<f32>, pcs: Vec<f32>) -> RenderResult<Self> {
        let rows = mean.len();
        let parameters = pcs.len();
        if basis.len() != rows * parameters {
            return Err(RenderError::ModelMismatch(format!(
                "basis has {} entries, expected {rows} x {parameters}",
                basis.len()
            )));
        }

        Ok(Self {
            id: ModelId::next(),
            mean,
            basis,
            pcs,
            pc: Vec::new(),
            std: Vec::new(),
            number_of_settings: 0,
        })
    }

    /// Model with all coefficients at zero, i.e. reconstructing the mean.
    pub fn from_mean_and_basis(mean: Vec<f32>, basis: Vec<f32>, parameters: usize) -> RenderResult<Self> {
        Self::new(mean, basis, vec![0.0; parameters])
    }

    /// Attach the per-setting coefficient table, `parameters * settings` entries.
    pub fn with_pc(mut self, pc: Vec<f32>, settings: usize) -> RenderResult<Self> {
        if pc.len() != self.number_of_parameters() * settings {
            return Err(RenderError::ModelMismatch(format!(
                "pc table has {} entries, expected {} x {settings}",
                pc.len(),
                self.number_of_parameters()
            )));
        }
        self.pc = pc;
        self.number_of_settings = settings;
        Ok(self)
    }

    pub fn with_std(mut self, std: Vec<f32>) -> RenderResult<Self> {
        if std.len() != self.number_of_parameters() {
            return Err(RenderError::ModelMismatch(format!(
                "std table has {} entries, expected {}",
                std.len(),
                self.number_of_parameters()
            )));
        }
        self.std = std;
        Ok(self)
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn basis(&self) -> &[f32] {
        &self.basis
    }

    pub fn pcs(&self) -> &[f32] {
        &self.pcs
    }

    pub fn pc(&self) -> &[f32] {
        &self.pc
    }

    pub fn std(&self) -> &[f32] {
        &self.std
    }

    pub fn number_of_rows(&self) -> usize {
        self.mean.len()
    }

    pub fn number_of_parameters(&self) -> usize {
        self.pcs.len()
    }

    pub fn number_of_settings(&self) -> usize {
        self.number_of_settings
    }

    pub fn update_pcs(&mut self, index: usize, value: f32) -> RenderResult<()> {
        let count = self.pcs.len();
        let slot = self
            .pcs
            .get_mut(index)
            .ok_or(RenderError::ParameterIndexOutOfRange { index, count })?;
        *slot = value;
        Ok(())
    }

    pub fn set_pcs(&mut self, pcs: &[f32]) -> RenderResult<()> {
        if pcs.len() != self.pcs.len() {
            return Err(RenderError::ModelMismatch(format!(
                "got {} coefficients, model has {}",
                pcs.len(),
                self.pcs.len()
            )));
        }
        self.pcs.copy_from_slice(pcs);
        Ok(())
    }

    /// `basis * pcs` evaluated on the host.
    pub fn diff(&self) -> Vec<f32> {
        let parameters = self.pcs.len();
        if parameters == 0 {
            return vec![0.0; self.mean.len()];
        }
        self.basis
            .chunks_exact(parameters)
            .map(|row| row.iter().zip(&self.pcs).map(|(b, p)| b * p).sum())
            .collect()
    }

    /// `mean + basis * pcs` evaluated on the host.
    pub fn reconstruct(&self) -> Vec<f32> {
        self.mean.iter().zip(self.diff()).map(|(m, d)| m + d).collect()
    }
}

impl Clone for StatisticalData {
    /// A copy is a distinct model and gets its own identity.
    fn clone(&self) -> Self {
        Self {
            id: ModelId::next(),
            mean: self.mean.clone(),
            basis: self.basis.clone(),
            pcs: self.pcs.clone(),
            pc: self.pc.clone(),
            std: self.std.clone(),
            number_of_settings: self.number_of_settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> StatisticalData {
        // 3 rows, 2 parameters
        StatisticalData::new(
            vec![1.0, 2.0, 3.0],
            vec![1.0, 0.0, 0.0, 1.0, 2.0, -1.0],
            vec![0.0, 0.0],
        )
        .unwrap()
    }

    #[test]
    fn reconstruct_applies_coefficients() {
        let mut data = model();
        assert_eq!(data.reconstruct(), vec![1.0, 2.0, 3.0]);

        data.update_pcs(0, 2.0).unwrap();
        data.update_pcs(1, 1.0).unwrap();
        let values = data.reconstruct();
        assert_relative_eq!(values[0], 3.0);
        assert_relative_eq!(values[1], 3.0);
        assert_relative_eq!(values[2], 6.0);
    }

    #[test]
    fn update_out_of_range_is_reported() {
        let mut data = model();
        assert!(matches!(
            data.update_pcs(2, 1.0),
            Err(RenderError::ParameterIndexOutOfRange { index: 2, count: 2 })
        ));
        assert!(data.set_pcs(&[1.0]).is_err());
    }

    #[test]
    fn basis_shape_is_validated() {
        let result = StatisticalData::new(vec![0.0; 3], vec![0.0; 5], vec![0.0; 2]);
        assert!(matches!(result, Err(RenderError::ModelMismatch(_))));
    }

    #[test]
    fn copies_get_new_identity() {
        let data = model();
        let copy = data.clone();
        assert_ne!(data.id(), copy.id());
        assert_eq!(data.mean(), copy.mean());
    }

    #[test]
    fn optional_tables() {
        let data = model()
            .with_pc(vec![0.5; 6], 3)
            .unwrap()
            .with_std(vec![1.0, 2.0])
            .unwrap();
        assert_eq!(data.number_of_settings(), 3);
        assert_eq!(data.std(), &[1.0, 2.0]);
        assert!(model().with_std(vec![1.0]).is_err());
    }
}
