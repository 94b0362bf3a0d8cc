pub mod mesh;
pub mod pyramid;
pub mod statistical_data;
pub mod synthetic;

pub use mesh::Mesh;
pub use pyramid::Pyramid;
pub use statistical_data::{ModelId, StatisticalData};
pub use synthetic::SyntheticModel;
