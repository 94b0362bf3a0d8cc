//! GPU copies of the bound mesh and statistical models.
//!
//! Large tables live in read-only storage buffers indexed by a single
//! integer. The two reconstruction channels keep `basis * pcs` in packed
//! R32Float textures and recompute them only while [`DiffState::Stale`].

use wgpu::util::DeviceExt;

use crate::encoding::PackedLayout;
use crate::error::{RenderError, RenderResult};
use crate::model::{Mesh, ModelId, StatisticalData};
use crate::renderer::pipelines::{DIFF_FORMAT, Pipelines};

/// Smallest buffer handed to a storage binding.
const MIN_STORAGE_BYTES: usize = 16;

fn storage_bytes<T: bytemuck::Pod>(values: &[T]) -> Vec<u8> {
    let mut bytes = bytemuck::cast_slice(values).to_vec();
    if bytes.len() < MIN_STORAGE_BYTES {
        bytes.resize(MIN_STORAGE_BYTES, 0);
    }
    bytes
}

fn create_storage<T: bytemuck::Pod>(
    device: &wgpu::Device,
    label: &str,
    values: &[T],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: &storage_bytes(values),
        usage: usage | wgpu::BufferUsages::COPY_DST,
    })
}

pub struct MeshBuffers {
    pub vertices: wgpu::Buffer,
    pub colors: wgpu::Buffer,
    pub normals: wgpu::Buffer,
    pub triangles: wgpu::Buffer,
    pub tetrahedra: wgpu::Buffer,
    pub adjacency: wgpu::Buffer,

    pub vertex_count: u32,
    pub triangle_index_count: u32,
    pub tetrahedron_count: u32,
    pub adjacency_count: u32,
}

impl MeshBuffers {
    pub fn new(device: &wgpu::Device, mesh: &Mesh, colors: &[f32], normals: &[f32]) -> Self {
        let vertices = create_storage(
            device,
            "Mean Vertex Buffer",
            mesh.vertices(),
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        let colors = create_storage(device, "Vertex Color Buffer", colors, wgpu::BufferUsages::VERTEX);
        let normals = create_storage(device, "Vertex Normal Buffer", normals, wgpu::BufferUsages::VERTEX);
        let triangles = create_storage(device, "Triangle Index Buffer", mesh.triangles(), wgpu::BufferUsages::INDEX);
        let tetrahedra = create_storage(
            device,
            "Tetrahedron Buffer",
            mesh.tetrahedra(),
            wgpu::BufferUsages::STORAGE,
        );
        let adjacency = create_storage(
            device,
            "Triangle Adjacency Buffer",
            mesh.triangles_adjacency(),
            wgpu::BufferUsages::STORAGE,
        );

        Self {
            vertices,
            colors,
            normals,
            triangles,
            tetrahedra,
            adjacency,
            vertex_count: mesh.number_of_vertices() as u32,
            triangle_index_count: mesh.triangles().len() as u32,
            tetrahedron_count: mesh.number_of_tetrahedra() as u32,
            adjacency_count: mesh.number_of_triangles_adjacency() as u32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffState {
    Clean,
    Stale,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DiffParams {
    pub rows: u32,
    pub parameters: u32,
    pub log2: u32,
    pub mask: u32,
}

/// One reconstruction channel: basis and coefficients on the GPU plus the
/// packed texture the diff pass writes into.
pub struct DiffChannel {
    label: &'static str,
    model: Option<ModelId>,
    rows: u32,
    parameters: u32,

    basis: wgpu::Buffer,
    pcs: wgpu::Buffer,
    params: wgpu::Buffer,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,

    state: DiffState,
    recompute_count: usize,
}

impl DiffChannel {
    pub fn empty(device: &wgpu::Device, pipelines: &Pipelines, packing: PackedLayout, label: &'static str) -> Self {
        let basis = create_storage::<f32>(device, "Basis Buffer", &[], wgpu::BufferUsages::STORAGE);
        let pcs = create_storage::<f32>(device, "Coefficient Buffer", &[], wgpu::BufferUsages::STORAGE);
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Diff Params Buffer"),
            contents: bytemuck::cast_slice(&[DiffParams {
                rows: 0,
                parameters: 0,
                log2: packing.log2(),
                mask: packing.mask(),
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let texture = create_diff_texture(device, packing, 0, label);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = create_diff_bind_group(device, pipelines, &params, &basis, &pcs, label);

        Self {
            label,
            model: None,
            rows: 0,
            parameters: 0,
            basis,
            pcs,
            params,
            texture,
            view,
            bind_group,
            state: DiffState::Clean,
            recompute_count: 0,
        }
    }

    /// Uploads basis and coefficients of `data` and resizes the target.
    pub fn bind(
        &mut self,
        device: &wgpu::Device,
        pipelines: &Pipelines,
        packing: PackedLayout,
        data: &StatisticalData,
    ) {
        self.rows = data.number_of_rows() as u32;
        self.parameters = data.number_of_parameters() as u32;
        self.basis = create_storage(device, "Basis Buffer", data.basis(), wgpu::BufferUsages::STORAGE);
        self.pcs = create_storage(device, "Coefficient Buffer", data.pcs(), wgpu::BufferUsages::STORAGE);
        self.params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Diff Params Buffer"),
            contents: bytemuck::cast_slice(&[DiffParams {
                rows: self.rows,
                parameters: self.parameters,
                log2: packing.log2(),
                mask: packing.mask(),
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        self.texture = create_diff_texture(device, packing, data.number_of_rows(), self.label);
        self.view = self.texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.bind_group = create_diff_bind_group(device, pipelines, &self.params, &self.basis, &self.pcs, self.label);
        self.model = Some(data.id());
        self.state = DiffState::Stale;

        log::info!(
            "{} model bound: {} rows x {} parameters, diff target {}x{}",
            self.label,
            self.rows,
            self.parameters,
            self.texture.width(),
            self.texture.height()
        );
    }

    /// Refreshes the coefficient vector of the already bound model.
    pub fn refresh_pcs(&mut self, queue: &wgpu::Queue, data: &StatisticalData) -> RenderResult<()> {
        if data.number_of_parameters() as u32 != self.parameters {
            return Err(RenderError::ModelMismatch(format!(
                "{} model has {} parameters, {} bound",
                self.label,
                data.number_of_parameters(),
                self.parameters
            )));
        }
        if self.parameters > 0 {
            queue.write_buffer(&self.pcs, 0, bytemuck::cast_slice(data.pcs()));
        }
        self.state = DiffState::Stale;
        Ok(())
    }

    pub fn is_bound_to(&self, data: &StatisticalData) -> bool {
        self.model == Some(data.id())
    }

    pub fn model(&self) -> Option<ModelId> {
        self.model
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn parameters(&self) -> u32 {
        self.parameters
    }

    pub fn state(&self) -> DiffState {
        self.state
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of diff passes encoded since creation.
    pub fn recompute_count(&self) -> usize {
        self.recompute_count
    }

    pub(crate) fn mark_clean(&mut self) {
        self.state = DiffState::Clean;
        self.recompute_count += 1;
    }
}

fn create_diff_texture(device: &wgpu::Device, packing: PackedLayout, rows: usize, label: &str) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&format!("{label} Diff Texture")),
        size: wgpu::Extent3d {
            width: packing.width(),
            height: packing.height_for(rows),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DIFF_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn create_diff_bind_group(
    device: &wgpu::Device,
    pipelines: &Pipelines,
    params: &wgpu::Buffer,
    basis: &wgpu::Buffer,
    pcs: &wgpu::Buffer,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{label} Diff Bind Group")),
        layout: &pipelines.diff_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: basis.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: pcs.as_entire_binding(),
            },
        ],
    })
}

/// Everything the model passes bind in group 1, owned by the root surface.
pub struct ModelBuffers {
    pub packing: PackedLayout,
    packing_uniform: wgpu::Buffer,
    empty_storage: wgpu::Buffer,

    pub mesh: Option<MeshBuffers>,
    /// Host mirror of the mean positions in `mesh.vertices`.
    mean_vertices: Vec<f32>,
    triangles: Vec<u32>,

    bern_coeffs: wgpu::Buffer,
    /// Coefficients per tetrahedron of the bound density model, 0 if none.
    pub coefficients_per_tetrahedron: u32,

    pub shape: DiffChannel,
    pub density: DiffChannel,

    bind_group: wgpu::BindGroup,
}

impl ModelBuffers {
    pub fn new(device: &wgpu::Device, pipelines: &Pipelines, packing: PackedLayout) -> Self {
        let packing_uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Packing Uniform Buffer"),
            contents: bytemuck::cast_slice(&[packing.uniform()]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let empty_storage = create_storage::<f32>(device, "Empty Storage Buffer", &[], wgpu::BufferUsages::STORAGE);
        let bern_coeffs = create_storage::<f32>(device, "Bernstein Coefficient Buffer", &[], wgpu::BufferUsages::STORAGE);
        let shape = DiffChannel::empty(device, pipelines, packing, "Shape");
        let density = DiffChannel::empty(device, pipelines, packing, "Density");

        let bind_group = create_model_bind_group(
            device,
            pipelines,
            &packing_uniform,
            [&empty_storage, &empty_storage, &empty_storage, &bern_coeffs],
            &shape.view,
            &density.view,
        );

        Self {
            packing,
            packing_uniform,
            empty_storage,
            mesh: None,
            mean_vertices: Vec::new(),
            triangles: Vec::new(),
            bern_coeffs,
            coefficients_per_tetrahedron: 0,
            shape,
            density,
            bind_group,
        }
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    pub fn mean_vertices(&self) -> &[f32] {
        &self.mean_vertices
    }

    pub fn triangles(&self) -> &[u32] {
        &self.triangles
    }

    /// Uploads the mesh tables. `colors` and `normals` default to white and
    /// the mesh normals.
    pub fn set_mesh(
        &mut self,
        device: &wgpu::Device,
        pipelines: &Pipelines,
        mesh: &Mesh,
        colors: Option<&[f32]>,
        normals: Option<&[f32]>,
    ) -> RenderResult<()> {
        let expected = mesh.vertices().len();
        for (name, table) in [("color", colors), ("normal", normals)] {
            if let Some(table) = table.filter(|t| t.len() != expected) {
                return Err(RenderError::InvalidMesh(format!(
                    "{name} table has {} entries, mesh needs {expected}",
                    table.len()
                )));
            }
        }

        if mesh.number_of_tetrahedra() == 0 {
            log::warn!("Tetrahedral mesh is not available, density will be skipped");
        }
        if mesh.number_of_triangles_adjacency() == 0 {
            log::warn!("Triangle adjacency is not available, silhouettes will be skipped");
        }

        let white;
        let colors = match colors {
            Some(colors) => colors,
            None => {
                white = vec![1.0f32; expected];
                &white
            }
        };
        let normals = normals.unwrap_or(mesh.normals());

        self.mesh = Some(MeshBuffers::new(device, mesh, colors, normals));
        self.mean_vertices = mesh.vertices().to_vec();
        self.triangles = mesh.triangles().to_vec();

        // models sized for the previous mesh no longer apply
        self.shape = DiffChannel::empty(device, pipelines, self.packing, "Shape");
        self.density = DiffChannel::empty(device, pipelines, self.packing, "Density");
        self.bern_coeffs = create_storage::<f32>(device, "Bernstein Coefficient Buffer", &[], wgpu::BufferUsages::STORAGE);
        self.coefficients_per_tetrahedron = 0;
        self.rebuild_bind_group(device, pipelines);

        log::info!(
            "Mesh uploaded: {} vertices, {} triangles, {} tetrahedra",
            mesh.number_of_vertices(),
            mesh.number_of_triangles(),
            mesh.number_of_tetrahedra()
        );
        Ok(())
    }

    /// Replaces the mean positions with the shape model mean and, for a new
    /// model, uploads its basis.
    pub fn set_vertices(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipelines: &Pipelines,
        data: &StatisticalData,
    ) -> RenderResult<()> {
        let mesh = self.mesh.as_ref().ok_or(RenderError::MissingMesh)?;
        let expected = mesh.vertex_count as usize * 3;
        if data.number_of_rows() != expected {
            return Err(RenderError::ModelMismatch(format!(
                "shape model has {} rows, mesh needs {expected}",
                data.number_of_rows()
            )));
        }

        queue.write_buffer(&mesh.vertices, 0, bytemuck::cast_slice(data.mean()));
        self.mean_vertices = data.mean().to_vec();

        if !self.shape.is_bound_to(data) {
            self.shape.bind(device, pipelines, self.packing, data);
            self.rebuild_bind_group(device, pipelines);
        } else {
            self.shape.refresh_pcs(queue, data)?;
        }
        Ok(())
    }

    pub fn update_vertices(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipelines: &Pipelines,
        data: &StatisticalData,
    ) -> RenderResult<()> {
        if self.shape.is_bound_to(data) {
            self.shape.refresh_pcs(queue, data)
        } else {
            self.set_vertices(device, queue, pipelines, data)
        }
    }

    /// Uploads the raw per-tetrahedron coefficients. Returns the coefficient
    /// count per tetrahedron so the caller can rebuild the density stage.
    pub fn set_coefficients(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipelines: &Pipelines,
        data: &StatisticalData,
    ) -> RenderResult<u32> {
        let mesh = self.mesh.as_ref().ok_or(RenderError::MissingMesh)?;
        if mesh.tetrahedron_count == 0 {
            log::warn!("Tetrahedral mesh is not available, coefficients ignored");
            return Ok(self.coefficients_per_tetrahedron);
        }

        let rows = data.number_of_rows() as u32;
        if rows % mesh.tetrahedron_count != 0 {
            return Err(RenderError::ModelMismatch(format!(
                "density model has {rows} rows, not a multiple of {} tetrahedra",
                mesh.tetrahedron_count
            )));
        }

        self.bern_coeffs = create_storage(device, "Bernstein Coefficient Buffer", data.mean(), wgpu::BufferUsages::STORAGE);
        self.coefficients_per_tetrahedron = rows / mesh.tetrahedron_count;

        if !self.density.is_bound_to(data) {
            self.density.bind(device, pipelines, self.packing, data);
        } else {
            self.density.refresh_pcs(queue, data)?;
        }
        self.rebuild_bind_group(device, pipelines);
        Ok(self.coefficients_per_tetrahedron)
    }

    /// Returns `Some(count)` when a new model was bound and the density
    /// stage may need a rebuild.
    pub fn update_coefficients(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipelines: &Pipelines,
        data: &StatisticalData,
    ) -> RenderResult<Option<u32>> {
        if self.density.is_bound_to(data) {
            self.density.refresh_pcs(queue, data)?;
            Ok(None)
        } else {
            self.set_coefficients(device, queue, pipelines, data).map(Some)
        }
    }

    fn rebuild_bind_group(&mut self, device: &wgpu::Device, pipelines: &Pipelines) {
        let (vertices, tetrahedra, adjacency) = match &self.mesh {
            Some(mesh) => (&mesh.vertices, &mesh.tetrahedra, &mesh.adjacency),
            None => (&self.empty_storage, &self.empty_storage, &self.empty_storage),
        };
        self.bind_group = create_model_bind_group(
            device,
            pipelines,
            &self.packing_uniform,
            [vertices, tetrahedra, adjacency, &self.bern_coeffs],
            &self.shape.view,
            &self.density.view,
        );
    }
}

fn create_model_bind_group(
    device: &wgpu::Device,
    pipelines: &Pipelines,
    packing: &wgpu::Buffer,
    storage: [&wgpu::Buffer; 4],
    shape_diff: &wgpu::TextureView,
    density_diff: &wgpu::TextureView,
) -> wgpu::BindGroup {
    let [vertices, tetrahedra, adjacency, bern_coeffs] = storage;
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Model Bind Group"),
        layout: &pipelines.model_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: packing.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: vertices.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: tetrahedra.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: adjacency.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: bern_coeffs.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: wgpu::BindingResource::TextureView(shape_diff),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: wgpu::BindingResource::TextureView(density_diff),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_is_never_empty() {
        assert_eq!(storage_bytes::<f32>(&[]).len(), MIN_STORAGE_BYTES);
        assert_eq!(storage_bytes(&[1.0f32]).len(), MIN_STORAGE_BYTES);
        assert_eq!(storage_bytes(&[0u32; 8]).len(), 32);
    }

    #[test]
    fn diff_params_layout() {
        assert_eq!(std::mem::size_of::<DiffParams>(), 16);
    }
}
