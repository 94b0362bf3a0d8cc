//! Parent/child sharing of one GPU context and its static resources.
//!
//! The root [`ContextNode`] owns a [`SharedResources`]; every descendant
//! holds an `Arc` to its parent and borrows the root's resources, so owners
//! always outlive borrowers. Initialization is lazy and runs up the tree
//! before a child uses anything.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::ContextConfig;
use crate::encoding::PackedLayout;
use crate::error::{RenderError, RenderResult};
use crate::renderer::camera::Pose;
use crate::renderer::density_shader::DensityShaderCache;
use crate::renderer::gpu::GpuContext;
use crate::renderer::model_buffers::ModelBuffers;
use crate::renderer::pipelines::Pipelines;

struct DensityStage {
    cache: DensityShaderCache,
    pipeline: Option<(u32, Arc<wgpu::RenderPipeline>)>,
    rebuild_count: usize,
}

/// Everything created exactly once per tree, on the root.
pub struct SharedResources {
    pub gpu: GpuContext,
    pub pipelines: Pipelines,
    pub model: RwLock<ModelBuffers>,
    density: Mutex<DensityStage>,
}

impl SharedResources {
    pub fn new(gpu: GpuContext) -> RenderResult<Self> {
        let pipelines = Pipelines::new(&gpu)?;
        let model = ModelBuffers::new(&gpu.device, &pipelines, gpu.packing);
        Ok(Self {
            gpu,
            pipelines,
            model: RwLock::new(model),
            density: Mutex::new(DensityStage {
                cache: DensityShaderCache::new(),
                pipeline: None,
                rebuild_count: 0,
            }),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.gpu.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.gpu.queue
    }

    pub fn packing(&self) -> PackedLayout {
        self.gpu.packing
    }

    /// Density pipeline for `count` coefficients per tetrahedron. The
    /// pipeline is rebuilt only when `count` differs from the one bound.
    pub fn density_pipeline(&self, count: u32) -> RenderResult<Arc<wgpu::RenderPipeline>> {
        let mut stage = self.density.lock();
        if let Some((bound, pipeline)) = &stage.pipeline {
            if *bound == count {
                return Ok(pipeline.clone());
            }
        }

        let fragment = stage.cache.source(count).to_string();
        let pipeline = Arc::new(self.pipelines.build_density(&self.gpu, count, &fragment)?);
        stage.pipeline = Some((count, pipeline.clone()));
        stage.rebuild_count += 1;
        log::info!("Density pipeline built for {count} coefficients per tetrahedron");
        Ok(pipeline)
    }

    /// How often the density pipeline was (re)built.
    pub fn density_rebuild_count(&self) -> usize {
        self.density.lock().rebuild_count
    }

    pub fn density_generation_count(&self) -> usize {
        self.density.lock().cache.generation_count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Whether a node created the shared resources or forwards to an ancestor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceRole {
    Owner,
    Borrower,
}

/// Pose of one surface as seen by the rest of the tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoseSlot {
    pub pose: Pose,
    /// Receives and sends pose changes when set.
    pub shared: bool,
}

pub type SharedPose = Arc<Mutex<PoseSlot>>;

struct NodeInner {
    state: NodeState,
    resources: Option<Arc<SharedResources>>,
}

pub struct ContextNode {
    config: ContextConfig,
    parent: Option<Arc<ContextNode>>,
    inner: Mutex<NodeInner>,
    /// Only populated on the root.
    poses: Mutex<Vec<Weak<Mutex<PoseSlot>>>>,
}

impl ContextNode {
    pub fn root(config: ContextConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            parent: None,
            inner: Mutex::new(NodeInner {
                state: NodeState::Uninitialized,
                resources: None,
            }),
            poses: Mutex::new(Vec::new()),
        })
    }

    pub fn child(parent: &Arc<ContextNode>) -> Arc<Self> {
        Arc::new(Self {
            config: parent.config.clone(),
            parent: Some(parent.clone()),
            inner: Mutex::new(NodeInner {
                state: NodeState::Uninitialized,
                resources: None,
            }),
            poses: Mutex::new(Vec::new()),
        })
    }

    pub fn role(&self) -> ResourceRole {
        match self.parent {
            None => ResourceRole::Owner,
            Some(_) => ResourceRole::Borrower,
        }
    }

    pub fn state(&self) -> NodeState {
        self.inner.lock().state
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    fn tree_root(&self) -> &ContextNode {
        let mut node = self;
        while let Some(parent) = &node.parent {
            node = parent;
        }
        node
    }

    /// Returns the shared resources, creating them on first use. A
    /// borrower initializes its ancestors first and never creates GPU
    /// objects itself. A window surface is only created for `window`.
    pub fn ensure_initialized(
        &self,
        window: Option<Arc<winit::window::Window>>,
    ) -> RenderResult<(Arc<SharedResources>, Option<wgpu::Surface<'static>>)> {
        let mut inner = self.inner.lock();
        let ready = match (inner.state, &inner.resources) {
            (NodeState::Ready, Some(resources)) => Some(resources.clone()),
            _ => None,
        };
        if let Some(resources) = ready {
            drop(inner);
            let surface = match window {
                Some(window) => Some(resources.gpu.instance.create_surface(window)?),
                None => None,
            };
            return Ok((resources, surface));
        }

        inner.state = NodeState::Initializing;
        let created = match &self.parent {
            Some(parent) => parent.ensure_initialized(None).and_then(|(resources, _)| {
                let surface = match window {
                    Some(window) => Some(resources.gpu.instance.create_surface(window)?),
                    None => None,
                };
                Ok((resources, surface))
            }),
            None => pollster::block_on(GpuContext::new(&self.config, window))
                .and_then(|(gpu, surface)| Ok((Arc::new(SharedResources::new(gpu)?), surface))),
        };

        match created {
            Ok((resources, surface)) => {
                log::debug!("Context node ready ({:?})", self.role());
                inner.state = NodeState::Ready;
                inner.resources = Some(resources.clone());
                Ok((resources, surface))
            }
            Err(error) => {
                log::error!("Context initialization failed: {error}");
                inner.state = NodeState::Uninitialized;
                Err(error)
            }
        }
    }

    /// Resources if this node is already initialized.
    pub fn resources(&self) -> Option<Arc<SharedResources>> {
        self.inner.lock().resources.clone()
    }

    /// Adds a surface pose to the tree-wide registry.
    pub fn register_pose(&self, pose: &SharedPose) {
        let root = self.tree_root();
        let mut poses = root.poses.lock();
        poses.retain(|slot| slot.strong_count() > 0);
        poses.push(Arc::downgrade(pose));
    }

    /// Copies `pose` into every other sharing surface of the tree.
    pub fn broadcast_pose(&self, from: &SharedPose, pose: Pose) {
        let root = self.tree_root();
        let mut poses = root.poses.lock();
        poses.retain(|slot| slot.strong_count() > 0);
        for slot in poses.iter().filter_map(Weak::upgrade) {
            if Arc::ptr_eq(&slot, from) {
                continue;
            }
            let mut slot = slot.lock();
            if slot.shared {
                slot.pose = pose;
            }
        }
    }

    /// Fails with [`RenderError::NotResourceOwner`] on a borrower, logged at
    /// warn.
    pub fn require_owner(&self, operation: &'static str) -> RenderResult<()> {
        match self.role() {
            ResourceRole::Owner => Ok(()),
            ResourceRole::Borrower => {
                log::warn!("{operation} rejected on a sharing child surface");
                Err(RenderError::NotResourceOwner(operation))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn slot(shared: bool) -> SharedPose {
        Arc::new(Mutex::new(PoseSlot {
            pose: Pose::default(),
            shared,
        }))
    }

    #[test]
    fn roles_follow_parent() {
        let root = ContextNode::root(ContextConfig::default());
        let child = ContextNode::child(&root);
        let grandchild = ContextNode::child(&child);
        assert_eq!(root.role(), ResourceRole::Owner);
        assert_eq!(child.role(), ResourceRole::Borrower);
        assert_eq!(grandchild.role(), ResourceRole::Borrower);
        assert_eq!(grandchild.state(), NodeState::Uninitialized);
        assert!(matches!(child.require_owner("set_mesh"), Err(RenderError::NotResourceOwner("set_mesh"))));
        assert!(root.require_owner("set_mesh").is_ok());
    }

    #[test]
    fn pose_reaches_sharing_surfaces_only() {
        let root = ContextNode::root(ContextConfig::default());
        let child = ContextNode::child(&root);

        let a = slot(true);
        let b = slot(true);
        let c = slot(false);
        root.register_pose(&a);
        child.register_pose(&b);
        child.register_pose(&c);

        let mut pose = Pose::default();
        pose.set_translation(Vec3::new(1.0, 2.0, 3.0));
        child.broadcast_pose(&b, pose);

        assert_eq!(a.lock().pose.translation(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(c.lock().pose.translation(), Vec3::ZERO);
    }

    #[test]
    fn dropped_surfaces_leave_the_registry() {
        let root = ContextNode::root(ContextConfig::default());
        let a = slot(true);
        {
            let b = slot(true);
            root.register_pose(&b);
        }
        root.register_pose(&a);
        assert_eq!(root.poses.lock().len(), 1);
    }
}
