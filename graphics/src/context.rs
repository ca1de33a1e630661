//! Startup-time state shared by the compiler, the passes and the executor.
//!
//! A [`GraphContext`] is created once, after the device exists, and handed to
//! the render graph as an `Arc`. It replaces process-wide singletons: the
//! backend, the shader library and the descriptor pool all travel through it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::backend::{
    DescriptorPoolSizes, DeviceCapabilities, GpuBackend, GpuDescriptorPool, GpuDescriptorSet,
    GpuPipeline, GpuShaderModule,
};
use crate::error::GraphicsError;

/// A compiled shader module registered under a name.
#[derive(Debug)]
pub struct ShaderModule {
    /// Library key.
    pub name: String,
    /// GPU module.
    pub module: GpuShaderModule,
}

/// Named shader modules, looked up by pipeline descriptors.
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    modules: HashMap<String, Arc<ShaderModule>>,
}

impl ShaderLibrary {
    /// Look up a module by name.
    pub fn get(&self, name: &str) -> Option<&Arc<ShaderModule>> {
        self.modules.get(name)
    }

    /// Returns true if a module is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if no module is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Shared graph context.
pub struct GraphContext {
    backend: Arc<dyn GpuBackend>,
    capabilities: DeviceCapabilities,
    shaders: RwLock<ShaderLibrary>,
    descriptor_pool: Mutex<GpuDescriptorPool>,
}

impl fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("backend", &self.backend.name())
            .field("capabilities", &self.capabilities)
            .field("shaders", &self.shaders.read().len())
            .finish_non_exhaustive()
    }
}

impl GraphContext {
    /// Create the context and its descriptor pool.
    ///
    /// Fails if the descriptor pool cannot be allocated.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        pool_sizes: DescriptorPoolSizes,
    ) -> Result<Self, GraphicsError> {
        let descriptor_pool = backend.create_descriptor_pool(&pool_sizes).map_err(|e| {
            log::error!("Failed to create descriptor pool: {}", e);
            e
        })?;
        let capabilities = backend.capabilities();
        log::info!(
            "Graph context created on {} (timestamps: {})",
            backend.name(),
            capabilities.timestamps
        );

        Ok(Self {
            backend,
            capabilities,
            shaders: RwLock::new(ShaderLibrary::default()),
            descriptor_pool: Mutex::new(descriptor_pool),
        })
    }

    /// The GPU backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Device capabilities, queried once at creation.
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    /// Compile and register a SPIR-V shader under `name`.
    ///
    /// Replaces any module already registered under the same name; pipelines
    /// compiled from the old module keep it alive until they are rebuilt.
    pub fn register_shader(
        &self,
        name: impl Into<String>,
        code: &[u32],
    ) -> Result<Arc<ShaderModule>, GraphicsError> {
        let name = name.into();
        let module = self.backend.create_shader_module(&name, code)?;
        let module = Arc::new(ShaderModule {
            name: name.clone(),
            module,
        });
        if self
            .shaders
            .write()
            .modules
            .insert(name.clone(), Arc::clone(&module))
            .is_some()
        {
            log::debug!("Replaced shader module '{}'", name);
        }
        Ok(module)
    }

    /// Look up a registered shader.
    pub fn shader(&self, name: &str) -> Option<Arc<ShaderModule>> {
        self.shaders.read().get(name).cloned()
    }

    /// Number of registered shaders.
    pub fn shader_count(&self) -> usize {
        self.shaders.read().len()
    }

    /// Allocate a descriptor set for layout `set` of `pipeline` from the shared pool.
    pub fn allocate_descriptor_set(
        &self,
        pipeline: &GpuPipeline,
        set: u32,
    ) -> Result<GpuDescriptorSet, GraphicsError> {
        let pool = self.descriptor_pool.lock();
        self.backend.allocate_descriptor_set(&pool, pipeline, set)
    }
}

static_assertions::assert_impl_all!(GraphContext: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_register_and_lookup_shader() {
        let context =
            GraphContext::new(Arc::new(DummyBackend::new()), DescriptorPoolSizes::default())
                .unwrap();
        assert!(context.shader("shadow.vert").is_none());

        context.register_shader("shadow.vert", &[0x0723_0203]).unwrap();
        assert_eq!(
            context.shader("shadow.vert").map(|m| m.name.clone()),
            Some("shadow.vert".to_string())
        );
        assert_eq!(context.shader_count(), 1);
    }

    #[test]
    fn test_descriptor_pool_failure_is_fatal() {
        let result = GraphContext::new(
            Arc::new(DummyBackend::new().with_descriptor_pool_failure()),
            DescriptorPoolSizes::default(),
        );
        assert!(matches!(result, Err(GraphicsError::OutOfMemory)));
    }
}
