//! Kernel handles.

use std::collections::HashMap;
use std::sync::Arc;

use bon::bon;
use parking_lot::Mutex;
use tessera_device::{CompileOptions, Constant, DeviceIndex, ExecutionRuntime, LaunchArg, OpId, Operator};
use tessera_dtype::Signature;

use crate::define::Defines;
use crate::device_registry::RegisteredDevices;
use crate::error::Result;
use crate::jit::Jit;
use crate::launch::{LaunchOptions, LaunchOutcome, dispatch};

/// Warp counts tried when none are given.
pub const DEFAULT_NUM_WARPS: [u32; 3] = [2, 4, 8];

/// A kernel compiled for one set of compile-time options.
///
/// The operator is resolved when the handle is built; per-device specialization
/// happens lazily on the first launch on each device.
pub struct Kernel {
    source: String,
    options: CompileOptions,
    signature: Signature,
    key: String,
    op_id: OpId,
    operator: Arc<dyn Operator>,
    devices: RegisteredDevices,
    constants: Mutex<HashMap<String, Constant>>,
    runtime: Arc<dyn ExecutionRuntime>,
}

#[bon]
impl Kernel {
    /// Build a kernel from `source`, compiling its operator if the cache has none.
    ///
    /// ```ignore
    /// let kernel = Kernel::builder(&jit, src).defines(Defines::new().with("BLOCK", 1024)).num_warps(vec![4]).build()?;
    /// ```
    #[builder]
    pub fn new(
        #[builder(start_fn)] jit: &Jit,
        #[builder(start_fn, into)] source: String,
        #[builder(default)] defines: Defines,
        #[builder(default = DEFAULT_NUM_WARPS.to_vec())] num_warps: Vec<u32>,
    ) -> Result<Self> {
        let options = defines.to_options(num_warps)?;
        let signature = jit.compiler().signature_of(&source, &options)?;
        let key = signature.key();
        let operator = jit.operator(&signature)?;
        let op_id = OpId::next();

        tracing::debug!(
            kernel.op = %op_id,
            cache.key = %key,
            kernel.variants = options.variant_count(),
            "kernel ready"
        );

        Ok(Self {
            source,
            options,
            signature,
            key,
            op_id,
            operator,
            devices: RegisteredDevices::new(),
            constants: Mutex::new(HashMap::new()),
            runtime: Arc::clone(jit.runtime()),
        })
    }
}

impl Kernel {
    /// Launch with positional `args`. See [`dispatch`].
    pub fn launch(&self, args: &[LaunchArg], options: &LaunchOptions) -> Result<LaunchOutcome> {
        dispatch(self, args, options)
    }

    /// Register a named constant with the runtime and remember its value.
    pub fn set_constant(&self, name: &str, value: impl Into<Constant>) -> Result<()> {
        let value = value.into();
        self.runtime.register_constant(self.op_id, name, &value)?;
        tracing::debug!(kernel.op = %self.op_id, constant.name = %name, constant.bytes = value.len(), "constant set");
        self.constants.lock().insert(name.to_string(), value);
        Ok(())
    }

    /// Last value set for constant `name`.
    pub fn constant(&self, name: &str) -> Option<Constant> {
        self.constants.lock().get(name).cloned()
    }

    pub fn op_id(&self) -> OpId {
        self.op_id
    }

    /// Cache key of the operator, i.e. the encoded signature.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Devices this kernel has been specialized for, ascending.
    pub fn registered_devices(&self) -> Vec<DeviceIndex> {
        self.devices.snapshot()
    }

    pub(crate) fn devices(&self) -> &RegisteredDevices {
        &self.devices
    }

    pub(crate) fn operator(&self) -> &dyn Operator {
        self.operator.as_ref()
    }

    pub(crate) fn runtime(&self) -> &dyn ExecutionRuntime {
        self.runtime.as_ref()
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("op_id", &self.op_id)
            .field("key", &self.key)
            .field("options", &self.options)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}
