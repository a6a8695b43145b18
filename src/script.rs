use std::ffi::CString;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::abi::ScriptRef;
use crate::dispatch::Core;
use crate::error::{BridgeError, BridgeResult};
use crate::variant::Variable;

/// Native scripting environment rooted at a search path.
#[derive(Debug)]
pub struct ScriptEnv {
    reference: ScriptRef,
    path: String,
    core: Arc<Core>,
}

// SAFETY: see `Mesh`.
unsafe impl Send for ScriptEnv {}

impl ScriptEnv {
    pub fn new(core: &Arc<Core>, path: &str) -> BridgeResult<Self> {
        let c_path = CString::new(path).map_err(|_| BridgeError::InvalidName(path.to_string()))?;
        let create = core.script_create()?;
        let reference = unsafe { create(c_path.as_ptr()) };
        if reference.is_null() {
            return Err(BridgeError::AllocationFailed("script environment"));
        }
        debug!(path, "script environment created");
        Ok(Self {
            reference,
            path: path.to_string(),
            core: core.clone(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Evaluates `code` and returns the value the runtime wrote to the output slot.
    pub fn eval(&self, code: &str) -> BridgeResult<Variable> {
        let c_code = CString::new(code).map_err(|_| BridgeError::InvalidName(code.to_string()))?;
        let eval = self.core.script_eval()?;
        let mut output = Variable::new(&self.core);
        let status = unsafe { eval(self.reference, c_code.as_ptr(), output.raw_mut()) };
        if status == 0 {
            return Err(BridgeError::ScriptFailed {
                code: code.to_string(),
            });
        }
        Ok(output)
    }
}

impl Drop for ScriptEnv {
    fn drop(&mut self) {
        match self.core.script_destroy() {
            Ok(destroy) => unsafe { destroy(self.reference) },
            Err(err) => warn!(%err, "failed to destroy script environment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ABI_VERSION;
    use crate::loopback::Loopback;

    fn env() -> ScriptEnv {
        let core = Core::connect(Arc::new(Loopback::new()), ABI_VERSION).expect("connect");
        ScriptEnv::new(&core, ".").expect("env")
    }

    #[test]
    fn evaluates_literals() {
        let env = env();
        assert_eq!(env.eval("3.5").expect("float").as_float(), Some(3.5));
        assert_eq!(env.eval("true").expect("bool").as_bool(), Some(true));
        assert_eq!(env.eval("\"text\"").expect("string").as_str(), Some("text"));
    }

    #[test]
    fn failure_byte_maps_to_error() {
        let env = env();
        assert_eq!(
            env.eval("(def x 1)").unwrap_err(),
            BridgeError::ScriptFailed {
                code: "(def x 1)".into()
            }
        );
    }
}
