use super::context::{Chains, ContextCore};
use crate::invocation::{box_value, BoxedValue, Invocation};
use crate::signature::MethodSignature;
use interpose_runtime::{MethodId, ObjectRef, RuntimeResult, Value};
use std::sync::Arc;

/// Description of one intercepted call, handed to every interceptor
pub struct HookCall<'a> {
    receiver: &'a ObjectRef,
    method: MethodId,
    args: &'a [Value],
    signature: &'a Arc<MethodSignature>,
}

impl<'a> HookCall<'a> {
    pub(crate) fn new(
        receiver: &'a ObjectRef,
        method: MethodId,
        args: &'a [Value],
        signature: &'a Arc<MethodSignature>,
    ) -> Self {
        Self {
            receiver,
            method,
            args,
            signature,
        }
    }

    /// The object the message was sent to
    pub fn receiver(&self) -> &ObjectRef {
        self.receiver
    }

    /// The hooked method
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Raw argument values
    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// The method's signature
    pub fn signature(&self) -> &Arc<MethodSignature> {
        self.signature
    }

    /// Argument `index` boxed per its type tag
    pub fn argument(&self, index: usize) -> Option<BoxedValue> {
        let tag = self.signature.argument_tags().get(index)?;
        box_value(tag, self.args.get(index)?)
    }

    /// Reify the call as an [`Invocation`] targeting the receiver.
    ///
    /// Invoking it sends the message again, through any installed hooks.
    pub fn invocation(&self) -> Invocation {
        Invocation::from_call(self.receiver, self.method, self.signature.clone(), self.args)
    }
}

/// "Call what would otherwise run" thunk handed to Instead interceptors.
///
/// Reaches the next Instead interceptor registered before this one, or the
/// hooked implementation when there is none.
pub struct Next<'a> {
    core: &'a ContextCore,
    chains: &'a Chains,
    level: usize,
    receiver: &'a ObjectRef,
}

impl<'a> Next<'a> {
    pub(crate) fn new(core: &'a ContextCore, chains: &'a Chains, level: usize, receiver: &'a ObjectRef) -> Self {
        Self {
            core,
            chains,
            level,
            receiver,
        }
    }

    /// Continue the call with `args`
    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        let call = HookCall::new(self.receiver, self.core.method(), args, self.core.signature());
        self.core.run_instead(self.chains, self.level, &call)
    }

    /// Continue the call with the arguments it arrived with
    pub fn proceed(&self, call: &HookCall<'_>) -> RuntimeResult<Value> {
        self.call(call.args())
    }
}
