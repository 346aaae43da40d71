

//! Core library for the vactor framework.
//! Provides the runtime core of a virtual actor system: invocation routing, per-actor
//! serialized execution, the handler pipeline and the response cache.
//! Transports, wire codecs and persistence plug into the pipeline as handlers.

pub use runtime::{
    Activation, Actor, ActorCell, AddressableReference, BincodeCloner,
    CacheSpec, DeepCloner, DispatchTable, Error, ExecutionRouter,
    ExecutionSerializer, Executor, Handler, HandlerContext, Immutability,
    InterfaceId, Invocation, Job, Key, LengthFieldFramer, LocalActivation,
    LocalActivationRegistry, Message, MethodDescriptor, MethodId,
    MultiExecutionSerializer, NodeAddress, Pipeline, PipelineEvent, Reply,
    ResponseCache, Runtime, RuntimeConfig, StructuralCloner, Task,
    TokioExecutor, Value,
};
