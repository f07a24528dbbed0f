use callscope_core::CodecConfig;

/// How an inbound dispatcher treats calls that arrive without context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgePolicy {
    /// Install exactly what was received: an empty correlation id and no
    /// payload when the caller sent nothing.
    #[default]
    PassThrough,
    /// This listener is the edge of the system: a missing correlation id is
    /// replaced by a fresh one and a missing payload by the default payload.
    Originate,
}

/// Configuration shared by the context decorators.
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    pub codec: CodecConfig,
    pub edge_policy: EdgePolicy,
}
