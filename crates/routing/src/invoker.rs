use {
    async_trait::async_trait,
    catmandu_mcp::{
        HandlerConfig, InvocationError, InvocationResult, SessionOrchestrator, ToolArguments,
    },
};

/// Runs a handler tool on the router's behalf.
#[async_trait]
pub trait HandlerInvoker: Send + Sync {
    async fn invoke(
        &self,
        handler: &HandlerConfig,
        tool: &str,
        args: ToolArguments,
        caller: Option<&str>,
    ) -> Result<InvocationResult, InvocationError>;
}

#[async_trait]
impl HandlerInvoker for SessionOrchestrator {
    async fn invoke(
        &self,
        handler: &HandlerConfig,
        tool: &str,
        args: ToolArguments,
        caller: Option<&str>,
    ) -> Result<InvocationResult, InvocationError> {
        SessionOrchestrator::invoke(self, handler, tool, args.into_map(), caller).await
    }
}
