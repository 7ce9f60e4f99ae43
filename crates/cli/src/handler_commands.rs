use std::sync::Arc;

use {
    anyhow::{Result, bail},
    catmandu_mcp::{HandlerRegistry, SessionOrchestrator, ToolArguments},
    clap::Args,
};

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Handler name from its manifest.
    pub handler: String,
    /// Tool (command) to call.
    pub tool: String,
    /// Text argument.
    #[arg(default_value = "")]
    pub text: String,
    /// Accumulated parameter, repeatable.
    #[arg(long = "param")]
    pub params: Vec<String>,
    /// Caller username forwarded to the handler.
    #[arg(long)]
    pub username: Option<String>,
}

pub fn list(registry: &HandlerRegistry) {
    if registry.is_empty() {
        println!("No handlers found.");
        return;
    }
    for handler in registry.handlers() {
        println!(
            "{} {} [{}]",
            handler.name,
            handler.version,
            handler.transport.kind()
        );
        if !handler.description.is_empty() {
            println!("  {}", handler.description);
        }
        for (tool, command) in &handler.commands {
            println!("  /{}_{tool}  {}", handler.name, command.description);
        }
    }
    for warning in registry.warnings() {
        eprintln!("warning: {warning}");
    }
}

pub async fn invoke(
    registry: &HandlerRegistry,
    orchestrator: Arc<SessionOrchestrator>,
    args: InvokeArgs,
) -> Result<()> {
    let Some(handler) = registry.find_by_handler_and_tool(&args.handler, &args.tool) else {
        bail!("no handler '{}' exposing tool '{}'", args.handler, args.tool);
    };

    let arguments = ToolArguments::new(args.text, args.params).into_map();
    let outcome = orchestrator
        .invoke(handler, &args.tool, arguments, args.username.as_deref())
        .await;
    orchestrator.close_all().await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
