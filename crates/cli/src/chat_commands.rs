use std::sync::Arc;

use {
    anyhow::Result,
    catmandu_accumulator::AccumulatorManager,
    catmandu_common::{InboundMessage, Sender},
    catmandu_config::CatmanduConfig,
    catmandu_mcp::HandlerRegistry,
    catmandu_routing::CommandRouter,
    clap::Args,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
        sync::watch,
    },
    tracing::{debug, info, warn},
};

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ChatArgs {
    /// Chat the console session speaks for.
    #[arg(long, default_value_t = 1)]
    pub chat_id: i64,
    /// Username forwarded to handlers as the caller.
    #[arg(long)]
    pub username: Option<String>,
}

impl Default for ChatArgs {
    fn default() -> Self {
        Self {
            chat_id: 1,
            username: None,
        }
    }
}

/// Read messages from stdin until EOF or Ctrl-C, printing each reply.
pub async fn run(config: &CatmanduConfig, registry: HandlerRegistry, args: ChatArgs) -> Result<()> {
    let orchestrator = crate::orchestrator(config);
    let mut router = CommandRouter::new(
        Arc::new(registry),
        Arc::new(AccumulatorManager::from_config(&config.accumulator)),
        orchestrator.clone(),
    );
    if let Some(chat_log) = crate::chat_log(config) {
        router = router.with_chat_log(chat_log);
    }
    let sender = match args.username {
        Some(name) => Sender::with_username(name),
        None => Sender::default(),
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let signals = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = stop_tx.send(true);
            },
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });

    info!(chat_id = args.chat_id, "console chat ready, end input with Ctrl-D");
    let served = serve(
        &router,
        args.chat_id,
        &sender,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        stop_rx,
    )
    .await;

    signals.abort();
    orchestrator.close_all().await;
    info!("console chat closed");
    served
}

/// Route every line of `input` until EOF or until `stop` turns true, which
/// also abandons a command still in flight.
async fn serve<R, W>(
    router: &CommandRouter,
    chat_id: i64,
    sender: &Sender,
    input: R,
    mut output: W,
    mut stop: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            Ok(_) = stop.wait_for(|stopped| *stopped) => {
                debug!("interrupted");
                None
            },
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = InboundMessage::new(chat_id, sender.clone(), line);
        let reply = tokio::select! {
            reply = router.route(&message) => reply,
            Ok(_) = stop.wait_for(|stopped| *stopped) => {
                info!("interrupted while a command was running");
                return Ok(());
            },
        };
        if let Some(reply) = reply {
            output.write_all(reply.text.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
    }
}
