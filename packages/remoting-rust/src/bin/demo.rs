//! Two-service walkthrough over the loopback transport.
//!
//! `service-one` is the edge: its method sleeps, then calls `service-two`
//! through a context-propagating client. `service-two` sleeps longer and
//! answers with the user and correlation id it observed. The driver fires
//! many concurrent calls, each under its own context, and checks every
//! answer came back with the caller's own context.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use bytes::Bytes;
use callscope_core::{ambient, AmbientContext, ContextPayload, CorrelationId, PayloadCodec};
use callscope_remoting::{
    build_dispatch_pipeline, init_tracing, ClientFactory, ClientTarget, ContextClientFactory,
    ContextConfig, EdgePolicy, InboundCall, LogFormat, LoopbackClientFactory, LoopbackNetwork,
    MethodRouter, RemotingError, RequestMessage, ResponseMessage, RetrySettings,
};
use clap::Parser;
use rand::Rng;
use tokio::task::JoinSet;
use tower::service_fn;

const SERVICE_ONE_URI: &str = "fabric:/callscope/service-one";
const SERVICE_TWO_URI: &str = "fabric:/callscope/service-two";

#[derive(Parser, Debug)]
#[command(name = "callscope-demo", about = "Propagate request context across two services")]
struct Args {
    /// Number of concurrent edge calls.
    #[arg(long, env = "CALLSCOPE_CALLS", default_value_t = 8)]
    calls: usize,

    /// UI language carried by every call.
    #[arg(long, env = "CALLSCOPE_LANGUAGE", default_value = "fr")]
    language: String,

    /// Culture code carried by every call.
    #[arg(long, env = "CALLSCOPE_CULTURE", default_value = "fr-FR")]
    culture: String,

    /// Prefix of the per-call user ids.
    #[arg(long, env = "CALLSCOPE_USER_PREFIX", default_value = "user")]
    user_prefix: String,

    #[arg(long, env = "CALLSCOPE_SERVICE_ONE_DELAY_MS", default_value_t = 100)]
    service_one_delay_ms: u64,

    #[arg(long, env = "CALLSCOPE_SERVICE_TWO_DELAY_MS", default_value_t = 400)]
    service_two_delay_ms: u64,

    /// Log output: "pretty" or "json".
    #[arg(long, env = "CALLSCOPE_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

/// What `service-two` saw, rendered as `user|correlation-id`.
fn render_observation(ctx: Option<&AmbientContext>) -> String {
    match ctx {
        Some(ctx) => format!(
            "{}|{}",
            ctx.payload_or_default().user_id().unwrap_or_default(),
            ctx.correlation_id()
        ),
        None => format!("|{}", CorrelationId::EMPTY),
    }
}

fn service_two(delay: Duration) -> MethodRouter {
    MethodRouter::new().route(
        "two",
        service_fn(move |call: InboundCall| {
            let observed = ambient::current();
            async move {
                let payload = observed
                    .as_ref()
                    .map(AmbientContext::payload_or_default)
                    .unwrap_or_default();
                tracing::info!(
                    method = %call.message.method,
                    user = payload.user_id().unwrap_or_default(),
                    language = payload.effective_ui_language(),
                    culture = payload.culture_code().unwrap_or_default(),
                    "service two handling call"
                );
                tokio::time::sleep(delay).await;
                let answer = render_observation(observed.as_ref());
                Ok::<_, RemotingError>(ResponseMessage::new(answer))
            }
        }),
    )
}

fn service_one(delay: Duration, clients: Arc<ContextClientFactory>) -> MethodRouter {
    MethodRouter::new().route(
        "one",
        service_fn(move |_call: InboundCall| {
            let clients = Arc::clone(&clients);
            async move {
                tokio::time::sleep(delay).await;
                let client = clients
                    .get_client(ClientTarget::service(SERVICE_TWO_URI), &RetrySettings::default())
                    .await?;
                let request = RequestMessage::new("two", "service_two_method", Bytes::new());
                let answer = client.request_response(request).await?;
                Ok::<_, RemotingError>(ResponseMessage::new(answer.body))
            }
        }),
    )
}

async fn call_service_one(
    clients: &ContextClientFactory,
    jitter: Duration,
) -> anyhow::Result<String> {
    tokio::time::sleep(jitter).await;
    let client = clients
        .get_client(ClientTarget::service(SERVICE_ONE_URI), &RetrySettings::default())
        .await?;
    let answer = client
        .request_response(RequestMessage::new("one", "service_one_method", Bytes::new()))
        .await?;
    String::from_utf8(answer.body.to_vec()).context("service two answered with non-UTF-8 body")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let network = LoopbackNetwork::new();
    let codec = PayloadCodec::default();
    let clients = Arc::new(ContextClientFactory::new(
        Arc::new(LoopbackClientFactory::new(network.clone())),
        codec,
    ));

    network.listen(
        SERVICE_TWO_URI,
        build_dispatch_pipeline(
            service_two(Duration::from_millis(args.service_two_delay_ms)),
            &ContextConfig::default(),
        ),
    );
    network.listen(
        SERVICE_ONE_URI,
        build_dispatch_pipeline(
            service_one(
                Duration::from_millis(args.service_one_delay_ms),
                Arc::clone(&clients),
            ),
            &ContextConfig {
                edge_policy: EdgePolicy::Originate,
                ..ContextConfig::default()
            },
        ),
    );

    let mut calls = JoinSet::new();
    for i in 0..args.calls {
        let ctx = AmbientContext::new(
            CorrelationId::new(),
            Some(ContextPayload::new(
                args.language.as_str(),
                args.culture.as_str(),
                format!("{}-{i}", args.user_prefix),
            )),
        );
        let expected = render_observation(Some(&ctx));
        let jitter = Duration::from_millis(rand::rng().random_range(0..25));
        let clients = Arc::clone(&clients);
        calls.spawn(async move {
            let observed = ambient::run_scoped(ctx, call_service_one(&clients, jitter)).await;
            (expected, observed)
        });
    }

    // A caller without context: the edge service originates one.
    let anonymous = call_service_one(&clients, Duration::ZERO).await?;
    let (user, id) = anonymous
        .split_once('|')
        .context("malformed answer from service two")?;
    let originated: CorrelationId = id.parse().context("service two saw a malformed id")?;
    tracing::info!(user, correlation_id = %originated, "anonymous call completed");
    if originated.is_empty() {
        bail!("edge service did not originate a correlation id");
    }

    let mut mismatches = 0usize;
    while let Some(joined) = calls.join_next().await {
        let (expected, observed) = joined.context("edge call panicked")?;
        let observed = observed?;
        if observed == expected {
            tracing::info!(%observed, "context propagated");
        } else {
            mismatches += 1;
            tracing::error!(%expected, %observed, "context mismatch");
        }
    }

    // The edge pipeline holds the client factory; closing breaks the cycle.
    network.close(SERVICE_ONE_URI);
    network.close(SERVICE_TWO_URI);

    if mismatches > 0 {
        bail!("{mismatches} of {} calls observed a foreign context", args.calls);
    }
    tracing::info!(calls = args.calls, "all calls observed their own context");
    Ok(())
}
