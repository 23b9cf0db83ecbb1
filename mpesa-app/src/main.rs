//! # M-Pesa Gateway Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Build the gateway client and token cache
//! - Create the service over the in-memory repository
//! - Start the stale sweeper and the HTTP server

mod config;

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry_sdk::{
    metrics::SdkMeterProvider, propagation::TraceContextPropagator, trace as sdktrace,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpesa_client::{GatewayClient, GatewayConfig, TokenCache};
use mpesa_hex::{MpesaService, ServiceSettings, StaleSweeper, inbound::HttpServer};
use mpesa_repo::build_repo;

const SERVICE_NAME: &str = "mpesa-gateway";

struct Telemetry {
    tracer: sdktrace::Tracer,
    tracer_provider: sdktrace::SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    fn shutdown(&self) {
        let _ = self.tracer_provider.shutdown();
        let _ = self.meter_provider.shutdown();
    }
}

/// OTLP export over gRPC; only called when an endpoint is configured.
fn init_telemetry() -> anyhow::Result<Telemetry> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;
    let tracer_provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    // HTTP metrics layer reads the global MeterProvider
    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok(Telemetry {
        tracer: tracer_provider.tracer(SERVICE_NAME),
        tracer_provider,
        meter_provider,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let telemetry = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(_) => Some(init_telemetry()?),
        Err(_) => None,
    };
    let otel_layer = telemetry
        .as_ref()
        .map(|t| tracing_opentelemetry::layer().with_tracer(t.tracer.clone()));

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,mpesa_app=debug,mpesa_hex=debug,mpesa_client=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();

    // Load configuration
    let config = config::Config::from_env()?;

    tracing::info!("Starting M-Pesa gateway on port {}", config.port);
    tracing::info!("Provider base URL: {}", config.base_url);
    tracing::info!("Callbacks delivered to: {}", config.callback_base_url);

    let gateway = Arc::new(GatewayClient::new(
        GatewayConfig::with_base_url(
            &config.base_url,
            &config.consumer_key,
            &config.consumer_secret,
        )
        .with_timeouts(config.connect_timeout, config.read_timeout),
    )?);
    let tokens = Arc::new(TokenCache::with_margin(
        gateway.clone(),
        config.token_margin,
    ));

    let settings = ServiceSettings {
        initiator_name: config.initiator_name,
        security_credential: config.security_credential,
        shortcode: config.shortcode,
        callback_base_url: config.callback_base_url,
    };
    let service = Arc::new(MpesaService::new(build_repo(), gateway, tokens, settings));

    // Start background sweeper
    let sweeper = StaleSweeper::new(service.clone())
        .with_schedule(config.stale_after, config.sweep_interval);
    tokio::spawn(sweeper.run());

    // Manual sweeps default to the same age as the background one
    let stale_after = chrono::Duration::from_std(config.stale_after)?;
    let server = HttpServer::with_stale_after(service, stale_after);
    let addr = format!("0.0.0.0:{}", config.port);

    server.run(&addr).await?;

    // Ensure telemetry is flushed before exit
    if let Some(telemetry) = telemetry {
        telemetry.shutdown();
    }
    Ok(())
}
