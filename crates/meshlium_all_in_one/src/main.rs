mod config;

use common::nats::NatsClient;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use gateway_runner::Runner;
use meshlium_gateway::http::AuthHookConfig;
use meshlium_gateway::meshlium_gateway::{MeshliumGateway, MeshliumGatewayModuleConfig};
use meshlium_gateway::mqtt::MqttBridgeConfig;
use meshlium_gateway::{MeshliumGatewayConfig, TracingPlatformReporter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        topic = %config.topic,
        otel_enabled = config.otel_enabled,
        "Starting meshlium-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    info!("Initializing NATS...");
    let nats_client = match NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await
    {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to connect to NATS: {:#}", e);
            std::process::exit(1);
        }
    };

    let gateway_config = MeshliumGatewayConfig {
        topic: config.topic.clone(),
        device_id_field: config.device_id_field.clone(),
        username: config.username.clone(),
        password: config.password.clone(),
        resolution_timeout_ms: config.resolution_timeout_ms,
        shutdown_timeout_ms: config.shutdown_timeout_ms,
    };
    let shutdown_timeout = gateway_config.shutdown_timeout();

    let reporter = Arc::new(TracingPlatformReporter::new(config.topic.clone()));

    let gateway = match MeshliumGateway::new(
        Arc::clone(&nats_client),
        reporter,
        build_module_config(&config, gateway_config),
    )
    .await
    {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to initialize meshlium gateway: {:#}", e);
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new();
    for (name, process) in gateway.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner = runner
        .with_closer({
            let nats_for_close = Arc::clone(&nats_client);
            move || {
                Box::pin(async move {
                    info!("Running cleanup tasks...");
                    if let Err(e) = nats_for_close.close().await {
                        error!("Failed to close NATS connection: {:#}", e);
                    }

                    // Flush pending traces and logs
                    shutdown_telemetry(telemetry_providers);

                    info!("Cleanup complete");
                    Ok(())
                })
            }
        })
        .with_closer_timeout(shutdown_timeout);

    runner.run().await;
}

fn build_module_config(
    config: &ServiceConfig,
    gateway: MeshliumGatewayConfig,
) -> MeshliumGatewayModuleConfig {
    MeshliumGatewayModuleConfig {
        gateway,
        mqtt: MqttBridgeConfig {
            broker_url: config.broker_url.clone(),
            client_id: config.mqtt_client_id.clone(),
            topic: config.topic.clone(),
            sys_topics_enabled: config.sys_topics_enabled,
            max_retry_attempts: config.mqtt_max_retry_attempts,
            retry_delay_secs: config.mqtt_retry_delay_secs,
            keep_alive_secs: config.mqtt_keep_alive_secs,
        },
        auth_hook: config.auth_hook_enabled.then(|| AuthHookConfig {
            host: config.auth_hook_host.clone(),
            port: config.auth_hook_port,
        }),
        device_info_subject: config.nats_device_info_subject.clone(),
        device_state_stream: config.nats_device_state_stream.clone(),
        readings_stream: config.nats_readings_stream.clone(),
        devices_stream: config.nats_devices_stream.clone(),
        devices_consumer_name: config.nats_devices_consumer_name.clone(),
        devices_batch_size: config.nats_batch_size,
        devices_max_wait: Duration::from_secs(config.nats_batch_wait_secs),
        known_devices: config.known_device_ids(),
    }
}
