// ABOUTME: Binds an ESME against a peer and sends one possibly long message with a chosen concatenation method
// ABOUTME: Optionally binds as transceiver and waits for the delivery receipt

use argh::FromArgs;
use smpp_sim::cache::{InMemoryMessageCache, MessageCache};
use smpp_sim::concatenation::{ConcatenationEngine, ConcatenationType, Reassembler};
use smpp_sim::config::{ConnectionConfig, EndpointConfig, MonitoringSettings, SimulatorConfig};
use smpp_sim::datatypes::BindType;
use smpp_sim::manager::{ConnectionManager, EsmeManager, ManagerContext, SmsRequest};
use smpp_sim::registry::ProviderRegistry;
use smpp_sim::session::{HandlerResources, MessageIdGenerator, SessionStateManager, SimulatorHandler};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Send one SMS through an SMPP peer
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the system id
    #[argh(option)]
    system_id: Option<String>,

    /// the password
    #[argh(option)]
    password: Option<String>,

    /// the hostname of IP address of the SMSC (default: localhost)
    #[argh(option)]
    host: Option<String>,

    /// the port to use when connecting to the SMSC (default: 2775)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// the message to send
    #[argh(option, short = 'm')]
    message: String,

    /// the recipient telephone number
    #[argh(option, short = 't')]
    to: String,

    /// the telephone number that the message will be from
    #[argh(option, short = 'f')]
    from: String,

    /// encoding name, e.g. GSM7, UCS2, LATIN1 (default: GSM7)
    #[argh(option, short = 'e')]
    encoding: Option<String>,

    /// concatenation method: default, text_base, udhi, sar, payload, udhi_payload
    #[argh(option, short = 'c')]
    concatenation: Option<ConcatenationType>,

    /// send only the first part of a long message
    #[argh(switch)]
    first_part_only: bool,

    /// request a delivery receipt and wait this many seconds for it
    #[argh(option)]
    wait_receipt: Option<u64>,

    /// provider handler applied to outbound PDUs (default: default)
    #[argh(option)]
    provider: Option<String>,

    /// provider parameters as key=value, repeatable
    #[argh(option)]
    param: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let level = if cli_args.debugging { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let bind_type = if cli_args.wait_receipt.is_some() {
        BindType::Transceiver
    } else {
        BindType::Transmitter
    };
    let endpoint = EndpointConfig {
        host: cli_args.host.unwrap_or_else(|| "localhost".to_owned()),
        port: cli_args.port.unwrap_or(2775),
        system_id: cli_args.system_id.unwrap_or_default(),
        password: cli_args.password.unwrap_or_default(),
        system_type: String::new(),
    };
    let connection = ConnectionConfig {
        id: "send-sms".to_owned(),
        transmitter: Some(endpoint.clone()),
        provider: cli_args.provider.clone(),
        ..Default::default()
    };

    let defaults = SimulatorConfig::default();
    let cache = Arc::new(InMemoryMessageCache::new());
    let resources = HandlerResources {
        cache: cache.clone(),
        reassembler: Arc::new(Reassembler::new()),
        message_ids: Arc::new(MessageIdGenerator::new()),
    };
    let context = ManagerContext {
        states: Arc::new(SessionStateManager::new()),
        engine: Arc::new(ConcatenationEngine::new()),
        resources: resources.clone(),
        provider: ProviderRegistry::new().resolve(cli_args.provider.as_deref()),
        session: defaults.session.clone(),
        monitoring: MonitoringSettings {
            auto_reconnect: false,
            ..defaults.monitoring
        },
    };
    let handler = Arc::new(SimulatorHandler::new(&connection, &context.session, resources));
    let manager = EsmeManager::new(connection, bind_type, endpoint, context, handler);

    if let Err(err) = manager.start().await {
        eprintln!("Connection/bind failed: {err}");
        manager.stop().await;
        return Err(err.into());
    }
    println!("Connected and bound as {bind_type}");

    let mut request = SmsRequest::new(&cli_args.from, &cli_args.to, &cli_args.message);
    if let Some(encoding) = cli_args.encoding {
        request = request.encoding(encoding);
    }
    if let Some(method) = cli_args.concatenation {
        request = request.concatenation(method);
    }
    if cli_args.wait_receipt.is_some() {
        request = request.with_delivery_receipt();
    }
    for param in &cli_args.param {
        match param.split_once('=') {
            Some((key, value)) => request = request.param(key, value),
            None => eprintln!("Ignoring parameter without '=': {param}"),
        }
    }

    let result = manager.send(&request, !cli_args.first_part_only).await;
    if result.success {
        println!(
            "Sent {}/{} parts, message ids: {}",
            result.parts_sent,
            result.total_parts,
            result.message_ids.join(", ")
        );
    } else {
        eprintln!(
            "Failed to send message after {}/{} parts: {}",
            result.parts_sent,
            result.total_parts,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    if let (Some(seconds), Some(last_id)) = (cli_args.wait_receipt, result.message_ids.last()) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
        let mut receipt = None;
        while tokio::time::Instant::now() < deadline {
            receipt = cache
                .get(last_id)
                .and_then(|record| record.receipt_text)
                .or_else(|| cache.get(&format!("dr-{last_id}")).map(|record| record.text));
            if receipt.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        match receipt {
            Some(text) => println!("Receipt: {text}"),
            None => println!("No receipt within {seconds}s"),
        }
    }

    manager.stop().await;
    if result.success {
        Ok(())
    } else {
        Err(result.error.unwrap_or_default().into())
    }
}
