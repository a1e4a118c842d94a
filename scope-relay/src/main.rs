//! # Scope Relay
//!
//! Waits for a USB oscilloscope to be plugged in and serves it to one
//! network client at a time. When the scope is unplugged the relay goes
//! back to waiting.
use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use clap_num::maybe_hex;
use env_logger::Env;
use scope_interfaces::InterfaceManager;
use scope_protocol::CommandChannel;
use scope_protocol::discovery::{DISCOVERY_PORT, SERVICE_NAME};
use scope_server::{Builder, LengthField, UdpAnnouncer};
use scope_usb::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID, UsbScanner};

#[derive(Parser)]
#[command(about = "Relay server for USB oscilloscopes", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "25000")]
    port: u16,

    #[arg(short, long, default_value = "0.0.0.0")]
    ip: IpAddr,

    #[arg(long, value_parser = maybe_hex::<u16>, default_value_t = DEFAULT_VENDOR_ID)]
    vid: u16,

    #[arg(long, value_parser = maybe_hex::<u16>, default_value_t = DEFAULT_PRODUCT_ID)]
    pid: u16,

    #[arg(long, help = "Bytes requested for each burst header", default_value = "64")]
    burst_size: usize,

    #[arg(
        long,
        help = "Offset of the little-endian payload length inside a burst header"
    )]
    length_offset: Option<usize>,

    #[arg(long, help = "Width in bytes of the payload length field", default_value = "4")]
    length_width: usize,

    #[arg(long, help = "Announcement interval in milliseconds", default_value = "2000")]
    announce_interval_ms: u64,

    #[arg(long, default_value_t = DISCOVERY_PORT)]
    discovery_port: u16,

    #[arg(long, help = "Do not announce the relay on the network")]
    no_announce: bool,

    #[arg(long, help = "USB scan interval in milliseconds", default_value = "500")]
    poll_interval_ms: u64,

    #[arg(
        long,
        help = "How long READ_HBW waits for acquisition data, 0 waits forever",
        default_value = "10000"
    )]
    data_wait_ms: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting scope relay");

    let args = Args::parse();
    log::debug!("Parsed arguments: ip={}, port={}", args.ip, args.port);

    let addr = SocketAddr::new(args.ip, args.port);
    let announcer = if args.no_announce {
        None
    } else {
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), args.discovery_port);
        Some(Arc::new(UdpAnnouncer::new(target)?))
    };

    let scanner = UsbScanner {
        vendor_id: args.vid,
        product_id: args.pid,
        ..Default::default()
    };
    log::info!("Waiting for scopes {:04x}:{:04x}", args.vid, args.pid);
    let mut manager = InterfaceManager::new(scanner);
    manager.subscribe(|channel, connected| {
        if connected {
            log::info!("Scope {} attached", channel.serial());
        } else {
            log::info!("Scope {} detached", channel.serial());
        }
    });

    let poll_interval = Duration::from_millis(args.poll_interval_ms);
    loop {
        if let Err(e) = manager.poll_device() {
            log::error!("USB scan failed: {}", e);
        }
        let hardware = manager
            .registry()
            .iter()
            .map(|(_, channel)| channel.clone())
            .find(|channel| channel.is_alive());
        let Some(hardware) = hardware else {
            thread::sleep(poll_interval);
            continue;
        };

        let mut builder = Builder::new()
            .burst_size(args.burst_size)
            .service_name(SERVICE_NAME)
            .announce_interval(Duration::from_millis(args.announce_interval_ms))
            .data_wait(match args.data_wait_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            });
        if let Some(offset) = args.length_offset {
            builder = builder.framer(LengthField {
                offset,
                width: args.length_width,
            });
        }
        if let Some(announcer) = &announcer {
            builder = builder.announcer(announcer.clone());
        }

        log::info!("Binding to address: {}", addr);
        let server = builder.build(hardware);
        let serving = thread::spawn(move || server.listen(addr));

        // Removing the scope destroys its channel, which ends `listen` even
        // while no client is connected.
        while !serving.is_finished() {
            thread::sleep(poll_interval);
            if let Err(e) = manager.poll_device() {
                log::error!("USB scan failed: {}", e);
            }
        }
        match serving.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("Server failed: {}", e);
                thread::sleep(poll_interval);
            }
            Err(_) => log::error!("Server thread panicked"),
        }
    }
}
