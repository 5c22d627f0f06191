use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{error, info};

use h2_reactor::{handler, protocol, Config, Reactor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Answer every HTTP/2 request with an empty 200.
    Http2,
    /// Write back whatever each connection sends.
    Echo,
}

#[derive(Parser)]
#[command(name = "h2d")]
#[command(version)]
#[command(about = "Single-threaded HTTP/2 server on a readiness reactor", long_about = None)]
struct Cli {
    /// TCP port to listen on.
    port: u16,
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED.to_string())]
    host: String,
    #[arg(long, value_enum, default_value_t = Mode::Http2)]
    mode: Mode,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
    #[arg(long, default_value_t = 4096)]
    recv_buffer_size: usize,
    /// Defaults to the recv buffer size.
    #[arg(long)]
    recv_high_watermark: Option<usize>,
    #[arg(long, default_value_t = 4096)]
    send_buffer_size: usize,
    #[arg(long, default_value_t = 0)]
    send_low_watermark: usize,
    /// Seconds the peer has to acknowledge our SETTINGS.
    #[arg(long, default_value_t = 10)]
    settings_timeout: u64,
    /// Idle seconds before a stream is reset.
    #[arg(long, default_value_t = 30)]
    stream_timeout: u64,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            recv_buffer_size: self.recv_buffer_size,
            recv_high_watermark: self.recv_high_watermark.unwrap_or(self.recv_buffer_size),
            send_buffer_size: self.send_buffer_size,
            send_low_watermark: self.send_low_watermark,
            settings_timeout: Duration::from_secs(self.settings_timeout),
            stream_recv_timeout: Duration::from_secs(self.stream_timeout),
            stream_send_timeout: Duration::from_secs(self.stream_timeout),
            ..Config::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = log::LevelFilter::from_str(&cli.log_level)?;
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                buf.timestamp_micros(),
                record.level(),
                record.args()
            )
        })
        .filter(None, log_level)
        .init();

    let addr = SocketAddr::new(cli.host.parse()?, cli.port);
    let mut reactor = Reactor::new(cli.config())?;
    match cli.mode {
        Mode::Http2 => {
            protocol::install(reactor.core_mut());
            handler::install_http2(reactor.core_mut());
        }
        Mode::Echo => handler::install_echo(reactor.core_mut()),
    }
    reactor.listen(addr)?;

    let stop = reactor.stop_handle();
    ctrlc::set_handler(move || {
        if let Err(e) = stop.stop() {
            error!("stop reactor: {}", e);
        }
    })?;
    info!("Press Ctrl-C to stop");

    reactor.run()?;
    info!("shut down");
    Ok(())
}
