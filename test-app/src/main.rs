// nbiot test application -- CLI tool for exercising the BC95 driver against
// real hardware or a scripted mock transport.
//
// Usage:
//   nbiot-test-app --port /dev/ttyUSB0 info
//   nbiot-test-app --port /dev/ttyUSB0 --power-line dtr init
//   nbiot-test-app --port /dev/ttyUSB0 connect
//   nbiot-test-app --port /dev/ttyUSB0 send --ip 192.168.1.10 --dest-port 3005 hello
//   nbiot-test-app --port /dev/ttyUSB0 send --ip 192.168.1.10 --dest-port 3005 --hex DEADBEEF
//   nbiot-test-app --port /dev/ttyUSB0 raw AT+NBAND? --expect "+NBAND:"
//   nbiot-test-app --mock connect
//
// Logging is controlled with RUST_LOG, e.g. RUST_LOG=nbiot_at=trace to see
// every byte exchanged with the modem.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use nbiot::at::hex::{decode_hex, encode_hex};
use nbiot::at::protocol;
use nbiot::bc95::{Bc95Builder, Bc95Modem};
use nbiot::{PowerLine, RetryPolicy};
use nbiot_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// nbiot test application -- drives a BC95 modem from the command line.
#[derive(Parser)]
#[command(name = "nbiot-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    /// Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate of the modem UART.
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// Per-transaction timeout in milliseconds before the command is resent.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Give up on a command after this many transmissions.
    /// Without it, commands are retransmitted until answered.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Abort whatever command is in flight after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Serial control line wired to the modem's power-enable input.
    #[arg(long, value_enum, default_value = "none")]
    power_line: PowerLineArg,

    /// Use a scripted mock transport instead of a real serial port.
    /// Useful for verifying CLI parsing and builder wiring without hardware.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum PowerLineArg {
    None,
    Dtr,
    Rts,
}

impl From<PowerLineArg> for PowerLine {
    fn from(arg: PowerLineArg) -> Self {
        match arg {
            PowerLineArg::None => PowerLine::None,
            PowerLineArg::Dtr => PowerLine::Dtr,
            PowerLineArg::Rts => PowerLine::Rts,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print IMEI, firmware, model, and signal quality.
    Info,

    /// Read the signal quality.
    Csq,

    /// Power the modem and apply the default configuration.
    Init,

    /// Attach to the operator's network.
    Connect,

    /// Send one UDP datagram.
    Send {
        /// Peer IP address.
        #[arg(long)]
        ip: String,

        /// Peer port.
        #[arg(long)]
        dest_port: String,

        /// Treat the payload as hex instead of text.
        #[arg(long)]
        hex: bool,

        /// Datagram payload.
        payload: String,
    },

    /// Close the UDP socket.
    Close,

    /// Save the configuration and power-cycle the modem.
    Reset,

    /// Send an arbitrary AT command and print the response.
    Raw {
        /// Command without the trailing carriage return (e.g. AT+NBAND?).
        command: String,

        /// Response text that completes the command.
        #[arg(long, default_value = "OK")]
        expect: String,
    },
}

// ---------------------------------------------------------------------------
// Modem construction
// ---------------------------------------------------------------------------

fn builder(cli: &Cli) -> Bc95Builder {
    let mut builder = Bc95Builder::new()
        .baud_rate(cli.baud)
        .command_timeout(Duration::from_millis(cli.timeout_ms))
        .power_line(cli.power_line.into());
    if let Some(n) = cli.max_attempts {
        builder = builder.retry_policy(RetryPolicy::Bounded { max_attempts: n });
    }
    builder
}

async fn create_modem(cli: &Cli) -> Result<Bc95Modem> {
    let builder = builder(cli);

    if cli.mock {
        let mock = scripted_mock(&cli.command)?;
        let modem = builder
            .build_with_transport(Box::new(mock))
            .await
            .context("failed to build Bc95Modem with mock transport")?;
        println!("Connected (mock transport) -- BC95");
        return Ok(modem);
    }

    let port = cli
        .port
        .as_deref()
        .context("--port is required when not using --mock")?;
    let modem = builder
        .serial_port(port)
        .build()
        .await
        .with_context(|| format!("failed to open serial port {port} at {} baud", cli.baud))?;
    println!("Connected to {port} at {} baud -- BC95", cli.baud);
    Ok(modem)
}

/// A mock modem that answers the commands `command` will issue.
fn scripted_mock(command: &Command) -> Result<MockTransport> {
    let mut mock = MockTransport::new();
    match command {
        Command::Info => {
            mock.expect(b"AT+CGSN\r", b"\r\n+CGSN:490154203237518\r\n\r\nOK\r\n");
            mock.expect(
                b"AT+CGMR\r",
                b"\r\nSECURITY,V100R100C10B657SP2\r\n\r\nPROTOCOL,V100R100C10B657SP2\r\n\r\nOK\r\n",
            );
            mock.expect(b"AT+CGMM\r", b"\r\nBC95HB-02-STD_900\r\n\r\nOK\r\n");
            mock.expect(b"AT+CSQ\r", b"\r\n+CSQ:21,0\r\n\r\nOK\r\n");
        }
        Command::Csq => {
            mock.expect(b"AT+CSQ\r", b"\r\n+CSQ:21,0\r\n\r\nOK\r\n");
        }
        Command::Init => {
            mock.expect(b"AT+NCONFIG=AUTOCONNECT,TRUE\r", b"\r\nOK\r\n");
            mock.expect(b"AT+NCONFIG=CR_0354_0338_SCRAMBLING,TRUE\r", b"\r\nOK\r\n");
            mock.expect(b"ATE1\r", b"ATE1\r\n\r\nOK\r\n");
            mock.expect(b"ATE1\r", b"ATE1\r\n\r\nOK\r\n");
            mock.expect(b"AT\r", b"AT\r\n\r\nOK\r\n");
        }
        Command::Connect => {
            mock.expect(b"AT+CGATT=1\r", b"\r\nOK\r\n");
            mock.expect(b"AT+CGATT?\r", b"\r\n+CGATT:1\r\n\r\nOK\r\n");
            mock.expect(b"AT+CSQ\r", b"\r\n+CSQ:21,0\r\n\r\nOK\r\n");
        }
        Command::Send {
            ip,
            dest_port,
            hex,
            payload,
        } => {
            let bytes = if *hex {
                decode_hex(payload).context("payload is not valid hex")?
            } else {
                payload.as_bytes().to_vec()
            };
            let line = format!(
                "AT+NSOST=0,{ip},{dest_port},{},{}\r",
                bytes.len(),
                encode_hex(&bytes)
            );
            let ack = format!("\r\n0,{}\r\n\r\nOK\r\n", bytes.len());
            mock.expect(line.as_bytes(), ack.as_bytes());
        }
        Command::Close => {
            mock.expect(b"AT+NSOCL=0\r", b"\r\nOK\r\n");
        }
        Command::Reset => {
            mock.expect(b"AT&W\r", b"\r\nOK\r\n");
        }
        Command::Raw { command, .. } => {
            let line = format!("{command}\r");
            mock.expect(line.as_bytes(), b"\r\nOK\r\n");
        }
    }
    Ok(mock)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_info(modem: &mut Bc95Modem) -> Result<()> {
    let imei = modem.imei().await.context("failed to read IMEI")?;
    let firmware = modem
        .firmware_info()
        .await
        .context("failed to read firmware revision")?;
    let model = modem
        .hardware_info()
        .await
        .context("failed to read model")?;
    let quality = modem
        .signal_quality()
        .await
        .context("failed to read signal quality")?;

    println!("Model:    {model}");
    println!("IMEI:     {imei}");
    for line in &firmware {
        println!("Firmware: {line}");
    }
    println!("Signal:   {quality}");
    Ok(())
}

async fn cmd_csq(modem: &mut Bc95Modem) -> Result<()> {
    let quality = modem
        .signal_quality()
        .await
        .context("failed to read signal quality")?;
    println!("Signal: {quality}");
    Ok(())
}

async fn cmd_init(modem: &mut Bc95Modem) -> Result<()> {
    modem
        .initialize()
        .await
        .context("failed to initialize modem")?;
    println!("Modem initialized");
    Ok(())
}

async fn cmd_connect(modem: &mut Bc95Modem) -> Result<()> {
    let quality = modem
        .connect_to_operator()
        .await
        .context("failed to attach to network")?;
    println!("Attached, signal: {quality}");
    Ok(())
}

async fn cmd_send(
    modem: &mut Bc95Modem,
    ip: &str,
    dest_port: &str,
    hex: bool,
    payload: &str,
) -> Result<()> {
    let bytes = if hex {
        decode_hex(payload).context("payload is not valid hex")?
    } else {
        payload.as_bytes().to_vec()
    };
    if bytes.is_empty() {
        bail!("payload must not be empty");
    }

    modem.set_ip_address(ip).context("invalid --ip")?;
    modem.set_port(dest_port).context("invalid --dest-port")?;
    modem
        .send_datagram(&bytes)
        .await
        .with_context(|| format!("failed to send datagram to {ip}:{dest_port}"))?;
    println!("Sent {} bytes to {ip}:{dest_port}", bytes.len());
    Ok(())
}

async fn cmd_close(modem: &mut Bc95Modem) -> Result<()> {
    modem
        .close_connection()
        .await
        .context("failed to close socket")?;
    println!("Socket {} closed", modem.socket());
    Ok(())
}

async fn cmd_reset(modem: &mut Bc95Modem) -> Result<()> {
    modem.reset().await.context("failed to reset modem")?;
    println!("Modem reset");
    Ok(())
}

async fn cmd_raw(modem: &mut Bc95Modem, command: &str, expect: &str) -> Result<()> {
    let resp = modem
        .send_command(command, expect)
        .await
        .with_context(|| format!("{command} failed"))?;
    for line in protocol::lines(&resp.text()) {
        println!("{line}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nbiot_test_app=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    if cli.mock && cli.port.is_some() {
        bail!("--mock and --port are mutually exclusive");
    }
    if cli.timeout_ms == 0 {
        bail!("--timeout-ms must be greater than zero");
    }

    let mut modem = create_modem(&cli).await?;

    if let Some(secs) = cli.deadline_secs {
        let cancel = modem.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!(secs, "deadline reached, cancelling");
            cancel.cancel();
        });
    }

    match &cli.command {
        Command::Info => cmd_info(&mut modem).await,
        Command::Csq => cmd_csq(&mut modem).await,
        Command::Init => cmd_init(&mut modem).await,
        Command::Connect => cmd_connect(&mut modem).await,
        Command::Send {
            ip,
            dest_port,
            hex,
            payload,
        } => cmd_send(&mut modem, ip, dest_port, *hex, payload).await,
        Command::Close => cmd_close(&mut modem).await,
        Command::Reset => cmd_reset(&mut modem).await,
        Command::Raw { command, expect } => cmd_raw(&mut modem, command, expect).await,
    }
}
