// Keyboard teleop: W/S drive, A/D steer, C center, Space stop, R/F speed, Q quit
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::io::Write;
use std::net::TcpStream;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use autocar_ws_runtime::ws::{base64, frame, handshake};

const SPEEDS: [f64; 3] = [0.3, 0.6, 1.0]; // throttle fraction
const INPUT_TIMEOUT_MS: u64 = 120; // Stop driving after this much time with no input
const KEEPALIVE_MS: u64 = 1000;

#[derive(Debug, Parser)]
struct Args {
    /// Car address
    #[arg(default_value = "127.0.0.1:8080")]
    addr: String,
}

/// Client frames must be masked; a cheap xorshift seeded from the clock is enough
struct Masker(u32);

impl Masker {
    fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0x9E37_79B9);
        Self(nanos | 1)
    }

    fn next_key(&mut self) -> [u8; 4] {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0.to_be_bytes()
    }
}

struct Link {
    stream: TcpStream,
    masker: Masker,
}

impl Link {
    fn open(addr: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        let mut masker = Masker::from_clock();
        let nonce: Vec<u8> = (0..4).flat_map(|_| masker.next_key()).collect();
        handshake::connect(&mut stream, addr, &base64::encode(&nonce))?;

        Ok(Self { stream, masker })
    }

    fn send(&mut self, text: &str) -> std::io::Result<()> {
        let key = self.masker.next_key();
        self.stream.write_all(&frame::encode_text(text, Some(key)))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    info!("Connecting to {}...", args.addr);
    let mut link = Link::open(&args.addr)?;

    info!("Controls: W/S=drive, A/D=steer, C=center, Space=stop, R/F=speed, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&mut link);
    disable_raw_mode()?;

    // Leave the car stopped and centered
    let _ = link.send("stop");
    let _ = link.send("center");
    result
}

fn run_teleop(link: &mut Link) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    let mut drive: Option<&str> = None;
    let mut last_drive_input = Instant::now();
    let mut last_sent = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        drive = Some("forward");
                        last_drive_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        drive = Some("backward");
                        last_drive_input = Instant::now();
                    }

                    // Steering nudges accumulate on the car
                    KeyCode::Char('a') if pressed => link.send("left")?,
                    KeyCode::Char('d') if pressed => link.send("right")?,
                    KeyCode::Char('c') if pressed => link.send("center")?,

                    KeyCode::Char(' ') if pressed => {
                        drive = None;
                        link.send("stop")?;
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Release the throttle if no drive key for INPUT_TIMEOUT_MS
        if drive.is_some() && last_drive_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            drive = None;
            link.send("stop")?;
            last_sent = Instant::now();
        }

        match drive {
            Some(name) => {
                let command = format!("command:{}={}", name, SPEEDS[speed_idx]);
                if let Err(e) = link.send(&command) {
                    warn!("Send failed: {}", e);
                    return Err(e.into());
                }
                last_sent = Instant::now();
            }
            None if last_sent.elapsed() > Duration::from_millis(KEEPALIVE_MS) => {
                link.send("ping")?;
                last_sent = Instant::now();
            }
            None => {}
        }
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
