// MIT License - Copyright (c) 2026 Peter Wright
// Scripted in-memory WattBox for integration tests

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};
use tokio::time::Instant;

use wattbox_client::{BoxedStream, ClientConfig, ConnectFuture, Connector, WattBoxError};

pub const PASSWORD: &str = "wattbox";

/// What the fake device does with one received line.
pub enum Answer {
    Lines(Vec<String>),
    /// Wait, then send the lines
    After(Duration, Vec<String>),
    /// Never answer
    Silent,
    /// Drop the connection
    HangUp,
}

impl Answer {
    pub fn line(text: impl Into<String>) -> Self {
        Answer::Lines(vec![text.into()])
    }
}

type Responder = dyn Fn(&str, usize) -> Answer + Send + Sync;

struct Shared {
    connects: AtomicUsize,
    logins: AtomicUsize,
    connect_times: Mutex<Vec<Instant>>,
    received: Mutex<Vec<String>>,
}

/// A fake device reachable through the `Connector` seam.
///
/// `respond` receives each command line and the 1-based session number.
#[derive(Clone)]
pub struct FakeWattBox {
    password: String,
    refuse_first: usize,
    respond: Arc<Responder>,
    shared: Arc<Shared>,
}

impl FakeWattBox {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, usize) -> Answer + Send + Sync + 'static,
    {
        Self {
            password: PASSWORD.to_string(),
            refuse_first: 0,
            respond: Arc::new(respond),
            shared: Arc::new(Shared {
                connects: AtomicUsize::new(0),
                logins: AtomicUsize::new(0),
                connect_times: Mutex::new(Vec::new()),
                received: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A four-outlet device answering the standard catalogue.
    pub fn standard() -> Self {
        Self::new(|line, _| standard_answer(line))
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    /// Refuse the first `n` connection attempts.
    pub fn refuse_first(mut self, n: usize) -> Self {
        self.refuse_first = n;
        self
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.shared.logins.load(Ordering::SeqCst)
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.shared.connect_times.lock().unwrap().clone()
    }

    /// Command lines received after login, in order.
    pub fn received(&self) -> Vec<String> {
        self.shared.received.lock().unwrap().clone()
    }

    async fn serve(self, stream: DuplexStream, session: usize) {
        let (rd, mut wr) = tokio::io::split(stream);
        let mut lines = BufReader::new(rd).lines();

        loop {
            if wr
                .write_all(b"Please Login to Access the WattBox\r\nUsername: ")
                .await
                .is_err()
            {
                return;
            }
            let Ok(Some(_user)) = lines.next_line().await else {
                return;
            };
            let _ = wr.write_all(b"Password: ").await;
            let Ok(Some(password)) = lines.next_line().await else {
                return;
            };
            self.shared.logins.fetch_add(1, Ordering::SeqCst);
            if password.trim() == self.password {
                let _ = wr.write_all(b"Successfully Logged In!\r\n").await;
                break;
            }
            let _ = wr.write_all(b"Invalid Login\r\n").await;
        }

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim_end_matches('\r').to_string();
            self.shared.received.lock().unwrap().push(line.clone());
            let lines_out = match (self.respond)(&line, session) {
                Answer::Lines(out) => out,
                Answer::After(delay, out) => {
                    tokio::time::sleep(delay).await;
                    out
                }
                Answer::Silent => continue,
                Answer::HangUp => return,
            };
            for out in lines_out {
                if wr.write_all(format!("{}\r\n", out).as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

impl Connector for FakeWattBox {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(async move {
            let n = self.shared.connects.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.connect_times.lock().unwrap().push(Instant::now());
            if n <= self.refuse_first {
                return Err(WattBoxError::Connect {
                    addr: self.describe(),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                });
            }
            let (client, server) = duplex(8192);
            tokio::spawn(self.clone().serve(server, n));
            Ok(Box::new(client) as BoxedStream)
        })
    }

    fn describe(&self) -> String {
        "fake://wattbox".to_string()
    }
}

/// Replies of a four-outlet WattBox without outlet metering or UPS.
pub fn standard_answer(line: &str) -> Answer {
    match line {
        "?Firmware" => Answer::line("?Firmware=2.4.0.1"),
        "?Hostname" => Answer::line("?Hostname=rack-pdu"),
        "?ServiceTag" => Answer::line("?ServiceTag=ST1234567890"),
        "?Model" => Answer::line("?Model=WB-800VPS-IPVM-18"),
        "?OutletCount" => Answer::line("?OutletCount=4"),
        "?OutletStatus" => Answer::line("?OutletStatus=1,1,0,1"),
        "?OutletName" => Answer::line("?OutletName={Router},{Switch, Core},{},{NAS}"),
        "?PowerStatus" => Answer::line("?PowerStatus=2.50,300.0,120.1,1"),
        "?AutoReboot" => Answer::line("?AutoReboot=1"),
        "?UPSConnection" => Answer::line("?UPSConnection=0"),
        "!Exit" => Answer::HangUp,
        "!Reboot" => Answer::HangUp,
        l if l.starts_with("?OutletPowerStatus=") => Answer::line("#Error"),
        l if l.starts_with("!OutletSet=") => Answer::line("OK"),
        l if l.starts_with("!AutoReboot=") => Answer::line("OK"),
        l if l.starts_with("!OutletName") => Answer::line("OK"),
        _ => Answer::line("#Error"),
    }
}

pub fn config() -> ClientConfig {
    ClientConfig::builder()
        .host("fake")
        .credentials("wattbox", PASSWORD)
        .command_timeout(Duration::from_secs(2))
        .connect_timeout(Duration::from_secs(5))
        .reconnect_base_delay(Duration::from_millis(20))
        .build()
}
