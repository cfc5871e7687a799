// MIT License - Copyright (c) 2026 Peter Wright
// Login handshake for the integration protocol

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::contains_any;
use crate::config::AuthConfig;
use crate::error::{Result, WattBoxError};
use crate::transport::Session;

/// Progress through the login exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AwaitingPrompt,
    SentUsername,
    SentPassword,
    Authenticated,
    Rejected,
}

/// Drives the username/password exchange on a fresh session.
///
/// The rejection count survives across sessions, so a device that hangs up
/// after refusing a login still reaches `max_attempts`. It is cleared by a
/// successful login.
#[derive(Debug)]
pub struct Authenticator {
    config: AuthConfig,
    username: String,
    password: String,
    state: AuthState,
    rejections: u32,
}

impl Authenticator {
    pub fn new(config: AuthConfig, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            config,
            username: username.into(),
            password: password.into(),
            state: AuthState::AwaitingPrompt,
            rejections: 0,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    /// Log in on `session`.
    ///
    /// Returns `Auth` once the credentials have been refused `max_attempts`
    /// times; `Timeout` or `Closed` when the device stops cooperating.
    pub async fn authenticate(&mut self, session: &mut Session) -> Result<()> {
        let mut prompt_seen = false;

        loop {
            self.state = AuthState::AwaitingPrompt;
            if !prompt_seen {
                let prompt = session
                    .read_prompt(&self.config.login_prompts, self.prompt_deadline())
                    .await
                    .map_err(|e| relabel(e, "login prompt"))?;
                debug!("Login prompt: {:?}", prompt.trim());
            }
            prompt_seen = false;

            session
                .write_line(format!("{}\n", self.username).as_bytes())
                .await?;
            self.state = AuthState::SentUsername;

            session
                .read_prompt(&self.config.password_prompts, self.prompt_deadline())
                .await
                .map_err(|e| relabel(e, "password prompt"))?;

            session
                .write_line(format!("{}\n", self.password).as_bytes())
                .await?;
            self.state = AuthState::SentPassword;

            match self.await_verdict(session).await? {
                Verdict::Accepted => {
                    self.state = AuthState::Authenticated;
                    self.rejections = 0;
                    info!("Logged in to {} as {}", session.peer(), self.username);
                    return Ok(());
                }
                Verdict::Rejected { reprompted } => {
                    self.state = AuthState::Rejected;
                    self.rejections += 1;
                    warn!(
                        "Login to {} rejected ({}/{})",
                        session.peer(),
                        self.rejections,
                        self.config.max_attempts
                    );
                    if self.rejections >= self.config.max_attempts {
                        return Err(WattBoxError::Auth {
                            attempts: self.rejections,
                        });
                    }
                    prompt_seen = reprompted;
                }
            }
        }
    }

    /// Decide whether the password was accepted from what the device prints
    /// within the grace window.
    async fn await_verdict(&self, session: &mut Session) -> Result<Verdict> {
        let deadline = Instant::now() + self.config.success_grace;
        loop {
            let text = match session.read_text(&self.config.login_prompts, deadline).await {
                Ok(text) => text,
                Err(WattBoxError::Timeout { .. }) => {
                    debug!("No re-prompt within grace window, assuming login accepted");
                    return Ok(Verdict::Accepted);
                }
                Err(e) => return Err(e),
            };
            let trimmed = text.trim();
            if trimmed.is_empty() || contains_any(trimmed, &self.config.password_prompts) {
                continue;
            }
            if contains_any(trimmed, &self.config.login_prompts) {
                return Ok(Verdict::Rejected { reprompted: true });
            }
            if contains_any(trimmed, &self.config.rejection_markers) {
                debug!("Login refused: {:?}", trimmed);
                return Ok(Verdict::Rejected { reprompted: false });
            }
            if contains_any(trimmed, &self.config.success_banners) {
                debug!("Login banner: {:?}", trimmed);
            }
            return Ok(Verdict::Accepted);
        }
    }

    fn prompt_deadline(&self) -> Instant {
        Instant::now() + self.config.prompt_timeout
    }
}

enum Verdict {
    Accepted,
    /// `reprompted` is set when the refusal was a fresh login prompt,
    /// which the next attempt answers directly.
    Rejected { reprompted: bool },
}

fn relabel(err: WattBoxError, waiting_for: &str) -> WattBoxError {
    match err {
        WattBoxError::Timeout { .. } => WattBoxError::Timeout {
            command: waiting_for.to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};
    use tokio::task::JoinHandle;

    /// Minimal login server: accepts `good` as the password and reports the
    /// number of login attempts it saw.
    fn login_server(
        server: DuplexStream,
        success_text: &'static str,
        reject_text: &'static str,
    ) -> JoinHandle<u32> {
        tokio::spawn(async move {
            let (rd, mut wr) = tokio::io::split(server);
            let mut rd = BufReader::new(rd);
            let mut attempts = 0;
            wr.write_all(b"Please Login to Access the WattBox\r\nUsername: ")
                .await
                .unwrap();
            loop {
                let mut user = String::new();
                if rd.read_line(&mut user).await.unwrap() == 0 {
                    return attempts;
                }
                attempts += 1;
                wr.write_all(b"Password: ").await.unwrap();
                let mut pass = String::new();
                if rd.read_line(&mut pass).await.unwrap() == 0 {
                    return attempts;
                }
                if pass.trim() == "good" {
                    wr.write_all(success_text.as_bytes()).await.unwrap();
                    // Keep the stream open until the client hangs up.
                    let mut rest = String::new();
                    let _ = rd.read_line(&mut rest).await;
                    return attempts;
                }
                wr.write_all(reject_text.as_bytes()).await.unwrap();
            }
        })
    }

    fn authenticator(password: &str) -> Authenticator {
        let config = AuthConfig {
            prompt_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        Authenticator::new(config, "wattbox", password)
    }

    #[tokio::test]
    async fn test_login_with_banner() {
        let (client, server) = duplex(1024);
        let server = login_server(server, "Successfully Logged In!\r\n", "");
        let mut session = Session::new(Box::new(client), "test");
        let mut auth = authenticator("good");

        auth.authenticate(&mut session).await.unwrap();
        assert_eq!(auth.state(), AuthState::Authenticated);
        drop(session);
        assert_eq!(server.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_accepted_on_silence() {
        let (client, server) = duplex(1024);
        let _server = login_server(server, "", "");
        let mut session = Session::new(Box::new(client), "test");
        let mut auth = authenticator("good");

        let start = Instant::now();
        auth.authenticate(&mut session).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(auth.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_three_rejections_fail() {
        let (client, server) = duplex(1024);
        let server = login_server(server, "", "Invalid Login\r\nUsername: ");
        let mut session = Session::new(Box::new(client), "test");
        let mut auth = authenticator("bad");

        let err = auth.authenticate(&mut session).await.unwrap_err();
        assert!(matches!(err, WattBoxError::Auth { attempts: 3 }));
        assert!(!err.is_retryable());
        assert_eq!(auth.state(), AuthState::Rejected);
        drop(session);
        assert_eq!(server.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bare_reprompt_counts_as_rejection() {
        let (client, server) = duplex(1024);
        let _server = login_server(server, "", "\r\nlogin: ");
        let mut session = Session::new(Box::new(client), "test");
        let mut auth = authenticator("bad");
        auth.config.max_attempts = 2;

        let err = auth.authenticate(&mut session).await.unwrap_err();
        assert!(matches!(err, WattBoxError::Auth { attempts: 2 }));
        assert_eq!(auth.rejections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_prompt_times_out() {
        let (client, _server) = duplex(1024);
        let mut session = Session::new(Box::new(client), "test");
        let mut auth = authenticator("good");

        let err = auth.authenticate(&mut session).await.unwrap_err();
        match err {
            WattBoxError::Timeout { command } => assert_eq!(command, "login prompt"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(auth.rejections() == 0);
    }
}
