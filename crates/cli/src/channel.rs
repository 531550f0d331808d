//! CLI channel: reads lines from a terminal, writes replies back.

use async_trait::async_trait;
use mnemo_core::channel::{ChannelAdapter, ChannelCapabilities, ChannelId, InboundMessage};
use mnemo_core::error::ChannelError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

const EXIT_COMMANDS: [&str; 5] = ["exit", "quit", "/exit", "/quit", ":q"];

pub struct CliChannel<R, W> {
    id: ChannelId,
    user_id: String,
    lines: Mutex<Lines<BufReader<R>>>,
    out: Mutex<W>,
}

impl CliChannel<tokio::io::Stdin, tokio::io::Stdout> {
    pub fn stdio(user_id: impl Into<String>) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), user_id)
    }
}

impl<R, W> CliChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W, user_id: impl Into<String>) -> Self {
        Self {
            id: ChannelId("cli".into()),
            user_id: user_id.into(),
            lines: Mutex::new(BufReader::new(input).lines()),
            out: Mutex::new(output),
        }
    }

    async fn write(&self, text: &str) -> Result<(), ChannelError> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await.map_err(|e| self.delivery(e))?;
        out.flush().await.map_err(|e| self.delivery(e))
    }

    fn delivery(&self, e: std::io::Error) -> ChannelError {
        ChannelError::DeliveryFailed {
            channel: self.id.to_string(),
            reason: e.to_string(),
        }
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<R, W> ChannelAdapter for CliChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supports_streaming: true,
            ..Default::default()
        }
    }

    /// Next non-empty line. EOF or an exit command closes the channel.
    async fn receive(&self) -> Result<Option<InboundMessage>, ChannelError> {
        let mut lines = self.lines.lock().await;
        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
            let Some(line) = line else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if EXIT_COMMANDS.contains(&line) {
                return Ok(None);
            }
            return Ok(Some(InboundMessage::new(
                self.id.clone(),
                &self.user_id,
                line,
            )));
        }
    }

    async fn send(&self, _user_id: &str, content: &str) -> Result<(), ChannelError> {
        self.write(&format!("{content}\n")).await
    }

    async fn send_delta(&self, _user_id: &str, delta: &str) -> Result<(), ChannelError> {
        self.write(delta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_skips_blank_lines_and_stops_on_exit() {
        let input: &[u8] = b"hello\n\n   \nsecond\nexit\nnever read\n";
        let ch = CliChannel::new(input, Vec::new(), "local");

        let first = ch.receive().await.unwrap().unwrap();
        assert_eq!(first.content, "hello");
        assert_eq!(first.user_id, "local");
        assert_eq!(first.channel_id.as_str(), "cli");

        assert_eq!(ch.receive().await.unwrap().unwrap().content, "second");
        assert!(ch.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_closes_the_channel() {
        let input: &[u8] = b"only";
        let ch = CliChannel::new(input, Vec::new(), "local");
        assert_eq!(ch.receive().await.unwrap().unwrap().content, "only");
        assert!(ch.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deltas_are_written_without_newlines() {
        let input: &[u8] = b"";
        let ch = CliChannel::new(input, Vec::new(), "local");
        assert!(ch.capabilities().supports_streaming);

        ch.send_delta("local", "Hel").await.unwrap();
        ch.send_delta("local", "lo").await.unwrap();
        ch.send("local", "!").await.unwrap();

        assert_eq!(String::from_utf8(ch.into_output()).unwrap(), "Hello!\n");
    }
}
