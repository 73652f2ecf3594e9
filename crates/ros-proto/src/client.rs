use futures_util::{SinkExt, StreamExt};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use tokio_util::codec::Framed;

use tracing::debug;

use crate::codec::SentenceCodec;
use crate::error::{Error, ErrorKind, Result};
use crate::sentence::{DONE, EMPTY, FATAL, RE, Reply, Sentence, TRAP};

// Login command.
const LOGIN: &str = "/login";

/// A client for the device management API.
///
/// A [`Client`] owns its transport, which is usually a plain or a TLS
/// stream already connected to the device. Commands are executed one at a
/// time, each waiting for its terminal sentence.
#[derive(Debug)]
pub struct Client<S> {
    framed: Framed<S, SentenceCodec>,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a [`Client`] over a connected transport.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, SentenceCodec::new()),
        }
    }

    /// Authenticates with the given credentials.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Trap`] error when the device rejects the
    /// credentials, and an [`ErrorKind::Protocol`] error when the device
    /// asks for the legacy challenge-response login, which is not supported.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let reply = self
            .run([
                LOGIN.to_owned(),
                format!("=name={username}"),
                format!("=password={password}"),
            ])
            .await?;

        if reply.ret().is_some() {
            return Err(Error::new(
                ErrorKind::Protocol,
                "Device requested the legacy challenge-response login, which is not supported",
            ));
        }

        debug!("Logged in as `{username}`");
        Ok(())
    }

    /// Runs a command and collects its reply.
    ///
    /// The first word is the command path, the others are attributes or
    /// queries.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Trap`] when the device rejects the command, with the
    ///   device message as description
    /// - [`ErrorKind::Fatal`] when the device aborts the session
    /// - [`ErrorKind::Io`] on transport failures or a closed connection
    /// - [`ErrorKind::Protocol`] on malformed or unexpected sentences
    pub async fn run<I, W>(&mut self, words: I) -> Result<Reply>
    where
        I: IntoIterator<Item = W>,
        W: Into<String>,
    {
        let sentence: Vec<String> = words.into_iter().map(Into::into).collect();
        let Some(command) = sentence.first().cloned() else {
            return Err(Error::new(ErrorKind::Protocol, "Cannot send an empty sentence"));
        };

        debug!("Sending command `{command}`");
        self.framed.send(sentence).await?;

        let mut reply = Reply::default();
        let mut trap = None;

        loop {
            let Some(words) = self.framed.next().await.transpose()? else {
                return Err(Error::new(
                    ErrorKind::Io,
                    format!("Connection closed while waiting for the reply to `{command}`"),
                ));
            };

            match words.first().map(String::as_str) {
                Some(RE) => reply.re.push(Sentence::parse(words)),
                Some(DONE) => {
                    reply.done = Sentence::parse(words);
                    break;
                }
                // The device still closes a failed command with `!done`.
                Some(TRAP) => {
                    let sentence = Sentence::parse(words);
                    if trap.is_none() {
                        trap = Some(Error::new(
                            ErrorKind::Trap,
                            sentence.get("message").unwrap_or("unknown failure").to_owned(),
                        ));
                    }
                }
                Some(FATAL) => {
                    let message = words.get(1).cloned().unwrap_or_default();
                    return Err(Error::new(ErrorKind::Fatal, message));
                }
                Some(EMPTY) => {}
                other => {
                    return Err(Error::new(
                        ErrorKind::Protocol,
                        format!("Unexpected reply word `{}`", other.unwrap_or_default()),
                    ));
                }
            }
        }

        debug!(
            "Command `{command}` completed with {} records",
            reply.re.len()
        );

        match trap {
            Some(error) => Err(error),
            None => Ok(reply),
        }
    }

    /// Closes the client, shutting down its transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport fails to flush or shut down.
    pub async fn close(self) -> Result<()> {
        let mut stream = self.framed.into_inner();
        stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};

    use tokio::io::{DuplexStream, duplex};

    use tokio_util::codec::Framed;

    use crate::codec::SentenceCodec;
    use crate::error::ErrorKind;

    use super::Client;

    type Device = Framed<DuplexStream, SentenceCodec>;

    fn connect() -> (Client<DuplexStream>, Device) {
        let (client, device) = duplex(4096);
        (Client::new(client), Framed::new(device, SentenceCodec::new()))
    }

    async fn answer(device: &mut Device, sentences: &[&[&str]]) -> Vec<String> {
        let received = device.next().await.unwrap().unwrap();
        for sentence in sentences {
            device
                .send(sentence.iter().map(|word| (*word).to_owned()).collect())
                .await
                .unwrap();
        }
        received
    }

    #[tokio::test]
    async fn login() {
        let (mut client, mut device) = connect();

        let task = tokio::spawn(async move { answer(&mut device, &[&["!done"]]).await });

        client.login("admin", "secret").await.unwrap();

        assert_eq!(
            task.await.unwrap(),
            ["/login", "=name=admin", "=password=secret"]
        );
    }

    #[tokio::test]
    async fn login_rejected() {
        let (mut client, mut device) = connect();

        tokio::spawn(async move {
            answer(
                &mut device,
                &[
                    &["!trap", "=message=invalid user name or password (6)"],
                    &["!done"],
                ],
            )
            .await
        });

        let error = client.login("admin", "wrong").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Trap);
        assert_eq!(error.description(), "invalid user name or password (6)");
    }

    #[tokio::test]
    async fn legacy_login() {
        let (mut client, mut device) = connect();

        tokio::spawn(async move {
            answer(
                &mut device,
                &[&["!done", "=ret=ebddd18303a54111e2dea05a92ab46b4"]],
            )
            .await
        });

        let error = client.login("admin", "secret").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn run_listing() {
        let (mut client, mut device) = connect();

        let task = tokio::spawn(async move {
            answer(
                &mut device,
                &[
                    &["!re", "=.id=*1", "=name=routeros"],
                    &["!re", "=.id=*2", "=name=wireless"],
                    &["!done"],
                ],
            )
            .await
        });

        let reply = client.run(["/system/package/print"]).await.unwrap();

        assert_eq!(task.await.unwrap(), ["/system/package/print"]);
        assert_eq!(reply.re.len(), 2);
        assert_eq!(reply.re[1].get("name"), Some("wireless"));
        assert!(reply.done.is_done());
    }

    #[tokio::test]
    async fn run_empty_listing() {
        let (mut client, mut device) = connect();

        tokio::spawn(async move { answer(&mut device, &[&["!empty"], &["!done"]]).await });

        let reply = client.run(["/ip/address/print", "?.id=*9"]).await.unwrap();
        assert!(reply.re.is_empty());
    }

    #[tokio::test]
    async fn run_trap() {
        let (mut client, mut device) = connect();

        tokio::spawn(async move {
            answer(
                &mut device,
                &[&["!trap", "=message=no such item"], &["!done"]],
            )
            .await
        });

        let error = client
            .run(["/ip/address/remove", "?.id=*9"])
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Trap);
        assert_eq!(error.description(), "no such item");
    }

    #[tokio::test]
    async fn run_fatal() {
        let (mut client, mut device) = connect();

        tokio::spawn(async move {
            answer(&mut device, &[&["!fatal", "not logged in"]]).await
        });

        let error = client.run(["/system/identity/print"]).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Fatal);
        assert_eq!(error.description(), "not logged in");
    }

    #[tokio::test]
    async fn connection_closed() {
        let (mut client, device) = connect();
        drop(device);

        let error = client.run(["/system/identity/print"]).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn empty_sentence() {
        let (mut client, _device) = connect();

        let error = client.run(Vec::<String>::new()).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn close() {
        let (client, mut device) = connect();

        client.close().await.unwrap();
        assert!(device.next().await.is_none());
    }
}
