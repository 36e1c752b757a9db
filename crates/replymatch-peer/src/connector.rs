use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;

use replymatch_core::{CodecStage, Message, MessageCodec};
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig};
use crate::error::{PeerError, Result};

/// Connect to a listening socket with the default connection config.
pub fn connect<T, C>(
    path: impl AsRef<Path>,
    stage: Arc<CodecStage<T, C>>,
) -> Result<Connection<T, C, UnixStream>>
where
    T: Message + Default + Clone + Send + Sync + 'static,
    C: MessageCodec<T> + 'static,
{
    connect_with_config(path, stage, ConnectionConfig::default())
}

pub fn connect_with_config<T, C>(
    path: impl AsRef<Path>,
    stage: Arc<CodecStage<T, C>>,
    config: ConnectionConfig,
) -> Result<Connection<T, C, UnixStream>>
where
    T: Message + Default + Clone + Send + Sync + 'static,
    C: MessageCodec<T> + 'static,
{
    let path = path.as_ref();
    let stream = UnixStream::connect(path).map_err(|source| PeerError::Connect {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(?path, "connected to unix domain socket");
    Connection::spawn(stream, stage, config)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use replymatch_core::{Inbound, ReadContext};
    use replymatch_packet::Packet;

    use super::*;
    use crate::listener::tests::make_sock_path;
    use crate::listener::Listener;

    /// Request/response over plain text: `?<n>` asks, `!<n>` answers.
    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    struct Line(String);

    impl Line {
        fn tag(&self) -> &str {
            self.0.get(1..).unwrap_or_default()
        }
    }

    impl Message for Line {
        fn reply(&self) -> Option<bool> {
            Some(self.0.starts_with('!'))
        }

        fn to_packet(&self) -> Option<Packet> {
            Some(Packet::new(self.0.clone().into_bytes()))
        }
    }

    struct LineCodec;

    impl MessageCodec<Line> for LineCodec {
        fn decode(&self, _ctx: &ReadContext<Line>, packet: &Packet) -> Option<Line> {
            Some(Line(String::from_utf8_lossy(packet.as_ref()).into_owned()))
        }

        fn is_match(&self, request: &Line, response: &Line) -> bool {
            request.tag() == response.tag()
        }
    }

    fn serve_once(listener: Listener, replies: usize) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let stage = Arc::new(CodecStage::new(LineCodec));
            let conn = listener.accept(&stage).expect("listener should accept");
            for _ in 0..replies {
                if let Ok(Inbound::Message(line)) = conn.recv() {
                    conn.send(Line(format!("!{}", line.tag()))).unwrap();
                }
            }
        })
    }

    #[test]
    fn connect_and_call() {
        let sock_path = make_sock_path("call");
        let listener = Listener::bind(&sock_path).expect("listener should bind");
        let server = serve_once(listener, 1);

        let stage = Arc::new(CodecStage::new(LineCodec));
        let client = connect(&sock_path, stage).expect("client should connect");
        assert_eq!(client.call(Line("?7".into())).unwrap(), Line("!7".into()));

        server.join().expect("server thread should complete");
        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }

    #[test]
    fn server_going_away_closes_client() {
        let sock_path = make_sock_path("away");
        let listener = Listener::bind(&sock_path).expect("listener should bind");
        let server = serve_once(listener, 1);

        let stage = Arc::new(CodecStage::new(LineCodec));
        let config = ConnectionConfig::default().with_request_timeout(Duration::from_secs(30));
        let client = connect_with_config(&sock_path, stage, config).unwrap();

        let answered = client.request(Line("?1".into())).unwrap();
        assert_eq!(answered.wait().unwrap(), Line("!1".into()));
        server.join().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !client.is_closed() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(client.is_closed());
        assert!(matches!(
            client.request(Line("?2".into())),
            Err(PeerError::Disconnected(_))
        ));
        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let sock_path = make_sock_path("missing");
        let stage = Arc::new(CodecStage::new(LineCodec));
        assert!(matches!(
            connect(&sock_path, stage),
            Err(PeerError::Connect { .. })
        ));
        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }
}
