//! [`TunnelControl`] backed by the `wg` command-line tool.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace, warn};
use vela_primitives::PeerKey;

use crate::{
    InterfaceStatus, PeerConfig, PeerCounters, TunnelArgs, TunnelControl, TunnelError,
    TunnelResult,
};

/// Drives a tunnel interface through `wg show <iface> dump` and `wg set`.
///
/// Bringing the interface up and down is left to the host (`wg-quick`);
/// [`close`](TunnelControl::close) only stops issuing commands.
#[derive(Debug)]
pub struct WgCommand {
    interface: String,
    binary: String,
    timeout: Duration,
    closed: AtomicBool,
}

impl WgCommand {
    pub fn new(interface: impl Into<String>, binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interface: interface.into(),
            binary: binary.into(),
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_args(args: &TunnelArgs) -> Self {
        Self::new(&args.interface, &args.wg_binary, args.command_timeout())
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    async fn run(&self, args: &[String]) -> TunnelResult<String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TunnelError::Closed);
        }
        trace!(binary = %self.binary, ?args, "running tunnel command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TunnelError::Timeout(self.timeout))?
            .map_err(|source| TunnelError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TunnelError::Command {
                command: format!("{} {}", self.binary, args.join(" ")),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn dump_args(&self) -> Vec<String> {
        vec!["show".into(), self.interface.clone(), "dump".into()]
    }

    pub(crate) fn set_peer_args(&self, peer: &PeerConfig) -> Vec<String> {
        let allowed_ips = peer
            .allowed_ips
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut args = vec![
            "set".into(),
            self.interface.clone(),
            "peer".into(),
            peer.key.to_base64(),
            "allowed-ips".into(),
            allowed_ips,
        ];
        if let Some(endpoint) = peer.endpoint {
            args.push("endpoint".into());
            args.push(endpoint.to_string());
        }
        if let Some(keepalive) = peer.keepalive {
            args.push("persistent-keepalive".into());
            args.push(keepalive.to_string());
        }
        args
    }

    pub(crate) fn remove_peer_args(&self, key: &PeerKey) -> Vec<String> {
        vec![
            "set".into(),
            self.interface.clone(),
            "peer".into(),
            key.to_base64(),
            "remove".into(),
        ]
    }
}

/// Parse the output of `wg show <iface> dump`.
///
/// The first line describes the interface and is skipped. Each following line
/// holds eight tab-separated fields: public key, preshared key, endpoint,
/// allowed ips, latest handshake, transfer rx, transfer tx, keepalive.
pub fn parse_dump(output: &str) -> TunnelResult<Vec<PeerCounters>> {
    let mut peers = Vec::new();
    for (index, line) in output.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;
        let parse_err = |reason: String| TunnelError::Parse {
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.split('\t').collect();
        let [key, _psk, _endpoint, _allowed_ips, _handshake, rx, tx, _keepalive] =
            fields.as_slice()
        else {
            return Err(parse_err(format!("expected 8 fields, got {}", fields.len())));
        };

        let key: PeerKey = key
            .parse()
            .map_err(|e| parse_err(format!("public key: {e}")))?;
        let rx = rx
            .parse()
            .map_err(|e| parse_err(format!("transfer rx: {e}")))?;
        let tx = tx
            .parse()
            .map_err(|e| parse_err(format!("transfer tx: {e}")))?;

        peers.push(PeerCounters { key, rx, tx });
    }
    Ok(peers)
}

#[async_trait]
impl TunnelControl for WgCommand {
    async fn list_peers(&self) -> TunnelResult<Vec<PeerCounters>> {
        let output = self.run(&self.dump_args()).await?;
        parse_dump(&output)
    }

    async fn interface_status(&self) -> TunnelResult<InterfaceStatus> {
        match self.run(&self.dump_args()).await {
            Ok(output) => Ok(InterfaceStatus {
                up: true,
                peer_count: parse_dump(&output)?.len(),
            }),
            Err(TunnelError::Command { stderr, .. }) => {
                debug!(interface = %self.interface, %stderr, "tunnel interface not available");
                Ok(InterfaceStatus::default())
            }
            Err(err) => Err(err),
        }
    }

    async fn add_peer(&self, peer: &PeerConfig) -> TunnelResult<()> {
        self.run(&self.set_peer_args(peer)).await?;
        debug!(interface = %self.interface, peer = %peer.key, "tunnel peer installed");
        Ok(())
    }

    async fn remove_peer(&self, key: &PeerKey) -> TunnelResult<()> {
        self.run(&self.remove_peer_args(key)).await?;
        debug!(interface = %self.interface, peer = %key, "tunnel peer removed");
        Ok(())
    }

    async fn close(&self) -> TunnelResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!(interface = %self.interface, "tunnel control closed twice");
        } else {
            debug!(interface = %self.interface, "tunnel control released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const KEY_A: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const KEY_B: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";

    fn dump() -> String {
        let interface = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\tHIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=\t51820\toff";
        format!(
            "{interface}\n\
             {KEY_A}\t(none)\t192.95.5.67:1234\t10.192.122.3/32,10.192.124.1/24\t1700000000\t4096\t1024\toff\n\
             {KEY_B}\t(none)\t(none)\t10.0.0.2/32\t0\t0\t0\t25\n"
        )
    }

    #[test]
    fn test_parse_dump() {
        let peers = parse_dump(&dump()).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].key.to_string(), KEY_A);
        assert_eq!((peers[0].rx, peers[0].tx), (4096, 1024));
        assert_eq!((peers[1].rx, peers[1].tx), (0, 0));
    }

    #[test]
    fn test_parse_dump_interface_only() {
        let only_interface = dump().lines().next().unwrap().to_string();
        assert!(parse_dump(&only_interface).unwrap().is_empty());
        assert!(parse_dump("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_dump_rejects_short_line() {
        let output = format!("iface\n{KEY_A}\t(none)\t(none)");
        assert_matches!(parse_dump(&output), Err(TunnelError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_parse_dump_rejects_bad_counter() {
        let output = format!("iface\n{KEY_A}\t(none)\t(none)\t(none)\t0\tmany\t0\toff");
        assert_matches!(parse_dump(&output), Err(TunnelError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_set_peer_args() {
        let wg = WgCommand::new("wg0", "wg", Duration::from_secs(1));
        let peer = PeerConfig::new(
            KEY_A.parse().unwrap(),
            vec!["10.0.0.2/32".parse().unwrap(), "fd00::2/128".parse().unwrap()],
        )
        .with_endpoint(Some("203.0.113.7:51820".parse().unwrap()))
        .with_keepalive(Some(25));

        assert_eq!(
            wg.set_peer_args(&peer),
            vec![
                "set",
                "wg0",
                "peer",
                KEY_A,
                "allowed-ips",
                "10.0.0.2/32,fd00::2/128",
                "endpoint",
                "203.0.113.7:51820",
                "persistent-keepalive",
                "25",
            ]
        );
        assert_eq!(
            wg.remove_peer_args(&peer.key),
            vec!["set", "wg0", "peer", KEY_A, "remove"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let wg = WgCommand::new("wg0", "/nonexistent/vela-wg", Duration::from_secs(1));
        assert_matches!(wg.list_peers().await, Err(TunnelError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_closed_rejects_commands() {
        let wg = WgCommand::new("wg0", "/nonexistent/vela-wg", Duration::from_secs(1));
        wg.close().await.unwrap();
        assert_matches!(wg.list_peers().await, Err(TunnelError::Closed));
        assert_matches!(
            wg.remove_peer(&KEY_A.parse().unwrap()).await,
            Err(TunnelError::Closed)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_dump_means_interface_down() {
        let wg = WgCommand::new("wg0", "false", Duration::from_secs(5));
        let status = wg.interface_status().await.unwrap();
        assert!(!status.up);
        assert_eq!(status.peer_count, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_dump_lists_no_peers() {
        let wg = WgCommand::new("wg0", "true", Duration::from_secs(5));
        assert!(wg.list_peers().await.unwrap().is_empty());
        assert!(wg.interface_status().await.unwrap().up);
    }
}
